use std::fmt;

use super::address::RegisterAddress;
use super::error::{ErrorCode, RegPollError};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Largest raw PDU payload a custom request may carry.
pub const MAX_RAW_PDU: usize = 252;

/// Start register reported for a custom (raw PDU) transaction.
pub const CUSTOM_START_REGISTER: u16 = 0xFFFF;

// ---------------------------------------------------------------------------
// Ticket
// ---------------------------------------------------------------------------

/// Identity of one submitted transaction.
///
/// Completion and error signals carry the ticket of the transaction they
/// belong to, so a signal arriving after the scheduler has given up on a
/// transaction can be recognised and dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Ticket(pub u64);

impl fmt::Display for Ticket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// TransactionRequest
// ---------------------------------------------------------------------------

/// Exactly one thing the transport can be asked to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionRequest {
    // ---
    /// Read `count` bits or words starting at `first_register`.
    Read {
        first_register: u16,
        count: u16,
        node: u8,
    },

    /// Write `values` starting at `first_register`. Bit families treat any
    /// non-zero value as ON.
    Write {
        first_register: u16,
        values: Vec<u16>,
        node: u8,
    },

    /// Provider-defined PDU sent verbatim after the function code.
    Raw {
        function_code: u8,
        pdu: Vec<u8>,
        node: u8,
    },

    /// Report device identity.
    DeviceId { node: u8 },
}

// ---

impl TransactionRequest {
    // ---
    pub fn node(&self) -> u8 {
        // ---
        match self {
            Self::Read { node, .. }
            | Self::Write { node, .. }
            | Self::Raw { node, .. }
            | Self::DeviceId { node } => *node,
        }
    }

    // ---

    /// Register number the returned values are addressed from.
    ///
    /// `0` for identity probes, [`CUSTOM_START_REGISTER`] for raw requests.
    pub fn start_register(&self) -> u16 {
        // ---
        match self {
            Self::Read { first_register, .. } | Self::Write { first_register, .. } => {
                *first_register
            }
            Self::Raw { .. } => CUSTOM_START_REGISTER,
            Self::DeviceId { .. } => 0,
        }
    }

    // ---

    /// Check the request against the register map before any I/O.
    ///
    /// Returns the error code the transport reports instead of contacting
    /// the device.
    pub fn validate(&self) -> Result<(), ErrorCode> {
        // ---
        match self {
            Self::Read {
                first_register,
                count,
                ..
            } => {
                if *count == 0 {
                    return Err(ErrorCode::ILLEGAL_DATA_VALUE);
                }
                RegisterAddress::resolve_run(*first_register, usize::from(*count))
                    .map(|_| ())
                    .map_err(to_code)
            }

            Self::Write {
                first_register,
                values,
                ..
            } => {
                if values.is_empty() {
                    return Err(ErrorCode::ILLEGAL_DATA_VALUE);
                }
                RegisterAddress::resolve_write_run(*first_register, values.len())
                    .map(|_| ())
                    .map_err(to_code)
            }

            Self::Raw { pdu, .. } => {
                if pdu.len() > MAX_RAW_PDU {
                    return Err(ErrorCode::TOO_MANY_DATA);
                }
                Ok(())
            }

            Self::DeviceId { .. } => Ok(()),
        }
    }
}

// ---

fn to_code(e: RegPollError) -> ErrorCode {
    // ---
    match e {
        RegPollError::BlockTooLarge { .. } => ErrorCode::ILLEGAL_DATA_VALUE,
        _ => ErrorCode::ILLEGAL_DATA_ADDRESS,
    }
}

// ---------------------------------------------------------------------------
// TransportEvent
// ---------------------------------------------------------------------------

/// Asynchronous signals raised by the transport worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    // ---
    /// The device connection is up; transactions may be submitted.
    Connected,

    /// The connection could not be established. Fatal to the session.
    ConnectFailed(ErrorCode),

    /// The transaction finished; its values are ready via
    /// [`PollTransport::take_result`].
    Complete(Ticket),

    /// The transaction failed.
    Error(Ticket, ErrorCode),
}

// ---------------------------------------------------------------------------
// PollTransport
// ---------------------------------------------------------------------------

/// Control-side view of the single-transaction transport.
///
/// Submissions never block. At most one transaction may be outstanding;
/// callers wait for the matching [`TransportEvent`] before submitting again.
pub trait PollTransport: Send + Sync {
    // ---
    /// Hand one request to the worker and return its ticket.
    fn submit(&self, request: TransactionRequest) -> Ticket;

    /// Take the values of the most recent successful transaction.
    ///
    /// Bits and raw bytes are promoted to `u16`. A second call without an
    /// intervening completion returns an empty vector.
    fn take_result(&self) -> Vec<u16>;

    /// Start register of the most recently submitted request.
    fn start_register(&self) -> u16;

    /// Node the most recently submitted request was addressed to.
    fn unit_id(&self) -> u8;

    // ---

    fn read(&self, first_register: u16, count: u16, node: u8) -> Ticket {
        self.submit(TransactionRequest::Read {
            first_register,
            count,
            node,
        })
    }

    fn write(&self, first_register: u16, values: Vec<u16>, node: u8) -> Ticket {
        self.submit(TransactionRequest::Write {
            first_register,
            values,
            node,
        })
    }

    fn raw(&self, function_code: u8, pdu: Vec<u8>, node: u8) -> Ticket {
        self.submit(TransactionRequest::Raw {
            function_code,
            pdu,
            node,
        })
    }

    fn device_id(&self, node: u8) -> Ticket {
        self.submit(TransactionRequest::DeviceId { node })
    }
}

// ---------------------------------------------------------------------------
// DeviceLink
// ---------------------------------------------------------------------------

/// Worker-side connection to a device.
///
/// `execute` performs one blocking transaction. It is only ever called from
/// the worker thread, one request at a time, with requests that already
/// passed [`TransactionRequest::validate`].
pub trait DeviceLink: Send {
    // ---
    fn execute(&mut self, request: &TransactionRequest) -> Result<Vec<u16>, ErrorCode>;

    /// Release the connection. Called once when the worker exits.
    fn close(&mut self) {}
}

// ---

/// Convenience type alias for a heap-allocated [`DeviceLink`].
pub type DeviceLinkPtr = Box<dyn DeviceLink>;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn reads_outside_the_map_are_rejected() {
        // ---
        let req = TransactionRequest::Read {
            first_register: 20001,
            count: 1,
            node: 1,
        };
        assert_eq!(req.validate(), Err(ErrorCode::ILLEGAL_DATA_ADDRESS));
    }

    // ---

    #[test]
    fn writes_to_read_only_families_are_rejected() {
        // ---
        let req = TransactionRequest::Write {
            first_register: 30001,
            values: vec![1],
            node: 1,
        };
        assert_eq!(req.validate(), Err(ErrorCode::ILLEGAL_DATA_ADDRESS));

        let req = TransactionRequest::Write {
            first_register: 40001,
            values: vec![1, 2, 3],
            node: 1,
        };
        assert_eq!(req.validate(), Ok(()));
    }

    // ---

    #[test]
    fn oversized_blocks_are_rejected() {
        // ---
        let req = TransactionRequest::Read {
            first_register: 40001,
            count: 126,
            node: 0,
        };
        assert_eq!(req.validate(), Err(ErrorCode::ILLEGAL_DATA_VALUE));

        let req = TransactionRequest::Raw {
            function_code: 0x41,
            pdu: vec![0; MAX_RAW_PDU + 1],
            node: 0,
        };
        assert_eq!(req.validate(), Err(ErrorCode::TOO_MANY_DATA));
    }

    // ---

    #[test]
    fn start_register_per_kind() {
        // ---
        let raw = TransactionRequest::Raw {
            function_code: 0x41,
            pdu: vec![],
            node: 3,
        };
        assert_eq!(raw.start_register(), CUSTOM_START_REGISTER);
        assert_eq!(raw.node(), 3);
        assert_eq!(TransactionRequest::DeviceId { node: 9 }.start_register(), 0);
    }
}
