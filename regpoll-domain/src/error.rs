use std::fmt;

use thiserror::Error;

// ---------------------------------------------------------------------------
// RegPollError
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum RegPollError {
    // ---
    #[error("illegal register address: {0}")]
    IllegalAddress(u16),

    #[error("register {register} is not writable")]
    NotWritable { register: u16 },

    #[error("block of {len} values exceeds the {max} value limit")]
    BlockTooLarge { len: usize, max: usize },

    #[error("empty write request")]
    EmptyWrite,

    #[error("metadata decode failed: {0}")]
    MetadataDecode(String),
}

// ---

pub type Result<T> = std::result::Result<T, RegPollError>;

// ---------------------------------------------------------------------------
// ErrorCode
// ---------------------------------------------------------------------------

/// Numeric error code carried by a transport error signal.
///
/// Values `1..=11` are Modbus exception codes as returned by the device.
/// Values at or above `1000` are raised locally by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ErrorCode(pub i32);

// ---

impl ErrorCode {
    // ---
    pub const ILLEGAL_FUNCTION: Self = Self(1);
    pub const ILLEGAL_DATA_ADDRESS: Self = Self(2);
    pub const ILLEGAL_DATA_VALUE: Self = Self(3);
    pub const SLAVE_DEVICE_FAILURE: Self = Self(4);
    pub const ACKNOWLEDGE: Self = Self(5);
    pub const SLAVE_DEVICE_BUSY: Self = Self(6);
    pub const NEGATIVE_ACKNOWLEDGE: Self = Self(7);
    pub const MEMORY_PARITY: Self = Self(8);
    pub const GATEWAY_PATH: Self = Self(10);

    /// Raised by the scheduler watchdog when a transaction never finishes.
    pub const DEVICE_TIMEOUT: Self = Self(11);

    pub const CONNECTION_FAILED: Self = Self(1000);
    pub const IO: Self = Self(1001);
    pub const INVALID_RESPONSE: Self = Self(1002);
    pub const TOO_MANY_DATA: Self = Self(1003);

    // ---

    /// Human-readable reason broadcast alongside poll exceptions.
    pub fn reason(self) -> &'static str {
        // ---
        match self.0 {
            1 => "Illegal function",
            2 => "Illegal data address",
            3 => "Illegal data value",
            4 => "Slave device or server failure",
            5 => "Acknowledge",
            6 => "Slave device or server is busy",
            7 => "Negative acknowledge",
            8 => "Memory parity error",
            10 => "Gateway path unavailable",
            11 => "Target device failed to respond",
            1000 => "Connection failed",
            1001 => "I/O failure",
            1002 => "Invalid response",
            1003 => "Too many data",
            _ => "Unknown error",
        }
    }

    // ---

    /// `true` for codes reported by the device itself.
    pub fn is_exception(self) -> bool {
        (1..=11).contains(&self.0)
    }
}

// ---

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (code {})", self.reason(), self.0)
    }
}

// ---

impl From<std::io::Error> for ErrorCode {
    // ---
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => Self::DEVICE_TIMEOUT,
            std::io::ErrorKind::ConnectionRefused => Self::CONNECTION_FAILED,
            _ => Self::IO,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
