//! [`SimDevice`] — in-process field device behind the [`DeviceLink`]
//! contract.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

// ---

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

// ---

use regpoll_domain::{
    // ---
    DeviceLink,
    ErrorCode,
    RegisterAddress,
    RegisterMetadata,
    TransactionRequest,
};

// ---

use super::config::SimConfig;
use super::record::{encode_record, METADATA_FUNCTION, QUERY_RECORD};

// ---------------------------------------------------------------------------
// SimState
// ---------------------------------------------------------------------------

#[derive(Default)]
struct SimState {
    // ---
    /// Register values keyed by `(node, register)`. Missing = 0.
    registers: HashMap<(u8, u16), u16>,

    /// Metadata records keyed by `(node, register)`.
    metadata: HashMap<(u8, u16), RegisterMetadata>,

    /// Identity text and RUN flag per node.
    identity: HashMap<u8, (String, bool)>,

    /// Error codes returned by the next transactions, in order.
    fail_next: VecDeque<ErrorCode>,

    /// Block the next transaction for this long, then time out.
    hang_next: Option<Duration>,

    /// Every request executed, in order.
    log: Vec<TransactionRequest>,
}

// ---------------------------------------------------------------------------
// SimHandle
// ---------------------------------------------------------------------------

/// Cheap-clone handle onto a [`SimDevice`]'s state.
///
/// Tests and the agent's simulate mode use it to preload registers and
/// inject faults while the device itself lives on the worker thread.
#[derive(Clone, Default)]
pub struct SimHandle {
    // ---
    state: Arc<Mutex<SimState>>,
}

// ---

impl SimHandle {
    // ---
    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ---

    pub fn set_register(&self, node: u8, register: u16, value: u16) {
        self.lock().registers.insert((node, register), value);
    }

    /// Store `values` at consecutive registers starting at `first`.
    pub fn set_registers(&self, node: u8, first: u16, values: &[u16]) {
        // ---
        let mut state = self.lock();
        for (reg, value) in (first..).zip(values) {
            state.registers.insert((node, reg), *value);
        }
    }

    pub fn register(&self, node: u8, register: u16) -> u16 {
        // ---
        self.lock()
            .registers
            .get(&(node, register))
            .copied()
            .unwrap_or(0)
    }

    // ---

    pub fn set_metadata(&self, node: u8, metadata: RegisterMetadata) {
        self.lock().metadata.insert((node, metadata.register), metadata);
    }

    pub fn set_identity(&self, node: u8, text: &str, running: bool) {
        self.lock().identity.insert(node, (text.to_string(), running));
    }

    // ---

    /// Fail the next transaction with `code`. Calls queue up.
    pub fn fail_next(&self, code: ErrorCode) {
        self.lock().fail_next.push_back(code);
    }

    /// Stall the next transaction for `duration`, then report a timeout.
    pub fn hang_next(&self, duration: Duration) {
        self.lock().hang_next = Some(duration);
    }

    // ---

    /// Requests executed so far.
    pub fn log(&self) -> Vec<TransactionRequest> {
        self.lock().log.clone()
    }
}

// ---------------------------------------------------------------------------
// SimDevice
// ---------------------------------------------------------------------------

pub struct SimDevice {
    // ---
    config: SimConfig,
    handle: SimHandle,
    rng: SmallRng,
}

// ---

impl SimDevice {
    // ---
    pub fn new(config: SimConfig) -> Self {
        Self::with_handle(config, SimHandle::default())
    }

    /// Device backed by an existing handle's state.
    pub fn with_handle(config: SimConfig, handle: SimHandle) -> Self {
        // ---
        let rng = match config.seed {
            Some(seed) => SmallRng::seed_from_u64(seed),
            None => SmallRng::from_entropy(),
        };
        Self {
            config,
            handle,
            rng,
        }
    }

    pub fn handle(&self) -> SimHandle {
        self.handle.clone()
    }

    // ---

    fn answer(state: &mut SimState, request: &TransactionRequest) -> Result<Vec<u16>, ErrorCode> {
        // ---
        match request {
            TransactionRequest::Read {
                first_register,
                count,
                node,
            } => {
                let bits = is_bit(*first_register)?;
                Ok((*first_register..)
                    .take(usize::from(*count))
                    .map(|reg| {
                        let v = state.registers.get(&(*node, reg)).copied().unwrap_or(0);
                        if bits {
                            u16::from(v != 0)
                        } else {
                            v
                        }
                    })
                    .collect())
            }

            TransactionRequest::Write {
                first_register,
                values,
                node,
            } => {
                let bits = is_bit(*first_register)?;
                for (reg, v) in (*first_register..).zip(values) {
                    let v = if bits { u16::from(*v != 0) } else { *v };
                    state.registers.insert((*node, reg), v);
                }
                Ok(Vec::new())
            }

            TransactionRequest::DeviceId { node } => {
                let (text, running) = state
                    .identity
                    .get(node)
                    .cloned()
                    .unwrap_or_else(|| ("regpoll-sim".to_string(), true));
                let mut bytes = text.into_bytes();
                bytes.push(0);
                bytes.push(if running { 0xFF } else { 0x00 });
                Ok(bytes.into_iter().map(u16::from).collect())
            }

            TransactionRequest::Raw {
                function_code,
                pdu,
                node,
            } => {
                if *function_code != METADATA_FUNCTION {
                    return Err(ErrorCode::ILLEGAL_FUNCTION);
                }
                let [QUERY_RECORD, hi, lo] = pdu.as_slice() else {
                    return Err(ErrorCode::ILLEGAL_DATA_VALUE);
                };
                let register = u16::from_be_bytes([*hi, *lo]);
                let md = state
                    .metadata
                    .get(&(*node, register))
                    .ok_or(ErrorCode::ILLEGAL_DATA_ADDRESS)?;
                Ok(encode_record(md).into_iter().map(u16::from).collect())
            }
        }
    }
}

// ---

fn is_bit(register: u16) -> Result<bool, ErrorCode> {
    // ---
    RegisterAddress::resolve(register)
        .map(|a| a.family.is_bit())
        .map_err(|_| ErrorCode::ILLEGAL_DATA_ADDRESS)
}

// ---

impl DeviceLink for SimDevice {
    // ---
    fn execute(&mut self, request: &TransactionRequest) -> Result<Vec<u16>, ErrorCode> {
        // ---
        if !self.config.latency.is_zero() {
            std::thread::sleep(self.config.latency);
        }

        let (hang, injected) = {
            let mut state = self.handle.lock();
            state.log.push(request.clone());
            (state.hang_next.take(), state.fail_next.pop_front())
        };

        if let Some(duration) = hang {
            tracing::debug!(?duration, "sim device stalling");
            std::thread::sleep(duration);
            return Err(ErrorCode::DEVICE_TIMEOUT);
        }
        if let Some(code) = injected {
            return Err(code);
        }
        if self.config.busy_rate > 0.0 && self.rng.gen_bool(self.config.busy_rate.min(1.0)) {
            return Err(ErrorCode::SLAVE_DEVICE_BUSY);
        }

        let mut state = self.handle.lock();
        Self::answer(&mut state, request)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    fn read(first_register: u16, count: u16, node: u8) -> TransactionRequest {
        TransactionRequest::Read {
            first_register,
            count,
            node,
        }
    }

    #[test]
    fn writes_are_read_back_per_node() {
        // ---
        let mut dev = SimDevice::new(SimConfig::perfect());
        dev.execute(&TransactionRequest::Write {
            first_register: 40001,
            values: vec![10, 20],
            node: 3,
        })
        .unwrap();

        assert_eq!(dev.execute(&read(40001, 3, 3)).unwrap(), vec![10, 20, 0]);
        assert_eq!(dev.execute(&read(40001, 2, 4)).unwrap(), vec![0, 0]);
        assert_eq!(dev.handle().register(3, 40002), 20);
    }

    // ---

    #[test]
    fn coils_store_booleans() {
        // ---
        let mut dev = SimDevice::new(SimConfig::perfect());
        dev.execute(&TransactionRequest::Write {
            first_register: 1,
            values: vec![0, 7, 1],
            node: 0,
        })
        .unwrap();
        assert_eq!(dev.execute(&read(1, 3, 0)).unwrap(), vec![0, 1, 1]);
    }

    // ---

    #[test]
    fn injected_faults_come_first() {
        // ---
        let mut dev = SimDevice::new(SimConfig::perfect());
        let handle = dev.handle();
        handle.fail_next(ErrorCode::SLAVE_DEVICE_FAILURE);

        assert_eq!(dev.execute(&read(40001, 1, 0)), Err(ErrorCode::SLAVE_DEVICE_FAILURE));
        assert_eq!(dev.execute(&read(40001, 1, 0)), Ok(vec![0]));
        assert_eq!(handle.log().len(), 2);
    }

    // ---

    #[test]
    fn identity_bytes_end_with_nul_and_run_flag() {
        // ---
        let mut dev = SimDevice::new(SimConfig::perfect());
        dev.handle().set_identity(5, "PLC", false);

        let values = dev.execute(&TransactionRequest::DeviceId { node: 5 }).unwrap();
        assert_eq!(values, vec![b'P' as u16, b'L' as u16, b'C' as u16, 0, 0]);
    }

    // ---

    #[test]
    fn unknown_metadata_register_is_illegal_address() {
        // ---
        let mut dev = SimDevice::new(SimConfig::perfect());
        let query = TransactionRequest::Raw {
            function_code: METADATA_FUNCTION,
            pdu: vec![QUERY_RECORD, 0x9C, 0x41],
            node: 1,
        };
        assert_eq!(dev.execute(&query), Err(ErrorCode::ILLEGAL_DATA_ADDRESS));

        dev.handle().set_metadata(
            1,
            RegisterMetadata {
                register: 40001,
                ..Default::default()
            },
        );
        assert!(dev.execute(&query).is_ok());
    }

    // ---

    #[test]
    fn seeded_error_rate_is_reproducible() {
        // ---
        let config = SimConfig {
            busy_rate: 0.5,
            seed: Some(42),
            ..Default::default()
        };
        let run = |config: SimConfig| {
            let mut dev = SimDevice::new(config);
            (0..32)
                .map(|_| dev.execute(&read(40001, 1, 0)).is_err())
                .collect::<Vec<_>>()
        };
        let first = run(config.clone());
        assert_eq!(first, run(config));
        assert!(first.iter().any(|e| *e));
        assert!(first.iter().any(|e| !*e));
    }
}
