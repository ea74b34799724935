//! [`RegisterPoller`] — consumer that polls one block of registers.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

// ---

use regpoll_domain::{
    // ---
    PollTransport,
    RegisterMetadata,
    Requester,
    RequesterHandle,
    Ticket,
};

// ---------------------------------------------------------------------------
// RegisterPoller
// ---------------------------------------------------------------------------

/// Reads `count` registers from `first_register` on `node` each time the
/// scheduler hands it the transport, and keeps the latest values.
pub struct RegisterPoller {
    // ---
    pub node: u8,
    pub first_register: u16,
    pub count: u16,

    values: Mutex<BTreeMap<u16, u16>>,
    metadata: Mutex<Vec<RegisterMetadata>>,
    received: AtomicU64,
    exceptions: AtomicU64,
}

// ---

impl RegisterPoller {
    // ---
    pub fn new(node: u8, first_register: u16, count: u16) -> Self {
        // ---
        Self {
            node,
            first_register,
            count,
            values: Mutex::new(BTreeMap::new()),
            metadata: Mutex::new(Vec::new()),
            received: AtomicU64::new(0),
            exceptions: AtomicU64::new(0),
        }
    }

    // ---

    /// Last register of the block, inclusive.
    pub fn last_register(&self) -> u16 {
        self.first_register
            .saturating_add(self.count.saturating_sub(1))
    }

    fn covers(&self, register: u16, node: u8) -> bool {
        node == self.node && (self.first_register..=self.last_register()).contains(&register)
    }

    // ---

    /// Latest value per register.
    pub fn values(&self) -> BTreeMap<u16, u16> {
        self.values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn metadata(&self) -> Vec<RegisterMetadata> {
        self.metadata
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Values received and exceptions attributed to this poller.
    pub fn tallies(&self) -> (u64, u64) {
        (
            self.received.load(Ordering::Relaxed),
            self.exceptions.load(Ordering::Relaxed),
        )
    }
}

// ---

impl Requester for RegisterPoller {
    // ---
    fn perform_poll(&self, transport: &dyn PollTransport) -> Ticket {
        transport.read(self.first_register, self.count, self.node)
    }

    fn receive_value(&self, register: u16, value: u16, node: u8) {
        // ---
        if !self.covers(register, node) {
            return;
        }
        self.values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(register, value);
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    fn receive_exception(&self, requester: Option<&RequesterHandle>, reason: &str) {
        // ---
        if requester.is_some_and(|r| r.refers_to(self)) {
            self.exceptions.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                node = self.node,
                register = self.first_register,
                "poll failed: {reason}"
            );
        }
    }

    fn receive_metadata(&self, metadata: &RegisterMetadata, node: u8) {
        // ---
        tracing::debug!(node, register = metadata.register, label = ?metadata.label, "metadata");
        self.metadata
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(metadata.clone());
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
