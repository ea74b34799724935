use std::collections::VecDeque;

use super::metadata::{MetadataProvider, MetadataSequence};
use super::requester::RequesterHandle;
use super::write::WriteRequest;

// ---------------------------------------------------------------------------
// QueueDepths
// ---------------------------------------------------------------------------

/// Snapshot of how much demand is waiting in each queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueueDepths {
    pub writes: usize,
    pub probes: usize,
    pub metadata: usize,
    pub reads: usize,
}

// ---------------------------------------------------------------------------
// RequestQueues
// ---------------------------------------------------------------------------

/// Pending demand, one FIFO per request class.
///
/// Plain containers: ordering policy between the queues lives in the
/// scheduler.
#[derive(Debug, Default)]
pub struct RequestQueues {
    // ---
    pub(crate) writes: VecDeque<WriteRequest>,

    /// Device identity probes, by node.
    pub(crate) probes: VecDeque<u8>,
    pub(crate) metadata: VecDeque<MetadataSequence>,

    /// One entry per requested read cycle. A requester may appear many times.
    pub(crate) reads: VecDeque<RequesterHandle>,
}

// ---

impl RequestQueues {
    // ---
    pub fn new() -> Self {
        Self::default()
    }

    // ---

    pub fn depths(&self) -> QueueDepths {
        // ---
        QueueDepths {
            writes: self.writes.len(),
            probes: self.probes.len(),
            metadata: self.metadata.len(),
            reads: self.reads.len(),
        }
    }

    // ---

    /// Drop every reference to `requester`.
    ///
    /// Write and metadata entries keep their place but lose their requester,
    /// so the transaction still runs and only the notification is skipped.
    /// Read demand for `requester` is removed outright.
    ///
    /// Returns `true` when this emptied a read queue that had entries.
    pub fn remove_reference(&mut self, requester: &RequesterHandle) -> bool {
        // ---
        for write in self.writes.iter_mut() {
            if write.requester.as_ref() == Some(requester) {
                write.requester = None;
            }
        }

        for seq in self.metadata.iter_mut() {
            if seq.requester.as_ref() == Some(requester) {
                seq.requester = None;
            }
        }

        let start_count = self.reads.len();
        self.reads.retain(|r| r != requester);

        start_count != 0 && self.reads.is_empty()
    }

    // ---

    /// Empty every queue, disposing outstanding metadata request objects.
    ///
    /// Returns `true` if the read queue had entries.
    pub fn clear(&mut self, provider: Option<&dyn MetadataProvider>) -> bool {
        // ---
        self.writes.clear();
        self.probes.clear();
        for mut seq in self.metadata.drain(..) {
            seq.dispose_request(provider);
        }

        let had_reads = !self.reads.is_empty();
        self.reads.clear();
        had_reads
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
