//! Write requests and the caller-side batching rule.
//!
//! The scheduler never coalesces writes. Callers that produce many single
//! values (bulk imports, scripted writes) run them through [`WriteBatcher`]
//! so contiguous same-node values in one address family go out as one block.

use super::address::{RegisterAddress, RegisterFamily};
use super::error::{RegPollError, Result};
use super::requester::RequesterHandle;

// ---------------------------------------------------------------------------
// WriteRequest
// ---------------------------------------------------------------------------

/// One block write queued with the scheduler.
#[derive(Debug, Clone)]
pub struct WriteRequest {
    // ---
    /// Consumer notified about the outcome, if any.
    pub requester: Option<RequesterHandle>,
    pub node: u8,

    /// First register written (e.g. `42`, `40023`).
    pub first_register: u16,

    /// Values written in ascending register order.
    pub values: Vec<u16>,
}

// ---

impl WriteRequest {
    // ---
    /// Build a checked write request.
    ///
    /// The run must be non-empty, land in a writable family, and fit one
    /// write frame for that family.
    pub fn new(
        requester: Option<RequesterHandle>,
        node: u8,
        first_register: u16,
        values: Vec<u16>,
    ) -> Result<Self> {
        // ---
        if values.is_empty() {
            return Err(RegPollError::EmptyWrite);
        }
        RegisterAddress::resolve_write_run(first_register, values.len())?;

        Ok(Self {
            requester,
            node,
            first_register,
            values,
        })
    }

    // ---

    fn next_register(&self) -> u32 {
        u32::from(self.first_register) + self.values.len() as u32
    }
}

// ---------------------------------------------------------------------------
// WriteBatcher
// ---------------------------------------------------------------------------

/// Coalesces single-register writes into block [`WriteRequest`]s.
#[derive(Debug, Default)]
pub struct WriteBatcher {
    // ---
    /// Block being accumulated.
    open: Option<(RegisterFamily, WriteRequest)>,

    /// Blocks closed and ready for submission, oldest first.
    ready: Vec<WriteRequest>,
}

// ---

impl WriteBatcher {
    // ---
    pub fn new() -> Self {
        Self::default()
    }

    // ---

    /// Add one value.
    ///
    /// Closes the open block first if `register` does not directly follow
    /// it, targets another node or family, or the block is at its write cap.
    pub fn push(&mut self, register: u16, value: u16, node: u8) -> Result<()> {
        // ---
        let family = RegisterFamily::of(register).ok_or(RegPollError::IllegalAddress(register))?;
        if !family.is_writable() {
            return Err(RegPollError::NotWritable { register });
        }

        if let Some((open_family, open)) = self.open.as_mut() {
            let extends = *open_family == family
                && open.node == node
                && open.next_register() == u32::from(register)
                && open.values.len() < family.max_write_block();
            if extends {
                open.values.push(value);
                return Ok(());
            }
        }

        self.close_open();
        self.open = Some((
            family,
            WriteRequest {
                requester: None,
                node,
                first_register: register,
                values: vec![value],
            },
        ));
        Ok(())
    }

    // ---

    /// Blocks closed so far. The open block is kept.
    pub fn take_ready(&mut self) -> Vec<WriteRequest> {
        std::mem::take(&mut self.ready)
    }

    // ---

    /// Close the open block and return every pending block.
    pub fn finish(mut self) -> Vec<WriteRequest> {
        // ---
        self.close_open();
        self.ready
    }

    // ---

    fn close_open(&mut self) {
        // ---
        if let Some((_, block)) = self.open.take() {
            self.ready.push(block);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::address::{MAX_BIT_WRITE, MAX_WORD_BLOCK, MAX_WORD_WRITE};

    #[test]
    fn contiguous_values_coalesce() {
        // ---
        let mut b = WriteBatcher::new();
        for (i, v) in [10_u16, 20, 30].iter().enumerate() {
            b.push(40001 + i as u16, *v, 3).unwrap();
        }
        let blocks = b.finish();

        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].first_register, 40001);
        assert_eq!(blocks[0].values, vec![10, 20, 30]);
        assert_eq!(blocks[0].node, 3);
    }

    // ---

    #[test]
    fn gaps_nodes_and_families_split_blocks() {
        // ---
        let mut b = WriteBatcher::new();
        b.push(40001, 1, 1).unwrap();
        b.push(40003, 2, 1).unwrap(); // gap
        b.push(40004, 3, 2).unwrap(); // node change
        b.push(5, 1, 2).unwrap(); // family change
        let blocks = b.finish();

        let starts: Vec<u16> = blocks.iter().map(|w| w.first_register).collect();
        assert_eq!(starts, vec![40001, 40003, 40004, 5]);
    }

    // ---

    #[test]
    fn word_blocks_split_at_write_cap() {
        // ---
        let mut b = WriteBatcher::new();
        for i in 0..MAX_WORD_BLOCK as u16 {
            b.push(40001 + i, i, 0).unwrap();
        }
        let blocks = b.finish();

        let sizes: Vec<usize> = blocks.iter().map(|w| w.values.len()).collect();
        assert_eq!(sizes, vec![MAX_WORD_WRITE, 2]);
        assert_eq!(blocks[1].first_register, 40001 + MAX_WORD_WRITE as u16);
        assert_eq!(blocks[1].values, vec![123, 124]);
    }

    // ---

    #[test]
    fn bit_blocks_split_at_write_cap() {
        // ---
        let mut b = WriteBatcher::new();
        for i in 0..2000_u16 {
            b.push(1 + i, 1, 0).unwrap();
        }
        let blocks = b.finish();

        let sizes: Vec<usize> = blocks.iter().map(|w| w.values.len()).collect();
        assert_eq!(sizes, vec![MAX_BIT_WRITE, 2000 - MAX_BIT_WRITE]);
    }

    // ---

    #[test]
    fn batched_blocks_pass_constructor_checks() {
        // ---
        let mut b = WriteBatcher::new();
        for i in 0..300_u16 {
            b.push(40001 + i, i, 4).unwrap();
        }
        for block in b.finish() {
            assert!(WriteRequest::new(None, block.node, block.first_register, block.values).is_ok());
        }
    }

    // ---

    #[test]
    fn read_only_registers_are_refused() {
        // ---
        let mut b = WriteBatcher::new();
        assert!(matches!(
            b.push(30001, 1, 0),
            Err(RegPollError::NotWritable { register: 30001 })
        ));
        assert!(matches!(b.push(0, 1, 0), Err(RegPollError::IllegalAddress(0))));
        assert!(b.finish().is_empty());
    }

    // ---

    #[test]
    fn take_ready_leaves_open_block() {
        // ---
        let mut b = WriteBatcher::new();
        b.push(40001, 1, 0).unwrap();
        b.push(40010, 2, 0).unwrap();

        let ready = b.take_ready();
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].first_register, 40001);

        let rest = b.finish();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].first_register, 40010);
    }

    // ---

    #[test]
    fn checked_constructor_enforces_caps() {
        // ---
        assert!(WriteRequest::new(None, 1, 40001, vec![0; MAX_WORD_WRITE]).is_ok());
        assert!(matches!(
            WriteRequest::new(None, 1, 40001, vec![0; MAX_WORD_WRITE + 1]),
            Err(RegPollError::BlockTooLarge { .. })
        ));
        assert!(matches!(
            WriteRequest::new(None, 1, 10001, vec![1]),
            Err(RegPollError::NotWritable { .. })
        ));
        assert!(matches!(
            WriteRequest::new(None, 1, 40001, vec![]),
            Err(RegPollError::EmptyWrite)
        ));
    }
}
