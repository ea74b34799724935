//! Register map routing.
//!
//! Register numbers follow the classic five-digit convention:
//!
//! ```text
//!     1 ..  9999   coils              (bit, read/write)
//! 10001 .. 19999   discrete inputs    (bit, read-only)
//! 30001 .. 39999   input registers    (word, read-only)
//! 40001 .. 49999   holding registers  (word, read/write)
//! ```
//!
//! Anything else is an illegal address and never reaches the wire.

use super::error::{RegPollError, Result};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Largest block of bits moved by a single transaction.
pub const MAX_BIT_BLOCK: usize = 2000;

/// Largest block of 16-bit words moved by a single transaction.
pub const MAX_WORD_BLOCK: usize = 125;

/// Largest coil run one write frame can carry (FC15).
pub const MAX_BIT_WRITE: usize = 1968;

/// Largest holding-register run one write frame can carry (FC16).
pub const MAX_WORD_WRITE: usize = 123;

// ---------------------------------------------------------------------------
// RegisterFamily
// ---------------------------------------------------------------------------

/// Address family a register number belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegisterFamily {
    // ---
    Coils,
    DiscreteInputs,
    InputRegisters,
    HoldingRegisters,
}

// ---

impl RegisterFamily {
    // ---
    /// Classify a register number, or `None` if it falls outside every range.
    pub fn of(register: u16) -> Option<Self> {
        // ---
        match register {
            1..=9999 => Some(Self::Coils),
            10001..=19999 => Some(Self::DiscreteInputs),
            30001..=39999 => Some(Self::InputRegisters),
            40001..=49999 => Some(Self::HoldingRegisters),
            _ => None,
        }
    }

    // ---

    /// First register number of the family.
    pub fn base(self) -> u16 {
        // ---
        match self {
            Self::Coils => 1,
            Self::DiscreteInputs => 10001,
            Self::InputRegisters => 30001,
            Self::HoldingRegisters => 40001,
        }
    }

    /// `true` for the single-bit families.
    pub fn is_bit(self) -> bool {
        matches!(self, Self::Coils | Self::DiscreteInputs)
    }

    /// `true` for families the device accepts writes on.
    pub fn is_writable(self) -> bool {
        matches!(self, Self::Coils | Self::HoldingRegisters)
    }

    /// Block size cap for one transaction in this family.
    pub fn max_block(self) -> usize {
        // ---
        if self.is_bit() {
            MAX_BIT_BLOCK
        } else {
            MAX_WORD_BLOCK
        }
    }

    /// Block size cap for one write in this family.
    pub fn max_write_block(self) -> usize {
        // ---
        if self.is_bit() {
            MAX_BIT_WRITE
        } else {
            MAX_WORD_WRITE
        }
    }

    /// Standard read function code for this family.
    pub fn read_function(self) -> u8 {
        // ---
        match self {
            Self::Coils => 0x01,
            Self::DiscreteInputs => 0x02,
            Self::HoldingRegisters => 0x03,
            Self::InputRegisters => 0x04,
        }
    }
}

// ---------------------------------------------------------------------------
// RegisterAddress
// ---------------------------------------------------------------------------

/// A register number resolved to its family and zero-based wire offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterAddress {
    // ---
    pub family: RegisterFamily,

    /// Zero-based offset within the family, as sent on the wire.
    pub offset: u16,
}

// ---

impl RegisterAddress {
    // ---
    /// Resolve `register`, rejecting anything outside the register map.
    pub fn resolve(register: u16) -> Result<Self> {
        // ---
        let family = RegisterFamily::of(register).ok_or(RegPollError::IllegalAddress(register))?;
        Ok(Self {
            family,
            offset: register - family.base(),
        })
    }

    // ---

    /// Resolve a run of `count` registers starting at `register`.
    ///
    /// The whole run must stay inside one family and respect its block cap.
    pub fn resolve_run(register: u16, count: usize) -> Result<Self> {
        // ---
        let addr = Self::resolve(register)?;
        let max = addr.family.max_block();
        if count > max {
            return Err(RegPollError::BlockTooLarge { len: count, max });
        }
        if count > 0 {
            let last = u32::from(register) + count as u32 - 1;
            let last_in_family = u16::try_from(last)
                .ok()
                .and_then(RegisterFamily::of)
                .is_some_and(|f| f == addr.family);
            if !last_in_family {
                return Err(RegPollError::IllegalAddress(register));
            }
        }
        Ok(addr)
    }

    // ---

    /// Resolve a run of `count` registers as a write target.
    ///
    /// On top of [`resolve_run`](Self::resolve_run), the family must accept
    /// writes and the run must fit one write frame.
    pub fn resolve_write_run(register: u16, count: usize) -> Result<Self> {
        // ---
        let addr = Self::resolve_run(register, count)?;
        if !addr.family.is_writable() {
            return Err(RegPollError::NotWritable { register });
        }
        let max = addr.family.max_write_block();
        if count > max {
            return Err(RegPollError::BlockTooLarge { len: count, max });
        }
        Ok(addr)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn families_route_by_range() {
        // ---
        assert_eq!(RegisterFamily::of(1), Some(RegisterFamily::Coils));
        assert_eq!(RegisterFamily::of(9999), Some(RegisterFamily::Coils));
        assert_eq!(RegisterFamily::of(10001), Some(RegisterFamily::DiscreteInputs));
        assert_eq!(RegisterFamily::of(30001), Some(RegisterFamily::InputRegisters));
        assert_eq!(RegisterFamily::of(49999), Some(RegisterFamily::HoldingRegisters));
    }

    // ---

    #[test]
    fn gaps_are_illegal() {
        // ---
        for reg in [0_u16, 10000, 20000, 29999, 30000, 40000, 50000, 65535] {
            assert!(RegisterFamily::of(reg).is_none(), "{reg} should be illegal");
            assert!(matches!(
                RegisterAddress::resolve(reg),
                Err(RegPollError::IllegalAddress(r)) if r == reg
            ));
        }
    }

    // ---

    #[test]
    fn offsets_are_zero_based() {
        // ---
        assert_eq!(RegisterAddress::resolve(1).unwrap().offset, 0);
        assert_eq!(RegisterAddress::resolve(10003).unwrap().offset, 2);
        assert_eq!(RegisterAddress::resolve(40042).unwrap().offset, 41);
    }

    // ---

    #[test]
    fn runs_respect_block_caps() {
        // ---
        assert!(RegisterAddress::resolve_run(40001, MAX_WORD_BLOCK).is_ok());
        assert!(matches!(
            RegisterAddress::resolve_run(40001, MAX_WORD_BLOCK + 1),
            Err(RegPollError::BlockTooLarge { max: MAX_WORD_BLOCK, .. })
        ));
        assert!(RegisterAddress::resolve_run(1, MAX_BIT_BLOCK).is_ok());
        assert!(RegisterAddress::resolve_run(1, MAX_BIT_BLOCK + 1).is_err());
    }

    // ---

    #[test]
    fn write_runs_fit_one_frame() {
        // ---
        assert!(RegisterAddress::resolve_write_run(40001, MAX_WORD_WRITE).is_ok());
        assert!(matches!(
            RegisterAddress::resolve_write_run(40001, MAX_WORD_BLOCK),
            Err(RegPollError::BlockTooLarge { max: MAX_WORD_WRITE, .. })
        ));
        assert!(RegisterAddress::resolve_write_run(1, MAX_BIT_WRITE).is_ok());
        assert!(RegisterAddress::resolve_write_run(1, MAX_BIT_WRITE + 1).is_err());
        assert!(matches!(
            RegisterAddress::resolve_write_run(30001, 1),
            Err(RegPollError::NotWritable { register: 30001 })
        ));
    }

    // ---

    #[test]
    fn runs_may_not_cross_families() {
        assert!(RegisterAddress::resolve_run(49990, 20).is_err());
    }
}
