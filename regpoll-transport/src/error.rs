//! Error types for `regpoll-transport`.

use std::io;

use thiserror::Error;

use regpoll_domain::ErrorCode;

#[derive(Debug, Error)]
pub enum TransportError {
    // ---
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("device exception {0}")]
    Exception(u8),

    #[error("transaction id mismatch: expected {expected}, got {got}")]
    TransactionId { expected: u16, got: u16 },

    #[error("function code mismatch: expected 0x{expected:02X}, got 0x{got:02X}")]
    FunctionMismatch { expected: u8, got: u8 },

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("request rejected: {0}")]
    Rejected(ErrorCode),

    #[error("request of {0} bytes does not fit in one frame")]
    Oversize(usize),

    #[error("worker thread: {0}")]
    Worker(String),
}

// ---

impl TransportError {
    // ---
    /// Error code reported to the scheduler for this failure.
    pub fn code(&self) -> ErrorCode {
        // ---
        match self {
            Self::Io(e) => ErrorCode::from(io::Error::from(e.kind())),
            Self::Exception(code) => ErrorCode(i32::from(*code)),
            Self::Rejected(code) => *code,
            Self::TransactionId { .. } | Self::FunctionMismatch { .. } | Self::Malformed(_) => {
                ErrorCode::INVALID_RESPONSE
            }
            Self::Oversize(_) => ErrorCode::TOO_MANY_DATA,
            Self::Worker(_) => ErrorCode::IO,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
