//! Register metadata: the provider seam and the per-requester scan.
//!
//! Metadata (label, limits, default, encoding) is read with a vendor
//! function code whose request/response layout only the provider
//! understands. The scheduler treats the provider as an optional injected
//! dependency: when it is absent or unavailable, metadata sequences are
//! silently dropped.

use super::error::Result;
use super::requester::RequesterHandle;

// ---------------------------------------------------------------------------
// RegisterEncoding
// ---------------------------------------------------------------------------

/// How a register's raw value should be interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RegisterEncoding {
    // ---
    #[default]
    None,
    Uint16,
    Int16,
    SignedBytes,
    Bytes,
    Bits,
    User,
    Unknown,
}

// ---

impl RegisterEncoding {
    // ---
    /// Map the provider's raw encoding byte. Negative means "no data".
    pub fn from_i8(value: i8) -> Self {
        // ---
        match value {
            i8::MIN..=-1 | 0 => Self::None,
            1 => Self::Uint16,
            2 => Self::Int16,
            3 => Self::SignedBytes,
            4 => Self::Bytes,
            5 => Self::Bits,
            6 => Self::User,
            _ => Self::Unknown,
        }
    }

    pub fn as_i8(self) -> i8 {
        // ---
        match self {
            Self::None => 0,
            Self::Uint16 => 1,
            Self::Int16 => 2,
            Self::SignedBytes => 3,
            Self::Bytes => 4,
            Self::Bits => 5,
            Self::User => 6,
            Self::Unknown => 7,
        }
    }
}

// ---------------------------------------------------------------------------
// RegisterMetadata
// ---------------------------------------------------------------------------

/// Decoded metadata for one register, delivered to the requester.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RegisterMetadata {
    // ---
    pub register: u16,
    pub label: Option<String>,
    pub limits: Option<(i32, i32)>,
    pub default: Option<i32>,
    pub encoding: RegisterEncoding,
}

// ---------------------------------------------------------------------------
// MetadataHandle
// ---------------------------------------------------------------------------

/// Opaque in-flight request object created by the provider.
///
/// Owned by the [`MetadataSequence`] step that created it and returned to
/// the provider through [`MetadataProvider::dispose`].
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct MetadataHandle {
    // ---
    pub id: u64,
    pub register: u16,
    pub function_code: u8,
}

// ---------------------------------------------------------------------------
// MetadataProvider
// ---------------------------------------------------------------------------

/// Encoder/decoder for the vendor metadata function.
pub trait MetadataProvider: Send + Sync {
    // ---
    /// `false` when the backing implementation failed to load.
    fn is_available(&self) -> bool {
        true
    }

    /// Create a request for `register`, or `None` if the register has no
    /// metadata the provider can ask for.
    fn create_request(&self, register: u16) -> Option<MetadataHandle>;

    /// Encode the outgoing PDU payload (function code excluded).
    fn encode(&self, handle: &MetadataHandle) -> Vec<u8>;

    /// Decode a response payload into the handle's internal state.
    fn decode(&self, handle: &MetadataHandle, response: &[u8]) -> Result<()>;

    fn decode_label(&self, handle: &MetadataHandle) -> Option<String>;

    fn decode_limits(&self, handle: &MetadataHandle) -> Option<(i32, i32)>;

    fn decode_default(&self, handle: &MetadataHandle) -> Option<i32>;

    fn decode_encoding(&self, handle: &MetadataHandle) -> RegisterEncoding;

    /// Release all resources held for `handle`.
    fn dispose(&self, handle: MetadataHandle);
}

// ---

/// Decode `response` and gather every field the provider exposes.
///
/// A failed decode still yields a value carrying the register number, so the
/// requester learns the step finished even though nothing was recognised.
pub fn decode_metadata(
    provider: &dyn MetadataProvider,
    handle: &MetadataHandle,
    response: &[u8],
) -> RegisterMetadata {
    // ---
    let mut metadata = RegisterMetadata {
        register: handle.register,
        ..Default::default()
    };

    match provider.decode(handle, response) {
        Ok(()) => {
            metadata.label = provider.decode_label(handle);
            metadata.default = provider.decode_default(handle);
            metadata.encoding = provider.decode_encoding(handle);
            metadata.limits = provider.decode_limits(handle);
        }
        Err(e) => {
            tracing::warn!(register = handle.register, "metadata decode failed: {e}");
        }
    }

    metadata
}

// ---------------------------------------------------------------------------
// MetadataSequence
// ---------------------------------------------------------------------------

/// A register-by-register metadata scan on behalf of one requester.
#[derive(Debug)]
pub struct MetadataSequence {
    // ---
    pub requester: Option<RequesterHandle>,
    pub node: u8,

    /// Next register to query. Advances by one per completed step.
    pub current_register: u16,

    /// Last register to query, inclusive.
    pub last_register: u16,

    /// Request object for the step in flight, if any.
    pub request: Option<MetadataHandle>,

    /// Set when the cursor could not move past `u16::MAX`.
    overflowed: bool,
}

// ---

impl MetadataSequence {
    // ---
    pub fn new(
        requester: Option<RequesterHandle>,
        node: u8,
        first_register: u16,
        last_register: u16,
    ) -> Self {
        // ---
        Self {
            requester,
            node,
            current_register: first_register,
            last_register,
            request: None,
            overflowed: false,
        }
    }

    // ---

    /// `true` once the cursor has moved past the last register.
    pub fn is_exhausted(&self) -> bool {
        self.overflowed || self.current_register > self.last_register
    }

    // ---

    /// Move the cursor to the next register.
    pub fn advance(&mut self) {
        // ---
        match self.current_register.checked_add(1) {
            Some(next) => self.current_register = next,
            None => self.overflowed = true,
        }
    }

    // ---

    /// Hand any outstanding request object back to the provider.
    pub fn dispose_request(&mut self, provider: Option<&dyn MetadataProvider>) {
        // ---
        if let Some(handle) = self.request.take() {
            if let Some(provider) = provider {
                provider.dispose(handle);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
