//! Core traits, types, and the poll scheduler for the regpoll field-bus
//! client.
//!
//! This crate defines the vocabulary of the system. The transport, the
//! simulator, and the agent all depend on `regpoll-domain` and speak its
//! types. No I/O lives here.
//!
//! # Structure
//!
//! - [`error`]     — [`RegPollError`], [`ErrorCode`], and [`Result<T>`] alias
//! - [`address`]   — register numbering and address families
//! - [`transport`] — [`PollTransport`] / [`DeviceLink`] traits, [`Ticket`]
//! - [`requester`] — [`Requester`] callback trait and [`RequesterHandle`]
//! - [`metadata`]  — [`MetadataProvider`] and [`MetadataSequence`]
//! - [`write`]     — [`WriteRequest`] and [`WriteBatcher`]
//! - [`event`]     — [`PollEvent`] and the system register channel
//! - [`scheduler`] — [`PollScheduler`] (write > probe > metadata > read)

mod address;
mod error;
mod event;
mod metadata;
mod queues;
mod requester;
mod scheduler;
mod transport;
mod write;

// --- error
pub use error::{ErrorCode, RegPollError, Result};

// --- address
pub use address::{
    RegisterAddress, RegisterFamily, MAX_BIT_BLOCK, MAX_BIT_WRITE, MAX_WORD_BLOCK, MAX_WORD_WRITE,
};

// --- transport
pub use transport::{
    // ---
    DeviceLink,
    DeviceLinkPtr,
    PollTransport,
    Ticket,
    TransactionRequest,
    TransportEvent,
    CUSTOM_START_REGISTER,
    MAX_RAW_PDU,
};

// --- requester
pub use requester::{Requester, RequesterHandle};

// --- metadata
pub use metadata::{
    // ---
    decode_metadata,
    MetadataHandle,
    MetadataProvider,
    MetadataSequence,
    RegisterEncoding,
    RegisterMetadata,
};

// --- write
pub use write::{WriteBatcher, WriteRequest};

// --- event
pub use event::{
    // ---
    Activity,
    DeviceIdentity,
    PollCounts,
    PollEvent,
    SystemRegister,
    SENTINEL_NODE,
    SYSTEM_REGISTER,
};

// --- queues
pub use queues::QueueDepths;

// --- scheduler
pub use scheduler::{PollAction, PollScheduler, DEFAULT_TIMEOUT};
