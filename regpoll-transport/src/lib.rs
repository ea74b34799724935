//! Transport worker for regpoll.
//!
//! [`TransportWorker`] implements [`regpoll_domain::PollTransport`] on top of
//! a dedicated OS thread that owns a [`regpoll_domain::DeviceLink`]. The
//! control context submits one request at a time and receives
//! [`regpoll_domain::TransportEvent`]s on a tokio channel.
//!
//! [`TcpLink`] is the Modbus/TCP device link; [`framing`] holds the MBAP
//! encode/decode used by it and by anything else that speaks the wire
//! format.

mod error;
pub mod framing;
mod tcp;
mod worker;

// --- public API
pub use error::TransportError;
pub use tcp::TcpLink;
pub use worker::{Connector, TransportWorker};
