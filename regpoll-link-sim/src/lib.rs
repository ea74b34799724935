//! In-process simulated field device for regpoll unit and integration
//! testing.
//!
//! [`SimDevice`] implements [`regpoll_domain::DeviceLink`] against an
//! in-memory register map. [`SimConfig`] and [`SimHandle`] control injected
//! impairments:
//!
//! - Random "device busy" replies (seeded for reproducible runs)
//! - Fixed per-transaction latency
//! - One-shot exception codes and stalls
//!
//! [`SimMetadataProvider`] pairs with the device's custom metadata function
//! so metadata sequences can be exercised end to end.
//!
//! # Quick start
//!
//! ```rust
//! use regpoll_link_sim::{SimConfig, SimDevice};
//!
//! let device = SimDevice::new(SimConfig::flaky());
//! device.handle().set_registers(1, 40001, &[10, 20, 30]);
//! ```

mod config;
mod device;
mod provider;
mod record;

// --- public API
pub use config::SimConfig;
pub use device::{SimDevice, SimHandle};
pub use provider::SimMetadataProvider;
pub use record::{decode_record, encode_record, METADATA_FUNCTION};
