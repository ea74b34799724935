//! [`SimMetadataProvider`] — metadata provider speaking the simulated
//! device's record format on function code 0x41.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

// ---

use regpoll_domain::{
    // ---
    MetadataHandle,
    MetadataProvider,
    RegisterEncoding,
    RegisterMetadata,
    Result,
};

// ---

use super::record::{decode_record, METADATA_FUNCTION, QUERY_RECORD};

// ---------------------------------------------------------------------------
// SimMetadataProvider
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct SimMetadataProvider {
    // ---
    next_id: AtomicU64,

    /// Decoded records by handle id. Entries live from a successful
    /// `decode` until `dispose`.
    decoded: Mutex<HashMap<u64, RegisterMetadata>>,

    /// Handles created and not yet disposed.
    live: AtomicU64,
}

// ---

impl SimMetadataProvider {
    // ---
    pub fn new() -> Self {
        Self::default()
    }

    /// Request objects handed out and not yet disposed.
    pub fn outstanding(&self) -> u64 {
        self.live.load(Ordering::Relaxed)
    }

    fn decoded(&self) -> MutexGuard<'_, HashMap<u64, RegisterMetadata>> {
        self.decoded.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn field<T>(&self, handle: &MetadataHandle, f: impl FnOnce(&RegisterMetadata) -> T) -> Option<T> {
        self.decoded().get(&handle.id).map(f)
    }
}

// ---

impl MetadataProvider for SimMetadataProvider {
    // ---
    fn create_request(&self, register: u16) -> Option<MetadataHandle> {
        // ---
        self.live.fetch_add(1, Ordering::Relaxed);
        Some(MetadataHandle {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            register,
            function_code: METADATA_FUNCTION,
        })
    }

    fn encode(&self, handle: &MetadataHandle) -> Vec<u8> {
        // ---
        let [hi, lo] = handle.register.to_be_bytes();
        vec![QUERY_RECORD, hi, lo]
    }

    fn decode(&self, handle: &MetadataHandle, response: &[u8]) -> Result<()> {
        // ---
        let record = decode_record(response)?;
        if record.register != handle.register {
            tracing::debug!(
                asked = handle.register,
                got = record.register,
                "metadata record for a different register"
            );
        }
        self.decoded().insert(handle.id, record);
        Ok(())
    }

    fn decode_label(&self, handle: &MetadataHandle) -> Option<String> {
        self.field(handle, |md| md.label.clone()).flatten()
    }

    fn decode_limits(&self, handle: &MetadataHandle) -> Option<(i32, i32)> {
        self.field(handle, |md| md.limits).flatten()
    }

    fn decode_default(&self, handle: &MetadataHandle) -> Option<i32> {
        self.field(handle, |md| md.default).flatten()
    }

    fn decode_encoding(&self, handle: &MetadataHandle) -> RegisterEncoding {
        self.field(handle, |md| md.encoding).unwrap_or_default()
    }

    fn dispose(&self, handle: MetadataHandle) {
        // ---
        self.decoded().remove(&handle.id);
        self.live.fetch_sub(1, Ordering::Relaxed);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    // ---
    use regpoll_domain::decode_metadata;

    use super::super::record::encode_record;
    use super::*;

    #[test]
    fn decode_then_dispose() {
        // ---
        let provider = SimMetadataProvider::new();
        let md = RegisterMetadata {
            register: 40003,
            label: Some("Setpoint".into()),
            limits: Some((0, 100)),
            default: None,
            encoding: RegisterEncoding::Uint16,
        };

        let handle = provider.create_request(40003).unwrap();
        assert_eq!(provider.encode(&handle), vec![QUERY_RECORD, 0x9C, 0x43]);
        assert_eq!(provider.outstanding(), 1);

        assert_eq!(decode_metadata(&provider, &handle, &encode_record(&md)), md);

        provider.dispose(handle);
        assert_eq!(provider.outstanding(), 0);
    }

    // ---

    #[test]
    fn garbage_yields_bare_register() {
        // ---
        let provider = SimMetadataProvider::new();
        let handle = provider.create_request(40009).unwrap();

        let md = decode_metadata(&provider, &handle, &[1, 2, 3]);
        assert_eq!(md.register, 40009);
        assert_eq!(md.label, None);
        assert_eq!(md.encoding, RegisterEncoding::None);
    }
}
