//! Wire layout of a simulated metadata record.
//!
//! ```text
//! +-----+-----+-----+----------+----------+-----+---------+-----+-------+
//! | reg | enc | lim | min      | max      | def | default | len | label |
//! | u16 | i8  | u8  | i32      | i32      | u8  | i32     | u8  | bytes |
//! +-----+-----+-----+----------+----------+-----+---------+-----+-------+
//! ```
//!
//! All integers big-endian. `lim` and `def` are presence flags; absent
//! fields are still transmitted as zeros. A zero-length label is absent.

use regpoll_domain::{RegPollError, RegisterEncoding, RegisterMetadata, Result};

/// Custom function code answered with a metadata record.
pub const METADATA_FUNCTION: u8 = 0x41;

/// Sub-function byte of a metadata query.
pub const QUERY_RECORD: u8 = 0x01;

const FIXED_LEN: usize = 2 + 1 + 1 + 4 + 4 + 1 + 4 + 1;

// ---

pub fn encode_record(md: &RegisterMetadata) -> Vec<u8> {
    // ---
    let label = md.label.as_deref().unwrap_or("").as_bytes();
    let label = &label[..label.len().min(usize::from(u8::MAX))];
    let (min, max) = md.limits.unwrap_or((0, 0));

    let mut out = Vec::with_capacity(FIXED_LEN + label.len());
    out.extend_from_slice(&md.register.to_be_bytes());
    out.push(md.encoding.as_i8() as u8);
    out.push(u8::from(md.limits.is_some()));
    out.extend_from_slice(&min.to_be_bytes());
    out.extend_from_slice(&max.to_be_bytes());
    out.push(u8::from(md.default.is_some()));
    out.extend_from_slice(&md.default.unwrap_or(0).to_be_bytes());
    out.push(label.len() as u8);
    out.extend_from_slice(label);
    out
}

// ---

pub fn decode_record(bytes: &[u8]) -> Result<RegisterMetadata> {
    // ---
    if bytes.len() < FIXED_LEN {
        return Err(RegPollError::MetadataDecode(format!(
            "record of {} bytes, need at least {FIXED_LEN}",
            bytes.len()
        )));
    }

    let i32_at = |at: usize| i32::from_be_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]]);

    let register = u16::from_be_bytes([bytes[0], bytes[1]]);
    let encoding = RegisterEncoding::from_i8(bytes[2] as i8);
    let limits = (bytes[3] != 0).then(|| (i32_at(4), i32_at(8)));
    let default = (bytes[12] != 0).then(|| i32_at(13));

    let label_len = usize::from(bytes[17]);
    let label = bytes
        .get(FIXED_LEN..FIXED_LEN + label_len)
        .ok_or_else(|| RegPollError::MetadataDecode("label truncated".into()))?;
    let label = (!label.is_empty()).then(|| String::from_utf8_lossy(label).into_owned());

    Ok(RegisterMetadata {
        register,
        label,
        limits,
        default,
        encoding,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
