//! Modbus/TCP application framing.
//!
//! Every request and response is one ADU: a 7-byte MBAP header followed by
//! the PDU (function code + data).
//!
//! ```text
//! +----------+----------+----------+---------+----+----------------+
//! | txn id   | proto id | length   | unit id | fc | data           |
//! | u16 BE   | 0x0000   | u16 BE   | u8      | u8 | length-2 bytes |
//! +----------+----------+----------+---------+----+----------------+
//!  ←──────────── MBAP header, 7 bytes ─────────→
//! ```
//!
//! `length` counts the unit id and the PDU. Responses with the function
//! code's high bit set carry a one-byte exception code.

use std::io::{Read, Write};

// ---

use regpoll_domain::{ErrorCode, RegisterAddress, TransactionRequest};

// ---

use super::error::TransportError;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// MBAP header size: txn id(2) + protocol id(2) + length(2) + unit id(1).
pub const MBAP_HEADER_LEN: usize = 7;

/// Protocol identifier for Modbus.
pub const PROTOCOL_ID: u16 = 0;

/// Largest PDU (function code + data) in one ADU.
pub const MAX_PDU_LEN: usize = 253;

/// Function code high bit set on exception responses.
pub const EXCEPTION_FLAG: u8 = 0x80;

pub const FC_WRITE_SINGLE_COIL: u8 = 0x05;
pub const FC_WRITE_SINGLE_REGISTER: u8 = 0x06;
pub const FC_WRITE_MULTIPLE_COILS: u8 = 0x0F;
pub const FC_WRITE_MULTIPLE_REGISTERS: u8 = 0x10;
pub const FC_REPORT_SERVER_ID: u8 = 0x11;

// ---------------------------------------------------------------------------
// Request encoding
// ---------------------------------------------------------------------------

/// Build the PDU for `request`.
///
/// Requests are expected to have passed [`TransactionRequest::validate`];
/// an address that still fails to resolve is rejected rather than sent.
pub fn encode_pdu(request: &TransactionRequest) -> Result<Vec<u8>, TransportError> {
    // ---
    let pdu = match request {
        TransactionRequest::Read {
            first_register,
            count,
            ..
        } => {
            let addr = resolve(*first_register)?;
            let mut pdu = vec![addr.family.read_function()];
            pdu.extend_from_slice(&addr.offset.to_be_bytes());
            pdu.extend_from_slice(&count.to_be_bytes());
            pdu
        }

        TransactionRequest::Write {
            first_register,
            values,
            ..
        } => encode_write(*first_register, values)?,

        TransactionRequest::Raw {
            function_code, pdu, ..
        } => {
            let mut out = Vec::with_capacity(pdu.len() + 1);
            out.push(*function_code);
            out.extend_from_slice(pdu);
            out
        }

        TransactionRequest::DeviceId { .. } => vec![FC_REPORT_SERVER_ID],
    };

    if pdu.len() > MAX_PDU_LEN {
        return Err(TransportError::Oversize(pdu.len()));
    }
    Ok(pdu)
}

// ---

fn encode_write(first_register: u16, values: &[u16]) -> Result<Vec<u8>, TransportError> {
    // ---
    let addr = resolve(first_register)?;
    let count = u16::try_from(values.len()).map_err(|_| TransportError::Oversize(values.len()))?;
    let mut pdu = Vec::new();

    match (addr.family.is_bit(), values) {
        (true, [value]) => {
            pdu.push(FC_WRITE_SINGLE_COIL);
            pdu.extend_from_slice(&addr.offset.to_be_bytes());
            let on: u16 = if *value != 0 { 0xFF00 } else { 0x0000 };
            pdu.extend_from_slice(&on.to_be_bytes());
        }

        (true, _) => {
            let packed = pack_bits(values);
            pdu.push(FC_WRITE_MULTIPLE_COILS);
            pdu.extend_from_slice(&addr.offset.to_be_bytes());
            pdu.extend_from_slice(&count.to_be_bytes());
            pdu.push(byte_count(packed.len())?);
            pdu.extend_from_slice(&packed);
        }

        (false, [value]) => {
            pdu.push(FC_WRITE_SINGLE_REGISTER);
            pdu.extend_from_slice(&addr.offset.to_be_bytes());
            pdu.extend_from_slice(&value.to_be_bytes());
        }

        (false, _) => {
            pdu.push(FC_WRITE_MULTIPLE_REGISTERS);
            pdu.extend_from_slice(&addr.offset.to_be_bytes());
            pdu.extend_from_slice(&count.to_be_bytes());
            pdu.push(byte_count(values.len() * 2)?);
            for v in values {
                pdu.extend_from_slice(&v.to_be_bytes());
            }
        }
    }
    Ok(pdu)
}

// ---

fn resolve(register: u16) -> Result<RegisterAddress, TransportError> {
    RegisterAddress::resolve(register)
        .map_err(|_| TransportError::Rejected(ErrorCode::ILLEGAL_DATA_ADDRESS))
}

fn byte_count(n: usize) -> Result<u8, TransportError> {
    u8::try_from(n).map_err(|_| TransportError::Oversize(n))
}

// ---

/// Pack bit values LSB-first, eight to a byte. Any non-zero value is ON.
pub fn pack_bits(values: &[u16]) -> Vec<u8> {
    // ---
    let mut packed = vec![0u8; values.len().div_ceil(8)];
    for (i, v) in values.iter().enumerate() {
        if *v != 0 {
            packed[i / 8] |= 1 << (i % 8);
        }
    }
    packed
}

/// Unpack `count` bits LSB-first into `0`/`1` values.
pub fn unpack_bits(bytes: &[u8], count: usize) -> Vec<u16> {
    // ---
    (0..count)
        .map(|i| u16::from((bytes[i / 8] >> (i % 8)) & 1))
        .collect()
}

// ---------------------------------------------------------------------------
// ADU I/O
// ---------------------------------------------------------------------------

/// Frame `pdu` for `unit_id` and write the whole ADU to `stream`.
pub fn write_adu<W>(stream: &mut W, txn_id: u16, unit_id: u8, pdu: &[u8]) -> Result<(), TransportError>
where
    W: Write,
{
    // ---
    let length = u16::try_from(pdu.len() + 1).map_err(|_| TransportError::Oversize(pdu.len()))?;

    let mut adu = Vec::with_capacity(MBAP_HEADER_LEN + pdu.len());
    adu.extend_from_slice(&txn_id.to_be_bytes());
    adu.extend_from_slice(&PROTOCOL_ID.to_be_bytes());
    adu.extend_from_slice(&length.to_be_bytes());
    adu.push(unit_id);
    adu.extend_from_slice(pdu);

    stream.write_all(&adu)?;
    stream.flush()?;
    Ok(())
}

// ---

/// Read one response ADU from `stream` and return its PDU.
///
/// The PDU length comes from the MBAP length field. Frames answering an
/// earlier transaction (a late reply to a request that already timed out)
/// are read off and dropped. Any other transaction id is an error.
pub fn read_adu<R>(stream: &mut R, txn_id: u16) -> Result<Vec<u8>, TransportError>
where
    R: Read,
{
    // ---
    loop {
        let mut header = [0u8; MBAP_HEADER_LEN];
        stream.read_exact(&mut header)?;

        let protocol = u16::from_be_bytes([header[2], header[3]]);
        if protocol != PROTOCOL_ID {
            return Err(TransportError::Malformed(format!(
                "protocol id 0x{protocol:04X}"
            )));
        }

        let length = usize::from(u16::from_be_bytes([header[4], header[5]]));
        if length < 2 || length > MAX_PDU_LEN + 1 {
            return Err(TransportError::Malformed(format!("length field {length}")));
        }

        let mut pdu = vec![0u8; length - 1];
        stream.read_exact(&mut pdu)?;

        let got = u16::from_be_bytes([header[0], header[1]]);
        if got == txn_id {
            return Ok(pdu);
        }
        if !is_stale(got, txn_id) {
            return Err(TransportError::TransactionId {
                expected: txn_id,
                got,
            });
        }
        tracing::debug!(stale = got, expected = txn_id, "dropping late response");
    }
}

// ---

/// `true` when `got` precedes `current` in the wrapping id sequence.
fn is_stale(got: u16, current: u16) -> bool {
    // ---
    let behind = current.wrapping_sub(got);
    behind != 0 && behind < 0x8000
}

// ---------------------------------------------------------------------------
// Response decoding
// ---------------------------------------------------------------------------

/// Decode the response `pdu` for `request` into result values.
///
/// Bits come back as `0`/`1`, words as-is, identity and custom payloads one
/// byte per value. Writes return no values.
pub fn decode_response(request: &TransactionRequest, pdu: &[u8]) -> Result<Vec<u16>, TransportError> {
    // ---
    let expected = function_code(request)?;
    let (&fc, data) = pdu
        .split_first()
        .ok_or_else(|| TransportError::Malformed("empty pdu".into()))?;

    if fc == expected | EXCEPTION_FLAG {
        let code = data
            .first()
            .copied()
            .ok_or_else(|| TransportError::Malformed("exception without code".into()))?;
        return Err(TransportError::Exception(code));
    }
    if fc != expected {
        return Err(TransportError::FunctionMismatch { expected, got: fc });
    }

    match request {
        TransactionRequest::Read { count, .. } => {
            let count = usize::from(*count);
            let bytes = counted(data)?;
            if expected <= 0x02 {
                if bytes.len() < count.div_ceil(8) {
                    return Err(TransportError::Malformed(format!(
                        "{} bytes for {count} bits",
                        bytes.len()
                    )));
                }
                Ok(unpack_bits(bytes, count))
            } else {
                if bytes.len() != count * 2 {
                    return Err(TransportError::Malformed(format!(
                        "{} bytes for {count} registers",
                        bytes.len()
                    )));
                }
                Ok(bytes
                    .chunks_exact(2)
                    .map(|w| u16::from_be_bytes([w[0], w[1]]))
                    .collect())
            }
        }

        TransactionRequest::Write { .. } => {
            if data.len() != 4 {
                return Err(TransportError::Malformed(format!(
                    "write echo of {} bytes",
                    data.len()
                )));
            }
            Ok(Vec::new())
        }

        TransactionRequest::DeviceId { .. } => {
            Ok(counted(data)?.iter().map(|b| u16::from(*b)).collect())
        }

        TransactionRequest::Raw { .. } => Ok(data.iter().map(|b| u16::from(*b)).collect()),
    }
}

// ---

/// Function code sent for `request`, which the response must echo.
pub fn function_code(request: &TransactionRequest) -> Result<u8, TransportError> {
    // ---
    let fc = match request {
        TransactionRequest::Read { first_register, .. } => {
            resolve(*first_register)?.family.read_function()
        }
        TransactionRequest::Write {
            first_register,
            values,
            ..
        } => match (resolve(*first_register)?.family.is_bit(), values.len()) {
            (true, 1) => FC_WRITE_SINGLE_COIL,
            (true, _) => FC_WRITE_MULTIPLE_COILS,
            (false, 1) => FC_WRITE_SINGLE_REGISTER,
            (false, _) => FC_WRITE_MULTIPLE_REGISTERS,
        },
        TransactionRequest::Raw { function_code, .. } => *function_code,
        TransactionRequest::DeviceId { .. } => FC_REPORT_SERVER_ID,
    };
    Ok(fc)
}

// ---

/// Split a byte-count-prefixed payload.
fn counted(data: &[u8]) -> Result<&[u8], TransportError> {
    // ---
    let (&n, rest) = data
        .split_first()
        .ok_or_else(|| TransportError::Malformed("missing byte count".into()))?;
    rest.get(..usize::from(n))
        .ok_or_else(|| TransportError::Malformed(format!("byte count {n} exceeds payload")))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    // ---
    use std::io::Cursor;

    use super::*;

    fn read(first_register: u16, count: u16) -> TransactionRequest {
        TransactionRequest::Read {
            first_register,
            count,
            node: 1,
        }
    }

    #[test]
    fn read_holding_registers_adu() {
        // ---
        let pdu = encode_pdu(&read(40001, 4)).unwrap();
        let mut out = Vec::new();
        write_adu(&mut out, 0x0102, 3, &pdu).unwrap();

        assert_eq!(
            out,
            vec![0x01, 0x02, 0x00, 0x00, 0x00, 0x06, 0x03, 0x03, 0x00, 0x00, 0x00, 0x04]
        );
    }

    // ---

    #[test]
    fn write_encodings_per_family() {
        // ---
        let single_coil = TransactionRequest::Write {
            first_register: 5,
            values: vec![1],
            node: 0,
        };
        assert_eq!(encode_pdu(&single_coil).unwrap(), vec![0x05, 0x00, 0x04, 0xFF, 0x00]);

        let coils = TransactionRequest::Write {
            first_register: 1,
            values: vec![1, 0, 1, 1, 0, 0, 0, 0, 1],
            node: 0,
        };
        assert_eq!(
            encode_pdu(&coils).unwrap(),
            vec![0x0F, 0x00, 0x00, 0x00, 0x09, 0x02, 0b0000_1101, 0b0000_0001]
        );

        let words = TransactionRequest::Write {
            first_register: 40010,
            values: vec![0x1234, 7],
            node: 0,
        };
        assert_eq!(
            encode_pdu(&words).unwrap(),
            vec![0x10, 0x00, 0x09, 0x00, 0x02, 0x04, 0x12, 0x34, 0x00, 0x07]
        );
    }

    // ---

    #[test]
    fn write_caps_fit_one_frame() {
        // ---
        use regpoll_domain::{MAX_BIT_WRITE, MAX_WORD_WRITE};

        for (first_register, len) in [(40001, MAX_WORD_WRITE), (1, MAX_BIT_WRITE)] {
            let write = TransactionRequest::Write {
                first_register,
                values: vec![1; len],
                node: 0,
            };
            assert_eq!(write.validate(), Ok(()));
            assert!(encode_pdu(&write).unwrap().len() <= MAX_PDU_LEN);

            let over = TransactionRequest::Write {
                first_register,
                values: vec![1; len + 1],
                node: 0,
            };
            assert_eq!(over.validate(), Err(ErrorCode::ILLEGAL_DATA_VALUE));
        }
    }

    // ---

    #[test]
    fn decodes_words_and_bits() {
        // ---
        let words = [0x03, 0x04, 0x00, 0x0A, 0x00, 0x14];
        assert_eq!(decode_response(&read(40001, 2), &words).unwrap(), vec![10, 20]);

        let bits = [0x02, 0x02, 0b1000_0101, 0b0000_0001];
        assert_eq!(
            decode_response(&read(10001, 9), &bits).unwrap(),
            vec![1, 0, 1, 0, 0, 0, 0, 1, 1]
        );
    }

    // ---

    #[test]
    fn exception_response_carries_code() {
        // ---
        let err = decode_response(&read(40001, 1), &[0x83, 0x02]).unwrap_err();
        assert!(matches!(err, TransportError::Exception(2)));
        assert_eq!(err.code(), ErrorCode::ILLEGAL_DATA_ADDRESS);
    }

    // ---

    #[test]
    fn function_echo_is_checked() {
        // ---
        let err = decode_response(&read(40001, 1), &[0x04, 0x02, 0x00, 0x01]).unwrap_err();
        assert!(matches!(
            err,
            TransportError::FunctionMismatch {
                expected: 0x03,
                got: 0x04
            }
        ));
    }

    // ---

    #[test]
    fn short_word_payload_is_malformed() {
        // ---
        let err = decode_response(&read(40001, 2), &[0x03, 0x02, 0x00, 0x01]).unwrap_err();
        assert_eq!(err.code(), ErrorCode::INVALID_RESPONSE);
    }

    // ---

    #[test]
    fn read_adu_uses_length_field() {
        // ---
        let mut wire = Vec::new();
        write_adu(&mut wire, 7, 1, &[0x41, 0xAA, 0xBB]).unwrap();
        write_adu(&mut wire, 8, 1, &[0x11]).unwrap();

        let mut cursor = Cursor::new(wire);
        assert_eq!(read_adu(&mut cursor, 7).unwrap(), vec![0x41, 0xAA, 0xBB]);
        assert_eq!(read_adu(&mut cursor, 8).unwrap(), vec![0x11]);
    }

    // ---

    #[test]
    fn read_adu_rejects_foreign_transaction() {
        // ---
        let mut wire = Vec::new();
        write_adu(&mut wire, 11, 1, &[0x03, 0x00]).unwrap();

        let err = read_adu(&mut Cursor::new(wire), 10).unwrap_err();
        assert!(matches!(
            err,
            TransportError::TransactionId {
                expected: 10,
                got: 11
            }
        ));
    }

    // ---

    #[test]
    fn read_adu_skips_late_replies() {
        // ---
        let mut wire = Vec::new();
        write_adu(&mut wire, 8, 1, &[0x03, 0x02, 0x00, 0x01]).unwrap();
        write_adu(&mut wire, 9, 1, &[0x03, 0x02, 0x00, 0x02]).unwrap();
        write_adu(&mut wire, 10, 1, &[0x03, 0x02, 0x00, 0x03]).unwrap();

        let pdu = read_adu(&mut Cursor::new(wire), 10).unwrap();
        assert_eq!(pdu, vec![0x03, 0x02, 0x00, 0x03]);

        // Wrapped ids still count as earlier.
        let mut wire = Vec::new();
        write_adu(&mut wire, u16::MAX, 1, &[0x11]).unwrap();
        write_adu(&mut wire, 1, 1, &[0x11, 0x00]).unwrap();
        assert_eq!(read_adu(&mut Cursor::new(wire), 1).unwrap(), vec![0x11, 0x00]);
    }

    // ---

    #[test]
    fn raw_response_bytes_are_promoted() {
        // ---
        let raw = TransactionRequest::Raw {
            function_code: 0x41,
            pdu: vec![0x01],
            node: 2,
        };
        assert_eq!(encode_pdu(&raw).unwrap(), vec![0x41, 0x01]);
        assert_eq!(
            decode_response(&raw, &[0x41, 0x10, 0xFF]).unwrap(),
            vec![0x10, 0xFF]
        );

        let err = decode_response(&raw, &[0xC1, 0x01]).unwrap_err();
        assert!(matches!(err, TransportError::Exception(1)));
    }
}
