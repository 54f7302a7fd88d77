//! Multi-component keys: a sequence of type-tagged, self-delimiting components.
//!
//! Table keys are `[partition, sort?]`. Index entry keys are
//! `[index partition, index sort?, table partition, table sort?]`, so entries
//! group by index key and stay unique per base item.

use crate::error::EncodingError;

use super::KeyValue;
use super::bytes::{decode_escaped, encode_escaped, encode_escaped_body};
use super::number::{decode_number, encode_number};

pub const TAG_STRING: u8 = 0x01;
pub const TAG_NUMBER: u8 = 0x02;
pub const TAG_BINARY: u8 = 0x03;

/// Append one tagged component.
pub fn encode_component(value: &KeyValue, out: &mut Vec<u8>) -> Result<(), EncodingError> {
    match value {
        KeyValue::String(s) => {
            out.push(TAG_STRING);
            encode_escaped(s.as_bytes(), out);
        }
        KeyValue::Number(n) => {
            out.push(TAG_NUMBER);
            out.extend_from_slice(&encode_number(n)?);
        }
        KeyValue::Binary(b) => {
            out.push(TAG_BINARY);
            encode_escaped(b, out);
        }
    }
    Ok(())
}

/// Encode a partition key and optional sort key.
pub fn encode_key(pk: &KeyValue, sk: Option<&KeyValue>) -> Result<Vec<u8>, EncodingError> {
    let mut out = Vec::with_capacity(32);
    encode_component(pk, &mut out)?;
    if let Some(sk) = sk {
        encode_component(sk, &mut out)?;
    }
    Ok(out)
}

/// Decode one component from the front of `data`, returning it and its encoded length.
pub fn decode_component(data: &[u8]) -> Result<(KeyValue, usize), EncodingError> {
    let (&tag, rest) = data.split_first().ok_or(EncodingError::MalformedKey)?;
    match tag {
        TAG_STRING => {
            let (bytes, used) = decode_escaped(rest)?;
            let s = String::from_utf8(bytes).map_err(|_| EncodingError::MalformedKey)?;
            Ok((KeyValue::String(s), used + 1))
        }
        TAG_NUMBER => {
            let (value, used) = decode_number(rest)?;
            Ok((KeyValue::Number(value), used + 1))
        }
        TAG_BINARY => {
            let (bytes, used) = decode_escaped(rest)?;
            Ok((KeyValue::Binary(bytes), used + 1))
        }
        other => Err(EncodingError::InvalidTypeTag(other)),
    }
}

/// Decode exactly `count` leading components, returning them and the bytes consumed.
pub fn decode_components(
    data: &[u8],
    count: usize,
) -> Result<(Vec<KeyValue>, usize), EncodingError> {
    let mut values = Vec::with_capacity(count);
    let mut offset = 0;
    for _ in 0..count {
        let (value, used) = decode_component(&data[offset..])?;
        values.push(value);
        offset += used;
    }
    Ok((values, offset))
}

/// Encoded prefix shared by every key whose leading component is `value`.
pub fn encode_prefix(value: &KeyValue) -> Result<Vec<u8>, EncodingError> {
    let mut out = Vec::with_capacity(16);
    encode_component(value, &mut out)?;
    Ok(out)
}

/// Prefix shared by every string or binary component that begins with `prefix`.
///
/// Unlike [`encode_component`] the terminator is omitted. Numbers have no
/// meaningful prefix and fall back to the full component.
pub fn encode_begins_with(prefix: &KeyValue) -> Result<Vec<u8>, EncodingError> {
    let mut out = Vec::with_capacity(16);
    match prefix {
        KeyValue::String(s) => {
            out.push(TAG_STRING);
            encode_escaped_body(s.as_bytes(), &mut out);
        }
        KeyValue::Binary(b) => {
            out.push(TAG_BINARY);
            encode_escaped_body(b, &mut out);
        }
        KeyValue::Number(_) => encode_component(prefix, &mut out)?,
    }
    Ok(out)
}

/// Smallest byte string greater than every string that starts with `prefix`.
///
/// Returns `None` when `prefix` is all `0xFF` (no finite upper bound).
pub fn prefix_successor(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut end = prefix.to_vec();
    while let Some(last) = end.pop() {
        if last < 0xFF {
            end.push(last + 1);
            return Some(end);
        }
    }
    None
}
