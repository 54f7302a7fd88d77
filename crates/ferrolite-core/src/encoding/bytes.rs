//! Escaped-terminator encoding shared by string and binary key components.
//!
//! Every `0x00` in the input becomes `0x00 0xFF` and the component ends with
//! `0x00 0x00`. The terminator sorts below any escaped or plain byte, so a
//! value always sorts before its own extensions.

use crate::error::EncodingError;

const ESCAPE: u8 = 0xFF;

/// Append the escaped body of `data` without the terminator.
///
/// Used on its own to build `begins_with` range bounds.
pub fn encode_escaped_body(data: &[u8], out: &mut Vec<u8>) {
    for &b in data {
        out.push(b);
        if b == 0x00 {
            out.push(ESCAPE);
        }
    }
}

/// Append the escaped, terminated form of `data`.
pub fn encode_escaped(data: &[u8], out: &mut Vec<u8>) {
    encode_escaped_body(data, out);
    out.extend_from_slice(&[0x00, 0x00]);
}

/// Decode one terminated component, returning the bytes and how much input was consumed.
pub fn decode_escaped(data: &[u8]) -> Result<(Vec<u8>, usize), EncodingError> {
    let mut out = Vec::new();
    let mut i = 0;
    while i < data.len() {
        if data[i] != 0x00 {
            out.push(data[i]);
            i += 1;
            continue;
        }
        match data.get(i + 1) {
            Some(0x00) => return Ok((out, i + 2)),
            Some(&ESCAPE) => {
                out.push(0x00);
                i += 2;
            }
            _ => return Err(EncodingError::MalformedKey),
        }
    }
    Err(EncodingError::MalformedKey)
}
