//! Order-preserving encoding of exact decimal numbers.
//!
//! A number is written as `±0.d1d2...dn × 10^e` with no leading or trailing
//! zero digits. The encoding is a sign byte, then the exponent, then the
//! digits and a terminator. Negative numbers store the exponent and digits
//! complemented so larger magnitudes sort lower.

use std::str::FromStr;

use bigdecimal::BigDecimal;

use crate::error::EncodingError;

const SIGN_NEGATIVE: u8 = 0x01;
const SIGN_ZERO: u8 = 0x02;
const SIGN_POSITIVE: u8 = 0x03;

const EXPONENT_BIAS: i64 = 0x8000;

const POSITIVE_END: u8 = 0x00;
const NEGATIVE_END: u8 = 0xFF;

/// A decimal split into sign, significant digits and exponent.
///
/// `digits` is empty for zero.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecimalParts {
    pub negative: bool,
    pub digits: String,
    pub exponent: i64,
}

impl DecimalParts {
    pub fn of(value: &BigDecimal) -> Self {
        let (unscaled, scale) = value.as_bigint_and_exponent();
        let text = unscaled.to_string();
        let negative = text.starts_with('-');
        let magnitude = text.trim_start_matches('-');
        let digits = magnitude.trim_end_matches('0');
        if digits.is_empty() {
            return DecimalParts {
                negative: false,
                digits: String::new(),
                exponent: 0,
            };
        }
        let dropped = (magnitude.len() - digits.len()) as i64;
        DecimalParts {
            negative,
            digits: digits.to_string(),
            exponent: digits.len() as i64 - (scale - dropped),
        }
    }

    pub fn is_zero(&self) -> bool {
        self.digits.is_empty()
    }

    /// Plain decimal text, without exponent notation.
    pub fn to_plain_string(&self) -> String {
        if self.is_zero() {
            return "0".to_string();
        }
        let len = self.digits.len() as i64;
        let mut out = String::with_capacity(self.digits.len() + 4);
        if self.negative {
            out.push('-');
        }
        if self.exponent >= len {
            out.push_str(&self.digits);
            out.extend(std::iter::repeat_n('0', (self.exponent - len) as usize));
        } else if self.exponent <= 0 {
            out.push_str("0.");
            out.extend(std::iter::repeat_n('0', (-self.exponent) as usize));
            out.push_str(&self.digits);
        } else {
            let (int, frac) = self.digits.split_at(self.exponent as usize);
            out.push_str(int);
            out.push('.');
            out.push_str(frac);
        }
        out
    }
}

/// Encode a decimal so that `memcmp` order matches numeric order.
///
/// `1`, `1.0` and `10e-1` encode identically.
pub fn encode_number(value: &BigDecimal) -> Result<Vec<u8>, EncodingError> {
    let parts = DecimalParts::of(value);
    if parts.is_zero() {
        return Ok(vec![SIGN_ZERO]);
    }
    let biased = u16::try_from(parts.exponent + EXPONENT_BIAS)
        .map_err(|_| EncodingError::NumberOutOfRange)?;
    let mut out = Vec::with_capacity(parts.digits.len() + 4);
    if parts.negative {
        out.push(SIGN_NEGATIVE);
        out.extend_from_slice(&(!biased).to_be_bytes());
        out.extend(parts.digits.bytes().map(|d| b'9' - d + b'0'));
        out.push(NEGATIVE_END);
    } else {
        out.push(SIGN_POSITIVE);
        out.extend_from_slice(&biased.to_be_bytes());
        out.extend_from_slice(parts.digits.as_bytes());
        out.push(POSITIVE_END);
    }
    Ok(out)
}

/// Decode one number from the front of `data`, returning it and its encoded length.
pub fn decode_number(data: &[u8]) -> Result<(BigDecimal, usize), EncodingError> {
    let (&sign, rest) = data.split_first().ok_or(EncodingError::MalformedKey)?;
    let negative = match sign {
        SIGN_ZERO => return Ok((BigDecimal::from(0u8), 1)),
        SIGN_NEGATIVE => true,
        SIGN_POSITIVE => false,
        _ => return Err(EncodingError::MalformedKey),
    };
    let raw: [u8; 2] = rest
        .get(..2)
        .and_then(|s| s.try_into().ok())
        .ok_or(EncodingError::MalformedKey)?;
    let biased = u16::from_be_bytes(raw);
    let biased = if negative { !biased } else { biased };
    let exponent = i64::from(biased) - EXPONENT_BIAS;

    let end = if negative { NEGATIVE_END } else { POSITIVE_END };
    let body = &rest[2..];
    let len = body
        .iter()
        .position(|&b| b == end)
        .ok_or(EncodingError::MalformedKey)?;
    let mut text = String::with_capacity(len + 8);
    if negative {
        text.push('-');
    }
    text.push_str("0.");
    for &b in &body[..len] {
        let digit = if negative { b'9' - b + b'0' } else { b };
        if !digit.is_ascii_digit() {
            return Err(EncodingError::MalformedKey);
        }
        text.push(char::from(digit));
    }
    text.push_str(&format!("E{exponent}"));
    let value = BigDecimal::from_str(&text).map_err(|_| EncodingError::MalformedKey)?;
    Ok((value, 1 + 2 + len + 1))
}
