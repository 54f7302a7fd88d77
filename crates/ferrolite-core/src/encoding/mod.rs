//! Order-preserving byte encodings for key values.
//!
//! Encoded keys compare with plain `memcmp` in the same order DynamoDB sorts
//! the underlying values, so ordered maps keyed by these bytes serve range
//! queries directly.

pub mod bytes;
pub mod composite;
pub mod number;

use bigdecimal::BigDecimal;

use crate::types::KeyType;
use number::DecimalParts;

/// A decoded key component.
#[derive(Debug, Clone, PartialEq)]
pub enum KeyValue {
    String(String),
    Number(BigDecimal),
    Binary(Vec<u8>),
}

impl KeyValue {
    pub fn key_type(&self) -> KeyType {
        match self {
            KeyValue::String(_) => KeyType::String,
            KeyValue::Number(_) => KeyType::Number,
            KeyValue::Binary(_) => KeyType::Binary,
        }
    }

    /// Size counted against the DynamoDB key size limits.
    pub fn byte_size(&self) -> usize {
        match self {
            KeyValue::String(s) => s.len(),
            KeyValue::Number(n) => DecimalParts::of(n).digits.len().div_ceil(2) + 1,
            KeyValue::Binary(b) => b.len(),
        }
    }
}
