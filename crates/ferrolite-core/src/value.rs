//! Typed attribute values and items, in DynamoDB's JSON shape.
//!
//! `{"S": "text"}`, `{"N": "12.5"}`, `{"B": "<base64>"}`, the set types
//! `SS`/`NS`/`BS`, `L` lists, `M` maps, `BOOL` and `NULL`. Numbers keep their
//! decimal text and are compared as exact decimals.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::str::FromStr;

use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};

use crate::encoding::number::DecimalParts;
use crate::error::ValidationError;

/// Most significant digits a number may carry.
pub const MAX_NUMBER_DIGITS: usize = 38;

// Magnitudes lie in [1e-130, 1e126). With value = 0.d1d2... x 10^e that is
// -129 <= e <= 126.
const MIN_NUMBER_EXPONENT: i64 = -129;
const MAX_NUMBER_EXPONENT: i64 = 126;

/// An item: attribute name to typed value.
pub type Item = BTreeMap<String, AttributeValue>;

/// A single typed attribute value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AttributeValue {
    #[serde(rename = "S")]
    String(String),
    #[serde(rename = "N")]
    Number(String),
    #[serde(rename = "B", with = "base64_bytes")]
    Binary(Vec<u8>),
    #[serde(rename = "SS")]
    StringSet(Vec<String>),
    #[serde(rename = "NS")]
    NumberSet(Vec<String>),
    #[serde(rename = "BS", with = "base64_bytes_set")]
    BinarySet(Vec<Vec<u8>>),
    #[serde(rename = "L")]
    List(Vec<AttributeValue>),
    #[serde(rename = "M")]
    Map(BTreeMap<String, AttributeValue>),
    #[serde(rename = "BOOL")]
    Bool(bool),
    #[serde(rename = "NULL")]
    Null(bool),
}

impl AttributeValue {
    pub fn s(value: impl Into<String>) -> Self {
        AttributeValue::String(value.into())
    }

    pub fn n(value: impl ToString) -> Self {
        AttributeValue::Number(value.to_string())
    }

    pub fn b(value: impl Into<Vec<u8>>) -> Self {
        AttributeValue::Binary(value.into())
    }

    /// DynamoDB type descriptor (`"S"`, `"N"`, `"SS"`, ...).
    pub fn type_name(&self) -> &'static str {
        match self {
            AttributeValue::String(_) => "S",
            AttributeValue::Number(_) => "N",
            AttributeValue::Binary(_) => "B",
            AttributeValue::StringSet(_) => "SS",
            AttributeValue::NumberSet(_) => "NS",
            AttributeValue::BinarySet(_) => "BS",
            AttributeValue::List(_) => "L",
            AttributeValue::Map(_) => "M",
            AttributeValue::Bool(_) => "BOOL",
            AttributeValue::Null(_) => "NULL",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttributeValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Numeric value of an `N` attribute, if it parses.
    pub fn as_number(&self) -> Option<BigDecimal> {
        match self {
            AttributeValue::Number(n) => parse_number(n).ok(),
            _ => None,
        }
    }

    pub fn is_set(&self) -> bool {
        matches!(
            self,
            AttributeValue::StringSet(_) | AttributeValue::NumberSet(_) | AttributeValue::BinarySet(_)
        )
    }

    /// Approximate stored size in bytes, following DynamoDB's accounting.
    pub fn size(&self) -> usize {
        match self {
            AttributeValue::String(s) => s.len(),
            AttributeValue::Number(n) => number_size(n),
            AttributeValue::Binary(b) => b.len(),
            AttributeValue::StringSet(ss) => ss.iter().map(String::len).sum(),
            AttributeValue::NumberSet(ns) => ns.iter().map(|n| number_size(n)).sum(),
            AttributeValue::BinarySet(bs) => bs.iter().map(Vec::len).sum(),
            AttributeValue::List(l) => 3 + l.iter().map(|v| 1 + v.size()).sum::<usize>(),
            AttributeValue::Map(m) => {
                3 + m.iter().map(|(k, v)| 1 + k.len() + v.size()).sum::<usize>()
            }
            AttributeValue::Bool(_) | AttributeValue::Null(_) => 1,
        }
    }

    /// Check number syntax and set rules recursively.
    pub fn validate(&self, path: &str) -> Result<(), ValidationError> {
        match self {
            AttributeValue::Number(n) => {
                parse_number(n)?;
            }
            AttributeValue::StringSet(ss) => {
                if ss.is_empty() || has_duplicates(ss.iter().map(String::as_bytes)) {
                    return Err(ValidationError::InvalidSet(path.to_string()));
                }
            }
            AttributeValue::NumberSet(ns) => {
                if ns.is_empty() {
                    return Err(ValidationError::InvalidSet(path.to_string()));
                }
                let mut parsed = Vec::with_capacity(ns.len());
                for n in ns {
                    parsed.push(parse_number(n)?);
                }
                parsed.sort();
                if parsed.windows(2).any(|w| w[0] == w[1]) {
                    return Err(ValidationError::InvalidSet(path.to_string()));
                }
            }
            AttributeValue::BinarySet(bs) => {
                if bs.is_empty() || has_duplicates(bs.iter().map(Vec::as_slice)) {
                    return Err(ValidationError::InvalidSet(path.to_string()));
                }
            }
            AttributeValue::List(l) => {
                for (i, v) in l.iter().enumerate() {
                    v.validate(&format!("{path}[{i}]"))?;
                }
            }
            AttributeValue::Map(m) => {
                for (k, v) in m {
                    v.validate(&format!("{path}.{k}"))?;
                }
            }
            AttributeValue::Null(false) => {
                return Err(ValidationError::InvalidParameter(format!(
                    "NULL attribute '{path}' must be true"
                )));
            }
            _ => {}
        }
        Ok(())
    }
}

/// Order two scalar values of the same type.
///
/// Numbers compare numerically, strings and binaries bytewise. Mismatched or
/// non-scalar types are not comparable.
pub fn compare_values(left: &AttributeValue, right: &AttributeValue) -> Option<Ordering> {
    match (left, right) {
        (AttributeValue::Number(_), AttributeValue::Number(_)) => {
            Some(left.as_number()?.cmp(&right.as_number()?))
        }
        (AttributeValue::String(a), AttributeValue::String(b)) => Some(a.as_bytes().cmp(b.as_bytes())),
        (AttributeValue::Binary(a), AttributeValue::Binary(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

/// Semantic equality: numbers by value, sets regardless of order.
pub fn values_equal(left: &AttributeValue, right: &AttributeValue) -> bool {
    match (left, right) {
        (AttributeValue::Number(_), AttributeValue::Number(_)) => {
            compare_values(left, right) == Some(Ordering::Equal)
        }
        (AttributeValue::StringSet(a), AttributeValue::StringSet(b)) => {
            a.len() == b.len() && a.iter().all(|x| b.contains(x))
        }
        (AttributeValue::NumberSet(a), AttributeValue::NumberSet(b)) => {
            a.len() == b.len() && a.iter().all(|x| number_set_contains(b, x))
        }
        (AttributeValue::BinarySet(a), AttributeValue::BinarySet(b)) => {
            a.len() == b.len() && a.iter().all(|x| b.contains(x))
        }
        (AttributeValue::List(a), AttributeValue::List(b)) => {
            a.len() == b.len() && a.iter().zip(b).all(|(x, y)| values_equal(x, y))
        }
        (AttributeValue::Map(a), AttributeValue::Map(b)) => {
            a.len() == b.len()
                && a.iter()
                    .all(|(k, v)| b.get(k).is_some_and(|other| values_equal(v, other)))
        }
        _ => left == right,
    }
}

/// Whether a number set contains `needle`, compared numerically.
pub fn number_set_contains(set: &[String], needle: &str) -> bool {
    let Ok(target) = parse_number(needle) else {
        return false;
    };
    set.iter()
        .any(|n| parse_number(n).is_ok_and(|v| v == target))
}

/// Parse DynamoDB number text.
///
/// Accepts finite decimal numbers with at most 38 significant digits and a
/// magnitude of zero or between `1e-130` and `1e126`.
pub fn parse_number(text: &str) -> Result<BigDecimal, ValidationError> {
    let invalid = || ValidationError::InvalidNumber(text.to_string());
    let trimmed = text.trim();
    let well_formed = !trimmed.is_empty()
        && trimmed.bytes().any(|b| b.is_ascii_digit())
        && trimmed
            .bytes()
            .all(|b| b.is_ascii_digit() || matches!(b, b'+' | b'-' | b'.' | b'e' | b'E'));
    if !well_formed {
        return Err(invalid());
    }
    let value = BigDecimal::from_str(trimmed).map_err(|_| invalid())?;
    check_number_range(&value).map_err(|_| invalid())?;
    Ok(value)
}

/// Reject numbers DynamoDB cannot store.
pub fn check_number_range(value: &BigDecimal) -> Result<(), ValidationError> {
    let parts = DecimalParts::of(value);
    if parts.is_zero() {
        return Ok(());
    }
    if parts.digits.len() > MAX_NUMBER_DIGITS {
        return Err(ValidationError::InvalidNumber(format!(
            "{}: more than {MAX_NUMBER_DIGITS} significant digits",
            parts.to_plain_string()
        )));
    }
    if !(MIN_NUMBER_EXPONENT..=MAX_NUMBER_EXPONENT).contains(&parts.exponent) {
        return Err(ValidationError::InvalidNumber(format!(
            "{}: magnitude out of range",
            parts.to_plain_string()
        )));
    }
    Ok(())
}

/// Render a number as DynamoDB number text: plain notation, no trailing zeros.
pub fn format_number(value: &BigDecimal) -> String {
    DecimalParts::of(value).to_plain_string()
}

/// Exact sum of two number texts, checked against the storable range.
pub fn add_numbers(left: &str, right: &str) -> Result<String, ValidationError> {
    let sum = parse_number(left)? + parse_number(right)?;
    check_number_range(&sum)?;
    Ok(format_number(&sum))
}

/// Size of an item: attribute names plus attribute values.
pub fn item_size(item: &Item) -> usize {
    item.iter().map(|(k, v)| k.len() + v.size()).sum()
}

/// Resolve a dot-separated path through nested maps.
pub fn resolve_path<'a>(item: &'a Item, path: &str) -> Option<&'a AttributeValue> {
    let mut segments = path.split('.');
    let mut current = item.get(segments.next()?)?;
    for segment in segments {
        match current {
            AttributeValue::Map(m) => current = m.get(segment)?,
            _ => return None,
        }
    }
    Some(current)
}

fn number_size(text: &str) -> usize {
    let digits = text.chars().filter(char::is_ascii_digit).count();
    digits.div_ceil(2) + 1
}

fn has_duplicates<'a>(values: impl Iterator<Item = &'a [u8]>) -> bool {
    let mut sorted: Vec<&[u8]> = values.collect();
    sorted.sort_unstable();
    sorted.windows(2).any(|w| w[0] == w[1])
}

mod base64_bytes {
    use base64::Engine as _;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        STANDARD.decode(text).map_err(serde::de::Error::custom)
    }
}

mod base64_bytes_set {
    use base64::Engine as _;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(set: &[Vec<u8>], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(set.iter().map(|b| STANDARD.encode(b)))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Vec<Vec<u8>>, D::Error> {
        let texts = Vec::<String>::deserialize(deserializer)?;
        texts
            .into_iter()
            .map(|t| STANDARD.decode(t).map_err(serde::de::Error::custom))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_wire_shape() {
        let item: Item = serde_json::from_value(json!({
            "id": {"S": "a"},
            "val": {"N": "1"},
            "blob": {"B": "AQID"},
            "tags": {"SS": ["x", "y"]},
            "nested": {"M": {"flag": {"BOOL": true}, "nothing": {"NULL": true}}},
            "list": {"L": [{"N": "2"}, {"S": "z"}]}
        }))
        .unwrap();

        assert_eq!(item["id"], AttributeValue::s("a"));
        assert_eq!(item["blob"], AttributeValue::Binary(vec![1, 2, 3]));
        assert_eq!(
            serde_json::to_value(&item["blob"]).unwrap(),
            json!({"B": "AQID"})
        );
        assert_eq!(item["val"].as_number(), Some(BigDecimal::from(1u8)));
    }

    #[test]
    fn test_number_validation() {
        assert!(parse_number("12.5").is_ok());
        assert!(parse_number("-0.001").is_ok());
        assert!(parse_number("1e10").is_ok());
        assert!(parse_number("abc").is_err());
        assert!(parse_number("NaN").is_err());
        assert!(parse_number("inf").is_err());
        assert!(parse_number(&"1".repeat(39)).is_err());
        assert!(parse_number(&format!("{}000", "1".repeat(38))).is_ok());
        assert!(parse_number("").is_err());
        assert!(parse_number("1e126").is_err());
        assert!(parse_number("9.9e125").is_ok());
        assert!(parse_number("1e-130").is_ok());
        assert!(parse_number("1e-131").is_err());
        assert!(parse_number("0e-999").is_ok());
    }

    #[test]
    fn test_set_validation() {
        assert!(AttributeValue::StringSet(vec![]).validate("s").is_err());
        assert!(
            AttributeValue::StringSet(vec!["a".into(), "a".into()])
                .validate("s")
                .is_err()
        );
        assert!(
            AttributeValue::NumberSet(vec!["1".into(), "1.0".into()])
                .validate("s")
                .is_err()
        );
        assert!(
            AttributeValue::NumberSet(vec!["1".into(), "2".into()])
                .validate("s")
                .is_ok()
        );
    }

    #[test]
    fn test_compare_and_equal() {
        assert_eq!(
            compare_values(&AttributeValue::n(2), &AttributeValue::n("10")),
            Some(Ordering::Less)
        );
        assert_eq!(
            compare_values(&AttributeValue::s("b"), &AttributeValue::s("a")),
            Some(Ordering::Greater)
        );
        assert_eq!(compare_values(&AttributeValue::s("1"), &AttributeValue::n(1)), None);

        assert!(values_equal(&AttributeValue::n("1"), &AttributeValue::n("1.0")));
        assert!(values_equal(
            &AttributeValue::StringSet(vec!["a".into(), "b".into()]),
            &AttributeValue::StringSet(vec!["b".into(), "a".into()])
        ));
    }

    #[test]
    fn test_resolve_path() {
        let item: Item = serde_json::from_value(json!({
            "a": {"M": {"b": {"M": {"c": {"S": "deep"}}}}},
            "flat": {"N": "3"}
        }))
        .unwrap();
        assert_eq!(resolve_path(&item, "a.b.c"), Some(&AttributeValue::s("deep")));
        assert_eq!(resolve_path(&item, "flat"), Some(&AttributeValue::n(3)));
        assert_eq!(resolve_path(&item, "flat.x"), None);
        assert_eq!(resolve_path(&item, "missing"), None);
    }

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(&parse_number("3.0").unwrap()), "3");
        assert_eq!(format_number(&parse_number("-2.50").unwrap()), "-2.5");
        assert_eq!(format_number(&parse_number("1.5e3").unwrap()), "1500");
    }

    #[test]
    fn test_add_numbers_is_exact() {
        assert_eq!(add_numbers("0.1", "0.2").unwrap(), "0.3");
        assert_eq!(
            add_numbers("9007199254740993", "1").unwrap(),
            "9007199254740994"
        );
        assert_eq!(
            add_numbers("12345678901234567890123456789012345678", "-1").unwrap(),
            "12345678901234567890123456789012345677"
        );
        assert!(add_numbers("9.9e125", "9.9e125").is_err());
    }

    #[test]
    fn test_large_numbers_compare_exactly() {
        assert_eq!(
            compare_values(
                &AttributeValue::n("9007199254740992"),
                &AttributeValue::n("9007199254740993")
            ),
            Some(Ordering::Less)
        );
        assert!(!values_equal(
            &AttributeValue::n("9007199254740992"),
            &AttributeValue::n("9007199254740993")
        ));
    }

    #[test]
    fn test_item_size() {
        let mut item = Item::new();
        item.insert("id".into(), AttributeValue::s("abc"));
        assert_eq!(item_size(&item), 5);
    }
}
