//! Key extraction and item validation against a key schema.

use crate::encoding::KeyValue;
use crate::encoding::composite::{encode_component, encode_key};
use crate::error::{Error, ValidationError};
use crate::types::{KeyDefinition, KeySchema, KeyType, MAX_ITEM_SIZE, MAX_PARTITION_KEY_SIZE, MAX_SORT_KEY_SIZE};
use crate::value::{AttributeValue, Item, item_size, parse_number};

/// Convert a key attribute into a [`KeyValue`], checking its declared type.
pub fn attribute_to_key_value(
    value: &AttributeValue,
    def: &KeyDefinition,
) -> Result<KeyValue, ValidationError> {
    let mismatch = || ValidationError::KeyTypeMismatch {
        name: def.name.clone(),
        expected: def.key_type,
        actual: value.type_name(),
    };
    let kv = match (def.key_type, value) {
        (KeyType::String, AttributeValue::String(s)) => KeyValue::String(s.clone()),
        (KeyType::Number, AttributeValue::Number(n)) => KeyValue::Number(parse_number(n)?),
        (KeyType::Binary, AttributeValue::Binary(b)) => KeyValue::Binary(b.clone()),
        _ => return Err(mismatch()),
    };
    if matches!(&kv, KeyValue::String(s) if s.is_empty())
        || matches!(&kv, KeyValue::Binary(b) if b.is_empty())
    {
        return Err(ValidationError::EmptyKeyValue(def.name.clone()));
    }
    Ok(kv)
}

fn key_component(
    item: &Item,
    def: &KeyDefinition,
    max_size: usize,
) -> Result<KeyValue, ValidationError> {
    let value = item
        .get(&def.name)
        .ok_or_else(|| ValidationError::MissingKeyAttribute(def.name.clone()))?;
    let kv = attribute_to_key_value(value, def)?;
    let size = kv.byte_size();
    if size > max_size {
        return Err(ValidationError::KeyTooLarge {
            name: def.name.clone(),
            max: max_size,
            actual: size,
        });
    }
    Ok(kv)
}

/// The decoded key values of an item under `schema`.
pub fn extract_key_values(
    item: &Item,
    schema: &KeySchema,
) -> Result<(KeyValue, Option<KeyValue>), ValidationError> {
    let pk = key_component(item, &schema.partition_key, MAX_PARTITION_KEY_SIZE)?;
    let sk = match &schema.sort_key {
        Some(def) => Some(key_component(item, def, MAX_SORT_KEY_SIZE)?),
        None => None,
    };
    Ok((pk, sk))
}

/// Encoded primary key of an item (or of a key-only map).
pub fn encode_primary_key(item: &Item, schema: &KeySchema) -> Result<Vec<u8>, Error> {
    let (pk, sk) = extract_key_values(item, schema)?;
    Ok(encode_key(&pk, sk.as_ref())?)
}

/// Validate a key map passed to get/delete/update: exactly the schema's key
/// attributes, correctly typed. Returns the encoded key.
pub fn validate_key_map(key: &Item, schema: &KeySchema) -> Result<Vec<u8>, Error> {
    if let Some(extra) = key.keys().find(|name| !schema.is_key_attribute(name)) {
        return Err(ValidationError::UnexpectedKeyAttribute(extra.clone()).into());
    }
    encode_primary_key(key, schema)
}

/// Validate a full item for writing and return its encoded primary key.
///
/// Index key attributes that are present must carry the index's declared type.
pub fn validate_item(
    item: &Item,
    schema: &KeySchema,
    index_schemas: &[KeySchema],
) -> Result<Vec<u8>, Error> {
    for (name, value) in item {
        value.validate(name)?;
    }
    let size = item_size(item);
    if size > MAX_ITEM_SIZE {
        return Err(ValidationError::ItemTooLarge {
            max: MAX_ITEM_SIZE,
            actual: size,
        }
        .into());
    }
    let key = encode_primary_key(item, schema)?;
    for index in index_schemas {
        for def in std::iter::once(&index.partition_key).chain(index.sort_key.as_ref()) {
            if let Some(value) = item.get(&def.name) {
                attribute_to_key_value(value, def)?;
            }
        }
    }
    Ok(key)
}

/// Copy the key attributes named by `schema` out of `item`.
pub fn key_attributes(item: &Item, schema: &KeySchema) -> Item {
    schema
        .key_names()
        .into_iter()
        .filter_map(|name| item.get(name).map(|v| (name.to_string(), v.clone())))
        .collect()
}

/// Build the index entry key for `item`: index key components followed by the
/// encoded primary key.
///
/// `Ok(None)` when the item lacks an index key attribute (sparse index).
pub fn build_index_key(
    index_schema: &KeySchema,
    item: &Item,
    primary_key: &[u8],
) -> Result<Option<Vec<u8>>, Error> {
    let has_all = index_schema
        .key_names()
        .iter()
        .all(|name| item.contains_key(*name));
    if !has_all {
        return Ok(None);
    }
    let (pk, sk) = extract_key_values(item, index_schema)?;
    let mut out = Vec::with_capacity(primary_key.len() + 32);
    encode_component(&pk, &mut out)?;
    if let Some(sk) = sk {
        encode_component(&sk, &mut out)?;
    }
    out.extend_from_slice(primary_key);
    Ok(Some(out))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> KeySchema {
        KeySchema {
            partition_key: KeyDefinition::new("pk", KeyType::String),
            sort_key: Some(KeyDefinition::new("sk", KeyType::Number)),
        }
    }

    fn item(pairs: &[(&str, AttributeValue)]) -> Item {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn test_encode_primary_key() {
        let it = item(&[("pk", AttributeValue::s("a")), ("sk", AttributeValue::n(5))]);
        let key = encode_primary_key(&it, &schema()).unwrap();
        let expected = encode_key(&KeyValue::String("a".into()), Some(&KeyValue::Number(5.into()))).unwrap();
        assert_eq!(key, expected);
    }

    #[test]
    fn test_missing_and_mistyped_keys() {
        let it = item(&[("pk", AttributeValue::s("a"))]);
        assert!(matches!(
            encode_primary_key(&it, &schema()),
            Err(Error::Validation(ValidationError::MissingKeyAttribute(name))) if name == "sk"
        ));

        let it = item(&[("pk", AttributeValue::n(1)), ("sk", AttributeValue::n(1))]);
        assert!(matches!(
            encode_primary_key(&it, &schema()),
            Err(Error::Validation(ValidationError::KeyTypeMismatch { actual: "N", .. }))
        ));
    }

    #[test]
    fn test_empty_string_key_rejected() {
        let it = item(&[("pk", AttributeValue::s("")), ("sk", AttributeValue::n(1))]);
        assert!(matches!(
            encode_primary_key(&it, &schema()),
            Err(Error::Validation(ValidationError::EmptyKeyValue(_)))
        ));
    }

    #[test]
    fn test_key_size_limits() {
        let big = "x".repeat(MAX_PARTITION_KEY_SIZE + 1);
        let it = item(&[("pk", AttributeValue::s(big)), ("sk", AttributeValue::n(1))]);
        assert!(matches!(
            encode_primary_key(&it, &schema()),
            Err(Error::Validation(ValidationError::KeyTooLarge { .. }))
        ));
    }

    #[test]
    fn test_key_map_rejects_extra_attributes() {
        let key = item(&[
            ("pk", AttributeValue::s("a")),
            ("sk", AttributeValue::n(1)),
            ("other", AttributeValue::s("x")),
        ]);
        assert!(matches!(
            validate_key_map(&key, &schema()),
            Err(Error::Validation(ValidationError::UnexpectedKeyAttribute(name))) if name == "other"
        ));
    }

    #[test]
    fn test_validate_item_checks_index_types() {
        let idx = KeySchema {
            partition_key: KeyDefinition::new("email", KeyType::String),
            sort_key: None,
        };
        let ok = item(&[("pk", AttributeValue::s("a")), ("sk", AttributeValue::n(1))]);
        assert!(validate_item(&ok, &schema(), std::slice::from_ref(&idx)).is_ok());

        let bad = item(&[
            ("pk", AttributeValue::s("a")),
            ("sk", AttributeValue::n(1)),
            ("email", AttributeValue::n(3)),
        ]);
        assert!(validate_item(&bad, &schema(), &[idx]).is_err());
    }

    #[test]
    fn test_index_key_is_sparse_and_groups_by_index_value() {
        let idx = KeySchema {
            partition_key: KeyDefinition::new("email", KeyType::String),
            sort_key: None,
        };
        let without = item(&[("pk", AttributeValue::s("a")), ("sk", AttributeValue::n(1))]);
        let pk_bytes = encode_primary_key(&without, &schema()).unwrap();
        assert_eq!(build_index_key(&idx, &without, &pk_bytes).unwrap(), None);

        let mut with = without.clone();
        with.insert("email".into(), AttributeValue::s("a@x"));
        let entry = build_index_key(&idx, &with, &pk_bytes).unwrap().unwrap();
        assert!(entry.ends_with(&pk_bytes));
        let prefix = crate::encoding::composite::encode_prefix(&KeyValue::String("a@x".into())).unwrap();
        assert!(entry.starts_with(&prefix));
    }
}
