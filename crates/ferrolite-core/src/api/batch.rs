//! BatchGetItem and BatchWriteItem.
//!
//! A batch is a set of independent single-item operations. Whole-batch
//! errors are limited to malformed requests and missing tables; everything
//! that fails per entry is handed back as unprocessed for the caller to retry.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tracing::debug;

use crate::api::key_utils::{encode_primary_key, validate_item, validate_key_map};
use crate::api::projection::apply_projection;
use crate::catalog::TableHandle;
use crate::error::{Error, ResourceError, ValidationError};
use crate::throughput::ConsumedCapacity;

use super::dispatcher::{Phase, Trace};
use super::engine::EngineInner;
use super::items::{Mutation, capacity, read_key, write_key};
use super::request::{
    BatchGetItemInput, BatchGetItemOutput, BatchWriteItemInput, BatchWriteItemOutput,
    KeysAndAttributes, ReturnConsumedCapacity, WriteRequest,
};

fn lookup<'a>(
    inner: &EngineInner,
    tables: impl Iterator<Item = &'a String>,
) -> Result<BTreeMap<String, Arc<TableHandle>>, Error> {
    tables
        .map(|name| Ok((name.clone(), inner.catalog.get(name)?)))
        .collect()
}

fn totals(
    requested: ReturnConsumedCapacity,
    units: BTreeMap<String, f64>,
) -> Vec<ConsumedCapacity> {
    units
        .into_iter()
        .filter_map(|(table, units)| capacity(requested, &table, units))
        .collect()
}

fn write_one(inner: &EngineInner, handle: &TableHandle, request: &WriteRequest) -> Result<f64, Error> {
    let status = handle.status();
    if !status.serves_items() {
        return Err(ResourceError::TableInUse {
            table: handle.name().to_string(),
            status,
        }
        .into());
    }
    let applied = match request {
        WriteRequest::Put { item } => {
            let key = validate_item(item, &handle.key_schema(), &handle.index_schemas())?;
            write_key(inner, handle, key, true, |_| Ok(Mutation::Put(item.clone())))?
        }
        WriteRequest::Delete { key } => {
            let key = validate_key_map(key, &handle.key_schema())?;
            write_key(inner, handle, key, true, |_| Ok(Mutation::Delete))?
        }
    };
    Ok(applied.units)
}

pub(crate) fn batch_write_item(
    inner: &EngineInner,
    trace: &Trace,
    input: BatchWriteItemInput,
) -> Result<BatchWriteItemOutput, Error> {
    trace.enter(Phase::TableLookup);
    let handles = lookup(inner, input.requests.keys())?;

    for (table, requests) in &input.requests {
        let schema = handles[table].key_schema();
        let mut seen = BTreeSet::new();
        for request in requests {
            let key_source = match request {
                WriteRequest::Put { item } => item,
                WriteRequest::Delete { key } => key,
            };
            // Malformed keys fail on their own entry below.
            if let Ok(key) = encode_primary_key(key_source, &schema)
                && !seen.insert(key)
            {
                return Err(ValidationError::DuplicateBatchKey.into());
            }
        }
    }

    trace.enter(Phase::Executing);
    let mut output = BatchWriteItemOutput::default();
    let mut units = BTreeMap::new();
    for (table, requests) in input.requests {
        let handle = &handles[&table];
        for (position, request) in requests.into_iter().enumerate() {
            match write_one(inner, handle, &request) {
                Ok(cost) => *units.entry(table.clone()).or_insert(0.0) += cost,
                Err(e) => {
                    debug!(table = %table, position, error = %e, "batch write entry unprocessed");
                    output
                        .unprocessed_items
                        .entry(table.clone())
                        .or_default()
                        .push(request);
                }
            }
        }
    }
    output.consumed_capacity = totals(input.return_consumed_capacity, units);
    Ok(output)
}

pub(crate) fn batch_get_item(
    inner: &EngineInner,
    trace: &Trace,
    input: BatchGetItemInput,
) -> Result<BatchGetItemOutput, Error> {
    trace.enter(Phase::TableLookup);
    let handles = lookup(inner, input.requests.keys())?;

    let mut encoded: BTreeMap<&str, Vec<Vec<u8>>> = BTreeMap::new();
    for (table, request) in &input.requests {
        let schema = handles[table].key_schema();
        let mut keys = Vec::with_capacity(request.keys.len());
        let mut seen = BTreeSet::new();
        for key in &request.keys {
            let key = validate_key_map(key, &schema)?;
            if !seen.insert(key.clone()) {
                return Err(ValidationError::DuplicateBatchKey.into());
            }
            keys.push(key);
        }
        encoded.insert(table, keys);
    }

    trace.enter(Phase::Executing);
    let mut output = BatchGetItemOutput::default();
    let mut units = BTreeMap::new();
    for (table, request) in &input.requests {
        let handle = &handles[table];
        let mut found = Vec::new();
        let keys = encoded.get(table.as_str()).map(Vec::as_slice).unwrap_or_default();
        for (key_item, key) in request.keys.iter().zip(keys) {
            match read_key(inner, handle, key, request.consistent_read) {
                Ok((item, cost)) => {
                    *units.entry(table.clone()).or_insert(0.0) += cost;
                    if let Some(item) = item {
                        found.push(match &request.projection {
                            Some(paths) => apply_projection(&item, paths),
                            None => item,
                        });
                    }
                }
                Err(e) => {
                    debug!(table = %table, error = %e, "batch get key unprocessed");
                    output
                        .unprocessed_keys
                        .entry(table.clone())
                        .or_insert_with(|| KeysAndAttributes {
                            keys: Vec::new(),
                            projection: request.projection.clone(),
                            consistent_read: request.consistent_read,
                        })
                        .keys
                        .push(key_item.clone());
                }
            }
        }
        output.responses.insert(table.clone(), found);
    }
    output.consumed_capacity = totals(input.return_consumed_capacity, units);
    Ok(output)
}

#[cfg(test)]
mod tests {
    use crate::api::Engine;
    use crate::api::request::WriteRequest;
    use crate::config::EngineConfig;
    use crate::error::{Error, ErrorKind, ValidationError};
    use crate::types::KeyType;
    use crate::value::{AttributeValue, Item};

    fn engine() -> Engine {
        let engine = Engine::in_memory().unwrap();
        engine
            .create_table("users")
            .partition_key("id", KeyType::String)
            .execute()
            .unwrap();
        engine
    }

    fn user(id: &str) -> Item {
        Item::from([
            ("id".to_string(), AttributeValue::s(id)),
            ("name".to_string(), AttributeValue::s(format!("user {id}"))),
        ])
    }

    fn key(id: &str) -> Item {
        Item::from([("id".to_string(), AttributeValue::s(id))])
    }

    #[test]
    fn test_batch_write_reports_invalid_entry_unprocessed() {
        let engine = engine();
        let mut batch = engine.batch_write_item();
        for n in 1..=25 {
            if n == 13 {
                // Wrong key type violates the schema.
                batch = batch.put(
                    "users",
                    Item::from([("id".to_string(), AttributeValue::n(13))]),
                );
            } else {
                batch = batch.put("users", user(&format!("u{n:02}")));
            }
        }
        let out = batch.execute().unwrap();

        let unprocessed = &out.unprocessed_items["users"];
        assert_eq!(unprocessed.len(), 1);
        let WriteRequest::Put { item } = &unprocessed[0] else {
            panic!("expected the put to come back");
        };
        assert_eq!(item["id"], AttributeValue::n(13));

        let page = engine.scan("users").execute().unwrap();
        assert_eq!(page.count, 24);
        for n in (1..=25).filter(|n| *n != 13) {
            let got = engine
                .get_item("users")
                .key("id", AttributeValue::s(format!("u{n:02}")))
                .execute()
                .unwrap();
            assert!(got.is_some(), "item {n} should be written");
        }
    }

    #[test]
    fn test_batch_write_limits_and_duplicates() {
        let engine = engine();
        let mut batch = engine.batch_write_item();
        for n in 0..26 {
            batch = batch.put("users", user(&n.to_string()));
        }
        assert_eq!(batch.execute().unwrap_err().kind(), ErrorKind::Validation);

        let err = engine
            .batch_write_item()
            .put("users", user("a"))
            .delete("users", key("a"))
            .execute()
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Validation(ValidationError::DuplicateBatchKey)
        ));

        let err = engine
            .batch_write_item()
            .put("missing", user("a"))
            .execute()
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ResourceNotFound);
    }

    #[test]
    fn test_batch_write_mixed_puts_and_deletes() {
        let engine = engine();
        engine.put_item("users").item(user("old")).execute().unwrap();
        let out = engine
            .batch_write_item()
            .put("users", user("new"))
            .delete("users", key("old"))
            .execute()
            .unwrap();
        assert!(out.unprocessed_items.is_empty());

        let got = engine
            .batch_get_item()
            .get("users", key("old"))
            .get("users", key("new"))
            .execute()
            .unwrap();
        assert_eq!(got.responses["users"], vec![user("new")]);
        assert!(got.unprocessed_keys.is_empty());
    }

    #[test]
    fn test_batch_get_in_transition_table_is_unprocessed() {
        let engine = Engine::open(EngineConfig::in_memory().with_table_delays(60_000, 0, 0)).unwrap();
        engine
            .create_table("pending")
            .partition_key("id", KeyType::String)
            .execute()
            .unwrap();
        let out = engine
            .batch_get_item()
            .get("pending", key("a"))
            .execute()
            .unwrap();
        assert_eq!(out.unprocessed_keys["pending"].keys, vec![key("a")]);
        assert!(out.responses["pending"].is_empty());
    }

    #[test]
    fn test_batch_get_rejects_bad_keys() {
        let engine = engine();
        let err = engine
            .batch_get_item()
            .get("users", key("a"))
            .get("users", key("a"))
            .execute()
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        let extra = Item::from([
            ("id".to_string(), AttributeValue::s("a")),
            ("name".to_string(), AttributeValue::s("x")),
        ]);
        let err = engine
            .batch_get_item()
            .get("users", extra)
            .execute()
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }
}
