//! Single-item operations and the write path they share with batches.

use std::collections::BTreeSet;

use bigdecimal::BigDecimal;
use tracing::{debug, info};

use crate::api::condition::ConditionExpr;
use crate::api::key_utils::{key_attributes, validate_item, validate_key_map};
use crate::api::projection::apply_projection;
use crate::api::update::{apply_updates, validate_actions};
use crate::catalog::{Limiters, TableHandle};
use crate::error::{Error, ResourceError, WriteError};
use crate::storage::wal::LogRecord;
use crate::throughput::{ConsumedCapacity, ThroughputLimiter, read_units, write_units};
use crate::value::{Item, item_size};

use super::dispatcher::{Phase, Trace};
use super::engine::{EngineInner, unix_now};
use super::request::{
    DeleteItemInput, GetItemInput, GetItemOutput, PutItemInput, ReturnConsumedCapacity,
    ReturnValues, UpdateItemInput, WriteOutput,
};

/// What a write does to the item it found.
pub(crate) enum Mutation {
    Put(Item),
    Delete,
    Keep,
}

/// Before and after images of one completed write.
pub(crate) struct Applied {
    pub old: Option<Item>,
    pub new: Option<Item>,
    pub units: f64,
}

/// Mutate the item at `key` inside its per-key section.
///
/// `plan` sees the current item and decides the outcome. State is untouched
/// when `plan` fails, when write capacity is exhausted, or when the log
/// append fails. `metered` writes draw on provisioned throughput.
pub(crate) fn write_key(
    inner: &EngineInner,
    handle: &TableHandle,
    key: Vec<u8>,
    metered: bool,
    plan: impl FnOnce(Option<&Item>) -> Result<Mutation, Error>,
) -> Result<Applied, Error> {
    let section = inner.coordinator.acquire(handle.id(), handle.name(), &key)?;
    let gate = inner.gate();

    let current = handle.data().get(&key).cloned();
    let new = match plan(current.as_ref())? {
        Mutation::Put(item) => Some(item),
        Mutation::Delete if current.is_some() => None,
        Mutation::Delete | Mutation::Keep => {
            let units = write_units(current.as_ref().map_or(0, item_size));
            return Ok(Applied {
                old: current.clone(),
                new: current,
                units,
            });
        }
    };

    let units = write_units(current.as_ref().map_or(0, item_size).max(new.as_ref().map_or(0, item_size)));
    let metered = metered && inner.config.enforce_throughput;
    if metered {
        charge_write(handle, current.as_ref(), new.as_ref(), units)?;
    }

    let record = match (&new, &current) {
        (Some(item), _) => LogRecord::Put {
            table_id: handle.id(),
            item: item.clone(),
        },
        (None, Some(old)) => LogRecord::Delete {
            table_id: handle.id(),
            key: key_attributes(old, &handle.key_schema()),
        },
        (None, None) => return Err(Error::Internal("delete of a missing item reached the log".into())),
    };
    if let Err(e) = inner.log(&record) {
        if metered {
            refund_write(handle, current.as_ref(), new.as_ref(), units);
        }
        return Err(e);
    }

    let old = handle.apply(key, new.clone(), &inner.propagator);
    drop(gate);
    drop(section);
    inner.maybe_checkpoint();
    Ok(Applied { old, new, units })
}

/// Limiters a write of `old` → `new` draws on: the table's, plus those of
/// global indexes either image appears in.
fn write_targets<'l>(
    limiters: &'l Limiters,
    handle: &TableHandle,
    old: Option<&Item>,
    new: Option<&Item>,
) -> Vec<&'l ThroughputLimiter> {
    let indexed = |name: &str| {
        handle.index(name).is_some_and(|index| {
            let keys = index.index_schema().key_names();
            [old, new]
                .into_iter()
                .flatten()
                .any(|item| keys.iter().all(|k| item.contains_key(*k)))
        })
    };
    limiters
        .table
        .iter()
        .chain(
            limiters
                .indexes
                .iter()
                .filter(|(name, _)| indexed(name))
                .map(|(_, limiter)| limiter),
        )
        .collect()
}

fn charge_write(handle: &TableHandle, old: Option<&Item>, new: Option<&Item>, units: f64) -> Result<(), Error> {
    let limiters = handle.limiters();
    let targets = write_targets(&limiters, handle, old, new);
    for (charged, limiter) in targets.iter().enumerate() {
        if let Err(e) = limiter.consume_write(units) {
            for earlier in &targets[..charged] {
                earlier.refund_write(units);
            }
            return Err(e);
        }
    }
    Ok(())
}

fn refund_write(handle: &TableHandle, old: Option<&Item>, new: Option<&Item>, units: f64) {
    let limiters = handle.limiters();
    for limiter in write_targets(&limiters, handle, old, new) {
        limiter.refund_write(units);
    }
}

/// Read one item, waiting out in-flight writes to it when `consistent`.
///
/// Returns the item and the read units it cost.
pub(crate) fn read_key(
    inner: &EngineInner,
    handle: &TableHandle,
    key: &[u8],
    consistent: bool,
) -> Result<(Option<Item>, f64), Error> {
    let status = handle.status();
    if !status.serves_items() {
        return Err(ResourceError::TableInUse {
            table: handle.name().to_string(),
            status,
        }
        .into());
    }
    let metered = inner.config.enforce_throughput;
    if metered && let Some(limiter) = &handle.limiters().table {
        limiter.admit_read()?;
    }
    if consistent {
        inner.coordinator.barrier(handle.id(), handle.name(), key)?;
    }
    let item = handle.data().get(key).cloned();
    let units = read_units(item.as_ref().map_or(0, item_size), consistent);
    if metered && let Some(limiter) = &handle.limiters().table {
        limiter.charge_read(units);
    }
    Ok((item, units))
}

/// Fail with ConditionalCheckFailed unless `condition` holds on `current`.
///
/// A missing item is evaluated as an empty one.
pub(crate) fn check_condition(condition: Option<&ConditionExpr>, current: Option<&Item>) -> Result<(), Error> {
    let Some(condition) = condition else {
        return Ok(());
    };
    let empty = Item::new();
    if !condition.eval(current.unwrap_or(&empty)) {
        return Err(WriteError::ConditionalCheckFailed.into());
    }
    Ok(())
}

pub(crate) fn capacity(
    requested: ReturnConsumedCapacity,
    table: &str,
    units: f64,
) -> Option<ConsumedCapacity> {
    match requested {
        ReturnConsumedCapacity::None => None,
        ReturnConsumedCapacity::Total => Some(ConsumedCapacity {
            table_name: table.to_string(),
            capacity_units: units,
        }),
    }
}

fn pick(item: Option<&Item>, names: &BTreeSet<String>) -> Option<Item> {
    let picked: Item = item?
        .iter()
        .filter(|(name, _)| names.contains(*name))
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect();
    (!picked.is_empty()).then_some(picked)
}

pub(crate) fn put_item(inner: &EngineInner, trace: &Trace, input: PutItemInput) -> Result<WriteOutput, Error> {
    trace.enter(Phase::TableLookup);
    let handle = inner.catalog.get_for_items(&input.table_name)?;
    let key = validate_item(&input.item, &handle.key_schema(), &handle.index_schemas())?;

    trace.enter(Phase::Executing);
    let condition = input.condition.as_ref();
    let applied = write_key(inner, &handle, key, true, |current| {
        check_condition(condition, current)?;
        Ok(Mutation::Put(input.item))
    })?;
    Ok(WriteOutput {
        attributes: match input.return_values {
            ReturnValues::AllOld => applied.old,
            _ => None,
        },
        consumed_capacity: capacity(input.return_consumed_capacity, handle.name(), applied.units),
    })
}

pub(crate) fn get_item(inner: &EngineInner, trace: &Trace, input: GetItemInput) -> Result<GetItemOutput, Error> {
    trace.enter(Phase::TableLookup);
    let handle = inner.catalog.get_for_items(&input.table_name)?;
    let key = validate_key_map(&input.key, &handle.key_schema())?;

    trace.enter(Phase::Executing);
    let (item, units) = read_key(inner, &handle, &key, input.consistent_read)?;
    if item.is_none() && input.strict {
        return Err(ResourceError::ItemNotFound(input.table_name).into());
    }
    let item = match (&input.projection, item) {
        (Some(paths), Some(item)) => Some(apply_projection(&item, paths)),
        (_, item) => item,
    };
    Ok(GetItemOutput {
        item,
        consumed_capacity: capacity(input.return_consumed_capacity, handle.name(), units),
    })
}

/// Apply update actions, creating the item from its key when it is missing.
pub(crate) fn update_item(
    inner: &EngineInner,
    trace: &Trace,
    input: UpdateItemInput,
) -> Result<WriteOutput, Error> {
    trace.enter(Phase::TableLookup);
    let handle = inner.catalog.get_for_items(&input.table_name)?;
    let schema = handle.key_schema();
    let key = validate_key_map(&input.key, &schema)?;
    validate_actions(&input.actions, &schema)?;
    let index_schemas = handle.index_schemas();

    trace.enter(Phase::Executing);
    let condition = input.condition.as_ref();
    let mut touched = BTreeSet::new();
    let applied = write_key(inner, &handle, key, true, |current| {
        check_condition(condition, current)?;
        let mut item = current.cloned().unwrap_or_else(|| input.key.clone());
        touched = apply_updates(&mut item, &input.actions)?;
        validate_item(&item, &schema, &index_schemas)?;
        Ok(Mutation::Put(item))
    })?;

    let attributes = match input.return_values {
        ReturnValues::None => None,
        ReturnValues::AllOld => applied.old,
        ReturnValues::AllNew => applied.new,
        ReturnValues::UpdatedOld => pick(applied.old.as_ref(), &touched),
        ReturnValues::UpdatedNew => pick(applied.new.as_ref(), &touched),
    };
    Ok(WriteOutput {
        attributes,
        consumed_capacity: capacity(input.return_consumed_capacity, handle.name(), applied.units),
    })
}

pub(crate) fn delete_item(
    inner: &EngineInner,
    trace: &Trace,
    input: DeleteItemInput,
) -> Result<WriteOutput, Error> {
    trace.enter(Phase::TableLookup);
    let handle = inner.catalog.get_for_items(&input.table_name)?;
    let key = validate_key_map(&input.key, &handle.key_schema())?;

    trace.enter(Phase::Executing);
    let condition = input.condition.as_ref();
    let applied = write_key(inner, &handle, key, true, |current| {
        check_condition(condition, current)?;
        Ok(Mutation::Delete)
    })?;
    Ok(WriteOutput {
        attributes: match input.return_values {
            ReturnValues::AllOld => applied.old,
            _ => None,
        },
        consumed_capacity: capacity(input.return_consumed_capacity, handle.name(), applied.units),
    })
}

fn is_expired(item: &Item, attribute: &str, now: &BigDecimal) -> bool {
    item.get(attribute)
        .and_then(|value| value.as_number())
        .is_some_and(|expires_at| &expires_at <= now)
}

/// Delete every item whose TTL attribute (epoch seconds) is not in the future.
///
/// Each candidate is re-checked under its key section, so a concurrent
/// rewrite that pushed the expiry forward survives. TTL deletes are free.
pub(crate) fn sweep_expired(inner: &EngineInner, table: &str) -> Result<usize, Error> {
    let handle = inner.catalog.get_for_items(table)?;
    let Some(ttl) = handle.ttl().filter(|ttl| ttl.enabled) else {
        return Ok(0);
    };
    let attribute = ttl.attribute_name.as_str();
    let now = BigDecimal::from(unix_now());
    let candidates: Vec<Vec<u8>> = handle
        .data()
        .entries()
        .iter()
        .filter(|(_, item)| is_expired(item, attribute, &now))
        .map(|(key, _)| key.clone())
        .collect();

    let mut removed = 0;
    for key in candidates {
        let applied = write_key(inner, &handle, key, false, |current| {
            Ok(match current {
                Some(item) if is_expired(item, attribute, &now) => Mutation::Delete,
                _ => Mutation::Keep,
            })
        })?;
        if applied.old.is_some() && applied.new.is_none() {
            removed += 1;
        }
    }
    if removed > 0 {
        info!(table, removed, "expired items removed");
    } else {
        debug!(table, "no expired items");
    }
    Ok(removed)
}
