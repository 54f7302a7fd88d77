//! Catalog operations: create, delete, describe, list and update tables.
//!
//! Lifecycle changes of one table name are serialized through the key
//! coordinator under a reserved table id, so they never block item traffic
//! or changes to other tables.

use std::sync::Arc;

use tracing::info;

use crate::catalog::TableHandle;
use crate::catalog::ops::{validate_definition, validate_index};
use crate::coordinator::KeyGuard;
use crate::error::{Error, ResourceError, ValidationError};
use crate::index::SecondaryIndex;
use crate::storage::wal::LogRecord;
use crate::types::{IndexKind, MAX_LIST_TABLES, TableDefinition, TableId, TableStatus, TtlSpecification};

use super::dispatcher::{Phase, Trace};
use super::engine::{EngineInner, delay, unix_now};
use super::request::{
    CreateTableInput, ListTablesInput, ListTablesOutput, TableNameInput, TableOutput,
    TimeToLiveOutput, UpdateTableInput, UpdateTimeToLiveInput,
};

/// Table ids start at 1; id 0 scopes per-name catalog sections.
const CATALOG_SCOPE: TableId = 0;

pub(crate) fn definition_of(input: &CreateTableInput) -> TableDefinition {
    TableDefinition {
        table_name: input.table_name.clone(),
        partition_key: input.partition_key.clone(),
        sort_key: input.sort_key.clone(),
        indexes: input.indexes.clone(),
        provisioned_throughput: input.provisioned_throughput,
    }
}

fn name_section<'a>(inner: &'a EngineInner, name: &str) -> Result<KeyGuard<'a>, Error> {
    inner.coordinator.acquire(CATALOG_SCOPE, name, name.as_bytes())
}

fn require_active(handle: &TableHandle) -> Result<(), Error> {
    let status = handle.status();
    if status != TableStatus::Active {
        return Err(ResourceError::TableInUse {
            table: handle.name().to_string(),
            status,
        }
        .into());
    }
    Ok(())
}

pub(crate) fn create_table(
    inner: &EngineInner,
    trace: &Trace,
    input: CreateTableInput,
) -> Result<TableOutput, Error> {
    let definition = definition_of(&input);
    let name = definition.table_name.clone();

    trace.enter(Phase::TableLookup);
    let _section = name_section(inner, &name)?;
    if inner.catalog.get(&name).is_ok() {
        return Err(ResourceError::TableAlreadyExists(name).into());
    }

    trace.enter(Phase::Executing);
    let table_id = inner.catalog.allocate_id();
    let created_at = unix_now();
    let create_delay = delay(inner.config.create_table_delay);
    let handle = Arc::new(TableHandle::new(
        table_id,
        definition.clone(),
        created_at,
        create_delay,
        inner.config.throughput_burst_seconds,
    ));
    if !create_delay.is_zero() {
        for index in handle.indexes() {
            index.set_creating(true);
        }
    }
    {
        let _gate = inner.gate();
        inner.log(&LogRecord::CreateTable {
            table_id,
            definition,
            created_at,
        })?;
        inner.catalog.lock_names().insert(name.clone(), Arc::clone(&handle));
    }
    inner.maybe_checkpoint();
    info!(table = %name, table_id, "table created");
    Ok(TableOutput {
        table_description: handle.describe(),
    })
}

pub(crate) fn delete_table(
    inner: &EngineInner,
    trace: &Trace,
    input: TableNameInput,
) -> Result<TableOutput, Error> {
    trace.enter(Phase::TableLookup);
    let _section = name_section(inner, &input.table_name)?;
    let handle = inner.catalog.get(&input.table_name)?;
    require_active(&handle)?;

    trace.enter(Phase::Executing);
    let delete_delay = delay(inner.config.delete_table_delay);
    {
        let _gate = inner.gate();
        inner.log(&LogRecord::DeleteTable {
            table_id: handle.id(),
        })?;
        handle.begin_transition(TableStatus::Deleting, TableStatus::Deleted, delete_delay);
    }
    let description = handle.describe();
    if delete_delay.is_zero() {
        inner.catalog.remove(&handle);
    }
    inner.maybe_checkpoint();
    info!(table = %input.table_name, table_id = handle.id(), "table deleted");
    Ok(TableOutput {
        table_description: description,
    })
}

pub(crate) fn describe_table(
    inner: &EngineInner,
    trace: &Trace,
    input: TableNameInput,
) -> Result<TableOutput, Error> {
    trace.enter(Phase::TableLookup);
    let handle = inner.catalog.get(&input.table_name)?;
    trace.enter(Phase::Executing);
    Ok(TableOutput {
        table_description: handle.describe(),
    })
}

pub(crate) fn list_tables(
    inner: &EngineInner,
    trace: &Trace,
    input: ListTablesInput,
) -> ListTablesOutput {
    trace.enter(Phase::Executing);
    let limit = input.limit.unwrap_or(MAX_LIST_TABLES);
    let names: Vec<String> = inner
        .catalog
        .names()
        .into_iter()
        .filter(|name| {
            input
                .exclusive_start_table_name
                .as_ref()
                .is_none_or(|start| name > start)
        })
        .collect();
    let more = names.len() > limit;
    let table_names: Vec<String> = names.into_iter().take(limit).collect();
    let last_evaluated_table_name = if more { table_names.last().cloned() } else { None };
    ListTablesOutput {
        table_names,
        last_evaluated_table_name,
    }
}

/// Throughput changes, or adding/removing one global index.
///
/// A new index is backfilled from existing items before the call returns and
/// reports CREATING until the table settles back to ACTIVE.
pub(crate) fn update_table(
    inner: &EngineInner,
    trace: &Trace,
    input: UpdateTableInput,
) -> Result<TableOutput, Error> {
    trace.enter(Phase::TableLookup);
    let _section = name_section(inner, &input.table_name)?;
    let handle = inner.catalog.get(&input.table_name)?;
    require_active(&handle)?;

    let mut definition = handle.definition();
    if let Some(throughput) = input.provisioned_throughput {
        definition.provisioned_throughput = Some(throughput);
    }
    if let Some(index_name) = &input.delete_index {
        let Some(existing) = definition.index(index_name) else {
            return Err(ResourceError::IndexNotFound {
                table: input.table_name.clone(),
                index: index_name.clone(),
            }
            .into());
        };
        if existing.kind == IndexKind::Local {
            return Err(ValidationError::InvalidIndex(format!(
                "{index_name}: local indexes cannot be deleted"
            ))
            .into());
        }
        definition.indexes.retain(|idx| &idx.index_name != index_name);
    }
    if let Some(index) = &input.create_index {
        if index.kind == IndexKind::Local {
            return Err(ValidationError::InvalidIndex(format!(
                "{}: local indexes can only be defined at table creation",
                index.index_name
            ))
            .into());
        }
        validate_index(index, &definition)?;
        definition.indexes.push(index.clone());
    }
    validate_definition(&definition)?;

    trace.enter(Phase::Executing);
    let update_delay = delay(inner.config.update_table_delay);
    {
        let _gate = inner.gate();
        inner.log(&LogRecord::UpdateTable {
            table_id: handle.id(),
            definition: definition.clone(),
        })?;
        handle.set_definition(definition);
        if let Some(index_name) = &input.delete_index {
            handle.remove_index(index_name);
        }
        if let Some(index) = input.create_index {
            let index = Arc::new(SecondaryIndex::new(index, handle.key_schema()));
            index.set_creating(!update_delay.is_zero());
            handle.add_index(Arc::clone(&index));
            info!(table = handle.name(), index = index.name(), entries = index.len(), "index backfilled");
        }
        handle.begin_transition(TableStatus::Updating, TableStatus::Active, update_delay);
    }
    inner.maybe_checkpoint();
    Ok(TableOutput {
        table_description: handle.describe(),
    })
}

pub(crate) fn update_time_to_live(
    inner: &EngineInner,
    trace: &Trace,
    input: UpdateTimeToLiveInput,
) -> Result<TimeToLiveOutput, Error> {
    trace.enter(Phase::TableLookup);
    let _section = name_section(inner, &input.table_name)?;
    let handle = inner.catalog.get_for_items(&input.table_name)?;
    if let Some(current) = handle.ttl()
        && current.enabled
        && input.enabled
        && current.attribute_name != input.attribute_name
    {
        return Err(ValidationError::InvalidParameter(format!(
            "TimeToLive is already enabled on attribute '{}'",
            current.attribute_name
        ))
        .into());
    }

    trace.enter(Phase::Executing);
    let spec = TtlSpecification {
        attribute_name: input.attribute_name,
        enabled: input.enabled,
    };
    {
        let _gate = inner.gate();
        inner.log(&LogRecord::UpdateTtl {
            table_id: handle.id(),
            ttl: Some(spec.clone()),
        })?;
        handle.set_ttl(Some(spec.clone()));
    }
    inner.maybe_checkpoint();
    Ok(TimeToLiveOutput {
        time_to_live: Some(spec),
    })
}

pub(crate) fn describe_time_to_live(
    inner: &EngineInner,
    trace: &Trace,
    input: TableNameInput,
) -> Result<TimeToLiveOutput, Error> {
    trace.enter(Phase::TableLookup);
    let handle = inner.catalog.get(&input.table_name)?;
    Ok(TimeToLiveOutput {
        time_to_live: handle.ttl(),
    })
}
