//! Fluent request builders over [`Engine::dispatch`].
//!
//! Each builder assembles one [`OperationRequest`] and unwraps the matching
//! [`OperationOutput`] variant, so embedded callers and the wire protocol
//! run through exactly the same validation and execution.

use std::collections::BTreeMap;

use crate::error::{Error, ValidationError};
use crate::types::{IndexDefinition, KeyDefinition, KeyType, ProvisionedThroughput, TableDescription};
use crate::value::{AttributeValue, Item};

use super::condition::ConditionExpr;
use super::engine::{Engine, unexpected};
use super::query::{KeyCondition, SortKeyCondition};
use super::request::{
    BatchGetItemInput, BatchGetItemOutput, BatchWriteItemInput, BatchWriteItemOutput,
    CreateTableInput, DeleteItemInput, GetItemInput, KeysAndAttributes, OperationOutput,
    OperationRequest, PageOutput, PutItemInput, QueryInput, ReturnConsumedCapacity,
    ReturnValues, ScanInput, Select, UpdateItemInput, UpdateTableInput, WriteOutput,
    WriteRequest,
};
use super::update::UpdateAction;

fn consumed(enabled: bool) -> ReturnConsumedCapacity {
    if enabled {
        ReturnConsumedCapacity::Total
    } else {
        ReturnConsumedCapacity::None
    }
}

// ---------------------------------------------------------------------------
// Table builders
// ---------------------------------------------------------------------------

/// Builder for creating a new table.
pub struct CreateTableBuilder<'a> {
    engine: &'a Engine,
    name: String,
    partition_key: Option<KeyDefinition>,
    sort_key: Option<KeyDefinition>,
    indexes: Vec<IndexDefinition>,
    provisioned_throughput: Option<ProvisionedThroughput>,
}

impl<'a> CreateTableBuilder<'a> {
    pub(crate) fn new(engine: &'a Engine, name: String) -> Self {
        Self {
            engine,
            name,
            partition_key: None,
            sort_key: None,
            indexes: Vec::new(),
            provisioned_throughput: None,
        }
    }

    /// Set the partition key attribute and type.
    pub fn partition_key(mut self, name: &str, key_type: KeyType) -> Self {
        self.partition_key = Some(KeyDefinition::new(name, key_type));
        self
    }

    /// Set the (optional) sort key attribute and type.
    pub fn sort_key(mut self, name: &str, key_type: KeyType) -> Self {
        self.sort_key = Some(KeyDefinition::new(name, key_type));
        self
    }

    /// Declare a secondary index. May be called repeatedly.
    pub fn index(mut self, index: IndexDefinition) -> Self {
        self.indexes.push(index);
        self
    }

    pub fn provisioned_throughput(mut self, throughput: ProvisionedThroughput) -> Self {
        self.provisioned_throughput = Some(throughput);
        self
    }

    pub fn execute(self) -> Result<TableDescription, Error> {
        let partition_key = self.partition_key.ok_or_else(|| {
            ValidationError::InvalidParameter("a partition key definition is required".into())
        })?;
        let request = OperationRequest::CreateTable(CreateTableInput {
            table_name: self.name,
            partition_key,
            sort_key: self.sort_key,
            indexes: self.indexes,
            provisioned_throughput: self.provisioned_throughput,
        });
        match self.engine.dispatch(request)? {
            OperationOutput::CreateTable(out) => Ok(out.table_description),
            other => Err(unexpected(&other)),
        }
    }
}

/// Builder for changing throughput or secondary indexes of a table.
pub struct UpdateTableBuilder<'a> {
    engine: &'a Engine,
    name: String,
    provisioned_throughput: Option<ProvisionedThroughput>,
    create_index: Option<IndexDefinition>,
    delete_index: Option<String>,
}

impl<'a> UpdateTableBuilder<'a> {
    pub(crate) fn new(engine: &'a Engine, name: String) -> Self {
        Self {
            engine,
            name,
            provisioned_throughput: None,
            create_index: None,
            delete_index: None,
        }
    }

    pub fn provisioned_throughput(mut self, throughput: ProvisionedThroughput) -> Self {
        self.provisioned_throughput = Some(throughput);
        self
    }

    /// Add a global index and backfill it from existing items.
    pub fn create_index(mut self, index: IndexDefinition) -> Self {
        self.create_index = Some(index);
        self
    }

    pub fn delete_index(mut self, name: &str) -> Self {
        self.delete_index = Some(name.to_string());
        self
    }

    pub fn execute(self) -> Result<TableDescription, Error> {
        let request = OperationRequest::UpdateTable(UpdateTableInput {
            table_name: self.name,
            provisioned_throughput: self.provisioned_throughput,
            create_index: self.create_index,
            delete_index: self.delete_index,
        });
        match self.engine.dispatch(request)? {
            OperationOutput::UpdateTable(out) => Ok(out.table_description),
            other => Err(unexpected(&other)),
        }
    }
}

// ---------------------------------------------------------------------------
// Item builders
// ---------------------------------------------------------------------------

/// Builder for writing a whole item.
pub struct PutItemBuilder<'a> {
    engine: &'a Engine,
    table: String,
    item: Item,
    condition: Option<ConditionExpr>,
    return_values: ReturnValues,
    return_consumed_capacity: ReturnConsumedCapacity,
}

impl<'a> PutItemBuilder<'a> {
    pub(crate) fn new(engine: &'a Engine, table: String) -> Self {
        Self {
            engine,
            table,
            item: Item::new(),
            condition: None,
            return_values: ReturnValues::None,
            return_consumed_capacity: ReturnConsumedCapacity::None,
        }
    }

    /// Replace the item being written.
    pub fn item(mut self, item: Item) -> Self {
        self.item = item;
        self
    }

    /// Set a single attribute on the item being written.
    pub fn attr(mut self, name: &str, value: AttributeValue) -> Self {
        self.item.insert(name.to_string(), value);
        self
    }

    /// Only write when `condition` holds on the current item.
    pub fn condition(mut self, condition: ConditionExpr) -> Self {
        self.condition = Some(condition);
        self
    }

    /// `NONE` or `ALL_OLD`.
    pub fn return_values(mut self, return_values: ReturnValues) -> Self {
        self.return_values = return_values;
        self
    }

    pub fn return_consumed_capacity(mut self, enabled: bool) -> Self {
        self.return_consumed_capacity = consumed(enabled);
        self
    }

    pub fn execute(self) -> Result<WriteOutput, Error> {
        let request = OperationRequest::PutItem(PutItemInput {
            table_name: self.table,
            item: self.item,
            condition: self.condition,
            return_values: self.return_values,
            return_consumed_capacity: self.return_consumed_capacity,
        });
        match self.engine.dispatch(request)? {
            OperationOutput::PutItem(out) => Ok(out),
            other => Err(unexpected(&other)),
        }
    }
}

/// Builder for reading a single item by key.
pub struct GetItemBuilder<'a> {
    engine: &'a Engine,
    table: String,
    key: Item,
    consistent_read: bool,
    strict: bool,
    projection: Option<Vec<String>>,
}

impl<'a> GetItemBuilder<'a> {
    pub(crate) fn new(engine: &'a Engine, table: String) -> Self {
        Self {
            engine,
            table,
            key: Item::new(),
            consistent_read: false,
            strict: false,
            projection: None,
        }
    }

    /// Set one key attribute. Call once per key attribute.
    pub fn key(mut self, name: &str, value: AttributeValue) -> Self {
        self.key.insert(name.to_string(), value);
        self
    }

    pub fn consistent_read(mut self, consistent: bool) -> Self {
        self.consistent_read = consistent;
        self
    }

    /// Report a missing item as `ResourceNotFound` instead of `None`.
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn projection<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.projection = Some(paths.into_iter().map(Into::into).collect());
        self
    }

    pub fn execute(self) -> Result<Option<Item>, Error> {
        let request = OperationRequest::GetItem(GetItemInput {
            table_name: self.table,
            key: self.key,
            consistent_read: self.consistent_read,
            strict: self.strict,
            projection: self.projection,
            return_consumed_capacity: ReturnConsumedCapacity::None,
        });
        match self.engine.dispatch(request)? {
            OperationOutput::GetItem(out) => Ok(out.item),
            other => Err(unexpected(&other)),
        }
    }
}

/// Builder for applying update actions to one item.
///
/// A missing item is created from the key plus the actions' results.
pub struct UpdateItemBuilder<'a> {
    engine: &'a Engine,
    table: String,
    key: Item,
    actions: Vec<UpdateAction>,
    condition: Option<ConditionExpr>,
    return_values: ReturnValues,
    return_consumed_capacity: ReturnConsumedCapacity,
}

impl<'a> UpdateItemBuilder<'a> {
    pub(crate) fn new(engine: &'a Engine, table: String) -> Self {
        Self {
            engine,
            table,
            key: Item::new(),
            actions: Vec::new(),
            condition: None,
            return_values: ReturnValues::None,
            return_consumed_capacity: ReturnConsumedCapacity::None,
        }
    }

    pub fn key(mut self, name: &str, value: AttributeValue) -> Self {
        self.key.insert(name.to_string(), value);
        self
    }

    /// Append an action. Actions apply in the order they were added.
    pub fn action(mut self, action: UpdateAction) -> Self {
        self.actions.push(action);
        self
    }

    pub fn condition(mut self, condition: ConditionExpr) -> Self {
        self.condition = Some(condition);
        self
    }

    pub fn return_values(mut self, return_values: ReturnValues) -> Self {
        self.return_values = return_values;
        self
    }

    pub fn return_consumed_capacity(mut self, enabled: bool) -> Self {
        self.return_consumed_capacity = consumed(enabled);
        self
    }

    pub fn execute(self) -> Result<WriteOutput, Error> {
        let request = OperationRequest::UpdateItem(UpdateItemInput {
            table_name: self.table,
            key: self.key,
            actions: self.actions,
            condition: self.condition,
            return_values: self.return_values,
            return_consumed_capacity: self.return_consumed_capacity,
        });
        match self.engine.dispatch(request)? {
            OperationOutput::UpdateItem(out) => Ok(out),
            other => Err(unexpected(&other)),
        }
    }
}

/// Builder for deleting a single item by key.
pub struct DeleteItemBuilder<'a> {
    engine: &'a Engine,
    table: String,
    key: Item,
    condition: Option<ConditionExpr>,
    return_values: ReturnValues,
    return_consumed_capacity: ReturnConsumedCapacity,
}

impl<'a> DeleteItemBuilder<'a> {
    pub(crate) fn new(engine: &'a Engine, table: String) -> Self {
        Self {
            engine,
            table,
            key: Item::new(),
            condition: None,
            return_values: ReturnValues::None,
            return_consumed_capacity: ReturnConsumedCapacity::None,
        }
    }

    pub fn key(mut self, name: &str, value: AttributeValue) -> Self {
        self.key.insert(name.to_string(), value);
        self
    }

    pub fn condition(mut self, condition: ConditionExpr) -> Self {
        self.condition = Some(condition);
        self
    }

    pub fn return_values(mut self, return_values: ReturnValues) -> Self {
        self.return_values = return_values;
        self
    }

    pub fn return_consumed_capacity(mut self, enabled: bool) -> Self {
        self.return_consumed_capacity = consumed(enabled);
        self
    }

    pub fn execute(self) -> Result<WriteOutput, Error> {
        let request = OperationRequest::DeleteItem(DeleteItemInput {
            table_name: self.table,
            key: self.key,
            condition: self.condition,
            return_values: self.return_values,
            return_consumed_capacity: self.return_consumed_capacity,
        });
        match self.engine.dispatch(request)? {
            OperationOutput::DeleteItem(out) => Ok(out),
            other => Err(unexpected(&other)),
        }
    }
}

// ---------------------------------------------------------------------------
// Query / Scan
// ---------------------------------------------------------------------------

/// Builder for a query over one partition of a table or index.
pub struct QueryBuilder<'a> {
    engine: &'a Engine,
    table: String,
    index: Option<String>,
    partition_key: Option<AttributeValue>,
    sort_key: Option<SortKeyCondition>,
    filter: Option<ConditionExpr>,
    projection: Option<Vec<String>>,
    limit: Option<usize>,
    exclusive_start_key: Option<Item>,
    scan_forward: bool,
    consistent_read: bool,
    select: Select,
    return_consumed_capacity: ReturnConsumedCapacity,
}

impl<'a> QueryBuilder<'a> {
    pub(crate) fn new(engine: &'a Engine, table: String) -> Self {
        Self {
            engine,
            table,
            index: None,
            partition_key: None,
            sort_key: None,
            filter: None,
            projection: None,
            limit: None,
            exclusive_start_key: None,
            scan_forward: true,
            consistent_read: false,
            select: Select::AllAttributes,
            return_consumed_capacity: ReturnConsumedCapacity::None,
        }
    }

    /// Query a secondary index instead of the base table.
    pub fn index(mut self, name: &str) -> Self {
        self.index = Some(name.to_string());
        self
    }

    /// The partition key value to match (required).
    pub fn partition_key(mut self, value: AttributeValue) -> Self {
        self.partition_key = Some(value);
        self
    }

    pub fn sort_key(mut self, condition: SortKeyCondition) -> Self {
        self.sort_key = Some(condition);
        self
    }

    /// Applied after items are read; filtered items still count toward `limit`.
    pub fn filter(mut self, filter: ConditionExpr) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn projection<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.projection = Some(paths.into_iter().map(Into::into).collect());
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn exclusive_start_key(mut self, key: Item) -> Self {
        self.exclusive_start_key = Some(key);
        self
    }

    /// `false` returns items in descending sort key order.
    pub fn scan_forward(mut self, forward: bool) -> Self {
        self.scan_forward = forward;
        self
    }

    pub fn consistent_read(mut self, consistent: bool) -> Self {
        self.consistent_read = consistent;
        self
    }

    /// Return only the count of matching items.
    pub fn count(mut self) -> Self {
        self.select = Select::Count;
        self
    }

    pub fn return_consumed_capacity(mut self, enabled: bool) -> Self {
        self.return_consumed_capacity = consumed(enabled);
        self
    }

    pub fn execute(self) -> Result<PageOutput, Error> {
        let partition_key = self.partition_key.ok_or_else(|| {
            ValidationError::InvalidParameter("query requires a partition key value".into())
        })?;
        let request = OperationRequest::Query(QueryInput {
            table_name: self.table,
            index_name: self.index,
            key_condition: KeyCondition {
                partition_key,
                sort_key: self.sort_key,
            },
            filter: self.filter,
            projection: self.projection,
            limit: self.limit,
            exclusive_start_key: self.exclusive_start_key,
            scan_index_forward: self.scan_forward,
            consistent_read: self.consistent_read,
            select: self.select,
            return_consumed_capacity: self.return_consumed_capacity,
        });
        match self.engine.dispatch(request)? {
            OperationOutput::Query(out) => Ok(out),
            other => Err(unexpected(&other)),
        }
    }
}

/// Builder for a full scan of a table or index.
pub struct ScanBuilder<'a> {
    engine: &'a Engine,
    table: String,
    index: Option<String>,
    filter: Option<ConditionExpr>,
    projection: Option<Vec<String>>,
    limit: Option<usize>,
    exclusive_start_key: Option<Item>,
    segment: Option<(u32, u32)>,
    consistent_read: bool,
    select: Select,
    return_consumed_capacity: ReturnConsumedCapacity,
}

impl<'a> ScanBuilder<'a> {
    pub(crate) fn new(engine: &'a Engine, table: String) -> Self {
        Self {
            engine,
            table,
            index: None,
            filter: None,
            projection: None,
            limit: None,
            exclusive_start_key: None,
            segment: None,
            consistent_read: false,
            select: Select::AllAttributes,
            return_consumed_capacity: ReturnConsumedCapacity::None,
        }
    }

    pub fn index(mut self, name: &str) -> Self {
        self.index = Some(name.to_string());
        self
    }

    pub fn filter(mut self, filter: ConditionExpr) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn projection<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.projection = Some(paths.into_iter().map(Into::into).collect());
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn exclusive_start_key(mut self, key: Item) -> Self {
        self.exclusive_start_key = Some(key);
        self
    }

    /// Scan only segment `segment` of `total` disjoint segments.
    pub fn segment(mut self, segment: u32, total: u32) -> Self {
        self.segment = Some((segment, total));
        self
    }

    pub fn consistent_read(mut self, consistent: bool) -> Self {
        self.consistent_read = consistent;
        self
    }

    pub fn count(mut self) -> Self {
        self.select = Select::Count;
        self
    }

    pub fn return_consumed_capacity(mut self, enabled: bool) -> Self {
        self.return_consumed_capacity = consumed(enabled);
        self
    }

    pub fn execute(self) -> Result<PageOutput, Error> {
        let request = OperationRequest::Scan(ScanInput {
            table_name: self.table,
            index_name: self.index,
            filter: self.filter,
            projection: self.projection,
            limit: self.limit,
            exclusive_start_key: self.exclusive_start_key,
            segment: self.segment.map(|(segment, _)| segment),
            total_segments: self.segment.map(|(_, total)| total),
            consistent_read: self.consistent_read,
            select: self.select,
            return_consumed_capacity: self.return_consumed_capacity,
        });
        match self.engine.dispatch(request)? {
            OperationOutput::Scan(out) => Ok(out),
            other => Err(unexpected(&other)),
        }
    }
}

// ---------------------------------------------------------------------------
// Batches
// ---------------------------------------------------------------------------

/// Builder for reading many keys across tables.
pub struct BatchGetItemBuilder<'a> {
    engine: &'a Engine,
    requests: BTreeMap<String, KeysAndAttributes>,
    consistent_read: bool,
    return_consumed_capacity: ReturnConsumedCapacity,
}

impl<'a> BatchGetItemBuilder<'a> {
    pub(crate) fn new(engine: &'a Engine) -> Self {
        Self {
            engine,
            requests: BTreeMap::new(),
            consistent_read: false,
            return_consumed_capacity: ReturnConsumedCapacity::None,
        }
    }

    /// Add a key to read from `table`.
    pub fn get(mut self, table: &str, key: Item) -> Self {
        self.requests
            .entry(table.to_string())
            .or_insert_with(|| KeysAndAttributes {
                keys: Vec::new(),
                projection: None,
                consistent_read: false,
            })
            .keys
            .push(key);
        self
    }

    /// Read every table in the batch strongly consistently.
    pub fn consistent_read(mut self, consistent: bool) -> Self {
        self.consistent_read = consistent;
        self
    }

    pub fn return_consumed_capacity(mut self, enabled: bool) -> Self {
        self.return_consumed_capacity = consumed(enabled);
        self
    }

    pub fn execute(mut self) -> Result<BatchGetItemOutput, Error> {
        for request in self.requests.values_mut() {
            request.consistent_read = self.consistent_read;
        }
        let request = OperationRequest::BatchGetItem(BatchGetItemInput {
            requests: self.requests,
            return_consumed_capacity: self.return_consumed_capacity,
        });
        match self.engine.dispatch(request)? {
            OperationOutput::BatchGetItem(out) => Ok(out),
            other => Err(unexpected(&other)),
        }
    }
}

/// Builder for a set of independent puts and deletes across tables.
pub struct BatchWriteItemBuilder<'a> {
    engine: &'a Engine,
    requests: BTreeMap<String, Vec<WriteRequest>>,
    return_consumed_capacity: ReturnConsumedCapacity,
}

impl<'a> BatchWriteItemBuilder<'a> {
    pub(crate) fn new(engine: &'a Engine) -> Self {
        Self {
            engine,
            requests: BTreeMap::new(),
            return_consumed_capacity: ReturnConsumedCapacity::None,
        }
    }

    pub fn put(mut self, table: &str, item: Item) -> Self {
        self.requests
            .entry(table.to_string())
            .or_default()
            .push(WriteRequest::Put { item });
        self
    }

    pub fn delete(mut self, table: &str, key: Item) -> Self {
        self.requests
            .entry(table.to_string())
            .or_default()
            .push(WriteRequest::Delete { key });
        self
    }

    pub fn return_consumed_capacity(mut self, enabled: bool) -> Self {
        self.return_consumed_capacity = consumed(enabled);
        self
    }

    pub fn execute(self) -> Result<BatchWriteItemOutput, Error> {
        let request = OperationRequest::BatchWriteItem(BatchWriteItemInput {
            requests: self.requests,
            return_consumed_capacity: self.return_consumed_capacity,
        });
        match self.engine.dispatch(request)? {
            OperationOutput::BatchWriteItem(out) => Ok(out),
            other => Err(unexpected(&other)),
        }
    }
}
