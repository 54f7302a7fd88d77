//! Operation requests and results.
//!
//! Every engine call is one [`OperationRequest`] variant, tagged by `"op"` on
//! the wire, and yields the matching [`OperationOutput`] variant.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::api::condition::ConditionExpr;
use crate::api::query::KeyCondition;
use crate::api::update::UpdateAction;
use crate::error::Error;
use crate::throughput::ConsumedCapacity;
use crate::types::{
    IndexDefinition, KeyDefinition, ProvisionedThroughput, TableDescription, TtlSpecification,
};
use crate::value::Item;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReturnValues {
    #[default]
    None,
    AllOld,
    AllNew,
    UpdatedOld,
    UpdatedNew,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReturnConsumedCapacity {
    #[default]
    None,
    Total,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Select {
    #[default]
    AllAttributes,
    Count,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateTableInput {
    pub table_name: String,
    pub partition_key: KeyDefinition,
    #[serde(default)]
    pub sort_key: Option<KeyDefinition>,
    #[serde(default)]
    pub indexes: Vec<IndexDefinition>,
    #[serde(default)]
    pub provisioned_throughput: Option<ProvisionedThroughput>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableNameInput {
    pub table_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ListTablesInput {
    #[serde(default)]
    pub exclusive_start_table_name: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateTableInput {
    pub table_name: String,
    #[serde(default)]
    pub provisioned_throughput: Option<ProvisionedThroughput>,
    #[serde(default)]
    pub create_index: Option<IndexDefinition>,
    #[serde(default)]
    pub delete_index: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateTimeToLiveInput {
    pub table_name: String,
    pub attribute_name: String,
    pub enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PutItemInput {
    pub table_name: String,
    pub item: Item,
    #[serde(default)]
    pub condition: Option<ConditionExpr>,
    #[serde(default)]
    pub return_values: ReturnValues,
    #[serde(default)]
    pub return_consumed_capacity: ReturnConsumedCapacity,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GetItemInput {
    pub table_name: String,
    pub key: Item,
    #[serde(default)]
    pub consistent_read: bool,
    /// Missing items become `ResourceNotFound` instead of an empty result.
    #[serde(default)]
    pub strict: bool,
    #[serde(default)]
    pub projection: Option<Vec<String>>,
    #[serde(default)]
    pub return_consumed_capacity: ReturnConsumedCapacity,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateItemInput {
    pub table_name: String,
    pub key: Item,
    pub actions: Vec<UpdateAction>,
    #[serde(default)]
    pub condition: Option<ConditionExpr>,
    #[serde(default)]
    pub return_values: ReturnValues,
    #[serde(default)]
    pub return_consumed_capacity: ReturnConsumedCapacity,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeleteItemInput {
    pub table_name: String,
    pub key: Item,
    #[serde(default)]
    pub condition: Option<ConditionExpr>,
    #[serde(default)]
    pub return_values: ReturnValues,
    #[serde(default)]
    pub return_consumed_capacity: ReturnConsumedCapacity,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryInput {
    pub table_name: String,
    #[serde(default)]
    pub index_name: Option<String>,
    pub key_condition: KeyCondition,
    #[serde(default)]
    pub filter: Option<ConditionExpr>,
    #[serde(default)]
    pub projection: Option<Vec<String>>,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub exclusive_start_key: Option<Item>,
    #[serde(default = "default_true")]
    pub scan_index_forward: bool,
    #[serde(default)]
    pub consistent_read: bool,
    #[serde(default)]
    pub select: Select,
    #[serde(default)]
    pub return_consumed_capacity: ReturnConsumedCapacity,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanInput {
    pub table_name: String,
    #[serde(default)]
    pub index_name: Option<String>,
    #[serde(default)]
    pub filter: Option<ConditionExpr>,
    #[serde(default)]
    pub projection: Option<Vec<String>>,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub exclusive_start_key: Option<Item>,
    #[serde(default)]
    pub segment: Option<u32>,
    #[serde(default)]
    pub total_segments: Option<u32>,
    #[serde(default)]
    pub consistent_read: bool,
    #[serde(default)]
    pub select: Select,
    #[serde(default)]
    pub return_consumed_capacity: ReturnConsumedCapacity,
}

fn default_true() -> bool {
    true
}

/// Keys to read from one table in a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeysAndAttributes {
    pub keys: Vec<Item>,
    #[serde(default)]
    pub projection: Option<Vec<String>>,
    #[serde(default)]
    pub consistent_read: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchGetItemInput {
    pub requests: BTreeMap<String, KeysAndAttributes>,
    #[serde(default)]
    pub return_consumed_capacity: ReturnConsumedCapacity,
}

/// One entry of a batch write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteRequest {
    Put { item: Item },
    Delete { key: Item },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchWriteItemInput {
    pub requests: BTreeMap<String, Vec<WriteRequest>>,
    #[serde(default)]
    pub return_consumed_capacity: ReturnConsumedCapacity,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum OperationRequest {
    CreateTable(CreateTableInput),
    DeleteTable(TableNameInput),
    DescribeTable(TableNameInput),
    ListTables(ListTablesInput),
    UpdateTable(UpdateTableInput),
    UpdateTimeToLive(UpdateTimeToLiveInput),
    DescribeTimeToLive(TableNameInput),
    PutItem(PutItemInput),
    GetItem(GetItemInput),
    UpdateItem(UpdateItemInput),
    DeleteItem(DeleteItemInput),
    Query(QueryInput),
    Scan(ScanInput),
    BatchGetItem(BatchGetItemInput),
    BatchWriteItem(BatchWriteItemInput),
}

impl OperationRequest {
    /// Operation name, for logs.
    pub fn name(&self) -> &'static str {
        match self {
            OperationRequest::CreateTable(_) => "CreateTable",
            OperationRequest::DeleteTable(_) => "DeleteTable",
            OperationRequest::DescribeTable(_) => "DescribeTable",
            OperationRequest::ListTables(_) => "ListTables",
            OperationRequest::UpdateTable(_) => "UpdateTable",
            OperationRequest::UpdateTimeToLive(_) => "UpdateTimeToLive",
            OperationRequest::DescribeTimeToLive(_) => "DescribeTimeToLive",
            OperationRequest::PutItem(_) => "PutItem",
            OperationRequest::GetItem(_) => "GetItem",
            OperationRequest::UpdateItem(_) => "UpdateItem",
            OperationRequest::DeleteItem(_) => "DeleteItem",
            OperationRequest::Query(_) => "Query",
            OperationRequest::Scan(_) => "Scan",
            OperationRequest::BatchGetItem(_) => "BatchGetItem",
            OperationRequest::BatchWriteItem(_) => "BatchWriteItem",
        }
    }

    /// The single table this request targets, if any.
    pub fn table_name(&self) -> Option<&str> {
        match self {
            OperationRequest::CreateTable(i) => Some(&i.table_name),
            OperationRequest::DeleteTable(i)
            | OperationRequest::DescribeTable(i)
            | OperationRequest::DescribeTimeToLive(i) => Some(&i.table_name),
            OperationRequest::UpdateTable(i) => Some(&i.table_name),
            OperationRequest::UpdateTimeToLive(i) => Some(&i.table_name),
            OperationRequest::PutItem(i) => Some(&i.table_name),
            OperationRequest::GetItem(i) => Some(&i.table_name),
            OperationRequest::UpdateItem(i) => Some(&i.table_name),
            OperationRequest::DeleteItem(i) => Some(&i.table_name),
            OperationRequest::Query(i) => Some(&i.table_name),
            OperationRequest::Scan(i) => Some(&i.table_name),
            OperationRequest::ListTables(_)
            | OperationRequest::BatchGetItem(_)
            | OperationRequest::BatchWriteItem(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableOutput {
    pub table_description: TableDescription,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ListTablesOutput {
    pub table_names: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_evaluated_table_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeToLiveOutput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_to_live: Option<TtlSpecification>,
}

/// Result of put/update/delete.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WriteOutput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attributes: Option<Item>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consumed_capacity: Option<ConsumedCapacity>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GetItemOutput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item: Option<Item>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consumed_capacity: Option<ConsumedCapacity>,
}

/// Result page of a query or scan.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PageOutput {
    pub items: Vec<Item>,
    pub count: usize,
    pub scanned_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_evaluated_key: Option<Item>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consumed_capacity: Option<ConsumedCapacity>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchGetItemOutput {
    pub responses: BTreeMap<String, Vec<Item>>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub unprocessed_keys: BTreeMap<String, KeysAndAttributes>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub consumed_capacity: Vec<ConsumedCapacity>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchWriteItemOutput {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub unprocessed_items: BTreeMap<String, Vec<WriteRequest>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub consumed_capacity: Vec<ConsumedCapacity>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum OperationOutput {
    CreateTable(TableOutput),
    DeleteTable(TableOutput),
    DescribeTable(TableOutput),
    ListTables(ListTablesOutput),
    UpdateTable(TableOutput),
    UpdateTimeToLive(TimeToLiveOutput),
    DescribeTimeToLive(TimeToLiveOutput),
    PutItem(WriteOutput),
    GetItem(GetItemOutput),
    UpdateItem(WriteOutput),
    DeleteItem(WriteOutput),
    Query(PageOutput),
    Scan(PageOutput),
    BatchGetItem(BatchGetItemOutput),
    BatchWriteItem(BatchWriteItemOutput),
}

pub type OperationResult = Result<OperationOutput, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::AttributeValue;

    #[test]
    fn test_request_wire_shape() {
        let req: OperationRequest = serde_json::from_str(
            r#"{"op": "put_item", "table_name": "users", "item": {"id": {"S": "a"}, "val": {"N": "1"}}}"#,
        )
        .unwrap();
        let OperationRequest::PutItem(input) = &req else {
            panic!("expected put_item, got {req:?}");
        };
        assert_eq!(input.item["val"], AttributeValue::n(1));
        assert_eq!(input.return_values, ReturnValues::None);
        assert_eq!(req.name(), "PutItem");
        assert_eq!(req.table_name(), Some("users"));
    }

    #[test]
    fn test_query_defaults() {
        let req: OperationRequest = serde_json::from_str(
            r#"{"op": "query", "table_name": "t", "key_condition": {"partition_key": {"S": "a"}}}"#,
        )
        .unwrap();
        let OperationRequest::Query(q) = req else {
            panic!("expected query");
        };
        assert!(q.scan_index_forward);
        assert_eq!(q.select, Select::AllAttributes);
    }

    #[test]
    fn test_output_is_tagged() {
        let out = OperationOutput::ListTables(ListTablesOutput {
            table_names: vec!["a".into()],
            last_evaluated_table_name: None,
        });
        let json = serde_json::to_value(&out).unwrap();
        assert_eq!(json["op"], "list_tables");
        assert_eq!(json["table_names"][0], "a");
    }
}
