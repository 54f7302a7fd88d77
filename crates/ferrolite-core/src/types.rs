//! Core types: key definitions, table and index definitions, lifecycle states.

use serde::{Deserialize, Serialize};

/// Unique, never-reused identifier of one incarnation of a table.
///
/// Deleting a table and creating another with the same name yields a new id,
/// so stale log records for the old incarnation are never replayed into it.
pub type TableId = u64;

/// Maximum item size in bytes (400KB, matching DynamoDB).
pub const MAX_ITEM_SIZE: usize = 400 * 1024;

/// Maximum partition key size in bytes (2048, matching DynamoDB).
pub const MAX_PARTITION_KEY_SIZE: usize = 2048;

/// Maximum sort key size in bytes (1024, matching DynamoDB).
pub const MAX_SORT_KEY_SIZE: usize = 1024;

/// Maximum number of put/delete requests in one `BatchWriteItem`.
pub const MAX_BATCH_WRITE_ITEMS: usize = 25;

/// Maximum number of keys in one `BatchGetItem`.
pub const MAX_BATCH_GET_KEYS: usize = 100;

/// A query or scan page ends once this many bytes of items were evaluated.
pub const MAX_PAGE_BYTES: usize = 1024 * 1024;

pub const MAX_GLOBAL_INDEXES: usize = 20;
pub const MAX_LOCAL_INDEXES: usize = 5;

/// Upper bound for `ListTables` limit.
pub const MAX_LIST_TABLES: usize = 100;

/// The type of a key attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyType {
    #[serde(rename = "S")]
    String,
    #[serde(rename = "N")]
    Number,
    #[serde(rename = "B")]
    Binary,
}

/// A key attribute definition (name + type).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyDefinition {
    pub name: String,
    pub key_type: KeyType,
}

impl KeyDefinition {
    pub fn new(name: impl Into<String>, key_type: KeyType) -> Self {
        Self {
            name: name.into(),
            key_type,
        }
    }
}

/// Partition key plus optional sort key, shared by tables and indexes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeySchema {
    pub partition_key: KeyDefinition,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort_key: Option<KeyDefinition>,
}

impl KeySchema {
    /// Names of the key attributes, partition key first.
    pub fn key_names(&self) -> Vec<&str> {
        let mut names = vec![self.partition_key.name.as_str()];
        if let Some(sk) = &self.sort_key {
            names.push(sk.name.as_str());
        }
        names
    }

    pub fn is_key_attribute(&self, name: &str) -> bool {
        self.partition_key.name == name
            || self.sort_key.as_ref().is_some_and(|sk| sk.name == name)
    }
}

/// Table lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TableStatus {
    Creating,
    Active,
    Updating,
    Deleting,
    Deleted,
}

impl TableStatus {
    /// Item reads and writes are served in these states.
    pub fn serves_items(self) -> bool {
        matches!(self, TableStatus::Active | TableStatus::Updating)
    }

    /// Whether `next` is a legal successor of `self`.
    ///
    /// UPDATING is a detour from ACTIVE that returns to ACTIVE; every other
    /// edge only moves forward along CREATING→ACTIVE→DELETING→DELETED.
    pub fn can_transition_to(self, next: TableStatus) -> bool {
        matches!(
            (self, next),
            (TableStatus::Creating, TableStatus::Active)
                | (TableStatus::Active, TableStatus::Updating)
                | (TableStatus::Updating, TableStatus::Active)
                | (TableStatus::Active, TableStatus::Deleting)
                | (TableStatus::Deleting, TableStatus::Deleted)
        )
    }
}

/// Simulated provisioned capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisionedThroughput {
    pub read_capacity_units: u64,
    pub write_capacity_units: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProjectionType {
    #[default]
    All,
    KeysOnly,
    Include,
}

/// Which attributes an index copies from the base item.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Projection {
    pub projection_type: ProjectionType,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub non_key_attributes: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexKind {
    Global,
    Local,
}

/// When index entries are brought up to date relative to the base write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexConsistency {
    /// Updated before the base mutation is acknowledged.
    #[default]
    Strong,
    /// Updated by the propagation worker within the configured staleness bound.
    Eventual,
}

/// A secondary index definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexDefinition {
    pub index_name: String,
    pub kind: IndexKind,
    pub partition_key: KeyDefinition,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort_key: Option<KeyDefinition>,
    #[serde(default)]
    pub projection: Projection,
    #[serde(default)]
    pub consistency: IndexConsistency,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provisioned_throughput: Option<ProvisionedThroughput>,
}

impl IndexDefinition {
    pub fn key_schema(&self) -> KeySchema {
        KeySchema {
            partition_key: self.partition_key.clone(),
            sort_key: self.sort_key.clone(),
        }
    }
}

/// Everything needed to create a table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableDefinition {
    pub table_name: String,
    pub partition_key: KeyDefinition,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort_key: Option<KeyDefinition>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub indexes: Vec<IndexDefinition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provisioned_throughput: Option<ProvisionedThroughput>,
}

impl TableDefinition {
    pub fn key_schema(&self) -> KeySchema {
        KeySchema {
            partition_key: self.partition_key.clone(),
            sort_key: self.sort_key.clone(),
        }
    }

    pub fn index(&self, name: &str) -> Option<&IndexDefinition> {
        self.indexes.iter().find(|idx| idx.index_name == name)
    }
}

/// Time-to-live configuration for a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TtlSpecification {
    pub attribute_name: String,
    pub enabled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IndexStatus {
    Creating,
    Active,
}

/// Runtime view of one secondary index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexDescription {
    pub definition: IndexDefinition,
    pub status: IndexStatus,
    pub item_count: u64,
    /// Set once an entry could not be maintained; the index may be missing
    /// entries until it is rebuilt.
    pub degraded: bool,
}

/// Runtime view of a table, returned by describe/create/delete/update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableDescription {
    pub table_name: String,
    pub table_id: TableId,
    pub status: TableStatus,
    pub partition_key: KeyDefinition,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort_key: Option<KeyDefinition>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub indexes: Vec<IndexDescription>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provisioned_throughput: Option<ProvisionedThroughput>,
    /// Creation time in Unix epoch seconds.
    pub creation_date_time: u64,
    pub item_count: u64,
    pub table_size_bytes: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<TtlSpecification>,
}
