//! Error types for all Ferrolite engine operations.
//!
//! Every error surfaces to the caller as a structured value. [`Error::kind`]
//! maps each variant onto the DynamoDB exception taxonomy so transports can
//! report a stable error code.

use std::io;
use thiserror::Error;

use crate::types::{KeyType, TableStatus};

/// Top-level error type for engine operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Resource(#[from] ResourceError),

    #[error(transparent)]
    Write(#[from] WriteError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Encoding(#[from] EncodingError),

    #[error("engine is shutting down")]
    ShuttingDown,

    #[error("internal error: {0}")]
    Internal(String),
}

/// Malformed requests, rejected before storage is touched.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("missing key attribute: {0}")]
    MissingKeyAttribute(String),

    #[error("key type mismatch for attribute '{name}': expected {expected:?}, got {actual}")]
    KeyTypeMismatch {
        name: String,
        expected: KeyType,
        actual: &'static str,
    },

    #[error("key attribute '{0}' must not be empty")]
    EmptyKeyValue(String),

    #[error("key contains attribute '{0}' that is not part of the key schema")]
    UnexpectedKeyAttribute(String),

    #[error("item size of {actual} bytes exceeds maximum of {max} bytes")]
    ItemTooLarge { max: usize, actual: usize },

    #[error("key attribute '{name}' exceeds maximum size of {max} bytes (got {actual})")]
    KeyTooLarge {
        name: String,
        max: usize,
        actual: usize,
    },

    #[error("invalid table name '{0}': must be 3-255 characters of [A-Za-z0-9_.-]")]
    InvalidTableName(String),

    #[error("invalid index definition: {0}")]
    InvalidIndex(String),

    #[error("invalid expression: {0}")]
    InvalidExpression(String),

    #[error("invalid update on '{path}': {message}")]
    InvalidUpdate { path: String, message: String },

    #[error("cannot update key attribute '{0}'")]
    KeyAttributeUpdate(String),

    #[error("invalid number value '{0}'")]
    InvalidNumber(String),

    #[error("invalid set on attribute '{0}': sets must be non-empty and contain no duplicates")]
    InvalidSet(String),

    #[error("invalid exclusive start key: {0}")]
    InvalidCursor(String),

    #[error("provided list of item keys contains duplicates")]
    DuplicateBatchKey,

    #[error("{0}")]
    InvalidParameter(String),
}

/// Missing or mid-transition resources.
#[derive(Debug, Error)]
pub enum ResourceError {
    #[error("requested resource not found: table '{0}'")]
    TableNotFound(String),

    #[error("requested resource not found: index '{index}' on table '{table}'")]
    IndexNotFound { table: String, index: String },

    #[error("requested resource not found: no item with the given key in table '{0}'")]
    ItemNotFound(String),

    #[error("table already exists: {0}")]
    TableAlreadyExists(String),

    #[error("attempt to change a resource which is still in use: table '{table}' is {status:?}")]
    TableInUse { table: String, status: TableStatus },
}

/// Failures of the write path that leave stored state unchanged.
#[derive(Debug, Error)]
pub enum WriteError {
    #[error("the conditional request failed")]
    ConditionalCheckFailed,

    #[error("provisioned throughput exceeded for '{0}'")]
    ThroughputExceeded(String),

    #[error("timed out after {waited_ms}ms waiting for a contended key on table '{table}'")]
    KeyContention { table: String, waited_ms: u64 },
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("corrupted storage: {0}")]
    Corrupted(String),

    #[error("storage directory is locked by another process")]
    FileLocked,

    #[error("write-ahead log is unusable after a failed rollback")]
    LogPoisoned,

    #[error("serialization error: {0}")]
    Serialization(String),
}

#[derive(Debug, Error)]
pub enum EncodingError {
    #[error("number is outside the encodable key range")]
    NumberOutOfRange,

    #[error("invalid key type tag: {0}")]
    InvalidTypeTag(u8),

    #[error("malformed encoded key")]
    MalformedKey,
}

/// The taxonomy every error is reported under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    ResourceNotFound,
    ResourceInUse,
    ConditionalCheckFailed,
    ProvisionedThroughputExceeded,
    Contention,
    Internal,
}

impl ErrorKind {
    /// DynamoDB exception name for this kind.
    pub fn code(self) -> &'static str {
        match self {
            ErrorKind::Validation => "ValidationException",
            ErrorKind::ResourceNotFound => "ResourceNotFoundException",
            ErrorKind::ResourceInUse => "ResourceInUseException",
            ErrorKind::ConditionalCheckFailed => "ConditionalCheckFailedException",
            ErrorKind::ProvisionedThroughputExceeded => "ProvisionedThroughputExceededException",
            ErrorKind::Contention => "TransactionConflictException",
            ErrorKind::Internal => "InternalServerError",
        }
    }
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Validation(_) => ErrorKind::Validation,
            Error::Encoding(EncodingError::NumberOutOfRange) => ErrorKind::Validation,
            Error::Encoding(_) => ErrorKind::Internal,
            Error::Resource(ResourceError::TableNotFound(_))
            | Error::Resource(ResourceError::IndexNotFound { .. })
            | Error::Resource(ResourceError::ItemNotFound(_)) => ErrorKind::ResourceNotFound,
            Error::Resource(ResourceError::TableAlreadyExists(_))
            | Error::Resource(ResourceError::TableInUse { .. }) => ErrorKind::ResourceInUse,
            Error::Write(WriteError::ConditionalCheckFailed) => ErrorKind::ConditionalCheckFailed,
            Error::Write(WriteError::ThroughputExceeded(_)) => {
                ErrorKind::ProvisionedThroughputExceeded
            }
            Error::Write(WriteError::KeyContention { .. }) => ErrorKind::Contention,
            Error::Storage(_) | Error::ShuttingDown | Error::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Whether the same request may succeed if retried unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::ProvisionedThroughputExceeded | ErrorKind::Contention
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
