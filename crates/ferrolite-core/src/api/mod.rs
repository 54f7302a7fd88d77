//! Public API: engine handle, request dispatch, builder-pattern operations,
//! expressions and batching.

mod batch;
pub mod builders;
pub mod condition;
pub mod dispatcher;
pub mod engine;
mod items;
pub mod key_utils;
pub mod projection;
pub mod query;
mod reads;
pub mod request;
mod tables;
pub mod update;

pub use builders::{
    BatchGetItemBuilder, BatchWriteItemBuilder, CreateTableBuilder, DeleteItemBuilder,
    GetItemBuilder, PutItemBuilder, QueryBuilder, ScanBuilder, UpdateItemBuilder,
    UpdateTableBuilder,
};
pub use condition::ConditionExpr;
pub use dispatcher::Phase;
pub use engine::Engine;
pub use query::{KeyCondition, SortKeyCondition};
pub use request::{
    OperationOutput, OperationRequest, OperationResult, ReturnConsumedCapacity, ReturnValues,
    Select, WriteRequest,
};
pub use update::UpdateAction;
