//! Request dispatch.
//!
//! Every request walks RECEIVED → VALIDATED → TABLE_LOOKUP → EXECUTING and
//! ends COMPLETED or FAILED. Validation here is stateless: it checks request
//! shape and expressions before any table is looked up. Checks that need the
//! table's key schema run in the executors after lookup.

use tracing::{debug, error};

use crate::catalog::ops::{validate_definition, validate_name};
use crate::error::{Error, ErrorKind, ValidationError};
use crate::types::{MAX_BATCH_GET_KEYS, MAX_BATCH_WRITE_ITEMS, MAX_LIST_TABLES};

use super::batch;
use super::engine::EngineInner;
use super::items;
use super::reads;
use super::request::{OperationOutput, OperationRequest, OperationResult, ReturnValues, Select};
use super::tables;

/// Upper bound for `total_segments` of a parallel scan.
const MAX_TOTAL_SEGMENTS: u32 = 1_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Received,
    Validated,
    TableLookup,
    Executing,
    Completed,
    Failed,
}

/// Phase logging for one request.
pub(crate) struct Trace {
    op: &'static str,
    table: Option<String>,
}

impl Trace {
    fn new(request: &OperationRequest) -> Self {
        Self {
            op: request.name(),
            table: request.table_name().map(str::to_string),
        }
    }

    pub(crate) fn enter(&self, phase: Phase) {
        debug!(op = self.op, table = self.table.as_deref(), ?phase, "request phase");
    }

    fn failed(&self, err: &Error) {
        if err.kind() == ErrorKind::Internal {
            error!(op = self.op, table = self.table.as_deref(), error = %err, "request failed");
        } else {
            debug!(
                op = self.op,
                table = self.table.as_deref(),
                phase = ?Phase::Failed,
                code = err.kind().code(),
                error = %err,
                "request phase"
            );
        }
    }
}

pub(crate) fn dispatch(inner: &EngineInner, request: OperationRequest) -> OperationResult {
    let _op = inner.admit()?;
    let trace = Trace::new(&request);
    trace.enter(Phase::Received);

    let result = validate(&request).and_then(|()| {
        trace.enter(Phase::Validated);
        route(inner, &trace, request)
    });
    match &result {
        Ok(_) => trace.enter(Phase::Completed),
        Err(e) => trace.failed(e),
    }
    result
}

fn route(inner: &EngineInner, trace: &Trace, request: OperationRequest) -> OperationResult {
    let output = match request {
        OperationRequest::CreateTable(input) => {
            OperationOutput::CreateTable(tables::create_table(inner, trace, input)?)
        }
        OperationRequest::DeleteTable(input) => {
            OperationOutput::DeleteTable(tables::delete_table(inner, trace, input)?)
        }
        OperationRequest::DescribeTable(input) => {
            OperationOutput::DescribeTable(tables::describe_table(inner, trace, input)?)
        }
        OperationRequest::ListTables(input) => {
            OperationOutput::ListTables(tables::list_tables(inner, trace, input))
        }
        OperationRequest::UpdateTable(input) => {
            OperationOutput::UpdateTable(tables::update_table(inner, trace, input)?)
        }
        OperationRequest::UpdateTimeToLive(input) => {
            OperationOutput::UpdateTimeToLive(tables::update_time_to_live(inner, trace, input)?)
        }
        OperationRequest::DescribeTimeToLive(input) => {
            OperationOutput::DescribeTimeToLive(tables::describe_time_to_live(inner, trace, input)?)
        }
        OperationRequest::PutItem(input) => {
            OperationOutput::PutItem(items::put_item(inner, trace, input)?)
        }
        OperationRequest::GetItem(input) => {
            OperationOutput::GetItem(items::get_item(inner, trace, input)?)
        }
        OperationRequest::UpdateItem(input) => {
            OperationOutput::UpdateItem(items::update_item(inner, trace, input)?)
        }
        OperationRequest::DeleteItem(input) => {
            OperationOutput::DeleteItem(items::delete_item(inner, trace, input)?)
        }
        OperationRequest::Query(input) => OperationOutput::Query(reads::query(inner, trace, input)?),
        OperationRequest::Scan(input) => OperationOutput::Scan(reads::scan(inner, trace, input)?),
        OperationRequest::BatchGetItem(input) => {
            OperationOutput::BatchGetItem(batch::batch_get_item(inner, trace, input)?)
        }
        OperationRequest::BatchWriteItem(input) => {
            OperationOutput::BatchWriteItem(batch::batch_write_item(inner, trace, input)?)
        }
    };
    Ok(output)
}

fn invalid(message: impl Into<String>) -> Error {
    ValidationError::InvalidParameter(message.into()).into()
}

fn validate_projection(projection: Option<&[String]>) -> Result<(), Error> {
    if let Some(paths) = projection {
        if paths.is_empty() {
            return Err(invalid("projection must name at least one attribute"));
        }
        if paths.iter().any(|p| p.is_empty() || p.split('.').any(str::is_empty)) {
            return Err(invalid("projection contains an empty attribute path"));
        }
    }
    Ok(())
}

fn validate_limit(limit: Option<usize>) -> Result<(), Error> {
    if limit == Some(0) {
        return Err(invalid("limit must be at least 1"));
    }
    Ok(())
}

/// Stateless request checks, run before any table is looked up.
fn validate(request: &OperationRequest) -> Result<(), Error> {
    if let Some(name) = request.table_name() {
        validate_name(name)?;
    }
    match request {
        OperationRequest::CreateTable(input) => {
            validate_definition(&tables::definition_of(input))?;
        }
        OperationRequest::ListTables(input) => {
            if input.limit.is_some_and(|l| l == 0 || l > MAX_LIST_TABLES) {
                return Err(invalid(format!("limit must be between 1 and {MAX_LIST_TABLES}")));
            }
        }
        OperationRequest::UpdateTable(input) => {
            if input.provisioned_throughput.is_none()
                && input.create_index.is_none()
                && input.delete_index.is_none()
            {
                return Err(invalid("at least one table change must be requested"));
            }
        }
        OperationRequest::UpdateTimeToLive(input) => {
            if input.attribute_name.is_empty() || input.attribute_name.len() > 255 {
                return Err(invalid("TTL attribute name must be 1-255 characters"));
            }
        }
        OperationRequest::PutItem(input) => {
            if !matches!(input.return_values, ReturnValues::None | ReturnValues::AllOld) {
                return Err(invalid("PutItem supports only NONE and ALL_OLD return values"));
            }
            if let Some(condition) = &input.condition {
                condition.validate()?;
            }
        }
        OperationRequest::GetItem(input) => validate_projection(input.projection.as_deref())?,
        OperationRequest::UpdateItem(input) => {
            if input.actions.is_empty() {
                return Err(invalid("UpdateItem requires at least one action"));
            }
            if let Some(condition) = &input.condition {
                condition.validate()?;
            }
        }
        OperationRequest::DeleteItem(input) => {
            if !matches!(input.return_values, ReturnValues::None | ReturnValues::AllOld) {
                return Err(invalid("DeleteItem supports only NONE and ALL_OLD return values"));
            }
            if let Some(condition) = &input.condition {
                condition.validate()?;
            }
        }
        OperationRequest::Query(input) => {
            validate_limit(input.limit)?;
            validate_projection(input.projection.as_deref())?;
            if input.select == Select::Count && input.projection.is_some() {
                return Err(invalid("COUNT select cannot be combined with a projection"));
            }
            if let Some(filter) = &input.filter {
                filter.validate()?;
            }
        }
        OperationRequest::Scan(input) => {
            validate_limit(input.limit)?;
            validate_projection(input.projection.as_deref())?;
            if input.select == Select::Count && input.projection.is_some() {
                return Err(invalid("COUNT select cannot be combined with a projection"));
            }
            if let Some(filter) = &input.filter {
                filter.validate()?;
            }
            match (input.segment, input.total_segments) {
                (None, None) => {}
                (Some(segment), Some(total)) => {
                    if total == 0 || total > MAX_TOTAL_SEGMENTS {
                        return Err(invalid(format!(
                            "total_segments must be between 1 and {MAX_TOTAL_SEGMENTS}"
                        )));
                    }
                    if segment >= total {
                        return Err(invalid("segment must be less than total_segments"));
                    }
                }
                _ => return Err(invalid("segment and total_segments must be given together")),
            }
        }
        OperationRequest::BatchGetItem(input) => {
            let total: usize = input.requests.values().map(|r| r.keys.len()).sum();
            if total == 0 || total > MAX_BATCH_GET_KEYS {
                return Err(invalid(format!(
                    "BatchGetItem takes between 1 and {MAX_BATCH_GET_KEYS} keys, got {total}"
                )));
            }
            for (table, request) in &input.requests {
                validate_name(table)?;
                if request.keys.is_empty() {
                    return Err(invalid(format!("no keys requested for table '{table}'")));
                }
                validate_projection(request.projection.as_deref())?;
            }
        }
        OperationRequest::BatchWriteItem(input) => {
            let total: usize = input.requests.values().map(Vec::len).sum();
            if total == 0 || total > MAX_BATCH_WRITE_ITEMS {
                return Err(invalid(format!(
                    "BatchWriteItem takes between 1 and {MAX_BATCH_WRITE_ITEMS} requests, got {total}"
                )));
            }
            for (table, requests) in &input.requests {
                validate_name(table)?;
                if requests.is_empty() {
                    return Err(invalid(format!("no requests for table '{table}'")));
                }
            }
        }
        OperationRequest::DeleteTable(_)
        | OperationRequest::DescribeTable(_)
        | OperationRequest::DescribeTimeToLive(_) => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::condition::ConditionExpr;
    use crate::api::request::{PutItemInput, ReturnConsumedCapacity, ScanInput};
    use crate::value::Item;

    fn scan(segment: Option<u32>, total: Option<u32>) -> OperationRequest {
        OperationRequest::Scan(ScanInput {
            table_name: "table".into(),
            index_name: None,
            filter: None,
            projection: None,
            limit: None,
            exclusive_start_key: None,
            segment,
            total_segments: total,
            consistent_read: false,
            select: Select::AllAttributes,
            return_consumed_capacity: ReturnConsumedCapacity::None,
        })
    }

    #[test]
    fn test_scan_segments_must_pair() {
        assert!(validate(&scan(None, None)).is_ok());
        assert!(validate(&scan(Some(1), Some(4))).is_ok());
        assert!(validate(&scan(Some(4), Some(4))).is_err());
        assert!(validate(&scan(Some(0), None)).is_err());
        assert!(validate(&scan(None, Some(0))).is_err());
    }

    #[test]
    fn test_invalid_condition_rejected_before_lookup() {
        let request = OperationRequest::PutItem(PutItemInput {
            table_name: "table".into(),
            item: Item::new(),
            condition: Some(ConditionExpr::And(vec![])),
            return_values: ReturnValues::None,
            return_consumed_capacity: ReturnConsumedCapacity::None,
        });
        let err = validate(&request).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn test_put_rejects_updated_return_values() {
        let request = OperationRequest::PutItem(PutItemInput {
            table_name: "table".into(),
            item: Item::new(),
            condition: None,
            return_values: ReturnValues::UpdatedNew,
            return_consumed_capacity: ReturnConsumedCapacity::None,
        });
        assert!(validate(&request).is_err());
    }

    #[test]
    fn test_bad_table_name() {
        let request = scan(None, None);
        let OperationRequest::Scan(mut input) = request else {
            unreachable!()
        };
        input.table_name = "a!".into();
        let err = validate(&OperationRequest::Scan(input)).unwrap_err();
        assert!(matches!(err, Error::Validation(ValidationError::InvalidTableName(_))));
    }
}
