//! Wire protocol: JSON-over-newlines request/response types.
//!
//! Each request is a single JSON line holding one
//! [`OperationRequest`](ferrolite_core::api::OperationRequest), tagged by
//! `"op"`. Each response is a single JSON line: the operation's output with
//! `"ok": true`, or an [`ErrorResponse`] with `"ok": false`.

use ferrolite_core::api::OperationOutput;
use ferrolite_core::error::Error;
use serde::{Deserialize, Serialize};

/// Code reported for request lines that are not a valid operation.
pub const SERIALIZATION_ERROR: &str = "SerializationException";

/// A response to one request line.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum Response {
    Ok(OkResponse),
    Error(ErrorResponse),
}

#[derive(Debug, Serialize)]
pub struct OkResponse {
    pub ok: bool,
    #[serde(flatten)]
    pub output: OperationOutput,
}

/// Error response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorResponse {
    #[serde(default)]
    pub ok: bool,
    /// DynamoDB exception name, e.g. `ResourceNotFoundException`.
    pub error: String,
    pub message: String,
    /// Whether the same request may succeed if retried.
    #[serde(default)]
    pub retryable: bool,
}

impl Response {
    pub fn ok(output: OperationOutput) -> Self {
        Response::Ok(OkResponse { ok: true, output })
    }

    pub fn error(error: impl Into<String>, message: impl Into<String>) -> Self {
        Response::Error(ErrorResponse {
            ok: false,
            error: error.into(),
            message: message.into(),
            retryable: false,
        })
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Response::Ok(_))
    }
}

impl From<&Error> for Response {
    fn from(err: &Error) -> Self {
        Response::Error(ErrorResponse {
            ok: false,
            error: err.kind().code().to_string(),
            message: err.to_string(),
            retryable: err.is_retryable(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferrolite_core::api::request::ListTablesOutput;
    use ferrolite_core::error::WriteError;
    use serde_json::json;

    #[test]
    fn test_ok_response_shape() {
        let resp = Response::ok(OperationOutput::ListTables(ListTablesOutput {
            table_names: vec!["users".into()],
            last_evaluated_table_name: None,
        }));
        let value = serde_json::to_value(&resp).unwrap();
        assert_eq!(
            value,
            json!({"ok": true, "op": "list_tables", "table_names": ["users"]})
        );
    }

    #[test]
    fn test_error_response_shape() {
        let err: Error = WriteError::ThroughputExceeded("users".into()).into();
        let value = serde_json::to_value(Response::from(&err)).unwrap();
        assert_eq!(value["ok"], json!(false));
        assert_eq!(value["error"], json!("ProvisionedThroughputExceededException"));
        assert_eq!(value["retryable"], json!(true));
    }
}
