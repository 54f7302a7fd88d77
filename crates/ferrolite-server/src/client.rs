//! Client library for connecting to a `ferrolite-server` over TCP.
//!
//! Each method serializes a JSON-line request, sends it, reads a JSON-line
//! response, and returns the parsed result.

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, ToSocketAddrs};

use ferrolite_core::api::request::{
    BatchGetItemInput, BatchGetItemOutput, BatchWriteItemInput, BatchWriteItemOutput,
    CreateTableInput, DeleteItemInput, GetItemInput, ListTablesInput, PageOutput,
    PutItemInput, QueryInput, ScanInput, TableNameInput, UpdateItemInput, UpdateTableInput,
    UpdateTimeToLiveInput, WriteOutput,
};
use ferrolite_core::api::{OperationOutput, OperationRequest, ReturnConsumedCapacity};
use ferrolite_core::types::{TableDescription, TtlSpecification};
use ferrolite_core::value::Item;

use crate::error::ClientError;
use crate::protocol::ErrorResponse;

/// Result type alias for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;

/// Client for a Ferrolite server.
pub struct FerroliteClient {
    reader: BufReader<OwnedReadHalf>,
    writer: BufWriter<OwnedWriteHalf>,
    line_buf: String,
}

macro_rules! expect_output {
    ($output:expr, $variant:ident) => {
        match $output {
            OperationOutput::$variant(out) => Ok(out),
            other => Err(ClientError::Protocol(format!(
                "expected {} output, got {other:?}",
                stringify!($variant)
            ))),
        }
    };
}

impl FerroliteClient {
    /// Connect to a Ferrolite server at `addr`.
    pub async fn connect(addr: impl ToSocketAddrs) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        let (read_half, write_half) = stream.into_split();
        Ok(Self {
            reader: BufReader::new(read_half),
            writer: BufWriter::new(write_half),
            line_buf: String::new(),
        })
    }

    /// Send any operation and return its output.
    pub async fn execute(&mut self, request: &OperationRequest) -> Result<OperationOutput> {
        let value = serde_json::to_value(request).map_err(ClientError::Serialization)?;
        let resp = self.send_request(&value).await?;
        output_from_response(resp)
    }

    pub async fn create_table(&mut self, input: CreateTableInput) -> Result<TableDescription> {
        let output = self.execute(&OperationRequest::CreateTable(input)).await?;
        Ok(expect_output!(output, CreateTable)?.table_description)
    }

    pub async fn delete_table(&mut self, table: &str) -> Result<TableDescription> {
        let output = self
            .execute(&OperationRequest::DeleteTable(TableNameInput {
                table_name: table.to_string(),
            }))
            .await?;
        Ok(expect_output!(output, DeleteTable)?.table_description)
    }

    pub async fn describe_table(&mut self, table: &str) -> Result<TableDescription> {
        let output = self
            .execute(&OperationRequest::DescribeTable(TableNameInput {
                table_name: table.to_string(),
            }))
            .await?;
        Ok(expect_output!(output, DescribeTable)?.table_description)
    }

    /// All table names, following pagination.
    pub async fn list_tables(&mut self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let mut start = None;
        loop {
            let output = self
                .execute(&OperationRequest::ListTables(ListTablesInput {
                    exclusive_start_table_name: start,
                    limit: None,
                }))
                .await?;
            let page = expect_output!(output, ListTables)?;
            names.extend(page.table_names);
            match page.last_evaluated_table_name {
                Some(last) => start = Some(last),
                None => return Ok(names),
            }
        }
    }

    pub async fn update_table(&mut self, input: UpdateTableInput) -> Result<TableDescription> {
        let output = self.execute(&OperationRequest::UpdateTable(input)).await?;
        Ok(expect_output!(output, UpdateTable)?.table_description)
    }

    pub async fn update_time_to_live(
        &mut self,
        table: &str,
        attribute_name: &str,
        enabled: bool,
    ) -> Result<Option<TtlSpecification>> {
        let output = self
            .execute(&OperationRequest::UpdateTimeToLive(UpdateTimeToLiveInput {
                table_name: table.to_string(),
                attribute_name: attribute_name.to_string(),
                enabled,
            }))
            .await?;
        Ok(expect_output!(output, UpdateTimeToLive)?.time_to_live)
    }

    /// Unconditionally write `item`.
    pub async fn put_item(&mut self, table: &str, item: Item) -> Result<WriteOutput> {
        self.put_item_with(PutItemInput {
            table_name: table.to_string(),
            item,
            condition: None,
            return_values: Default::default(),
            return_consumed_capacity: ReturnConsumedCapacity::None,
        })
        .await
    }

    pub async fn put_item_with(&mut self, input: PutItemInput) -> Result<WriteOutput> {
        let output = self.execute(&OperationRequest::PutItem(input)).await?;
        expect_output!(output, PutItem)
    }

    /// Get an item by its key attributes.
    pub async fn get_item(&mut self, table: &str, key: Item, consistent_read: bool) -> Result<Option<Item>> {
        let output = self
            .execute(&OperationRequest::GetItem(GetItemInput {
                table_name: table.to_string(),
                key,
                consistent_read,
                strict: false,
                projection: None,
                return_consumed_capacity: ReturnConsumedCapacity::None,
            }))
            .await?;
        Ok(expect_output!(output, GetItem)?.item)
    }

    pub async fn update_item(&mut self, input: UpdateItemInput) -> Result<WriteOutput> {
        let output = self.execute(&OperationRequest::UpdateItem(input)).await?;
        expect_output!(output, UpdateItem)
    }

    pub async fn delete_item(&mut self, input: DeleteItemInput) -> Result<WriteOutput> {
        let output = self.execute(&OperationRequest::DeleteItem(input)).await?;
        expect_output!(output, DeleteItem)
    }

    pub async fn query(&mut self, input: QueryInput) -> Result<PageOutput> {
        let output = self.execute(&OperationRequest::Query(input)).await?;
        expect_output!(output, Query)
    }

    pub async fn scan(&mut self, input: ScanInput) -> Result<PageOutput> {
        let output = self.execute(&OperationRequest::Scan(input)).await?;
        expect_output!(output, Scan)
    }

    pub async fn batch_get_item(&mut self, input: BatchGetItemInput) -> Result<BatchGetItemOutput> {
        let output = self.execute(&OperationRequest::BatchGetItem(input)).await?;
        expect_output!(output, BatchGetItem)
    }

    pub async fn batch_write_item(&mut self, input: BatchWriteItemInput) -> Result<BatchWriteItemOutput> {
        let output = self.execute(&OperationRequest::BatchWriteItem(input)).await?;
        expect_output!(output, BatchWriteItem)
    }

    /// Send one raw line and return the decoded response object.
    pub async fn send_raw(&mut self, line: &str) -> Result<Value> {
        self.writer.write_all(line.trim_end().as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        self.writer.flush().await?;
        self.read_response().await
    }

    async fn send_request(&mut self, req: &Value) -> Result<Value> {
        let mut data = serde_json::to_vec(req).map_err(ClientError::Serialization)?;
        data.push(b'\n');
        self.writer.write_all(&data).await?;
        self.writer.flush().await?;
        self.read_response().await
    }

    async fn read_response(&mut self) -> Result<Value> {
        self.line_buf.clear();
        let n = self.reader.read_line(&mut self.line_buf).await?;
        if n == 0 {
            return Err(ClientError::Disconnected);
        }

        let resp: Value =
            serde_json::from_str(self.line_buf.trim()).map_err(ClientError::Serialization)?;
        Ok(resp)
    }
}

// ---------------------------------------------------------------------------
// Response helpers
// ---------------------------------------------------------------------------

fn output_from_response(resp: Value) -> Result<OperationOutput> {
    match resp.get("ok").and_then(Value::as_bool) {
        Some(true) => serde_json::from_value(resp).map_err(ClientError::Serialization),
        Some(false) => {
            let err: ErrorResponse =
                serde_json::from_value(resp).map_err(ClientError::Serialization)?;
            Err(ClientError::Server(err))
        }
        None => Err(ClientError::Protocol(format!(
            "response without an ok flag: {resp}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_error_response_becomes_server_error() {
        let err = output_from_response(json!({
            "ok": false,
            "error": "ResourceNotFoundException",
            "message": "requested resource not found: table 'x'",
            "retryable": false
        }))
        .unwrap_err();
        assert_eq!(err.code(), Some("ResourceNotFoundException"));
    }

    #[test]
    fn test_ok_response_decodes_output() {
        let output = output_from_response(json!({
            "ok": true,
            "op": "get_item"
        }))
        .unwrap();
        assert_eq!(
            output,
            OperationOutput::GetItem(Default::default())
        );
    }

    #[test]
    fn test_missing_ok_flag_is_protocol_error() {
        let err = output_from_response(json!({"op": "get_item"})).unwrap_err();
        assert!(matches!(err, ClientError::Protocol(_)));
    }
}
