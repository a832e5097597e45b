//! JSON-RPC framing and result shapes for the MCP Streamable HTTP transport.

use crate::domain::error::{AppError, Result};
use crate::domain::event_context::{Row, SchemaDescription};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const PROTOCOL_VERSION: &str = "2025-03-26";
pub const SESSION_HEADER: &str = "mcp-session-id";
pub const PROTOCOL_VERSION_HEADER: &str = "mcp-protocol-version";

#[derive(Debug, Serialize)]
pub struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<u64>,
    method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<Value>,
}

impl<'a> JsonRpcRequest<'a> {
    pub fn call(id: u64, method: &'a str, params: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id: Some(id),
            method,
            params: Some(params),
        }
    }

    pub fn notification(method: &'a str) -> Self {
        Self {
            jsonrpc: "2.0",
            id: None,
            method,
            params: None,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct JsonRpcResponse {
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
}

impl JsonRpcResponse {
    fn answers(&self, id: u64) -> bool {
        self.id.as_ref().and_then(Value::as_u64) == Some(id)
    }

    pub fn into_result(self) -> std::result::Result<Value, String> {
        if let Some(error) = self.error {
            return Err(format!("{} (code {})", error.message, error.code));
        }
        self.result
            .ok_or_else(|| "Response carried neither result nor error".to_string())
    }
}

#[derive(Debug, Deserialize)]
pub struct ReadResourceResult {
    #[serde(default)]
    pub contents: Vec<ResourceContents>,
}

#[derive(Debug, Deserialize)]
pub struct ResourceContents {
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CallToolResult {
    #[serde(default)]
    pub content: Vec<ToolContent>,
    #[serde(default, rename = "isError")]
    pub is_error: bool,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolContent {
    Text { text: String },
    #[serde(other)]
    Other,
}

pub fn initialize_params(client_name: &str) -> Value {
    serde_json::json!({
        "protocolVersion": PROTOCOL_VERSION,
        "capabilities": {},
        "clientInfo": {
            "name": client_name,
            "version": env!("CARGO_PKG_VERSION"),
        }
    })
}

/// Picks the response for request `id` out of a POST reply, which is either a
/// plain JSON body or an SSE stream of JSON-RPC messages.
pub fn parse_rpc_body(
    content_type: &str,
    body: &str,
    id: u64,
) -> std::result::Result<JsonRpcResponse, String> {
    if !content_type.starts_with("text/event-stream") {
        return serde_json::from_str(body)
            .map_err(|e| format!("Malformed JSON-RPC response: {}", e));
    }

    for data in sse_data_payloads(body) {
        if let Ok(response) = serde_json::from_str::<JsonRpcResponse>(&data) {
            if response.answers(id) {
                return Ok(response);
            }
        }
    }
    Err(format!("Event stream ended without a response to request {}", id))
}

fn sse_data_payloads(body: &str) -> Vec<String> {
    let mut payloads = Vec::new();
    let mut current: Vec<&str> = Vec::new();

    for line in body.lines() {
        if line.is_empty() {
            if !current.is_empty() {
                payloads.push(current.join("\n"));
                current.clear();
            }
        } else if let Some(data) = line.strip_prefix("data:") {
            current.push(data.strip_prefix(' ').unwrap_or(data));
        }
    }
    if !current.is_empty() {
        payloads.push(current.join("\n"));
    }
    payloads
}

pub fn schema_from_resource(result: Value) -> Result<SchemaDescription> {
    let unavailable = || {
        AppError::SchemaUnavailable(
            "Could not fetch a valid text schema from the MCP resource.".to_string(),
        )
    };
    let result: ReadResourceResult = serde_json::from_value(result).map_err(|_| unavailable())?;
    result
        .contents
        .into_iter()
        .next()
        .and_then(|content| content.text)
        .filter(|text| !text.trim().is_empty())
        .map(SchemaDescription::new)
        .ok_or_else(unavailable)
}

/// Rows from a `tools/call` result whose first content block is text holding a
/// JSON array of objects.
pub fn rows_from_tool_result(result: Value) -> Result<Vec<Row>> {
    let result: CallToolResult = serde_json::from_value(result)
        .map_err(|e| AppError::QueryError(format!("Malformed tool result: {}", e)))?;

    let first_text = match result.content.into_iter().next() {
        Some(ToolContent::Text { text }) => Some(text),
        _ => None,
    };

    if result.is_error {
        return Err(AppError::QueryError(
            first_text.unwrap_or_else(|| "Query tool reported an error".to_string()),
        ));
    }

    let text = first_text.ok_or_else(|| {
        AppError::QueryError("Tool result has no leading text content".to_string())
    })?;
    let values: Vec<Value> = serde_json::from_str(&text)
        .map_err(|e| AppError::QueryError(format!("Tool result is not a JSON array: {}", e)))?;

    values
        .into_iter()
        .map(|value| match value {
            Value::Object(row) => Ok(row),
            other => Err(AppError::QueryError(format!("Expected a row object, got {}", other))),
        })
        .collect()
}
