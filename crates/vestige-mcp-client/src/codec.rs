//! JSON-RPC 2.0 message codec
//!
//! Encodes requests and notifications, decodes single and batched responses,
//! and pulls JSON payloads out of Server-Sent-Events `data:` lines.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

use crate::error::{McpClientError, McpClientResult, ProtocolError};

/// JSON-RPC 2.0 version constant
pub const JSONRPC_VERSION: &str = "2.0";

/// Content type announcing an event-stream body
pub const EVENT_STREAM_CONTENT_TYPE: &str = "text/event-stream";

/// Longest body excerpt carried inside an error message
const PREVIEW_LIMIT: usize = 200;

/// Numeric request identifier, monotonic per client
pub type RequestId = u64;

/// Hands out request ids starting at 1; never reused within one client
#[derive(Debug)]
pub struct RequestIdGenerator(AtomicU64);

impl RequestIdGenerator {
    pub fn new() -> Self {
        Self(AtomicU64::new(1))
    }

    pub fn next_id(&self) -> RequestId {
        self.0.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for RequestIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// The `jsonrpc` member, which only ever holds `"2.0"`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum JsonRpcVersion {
    #[serde(rename = "2.0")]
    #[default]
    V2_0,
}

/// A JSON-RPC request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    #[serde(rename = "jsonrpc")]
    pub version: JsonRpcVersion,
    pub id: RequestId,
    pub method: String,
    pub params: Value,
}

impl JsonRpcRequest {
    pub fn new(id: RequestId, method: impl Into<String>, params: Value) -> Self {
        Self {
            version: JsonRpcVersion::V2_0,
            id,
            method: method.into(),
            params,
        }
    }
}

/// A JSON-RPC notification (request without an id)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    #[serde(rename = "jsonrpc")]
    pub version: JsonRpcVersion,
    pub method: String,
    pub params: Value,
}

impl JsonRpcNotification {
    pub fn new(method: impl Into<String>, params: Value) -> Self {
        Self {
            version: JsonRpcVersion::V2_0,
            method: method.into(),
            params,
        }
    }
}

/// How an encoded message is framed on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// Newline-terminated, for stdio pipes
    Line,
    /// Bare JSON, for a single HTTP body
    Body,
}

/// Encode a request for the given framing
pub fn encode_request(request: &JsonRpcRequest, framing: Framing) -> McpClientResult<Vec<u8>> {
    encode(request, framing)
}

/// Encode a notification for the given framing
pub fn encode_notification(
    notification: &JsonRpcNotification,
    framing: Framing,
) -> McpClientResult<Vec<u8>> {
    encode(notification, framing)
}

fn encode<T: Serialize>(message: &T, framing: Framing) -> McpClientResult<Vec<u8>> {
    let mut bytes = serde_json::to_vec(message).map_err(|e| {
        McpClientError::Protocol(ProtocolError::InvalidRequest(format!(
            "Failed to serialize message: {}",
            e
        )))
    })?;
    if framing == Framing::Line {
        bytes.push(b'\n');
    }
    Ok(bytes)
}

/// Whether `value` carries the given request id.
///
/// Numeric ids are compared directly; string ids holding a number are
/// accepted too, since some gateways stringify ids.
pub fn id_matches(value: &Value, expected_id: RequestId) -> bool {
    match value.get("id") {
        Some(Value::Number(n)) => n.as_u64() == Some(expected_id),
        Some(Value::String(s)) => s.parse::<RequestId>().ok() == Some(expected_id),
        _ => false,
    }
}

/// Decode a parsed response and return its `result` member.
///
/// Batches select the element whose id matches `expected_id`, falling back to
/// the first element that carries a `result`.
pub fn decode_response(raw: Value, expected_id: RequestId) -> McpClientResult<Value> {
    let response = match raw {
        Value::Array(items) => select_from_batch(items, expected_id)?,
        other => other,
    };

    let Value::Object(mut object) = response else {
        return Err(McpClientError::invalid_response(format!(
            "expected a JSON object, got {}",
            preview(&response.to_string())
        )));
    };

    if let Some(error) = object.remove("error") {
        let code = error.get("code").and_then(Value::as_i64).unwrap_or(-1);
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("Unknown error")
            .to_string();
        let data = error.get("data").cloned();
        return Err(McpClientError::rpc(code, message, data));
    }

    object.remove("result").ok_or_else(|| {
        McpClientError::invalid_response("response carries neither result nor error")
    })
}

fn select_from_batch(items: Vec<Value>, expected_id: RequestId) -> McpClientResult<Value> {
    let position = items
        .iter()
        .position(|item| id_matches(item, expected_id))
        .or_else(|| items.iter().position(|item| item.get("result").is_some()));

    match position {
        Some(index) => Ok(items.into_iter().nth(index).unwrap_or(Value::Null)),
        None => Err(ProtocolError::NoMatchingResponse(preview(
            &Value::Array(items).to_string(),
        ))
        .into()),
    }
}

/// Extract every JSON payload carried on a `data:` line.
///
/// Malformed payloads are skipped so one corrupt frame cannot hide the rest.
pub fn decode_sse_frames(text: &str) -> Vec<Value> {
    let mut frames = Vec::new();
    for line in text.lines() {
        let Some(payload) = line.trim().strip_prefix("data:") else {
            continue;
        };
        let payload = payload.trim();
        if payload.is_empty() {
            continue;
        }
        match serde_json::from_str::<Value>(payload) {
            Ok(value) => frames.push(value),
            Err(e) => debug!(error = %e, payload = %preview(payload), "Skipping malformed SSE frame"),
        }
    }
    frames
}

/// What an SSE body yielded
#[derive(Debug, Clone, PartialEq)]
pub enum SsePayload {
    Empty,
    Single(Value),
    Multiple(Vec<Value>),
}

impl SsePayload {
    /// Collapse the frames into one value: a lone frame as-is, several as a batch
    pub fn into_value(self) -> Option<Value> {
        match self {
            SsePayload::Empty => None,
            SsePayload::Single(value) => Some(value),
            SsePayload::Multiple(values) => Some(Value::Array(values)),
        }
    }
}

impl From<Vec<Value>> for SsePayload {
    fn from(mut frames: Vec<Value>) -> Self {
        match frames.len() {
            0 => SsePayload::Empty,
            1 => SsePayload::Single(frames.remove(0)),
            _ => SsePayload::Multiple(frames),
        }
    }
}

/// Parse an HTTP body according to its declared content type.
///
/// Event streams go through SSE extraction. Anything else is parsed as JSON,
/// with SSE extraction as a fallback for servers that mislabel the body.
pub fn decode_body(content_type: &str, body: &str) -> McpClientResult<Value> {
    if content_type.contains(EVENT_STREAM_CONTENT_TYPE) {
        return SsePayload::from(decode_sse_frames(body))
            .into_value()
            .ok_or_else(|| {
                McpClientError::invalid_response(format!(
                    "No JSON data found in SSE response: {}",
                    preview(body)
                ))
            });
    }

    match serde_json::from_str::<Value>(body) {
        Ok(value) => Ok(value),
        Err(e) => {
            debug!(error = %e, content_type, "JSON parse failed, trying SSE extraction");
            SsePayload::from(decode_sse_frames(body))
                .into_value()
                .ok_or_else(|| {
                    McpClientError::invalid_response(format!(
                        "Invalid JSON from backend: {}",
                        preview(body)
                    ))
                })
        }
    }
}

/// Truncate text for inclusion in an error message
pub(crate) fn preview(text: &str) -> String {
    match text.char_indices().nth(PREVIEW_LIMIT) {
        Some((index, _)) => format!("{}...", &text[..index]),
        None => text.to_string(),
    }
}
