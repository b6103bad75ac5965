//! Error types for MCP client operations

use serde_json::Value;
use thiserror::Error;

/// Result type for MCP client operations
pub type McpClientResult<T> = Result<T, McpClientError>;

/// Error taxonomy surfaced by the client
#[derive(Error, Debug)]
pub enum McpClientError {
    /// Backend unreachable or the connection closed underneath us.
    /// Clears liveness and session state; safe to retry after reconnect.
    #[error("Connection error: {0}")]
    Connection(String),

    /// The round trip exceeded its bound. Outcome on the backend is unknown.
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Well-formed transport exchange carrying invalid or unexpected protocol content
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The tool ran and reported failure (`isError: true`)
    #[error("Tool error: {0}")]
    Tool(String),

    /// Illegal connection state transition
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Protocol-level errors
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Invalid JSON-RPC response: {0}")]
    InvalidResponse(String),

    #[error("No matching response in batch: {0}")]
    NoMatchingResponse(String),

    #[error("HTTP {status}: {body}")]
    HttpStatus { status: u16, body: String },

    #[error("MCP error {code}: {message}")]
    Rpc {
        code: i64,
        message: String,
        data: Option<Value>,
    },

    #[error("Unsupported protocol version: requested {requested}, server answered {received}")]
    UnsupportedVersion { requested: String, received: String },

    #[error("Invalid JSON-RPC request: {0}")]
    InvalidRequest(String),
}

/// Connection state machine errors
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Invalid session state: expected {expected}, found {actual}")]
    InvalidState { expected: String, actual: String },
}

impl McpClientError {
    /// Create a connection error
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection(message.into())
    }

    /// Create a timeout error
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::Timeout(message.into())
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a protocol error from a JSON-RPC error object
    pub fn rpc(code: i64, message: impl Into<String>, data: Option<Value>) -> Self {
        Self::Protocol(ProtocolError::Rpc {
            code,
            message: message.into(),
            data,
        })
    }

    /// Create a protocol error for a malformed response
    pub fn invalid_response(message: impl Into<String>) -> Self {
        Self::Protocol(ProtocolError::InvalidResponse(message.into()))
    }

    /// Whether the backend reported an invalid, expired or unknown session.
    ///
    /// Best-effort substring match on backend-supplied text only (JSON-RPC
    /// error messages and non-2xx HTTP bodies): it must mention "session"
    /// together with one of "invalid", "not found" or "no valid". Backends
    /// that reword their errors will slip past this check.
    pub fn is_stale_session(&self) -> bool {
        let text = match self {
            Self::Protocol(ProtocolError::Rpc { message, .. }) => message,
            Self::Protocol(ProtocolError::HttpStatus { body, .. }) => body,
            _ => return false,
        };
        let message = text.to_lowercase();
        message.contains("session")
            && (message.contains("invalid")
                || message.contains("not found")
                || message.contains("no valid"))
    }

    pub fn is_connection_error(&self) -> bool {
        matches!(self, Self::Connection(_))
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }

    pub fn is_protocol_error(&self) -> bool {
        matches!(self, Self::Protocol(_))
    }

    pub fn is_tool_error(&self) -> bool {
        matches!(self, Self::Tool(_))
    }

    /// Get the JSON-RPC error code if the backend returned an error object
    pub fn error_code(&self) -> Option<i64> {
        match self {
            Self::Protocol(ProtocolError::Rpc { code, .. }) => Some(*code),
            _ => None,
        }
    }
}
