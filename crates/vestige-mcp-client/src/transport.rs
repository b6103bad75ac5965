//! Transport layer for MCP client

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

use crate::codec::{JsonRpcNotification, JsonRpcRequest};
use crate::config::{ClientConfig, TransportConfig};
use crate::error::{McpClientError, McpClientResult};

pub mod http;
pub mod sse;
pub mod stdio;

// Re-export transport implementations
pub use http::HttpTransport;
pub use sse::SseTransport;
pub use stdio::StdioTransport;

/// Header carrying the backend-issued session identifier
pub const SESSION_HEADER: &str = "Mcp-Session-Id";

/// Transport type enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportType {
    /// Streamable HTTP (single POST endpoint)
    Http,
    /// Legacy HTTP+SSE (event stream plus `/message` endpoint)
    Sse,
    /// Child process over stdin/stdout
    Stdio,
}

impl std::fmt::Display for TransportType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportType::Http => write!(f, "HTTP"),
            TransportType::Sse => write!(f, "SSE"),
            TransportType::Stdio => write!(f, "stdio"),
        }
    }
}

/// Transport connection information
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    /// Transport type
    pub transport_type: TransportType,
    /// Endpoint URL or command line
    pub endpoint: String,
    /// Whether the transport currently reports itself alive
    pub connected: bool,
    /// Additional metadata
    pub metadata: Value,
}

/// Capability contract shared by every transport.
///
/// Callers serialize access: one round trip is in flight per transport at a
/// time, so responses are correlated by id without any queueing.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Get transport type
    fn transport_type(&self) -> TransportType;

    /// Prepare the transport for traffic (allocate the HTTP client, spawn the process)
    async fn open(&mut self) -> McpClientResult<()>;

    /// Release everything `open` acquired. Safe to call repeatedly.
    async fn close(&mut self) -> McpClientResult<()>;

    /// Whether the transport can currently carry traffic
    fn is_alive(&mut self) -> bool;

    /// Send a request and return the decoded `result`
    async fn round_trip(&mut self, request: &JsonRpcRequest) -> McpClientResult<Value>;

    /// Send a notification; nothing is awaited beyond the write itself
    async fn send_notification(&mut self, notification: &JsonRpcNotification)
    -> McpClientResult<()>;

    /// Whether the backend must issue a session token before the transport is usable
    fn requires_session(&self) -> bool {
        false
    }

    /// Current session token, if one is held
    fn session_id(&self) -> Option<String> {
        None
    }

    /// Forget the current session token
    fn clear_session(&mut self) {}

    /// Get connection information
    fn connection_info(&self) -> ConnectionInfo;

    /// Get transport statistics
    fn statistics(&self) -> TransportStatistics {
        TransportStatistics::default()
    }
}

/// Type alias for a boxed transport
pub type BoxedTransport = Box<dyn Transport>;

/// Run one round trip, failing with a timeout error once `limit` elapses
pub(crate) async fn round_trip_within(
    transport: &mut dyn Transport,
    request: &JsonRpcRequest,
    limit: Duration,
) -> McpClientResult<Value> {
    match tokio::time::timeout(limit, transport.round_trip(request)).await {
        Ok(result) => result,
        Err(_) => Err(McpClientError::timeout(format!(
            "'{}' did not complete within {}ms",
            request.method,
            limit.as_millis()
        ))),
    }
}

/// Transport statistics for monitoring
#[derive(Debug, Clone, Default)]
pub struct TransportStatistics {
    /// Number of requests sent
    pub requests_sent: u64,
    /// Number of responses received
    pub responses_received: u64,
    /// Number of notifications sent
    pub notifications_sent: u64,
    /// Number of server-pushed events received
    pub events_received: u64,
    /// Number of errors encountered
    pub errors: u64,
    /// Average response time
    pub avg_response_time_ms: f64,
    /// Last error message
    pub last_error: Option<String>,
}

impl TransportStatistics {
    /// Record a completed round trip and fold its latency into the running average
    pub fn record_response(&mut self, elapsed: Duration) {
        self.responses_received += 1;
        let elapsed_ms = elapsed.as_secs_f64() * 1000.0;
        let n = self.responses_received as f64;
        self.avg_response_time_ms += (elapsed_ms - self.avg_response_time_ms) / n;
    }

    /// Record a failure
    pub fn record_error(&mut self, error: &McpClientError) {
        self.errors += 1;
        self.last_error = Some(error.to_string());
    }
}

/// Transport factory for creating transport instances
pub struct TransportFactory;

impl TransportFactory {
    /// Build the transport named by the configuration
    pub fn from_config(config: &ClientConfig) -> McpClientResult<BoxedTransport> {
        config.validate()?;
        let timeouts = &config.timeouts;

        match &config.transport {
            TransportConfig::StreamableHttp { url } => {
                Ok(Box::new(HttpTransport::new(url, timeouts.clone())?))
            }
            TransportConfig::Sse { url } => Ok(Box::new(SseTransport::new(url, timeouts.clone())?)),
            TransportConfig::Stdio(stdio) => Ok(Box::new(StdioTransport::new(
                stdio.clone(),
                timeouts.clone(),
            ))),
        }
    }

    /// List available transport types
    pub fn available_transports() -> Vec<TransportType> {
        vec![TransportType::Http, TransportType::Sse, TransportType::Stdio]
    }
}
