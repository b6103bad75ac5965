//! Configuration types for the MCP client
//!
//! Everything the client needs is passed in as a [`ClientConfig`] value at
//! construction time. The library itself reads no environment variables or
//! files.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

use crate::error::{McpClientError, McpClientResult};
use crate::protocol::{DEFAULT_PROTOCOL_VERSION, Implementation};

/// Endpoint used when no transport is configured
pub const DEFAULT_ENDPOINT: &str = "http://localhost:3100/mcp";

/// Main client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Client identification sent in `initialize`
    pub client_info: ClientInfo,

    /// Protocol version declared in `initialize`
    pub protocol_version: String,

    /// Backend transport, selected once at construction
    pub transport: TransportConfig,

    /// Timeout configurations
    pub timeouts: TimeoutConfig,

    /// Retry configurations
    pub retry: RetryConfig,
}

/// Client identification information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientInfo {
    /// Client name
    pub name: String,

    /// Client version
    pub version: String,
}

/// Backend transport selection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransportConfig {
    /// POST JSON-RPC to a single streamable HTTP endpoint
    StreamableHttp { url: String },
    /// Legacy HTTP+SSE: events from `url`, requests to its `/message` sibling
    Sse { url: String },
    /// Spawn the backend and speak line-delimited JSON over its pipes
    Stdio(StdioConfig),
}

/// Child process settings for the stdio transport
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StdioConfig {
    /// Executable to spawn
    pub command: String,

    /// Extra arguments, passed before the data-directory argument
    #[serde(default)]
    pub args: Vec<String>,

    /// Optional data directory handed to the backend
    #[serde(default)]
    pub data_dir: Option<PathBuf>,

    /// Flag that introduces the data directory on the command line
    #[serde(default = "default_data_dir_flag")]
    pub data_dir_flag: String,
}

/// Timeout configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    /// Upper bound on a single round trip
    #[serde(with = "duration_serde")]
    pub request: Duration,

    /// TCP connect timeout for HTTP transports
    #[serde(with = "duration_serde")]
    pub connect: Duration,

    /// How long `close` waits for the backend to exit before killing it
    #[serde(with = "duration_serde")]
    pub shutdown_grace: Duration,
}

/// Retry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Reconnect and retry once when the backend reports a stale session
    pub retry_stale_session: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            client_info: ClientInfo::default(),
            protocol_version: DEFAULT_PROTOCOL_VERSION.to_string(),
            transport: TransportConfig::default(),
            timeouts: TimeoutConfig::default(),
            retry: RetryConfig::default(),
        }
    }
}

impl Default for ClientInfo {
    fn default() -> Self {
        Self {
            name: "vestige-mcp-client".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        TransportConfig::StreamableHttp {
            url: DEFAULT_ENDPOINT.to_string(),
        }
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            request: Duration::from_secs(30),
            connect: Duration::from_secs(10),
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            retry_stale_session: true,
        }
    }
}

fn default_data_dir_flag() -> String {
    "--data-dir".to_string()
}

impl StdioConfig {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            data_dir: None,
            data_dir_flag: default_data_dir_flag(),
        }
    }

    /// Full argument list: configured args, then the data-directory pair if set
    pub fn command_args(&self) -> Vec<String> {
        let mut args = self.args.clone();
        if let Some(dir) = &self.data_dir {
            args.push(self.data_dir_flag.clone());
            args.push(dir.to_string_lossy().into_owned());
        }
        args
    }
}

impl From<&ClientInfo> for Implementation {
    fn from(info: &ClientInfo) -> Self {
        Implementation {
            name: info.name.clone(),
            version: info.version.clone(),
        }
    }
}

impl ClientConfig {
    /// Streamable HTTP backend at `url`
    pub fn streamable_http(url: impl Into<String>) -> Self {
        Self {
            transport: TransportConfig::StreamableHttp { url: url.into() },
            ..Self::default()
        }
    }

    /// Legacy SSE backend whose event stream lives at `url`
    pub fn sse(url: impl Into<String>) -> Self {
        Self {
            transport: TransportConfig::Sse { url: url.into() },
            ..Self::default()
        }
    }

    /// Backend spawned from `command` and spoken to over stdio
    pub fn stdio(command: impl Into<String>) -> Self {
        Self {
            transport: TransportConfig::Stdio(StdioConfig::new(command)),
            ..Self::default()
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts.request = timeout;
        self
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.timeouts.shutdown_grace = grace;
        self
    }

    pub fn with_client_info(mut self, name: impl Into<String>, version: impl Into<String>) -> Self {
        self.client_info = ClientInfo {
            name: name.into(),
            version: version.into(),
        };
        self
    }

    /// Set the data directory; only meaningful for the stdio transport
    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        if let TransportConfig::Stdio(stdio) = &mut self.transport {
            stdio.data_dir = Some(dir.into());
        }
        self
    }

    /// Append a process argument; only meaningful for the stdio transport
    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        if let TransportConfig::Stdio(stdio) = &mut self.transport {
            stdio.args.push(arg.into());
        }
        self
    }

    /// Check the configuration for values no transport can work with
    pub fn validate(&self) -> McpClientResult<()> {
        match &self.transport {
            TransportConfig::StreamableHttp { url } | TransportConfig::Sse { url } => {
                parse_http_url(url)?;
            }
            TransportConfig::Stdio(stdio) => {
                if stdio.command.trim().is_empty() {
                    return Err(McpClientError::config("stdio command cannot be empty"));
                }
            }
        }

        if self.timeouts.request.is_zero() {
            return Err(McpClientError::config("request timeout must be non-zero"));
        }
        if self.protocol_version.trim().is_empty() {
            return Err(McpClientError::config("protocol version cannot be empty"));
        }
        Ok(())
    }
}

/// Parse and check an http(s) endpoint
pub(crate) fn parse_http_url(endpoint: &str) -> McpClientResult<Url> {
    let url = Url::parse(endpoint)
        .map_err(|e| McpClientError::config(format!("Invalid URL '{}': {}", endpoint, e)))?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(McpClientError::config(format!(
            "Invalid scheme for HTTP transport: {}",
            url.scheme()
        )));
    }
    Ok(url)
}

// Helper module for Duration serialization
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
