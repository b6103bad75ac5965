//! # Vestige MCP Client
//!
//! A resilient Model Context Protocol (MCP) client for a single tool backend.
//! One [`McpClient`] owns one transport and one logical connection, runs the
//! MCP handshake on demand, tracks the backend-issued session token, and
//! recovers from dead connections and stale sessions on its own.
//!
//! ## Features
//!
//! - **Three transports**: streamable HTTP, legacy HTTP+SSE, and a child process over stdio
//! - **Lazy connect**: the first call performs the handshake
//! - **Stale-session recovery**: one full reconnect and retry when the backend forgets us
//! - **Uniform results**: every transport yields the same [`ToolOutput`]
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use serde_json::json;
//! use vestige_mcp_client::{ClientConfig, McpClient};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = McpClient::new(ClientConfig::streamable_http("http://localhost:3100/mcp"))?;
//!
//!     client.start().await?;
//!     println!("Available tools: {:?}", client.tool_names());
//!
//!     let output = client.call_tool("search", json!({"query": "rust"})).await?;
//!     println!("{}", output.text());
//!
//!     client.stop().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Transport Types
//!
//! ### Streamable HTTP
//!
//! ```rust,no_run
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! use vestige_mcp_client::{ClientConfig, McpClient};
//!
//! let client = McpClient::new(ClientConfig::streamable_http("http://localhost:3100/mcp"))?;
//! # Ok(())
//! # }
//! ```
//!
//! ### Legacy SSE
//!
//! Requests go to the `/message` sibling of the event-stream URL.
//!
//! ```rust,no_run
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! use vestige_mcp_client::{ClientConfig, McpClient};
//!
//! let client = McpClient::new(ClientConfig::sse("http://localhost:3100/sse"))?;
//! # Ok(())
//! # }
//! ```
//!
//! ### Stdio
//!
//! ```rust,no_run
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! use vestige_mcp_client::{ClientConfig, McpClient};
//!
//! let config = ClientConfig::stdio("vestige-mcp").with_data_dir("/var/lib/vestige");
//! let client = McpClient::new(config)?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod codec;
pub mod config;
pub mod error;
pub mod handshake;
pub mod prelude;
pub mod protocol;
pub mod session;
pub mod transport;

#[cfg(test)]
mod testing;

// Re-export main types
pub use client::{ConnectionStatus, McpClient, McpClientBuilder};
pub use config::{ClientConfig, RetryConfig, StdioConfig, TimeoutConfig, TransportConfig};
pub use error::{McpClientError, McpClientResult, ProtocolError, SessionError};
pub use protocol::{ContentFragment, ToolOutput};
pub use session::{ConnectionState, SessionInfo};

// Re-export transport types
pub use transport::{Transport, TransportStatistics, TransportType};
