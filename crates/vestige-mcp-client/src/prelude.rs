//! # MCP Client Prelude
//!
//! This module provides convenient re-exports of the most commonly used types
//! and traits from the MCP client library.
//!
//! ```rust
//! use vestige_mcp_client::prelude::*;
//! ```

// Core client types
pub use crate::client::{ConnectionStatus, McpClient, McpClientBuilder};
pub use crate::config::{ClientConfig, RetryConfig, StdioConfig, TimeoutConfig, TransportConfig};
pub use crate::error::{McpClientError, McpClientResult};
pub use crate::session::{ConnectionState, SessionInfo};

// Transport types
pub use crate::transport::{Transport, TransportType};

// Tool results
pub use crate::protocol::{ContentFragment, ToolOutput};

// Standard library types commonly used with MCP
pub use std::time::Duration;
