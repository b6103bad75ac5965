//! The slice of MCP message shapes this client reads and writes

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Method names used by the client
pub mod methods {
    pub const INITIALIZE: &str = "initialize";
    pub const INITIALIZED: &str = "notifications/initialized";
    pub const TOOLS_LIST: &str = "tools/list";
    pub const TOOLS_CALL: &str = "tools/call";
}

/// Protocol versions this client knows how to speak, newest first
pub const SUPPORTED_PROTOCOL_VERSIONS: &[&str] = &["2025-06-18", "2025-03-26", "2024-11-05"];

/// Protocol version declared when none is configured
pub const DEFAULT_PROTOCOL_VERSION: &str = "2025-03-26";

/// Name and version of one side of the connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Implementation {
    pub name: String,
    pub version: String,
}

/// Parameters of the `initialize` request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    pub protocol_version: String,
    pub capabilities: Map<String, Value>,
    pub client_info: Implementation,
}

/// Result of the `initialize` request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    #[serde(default)]
    pub protocol_version: Option<String>,
    #[serde(default)]
    pub capabilities: Map<String, Value>,
    #[serde(default)]
    pub server_info: Option<Implementation>,
}

impl InitializeResult {
    /// Number of tools hinted in `capabilities.tools`, when it is a list.
    /// Informational only; the catalog comes from `tools/list`.
    pub fn tool_hint_count(&self) -> usize {
        self.capabilities
            .get("tools")
            .and_then(Value::as_array)
            .map_or(0, Vec::len)
    }
}

/// A tool entry from `tools/list`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDescriptor {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub input_schema: Option<Value>,
}

/// Result of `tools/list`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListToolsResult {
    #[serde(default)]
    pub tools: Vec<ToolDescriptor>,
}

/// Parameters of `tools/call`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallToolParams {
    pub name: String,
    pub arguments: Map<String, Value>,
}

/// Result of `tools/call`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallToolResult {
    #[serde(default)]
    pub content: Vec<ContentFragment>,
    #[serde(default)]
    pub is_error: bool,
}

impl CallToolResult {
    /// Text of every fragment joined by single spaces; non-text fragments
    /// contribute an empty string.
    pub fn joined_text(&self) -> String {
        self.content
            .iter()
            .map(|fragment| fragment.text.as_deref().unwrap_or(""))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// One element of a tool result's `content` list.
///
/// Only `type` and `text` are interpreted; everything else rides along in
/// `extra` so images and embedded resources survive untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentFragment {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ContentFragment {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            kind: "text".to_string(),
            text: Some(text.into()),
            extra: Map::new(),
        }
    }
}

/// Normalized output of a successful tool call
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolOutput {
    pub content: Vec<ContentFragment>,
}

impl ToolOutput {
    /// Concatenated text of the textual fragments, newline separated
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|fragment| fragment.text.as_deref())
            .collect::<Vec<_>>()
            .join("\n")
    }
}
