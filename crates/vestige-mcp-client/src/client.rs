//! Main MCP client implementation

use serde_json::{Map, Value};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::codec::{JsonRpcRequest, RequestIdGenerator};
use crate::config::ClientConfig;
use crate::error::{McpClientError, McpClientResult, ProtocolError};
use crate::handshake;
use crate::protocol::{CallToolParams, CallToolResult, ToolOutput, methods};
use crate::session::{ConnectionState, HandshakeOutcome, SessionInfo, SessionManager};
use crate::transport::{
    BoxedTransport, TransportFactory, TransportStatistics, TransportType, round_trip_within,
};

/// Main MCP client
///
/// Owns one transport and one logical connection to the backend. Round
/// trips are serialized through the transport lock; connect and reconnect
/// are additionally serialized through the lifecycle lock and hold the
/// transport lock for the whole handshake, so calls queue behind them.
pub struct McpClient {
    /// Transport layer
    transport: Mutex<BoxedTransport>,
    /// Serializes connect, reconnect and disconnect
    lifecycle: Mutex<()>,
    /// Session manager
    session: SessionManager,
    /// Configuration
    config: ClientConfig,
    /// Request ID counter
    request_ids: RequestIdGenerator,
}

impl std::fmt::Debug for McpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpClient")
            .field("state", &self.session.state())
            .field("session_id", &self.session.session_id())
            .finish_non_exhaustive()
    }
}

impl McpClient {
    /// Create a client whose transport is chosen by `config.transport`.
    /// Nothing is opened until the first connect or call.
    pub fn new(config: ClientConfig) -> McpClientResult<Self> {
        let transport = TransportFactory::from_config(&config)?;
        Ok(Self::with_transport(transport, config))
    }

    /// Create a new MCP client with the given transport
    pub fn with_transport(transport: BoxedTransport, config: ClientConfig) -> Self {
        Self {
            transport: Mutex::new(transport),
            lifecycle: Mutex::new(()),
            session: SessionManager::new(),
            config,
            request_ids: RequestIdGenerator::new(),
        }
    }

    pub fn builder() -> McpClientBuilder {
        McpClientBuilder::new()
    }

    /// Open the transport and run the handshake, replacing any existing connection
    pub async fn connect(&self) -> McpClientResult<()> {
        let _lifecycle = self.lifecycle.lock().await;
        self.connect_locked().await
    }

    /// Alias for [`connect`](Self::connect)
    pub async fn start(&self) -> McpClientResult<()> {
        self.connect().await
    }

    /// Close the transport and forget the session. Safe to call repeatedly.
    pub async fn disconnect(&self) -> McpClientResult<()> {
        let _lifecycle = self.lifecycle.lock().await;
        let mut transport = self.transport.lock().await;

        let result = transport.close().await;
        self.session.mark_disconnected(None);
        result
    }

    /// Alias for [`disconnect`](Self::disconnect)
    pub async fn stop(&self) -> McpClientResult<()> {
        self.disconnect().await
    }

    /// Whether the connection is ready and the transport reports itself alive.
    ///
    /// While a round trip holds the transport, the last known state is reported.
    pub fn alive(&self) -> bool {
        if !self.session.is_ready() {
            return false;
        }
        match self.transport.try_lock() {
            Ok(mut transport) => transport.is_alive(),
            Err(_) => true,
        }
    }

    /// Time since the current connection became ready; zero when disconnected
    pub fn uptime(&self) -> Duration {
        self.session.uptime()
    }

    /// Copy of the tool catalog discovered during the handshake
    pub fn tool_names(&self) -> Vec<String> {
        self.session.tool_names()
    }

    /// Session token the backend issued for the current connection
    pub fn session_id(&self) -> Option<String> {
        self.session.session_id()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.session.state()
    }

    /// Get session information
    pub fn session_info(&self) -> SessionInfo {
        self.session.session_info()
    }

    /// Get client connection status
    pub async fn connection_status(&self) -> ConnectionStatus {
        let transport_info = {
            let transport = self.transport.lock().await;
            transport.connection_info()
        };
        let session = self.session.session_info();

        ConnectionStatus {
            transport_connected: transport_info.connected,
            state: session.state,
            transport_type: transport_info.transport_type,
            endpoint: transport_info.endpoint,
            session_id: session.session_id,
            protocol_version: session.protocol_version,
        }
    }

    /// Get transport statistics
    pub async fn transport_stats(&self) -> TransportStatistics {
        let transport = self.transport.lock().await;
        transport.statistics()
    }

    /// Call a tool by name.
    ///
    /// Connects first if needed. When the backend rejects the session the
    /// client reconnects and retries exactly once. A tool that reports
    /// failure yields [`McpClientError::Tool`] and is never retried.
    pub async fn call_tool(&self, name: &str, arguments: Value) -> McpClientResult<ToolOutput> {
        let params = CallToolParams {
            name: name.to_string(),
            arguments: normalize_arguments(arguments)?,
        };
        let params = serde_json::to_value(params)
            .map_err(|e| ProtocolError::InvalidRequest(e.to_string()))?;

        self.ensure_connected().await?;
        debug!(tool = name, "Calling tool");

        let result = match self.request(methods::TOOLS_CALL, params.clone()).await {
            Err(e) if e.is_stale_session() && self.config.retry.retry_stale_session => {
                warn!(tool = name, error = %e, "Backend rejected the session, reconnecting once");
                self.reconnect().await?;
                self.request(methods::TOOLS_CALL, params).await
            }
            other => other,
        }?;

        into_tool_output(name, result)
    }

    /// Probe the backend with `tools/list`, connecting first if needed.
    /// Never fails; problems are logged and reported as `false`.
    pub async fn health_check(&self) -> bool {
        let probe = async {
            self.ensure_connected().await?;
            self.request(methods::TOOLS_LIST, Value::Object(Map::new()))
                .await
        };

        match probe.await {
            Ok(_) => true,
            Err(e) => {
                warn!(error = %e, "Health check failed");
                false
            }
        }
    }

    /// Reconnect unless the connection is usable as is
    async fn ensure_connected(&self) -> McpClientResult<()> {
        if self.usable().await {
            return Ok(());
        }

        let _lifecycle = self.lifecycle.lock().await;
        // Another caller may have reconnected while we waited
        if self.usable().await {
            return Ok(());
        }
        self.connect_locked().await
    }

    async fn usable(&self) -> bool {
        if !self.session.is_ready() {
            return false;
        }

        let mut transport = self.transport.lock().await;
        if !transport.is_alive() {
            debug!("Transport is no longer alive");
            return false;
        }
        if transport.requires_session() && transport.session_id().is_none() {
            // Every call would be rejected by a stateful backend
            debug!("Transport holds no session token, forcing reconnect");
            return false;
        }
        true
    }

    async fn reconnect(&self) -> McpClientResult<()> {
        let _lifecycle = self.lifecycle.lock().await;
        self.session.mark_disconnected(Some("session rejected by backend"));
        self.connect_locked().await
    }

    async fn connect_locked(&self) -> McpClientResult<()> {
        let mut transport = self.transport.lock().await;
        info!(
            transport = %transport.transport_type(),
            endpoint = %transport.connection_info().endpoint,
            "Connecting to MCP backend"
        );

        // Tear down whatever the previous connection left behind
        transport.clear_session();
        if let Err(e) = transport.close().await {
            debug!(error = %e, "Closing previous transport failed");
        }

        self.session.begin_connect()?;
        match self.open_and_handshake(&mut transport).await {
            Ok(outcome) => self.session.mark_ready(outcome),
            Err(e) => {
                warn!(error = %e, "Failed to connect to MCP backend");
                self.session.mark_disconnected(Some(&e.to_string()));
                transport.clear_session();
                if let Err(close_err) = transport.close().await {
                    debug!(error = %close_err, "Closing failed transport failed");
                }
                Err(e)
            }
        }
    }

    async fn open_and_handshake(
        &self,
        transport: &mut BoxedTransport,
    ) -> McpClientResult<HandshakeOutcome> {
        transport.open().await?;
        self.session.begin_handshake()?;
        handshake::perform(transport.as_mut(), &self.config, &self.request_ids).await
    }

    /// One round trip with the resulting state bookkeeping
    async fn request(&self, method: &str, params: Value) -> McpClientResult<Value> {
        let mut transport = self.transport.lock().await;
        let request = JsonRpcRequest::new(self.request_ids.next_id(), method, params);

        let result =
            round_trip_within(transport.as_mut(), &request, self.config.timeouts.request).await;

        match &result {
            Ok(_) => self.session.sync_session_id(transport.session_id()),
            Err(e) if e.is_connection_error() => {
                transport.clear_session();
                self.session.mark_disconnected(Some(&e.to_string()));
            }
            Err(e) if e.is_timeout() => {
                if self.session.state() == ConnectionState::Ready {
                    self.session.mark_degraded(&e.to_string()).ok();
                }
            }
            Err(_) => {}
        }
        result
    }
}

/// Tool arguments must be a JSON object; `null` means none
fn normalize_arguments(arguments: Value) -> McpClientResult<Map<String, Value>> {
    match arguments {
        Value::Null => Ok(Map::new()),
        Value::Object(map) => Ok(map),
        other => Err(ProtocolError::InvalidRequest(format!(
            "tool arguments must be a JSON object, got {}",
            other
        ))
        .into()),
    }
}

fn into_tool_output(name: &str, result: Value) -> McpClientResult<ToolOutput> {
    let result: CallToolResult = serde_json::from_value(result).map_err(|e| {
        McpClientError::invalid_response(format!("Malformed tools/call result: {}", e))
    })?;

    if result.is_error {
        let message = result.joined_text();
        debug!(tool = name, message = %message, "Tool reported an error");
        return Err(McpClientError::Tool(message));
    }

    Ok(ToolOutput {
        content: result.content,
    })
}

/// Connection status information
#[derive(Debug, Clone)]
pub struct ConnectionStatus {
    pub transport_connected: bool,
    pub state: ConnectionState,
    pub transport_type: TransportType,
    pub endpoint: String,
    pub session_id: Option<String>,
    pub protocol_version: Option<String>,
}

impl ConnectionStatus {
    /// Check if fully connected and ready
    pub fn is_ready(&self) -> bool {
        self.transport_connected && self.state == ConnectionState::Ready
    }

    /// Get status summary
    pub fn summary(&self) -> String {
        let session_display = match &self.session_id {
            Some(id) => id.chars().take(8).collect::<String>(),
            None => "None".to_string(),
        };
        format!(
            "{} transport to {} - Session {} ({}, protocol {})",
            self.transport_type,
            self.endpoint,
            session_display,
            self.state,
            self.protocol_version.as_deref().unwrap_or("unknown")
        )
    }
}

/// Builder for creating MCP clients
#[derive(Default)]
pub struct McpClientBuilder {
    transport: Option<BoxedTransport>,
    config: Option<ClientConfig>,
}

impl McpClientBuilder {
    /// Create a new client builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Use this transport instead of the one the configuration names
    pub fn with_transport(mut self, transport: BoxedTransport) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Streamable HTTP backend at `url`, keeping any other configured settings
    pub fn with_url(mut self, url: &str) -> Self {
        let mut config = self.config.take().unwrap_or_default();
        config.transport = ClientConfig::streamable_http(url).transport;
        self.config = Some(config);
        self
    }

    /// Set configuration
    pub fn with_config(mut self, config: ClientConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Build the client
    pub fn build(self) -> McpClientResult<McpClient> {
        let config = self.config.unwrap_or_default();
        match self.transport {
            Some(transport) => Ok(McpClient::with_transport(transport, config)),
            None => McpClient::new(config),
        }
    }
}
