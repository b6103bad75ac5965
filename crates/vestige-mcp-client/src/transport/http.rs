//! HTTP transport implementation for MCP client

use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE, HeaderMap};
use reqwest::{Client, Response};
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};
use url::Url;

use crate::codec::{
    self, Framing, JsonRpcNotification, JsonRpcRequest, decode_body, decode_response,
};
use crate::config::{TimeoutConfig, parse_http_url};
use crate::error::{McpClientError, McpClientResult, ProtocolError};
use crate::transport::{
    ConnectionInfo, SESSION_HEADER, Transport, TransportStatistics, TransportType,
};

/// JSON preferred, event streams accepted
const ACCEPT_BOTH: &str = "application/json, text/event-stream";

/// HTTP transport for MCP client (Streamable HTTP)
#[derive(Debug)]
pub struct HttpTransport {
    /// HTTP client, present between `open` and `close`
    client: Option<Client>,
    /// Endpoint every message is POSTed to
    endpoint: Url,
    /// Reported type; the legacy SSE transport reuses this exchange logic
    transport_type: TransportType,
    /// Timeout configuration
    timeouts: TimeoutConfig,
    /// Session ID issued by the backend
    session_id: Option<String>,
    /// Statistics
    stats: Arc<parking_lot::Mutex<TransportStatistics>>,
}

impl HttpTransport {
    /// Create a new HTTP transport
    pub fn new(endpoint: &str, timeouts: TimeoutConfig) -> McpClientResult<Self> {
        let url = parse_http_url(endpoint)?;
        Ok(Self::with_url(url, timeouts, TransportType::Http))
    }

    pub(crate) fn with_url(endpoint: Url, timeouts: TimeoutConfig, transport_type: TransportType) -> Self {
        Self {
            client: None,
            endpoint,
            transport_type,
            timeouts,
            session_id: None,
            stats: Arc::new(parking_lot::Mutex::new(TransportStatistics::default())),
        }
    }

    /// Endpoint requests are POSTed to
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    pub(crate) fn stats_handle(&self) -> Arc<parking_lot::Mutex<TransportStatistics>> {
        Arc::clone(&self.stats)
    }

    /// Update statistics
    fn update_stats<F>(&self, update_fn: F)
    where
        F: FnOnce(&mut TransportStatistics),
    {
        let mut stats = self.stats.lock();
        update_fn(&mut stats);
    }

    fn require_client(&self) -> McpClientResult<Client> {
        self.client.clone().ok_or_else(|| {
            McpClientError::connection("HTTP client not initialized - call open() first")
        })
    }

    /// Adopt a session ID announced in response headers, replacing any prior value
    fn adopt_session(&mut self, headers: &HeaderMap) {
        let Some(announced) = headers.get(SESSION_HEADER).and_then(|v| v.to_str().ok()) else {
            return;
        };

        match self.session_id.as_deref() {
            Some(current) if current == announced => return,
            Some(current) => info!(old = current, new = announced, "MCP session ID changed"),
            None => info!(session_id = announced, "Captured MCP session ID"),
        }
        self.session_id = Some(announced.to_owned());
    }

    fn map_send_error(&self, error: reqwest::Error) -> McpClientError {
        if error.is_timeout() {
            McpClientError::timeout(format!(
                "Timeout communicating with backend at {}: {}",
                self.endpoint, error
            ))
        } else {
            McpClientError::connection(format!(
                "Cannot reach backend at {}: {}",
                self.endpoint, error
            ))
        }
    }

    async fn post(&self, client: &Client, body: Vec<u8>) -> Result<Response, reqwest::Error> {
        let mut req_builder = client
            .post(self.endpoint.clone())
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, ACCEPT_BOTH);

        // Include session ID if we have one
        if let Some(session_id) = &self.session_id {
            req_builder = req_builder.header(SESSION_HEADER, session_id);
        }

        req_builder.body(body).send().await
    }

    async fn exchange(&mut self, request: &JsonRpcRequest) -> McpClientResult<Value> {
        let client = self.require_client()?;
        let body = codec::encode_request(request, Framing::Body)?;

        debug!(
            method = %request.method,
            id = request.id,
            endpoint = %self.endpoint,
            "Sending HTTP request"
        );
        self.update_stats(|stats| stats.requests_sent += 1);

        let response = self
            .post(&client, body)
            .await
            .map_err(|e| self.map_send_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ProtocolError::HttpStatus {
                status: status.as_u16(),
                body,
            }
            .into());
        }

        self.adopt_session(response.headers());

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_owned();

        let text = response
            .text()
            .await
            .map_err(|e| self.map_send_error(e))?;

        let value = decode_body(&content_type, &text)?;
        decode_response(value, request.id)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    fn transport_type(&self) -> TransportType {
        self.transport_type
    }

    async fn open(&mut self) -> McpClientResult<()> {
        let client = Client::builder()
            .timeout(self.timeouts.request)
            .connect_timeout(self.timeouts.connect)
            .user_agent(concat!("vestige-mcp-client/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| {
                McpClientError::connection(format!("Failed to create HTTP client: {}", e))
            })?;

        self.client = Some(client);
        debug!(endpoint = %self.endpoint, "HTTP transport opened");
        Ok(())
    }

    async fn close(&mut self) -> McpClientResult<()> {
        if self.client.take().is_some() {
            info!(endpoint = %self.endpoint, "HTTP transport closed");
        }
        self.session_id = None;
        Ok(())
    }

    fn is_alive(&mut self) -> bool {
        self.client.is_some()
    }

    async fn round_trip(&mut self, request: &JsonRpcRequest) -> McpClientResult<Value> {
        let start_time = Instant::now();
        let result = self.exchange(request).await;

        match &result {
            Ok(_) => {
                let elapsed = start_time.elapsed();
                self.update_stats(|stats| stats.record_response(elapsed));
                debug!(elapsed_ms = elapsed.as_millis(), "HTTP request completed");
            }
            Err(e) => self.update_stats(|stats| stats.record_error(e)),
        }
        result
    }

    async fn send_notification(
        &mut self,
        notification: &JsonRpcNotification,
    ) -> McpClientResult<()> {
        let client = self.require_client()?;
        let body = codec::encode_notification(notification, Framing::Body)?;

        debug!(method = %notification.method, "Sending HTTP notification");
        self.update_stats(|stats| stats.notifications_sent += 1);

        let response = self.post(&client, body).await.map_err(|e| {
            let error = McpClientError::connection(format!(
                "Failed to send notification to {}: {}",
                self.endpoint, e
            ));
            self.update_stats(|stats| stats.record_error(&error));
            error
        })?;

        self.adopt_session(response.headers());

        // 200 and 202 are both fine; anything else is only worth a warning
        let status = response.status();
        if status.as_u16() >= 400 {
            let text = response.text().await.unwrap_or_default();
            warn!(
                status = status.as_u16(),
                body = %codec::preview(&text),
                "Notification returned HTTP error status"
            );
        }
        Ok(())
    }

    fn requires_session(&self) -> bool {
        true
    }

    fn session_id(&self) -> Option<String> {
        self.session_id.clone()
    }

    fn clear_session(&mut self) {
        if let Some(old) = self.session_id.take() {
            debug!(session_id = %old, "Discarding MCP session ID");
        }
    }

    fn connection_info(&self) -> ConnectionInfo {
        ConnectionInfo {
            transport_type: self.transport_type,
            endpoint: self.endpoint.to_string(),
            connected: self.client.is_some(),
            metadata: serde_json::json!({
                "scheme": self.endpoint.scheme(),
                "host": self.endpoint.host_str(),
                "port": self.endpoint.port(),
                "path": self.endpoint.path(),
                "session_id": self.session_id,
            }),
        }
    }

    fn statistics(&self) -> TransportStatistics {
        self.stats.lock().clone()
    }
}
