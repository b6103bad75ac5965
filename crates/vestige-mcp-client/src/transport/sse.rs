//! Legacy HTTP+SSE transport implementation for MCP client
//!
//! Requests are POSTed to a `/message` sibling of the event-stream endpoint
//! and carry the same session header as streamable HTTP. The event stream
//! itself is watched by an advisory background listener.

use async_trait::async_trait;
use futures::stream::StreamExt;
use reqwest::Client;
use reqwest::header::{ACCEPT, CACHE_CONTROL};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, warn};
use url::Url;

use crate::codec::{
    EVENT_STREAM_CONTENT_TYPE, JsonRpcNotification, JsonRpcRequest, decode_sse_frames,
};
use crate::config::{TimeoutConfig, parse_http_url};
use crate::error::{McpClientError, McpClientResult};
use crate::transport::{
    ConnectionInfo, HttpTransport, Transport, TransportStatistics, TransportType,
};

/// Pause between event-stream reconnect attempts
const LISTENER_BACKOFF: Duration = Duration::from_secs(5);

type SharedStats = Arc<parking_lot::Mutex<TransportStatistics>>;

/// SSE transport for MCP client (HTTP+SSE 2024-11-05)
#[derive(Debug)]
pub struct SseTransport {
    /// Request/response exchange against the message endpoint
    inner: HttpTransport,
    /// Event-stream endpoint URL
    stream_endpoint: Url,
    /// Connect timeout for the event-stream GET
    connect_timeout: Duration,
    /// Background event-stream listener
    listener: Option<Listener>,
}

#[derive(Debug)]
struct Listener {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl SseTransport {
    /// Create a new SSE transport from the event-stream URL
    pub fn new(endpoint: &str, timeouts: TimeoutConfig) -> McpClientResult<Self> {
        let stream_endpoint = parse_http_url(endpoint)?;
        let message_endpoint = derive_message_endpoint(&stream_endpoint);
        let connect_timeout = timeouts.connect;

        Ok(Self {
            inner: HttpTransport::with_url(message_endpoint, timeouts, TransportType::Sse),
            stream_endpoint,
            connect_timeout,
            listener: None,
        })
    }

    /// Event-stream endpoint
    pub fn stream_endpoint(&self) -> &Url {
        &self.stream_endpoint
    }

    /// Endpoint requests are POSTed to
    pub fn message_endpoint(&self) -> &Url {
        self.inner.endpoint()
    }

    /// Whether the background listener task is running
    pub fn listener_running(&self) -> bool {
        self.listener
            .as_ref()
            .is_some_and(|listener| !listener.handle.is_finished())
    }

    fn start_listener(&mut self) -> McpClientResult<()> {
        // No overall timeout: the stream stays open for as long as the server keeps it
        let client = Client::builder()
            .connect_timeout(self.connect_timeout)
            .user_agent(concat!("vestige-mcp-client/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| {
                McpClientError::connection(format!("Failed to create SSE client: {}", e))
            })?;

        let token = CancellationToken::new();
        let handle = tokio::spawn(run_listener(
            client,
            self.stream_endpoint.clone(),
            self.inner.stats_handle(),
            token.clone(),
        )
        .in_current_span());

        debug!(stream_endpoint = %self.stream_endpoint, "SSE event listener started");
        self.listener = Some(Listener { token, handle });
        Ok(())
    }

    async fn stop_listener(&mut self) {
        if let Some(listener) = self.listener.take() {
            listener.token.cancel();
            match listener.handle.await {
                Err(e) if !e.is_cancelled() => {
                    warn!(error = %e, "SSE listener task ended abnormally");
                }
                _ => {}
            }
            debug!("SSE event listener stopped");
        }
    }
}

/// POST endpoint for a legacy SSE base URL: a trailing `/sse` becomes
/// `/message`, anything else gets `/message` appended.
pub fn derive_message_endpoint(stream_endpoint: &Url) -> Url {
    let mut message = stream_endpoint.clone();
    let base = stream_endpoint.path().trim_end_matches('/');
    let path = match base.strip_suffix("/sse") {
        Some(prefix) => format!("{}/message", prefix),
        None => format!("{}/message", base),
    };
    message.set_path(&path);
    message
}

async fn run_listener(client: Client, endpoint: Url, stats: SharedStats, token: CancellationToken) {
    loop {
        tokio::select! {
            _ = token.cancelled() => return,
            _ = listen_once(&client, &endpoint, &stats) => {}
        }

        warn!(
            backoff_secs = LISTENER_BACKOFF.as_secs(),
            "SSE stream disconnected, reconnecting"
        );
        tokio::select! {
            _ = token.cancelled() => return,
            _ = tokio::time::sleep(LISTENER_BACKOFF) => {}
        }
    }
}

async fn listen_once(client: &Client, endpoint: &Url, stats: &SharedStats) {
    debug!(endpoint = %endpoint, "Connecting to SSE endpoint");

    let response = match client
        .get(endpoint.clone())
        .header(ACCEPT, EVENT_STREAM_CONTENT_TYPE)
        .header(CACHE_CONTROL, "no-cache")
        .send()
        .await
    {
        Ok(response) => response,
        Err(e) => {
            error!(error = %e, "Failed to connect to SSE endpoint");
            return;
        }
    };

    if !response.status().is_success() {
        error!(status = %response.status(), "SSE endpoint returned error");
        return;
    }

    info!("SSE stream connected");

    let mut stream = response.bytes_stream();
    let mut buffer = String::new();

    while let Some(chunk) = stream.next().await {
        match chunk {
            Ok(bytes) => {
                buffer.push_str(&String::from_utf8_lossy(&bytes).replace("\r\n", "\n"));

                // Process complete SSE events
                while let Some(pos) = buffer.find("\n\n") {
                    let event_text: String = buffer.drain(..pos + 2).collect();
                    for frame in decode_sse_frames(&event_text) {
                        stats.lock().events_received += 1;
                        log_frame(&frame);
                    }
                }
            }
            Err(e) => {
                error!(error = %e, "SSE stream error");
                return;
            }
        }
    }
}

fn log_frame(frame: &Value) {
    match frame.get("method").and_then(Value::as_str) {
        Some(method) => debug!(method, "Server-pushed SSE notification"),
        None => debug!(id = ?frame.get("id"), "Server-pushed SSE message"),
    }
}

#[async_trait]
impl Transport for SseTransport {
    fn transport_type(&self) -> TransportType {
        TransportType::Sse
    }

    async fn open(&mut self) -> McpClientResult<()> {
        self.inner.open().await?;
        if !self.listener_running() {
            self.stop_listener().await;
            self.start_listener()?;
        }
        debug!(
            stream_endpoint = %self.stream_endpoint,
            message_endpoint = %self.inner.endpoint(),
            "SSE transport opened"
        );
        Ok(())
    }

    async fn close(&mut self) -> McpClientResult<()> {
        self.stop_listener().await;
        self.inner.close().await
    }

    fn is_alive(&mut self) -> bool {
        // The listener is advisory; only the request path decides liveness
        self.inner.is_alive()
    }

    async fn round_trip(&mut self, request: &JsonRpcRequest) -> McpClientResult<Value> {
        self.inner.round_trip(request).await
    }

    async fn send_notification(
        &mut self,
        notification: &JsonRpcNotification,
    ) -> McpClientResult<()> {
        self.inner.send_notification(notification).await
    }

    fn requires_session(&self) -> bool {
        true
    }

    fn session_id(&self) -> Option<String> {
        self.inner.session_id()
    }

    fn clear_session(&mut self) {
        self.inner.clear_session();
    }

    fn connection_info(&self) -> ConnectionInfo {
        let inner = self.inner.connection_info();
        ConnectionInfo {
            transport_type: TransportType::Sse,
            endpoint: self.stream_endpoint.to_string(),
            connected: inner.connected,
            metadata: serde_json::json!({
                "stream_endpoint": self.stream_endpoint.to_string(),
                "message_endpoint": self.inner.endpoint().to_string(),
                "listener_running": self.listener_running(),
                "session_id": self.inner.session_id(),
            }),
        }
    }

    fn statistics(&self) -> TransportStatistics {
        self.inner.statistics()
    }
}

impl Drop for SseTransport {
    fn drop(&mut self) {
        if let Some(listener) = self.listener.take() {
            debug!("Aborting SSE listener on drop");
            listener.token.cancel();
            listener.handle.abort();
        }
    }
}
