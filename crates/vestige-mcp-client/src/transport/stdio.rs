//! Stdio transport: a child process speaking newline-delimited JSON-RPC
//!
//! The backend's stderr is drained by a background task for the whole
//! process lifetime so diagnostic output can never fill the pipe and stall
//! the backend. Calls are strictly serialized; a response whose id does not
//! match the request in flight is logged and dropped.

use async_trait::async_trait;
use serde_json::Value;
use std::process::Stdio;
use std::time::Instant;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStderr, Command};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, warn};

use crate::codec::{
    self, Framing, JsonRpcNotification, JsonRpcRequest, RequestId, decode_response, id_matches,
};
use crate::config::{StdioConfig, TimeoutConfig};
use crate::error::{McpClientError, McpClientResult};
use crate::transport::{ConnectionInfo, Transport, TransportStatistics, TransportType};

type Writer = Box<dyn AsyncWrite + Send + Sync + Unpin>;
type Reader = Box<dyn AsyncRead + Send + Sync + Unpin>;

/// Target used for lines read from the backend's stderr
pub const STDERR_TARGET: &str = "vestige_mcp_client::stderr";

/// Stdio transport for MCP client
pub struct StdioTransport {
    config: StdioConfig,
    timeouts: TimeoutConfig,
    child: Option<Child>,
    stdin: Option<Writer>,
    stdout: Option<Lines<BufReader<Reader>>>,
    drain: Option<StderrDrain>,
    /// Set once the pipes fail or the output stream ends
    broken: bool,
    stats: parking_lot::Mutex<TransportStatistics>,
}

struct StderrDrain {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl std::fmt::Debug for StdioTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StdioTransport")
            .field("command", &self.config.command)
            .field("pid", &self.child.as_ref().and_then(Child::id))
            .field("open", &self.stdin.is_some())
            .field("broken", &self.broken)
            .finish()
    }
}

impl StdioTransport {
    /// Create a stdio transport; nothing is spawned until `open`
    pub fn new(config: StdioConfig, timeouts: TimeoutConfig) -> Self {
        Self {
            config,
            timeouts,
            child: None,
            stdin: None,
            stdout: None,
            drain: None,
            broken: false,
            stats: parking_lot::Mutex::new(TransportStatistics::default()),
        }
    }

    /// Build a transport over already-connected pipes with no process behind them.
    #[doc(hidden)]
    pub fn from_pipes<W, R>(writer: W, reader: R, timeouts: TimeoutConfig) -> Self
    where
        W: AsyncWrite + Send + Sync + Unpin + 'static,
        R: AsyncRead + Send + Sync + Unpin + 'static,
    {
        let mut transport = Self::new(StdioConfig::new("<pipes>"), timeouts);
        transport.attach_pipes(Box::new(writer), Box::new(reader));
        transport
    }

    /// OS process id of the running backend
    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().and_then(Child::id)
    }

    fn attach_pipes(&mut self, writer: Writer, reader: Reader) {
        self.stdin = Some(writer);
        self.stdout = Some(BufReader::new(reader).lines());
        self.broken = false;
    }

    fn spawn(&mut self) -> McpClientResult<()> {
        let args = self.config.command_args();
        let mut child = Command::new(&self.config.command)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                McpClientError::connection(format!(
                    "Failed to spawn backend '{}': {}",
                    self.config.command, e
                ))
            })?;

        let (Some(stdin), Some(stdout), Some(stderr)) =
            (child.stdin.take(), child.stdout.take(), child.stderr.take())
        else {
            return Err(McpClientError::connection(
                "Backend process was spawned without piped stdio",
            ));
        };

        info!(
            command = %self.config.command,
            args = ?args,
            pid = child.id(),
            "Spawned MCP backend process"
        );

        self.drain = Some(StderrDrain::start(stderr, child.id()));
        self.attach_pipes(Box::new(stdin), Box::new(stdout));
        self.child = Some(child);
        Ok(())
    }

    async fn write_line(&mut self, line: &[u8]) -> McpClientResult<()> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| McpClientError::connection("Backend process is not running"))?;

        let written = match stdin.write_all(line).await {
            Ok(()) => stdin.flush().await,
            Err(e) => Err(e),
        };
        written.map_err(|e| {
            self.broken = true;
            McpClientError::connection(format!("Failed to write to backend stdin: {}", e))
        })
    }

    async fn read_response(&mut self, expected_id: RequestId) -> McpClientResult<Value> {
        let stdout = self
            .stdout
            .as_mut()
            .ok_or_else(|| McpClientError::connection("Backend process is not running"))?;

        loop {
            let line = match stdout.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => {
                    self.broken = true;
                    return Err(McpClientError::connection(
                        "Backend closed its output stream",
                    ));
                }
                Err(e) => {
                    self.broken = true;
                    return Err(McpClientError::connection(format!(
                        "Failed to read from backend stdout: {}",
                        e
                    )));
                }
            };

            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let value: Value = match serde_json::from_str(line) {
                Ok(value) => value,
                Err(_) => {
                    debug!(line = %codec::preview(line), "Skipping non-JSON line from backend");
                    continue;
                }
            };

            let matched = match value.as_array() {
                Some(items) => items.iter().any(|item| id_matches(item, expected_id)),
                None => id_matches(&value, expected_id),
            };
            if matched {
                return decode_response(value, expected_id);
            }

            if value.is_array() {
                debug!("Skipping batch without our response");
            } else if value.get("id").is_none() {
                debug!(
                    method = value.get("method").and_then(|m| m.as_str()),
                    "Skipping notification from backend"
                );
            } else {
                warn!(
                    expected = expected_id,
                    received = %value["id"],
                    "Skipping response with unexpected id"
                );
            }
        }
    }

    async fn exchange(&mut self, request: &JsonRpcRequest) -> McpClientResult<Value> {
        let line = codec::encode_request(request, Framing::Line)?;
        self.write_line(&line).await?;
        self.read_response(request.id).await
    }

    async fn shutdown_child(&mut self) {
        let Some(mut child) = self.child.take() else {
            return;
        };
        let pid = child.id();
        let grace = self.timeouts.shutdown_grace;

        match timeout(grace, child.wait()).await {
            Ok(Ok(status)) => info!(pid, %status, "MCP backend process exited"),
            Ok(Err(e)) => warn!(pid, error = %e, "Failed to wait for MCP backend process"),
            Err(_) => {
                warn!(
                    pid,
                    grace_ms = grace.as_millis() as u64,
                    "MCP backend did not exit within grace period, killing"
                );
                if let Err(e) = child.kill().await {
                    warn!(pid, error = %e, "Failed to kill MCP backend process");
                }
            }
        }
    }
}

impl StderrDrain {
    fn start(stderr: ChildStderr, pid: Option<u32>) -> Self {
        let token = CancellationToken::new();
        let cancelled = token.clone();

        let handle = tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            loop {
                tokio::select! {
                    _ = cancelled.cancelled() => break,
                    line = lines.next_line() => match line {
                        Ok(Some(line)) => debug!(target: STDERR_TARGET, pid, "{}", line),
                        Ok(None) => break,
                        Err(e) => {
                            debug!(target: STDERR_TARGET, pid, error = %e, "stderr drain stopped");
                            break;
                        }
                    },
                }
            }
        }
        .in_current_span());

        Self { token, handle }
    }

    async fn stop(self) {
        self.token.cancel();
        // The task only logs; a join failure has nothing to report
        let _ = self.handle.await;
    }
}

#[async_trait]
impl Transport for StdioTransport {
    fn transport_type(&self) -> TransportType {
        TransportType::Stdio
    }

    async fn open(&mut self) -> McpClientResult<()> {
        if self.is_alive() {
            return Ok(());
        }
        // Reap whatever is left of a previous process before respawning
        self.close().await?;
        self.spawn()
    }

    async fn close(&mut self) -> McpClientResult<()> {
        // Closing stdin is the graceful stop signal
        let had_pipes = self.stdin.take().is_some();
        self.stdout = None;

        self.shutdown_child().await;
        if let Some(drain) = self.drain.take() {
            drain.stop().await;
        }

        if had_pipes {
            debug!(command = %self.config.command, "Stdio transport closed");
        }
        self.broken = false;
        Ok(())
    }

    fn is_alive(&mut self) -> bool {
        if self.broken || self.stdin.is_none() {
            return false;
        }
        match self.child.as_mut() {
            Some(child) => match child.try_wait() {
                Ok(None) => true,
                Ok(Some(status)) => {
                    debug!(%status, "MCP backend process has exited");
                    false
                }
                Err(_) => false,
            },
            None => true,
        }
    }

    async fn round_trip(&mut self, request: &JsonRpcRequest) -> McpClientResult<Value> {
        self.stats.lock().requests_sent += 1;
        let start_time = Instant::now();
        let bound = self.timeouts.request;

        let result = match timeout(bound, self.exchange(request)).await {
            Ok(result) => result,
            Err(_) => Err(McpClientError::timeout(format!(
                "No response from backend within {}ms for '{}'",
                bound.as_millis(),
                request.method
            ))),
        };

        let mut stats = self.stats.lock();
        match &result {
            Ok(_) => stats.record_response(start_time.elapsed()),
            Err(e) => stats.record_error(e),
        }
        result
    }

    async fn send_notification(
        &mut self,
        notification: &JsonRpcNotification,
    ) -> McpClientResult<()> {
        let line = codec::encode_notification(notification, Framing::Line)?;
        self.stats.lock().notifications_sent += 1;
        self.write_line(&line).await
    }

    fn connection_info(&self) -> ConnectionInfo {
        let args = self.config.command_args();
        let mut endpoint = self.config.command.clone();
        for arg in &args {
            endpoint.push(' ');
            endpoint.push_str(arg);
        }

        ConnectionInfo {
            transport_type: TransportType::Stdio,
            endpoint,
            connected: self.stdin.is_some() && !self.broken,
            metadata: serde_json::json!({
                "command": self.config.command,
                "args": args,
                "pid": self.pid(),
            }),
        }
    }

    fn statistics(&self) -> TransportStatistics {
        self.stats.lock().clone()
    }
}

impl Drop for StdioTransport {
    fn drop(&mut self) {
        // kill_on_drop takes care of the process itself
        if let Some(drain) = self.drain.take() {
            drain.token.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;
    use tokio::io::{DuplexStream, duplex};

    fn timeouts(request_ms: u64) -> TimeoutConfig {
        TimeoutConfig {
            request: Duration::from_millis(request_ms),
            shutdown_grace: Duration::from_millis(200),
            ..TimeoutConfig::default()
        }
    }

    /// Transport wired to an in-memory backend: returns the transport plus the
    /// backend's view of the pipes.
    fn piped(request_ms: u64) -> (StdioTransport, Lines<BufReader<DuplexStream>>, DuplexStream) {
        let (client_out, backend_in) = duplex(4096);
        let (backend_out, client_in) = duplex(4096);
        let transport = StdioTransport::from_pipes(client_out, client_in, timeouts(request_ms));
        (transport, BufReader::new(backend_in).lines(), backend_out)
    }

    #[tokio::test]
    async fn test_skips_noise_until_matching_id() {
        let (mut transport, mut requests, mut replies) = piped(2_000);

        let backend = tokio::spawn(async move {
            let line = requests.next_line().await.unwrap().unwrap();
            let request: Value = serde_json::from_str(&line).unwrap();
            assert_eq!(request["method"], "tools/list");
            assert_eq!(request["id"], 7);

            let script = concat!(
                "starting up...\n",
                "\n",
                "{\"jsonrpc\":\"2.0\",\"method\":\"notifications/message\",\"params\":{}}\n",
                "{\"jsonrpc\":\"2.0\",\"id\":6,\"result\":{\"stale\":true}}\n",
                "{\"jsonrpc\":\"2.0\",\"id\":7,\"result\":{\"tools\":[]}}\n",
            );
            replies.write_all(script.as_bytes()).await.unwrap();
            (requests, replies)
        });

        let result = transport
            .round_trip(&JsonRpcRequest::new(7, "tools/list", json!({})))
            .await
            .unwrap();
        assert_eq!(result, json!({"tools": []}));
        assert!(transport.is_alive());
        let _pipes = backend.await.unwrap();

        let stats = transport.statistics();
        assert_eq!(stats.requests_sent, 1);
        assert_eq!(stats.responses_received, 1);
    }

    #[tokio::test]
    async fn test_rpc_error_line_is_protocol_error() {
        let (mut transport, mut requests, mut replies) = piped(2_000);

        let backend = tokio::spawn(async move {
            requests.next_line().await.unwrap();
            replies
                .write_all(
                    b"{\"jsonrpc\":\"2.0\",\"id\":1,\"error\":{\"code\":-32601,\"message\":\"Method not found\"}}\n",
                )
                .await
                .unwrap();
            (requests, replies)
        });

        let err = transport
            .round_trip(&JsonRpcRequest::new(1, "tools/nope", json!({})))
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), Some(-32601));
        assert!(err.is_protocol_error());
        let _pipes = backend.await.unwrap();
    }

    #[tokio::test]
    async fn test_end_of_stream_is_connection_error() {
        let (mut transport, requests, replies) = piped(2_000);
        drop(replies);

        let err = transport
            .round_trip(&JsonRpcRequest::new(1, "tools/list", json!({})))
            .await
            .unwrap_err();
        assert!(err.is_connection_error(), "unexpected error: {err:?}");
        assert!(!transport.is_alive());
        drop(requests);
    }

    #[tokio::test]
    async fn test_silent_backend_times_out() {
        let (mut transport, _requests, _replies) = piped(50);

        let err = transport
            .round_trip(&JsonRpcRequest::new(1, "tools/call", json!({})))
            .await
            .unwrap_err();
        assert!(err.is_timeout());
        // A timeout leaves the pipes usable
        assert!(transport.is_alive());
        assert_eq!(transport.statistics().errors, 1);
    }

    #[tokio::test]
    async fn test_notification_is_one_line() {
        let (mut transport, mut requests, _replies) = piped(2_000);

        transport
            .send_notification(&JsonRpcNotification::new(
                "notifications/initialized",
                json!({}),
            ))
            .await
            .unwrap();

        let line = requests.next_line().await.unwrap().unwrap();
        let value: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["method"], "notifications/initialized");
        assert!(value.get("id").is_none());
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (mut transport, _requests, _replies) = piped(2_000);
        transport.close().await.unwrap();
        transport.close().await.unwrap();
        assert!(!transport.is_alive());

        let err = transport
            .send_notification(&JsonRpcNotification::new("x", json!({})))
            .await
            .unwrap_err();
        assert!(err.is_connection_error());
    }

    #[tokio::test]
    async fn test_spawn_failure_is_connection_error() {
        let mut transport = StdioTransport::new(
            StdioConfig::new("/nonexistent/vestige-mcp-backend"),
            timeouts(1_000),
        );
        let err = transport.open().await.unwrap_err();
        assert!(err.is_connection_error());
        assert!(!transport.is_alive());
    }

    #[cfg(target_os = "linux")]
    mod process {
        use super::*;
        use tracing_test::traced_test;

        /// Echoes every request id back with a fixed result
        const RESPONDER: &str = r#"echo "backend starting" >&2; exec sed -u 's/.*"id":\([0-9]*\).*/{"jsonrpc":"2.0","id":\1,"result":{"ok":true}}/'"#;

        fn sh(script: &str) -> StdioConfig {
            let mut config = StdioConfig::new("sh");
            config.args = vec!["-c".to_string(), script.to_string()];
            config
        }

        #[tokio::test]
        #[traced_test]
        async fn test_round_trip_with_real_process() {
            let mut transport = StdioTransport::new(sh(RESPONDER), timeouts(5_000));
            transport.open().await.unwrap();
            assert!(transport.is_alive());
            assert!(transport.pid().is_some());

            for id in 1..=3 {
                let result = transport
                    .round_trip(&JsonRpcRequest::new(id, "tools/list", json!({})))
                    .await
                    .unwrap();
                assert_eq!(result, json!({"ok": true}));
            }

            for _ in 0..50 {
                if logs_contain("backend starting") {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
            assert!(logs_contain("backend starting"));

            transport.close().await.unwrap();
            assert!(!transport.is_alive());
            assert!(transport.pid().is_none());
            transport.close().await.unwrap();
        }

        #[tokio::test]
        #[traced_test]
        async fn test_unresponsive_process_is_killed_after_grace() {
            let mut transport = StdioTransport::new(sh("sleep 30"), timeouts(1_000));
            transport.open().await.unwrap();

            let started = Instant::now();
            transport.close().await.unwrap();
            assert!(started.elapsed() < Duration::from_secs(5));
            assert!(logs_contain("did not exit within grace period"));
        }

        fn drain_handle(transport: &StdioTransport) -> tokio::task::AbortHandle {
            transport
                .drain
                .as_ref()
                .map(|drain| drain.handle.abort_handle())
                .expect("drain task should be running")
        }

        #[tokio::test]
        async fn test_close_stops_stderr_drain() {
            // The background sleep keeps stderr open after sed exits, so only
            // cancellation can end the drain task
            let script = format!("sleep 5 & {}", RESPONDER);
            let mut transport = StdioTransport::new(sh(&script), timeouts(5_000));

            transport.open().await.unwrap();
            let first = drain_handle(&transport);
            assert!(!first.is_finished());

            let started = Instant::now();
            transport.close().await.unwrap();
            assert!(started.elapsed() < Duration::from_secs(3));
            assert!(transport.drain.is_none());
            assert!(first.is_finished());

            // Reopening starts exactly one fresh drain
            transport.open().await.unwrap();
            let second = drain_handle(&transport);
            assert!(!second.is_finished());
            assert!(first.is_finished());

            transport.close().await.unwrap();
            assert!(transport.drain.is_none());
            assert!(second.is_finished());
        }

        #[tokio::test]
        async fn test_exited_process_is_not_alive() {
            let mut transport = StdioTransport::new(sh("exit 0"), timeouts(1_000));
            transport.open().await.unwrap();

            let mut alive = true;
            for _ in 0..50 {
                alive = transport.is_alive();
                if !alive {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
            assert!(!alive);

            // Reopening spawns a fresh process
            transport.open().await.unwrap();
            transport.close().await.unwrap();
        }
    }
}
