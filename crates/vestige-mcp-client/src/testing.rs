//! Scripted in-memory transport for unit tests

use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use crate::codec::{JsonRpcNotification, JsonRpcRequest};
use crate::error::{McpClientError, McpClientResult};
use crate::transport::{BoxedTransport, ConnectionInfo, Transport, TransportType};

/// Everything the scripted transport answers with and everything it saw
#[derive(Default)]
pub(crate) struct Script {
    queued: HashMap<String, VecDeque<McpClientResult<Value>>>,
    fallback: HashMap<String, Value>,
    delays: HashMap<String, Duration>,
    pub requests: Vec<JsonRpcRequest>,
    pub notifications: Vec<String>,
    pub opens: usize,
    pub closes: usize,
    pub alive: bool,
    pub requires_session: bool,
    pub session_id: Option<String>,
    /// Session token handed out by every `initialize`
    pub issue_session: Option<String>,
    pub failing_opens: usize,
    pub fail_notifications: bool,
}

#[derive(Clone)]
pub(crate) struct ScriptHandle(Arc<parking_lot::Mutex<Script>>);

impl ScriptHandle {
    /// A backend that handshakes cleanly, lists `search` and `ingest`, and
    /// answers every tool call with `ok`
    pub fn new() -> Self {
        let mut script = Script::default();
        script.fallback.insert(
            "initialize".to_string(),
            json!({
                "protocolVersion": "2025-03-26",
                "capabilities": {"tools": [{"name": "search"}]},
                "serverInfo": {"name": "vestige", "version": "1.0.0"}
            }),
        );
        script.fallback.insert(
            "tools/list".to_string(),
            json!({"tools": [{"name": "search"}, {"name": "ingest"}]}),
        );
        script.fallback.insert(
            "tools/call".to_string(),
            json!({"content": [{"type": "text", "text": "ok"}]}),
        );
        Self(Arc::new(parking_lot::Mutex::new(script)))
    }

    /// Same backend, but stateful: every `initialize` issues `session`
    pub fn with_session(session: &str) -> Self {
        let handle = Self::new();
        handle.with(|s| {
            s.requires_session = true;
            s.issue_session = Some(session.to_string());
        });
        handle
    }

    pub fn transport(&self) -> BoxedTransport {
        Box::new(ScriptedTransport {
            script: self.clone(),
        })
    }

    pub fn with<R>(&self, f: impl FnOnce(&mut Script) -> R) -> R {
        f(&mut self.0.lock())
    }

    /// Answer the next `method` request with `result` instead of the fallback
    pub fn queue(&self, method: &str, result: McpClientResult<Value>) {
        self.with(|s| {
            s.queued
                .entry(method.to_string())
                .or_default()
                .push_back(result)
        });
    }

    pub fn fallback(&self, method: &str, value: Value) {
        self.with(|s| s.fallback.insert(method.to_string(), value));
    }

    pub fn delay(&self, method: &str, delay: Duration) {
        self.with(|s| s.delays.insert(method.to_string(), delay));
    }

    pub fn count(&self, method: &str) -> usize {
        self.with(|s| s.requests.iter().filter(|r| r.method == method).count())
    }

    pub fn last_params(&self, method: &str) -> Option<Value> {
        self.with(|s| {
            s.requests
                .iter()
                .rev()
                .find(|r| r.method == method)
                .map(|r| r.params.clone())
        })
    }

    /// Simulate the backend going away underneath the client
    pub fn kill(&self) {
        self.with(|s| s.alive = false);
    }
}

struct ScriptedTransport {
    script: ScriptHandle,
}

#[async_trait]
impl Transport for ScriptedTransport {
    fn transport_type(&self) -> TransportType {
        TransportType::Http
    }

    async fn open(&mut self) -> McpClientResult<()> {
        self.script.with(|s| {
            s.opens += 1;
            if s.failing_opens > 0 {
                s.failing_opens -= 1;
                return Err(McpClientError::connection("scripted open failure"));
            }
            s.alive = true;
            Ok(())
        })
    }

    async fn close(&mut self) -> McpClientResult<()> {
        self.script.with(|s| {
            s.closes += 1;
            s.alive = false;
            s.session_id = None;
        });
        Ok(())
    }

    fn is_alive(&mut self) -> bool {
        self.script.with(|s| s.alive)
    }

    async fn round_trip(&mut self, request: &JsonRpcRequest) -> McpClientResult<Value> {
        let delay = self.script.with(|s| {
            s.requests.push(request.clone());
            s.delays.get(&request.method).copied()
        });
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        self.script.with(|s| {
            if !s.alive {
                return Err(McpClientError::connection("scripted transport is closed"));
            }
            if request.method == "initialize" && s.issue_session.is_some() {
                s.session_id = s.issue_session.clone();
            }

            let queued = s
                .queued
                .get_mut(&request.method)
                .and_then(VecDeque::pop_front);
            let result = match queued {
                Some(result) => result,
                None => s.fallback.get(&request.method).cloned().ok_or_else(|| {
                    McpClientError::rpc(-32601, format!("Method not found: {}", request.method), None)
                }),
            };

            if matches!(result, Err(McpClientError::Connection(_))) {
                s.alive = false;
            }
            result
        })
    }

    async fn send_notification(
        &mut self,
        notification: &JsonRpcNotification,
    ) -> McpClientResult<()> {
        self.script.with(|s| {
            if s.fail_notifications || !s.alive {
                return Err(McpClientError::connection("scripted notification failure"));
            }
            s.notifications.push(notification.method.clone());
            Ok(())
        })
    }

    fn requires_session(&self) -> bool {
        self.script.with(|s| s.requires_session)
    }

    fn session_id(&self) -> Option<String> {
        self.script.with(|s| s.session_id.clone())
    }

    fn clear_session(&mut self) {
        self.script.with(|s| s.session_id = None);
    }

    fn connection_info(&self) -> ConnectionInfo {
        ConnectionInfo {
            transport_type: TransportType::Http,
            endpoint: "scripted://backend".to_string(),
            connected: self.script.with(|s| s.alive),
            metadata: Value::Null,
        }
    }
}
