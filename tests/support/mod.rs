//! Stateful MCP backend mounted on a wiremock server
//!
//! Issues `Mcp-Session-Id` tokens on `initialize`, rejects unknown tokens
//! with HTTP 404 "Session not found", and serves a tiny tool catalog.

#![allow(dead_code)]

use parking_lot::Mutex;
use serde_json::{Value, json};
use std::collections::HashSet;
use std::sync::Arc;
use wiremock::{Request, Respond, ResponseTemplate};

pub const SESSION_HEADER: &str = "Mcp-Session-Id";

#[derive(Default)]
struct State {
    issued: u32,
    current: Option<String>,
    accepted: HashSet<String>,
    methods: Vec<String>,
    seen_sessions: Vec<Option<String>>,
    event_stream: bool,
}

/// Cloneable handle; every clone drives the same backend state
#[derive(Clone, Default)]
pub struct Backend {
    state: Arc<Mutex<State>>,
}

impl Backend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer requests with `text/event-stream` bodies instead of JSON
    pub fn event_stream(self) -> Self {
        self.state.lock().event_stream = true;
        self
    }

    /// Hand out a new token on the next response while still honoring the old one
    pub fn rotate_session(&self) -> String {
        let mut state = self.state.lock();
        let sid = issue(&mut state);
        state.current = Some(sid.clone());
        sid
    }

    /// Forget every session, as a restarted backend would
    pub fn expire_sessions(&self) {
        let mut state = self.state.lock();
        state.accepted.clear();
        state.current = None;
    }

    pub fn count(&self, method: &str) -> usize {
        self.state
            .lock()
            .methods
            .iter()
            .filter(|m| *m == method)
            .count()
    }

    pub fn methods(&self) -> Vec<String> {
        self.state.lock().methods.clone()
    }

    /// Session header carried by the most recent `method` request
    pub fn last_session_for(&self, method: &str) -> Option<String> {
        let state = self.state.lock();
        state
            .methods
            .iter()
            .zip(state.seen_sessions.iter())
            .rev()
            .find(|(m, _)| *m == method)
            .and_then(|(_, sid)| sid.clone())
    }

    pub fn sessions_issued(&self) -> u32 {
        self.state.lock().issued
    }
}

fn issue(state: &mut State) -> String {
    state.issued += 1;
    let sid = format!("sid{}", state.issued);
    state.accepted.insert(sid.clone());
    sid
}

fn tool_result(params: &Value) -> Value {
    let arguments = &params["arguments"];
    match params["name"].as_str() {
        Some("search") => json!({
            "content": [
                {"type": "text", "text": format!("found: {}", arguments["query"].as_str().unwrap_or(""))}
            ]
        }),
        Some("ingest") => json!({
            "content": [
                {"type": "text", "text": "stored"},
                {"type": "resource", "resource": {"uri": "memory://1"}}
            ]
        }),
        Some("fail") => json!({
            "content": [
                {"type": "text", "text": "disk"},
                {"type": "text", "text": "full"}
            ],
            "isError": true
        }),
        _ => Value::Null,
    }
}

impl Respond for Backend {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let Ok(body) = serde_json::from_slice::<Value>(&request.body) else {
            return ResponseTemplate::new(400).set_body_string("unparseable body");
        };
        let method = body["method"].as_str().unwrap_or_default().to_string();
        let sid = request
            .headers
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let mut state = self.state.lock();
        state.methods.push(method.clone());
        state.seen_sessions.push(sid.clone());

        if method == "initialize" {
            let fresh = issue(&mut state);
            state.current = Some(fresh);
        } else if !sid.as_ref().is_some_and(|s| state.accepted.contains(s)) {
            return ResponseTemplate::new(404).set_body_string("Session not found");
        }

        let Some(id) = body.get("id").cloned() else {
            return ResponseTemplate::new(202);
        };

        let params = &body["params"];
        let reply = match method.as_str() {
            "initialize" => json!({"jsonrpc": "2.0", "id": id, "result": {
                "protocolVersion": params["protocolVersion"],
                "capabilities": {"tools": {"listChanged": false}},
                "serverInfo": {"name": "mock-vestige", "version": "0.9.0"}
            }}),
            "tools/list" => json!({"jsonrpc": "2.0", "id": id, "result": {
                "tools": [{"name": "search"}, {"name": "ingest"}, {"name": "fail"}]
            }}),
            "tools/call" => match tool_result(params) {
                Value::Null => json!({"jsonrpc": "2.0", "id": id, "error": {
                    "code": -32602,
                    "message": format!("Unknown tool: {}", params["name"])
                }}),
                result => json!({"jsonrpc": "2.0", "id": id, "result": result}),
            },
            other => json!({"jsonrpc": "2.0", "id": id, "error": {
                "code": -32601,
                "message": format!("Method not found: {}", other)
            }}),
        };

        let mut response = ResponseTemplate::new(200);
        if let Some(current) = &state.current {
            response = response.insert_header(SESSION_HEADER, current.as_str());
        }
        if state.event_stream {
            let frame = format!("event: message\ndata: {}\n\n", reply);
            response.set_body_raw(frame, "text/event-stream")
        } else {
            response.set_body_json(reply)
        }
    }
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
