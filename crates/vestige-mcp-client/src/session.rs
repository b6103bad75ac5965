//! Connection state machine and session bookkeeping for the MCP client
//!
//! ```text
//! Disconnected --begin_connect--> Connecting --begin_handshake--> Handshaking
//!      ^                                                              |
//!      |                                                         mark_ready
//!      +------------------ mark_disconnected ------------ Ready <----+
//!                                                          |  ^
//!                                               mark_degraded  mark_ready (reconnect)
//!                                                          v  |
//!                                                        Degraded
//! ```
//!
//! Everything here is plain data behind a lock; readers only ever receive
//! copies.

use parking_lot::RwLock;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::error::{McpClientError, McpClientResult, SessionError};
use crate::protocol::Implementation;

/// Connection state enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No usable connection
    Disconnected,
    /// Transport is being opened
    Connecting,
    /// Transport is open and the handshake is running
    Handshaking,
    /// Handshake completed; calls may be issued
    Ready,
    /// A call timed out on a ready connection; the next call reconnects
    Degraded,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Handshaking => write!(f, "handshaking"),
            ConnectionState::Ready => write!(f, "ready"),
            ConnectionState::Degraded => write!(f, "degraded"),
        }
    }
}

/// What a successful handshake established
#[derive(Debug, Clone, Default)]
pub struct HandshakeOutcome {
    /// Protocol version the server answered with
    pub protocol_version: String,
    /// Server identity from `serverInfo`
    pub server_info: Option<Implementation>,
    /// Tools hinted in the `initialize` capabilities
    pub tool_hint_count: usize,
    /// Tool names from `tools/list`; empty when discovery failed
    pub tool_names: Vec<String>,
    /// Session token held by the transport when the handshake finished
    pub session_id: Option<String>,
}

/// Session information and metadata
#[derive(Debug, Clone)]
pub struct SessionInfo {
    /// Current connection state
    pub state: ConnectionState,

    /// Backend-issued session token
    pub session_id: Option<String>,

    /// Protocol version negotiated
    pub protocol_version: Option<String>,

    /// Server identity
    pub server_info: Option<Implementation>,

    /// Informational tool count from `initialize`
    pub tool_hint_count: usize,

    /// Tool catalog from `tools/list`
    pub tool_names: Vec<String>,

    /// When the state last entered `Ready`
    pub ready_since: Option<Instant>,

    /// Connection attempt count
    pub connection_attempts: u32,

    /// Why the connection last went away
    pub last_error: Option<String>,
}

impl SessionInfo {
    /// Create a new session info
    pub fn new() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            session_id: None,
            protocol_version: None,
            server_info: None,
            tool_hint_count: 0,
            tool_names: Vec::new(),
            ready_since: None,
            connection_attempts: 0,
            last_error: None,
        }
    }

    /// Check if session can be used for operations
    pub fn is_ready(&self) -> bool {
        self.state == ConnectionState::Ready
    }

    /// Time since the connection became ready; zero when not connected
    pub fn uptime(&self) -> Duration {
        match (self.state, self.ready_since) {
            (ConnectionState::Ready | ConnectionState::Degraded, Some(since)) => since.elapsed(),
            _ => Duration::ZERO,
        }
    }

    fn clear_connection(&mut self) {
        self.session_id = None;
        self.protocol_version = None;
        self.server_info = None;
        self.tool_hint_count = 0;
        self.tool_names.clear();
        self.ready_since = None;
    }
}

impl Default for SessionInfo {
    fn default() -> Self {
        Self::new()
    }
}

/// Session manager handles session lifecycle and state
#[derive(Debug, Default)]
pub struct SessionManager {
    session: RwLock<SessionInfo>,
}

impl SessionManager {
    /// Create a new session manager
    pub fn new() -> Self {
        Self::default()
    }

    /// Get current session information
    pub fn session_info(&self) -> SessionInfo {
        self.session.read().clone()
    }

    /// Get current connection state
    pub fn state(&self) -> ConnectionState {
        self.session.read().state
    }

    /// Check if session is ready for operations
    pub fn is_ready(&self) -> bool {
        self.session.read().is_ready()
    }

    /// Get session ID
    pub fn session_id(&self) -> Option<String> {
        self.session.read().session_id.clone()
    }

    /// Copy of the tool catalog
    pub fn tool_names(&self) -> Vec<String> {
        self.session.read().tool_names.clone()
    }

    pub fn uptime(&self) -> Duration {
        self.session.read().uptime()
    }

    /// Start a connection attempt, discarding everything the previous connection established
    pub fn begin_connect(&self) -> McpClientResult<()> {
        let mut session = self.session.write();

        if matches!(
            session.state,
            ConnectionState::Connecting | ConnectionState::Handshaking
        ) {
            return Err(invalid_state("disconnected, ready or degraded", session.state));
        }

        session.clear_connection();
        session.state = ConnectionState::Connecting;
        session.connection_attempts += 1;

        debug!(attempt = session.connection_attempts, "Connection attempt started");
        Ok(())
    }

    /// Transport is open; the handshake starts
    pub fn begin_handshake(&self) -> McpClientResult<()> {
        let mut session = self.session.write();

        if session.state != ConnectionState::Connecting {
            return Err(invalid_state("connecting", session.state));
        }

        session.state = ConnectionState::Handshaking;
        debug!("Handshake started");
        Ok(())
    }

    /// Handshake finished; record what it established and start the uptime clock
    pub fn mark_ready(&self, outcome: HandshakeOutcome) -> McpClientResult<()> {
        let mut session = self.session.write();

        if session.state != ConnectionState::Handshaking {
            return Err(invalid_state("handshaking", session.state));
        }

        session.state = ConnectionState::Ready;
        session.session_id = outcome.session_id;
        session.protocol_version = Some(outcome.protocol_version);
        session.server_info = outcome.server_info;
        session.tool_hint_count = outcome.tool_hint_count;
        session.tool_names = outcome.tool_names;
        session.ready_since = Some(Instant::now());
        session.last_error = None;

        info!(
            session_id = session.session_id.as_deref().unwrap_or("-"),
            protocol_version = session.protocol_version.as_deref().unwrap_or("-"),
            tools = session.tool_names.len(),
            attempt = session.connection_attempts,
            "MCP connection ready"
        );
        Ok(())
    }

    /// A call timed out on a ready connection
    pub fn mark_degraded(&self, reason: &str) -> McpClientResult<()> {
        let mut session = self.session.write();

        if session.state != ConnectionState::Ready {
            return Err(invalid_state("ready", session.state));
        }

        session.state = ConnectionState::Degraded;
        session.last_error = Some(reason.to_string());
        warn!(reason, "MCP connection degraded");
        Ok(())
    }

    /// Drop back to `Disconnected` from any state; uptime and catalog reset
    pub fn mark_disconnected(&self, reason: Option<&str>) {
        let mut session = self.session.write();

        let previous_state = session.state;
        session.clear_connection();
        session.state = ConnectionState::Disconnected;
        if let Some(reason) = reason {
            session.last_error = Some(reason.to_string());
        }

        if previous_state != ConnectionState::Disconnected {
            info!(
                previous_state = %previous_state,
                reason = reason.unwrap_or("requested"),
                "MCP connection closed"
            );
        }
    }

    /// Follow a session token the transport adopted mid-connection
    pub fn sync_session_id(&self, session_id: Option<String>) {
        self.session.write().session_id = session_id;
    }
}

fn invalid_state(expected: &str, actual: ConnectionState) -> McpClientError {
    SessionError::InvalidState {
        expected: expected.to_string(),
        actual: actual.to_string(),
    }
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(tools: &[&str]) -> HandshakeOutcome {
        HandshakeOutcome {
            protocol_version: "2025-03-26".to_string(),
            server_info: Some(Implementation {
                name: "vestige".to_string(),
                version: "1.0.0".to_string(),
            }),
            tool_hint_count: 0,
            tool_names: tools.iter().map(|t| t.to_string()).collect(),
            session_id: Some("sid".to_string()),
        }
    }

    fn connect(manager: &SessionManager, tools: &[&str]) {
        manager.begin_connect().unwrap();
        manager.begin_handshake().unwrap();
        manager.mark_ready(outcome(tools)).unwrap();
    }

    #[test]
    fn test_session_lifecycle() {
        let manager = SessionManager::new();

        // Initial state should be disconnected
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert!(!manager.is_ready());
        assert_eq!(manager.uptime(), Duration::ZERO);

        manager.begin_connect().unwrap();
        assert_eq!(manager.state(), ConnectionState::Connecting);
        manager.begin_handshake().unwrap();
        assert_eq!(manager.state(), ConnectionState::Handshaking);
        manager.mark_ready(outcome(&["search", "ingest"])).unwrap();

        assert!(manager.is_ready());
        assert_eq!(manager.session_id().as_deref(), Some("sid"));
        assert_eq!(manager.tool_names(), vec!["search", "ingest"]);

        let info = manager.session_info();
        assert_eq!(info.protocol_version.as_deref(), Some("2025-03-26"));
        assert_eq!(info.server_info.unwrap().name, "vestige");
        assert_eq!(info.connection_attempts, 1);

        manager.mark_disconnected(None);
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert!(manager.session_id().is_none());
        assert!(manager.tool_names().is_empty());
        assert_eq!(manager.uptime(), Duration::ZERO);
    }

    #[test]
    fn test_invalid_transitions() {
        let manager = SessionManager::new();

        let err = manager.begin_handshake().unwrap_err();
        assert!(matches!(
            err,
            McpClientError::Session(SessionError::InvalidState { .. })
        ));
        assert!(manager.mark_ready(outcome(&[])).is_err());
        assert!(manager.mark_degraded("timeout").is_err());

        manager.begin_connect().unwrap();
        // A second attempt cannot start while one is in flight
        assert!(manager.begin_connect().is_err());
    }

    #[test]
    fn test_uptime_increases_while_ready() {
        let manager = SessionManager::new();
        connect(&manager, &[]);

        let first = manager.uptime();
        std::thread::sleep(Duration::from_millis(5));
        let second = manager.uptime();
        assert!(second > first);
    }

    #[test]
    fn test_degraded_then_reconnect() {
        let manager = SessionManager::new();
        connect(&manager, &["search"]);

        manager.mark_degraded("request timed out").unwrap();
        assert_eq!(manager.state(), ConnectionState::Degraded);
        assert!(!manager.is_ready());
        assert!(manager.uptime() > Duration::ZERO);
        assert_eq!(
            manager.session_info().last_error.as_deref(),
            Some("request timed out")
        );

        connect(&manager, &["search"]);
        assert!(manager.is_ready());
        assert_eq!(manager.session_info().connection_attempts, 2);
    }

    #[test]
    fn test_tool_names_are_a_copy() {
        let manager = SessionManager::new();
        connect(&manager, &["search"]);

        let mut names = manager.tool_names();
        names.push("injected".to_string());
        assert_eq!(manager.tool_names(), vec!["search"]);
    }

    #[test]
    fn test_sync_session_id() {
        let manager = SessionManager::new();
        connect(&manager, &[]);

        manager.sync_session_id(Some("sid2".to_string()));
        assert_eq!(manager.session_id().as_deref(), Some("sid2"));
    }
}
