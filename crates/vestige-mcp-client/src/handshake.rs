//! The MCP handshake: `initialize`, `notifications/initialized`, `tools/list`

use serde_json::{Map, json};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::codec::{JsonRpcNotification, JsonRpcRequest, RequestIdGenerator};
use crate::config::ClientConfig;
use crate::error::{McpClientError, McpClientResult, ProtocolError};
use crate::protocol::{
    InitializeParams, InitializeResult, ListToolsResult, SUPPORTED_PROTOCOL_VERSIONS, methods,
};
use crate::session::HandshakeOutcome;
use crate::transport::{Transport, round_trip_within};

/// Run the three-step handshake over an open transport.
///
/// `initialize` and the `initialized` notification must succeed. A failed
/// `tools/list` only leaves the catalog empty, since tools may still be
/// callable by name.
pub async fn perform(
    transport: &mut dyn Transport,
    config: &ClientConfig,
    ids: &RequestIdGenerator,
) -> McpClientResult<HandshakeOutcome> {
    let limit = config.timeouts.request;

    let initialized = initialize(transport, config, ids, limit).await?;
    let protocol_version =
        negotiate_version(&config.protocol_version, initialized.protocol_version.as_deref())?;

    let tool_hint_count = initialized.tool_hint_count();
    if tool_hint_count > 0 {
        debug!(tool_hint_count, "Server hinted tools during initialize");
    }

    transport
        .send_notification(&JsonRpcNotification::new(methods::INITIALIZED, json!({})))
        .await?;

    let tool_names = discover_tools(transport, ids, limit).await;

    Ok(HandshakeOutcome {
        protocol_version,
        server_info: initialized.server_info,
        tool_hint_count,
        tool_names,
        session_id: transport.session_id(),
    })
}

async fn initialize(
    transport: &mut dyn Transport,
    config: &ClientConfig,
    ids: &RequestIdGenerator,
    limit: Duration,
) -> McpClientResult<InitializeResult> {
    let params = InitializeParams {
        protocol_version: config.protocol_version.clone(),
        capabilities: Map::new(),
        client_info: (&config.client_info).into(),
    };
    let params = serde_json::to_value(params).map_err(|e| {
        McpClientError::Protocol(ProtocolError::InvalidRequest(e.to_string()))
    })?;

    let request = JsonRpcRequest::new(ids.next_id(), methods::INITIALIZE, params);
    let result = round_trip_within(transport, &request, limit).await?;

    serde_json::from_value(result)
        .map_err(|e| McpClientError::invalid_response(format!("Malformed initialize result: {}", e)))
}

/// Accept the server's answer if it is a version this client speaks
fn negotiate_version(requested: &str, received: Option<&str>) -> McpClientResult<String> {
    let Some(received) = received else {
        return Err(ProtocolError::UnsupportedVersion {
            requested: requested.to_string(),
            received: "<none>".to_string(),
        }
        .into());
    };

    if !SUPPORTED_PROTOCOL_VERSIONS.contains(&received) {
        return Err(ProtocolError::UnsupportedVersion {
            requested: requested.to_string(),
            received: received.to_string(),
        }
        .into());
    }

    if received != requested {
        info!(requested, received, "Server negotiated a different protocol version");
    }
    Ok(received.to_string())
}

async fn discover_tools(
    transport: &mut dyn Transport,
    ids: &RequestIdGenerator,
    limit: Duration,
) -> Vec<String> {
    let request = JsonRpcRequest::new(ids.next_id(), methods::TOOLS_LIST, json!({}));

    let listed = match round_trip_within(transport, &request, limit).await {
        Ok(result) => serde_json::from_value::<ListToolsResult>(result).map_err(|e| {
            McpClientError::invalid_response(format!("Malformed tools/list result: {}", e))
        }),
        Err(e) => Err(e),
    };

    match listed {
        Ok(listed) => {
            let names: Vec<String> = listed
                .tools
                .into_iter()
                .map(|tool| tool.name)
                .filter(|name| !name.is_empty())
                .collect();
            info!(count = names.len(), tools = ?names, "Discovered MCP tools");
            names
        }
        Err(e) => {
            warn!(error = %e, "Tool discovery failed, continuing with an empty catalog");
            Vec::new()
        }
    }
}
