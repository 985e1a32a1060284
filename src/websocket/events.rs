use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Gateway opcodes, server -> client.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum GatewayOp {
    /// Topic event fan-out; `t` names the event, `d` carries its payload.
    Dispatch,
    /// Sent once immediately after a successful handshake.
    Ready,
    /// Acknowledges a client command (e.g. `join_channel`) that needs to
    /// return data, such as the channel's current head `messageNo` so the
    /// client can decide whether it needs a resync (spec component C10).
    Ack,
    HeartbeatAck,
    Error,
}

/// Envelope for every server -> client frame.
#[derive(Debug, Serialize)]
pub struct GatewayMessage {
    pub op: GatewayOp,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub t: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub d: Option<Value>,
    /// Echoes the client-chosen `requestId` of the command this frame
    /// answers, so a client juggling multiple in-flight join/leave commands
    /// can tell which one a given ack or error belongs to.
    #[serde(skip_serializing_if = "Option::is_none", rename = "requestId")]
    pub request_id: Option<String>,
}

impl GatewayMessage {
    pub fn dispatch(event: impl Into<String>, data: Value) -> Self {
        GatewayMessage {
            op: GatewayOp::Dispatch,
            t: Some(event.into()),
            d: Some(data),
            request_id: None,
        }
    }

    pub fn ready(data: Value) -> Self {
        GatewayMessage {
            op: GatewayOp::Ready,
            t: None,
            d: Some(data),
            request_id: None,
        }
    }

    pub fn ack(request_id: Option<String>, data: Value) -> Self {
        GatewayMessage {
            op: GatewayOp::Ack,
            t: None,
            d: Some(data),
            request_id,
        }
    }

    pub fn heartbeat_ack() -> Self {
        GatewayMessage {
            op: GatewayOp::HeartbeatAck,
            t: None,
            d: None,
            request_id: None,
        }
    }

    pub fn error(code: &str, message: &str, request_id: Option<String>) -> Self {
        GatewayMessage {
            op: GatewayOp::Error,
            t: None,
            d: Some(serde_json::json!({ "code": code, "message": message })),
            request_id,
        }
    }
}

/// Commands a client may send once authenticated, matching spec §6.2's
/// connection-lifecycle operation set. Every command but `heartbeat` carries
/// an optional client-chosen `requestId` so its ack or error can be
/// correlated back to the call site.
#[derive(Debug, Deserialize)]
#[serde(tag = "op", content = "d", rename_all = "snake_case")]
pub enum ClientCommand {
    Heartbeat,
    JoinWorkspace {
        workspace_id: Uuid,
        request_id: Option<String>,
    },
    LeaveWorkspace {
        workspace_id: Uuid,
        request_id: Option<String>,
    },
    JoinChannel {
        channel_id: Uuid,
        request_id: Option<String>,
    },
    LeaveChannel {
        channel_id: Uuid,
        request_id: Option<String>,
    },
}
