use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use futures::{SinkExt, StreamExt};
use serde_json::json;
use tokio::sync::mpsc;
use uuid::Uuid;

use super::event_bus::EventBus;
use super::events::{ClientCommand, GatewayMessage};
use crate::{
    auth::{validate_token, TokenType},
    models::{User, UserDto, Workspace},
    state::AppState,
};

/// JWT is passed as a query parameter because WebSocket upgrade requests are
/// plain GET requests and cannot carry an Authorization header reliably
/// across all client environments.
///
/// Note: query-parameter tokens appear in server and proxy access logs; use
/// short-lived access tokens to limit exposure.
#[derive(Debug, serde::Deserialize)]
pub struct WsParams {
    pub token: String,
}

/// GET /ws?token=<access_token> — upgrade to a WebSocket connection.
///
/// Implements the Handshaking stage of the connection lifecycle: the JWT is
/// validated before the upgrade is accepted, so an invalid token gets a
/// plain 401 with no upgrade attempt.
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<WsParams>,
    State(state): State<AppState>,
) -> Response {
    let claims = match validate_token(&params.token, &state.jwt_secret) {
        Ok(c) => c,
        Err(e) => {
            return (StatusCode::UNAUTHORIZED, e.to_string()).into_response();
        }
    };

    if claims.token_type != TokenType::Access {
        return (StatusCode::UNAUTHORIZED, "access token required").into_response();
    }

    let user_id = match claims.user_id() {
        Ok(id) => id,
        Err(_) => return (StatusCode::UNAUTHORIZED, "invalid token subject").into_response(),
    };

    ws.on_upgrade(move |socket| handle_socket(socket, user_id, state))
}

/// Drives one connection through Authenticated -> Active -> Closing.
/// Handshaking already completed in `websocket_handler` above.
async fn handle_socket(socket: WebSocket, user_id: Uuid, state: AppState) {
    let connection_id = Uuid::new_v4();
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (outbound_tx, mut outbound_rx) =
        mpsc::channel::<String>(state.config.outbound_queue_capacity);
    let (disconnect_tx, mut disconnect_rx) = mpsc::channel::<()>(1);

    let Some(ready) = build_ready(&state, user_id).await else {
        tracing::warn!(user_id = %user_id, "failed to build ready payload, closing connection");
        return;
    };

    if ws_sender.send(Message::Text(ready)).await.is_err() {
        return;
    }

    // Register only after READY is on the wire, so no dispatch can be
    // delivered before the client has its initial snapshot.
    state
        .rooms
        .register(connection_id, user_id, outbound_tx, disconnect_tx)
        .await;

    // Every connection is implicitly subscribed to its own inbox: DM
    // traffic, private-channel announcements, and membership-removal
    // notices are addressed here regardless of which workspace/channel
    // topics the client has explicitly joined.
    state
        .rooms
        .join_topic(&state.event_bus, connection_id, &EventBus::user_topic(user_id), state.config.room_linger_window)
        .await;

    let mut send_task = tokio::spawn(async move {
        while let Some(text) = outbound_rx.recv().await {
            if ws_sender.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    let (missed_heartbeats_tx, mut missed_heartbeats_rx) = mpsc::channel::<()>(1);
    let heartbeat_interval = state.config.heartbeat_interval;
    let miss_threshold = state.config.heartbeat_miss_threshold;
    let heartbeat_monitor = tokio::spawn(async move {
        let mut misses = 0u32;
        let mut ticker = tokio::time::interval(heartbeat_interval);
        ticker.tick().await; // skip the immediate first tick
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    misses += 1;
                    if misses >= miss_threshold {
                        break;
                    }
                }
                _ = missed_heartbeats_rx.recv() => {
                    misses = 0;
                }
                else => break,
            }
        }
    });

    let state_for_recv = state.clone();
    let mut recv_task = tokio::spawn(async move {
        loop {
            match ws_receiver.next().await {
                Some(Ok(Message::Text(text))) => {
                    let _ = missed_heartbeats_tx.try_send(());
                    handle_client_command(connection_id, user_id, &text, &state_for_recv).await;
                }
                Some(Ok(Message::Close(_))) => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::debug!(user_id = %user_id, error = ?e, "websocket receive error, closing");
                    break;
                }
                None => break,
            }
        }
    });

    // Whichever of these finishes first ends the Active stage; the rest are
    // aborted below (Closing). A disconnect signal means a forwarding task
    // hit a full outbound queue: the client isn't draining fast enough
    // (property P7, SlowConsumer).
    tokio::select! {
        _ = &mut send_task => { recv_task.abort(); heartbeat_monitor.abort(); }
        _ = &mut recv_task => { send_task.abort(); heartbeat_monitor.abort(); }
        _ = heartbeat_monitor => {
            tracing::debug!(user_id = %user_id, "heartbeat timeout, closing connection");
            send_task.abort();
            recv_task.abort();
        }
        _ = disconnect_rx.recv() => {
            tracing::warn!(user_id = %user_id, connection_id = %connection_id, "slow consumer disconnect");
            send_task.abort();
            recv_task.abort();
        }
    }

    let topics = state.rooms.unregister(connection_id).await;
    for topic in topics {
        state.event_bus.try_cleanup(&topic).await;
    }
    // Unregister reclaims immediately (the connection is gone for good, unlike
    // a mid-session leave_topic which might be followed by a quick rejoin).
}

async fn handle_client_command(connection_id: Uuid, user_id: Uuid, text: &str, state: &AppState) {
    let Ok(cmd) = serde_json::from_str::<ClientCommand>(text) else {
        return;
    };

    match cmd {
        ClientCommand::Heartbeat => {
            send_local(state, connection_id, GatewayMessage::heartbeat_ack()).await;
        }
        ClientCommand::JoinWorkspace { workspace_id, request_id } => {
            match state.membership.is_workspace_member(user_id, workspace_id).await {
                Ok(true) => {
                    let topic = EventBus::workspace_topic(workspace_id);
                    state.rooms.join_topic(&state.event_bus, connection_id, &topic, state.config.room_linger_window).await;
                    send_local(
                        state,
                        connection_id,
                        GatewayMessage::ack(request_id, json!({ "workspaceId": workspace_id })),
                    )
                    .await;
                }
                Ok(false) => {
                    send_local(
                        state,
                        connection_id,
                        GatewayMessage::error("FORBIDDEN", "not a workspace member", request_id),
                    )
                    .await;
                }
                Err(e) => {
                    tracing::warn!(error = ?e, "membership check failed");
                }
            }
        }
        ClientCommand::LeaveWorkspace { workspace_id, request_id } => {
            let topic = EventBus::workspace_topic(workspace_id);
            state.rooms.leave_topic(&state.event_bus, connection_id, &topic, state.config.room_linger_window).await;

            // Leaving a workspace topic also leaves every channel topic
            // nested under it, so a connection that un-joins a workspace
            // doesn't keep receiving per-channel dispatches for channels it
            // can no longer act on through that workspace context.
            if let Ok(channel_ids) = state
                .membership
                .channels_of_user_in_workspace(user_id, workspace_id)
                .await
            {
                for channel_id in channel_ids {
                    let channel_topic = EventBus::channel_topic(channel_id);
                    state.rooms.leave_topic(&state.event_bus, connection_id, &channel_topic, state.config.room_linger_window).await;
                }
            }

            send_local(
                state,
                connection_id,
                GatewayMessage::ack(request_id, json!({ "workspaceId": workspace_id })),
            )
            .await;
        }
        ClientCommand::JoinChannel { channel_id, request_id } => {
            match state.membership.is_channel_member(user_id, channel_id).await {
                Ok(true) => {
                    let topic = EventBus::channel_topic(channel_id);
                    state.rooms.join_topic(&state.event_bus, connection_id, &topic, state.config.room_linger_window).await;

                    // Current head lets the client decide whether it needs
                    // to resync (spec component C10) before trusting live
                    // dispatches to be contiguous with its own history.
                    let current_head: Option<i64> = sqlx::query_scalar(
                        "SELECT MAX(message_no) FROM messages WHERE channel_id = $1",
                    )
                    .bind(channel_id)
                    .fetch_one(&state.pool)
                    .await
                    .ok()
                    .flatten();

                    send_local(
                        state,
                        connection_id,
                        GatewayMessage::ack(
                            request_id,
                            json!({ "channelId": channel_id, "currentHead": current_head.unwrap_or(0) }),
                        ),
                    )
                    .await;
                }
                Ok(false) => {
                    send_local(
                        state,
                        connection_id,
                        GatewayMessage::error("FORBIDDEN", "not a channel member", request_id),
                    )
                    .await;
                }
                Err(e) => {
                    tracing::warn!(error = ?e, "membership check failed");
                }
            }
        }
        ClientCommand::LeaveChannel { channel_id, request_id } => {
            let topic = EventBus::channel_topic(channel_id);
            state.rooms.leave_topic(&state.event_bus, connection_id, &topic, state.config.room_linger_window).await;
            send_local(
                state,
                connection_id,
                GatewayMessage::ack(request_id, json!({ "channelId": channel_id })),
            )
            .await;
        }
    }
}

/// Deliver a frame that originates locally (acks, errors, heartbeat acks)
/// rather than from a topic broadcast.
async fn send_local(state: &AppState, connection_id: Uuid, msg: GatewayMessage) {
    let Ok(text) = serde_json::to_string(&msg) else {
        return;
    };
    state.rooms.send_direct(connection_id, text).await;
}

/// Broadcast the `server.shutdown` hint to every locally-registered
/// connection (spec §5): sent once, before new connections are refused and
/// the drain grace period begins, so clients can reconnect proactively
/// rather than waiting on a hard close.
pub async fn broadcast_shutdown_hint(state: &AppState, grace: std::time::Duration) {
    let frame = GatewayMessage::dispatch(
        "server.shutdown",
        json!({ "gracePeriodMs": grace.as_millis() as u64 }),
    );
    let Ok(text) = serde_json::to_string(&frame) else {
        return;
    };
    state.rooms.broadcast_all(&text).await;
}

/// Build the READY payload: the connecting user's own profile plus every
/// workspace they belong to, so the client can render its sidebar before
/// joining any topics.
async fn build_ready(state: &AppState, user_id: Uuid) -> Option<String> {
    let user: UserDto = sqlx::query_as::<_, User>(
        "SELECT id, username, email, password_hash, display_name, avatar_url, created_at, updated_at
         FROM users WHERE id = $1",
    )
    .bind(user_id)
    .fetch_optional(&state.pool)
    .await
    .ok()??
    .into();

    let workspaces = sqlx::query_as::<_, Workspace>(
        "SELECT w.id, w.name, w.display_name, w.owner_id, w.is_archived, w.created_at, w.updated_at
         FROM workspaces w
         JOIN workspace_memberships wm ON w.id = wm.workspace_id
         WHERE wm.user_id = $1
         ORDER BY w.created_at ASC",
    )
    .bind(user_id)
    .fetch_all(&state.pool)
    .await
    .unwrap_or_default();

    let payload = GatewayMessage::ready(json!({ "user": user, "workspaces": workspaces }));
    serde_json::to_string(&payload).ok()
}
