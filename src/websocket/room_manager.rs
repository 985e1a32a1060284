use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, RwLock};
use tokio::task::AbortHandle;
use uuid::Uuid;

use super::event_bus::{BusEvent, EventBus};
use super::events::GatewayMessage;

/// Per-socket bookkeeping: the outbound queue the gateway handler drains to
/// write frames, plus which topics this socket currently forwards from.
struct Connection {
    user_id: Uuid,
    outbound: mpsc::Sender<String>,
    /// Signalled by a forwarding task when the outbound queue is full, so the
    /// gateway handler can tear the whole connection down with SlowConsumer
    /// (spec property P7) instead of silently dropping or blocking forever.
    disconnect: mpsc::Sender<()>,
    subscribed_topics: HashSet<String>,
    forward_tasks: HashMap<String, AbortHandle>,
}

/// Tracks which sockets, in this process, are subscribed to which topics
/// (spec component C7). One `RoomManager` is shared across all gateway
/// connections; it owns the forwarding tasks that copy `EventBus` broadcasts
/// into each socket's bounded outbound queue, and tears them down on
/// unsubscribe or disconnect.
///
/// Generalizes a single flat user->sender map into a topic-subscription
/// registry: the same connection can be joined to many workspace and
/// channel topics at once, each with its own forwarding task so a slow
/// consumer on one topic doesn't block delivery on another.
#[derive(Clone)]
pub struct RoomManager {
    connections: Arc<RwLock<HashMap<Uuid, Connection>>>,
    user_index: Arc<RwLock<HashMap<Uuid, HashSet<Uuid>>>>,
}

impl RoomManager {
    pub fn new() -> Self {
        RoomManager {
            connections: Arc::new(RwLock::new(HashMap::new())),
            user_index: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Register a newly-handshaked socket. `disconnect` is signalled by this
    /// manager when a forwarding task finds the outbound queue full; the
    /// caller must select on it alongside its send/recv tasks and close the
    /// socket with `SlowConsumer` when it fires.
    pub async fn register(
        &self,
        connection_id: Uuid,
        user_id: Uuid,
        outbound: mpsc::Sender<String>,
        disconnect: mpsc::Sender<()>,
    ) {
        self.connections.write().await.insert(
            connection_id,
            Connection {
                user_id,
                outbound,
                disconnect,
                subscribed_topics: HashSet::new(),
                forward_tasks: HashMap::new(),
            },
        );
        self.user_index
            .write()
            .await
            .entry(user_id)
            .or_default()
            .insert(connection_id);
    }

    /// Tear down a socket: abort every forwarding task and drop its entry.
    /// Returns the topics it was joined to, so the caller can opportunistically
    /// ask the event bus to reclaim any that are now empty.
    pub async fn unregister(&self, connection_id: Uuid) -> Vec<String> {
        let mut connections = self.connections.write().await;
        let Some(conn) = connections.remove(&connection_id) else {
            return Vec::new();
        };
        drop(connections);

        for handle in conn.forward_tasks.values() {
            handle.abort();
        }

        let mut user_index = self.user_index.write().await;
        if let Some(set) = user_index.get_mut(&conn.user_id) {
            set.remove(&connection_id);
            if set.is_empty() {
                user_index.remove(&conn.user_id);
            }
        }

        conn.subscribed_topics.into_iter().collect()
    }

    /// Join a topic: subscribe to its broadcast channel and spawn a task
    /// that forwards every event into this socket's outbound queue until
    /// the socket leaves, disconnects, or the topic is closed. A no-op if
    /// already joined.
    ///
    /// `linger` is threaded through to the forwarding task so it can act on
    /// self-eviction notices (`channel.member.left` / `workspace.member.left`
    /// / `workspace.deleted` naming this connection's own user) by locally
    /// leaving the affected topic(s) itself, without the client having to
    /// send an explicit `leave_*` command (spec §4.8, property P3).
    pub async fn join_topic(&self, event_bus: &EventBus, connection_id: Uuid, topic: &str, linger: std::time::Duration) {
        let (outbound, disconnect, user_id, already_joined) = {
            let connections = self.connections.read().await;
            match connections.get(&connection_id) {
                Some(c) if c.subscribed_topics.contains(topic) => {
                    (c.outbound.clone(), c.disconnect.clone(), c.user_id, true)
                }
                Some(c) => (c.outbound.clone(), c.disconnect.clone(), c.user_id, false),
                None => return,
            }
        };
        if already_joined {
            return;
        }

        let rx = event_bus.subscribe(topic).await;
        let handle = tokio::spawn(forward_topic_events(
            rx,
            outbound,
            disconnect,
            connection_id,
            user_id,
            topic.to_string(),
            self.clone(),
            event_bus.clone(),
            linger,
        ));

        let mut connections = self.connections.write().await;
        if let Some(conn) = connections.get_mut(&connection_id) {
            conn.subscribed_topics.insert(topic.to_string());
            conn.forward_tasks.insert(topic.to_string(), handle.abort_handle());
        } else {
            handle.abort_handle().abort();
        }
    }

    /// Leave a topic: abort its forwarding task immediately (this socket
    /// stops receiving right away), but defer reclaiming the bus's broadcast
    /// channel for `linger` (spec §4.7's default 2s lingering window) so a
    /// quick rejoin by another local socket — or the same one reconnecting —
    /// doesn't pay the cost of tearing down and recreating the channel.
    pub async fn leave_topic(&self, event_bus: &EventBus, connection_id: Uuid, topic: &str, linger: std::time::Duration) {
        {
            let mut connections = self.connections.write().await;
            if let Some(conn) = connections.get_mut(&connection_id) {
                conn.subscribed_topics.remove(topic);
                if let Some(handle) = conn.forward_tasks.remove(topic) {
                    handle.abort();
                }
            }
        }
        let event_bus = event_bus.clone();
        let topic = topic.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(linger).await;
            event_bus.try_cleanup(&topic).await;
        });
    }

    /// Deliver a frame directly to one connection's outbound queue, bypassing
    /// the event bus entirely. Used for acks and errors that only the
    /// originating socket should see. A full queue here is the same signal
    /// as a full queue on a topic forward: the client isn't draining fast
    /// enough, so the connection is flagged for a SlowConsumer disconnect
    /// rather than left to block indefinitely.
    pub async fn send_direct(&self, connection_id: Uuid, text: String) {
        let (outbound, disconnect) = {
            let connections = self.connections.read().await;
            match connections.get(&connection_id) {
                Some(c) => (c.outbound.clone(), c.disconnect.clone()),
                None => return,
            }
        };
        if let Err(mpsc::error::TrySendError::Full(_)) = outbound.try_send(text) {
            tracing::warn!(connection_id = %connection_id, "outbound queue full on direct send, flagging slow consumer");
            let _ = disconnect.try_send(());
        }
    }

    /// Deliver a frame to every currently-registered connection, bypassing
    /// topic subscription entirely. Used for the `server.shutdown` hint
    /// (spec §5) broadcast to every connection immediately before the drain
    /// period begins.
    pub async fn broadcast_all(&self, text: &str) {
        let outbounds: Vec<_> = self
            .connections
            .read()
            .await
            .values()
            .map(|c| c.outbound.clone())
            .collect();
        for outbound in outbounds {
            let _ = outbound.try_send(text.to_string());
        }
    }

    pub async fn is_user_connected(&self, user_id: Uuid) -> bool {
        self.user_index
            .read()
            .await
            .get(&user_id)
            .map(|set| !set.is_empty())
            .unwrap_or(false)
    }

    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    pub async fn topics_for(&self, connection_id: Uuid) -> Vec<String> {
        self.connections
            .read()
            .await
            .get(&connection_id)
            .map(|c| c.subscribed_topics.iter().cloned().collect())
            .unwrap_or_default()
    }
}

impl Default for RoomManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Forwards events from one topic's broadcast channel into a connection's
/// outbound queue. Uses `try_send` rather than an awaited send so a consumer
/// that can't keep up never stalls this task (and, through it, every other
/// topic's fanout) — instead it signals `disconnect` once and exits,
/// enforcing back-pressure isolation (spec property P7) at the topic/consumer
/// boundary rather than at the publisher.
///
/// Also watches for self-eviction notices — `channel.member.left` naming
/// this connection's own `user_id`, or `workspace.member.left` /
/// `workspace.deleted` on this user's own inbox — and locally leaves the
/// affected topic(s) before continuing, so authorization stays bound to room
/// membership rather than surviving on a stale subscription (spec §4.8,
/// property P3, end-to-end scenario 4).
#[allow(clippy::too_many_arguments)]
async fn forward_topic_events(
    mut rx: broadcast::Receiver<Arc<BusEvent>>,
    outbound: mpsc::Sender<String>,
    disconnect: mpsc::Sender<()>,
    connection_id: Uuid,
    user_id: Uuid,
    topic: String,
    room: RoomManager,
    event_bus: EventBus,
    linger: std::time::Duration,
) {
    loop {
        match rx.recv().await {
            Ok(event) => {
                let frame = GatewayMessage::dispatch(event.event.clone(), event.data.clone());
                let Ok(text) = serde_json::to_string(&frame) else {
                    continue;
                };
                match outbound.try_send(text) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        tracing::warn!(
                            connection_id = %connection_id,
                            topic,
                            "outbound queue full, disconnecting slow consumer"
                        );
                        let _ = disconnect.try_send(());
                        break;
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => break,
                }

                handle_self_eviction(&room, &event_bus, connection_id, user_id, &topic, &event, linger).await;
            }
            Err(broadcast::error::RecvError::Lagged(n)) => {
                tracing::warn!(
                    connection_id = %connection_id,
                    topic,
                    missed = n,
                    "connection lagged on topic, client should request a resync"
                );
                let frame = GatewayMessage::dispatch(
                    "gap.detected",
                    serde_json::json!({ "topic": topic, "missed": n }),
                );
                let Ok(text) = serde_json::to_string(&frame) else {
                    continue;
                };
                if outbound.try_send(text).is_err() {
                    break;
                }
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

/// Reacts to the three dispatches that mean "this connection no longer
/// belongs in some room it's currently joined to": a channel-member-left
/// naming this user, or a workspace-member-left/workspace-deleted arriving
/// on this user's own inbox (always about them, since nothing else is ever
/// published there under those names).
async fn handle_self_eviction(
    room: &RoomManager,
    event_bus: &EventBus,
    connection_id: Uuid,
    user_id: Uuid,
    topic: &str,
    event: &BusEvent,
    linger: std::time::Duration,
) {
    use super::router::event_names;

    match event.event.as_str() {
        event_names::CHANNEL_MEMBER_LEFT if topic.starts_with("channel:") => {
            let evicted_user = user_id.to_string();
            if event.data.get("userId").and_then(|v| v.as_str()) == Some(evicted_user.as_str()) {
                room.leave_topic(event_bus, connection_id, topic, linger).await;
            }
        }
        event_names::WORKSPACE_MEMBER_LEFT if topic.starts_with("user:") => {
            let workspace_topic = event
                .data
                .get("workspaceId")
                .and_then(|v| v.as_str())
                .map(|s| format!("workspace:{s}"));
            if let Some(workspace_topic) = workspace_topic {
                room.leave_topic(event_bus, connection_id, &workspace_topic, linger).await;
            }
            for channel_id in event
                .data
                .get("channelIds")
                .and_then(|v| v.as_array())
                .into_iter()
                .flatten()
                .filter_map(|v| v.as_str())
            {
                room.leave_topic(event_bus, connection_id, &format!("channel:{channel_id}"), linger).await;
            }
        }
        event_names::WORKSPACE_DELETED if topic.starts_with("user:") => {
            let workspace_topic = event
                .data
                .get("workspaceId")
                .and_then(|v| v.as_str())
                .map(|s| format!("workspace:{s}"));
            if let Some(workspace_topic) = workspace_topic {
                room.leave_topic(event_bus, connection_id, &workspace_topic, linger).await;
            }
            for channel_id in event
                .data
                .get("channelIds")
                .and_then(|v| v.as_array())
                .into_iter()
                .flatten()
                .filter_map(|v| v.as_str())
            {
                room.leave_topic(event_bus, connection_id, &format!("channel:{channel_id}"), linger).await;
            }
        }
        _ => {}
    }
}
