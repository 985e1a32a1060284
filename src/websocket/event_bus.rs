use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::{broadcast, RwLock};

/// A single fanned-out event: the gateway dispatch name plus its JSON
/// payload. Cheap to clone (wrapped in `Arc` by callers) since a single
/// publish may be cloned once per local subscriber.
#[derive(Debug, Clone, Serialize)]
pub struct BusEvent {
    pub event: String,
    pub data: Value,
}

const BROADCAST_CAPACITY: usize = 256;

/// Topic-keyed pub/sub fanout (spec component C6).
///
/// Each topic (`workspace:<id>`, `channel:<id>`) gets its own
/// `tokio::sync::broadcast` channel, created lazily on first subscribe and
/// torn down once its last local subscriber drops. This mirrors the
/// connection registry shape used for per-user fanout, generalized from a
/// single global map to one keyed by topic.
#[derive(Clone)]
pub struct EventBus {
    topics: Arc<RwLock<HashMap<String, broadcast::Sender<Arc<BusEvent>>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        EventBus {
            topics: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn workspace_topic(workspace_id: uuid::Uuid) -> String {
        format!("workspace:{workspace_id}")
    }

    /// Channel topic name. Channel ids are globally unique, so the
    /// workspace id the spec's literal `workspace:{W}:channel:{C}` topic
    /// string carries is redundant for routing; it's still available to
    /// every subscriber via the message/channel payload itself.
    pub fn channel_topic(channel_id: uuid::Uuid) -> String {
        format!("channel:{channel_id}")
    }

    /// Per-user inbox topic: DM/group-DM traffic, membership changes, and
    /// other events addressed to one user rather than to a workspace or
    /// channel at large.
    pub fn user_topic(user_id: uuid::Uuid) -> String {
        format!("user:{user_id}")
    }

    /// Subscribe to a topic, creating its broadcast channel if this is the
    /// first subscriber. Returns a receiver the caller forwards into its own
    /// per-connection outbound queue.
    pub async fn subscribe(&self, topic: &str) -> broadcast::Receiver<Arc<BusEvent>> {
        {
            let topics = self.topics.read().await;
            if let Some(tx) = topics.get(topic) {
                return tx.subscribe();
            }
        }

        let mut topics = self.topics.write().await;
        let tx = topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(BROADCAST_CAPACITY).0);
        tx.subscribe()
    }

    /// Publish an event to a topic. A no-op (aside from a debug log) if the
    /// topic currently has no subscribers anywhere in this process — the
    /// bus never creates a topic just to publish into the void.
    pub async fn publish(&self, topic: &str, event: impl Into<String>, data: Value) {
        let topics = self.topics.read().await;
        let Some(tx) = topics.get(topic) else {
            tracing::trace!(topic, "publish with no local subscribers, dropped");
            return;
        };

        let msg = Arc::new(BusEvent {
            event: event.into(),
            data,
        });

        // SendError means zero receivers remain; harmless, the sweep below
        // will reclaim the entry.
        let _ = tx.send(msg);
    }

    /// Drop the broadcast sender for `topic` if it currently has zero
    /// receivers. Called opportunistically on unsubscribe and by the
    /// periodic sweep so churn doesn't leak empty channels forever.
    pub async fn try_cleanup(&self, topic: &str) {
        let mut topics = self.topics.write().await;
        if let Some(tx) = topics.get(topic) {
            if tx.receiver_count() == 0 {
                topics.remove(topic);
            }
        }
    }

    /// Periodic sweep entry point: remove every topic with zero receivers.
    pub async fn sweep(&self) -> usize {
        let mut topics = self.topics.write().await;
        let before = topics.len();
        topics.retain(|_, tx| tx.receiver_count() > 0);
        before - topics.len()
    }

    pub async fn topic_count(&self) -> usize {
        self.topics.read().await.len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
