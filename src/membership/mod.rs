use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use sqlx::PgPool;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::models::Role;

/// Stale-tolerant, TTL-capped membership cache (spec component C2).
///
/// Positive lookups ("is this user a member of this channel") may be served
/// stale for up to `ttl`: a membership that was revoked milliseconds ago can
/// still admit a message, which is acceptable per the consistency model —
/// the Event Router invalidates affected entries synchronously on every
/// membership-change commit, so staleness is bounded by cache age, not by
/// the TTL alone. Negative results are never cached, so a user who just
/// joined is never wrongly refused.
#[derive(Clone)]
pub struct MembershipOracle {
    pool: PgPool,
    ttl: Duration,
    cache: Arc<RwLock<HashMap<(Uuid, Uuid), Instant>>>,
}

impl MembershipOracle {
    pub fn new(pool: PgPool, ttl: Duration) -> Self {
        MembershipOracle {
            pool,
            ttl,
            cache: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Is `user_id` a member of `channel_id`, directly or via the channel's
    /// workspace? Serves a cached positive answer when fresh; otherwise
    /// queries the database and caches the result only if positive.
    pub async fn is_channel_member(&self, user_id: Uuid, channel_id: Uuid) -> Result<bool, sqlx::Error> {
        let key = (user_id, channel_id);

        if let Some(cached_at) = self.cache.read().await.get(&key) {
            if cached_at.elapsed() < self.ttl {
                return Ok(true);
            }
        }

        let is_member: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM channel_memberships WHERE user_id = $1 AND channel_id = $2)",
        )
        .bind(user_id)
        .bind(channel_id)
        .fetch_one(&self.pool)
        .await?;

        if is_member {
            self.cache.write().await.insert(key, Instant::now());
        } else {
            self.cache.write().await.remove(&key);
        }

        Ok(is_member)
    }

    pub async fn is_workspace_member(&self, user_id: Uuid, workspace_id: Uuid) -> Result<bool, sqlx::Error> {
        sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM workspace_memberships WHERE user_id = $1 AND workspace_id = $2)",
        )
        .bind(user_id)
        .bind(workspace_id)
        .fetch_one(&self.pool)
        .await
    }

    /// A user's role within a workspace, or `None` if they aren't a member.
    /// Uncached: role changes are rare enough, and authorization-sensitive
    /// enough, that every call goes straight to the database.
    pub async fn workspace_role(&self, user_id: Uuid, workspace_id: Uuid) -> Result<Option<Role>, sqlx::Error> {
        sqlx::query_scalar(
            "SELECT role FROM workspace_memberships WHERE user_id = $1 AND workspace_id = $2",
        )
        .bind(user_id)
        .bind(workspace_id)
        .fetch_optional(&self.pool)
        .await
    }

    /// A user's role and mute state within a channel, or `None` if they
    /// aren't a member.
    pub async fn channel_role(&self, user_id: Uuid, channel_id: Uuid) -> Result<Option<(Role, bool)>, sqlx::Error> {
        let row: Option<(Role, bool)> = sqlx::query_as(
            "SELECT role, is_muted FROM channel_memberships WHERE user_id = $1 AND channel_id = $2",
        )
        .bind(user_id)
        .bind(channel_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    /// Every channel within `workspace_id` that `user_id` currently belongs
    /// to. Used to resync a gateway connection's topic subscriptions (e.g.
    /// on reconnect, or when leaving a workspace cascades to every channel
    /// under it).
    pub async fn channels_of_user_in_workspace(
        &self,
        user_id: Uuid,
        workspace_id: Uuid,
    ) -> Result<Vec<Uuid>, sqlx::Error> {
        sqlx::query_scalar(
            "SELECT cm.channel_id
             FROM channel_memberships cm
             JOIN channels c ON c.id = cm.channel_id
             WHERE cm.user_id = $1 AND c.workspace_id = $2",
        )
        .bind(user_id)
        .bind(workspace_id)
        .fetch_all(&self.pool)
        .await
    }

    /// Invalidate every cached entry for a (user, channel) pair. Called by
    /// the Event Router whenever a membership-change event commits, so a
    /// revoked member is never admitted past the next cache read.
    pub async fn invalidate(&self, user_id: Uuid, channel_id: Uuid) {
        self.cache.write().await.remove(&(user_id, channel_id));
    }

    /// Invalidate every cached entry for a channel (e.g. the channel itself
    /// was deleted, or every member's access should be re-checked).
    pub async fn invalidate_channel(&self, channel_id: Uuid) {
        self.cache
            .write()
            .await
            .retain(|(_, c), _| *c != channel_id);
    }

    /// Invalidate every cached entry for a user (e.g. they left or were
    /// removed from a workspace, which revokes access to every channel
    /// under it at once).
    pub async fn invalidate_user(&self, user_id: Uuid) {
        self.cache.write().await.retain(|(u, _), _| *u != user_id);
    }

    pub async fn cache_len(&self) -> usize {
        self.cache.read().await.len()
    }
}
