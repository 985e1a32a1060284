use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::{ContentType, Message};

/// Allocates the next gapless `messageNo` for a channel and inserts the
/// message in the same transaction (spec components C3 Sequence Allocator +
/// C4 Message Store, Invariant 1 / property P1: message numbers within a
/// channel are strictly increasing with no gaps and no duplicates).
///
/// The allocator takes a row lock on the channel's counter with
/// `SELECT ... FOR UPDATE`, so concurrent senders on the same channel
/// serialize on that row rather than racing on the unique `(channel_id,
/// message_no)` index. The bounded retry exists only as a defense against
/// a concurrent writer that isn't going through this path (e.g. a manual
/// migration); under normal operation the row lock makes every attempt
/// succeed on the first try.
#[allow(clippy::too_many_arguments)]
pub async fn append_message(
    pool: &PgPool,
    max_retries: u32,
    workspace_id: Uuid,
    channel_id: Uuid,
    user_id: Uuid,
    content: &str,
    content_type: ContentType,
    parent_message_id: Option<Uuid>,
    client_correlation_id: Option<&str>,
) -> AppResult<Message> {
    let mut attempt = 0;

    loop {
        match try_append(
            pool,
            workspace_id,
            channel_id,
            user_id,
            content,
            content_type,
            parent_message_id,
            client_correlation_id,
        )
        .await
        {
            Ok(message) => return Ok(message),
            Err(AppError::Conflict(_)) if attempt < max_retries => {
                attempt += 1;
                tracing::warn!(channel_id = %channel_id, attempt, "message_no collision, retrying");
                continue;
            }
            Err(e) => return Err(e),
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn try_append(
    pool: &PgPool,
    workspace_id: Uuid,
    channel_id: Uuid,
    user_id: Uuid,
    content: &str,
    content_type: ContentType,
    parent_message_id: Option<Uuid>,
    client_correlation_id: Option<&str>,
) -> AppResult<Message> {
    let mut tx = pool.begin().await.map_err(AppError::from)?;

    let next_no: i64 = sqlx::query_scalar(
        "SELECT next_message_no FROM channels WHERE id = $1 FOR UPDATE",
    )
    .bind(channel_id)
    .fetch_optional(&mut *tx)
    .await
    .map_err(AppError::from)?
    .ok_or_else(|| AppError::NotFound("channel not found".into()))?;

    sqlx::query("UPDATE channels SET next_message_no = $1 WHERE id = $2")
        .bind(next_no + 1)
        .bind(channel_id)
        .execute(&mut *tx)
        .await
        .map_err(AppError::from)?;

    // A reply's thread_root_id is its parent's own root (or the parent
    // itself, if the parent is a top-level message); thread_depth is the
    // parent's depth plus one. This keeps every reply in a thread pointing
    // at the same root regardless of how deep the reply chain goes.
    let (thread_root_id, thread_depth) = match parent_message_id {
        Some(parent_id) => {
            let parent: Option<(Option<Uuid>, i32)> = sqlx::query_as(
                "SELECT thread_root_id, thread_depth FROM messages WHERE id = $1 AND channel_id = $2",
            )
            .bind(parent_id)
            .bind(channel_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(AppError::from)?;

            let (parent_root, parent_depth) = parent
                .ok_or_else(|| AppError::NotFound("parent message not found".into()))?;
            (Some(parent_root.unwrap_or(parent_id)), parent_depth + 1)
        }
        None => (None, 0),
    };

    let message = sqlx::query_as::<_, Message>(
        "INSERT INTO messages \
         (id, workspace_id, channel_id, message_no, user_id, content, content_type, \
          is_edited, edit_count, parent_message_id, thread_root_id, thread_depth, \
          client_correlation_id, created_at, updated_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, false, 0, $8, $9, $10, $11, NOW(), NOW()) \
         RETURNING *",
    )
    .bind(Uuid::new_v4())
    .bind(workspace_id)
    .bind(channel_id)
    .bind(next_no)
    .bind(user_id)
    .bind(content)
    .bind(content_type)
    .bind(parent_message_id)
    .bind(thread_root_id)
    .bind(thread_depth)
    .bind(client_correlation_id)
    .fetch_one(&mut *tx)
    .await
    .map_err(AppError::from)?;

    sqlx::query("UPDATE channels SET last_activity = NOW() WHERE id = $1")
        .bind(channel_id)
        .execute(&mut *tx)
        .await
        .map_err(AppError::from)?;

    tx.commit().await.map_err(AppError::from)?;

    Ok(message)
}

/// Returns a previously-sent message with the same `(channel_id, user_id,
/// clientMessageCorrelationId)` if one was created within `dedupe_window` of
/// now, so a retried client send is idempotent rather than producing a
/// duplicate (spec §4.3 Open Question: deduplication window, resolved at 60s
/// in the default configuration — property P4).
pub async fn find_recent_duplicate(
    pool: &PgPool,
    channel_id: Uuid,
    user_id: Uuid,
    client_correlation_id: &str,
    dedupe_window: std::time::Duration,
) -> AppResult<Option<Message>> {
    let cutoff: DateTime<Utc> = Utc::now()
        - chrono::Duration::from_std(dedupe_window).unwrap_or(chrono::Duration::seconds(60));

    let existing = sqlx::query_as::<_, Message>(
        "SELECT * FROM messages \
         WHERE channel_id = $1 AND user_id = $2 AND client_correlation_id = $3 AND created_at >= $4 \
         ORDER BY created_at DESC LIMIT 1",
    )
    .bind(channel_id)
    .bind(user_id)
    .bind(client_correlation_id)
    .bind(cutoff)
    .fetch_optional(pool)
    .await
    .map_err(AppError::from)?;

    Ok(existing)
}
