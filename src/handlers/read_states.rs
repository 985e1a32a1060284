use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

use super::shared::{fetch_channel, fetch_workspace, require_channel_member, require_workspace_member};
use crate::{
    auth::AuthUser,
    error::{AppError, AppResult, Envelope},
    models::{AckDto, ReadReceipt, UnreadCountDto, UnreadSummaryDto},
    state::AppState,
    websocket::router::{route, DomainEvent},
};

#[derive(Debug, Deserialize)]
pub struct UnreadCountsQuery {
    pub channel_ids: String,
}

/// POST /workspaces/:w/channels/:c/read-receipt — advance the caller's read
/// position in a channel. The `ON CONFLICT ... WHERE excluded.value > existing`
/// clause makes this a monotone advance in one statement (spec component C5,
/// Invariant 2: a read position never moves backward). Invariant 3 requires
/// `lastReadMessageNo <= max(messageNo)` in the channel, so an ack past the
/// current head is rejected rather than silently accepted.
pub async fn advance(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((workspace_id, channel_id)): Path<(Uuid, Uuid)>,
    Json(req): Json<AckDto>,
) -> AppResult<Envelope<ReadReceipt>> {
    let channel = fetch_channel(&state.pool, workspace_id, channel_id).await?;
    require_channel_member(&state.pool, channel_id, auth.user_id()).await?;

    let head = channel.next_message_no - 1;
    if req.message_no > head {
        return Err(AppError::Validation(format!(
            "last_read_message_no {} exceeds the channel's current head {head}",
            req.message_no
        )));
    }

    let receipt = sqlx::query_as::<_, ReadReceipt>(
        "INSERT INTO read_receipts
             (user_id, workspace_id, channel_id, last_read_message_no, last_read_message_id, last_read_at)
         VALUES ($1, $2, $3, $4, $5, NOW())
         ON CONFLICT (user_id, channel_id) DO UPDATE
             SET last_read_message_no = excluded.last_read_message_no,
                 last_read_message_id = excluded.last_read_message_id,
                 last_read_at = excluded.last_read_at
         WHERE excluded.last_read_message_no > read_receipts.last_read_message_no
         RETURNING *",
    )
    .bind(auth.user_id())
    .bind(workspace_id)
    .bind(channel_id)
    .bind(req.message_no)
    .bind(req.message_id)
    .fetch_optional(&state.pool)
    .await?;

    let receipt = match receipt {
        Some(r) => r,
        // The WHERE clause rejected the advance (a stale ack arrived after a
        // newer one) — read back the current, still-monotone row instead of
        // erroring, since the caller just wants its resulting read state.
        None => sqlx::query_as::<_, ReadReceipt>(
            "SELECT * FROM read_receipts WHERE user_id = $1 AND channel_id = $2",
        )
        .bind(auth.user_id())
        .bind(channel_id)
        .fetch_one(&state.pool)
        .await?,
    };

    route(
        &state,
        DomainEvent::ReadReceiptUpdated {
            channel_id,
            user_id: auth.user_id(),
            last_read_message_no: receipt.last_read_message_no,
        },
    )
    .await;

    Ok(Envelope(receipt))
}

/// GET /workspaces/:w/channels/:c/read-receipt — the caller's own read state.
pub async fn get_receipt(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((workspace_id, channel_id)): Path<(Uuid, Uuid)>,
) -> AppResult<Envelope<Option<ReadReceipt>>> {
    fetch_channel(&state.pool, workspace_id, channel_id).await?;
    require_channel_member(&state.pool, channel_id, auth.user_id()).await?;

    let receipt = sqlx::query_as::<_, ReadReceipt>(
        "SELECT * FROM read_receipts WHERE user_id = $1 AND channel_id = $2",
    )
    .bind(auth.user_id())
    .bind(channel_id)
    .fetch_optional(&state.pool)
    .await?;

    Ok(Envelope(receipt))
}

/// GET /workspaces/:w/unread-counts?channelIds=c1,c2,... — unread totals
/// across a caller-supplied set of channels they belong to.
pub async fn unread_counts(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(workspace_id): Path<Uuid>,
    Query(query): Query<UnreadCountsQuery>,
) -> AppResult<Envelope<UnreadSummaryDto>> {
    fetch_workspace(&state.pool, workspace_id).await?;
    require_workspace_member(&state.pool, workspace_id, auth.user_id()).await?;

    let channel_ids: Vec<Uuid> = query
        .channel_ids
        .split(',')
        .filter_map(|s| s.trim().parse().ok())
        .collect();

    let mut channels = Vec::with_capacity(channel_ids.len());
    let mut total_unread: i64 = 0;

    for channel_id in channel_ids {
        if require_channel_member(&state.pool, channel_id, auth.user_id())
            .await
            .is_err()
        {
            continue;
        }

        let last_message_no: i64 =
            sqlx::query_scalar("SELECT next_message_no - 1 FROM channels WHERE id = $1 AND workspace_id = $2")
                .bind(channel_id)
                .bind(workspace_id)
                .fetch_optional(&state.pool)
                .await?
                .unwrap_or(0);

        let last_read_message_no: i64 = sqlx::query_scalar(
            "SELECT last_read_message_no FROM read_receipts WHERE user_id = $1 AND channel_id = $2",
        )
        .bind(auth.user_id())
        .bind(channel_id)
        .fetch_optional(&state.pool)
        .await?
        .unwrap_or(0);

        let unread_count = (last_message_no - last_read_message_no).max(0);
        total_unread += unread_count;

        channels.push(UnreadCountDto {
            channel_id,
            unread_count,
            last_message_no,
            last_read_message_no,
        });
    }

    Ok(Envelope(UnreadSummaryDto {
        channels,
        total_unread,
    }))
}
