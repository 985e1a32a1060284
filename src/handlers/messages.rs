use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

use super::shared::{fetch_channel, require_channel_member, validation_error};
use crate::{
    auth::AuthUser,
    error::{AppError, AppResult, Envelope},
    models::{
        AuthorSnapshot, ContentType, CreateMessageDto, HistoryDirection, HistoryPage, Message,
        MessageWithAuthor, UpdateMessageDto,
    },
    sequence,
    state::AppState,
    websocket::router::{route, DomainEvent},
};

// ============================================================================
// Input validation
// ============================================================================

#[derive(Debug, Deserialize, Validate)]
pub struct CreateMessageRequest {
    #[validate(length(min = 1, message = "content must not be empty"))]
    pub content: String,
    pub content_type: Option<ContentType>,
    pub parent_message_id: Option<Uuid>,
    #[validate(length(min = 1, max = 128))]
    pub client_message_correlation_id: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateMessageRequest {
    #[validate(length(min = 1, message = "content must not be empty"))]
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub cursor: Option<i64>,
    pub limit: Option<i64>,
    pub direction: Option<HistoryDirection>,
}

// ============================================================================
// Helpers
// ============================================================================

async fn with_author(pool: &sqlx::PgPool, message: Message) -> AppResult<MessageWithAuthor> {
    let author = sqlx::query_as::<_, AuthorSnapshot>(
        "SELECT id, username, display_name, avatar_url FROM users WHERE id = $1",
    )
    .bind(message.user_id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::NotFound("author not found".into()))?;

    Ok(MessageWithAuthor { message, author })
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /workspaces/:w/channels/:c/messages — append a message. Gapless
/// sequencing and idempotent retries are delegated to `sequence` (C3/C4).
pub async fn create_message(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((workspace_id, channel_id)): Path<(Uuid, Uuid)>,
    Json(req): Json<CreateMessageRequest>,
) -> AppResult<(StatusCode, Envelope<MessageWithAuthor>)> {
    req.validate().map_err(validation_error)?;

    if req.content.chars().count() > state.config.content_max_length {
        return Err(AppError::Validation(format!(
            "content exceeds the maximum length of {} characters",
            state.config.content_max_length
        )));
    }

    let channel = fetch_channel(&state.pool, workspace_id, channel_id).await?;
    require_channel_member(&state.pool, channel_id, auth.user_id()).await?;

    if channel.is_read_only {
        return Err(AppError::Forbidden(
            "this channel is read-only".into(),
        ));
    }

    let dto = CreateMessageDto {
        content: req.content,
        content_type: req.content_type,
        parent_message_id: req.parent_message_id,
        client_message_correlation_id: req.client_message_correlation_id,
    };

    if let Some(correlation_id) = dto.client_message_correlation_id.as_deref() {
        if let Some(existing) = sequence::find_recent_duplicate(
            &state.pool,
            channel_id,
            auth.user_id(),
            correlation_id,
            state.config.correlation_dedupe_window,
        )
        .await?
        {
            let dto = with_author(&state.pool, existing).await?;
            return Ok((StatusCode::OK, Envelope(dto)));
        }
    }

    let message = sequence::append_message(
        &state.pool,
        state.config.allocator_max_retries,
        workspace_id,
        channel_id,
        auth.user_id(),
        &dto.content,
        dto.content_type.unwrap_or(ContentType::Text),
        dto.parent_message_id,
        dto.client_message_correlation_id.as_deref(),
    )
    .await?;

    let message = with_author(&state.pool, message).await?;

    route(
        &state,
        DomainEvent::MessageCreated {
            channel_id,
            message: MessageWithAuthor {
                message: message.message.clone(),
                author: message.author.clone(),
            },
        },
    )
    .await;

    Ok((StatusCode::CREATED, Envelope(message)))
}

/// GET /workspaces/:w/channels/:c/messages — cursor-paged history, ordered
/// ascending by `messageNo` within the returned page (spec §6.1).
pub async fn history(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((workspace_id, channel_id)): Path<(Uuid, Uuid)>,
    Query(query): Query<HistoryQuery>,
) -> AppResult<Envelope<HistoryPage>> {
    fetch_channel(&state.pool, workspace_id, channel_id).await?;
    require_channel_member(&state.pool, channel_id, auth.user_id()).await?;

    let limit = query
        .limit
        .unwrap_or(state.config.history_max_limit)
        .clamp(1, state.config.history_max_limit);
    let direction = query.direction.unwrap_or(HistoryDirection::Before);

    let messages: Vec<Message> = match direction {
        HistoryDirection::Before => {
            let cursor = query.cursor.unwrap_or(i64::MAX);
            let mut rows = sqlx::query_as::<_, Message>(
                "SELECT * FROM messages WHERE channel_id = $1 AND message_no < $2
                 ORDER BY message_no DESC LIMIT $3",
            )
            .bind(channel_id)
            .bind(cursor)
            .bind(limit)
            .fetch_all(&state.pool)
            .await?;
            rows.reverse();
            rows
        }
        HistoryDirection::After => {
            let cursor = query.cursor.unwrap_or(0);
            sqlx::query_as::<_, Message>(
                "SELECT * FROM messages WHERE channel_id = $1 AND message_no > $2
                 ORDER BY message_no ASC LIMIT $3",
            )
            .bind(channel_id)
            .bind(cursor)
            .bind(limit)
            .fetch_all(&state.pool)
            .await?
        }
    };

    let prev_cursor = messages.first().map(|m| m.message_no);
    let next_cursor = messages.last().map(|m| m.message_no);

    let mut with_authors = Vec::with_capacity(messages.len());
    for message in messages {
        with_authors.push(with_author(&state.pool, message).await?);
    }

    Ok(Envelope(HistoryPage {
        messages: with_authors,
        prev_cursor,
        next_cursor,
    }))
}

/// GET /workspaces/:w/channels/:c/messages/:id — fetch a single message.
pub async fn get_message(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((workspace_id, channel_id, message_id)): Path<(Uuid, Uuid, Uuid)>,
) -> AppResult<Envelope<MessageWithAuthor>> {
    fetch_channel(&state.pool, workspace_id, channel_id).await?;
    require_channel_member(&state.pool, channel_id, auth.user_id()).await?;

    let message = sqlx::query_as::<_, Message>(
        "SELECT * FROM messages WHERE id = $1 AND channel_id = $2",
    )
    .bind(message_id)
    .bind(channel_id)
    .fetch_optional(&state.pool)
    .await?
    .ok_or_else(|| AppError::NotFound("message not found".into()))?;

    Ok(Envelope(with_author(&state.pool, message).await?))
}

/// PATCH /workspaces/:w/channels/:c/messages/:id — edit a message (author only).
pub async fn update_message(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((workspace_id, channel_id, message_id)): Path<(Uuid, Uuid, Uuid)>,
    Json(req): Json<UpdateMessageRequest>,
) -> AppResult<Envelope<MessageWithAuthor>> {
    req.validate().map_err(validation_error)?;

    fetch_channel(&state.pool, workspace_id, channel_id).await?;
    require_channel_member(&state.pool, channel_id, auth.user_id()).await?;

    let dto = UpdateMessageDto { content: req.content };

    let message = sqlx::query_as::<_, Message>(
        "UPDATE messages
         SET content = $1, is_edited = true, edit_count = edit_count + 1, updated_at = NOW()
         WHERE id = $2 AND channel_id = $3 AND user_id = $4 AND is_deleted = false
         RETURNING *",
    )
    .bind(&dto.content)
    .bind(message_id)
    .bind(channel_id)
    .bind(auth.user_id())
    .fetch_optional(&state.pool)
    .await?
    .ok_or_else(|| AppError::NotFound("message not found".into()))?;

    let message = with_author(&state.pool, message).await?;

    route(
        &state,
        DomainEvent::MessageUpdated {
            channel_id,
            message: MessageWithAuthor {
                message: message.message.clone(),
                author: message.author.clone(),
            },
        },
    )
    .await;

    Ok(Envelope(message))
}

/// DELETE /workspaces/:w/channels/:c/messages/:id — delete a message (author
/// only). Rows are never removed: doing so would open a hole in `messageNo`
/// and violate Invariant 1. Instead the content is cleared and `is_deleted`
/// is set, preserving the gapless sequence for every other reader.
pub async fn delete_message(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((workspace_id, channel_id, message_id)): Path<(Uuid, Uuid, Uuid)>,
) -> AppResult<StatusCode> {
    fetch_channel(&state.pool, workspace_id, channel_id).await?;
    require_channel_member(&state.pool, channel_id, auth.user_id()).await?;

    let message_no: i64 = sqlx::query_scalar(
        "UPDATE messages
         SET content = '', is_deleted = true, updated_at = NOW()
         WHERE id = $1 AND channel_id = $2 AND user_id = $3 AND is_deleted = false
         RETURNING message_no",
    )
    .bind(message_id)
    .bind(channel_id)
    .bind(auth.user_id())
    .fetch_optional(&state.pool)
    .await?
    .ok_or_else(|| AppError::NotFound("message not found".into()))?;

    route(
        &state,
        DomainEvent::MessageDeleted {
            channel_id,
            message_id,
            message_no,
        },
    )
    .await;

    Ok(StatusCode::NO_CONTENT)
}
