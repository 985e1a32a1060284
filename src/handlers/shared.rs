use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    models::{Channel, ChannelMembership, Workspace, WorkspaceMembership},
};

/// Convert [`validator::ValidationErrors`] into an [`AppError::Validation`] with
/// a human-readable message. Shared across all handler modules to avoid
/// copy-pasting the same boilerplate.
pub fn validation_error(e: validator::ValidationErrors) -> AppError {
    AppError::Validation(
        e.field_errors()
            .values()
            .flat_map(|v| v.iter())
            .filter_map(|e| e.message.as_ref())
            .map(|m| m.to_string())
            .collect::<Vec<_>>()
            .join(", "),
    )
}

/// Fetch a workspace row, returning 404 if it does not exist.
pub async fn fetch_workspace(pool: &sqlx::PgPool, workspace_id: Uuid) -> AppResult<Workspace> {
    sqlx::query_as::<_, Workspace>(
        "SELECT id, name, display_name, owner_id, is_archived, created_at, updated_at
         FROM workspaces WHERE id = $1",
    )
    .bind(workspace_id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::NotFound("workspace not found".into()))
}

/// Fetch a channel scoped to its workspace, returning 404 if it does not
/// exist in that workspace.
pub async fn fetch_channel(
    pool: &sqlx::PgPool,
    workspace_id: Uuid,
    channel_id: Uuid,
) -> AppResult<Channel> {
    sqlx::query_as::<_, Channel>(
        "SELECT id, workspace_id, name, display_name, channel_type, is_archived, is_read_only,
                created_by, member_count, last_activity, next_message_no, created_at, updated_at
         FROM channels WHERE id = $1 AND workspace_id = $2",
    )
    .bind(channel_id)
    .bind(workspace_id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::NotFound("channel not found".into()))
}

/// Overwrite a channel's stored `member_count` with a live
/// `COUNT(channel_memberships)`. The stored column is only ever correct at
/// the instant of creation; join/leave/remove never touch it, so every
/// handler that serializes a `Channel` back to a client re-derives this
/// field first, the same way `workspace_dto` derives a workspace's member
/// count on read instead of trusting a maintained counter.
pub async fn with_live_member_count(pool: &sqlx::PgPool, mut channel: Channel) -> AppResult<Channel> {
    channel.member_count =
        sqlx::query_scalar("SELECT COUNT(*) FROM channel_memberships WHERE channel_id = $1")
            .bind(channel.id)
            .fetch_one(pool)
            .await?;
    Ok(channel)
}

/// Verify the user is a member of the workspace.
///
/// Returns 404 (not 403) when the user is not a member — this prevents
/// leaking the existence of a workspace to non-members.
pub async fn require_workspace_member(
    pool: &sqlx::PgPool,
    workspace_id: Uuid,
    user_id: Uuid,
) -> AppResult<WorkspaceMembership> {
    sqlx::query_as::<_, WorkspaceMembership>(
        "SELECT workspace_id, user_id, role, joined_at
         FROM workspace_memberships WHERE workspace_id = $1 AND user_id = $2",
    )
    .bind(workspace_id)
    .bind(user_id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::NotFound("workspace not found".into()))
}

/// Verify the user is a member of the channel. Returns 404 for the same
/// existence-hiding reason as `require_workspace_member`.
pub async fn require_channel_member(
    pool: &sqlx::PgPool,
    channel_id: Uuid,
    user_id: Uuid,
) -> AppResult<ChannelMembership> {
    sqlx::query_as::<_, ChannelMembership>(
        "SELECT channel_id, user_id, role, joined_at, is_muted
         FROM channel_memberships WHERE channel_id = $1 AND user_id = $2",
    )
    .bind(channel_id)
    .bind(user_id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::NotFound("channel not found".into()))
}
