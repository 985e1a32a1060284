use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use uuid::Uuid;
use validator::Validate;

use super::shared::{
    fetch_channel, fetch_workspace, require_channel_member, require_workspace_member,
    validation_error, with_live_member_count,
};
use crate::{
    auth::AuthUser,
    error::{AppError, AppResult, Envelope},
    models::{Channel, ChannelType, MemberDto, Role, UpdateChannelDto},
    state::AppState,
    websocket::router::{route, DomainEvent},
};

// ============================================================================
// Input validation
// ============================================================================

#[derive(Debug, serde::Deserialize, Validate)]
pub struct CreateChannelRequest {
    #[validate(length(min = 1, max = 80, message = "channel name must be 1-80 characters"))]
    pub name: String,
    #[validate(length(max = 100))]
    pub display_name: Option<String>,
    pub channel_type: ChannelType,
}

#[derive(Debug, serde::Deserialize, Validate)]
pub struct UpdateChannelRequest {
    #[validate(length(max = 100))]
    pub display_name: Option<String>,
    pub is_archived: Option<bool>,
    pub is_read_only: Option<bool>,
}

fn is_workspace_admin(role: Role) -> bool {
    matches!(role, Role::Owner | Role::Admin)
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /workspaces/:id/channels — create a channel (workspace owner/admin only).
/// The creator is immediately joined to it as `Role::Owner`.
pub async fn create_channel(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(workspace_id): Path<Uuid>,
    Json(req): Json<CreateChannelRequest>,
) -> AppResult<(StatusCode, Envelope<Channel>)> {
    req.validate().map_err(validation_error)?;

    fetch_workspace(&state.pool, workspace_id).await?;
    let membership = require_workspace_member(&state.pool, workspace_id, auth.user_id()).await?;
    if !is_workspace_admin(membership.role) {
        return Err(AppError::Forbidden(
            "only a workspace owner or admin can create channels".into(),
        ));
    }

    let mut tx = state.pool.begin().await?;

    let channel = sqlx::query_as::<_, Channel>(
        "INSERT INTO channels \
         (id, workspace_id, name, display_name, channel_type, is_archived, is_read_only, \
          created_by, member_count, next_message_no, created_at, updated_at) \
         VALUES ($1, $2, $3, $4, $5, false, false, $6, 1, 1, NOW(), NOW()) \
         RETURNING *",
    )
    .bind(Uuid::new_v4())
    .bind(workspace_id)
    .bind(&req.name)
    .bind(&req.display_name)
    .bind(req.channel_type)
    .bind(auth.user_id())
    .fetch_one(&mut *tx)
    .await
    .map_err(|e| match &e {
        sqlx::Error::Database(db_err) if db_err.constraint().is_some() => {
            AppError::Conflict("a channel with that name already exists in this workspace".into())
        }
        _ => AppError::from(e),
    })?;

    sqlx::query(
        "INSERT INTO channel_memberships (channel_id, user_id, role, joined_at, is_muted) \
         VALUES ($1, $2, 'owner', NOW(), false)",
    )
    .bind(channel.id)
    .bind(auth.user_id())
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    route(
        &state,
        DomainEvent::ChannelCreated {
            workspace_id,
            channel: channel.clone(),
            member_user_ids: vec![auth.user_id()],
        },
    )
    .await;
    route(
        &state,
        DomainEvent::ChannelMemberJoined {
            channel_id: channel.id,
            user_id: auth.user_id(),
            role: Role::Owner,
            is_public: channel.channel_type == ChannelType::Public,
        },
    )
    .await;

    Ok((StatusCode::CREATED, Envelope(channel)))
}

/// GET /workspaces/:id/channels — list channels visible to the caller: every
/// public channel in the workspace, plus any private/direct/group_dm channel
/// they personally belong to.
pub async fn list_channels(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(workspace_id): Path<Uuid>,
) -> AppResult<Envelope<Vec<Channel>>> {
    fetch_workspace(&state.pool, workspace_id).await?;
    require_workspace_member(&state.pool, workspace_id, auth.user_id()).await?;

    let channels = sqlx::query_as::<_, Channel>(
        "SELECT c.* FROM channels c
         LEFT JOIN channel_memberships cm ON cm.channel_id = c.id AND cm.user_id = $2
         WHERE c.workspace_id = $1 AND (c.channel_type = 'public' OR cm.user_id IS NOT NULL)
         ORDER BY c.created_at ASC",
    )
    .bind(workspace_id)
    .bind(auth.user_id())
    .fetch_all(&state.pool)
    .await?;

    let mut dtos = Vec::with_capacity(channels.len());
    for channel in channels {
        dtos.push(with_live_member_count(&state.pool, channel).await?);
    }
    Ok(Envelope(dtos))
}

/// GET /workspaces/:id/channels/:channel_id — get a single channel (channel members only).
pub async fn get_channel(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((workspace_id, channel_id)): Path<(Uuid, Uuid)>,
) -> AppResult<Envelope<Channel>> {
    let channel = fetch_channel(&state.pool, workspace_id, channel_id).await?;
    require_channel_member(&state.pool, channel_id, auth.user_id()).await?;
    Ok(Envelope(with_live_member_count(&state.pool, channel).await?))
}

/// PATCH /workspaces/:id/channels/:channel_id — update a channel (channel
/// owner/admin, or the workspace owner/admin, only).
pub async fn update_channel(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((workspace_id, channel_id)): Path<(Uuid, Uuid)>,
    Json(req): Json<UpdateChannelRequest>,
) -> AppResult<Envelope<Channel>> {
    req.validate().map_err(validation_error)?;

    let channel = fetch_channel(&state.pool, workspace_id, channel_id).await?;
    let membership = require_channel_member(&state.pool, channel_id, auth.user_id()).await?;
    let workspace_role = state
        .membership
        .workspace_role(auth.user_id(), workspace_id)
        .await?;

    let is_authorized = is_workspace_admin(membership.role)
        || workspace_role.map(is_workspace_admin).unwrap_or(false);
    if !is_authorized {
        return Err(AppError::Forbidden(
            "only a channel or workspace owner/admin can update this channel".into(),
        ));
    }

    let dto = UpdateChannelDto {
        display_name: req.display_name,
        is_archived: req.is_archived,
        is_read_only: req.is_read_only,
    };

    if dto.is_read_only == Some(true) && channel.is_general() {
        return Err(AppError::Validation(
            "the general channel cannot be made read-only".into(),
        ));
    }

    let updated = sqlx::query_as::<_, Channel>(
        "UPDATE channels
         SET display_name = COALESCE($1, display_name),
             is_archived  = COALESCE($2, is_archived),
             is_read_only = COALESCE($3, is_read_only),
             updated_at   = NOW()
         WHERE id = $4 AND workspace_id = $5
         RETURNING *",
    )
    .bind(&dto.display_name)
    .bind(dto.is_archived)
    .bind(dto.is_read_only)
    .bind(channel_id)
    .bind(workspace_id)
    .fetch_one(&state.pool)
    .await?;

    Ok(Envelope(with_live_member_count(&state.pool, updated).await?))
}

/// DELETE /workspaces/:id/channels/:channel_id — delete a channel (channel
/// or workspace owner/admin only). The `general` channel can never be
/// deleted (spec DATA MODEL §3).
pub async fn delete_channel(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((workspace_id, channel_id)): Path<(Uuid, Uuid)>,
) -> AppResult<StatusCode> {
    let channel = fetch_channel(&state.pool, workspace_id, channel_id).await?;
    if channel.is_general() {
        return Err(AppError::Validation(
            "the general channel cannot be deleted".into(),
        ));
    }

    let membership = require_channel_member(&state.pool, channel_id, auth.user_id()).await?;
    let workspace_role = state
        .membership
        .workspace_role(auth.user_id(), workspace_id)
        .await?;
    let is_authorized = is_workspace_admin(membership.role)
        || workspace_role.map(is_workspace_admin).unwrap_or(false);
    if !is_authorized {
        return Err(AppError::Forbidden(
            "only a channel or workspace owner/admin can delete this channel".into(),
        ));
    }

    let member_ids: Vec<Uuid> =
        sqlx::query_scalar("SELECT user_id FROM channel_memberships WHERE channel_id = $1")
            .bind(channel_id)
            .fetch_all(&state.pool)
            .await?;

    sqlx::query("DELETE FROM channels WHERE id = $1 AND workspace_id = $2")
        .bind(channel_id)
        .bind(workspace_id)
        .execute(&state.pool)
        .await?;

    state.membership.invalidate_channel(channel_id).await;

    route(
        &state,
        DomainEvent::ChannelDeleted {
            workspace_id,
            channel_id,
            channel_name: channel.name.clone(),
            deleted_by: auth.user_id(),
            is_public: channel.channel_type == ChannelType::Public,
            member_user_ids: member_ids,
        },
    )
    .await;

    Ok(StatusCode::NO_CONTENT)
}

/// POST /workspaces/:id/channels/:channel_id/join — join a public channel.
/// Private/direct/group_dm channels are never joined this way; membership
/// comes from channel creation or an explicit invite.
pub async fn join_channel(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((workspace_id, channel_id)): Path<(Uuid, Uuid)>,
) -> AppResult<StatusCode> {
    let channel = fetch_channel(&state.pool, workspace_id, channel_id).await?;
    require_workspace_member(&state.pool, workspace_id, auth.user_id()).await?;

    if channel.channel_type != ChannelType::Public {
        return Err(AppError::Forbidden(
            "only public channels can be joined directly".into(),
        ));
    }

    let already_member = state
        .membership
        .is_channel_member(auth.user_id(), channel_id)
        .await?;
    if already_member {
        return Ok(StatusCode::NO_CONTENT);
    }

    sqlx::query(
        "INSERT INTO channel_memberships (channel_id, user_id, role, joined_at, is_muted) \
         VALUES ($1, $2, 'member', NOW(), false)",
    )
    .bind(channel_id)
    .bind(auth.user_id())
    .execute(&state.pool)
    .await?;

    route(
        &state,
        DomainEvent::ChannelMemberJoined {
            channel_id,
            user_id: auth.user_id(),
            role: Role::Member,
            is_public: channel.channel_type == ChannelType::Public,
        },
    )
    .await;

    Ok(StatusCode::NO_CONTENT)
}

/// DELETE /workspaces/:id/channels/:channel_id/leave — leave a channel. The
/// `general` channel can't be left while the caller is still a workspace
/// member, since every member is guaranteed membership in it.
pub async fn leave_channel(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((workspace_id, channel_id)): Path<(Uuid, Uuid)>,
) -> AppResult<StatusCode> {
    let channel = fetch_channel(&state.pool, workspace_id, channel_id).await?;
    if channel.is_general() {
        return Err(AppError::Validation(
            "the general channel cannot be left".into(),
        ));
    }
    require_channel_member(&state.pool, channel_id, auth.user_id()).await?;

    sqlx::query("DELETE FROM channel_memberships WHERE channel_id = $1 AND user_id = $2")
        .bind(channel_id)
        .bind(auth.user_id())
        .execute(&state.pool)
        .await?;

    state.membership.invalidate(auth.user_id(), channel_id).await;

    route(
        &state,
        DomainEvent::ChannelMemberLeft {
            channel_id,
            user_id: auth.user_id(),
        },
    )
    .await;

    Ok(StatusCode::NO_CONTENT)
}

/// DELETE /workspaces/:id/channels/:channel_id/members/:user_id — remove
/// another member from a channel (channel or workspace owner/admin, same
/// authorization rule as `update_channel`/`delete_channel`). This is the
/// admin-driven counterpart to `leave_channel`'s self-service departure, and
/// is what the Gateway's self-eviction handling (spec §4.8, property P3,
/// end-to-end scenario 4 "Kick propagation") reacts to: the removed user's
/// own connection sees `channel.member.left` naming itself and locally
/// leaves the topic within the membership freshness window.
pub async fn remove_member(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((workspace_id, channel_id, target_user_id)): Path<(Uuid, Uuid, Uuid)>,
) -> AppResult<StatusCode> {
    let channel = fetch_channel(&state.pool, workspace_id, channel_id).await?;
    let caller_membership = require_channel_member(&state.pool, channel_id, auth.user_id()).await?;
    let workspace_role = state
        .membership
        .workspace_role(auth.user_id(), workspace_id)
        .await?;
    let is_authorized = is_workspace_admin(caller_membership.role)
        || workspace_role.map(is_workspace_admin).unwrap_or(false);
    if !is_authorized {
        return Err(AppError::Forbidden(
            "only a channel or workspace owner/admin can remove members".into(),
        ));
    }

    if channel.is_general() {
        return Err(AppError::Validation(
            "members cannot be removed from the general channel".into(),
        ));
    }

    let target = require_channel_member(&state.pool, channel_id, target_user_id).await?;
    if target.role == Role::Owner {
        return Err(AppError::Forbidden("the channel owner cannot be removed".into()));
    }

    let deleted = sqlx::query(
        "DELETE FROM channel_memberships WHERE channel_id = $1 AND user_id = $2",
    )
    .bind(channel_id)
    .bind(target_user_id)
    .execute(&state.pool)
    .await?;

    if deleted.rows_affected() == 0 {
        return Err(AppError::NotFound("member not found".into()));
    }

    state.membership.invalidate(target_user_id, channel_id).await;

    route(
        &state,
        DomainEvent::ChannelMemberLeft {
            channel_id,
            user_id: target_user_id,
        },
    )
    .await;

    Ok(StatusCode::NO_CONTENT)
}

/// GET /workspaces/:id/channels/:channel_id/members — list channel members
/// (channel members only).
pub async fn list_members(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((workspace_id, channel_id)): Path<(Uuid, Uuid)>,
) -> AppResult<Envelope<Vec<MemberDto>>> {
    fetch_channel(&state.pool, workspace_id, channel_id).await?;
    require_channel_member(&state.pool, channel_id, auth.user_id()).await?;

    let members = sqlx::query_as::<_, MemberDto>(
        "SELECT u.id AS user_id, u.username, u.display_name, u.avatar_url, cm.role, cm.joined_at
         FROM channel_memberships cm
         JOIN users u ON u.id = cm.user_id
         WHERE cm.channel_id = $1
         ORDER BY cm.joined_at ASC",
    )
    .bind(channel_id)
    .fetch_all(&state.pool)
    .await?;

    Ok(Envelope(members))
}
