use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use once_cell::sync::Lazy;
use regex::Regex;
use uuid::Uuid;
use validator::Validate;

use super::shared::{fetch_workspace, require_workspace_member, validation_error};
use crate::{
    auth::AuthUser,
    error::{AppError, AppResult, Envelope},
    models::{
        Channel, ChannelType, CreateWorkspaceDto, MemberDto, Role, UpdateWorkspaceDto, Workspace,
        WorkspaceDto, GENERAL_CHANNEL_NAME,
    },
    state::AppState,
    websocket::router::{route, DomainEvent},
};

static WORKSPACE_NAME_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-z0-9][a-z0-9-]{0,63}$").unwrap());

// ============================================================================
// Input validation
// ============================================================================

#[derive(Debug, serde::Deserialize, Validate)]
pub struct CreateWorkspaceRequest {
    pub name: String,
    #[validate(length(max = 100))]
    pub display_name: Option<String>,
}

fn validate_workspace_name(name: &str) -> AppResult<()> {
    if WORKSPACE_NAME_RE.is_match(name) {
        Ok(())
    } else {
        Err(AppError::Validation(
            "name must be lowercase kebab-case, starting with a letter or digit".into(),
        ))
    }
}

#[derive(Debug, serde::Deserialize, Validate)]
pub struct UpdateWorkspaceRequest {
    #[validate(length(max = 100))]
    pub display_name: Option<String>,
    pub is_archived: Option<bool>,
}

// ============================================================================
// Helpers
// ============================================================================

async fn workspace_dto(pool: &sqlx::PgPool, workspace: Workspace) -> AppResult<WorkspaceDto> {
    let member_count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM workspace_memberships WHERE workspace_id = $1")
            .bind(workspace.id)
            .fetch_one(pool)
            .await?;

    Ok(WorkspaceDto {
        id: workspace.id,
        name: workspace.name,
        display_name: workspace.display_name,
        owner_id: workspace.owner_id,
        is_archived: workspace.is_archived,
        member_count,
        created_at: workspace.created_at,
        updated_at: workspace.updated_at,
    })
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /workspaces — create a workspace. The creator becomes its owner and
/// is auto-joined to the undeletable `general` channel it's created with
/// (spec DATA MODEL §3).
pub async fn create_workspace(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(req): Json<CreateWorkspaceRequest>,
) -> AppResult<(StatusCode, Envelope<WorkspaceDto>)> {
    req.validate().map_err(validation_error)?;
    validate_workspace_name(&req.name)?;

    let dto = CreateWorkspaceDto {
        name: req.name,
        display_name: req.display_name,
    };

    let mut tx = state.pool.begin().await?;

    let workspace = sqlx::query_as::<_, Workspace>(
        "INSERT INTO workspaces (id, name, display_name, owner_id, is_archived, created_at, updated_at) \
         VALUES ($1, $2, $3, $4, false, NOW(), NOW()) \
         RETURNING *",
    )
    .bind(Uuid::new_v4())
    .bind(&dto.name)
    .bind(&dto.display_name)
    .bind(auth.user_id())
    .fetch_one(&mut *tx)
    .await?;

    sqlx::query(
        "INSERT INTO workspace_memberships (workspace_id, user_id, role, joined_at) \
         VALUES ($1, $2, 'owner', NOW())",
    )
    .bind(workspace.id)
    .bind(auth.user_id())
    .execute(&mut *tx)
    .await?;

    let general = sqlx::query_as::<_, Channel>(
        "INSERT INTO channels \
         (id, workspace_id, name, display_name, channel_type, is_archived, is_read_only, \
          created_by, member_count, next_message_no, created_at, updated_at) \
         VALUES ($1, $2, $3, NULL, 'public', false, false, $4, 1, 1, NOW(), NOW()) \
         RETURNING *",
    )
    .bind(Uuid::new_v4())
    .bind(workspace.id)
    .bind(GENERAL_CHANNEL_NAME)
    .bind(auth.user_id())
    .fetch_one(&mut *tx)
    .await?;

    sqlx::query(
        "INSERT INTO channel_memberships (channel_id, user_id, role, joined_at, is_muted) \
         VALUES ($1, $2, 'owner', NOW(), false)",
    )
    .bind(general.id)
    .bind(auth.user_id())
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    route(
        &state,
        DomainEvent::WorkspaceMemberJoined {
            workspace_id: workspace.id,
            user_id: auth.user_id(),
            role: Role::Owner,
        },
    )
    .await;
    route(
        &state,
        DomainEvent::ChannelCreated {
            workspace_id: workspace.id,
            channel: general,
            member_user_ids: vec![],
        },
    )
    .await;

    let dto = workspace_dto(&state.pool, workspace).await?;
    Ok((StatusCode::CREATED, Envelope(dto)))
}

/// GET /workspaces — list every workspace the authenticated user belongs to.
pub async fn list_workspaces(
    State(state): State<AppState>,
    auth: AuthUser,
) -> AppResult<Envelope<Vec<WorkspaceDto>>> {
    let workspaces = sqlx::query_as::<_, Workspace>(
        "SELECT w.* FROM workspaces w
         JOIN workspace_memberships wm ON wm.workspace_id = w.id
         WHERE wm.user_id = $1
         ORDER BY w.created_at ASC",
    )
    .bind(auth.user_id())
    .fetch_all(&state.pool)
    .await?;

    let mut dtos = Vec::with_capacity(workspaces.len());
    for w in workspaces {
        dtos.push(workspace_dto(&state.pool, w).await?);
    }
    Ok(Envelope(dtos))
}

/// GET /workspaces/:id — get a single workspace (members only).
pub async fn get_workspace(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(workspace_id): Path<Uuid>,
) -> AppResult<Envelope<WorkspaceDto>> {
    let workspace = fetch_workspace(&state.pool, workspace_id).await?;
    require_workspace_member(&state.pool, workspace_id, auth.user_id()).await?;
    Ok(Envelope(workspace_dto(&state.pool, workspace).await?))
}

/// PATCH /workspaces/:id — update display name or archived state (owner/admin only).
pub async fn update_workspace(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(workspace_id): Path<Uuid>,
    Json(req): Json<UpdateWorkspaceRequest>,
) -> AppResult<Envelope<WorkspaceDto>> {
    req.validate().map_err(validation_error)?;

    let membership = require_workspace_member(&state.pool, workspace_id, auth.user_id()).await?;
    if !matches!(membership.role, Role::Owner | Role::Admin) {
        return Err(AppError::Forbidden("only an owner or admin can update a workspace".into()));
    }

    let dto = UpdateWorkspaceDto {
        display_name: req.display_name,
        is_archived: req.is_archived,
    };

    let updated = sqlx::query_as::<_, Workspace>(
        "UPDATE workspaces
         SET display_name = COALESCE($1, display_name),
             is_archived  = COALESCE($2, is_archived),
             updated_at   = NOW()
         WHERE id = $3
         RETURNING *",
    )
    .bind(&dto.display_name)
    .bind(dto.is_archived)
    .bind(workspace_id)
    .fetch_one(&state.pool)
    .await?;

    Ok(Envelope(workspace_dto(&state.pool, updated).await?))
}

/// DELETE /workspaces/:id — delete a workspace and everything under it
/// (owner only). Every current member, plus the workspace topic itself,
/// receives `workspace.deleted` so connected gateways can evict their local
/// room state for it (Open Question, resolved in `DESIGN.md`).
pub async fn delete_workspace(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(workspace_id): Path<Uuid>,
) -> AppResult<StatusCode> {
    let workspace = fetch_workspace(&state.pool, workspace_id).await?;

    if workspace.owner_id != auth.user_id() {
        return Err(AppError::Forbidden("only the workspace owner can delete it".into()));
    }

    let member_ids: Vec<Uuid> = sqlx::query_scalar(
        "SELECT user_id FROM workspace_memberships WHERE workspace_id = $1",
    )
    .bind(workspace_id)
    .fetch_all(&state.pool)
    .await?;

    let channel_ids: Vec<Uuid> =
        sqlx::query_scalar("SELECT id FROM channels WHERE workspace_id = $1")
            .bind(workspace_id)
            .fetch_all(&state.pool)
            .await?;

    sqlx::query("DELETE FROM workspaces WHERE id = $1")
        .bind(workspace_id)
        .execute(&state.pool)
        .await?;

    route(
        &state,
        DomainEvent::WorkspaceDeleted {
            workspace_id,
            deleted_by: auth.user_id(),
            channel_ids,
            member_user_ids: member_ids,
        },
    )
    .await;

    Ok(StatusCode::NO_CONTENT)
}

/// DELETE /workspaces/:id/leave — leave a workspace (the owner cannot leave;
/// they must transfer ownership or delete the workspace instead).
pub async fn leave_workspace(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(workspace_id): Path<Uuid>,
) -> AppResult<StatusCode> {
    let workspace = fetch_workspace(&state.pool, workspace_id).await?;
    require_workspace_member(&state.pool, workspace_id, auth.user_id()).await?;

    if workspace.owner_id == auth.user_id() {
        return Err(AppError::Validation(
            "the workspace owner cannot leave — transfer ownership or delete the workspace".into(),
        ));
    }

    let channel_ids: Vec<Uuid> = sqlx::query_scalar(
        "SELECT channel_id FROM channel_memberships cm
         JOIN channels c ON c.id = cm.channel_id
         WHERE c.workspace_id = $1 AND cm.user_id = $2",
    )
    .bind(workspace_id)
    .bind(auth.user_id())
    .fetch_all(&state.pool)
    .await?;

    sqlx::query("DELETE FROM workspace_memberships WHERE workspace_id = $1 AND user_id = $2")
        .bind(workspace_id)
        .bind(auth.user_id())
        .execute(&state.pool)
        .await?;
    sqlx::query(
        "DELETE FROM channel_memberships cm USING channels c
         WHERE cm.channel_id = c.id AND c.workspace_id = $1 AND cm.user_id = $2",
    )
    .bind(workspace_id)
    .bind(auth.user_id())
    .execute(&state.pool)
    .await?;
    state.membership.invalidate_user(auth.user_id()).await;

    route(
        &state,
        DomainEvent::WorkspaceMemberLeft {
            workspace_id,
            user_id: auth.user_id(),
            removed_by: None,
            channel_ids,
        },
    )
    .await;

    Ok(StatusCode::NO_CONTENT)
}

/// GET /workspaces/:id/members — list every member of a workspace (members only).
pub async fn list_members(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(workspace_id): Path<Uuid>,
) -> AppResult<Envelope<Vec<MemberDto>>> {
    fetch_workspace(&state.pool, workspace_id).await?;
    require_workspace_member(&state.pool, workspace_id, auth.user_id()).await?;

    let members = sqlx::query_as::<_, MemberDto>(
        "SELECT u.id AS user_id, u.username, u.display_name, u.avatar_url, wm.role, wm.joined_at
         FROM workspace_memberships wm
         JOIN users u ON u.id = wm.user_id
         WHERE wm.workspace_id = $1
         ORDER BY wm.joined_at ASC",
    )
    .bind(workspace_id)
    .fetch_all(&state.pool)
    .await?;

    Ok(Envelope(members))
}
