use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use rand::{distributions::Alphanumeric, Rng};
use sha2::{Digest, Sha256};
use uuid::Uuid;
use validator::Validate;

use super::shared::{fetch_workspace, require_workspace_member, validation_error};
use crate::{
    auth::AuthUser,
    error::{AppError, AppResult, Envelope},
    models::{CreateInviteDto, Invite, InviteDto, Role, GENERAL_CHANNEL_NAME},
    state::AppState,
    websocket::router::{route, DomainEvent},
};

const TOKEN_LENGTH: usize = 32;
const DEFAULT_EXPIRY_HOURS: i64 = 72;

#[derive(Debug, serde::Deserialize, Validate)]
pub struct CreateInviteRequest {
    #[validate(email)]
    pub email: String,
    pub role: Option<Role>,
    pub expires_in_hours: Option<i64>,
}

fn generate_token() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(TOKEN_LENGTH)
        .map(char::from)
        .collect()
}

fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// POST /workspaces/:id/invites — issue a single-use, high-entropy invite
/// token (workspace owner/admin only). The raw token is returned exactly
/// once; only its hash is persisted (spec §4 Supplement: invite issuance).
pub async fn create_invite(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(workspace_id): Path<Uuid>,
    Json(req): Json<CreateInviteRequest>,
) -> AppResult<(StatusCode, Envelope<InviteDto>)> {
    req.validate().map_err(validation_error)?;

    fetch_workspace(&state.pool, workspace_id).await?;
    let membership = require_workspace_member(&state.pool, workspace_id, auth.user_id()).await?;
    if !matches!(membership.role, Role::Owner | Role::Admin) {
        return Err(AppError::Forbidden(
            "only a workspace owner or admin can issue invites".into(),
        ));
    }

    let dto = CreateInviteDto {
        email: req.email,
        role: req.role,
        expires_in_hours: req.expires_in_hours,
    };
    let role = dto.role.unwrap_or(Role::Member);
    let expires_in_hours = dto.expires_in_hours.unwrap_or(DEFAULT_EXPIRY_HOURS);

    let token = generate_token();
    let token_hash = hash_token(&token);

    let invite = sqlx::query_as::<_, Invite>(
        "INSERT INTO invites
             (id, workspace_id, invited_by, email, role, token_hash, expires_at, created_at)
         VALUES ($1, $2, $3, $4, $5, $6, NOW() + ($7 || ' hours')::interval, NOW())
         RETURNING *",
    )
    .bind(Uuid::new_v4())
    .bind(workspace_id)
    .bind(auth.user_id())
    .bind(&dto.email)
    .bind(role)
    .bind(&token_hash)
    .bind(expires_in_hours.to_string())
    .fetch_one(&state.pool)
    .await?;

    Ok((
        StatusCode::CREATED,
        Envelope(InviteDto {
            token,
            workspace_id: invite.workspace_id,
            email: invite.email,
            role: invite.role,
            expires_at: invite.expires_at,
        }),
    ))
}

/// POST /invites/:token/accept — redeem a still-valid, unaccepted invite.
/// Single-use: the `accepted_by`/`accepted_at` columns are set atomically
/// with the membership row insert so a token can never admit two users.
pub async fn accept_invite(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(token): Path<String>,
) -> AppResult<StatusCode> {
    let token_hash = hash_token(&token);

    let mut tx = state.pool.begin().await?;

    let invite = sqlx::query_as::<_, Invite>(
        "SELECT * FROM invites WHERE token_hash = $1 AND expires_at > NOW() AND accepted_by IS NULL FOR UPDATE",
    )
    .bind(&token_hash)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or_else(|| AppError::NotFound("invite not found or already used".into()))?;

    sqlx::query("UPDATE invites SET accepted_by = $1, accepted_at = NOW() WHERE id = $2")
        .bind(auth.user_id())
        .bind(invite.id)
        .execute(&mut *tx)
        .await?;

    sqlx::query(
        "INSERT INTO workspace_memberships (workspace_id, user_id, role, joined_at)
         VALUES ($1, $2, $3, NOW())
         ON CONFLICT (workspace_id, user_id) DO NOTHING",
    )
    .bind(invite.workspace_id)
    .bind(auth.user_id())
    .bind(invite.role)
    .execute(&mut *tx)
    .await?;

    // Every workspace member is guaranteed membership in `general`
    // (channels.rs's leave_channel relies on this), mirroring
    // create_workspace's owner-join of the same channel.
    let general_channel_id: Uuid = sqlx::query_scalar(
        "SELECT id FROM channels WHERE workspace_id = $1 AND name = $2",
    )
    .bind(invite.workspace_id)
    .bind(GENERAL_CHANNEL_NAME)
    .fetch_one(&mut *tx)
    .await?;

    sqlx::query(
        "INSERT INTO channel_memberships (channel_id, user_id, role, joined_at, is_muted)
         VALUES ($1, $2, 'member', NOW(), false)
         ON CONFLICT (channel_id, user_id) DO NOTHING",
    )
    .bind(general_channel_id)
    .bind(auth.user_id())
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    route(
        &state,
        DomainEvent::WorkspaceMemberJoined {
            workspace_id: invite.workspace_id,
            user_id: auth.user_id(),
            role: invite.role,
        },
    )
    .await;
    route(
        &state,
        DomainEvent::InviteAccepted {
            workspace_id: invite.workspace_id,
            user_id: auth.user_id(),
            role: invite.role,
        },
    )
    .await;

    Ok(StatusCode::NO_CONTENT)
}
