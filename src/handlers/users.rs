use axum::{extract::State, Json};
use serde::Deserialize;
use tracing::info;
use validator::Validate;

use super::shared::validation_error;
use crate::{
    auth::AuthUser,
    error::{AppError, AppResult, Envelope},
    models::{User, UserDto},
    state::AppState,
};

// ============================================================================
// Input validation
// ============================================================================

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateUserRequest {
    #[validate(length(min = 1, max = 80))]
    pub display_name: Option<String>,
    /// Must be a valid HTTP(S) URL when provided.
    #[validate(url)]
    pub avatar_url: Option<String>,
}

// ============================================================================
// Handlers
// ============================================================================

/// GET /users/@me
pub async fn get_current_user(
    State(state): State<AppState>,
    auth_user: AuthUser,
) -> AppResult<Envelope<UserDto>> {
    let user = sqlx::query_as::<_, User>(
        "SELECT id, username, email, password_hash, display_name, avatar_url, created_at, updated_at
         FROM users WHERE id = $1",
    )
    .bind(auth_user.user_id())
    .fetch_optional(&state.pool)
    .await?
    .ok_or_else(|| AppError::NotFound("user not found".into()))?;

    Ok(Envelope(user.into()))
}

/// PATCH /users/@me
pub async fn update_current_user(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Json(req): Json<UpdateUserRequest>,
) -> AppResult<Envelope<UserDto>> {
    req.validate().map_err(validation_error)?;

    info!(user_id = %auth_user.user_id(), "updating user profile");

    let user = sqlx::query_as::<_, User>(
        r#"
        UPDATE users
        SET display_name = COALESCE($1, display_name),
            avatar_url    = COALESCE($2, avatar_url),
            updated_at    = NOW()
        WHERE id = $3
        RETURNING id, username, email, password_hash, display_name, avatar_url, created_at, updated_at
        "#,
    )
    .bind(req.display_name)
    .bind(req.avatar_url)
    .bind(auth_user.user_id())
    .fetch_optional(&state.pool)
    .await?
    .ok_or_else(|| AppError::NotFound("user not found".into()))?;

    Ok(Envelope(user.into()))
}
