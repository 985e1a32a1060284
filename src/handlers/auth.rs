use axum::{extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};
use tracing::info;
use validator::Validate;

use super::shared::validation_error;
use crate::{
    auth::{create_access_token, create_refresh_token, hash_password, hash_refresh_token, validate_token, verify_password, TokenType},
    error::{AppError, AppResult, Envelope},
    models::{User, UserDto},
    state::AppState,
};

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize, Validate)]
pub struct RegisterRequest {
    #[validate(length(min = 3, max = 32))]
    pub username: String,
    #[validate(email)]
    pub email: Option<String>,
    #[validate(length(min = 8))]
    pub password: String,
    #[validate(length(min = 1, max = 80))]
    pub display_name: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub user: UserDto,
}

#[derive(Debug, Serialize)]
pub struct RefreshResponse {
    pub access_token: String,
    pub refresh_token: String,
}

// ============================================================================
// Handlers
// ============================================================================

const REFRESH_TOKEN_TTL_DAYS: i64 = 7;

async fn issue_session(state: &AppState, user: &User) -> AppResult<(String, String)> {
    let access_token = create_access_token(user.id, user.username.clone(), &state.jwt_secret)?;
    let refresh_token = create_refresh_token(user.id, user.username.clone(), &state.jwt_secret)?;
    let refresh_token_hash = hash_refresh_token(&refresh_token);

    sqlx::query(
        "INSERT INTO sessions (id, user_id, refresh_token_hash, expires_at, created_at) \
         VALUES ($1, $2, $3, NOW() + ($4 || ' days')::interval, NOW())",
    )
    .bind(uuid::Uuid::new_v4())
    .bind(user.id)
    .bind(&refresh_token_hash)
    .bind(REFRESH_TOKEN_TTL_DAYS.to_string())
    .execute(&state.pool)
    .await?;

    Ok((access_token, refresh_token))
}

/// POST /auth/register
pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> AppResult<(StatusCode, Envelope<AuthResponse>)> {
    req.validate().map_err(validation_error)?;

    info!(username = %req.username, "registering new user");

    let password_hash = hash_password(&req.password)?;
    let display_name = req.display_name.unwrap_or_else(|| req.username.clone());

    let user = sqlx::query_as::<_, User>(
        "INSERT INTO users (id, username, email, password_hash, display_name, avatar_url, created_at, updated_at) \
         VALUES ($1, $2, $3, $4, $5, NULL, NOW(), NOW()) \
         RETURNING *",
    )
    .bind(uuid::Uuid::new_v4())
    .bind(&req.username)
    .bind(&req.email)
    .bind(&password_hash)
    .bind(&display_name)
    .fetch_one(&state.pool)
    .await?;

    info!(user_id = %user.id, "user created");

    let (access_token, refresh_token) = issue_session(&state, &user).await?;

    Ok((
        StatusCode::CREATED,
        Envelope(AuthResponse {
            access_token,
            refresh_token,
            user: user.into(),
        }),
    ))
}

/// POST /auth/login
pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> AppResult<Envelope<AuthResponse>> {
    let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE username = $1")
        .bind(&req.username)
        .fetch_optional(&state.pool)
        .await?
        .ok_or_else(|| AppError::AuthInvalid("invalid username or password".into()))?;

    let valid = verify_password(&req.password, &user.password_hash)?;
    if !valid {
        return Err(AppError::AuthInvalid("invalid username or password".into()));
    }

    info!(user_id = %user.id, "login successful");

    let (access_token, refresh_token) = issue_session(&state, &user).await?;

    Ok(Envelope(AuthResponse {
        access_token,
        refresh_token,
        user: user.into(),
    }))
}

/// POST /auth/refresh — exchange a still-valid refresh token for a new
/// access/refresh pair. The presented token must both verify as a JWT and
/// match a non-expired row in `sessions`; the old session row is deleted so
/// a refresh token can only ever be redeemed once.
pub async fn refresh_token(
    State(state): State<AppState>,
    Json(req): Json<RefreshRequest>,
) -> AppResult<Envelope<RefreshResponse>> {
    let claims = validate_token(&req.refresh_token, &state.jwt_secret)?;
    if claims.token_type != TokenType::Refresh {
        return Err(AppError::AuthInvalid("refresh token required".into()));
    }
    let user_id = claims.user_id()?;
    let presented_hash = hash_refresh_token(&req.refresh_token);

    let deleted = sqlx::query(
        "DELETE FROM sessions WHERE user_id = $1 AND refresh_token_hash = $2 AND expires_at > NOW()",
    )
    .bind(user_id)
    .bind(&presented_hash)
    .execute(&state.pool)
    .await?;

    if deleted.rows_affected() == 0 {
        return Err(AppError::AuthInvalid("refresh token not recognized".into()));
    }

    let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
        .bind(user_id)
        .fetch_optional(&state.pool)
        .await?
        .ok_or_else(|| AppError::NotFound("user not found".into()))?;

    let (access_token, refresh_token) = issue_session(&state, &user).await?;

    Ok(Envelope(RefreshResponse {
        access_token,
        refresh_token,
    }))
}
