use axum::{
    async_trait,
    extract::FromRequestParts,
    http::request::Parts,
};
use axum_extra::{
    headers::{authorization::Bearer, Authorization},
    TypedHeader,
};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, errors::ErrorKind, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::state::AppState;

// ============================================================================
// JWT Claims — spec component C1, Token Verifier
// ============================================================================

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Access,
    Refresh,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: i64,
    pub iat: i64,
    pub username: String,
    /// Distinguishes access tokens (short-lived) from refresh tokens
    /// (long-lived). `AuthUser` rejects refresh tokens so they can never be
    /// used as bearer credentials on protected routes.
    pub token_type: TokenType,
}

impl Claims {
    fn new(
        user_id: Uuid,
        username: String,
        expiration_minutes: i64,
        token_type: TokenType,
    ) -> Self {
        let now = Utc::now();
        let exp = now + Duration::minutes(expiration_minutes);

        Claims {
            sub: user_id.to_string(),
            exp: exp.timestamp(),
            iat: now.timestamp(),
            username,
            token_type,
        }
    }

    pub fn user_id(&self) -> AppResult<Uuid> {
        Uuid::parse_str(&self.sub).map_err(|_| AppError::AuthInvalid("invalid token subject".into()))
    }
}

// ============================================================================
// JWT operations
// ============================================================================

pub fn create_access_token(user_id: Uuid, username: String, secret: &str) -> AppResult<String> {
    let claims = Claims::new(user_id, username, 15, TokenType::Access);

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| {
        tracing::error!("failed to create access token: {:?}", e);
        AppError::Internal
    })
}

pub fn create_refresh_token(user_id: Uuid, username: String, secret: &str) -> AppResult<String> {
    let claims = Claims::new(user_id, username, 10080, TokenType::Refresh); // 7 days

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| {
        tracing::error!("failed to create refresh token: {:?}", e);
        AppError::Internal
    })
}

/// Validates a bearer credential and yields its claims (spec component C1).
///
/// Distinguishes `AuthExpired` (the JWT's `exp` has passed) from
/// `AuthInvalid` (bad signature, malformed token, or any other structural
/// failure) by inspecting the decoder's `ErrorKind`, since the two are
/// separate error kinds in the taxonomy (spec §7) and callers branch on the
/// difference — an expired token invites a refresh, an invalid one does not.
pub fn validate_token(token: &str, secret: &str) -> AppResult<Claims> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims)
    .map_err(|e| match e.kind() {
        ErrorKind::ExpiredSignature => AppError::AuthExpired,
        _ => {
            tracing::debug!("token validation failed: {:?}", e);
            AppError::AuthInvalid("invalid or malformed token".into())
        }
    })
}

// ============================================================================
// Refresh token hashing
// ============================================================================

/// Hashes a refresh token with SHA-256 for deterministic storage and lookup.
/// bcrypt is intentionally NOT used here because it is non-deterministic —
/// the same input produces a different hash on every call, making a lookup
/// by hash impossible without scanning every row.
pub fn hash_refresh_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}

// ============================================================================
// Password hashing
// ============================================================================

pub fn hash_password(password: &str) -> AppResult<String> {
    bcrypt::hash(password, 12).map_err(|e| {
        tracing::error!("failed to hash password: {:?}", e);
        AppError::Internal
    })
}

pub fn verify_password(password: &str, hash: &str) -> AppResult<bool> {
    bcrypt::verify(password, hash).map_err(|e| {
        tracing::error!("failed to verify password: {:?}", e);
        AppError::Internal
    })
}

// ============================================================================
// Auth extractor
// ============================================================================

/// Authenticated principal extracted from a valid access-token bearer header.
///
/// Fields are private: the only constructor is the `FromRequestParts` impl,
/// so a handler can never forge an `AuthUser` via a struct literal.
pub struct AuthUser {
    user_id: Uuid,
    username: String,
}

impl AuthUser {
    pub fn user_id(&self) -> Uuid {
        self.user_id
    }

    pub fn username(&self) -> &str {
        &self.username
    }
}

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let TypedHeader(Authorization(bearer)) = parts
            .extract::<TypedHeader<Authorization<Bearer>>>()
            .await
            .map_err(|_| AppError::AuthMissing)?;

        let claims = validate_token(bearer.token(), &state.jwt_secret)?;

        // Reject refresh tokens used as access tokens — they carry a 7-day
        // expiry and must never be accepted on protected API endpoints.
        if claims.token_type != TokenType::Access {
            return Err(AppError::AuthInvalid("access token required".into()));
        }

        let user_id = claims.user_id()?;

        Ok(AuthUser {
            user_id,
            username: claims.username,
        })
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_SECRET: &str = "test-secret-min-32-characters-long!!";

    #[test]
    fn hash_refresh_token_is_64_char_hex() {
        let hash = hash_refresh_token("some-random-token");
        assert_eq!(hash.len(), 64, "SHA-256 hex output must be 64 characters");
        assert!(
            hash.chars().all(|c| c.is_ascii_hexdigit()),
            "output must be lowercase hex"
        );
    }

    #[test]
    fn hash_refresh_token_is_deterministic() {
        let token = "deterministic-test-token";
        assert_eq!(hash_refresh_token(token), hash_refresh_token(token));
    }

    #[test]
    fn hash_refresh_token_differs_on_different_inputs() {
        assert_ne!(hash_refresh_token("token-alpha"), hash_refresh_token("token-beta"));
    }

    #[test]
    fn access_token_roundtrip_happy_path() {
        let user_id = Uuid::new_v4();
        let username = "alice".to_string();

        let token = create_access_token(user_id, username.clone(), TEST_SECRET)
            .expect("create_access_token should succeed");
        let claims = validate_token(&token, TEST_SECRET)
            .expect("validate_token should succeed for a fresh access token");

        assert_eq!(claims.sub, user_id.to_string());
        assert_eq!(claims.username, username);
        assert_eq!(claims.token_type, TokenType::Access);
    }

    #[test]
    fn refresh_token_roundtrip_happy_path() {
        let user_id = Uuid::new_v4();
        let token = create_refresh_token(user_id, "bob".into(), TEST_SECRET)
            .expect("create_refresh_token should succeed");
        let claims = validate_token(&token, TEST_SECRET)
            .expect("validate_token should succeed for a fresh refresh token");

        assert_eq!(claims.token_type, TokenType::Refresh);
    }

    #[test]
    fn validate_token_rejects_wrong_secret() {
        let token = create_access_token(Uuid::new_v4(), "dave".into(), TEST_SECRET).unwrap();
        let result = validate_token(&token, "completely-different-secret-value!!");
        assert!(matches!(result, Err(AppError::AuthInvalid(_))));
    }

    #[test]
    fn validate_token_rejects_malformed_string() {
        let result = validate_token("this.is.not.a.valid.jwt", TEST_SECRET);
        assert!(matches!(result, Err(AppError::AuthInvalid(_))));
    }

    #[test]
    fn validate_token_rejects_empty_string() {
        assert!(validate_token("", TEST_SECRET).is_err());
    }

    #[test]
    fn validate_token_distinguishes_expired_from_invalid() {
        // exp in the past; everything else well-formed and correctly signed.
        let claims = Claims {
            sub: Uuid::new_v4().to_string(),
            exp: (Utc::now() - Duration::minutes(5)).timestamp(),
            iat: (Utc::now() - Duration::minutes(20)).timestamp(),
            username: "grace".into(),
            token_type: TokenType::Access,
        };
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(TEST_SECRET.as_bytes()),
        )
        .unwrap();

        let result = validate_token(&token, TEST_SECRET);
        assert!(matches!(result, Err(AppError::AuthExpired)));
    }

    #[test]
    fn password_hash_verify_roundtrip_correct_password() {
        let password = "super-secure-password-123!";
        let hash = hash_password(password).unwrap();
        assert!(verify_password(password, &hash).unwrap());
    }

    #[test]
    fn password_hash_verify_roundtrip_wrong_password() {
        let hash = hash_password("correct-password").unwrap();
        assert!(!verify_password("wrong-password", &hash).unwrap());
    }

    #[test]
    fn claims_user_id_parses_valid_uuid() {
        let expected_id = Uuid::new_v4();
        let token = create_access_token(expected_id, "eve".into(), TEST_SECRET).unwrap();
        let claims = validate_token(&token, TEST_SECRET).unwrap();
        assert_eq!(claims.user_id().unwrap(), expected_id);
    }

    #[test]
    fn claims_user_id_rejects_invalid_sub() {
        let claims = Claims {
            sub: "not-a-uuid".to_string(),
            exp: 9_999_999_999,
            iat: 0,
            username: "frank".into(),
            token_type: TokenType::Access,
        };
        assert!(claims.user_id().is_err());
    }
}
