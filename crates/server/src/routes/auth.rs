use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use axum::{
    extract::{FromRequestParts, State},
    http::{request::Parts, StatusCode},
    Json, RequestPartsExt,
};
use axum_extra::{
    headers::{authorization::Bearer, Authorization},
    TypedHeader,
};
use jsonwebtoken::{encode, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use shared::{UserProfile, UserRole};

use crate::{config::AuthConfig, error::AppError, state::AppState};

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub role: UserRole,
    pub employee_id: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub token: String,
    pub user: UserProfile,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String, // user_id
    pub role: UserRole,
    pub exp: usize,
}

/// Token passed as a query parameter where headers are not available (WebSocket upgrades)
#[derive(Debug, Deserialize)]
pub struct TokenQuery {
    pub token: String,
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<AuthResponse>, AppError> {
    let invalid = || AppError::AuthError("Invalid employee ID or password".to_string());

    // Find user; employee id match is case-insensitive
    let (user, password_hash) = state
        .db
        .get_user_credentials(req.role, req.employee_id.trim())
        .await?
        .ok_or_else(invalid)?;

    // Verify password
    let parsed_hash =
        PasswordHash::new(&password_hash).map_err(|e| AppError::Internal(e.to_string()))?;
    Argon2::default()
        .verify_password(req.password.as_bytes(), &parsed_hash)
        .map_err(|_| invalid())?;

    let token = generate_token(&user.id, user.role, &state.config.auth)?;
    tracing::info!("User {} logged in as {}", user.employee_id, user.role.as_str());

    Ok(Json(AuthResponse { token, user }))
}

/// Ends the caller's tracking; the token itself simply expires
pub async fn logout(State(state): State<AppState>, auth: AuthUser) -> StatusCode {
    if state.engine.stop_tracking(&auth.user_id) {
        tracing::info!("Tracking stopped on logout for user {}", auth.user_id);
    }
    StatusCode::NO_CONTENT
}

pub fn hash_password(password: &str) -> anyhow::Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| anyhow::anyhow!("Failed to hash password: {}", e))
}

pub fn generate_token(
    user_id: &str,
    role: UserRole,
    auth_config: &AuthConfig,
) -> Result<String, AppError> {
    let lifetime = i64::try_from(auth_config.token_expiry_hours)
        .ok()
        .and_then(chrono::Duration::try_hours)
        .ok_or_else(|| AppError::Internal("Token lifetime out of range".to_string()))?;
    let expiration = chrono::Utc::now()
        .checked_add_signed(lifetime)
        .ok_or_else(|| AppError::Internal("Failed to calculate expiration".to_string()))?
        .timestamp() as usize;

    let claims = Claims {
        sub: user_id.to_string(),
        role,
        exp: expiration,
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(auth_config.jwt_secret.as_bytes()),
    )
    .map_err(|e| AppError::Internal(e.to_string()))
}

pub fn verify_token(token: &str, secret: &str) -> Result<Claims, AppError> {
    jsonwebtoken::decode::<Claims>(
        token,
        &jsonwebtoken::DecodingKey::from_secret(secret.as_bytes()),
        &jsonwebtoken::Validation::default(),
    )
    .map(|data| data.claims)
    .map_err(|e| AppError::AuthError(e.to_string()))
}

// ============================================================================
// Extractors
// ============================================================================

/// Any authenticated caller
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: String,
    pub role: UserRole,
}

impl From<Claims> for AuthUser {
    fn from(claims: Claims) -> Self {
        Self {
            user_id: claims.sub,
            role: claims.role,
        }
    }
}

#[axum::async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let TypedHeader(Authorization(bearer)) = parts
            .extract::<TypedHeader<Authorization<Bearer>>>()
            .await
            .map_err(|_| {
                AppError::AuthError("Missing or invalid Authorization header".to_string())
            })?;

        let claims = verify_token(bearer.token(), &state.config.auth.jwt_secret)?;
        Ok(claims.into())
    }
}

/// A field salesman; attendance and meetings are theirs alone
#[derive(Debug, Clone)]
pub struct SalesmanUser(pub AuthUser);

#[axum::async_trait]
impl FromRequestParts<AppState> for SalesmanUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let user = AuthUser::from_request_parts(parts, state).await?;
        if user.role != UserRole::Salesman {
            return Err(AppError::Forbidden("Salesman access required".to_string()));
        }
        Ok(Self(user))
    }
}

#[derive(Debug, Clone)]
pub struct AdminUser(pub AuthUser);

#[axum::async_trait]
impl FromRequestParts<AppState> for AdminUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let user = AuthUser::from_request_parts(parts, state).await?;
        if user.role != UserRole::Admin {
            return Err(AppError::Forbidden("Admin access required".to_string()));
        }
        Ok(Self(user))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[test]
    fn token_round_trips_role() {
        let auth = Config::default().auth;
        let token = generate_token("u1", UserRole::Salesman, &auth).unwrap();
        let claims = verify_token(&token, &auth.jwt_secret).unwrap();
        assert_eq!(claims.sub, "u1");
        assert_eq!(claims.role, UserRole::Salesman);
        assert!(verify_token(&token, "other-secret").is_err());
    }

    #[test]
    fn oversized_token_lifetime_is_an_error() {
        let mut auth = Config::default().auth;
        auth.token_expiry_hours = u64::MAX;
        assert!(matches!(
            generate_token("u1", UserRole::Admin, &auth),
            Err(AppError::Internal(_))
        ));
    }

    #[test]
    fn hashed_password_verifies() {
        let hash = hash_password("sales123").unwrap();
        let parsed = PasswordHash::new(&hash).unwrap();
        assert!(Argon2::default().verify_password(b"sales123", &parsed).is_ok());
        assert!(Argon2::default().verify_password(b"wrong", &parsed).is_err());
    }
}
