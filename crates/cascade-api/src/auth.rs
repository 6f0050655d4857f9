//! Bearer-token authorization boundary
//!
//! The engine itself performs no authorization; this layer extracts the
//! requesting user from a JWT so handlers can compare it against
//! `workflow.user_id` / `job.user_id`. Issuing tokens (login) belongs to
//! the auth collaborator; `issue_token` exists for tests and tooling.

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ApiError;
use crate::AppState;

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    exp: i64,
}

/// The authenticated user's id, extracted from the `Authorization` header.
#[derive(Debug, Clone, Copy)]
pub struct CurrentUser(pub Uuid);

#[async_trait]
impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or(ApiError::Unauthorized)?;
        let token = header
            .strip_prefix("Bearer ")
            .ok_or(ApiError::Unauthorized)?;

        let algorithm = state
            .config
            .jwt_algorithm
            .parse::<Algorithm>()
            .unwrap_or(Algorithm::HS256);
        let decoded = decode::<Claims>(
            token,
            &DecodingKey::from_secret(state.config.jwt_secret_key.as_bytes()),
            &Validation::new(algorithm),
        )
        .map_err(|_| ApiError::Unauthorized)?;

        let user_id = Uuid::parse_str(&decoded.claims.sub).map_err(|_| ApiError::Unauthorized)?;
        Ok(CurrentUser(user_id))
    }
}

/// Sign a bearer token for a user id.
pub fn issue_token(secret: &str, user_id: Uuid, expire_minutes: i64) -> String {
    let claims = Claims {
        sub: user_id.to_string(),
        exp: (Utc::now() + chrono::Duration::minutes(expire_minutes)).timestamp(),
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .unwrap_or_default()
}
