use chat_core::ChatError;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Claims the auth collaborator signs into access tokens (HS256).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub username: String,
    pub exp: i64,
}

/// The identity attached to a connection or request after validation.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub id: Uuid,
    pub username: String,
}

pub fn extract_bearer(authorization: &str) -> Option<&str> {
    authorization.strip_prefix("Bearer ")
}

pub fn verify_token(secret: &str, token: Option<&str>) -> Result<AuthUser, ChatError> {
    let token =
        token.ok_or_else(|| ChatError::Unauthorized("missing access token".to_owned()))?;
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::new(Algorithm::HS256),
    )
    .map_err(|e| ChatError::Unauthorized(format!("invalid access token: {e}")))?;
    Ok(AuthUser {
        id: data.claims.sub,
        username: data.claims.username,
    })
}
