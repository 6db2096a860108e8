//! Bearer token extraction for HTTP routes.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use crate::auth::identity::{bearer_token, HandshakeContext};
use crate::error::ApiError;
use crate::AppState;

/// Authenticated user extracted from the `Authorization: Bearer <token>` header.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: String,
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(&parts.headers)
            .ok_or_else(|| ApiError::unauthorized("Missing or malformed Authorization header"))?;

        let ctx = HandshakeContext::new(Some(token.to_string()));
        let user_id = state
            .auth
            .resolve_identity(&ctx)
            .await
            .ok_or_else(|| ApiError::unauthorized("Invalid or expired token"))?;

        Ok(AuthUser { user_id })
    }
}
