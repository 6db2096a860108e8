//! Resolves the identity behind a connection from the auth provider's token.

use async_trait::async_trait;
use axum::http::header::AUTHORIZATION;
use axum::http::HeaderMap;
use jsonwebtoken::Validation;
use serde::{Deserialize, Serialize};

use crate::auth::jwks::{JwksClient, JwksError};

/// Whatever the transport handshake carried that can prove who the caller is.
#[derive(Debug, Clone, Default)]
pub struct HandshakeContext {
    pub token: Option<String>,
}

impl HandshakeContext {
    pub fn new(token: Option<String>) -> Self {
        Self {
            token: token.filter(|t| !t.is_empty()),
        }
    }

    /// Prefer the `Authorization: Bearer` header, fall back to a query token.
    pub fn from_request(headers: &HeaderMap, query_token: Option<String>) -> Self {
        let header_token = bearer_token(headers).map(str::to_string);
        Self::new(header_token.or(query_token))
    }
}

/// Extract the token from an `Authorization: Bearer <token>` header.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

#[async_trait]
pub trait IdentityResolver: Send + Sync {
    /// The authenticated identity, or `None` if the handshake proves nothing.
    async fn resolve_identity(&self, ctx: &HandshakeContext) -> Option<String>;
}

/// Claims we rely on from provider-issued session tokens.
#[derive(Debug, Serialize, Deserialize)]
pub struct IdentityClaims {
    pub sub: String,
    pub iss: String,
    pub exp: i64,
    #[serde(default)]
    pub iat: i64,
    /// Authorized party (the frontend origin), if the provider sets one.
    #[serde(default)]
    pub azp: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("malformed token header")]
    Header(#[source] jsonwebtoken::errors::Error),
    #[error("token header has no kid")]
    MissingKid,
    #[error(transparent)]
    Jwks(#[from] JwksError),
    #[error("token rejected")]
    Invalid(#[source] jsonwebtoken::errors::Error),
    #[error("token has an empty subject")]
    EmptySubject,
}

/// Verifies provider JWTs against the provider's JWKS.
pub struct JwtIdentityResolver {
    jwks: JwksClient,
    issuer: String,
    audience: Option<String>,
}

impl JwtIdentityResolver {
    pub fn new(jwks: JwksClient, issuer: impl Into<String>, audience: Option<String>) -> Self {
        Self {
            jwks,
            issuer: issuer.into(),
            audience,
        }
    }

    /// Validate a token and return its claims.
    ///
    /// Checks the signature against the key named by `kid`, `exp`, `iss` and,
    /// when configured, `aud`.
    pub async fn verify(&self, token: &str) -> Result<IdentityClaims, TokenError> {
        let header = jsonwebtoken::decode_header(token).map_err(TokenError::Header)?;
        let kid = header.kid.ok_or(TokenError::MissingKid)?;
        let key = self.jwks.get_key(&kid).await?;

        let mut validation = Validation::new(key.algorithm);
        validation.set_issuer(&[&self.issuer]);
        validation.set_required_spec_claims(&["exp", "iss", "sub"]);
        match &self.audience {
            Some(aud) => validation.set_audience(&[aud]),
            None => validation.validate_aud = false,
        }

        let data = jsonwebtoken::decode::<IdentityClaims>(token, &key.key, &validation)
            .map_err(TokenError::Invalid)?;

        if data.claims.sub.trim().is_empty() {
            return Err(TokenError::EmptySubject);
        }
        Ok(data.claims)
    }
}

#[async_trait]
impl IdentityResolver for JwtIdentityResolver {
    async fn resolve_identity(&self, ctx: &HandshakeContext) -> Option<String> {
        let token = ctx.token.as_deref()?;
        match self.verify(token).await {
            Ok(claims) => Some(claims.sub),
            Err(err) => {
                tracing::debug!(%err, "identity token rejected");
                None
            }
        }
    }
}
