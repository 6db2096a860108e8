//! JWKS client for fetching and caching the auth provider's public keys.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use jsonwebtoken::{Algorithm, DecodingKey};
use serde::Deserialize;
use tokio::sync::RwLock;

/// How long to cache JWKS before re-fetching (1 hour).
const CACHE_TTL: Duration = Duration::from_secs(3600);

/// Minimum gap between forced refreshes triggered by unknown `kid`s.
const MIN_REFRESH_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum JwksError {
    #[error("failed to fetch JWKS: {0}")]
    Fetch(#[from] reqwest::Error),
    #[error("unknown signing key {0}")]
    UnknownKey(String),
}

/// A verification key together with the algorithm it must be used with.
#[derive(Clone)]
pub struct VerificationKey {
    pub key: DecodingKey,
    pub algorithm: Algorithm,
}

/// A cached set of decoding keys fetched from the provider's JWKS endpoint.
#[derive(Clone)]
pub struct JwksClient {
    jwks_url: String,
    http: reqwest::Client,
    cache: Arc<RwLock<JwksCache>>,
}

struct JwksCache {
    keys: HashMap<String, VerificationKey>,
    fetched_at: Option<Instant>,
}

#[derive(Debug, Deserialize)]
struct JwksResponse {
    keys: Vec<JwkEntry>,
}

#[derive(Debug, Deserialize)]
struct JwkEntry {
    kid: Option<String>,
    kty: String,
    alg: Option<String>,
    crv: Option<String>,
    x: Option<String>,
    n: Option<String>,
    e: Option<String>,
}

impl JwksClient {
    pub fn new(jwks_url: &str) -> Self {
        Self {
            jwks_url: jwks_url.to_string(),
            http: reqwest::Client::new(),
            cache: Arc::new(RwLock::new(JwksCache {
                keys: HashMap::new(),
                fetched_at: None,
            })),
        }
    }

    /// For tests: create a client pre-loaded with a known key.
    pub fn with_static_key(kid: &str, key: DecodingKey, algorithm: Algorithm) -> Self {
        let mut keys = HashMap::new();
        keys.insert(kid.to_string(), VerificationKey { key, algorithm });
        Self {
            jwks_url: String::new(),
            http: reqwest::Client::new(),
            cache: Arc::new(RwLock::new(JwksCache {
                keys,
                // Set fetched_at far in the future so it never expires in tests.
                fetched_at: Some(Instant::now() + Duration::from_secs(86400)),
            })),
        }
    }

    /// Get the verification key for a given `kid`. Fetches/re-fetches JWKS as needed.
    pub async fn get_key(&self, kid: &str) -> Result<VerificationKey, JwksError> {
        {
            let cache = self.cache.read().await;
            if let Some(key) = cache.keys.get(kid) {
                if is_fresh(&cache) {
                    return Ok(key.clone());
                }
            }
            // Unknown kid against a just-fetched set: don't hammer the provider.
            if !cache.keys.contains_key(kid) && recently_fetched(&cache) {
                return Err(JwksError::UnknownKey(kid.to_string()));
            }
        }

        self.refresh().await?;

        let cache = self.cache.read().await;
        cache
            .keys
            .get(kid)
            .cloned()
            .ok_or_else(|| JwksError::UnknownKey(kid.to_string()))
    }

    async fn refresh(&self) -> Result<(), JwksError> {
        tracing::info!(url = %self.jwks_url, "fetching auth provider JWKS");

        let resp: JwksResponse = self
            .http
            .get(&self.jwks_url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let keys: HashMap<String, VerificationKey> =
            resp.keys.into_iter().filter_map(parse_jwk).collect();

        tracing::debug!(count = keys.len(), "JWKS refreshed");

        let mut cache = self.cache.write().await;
        cache.keys = keys;
        cache.fetched_at = Some(Instant::now());

        Ok(())
    }
}

fn is_fresh(cache: &JwksCache) -> bool {
    cache.fetched_at.is_some_and(|t| t.elapsed() < CACHE_TTL)
}

fn recently_fetched(cache: &JwksCache) -> bool {
    cache
        .fetched_at
        .is_some_and(|t| t.elapsed() < MIN_REFRESH_INTERVAL)
}

/// Convert a JWK into a verification key. Unsupported or malformed keys are skipped.
fn parse_jwk(entry: JwkEntry) -> Option<(String, VerificationKey)> {
    let kid = entry.kid?;
    let parsed = match entry.kty.as_str() {
        "OKP" if entry.crv.as_deref() == Some("Ed25519") => {
            DecodingKey::from_ed_components(entry.x.as_deref()?)
                .map(|key| VerificationKey {
                    key,
                    algorithm: Algorithm::EdDSA,
                })
        }
        "RSA" => {
            let algorithm = entry
                .alg
                .as_deref()
                .and_then(|a| Algorithm::from_str(a).ok())
                .unwrap_or(Algorithm::RS256);
            DecodingKey::from_rsa_components(entry.n.as_deref()?, entry.e.as_deref()?)
                .map(|key| VerificationKey { key, algorithm })
        }
        _ => return None,
    };

    match parsed {
        Ok(key) => Some((kid, key)),
        Err(e) => {
            tracing::warn!(?e, %kid, "skipping malformed JWKS entry");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(json: serde_json::Value) -> JwkEntry {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn parses_ed25519_key() {
        let (kid, key) = parse_jwk(entry(serde_json::json!({
            "kid": "k1",
            "kty": "OKP",
            "crv": "Ed25519",
            "x": "11qYAYKxCrfVS_7TyWQHOg7hcvPapiMlrwIaaPcHURo"
        })))
        .unwrap();
        assert_eq!(kid, "k1");
        assert_eq!(key.algorithm, Algorithm::EdDSA);
    }

    #[test]
    fn parses_rsa_key_with_declared_alg() {
        let (_, key) = parse_jwk(entry(serde_json::json!({
            "kid": "rsa1",
            "kty": "RSA",
            "alg": "RS384",
            "n": "7WZ8Y-u1_Gi3InbLgbjF3PcbNjMWP4B3HgHoNpPzHeNDFtOfmgt_XezgUiYnhkQhr-3CRThDwja-orfN24RZ5_Hg40eafhZUj5fX4OSgPCUAkEf8a7G8dn_d2AuSOfJVq47O7aUg8NHVQk6LIKT5Cy9ZTsMO4YNV04ccz4Noh3lu7qVfZQ1EOi0oOr58LfK8bQRo7CbE1PqKssi3VgMODsRtnXu1pTn7j__ovN9l25jMXqqpz7WH_iJBtIkQfsyvhH17RMxWupm-nwX5LK-hLJE47itjClr0qIGftxMjNJLBIooF2hUL6T2MwDTmYOBNakquD2s2KwsVnxxbr73Xfw",
            "e": "AQAB"
        })))
        .unwrap();
        assert_eq!(key.algorithm, Algorithm::RS384);
    }

    #[test]
    fn skips_unsupported_and_incomplete_keys() {
        assert!(parse_jwk(entry(serde_json::json!({ "kid": "ec", "kty": "EC" }))).is_none());
        assert!(parse_jwk(entry(serde_json::json!({ "kty": "OKP", "crv": "Ed25519", "x": "abc" }))).is_none());
        assert!(parse_jwk(entry(serde_json::json!({ "kid": "x", "kty": "OKP", "crv": "X25519", "x": "abc" }))).is_none());
    }

    #[tokio::test]
    async fn static_key_is_served_from_cache() {
        let key = DecodingKey::from_secret(b"unused");
        let client = JwksClient::with_static_key("static", key, Algorithm::EdDSA);
        assert!(client.get_key("static").await.is_ok());
        assert!(matches!(
            client.get_key("other").await,
            Err(JwksError::UnknownKey(_))
        ));
    }
}
