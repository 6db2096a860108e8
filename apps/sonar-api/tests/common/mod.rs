#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use ed25519_dalek::{SigningKey, VerifyingKey};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header};
use serde::Serialize;
use sha2::{Digest, Sha256};

use sonar_api::auth::identity::JwtIdentityResolver;
use sonar_api::auth::jwks::JwksClient;
use sonar_api::config::{Config, SocketTimeouts};
use sonar_api::db::messages::MemoryMessageStore;
use sonar_api::AppState;

pub const TEST_ISSUER: &str = "https://auth.sonar.test";

/// Ed25519 keys standing in for the auth provider's signing key.
pub struct TestSigningKeys {
    pub kid: String,
    pub encoding: EncodingKey,
    pub decoding: DecodingKey,
}

impl TestSigningKeys {
    /// Derive a deterministic key pair from `seed`.
    pub fn from_seed(seed: &str) -> Self {
        let hash = Sha256::digest(seed.as_bytes());
        let mut secret_bytes = [0u8; 32];
        secret_bytes.copy_from_slice(&hash);

        let signing_key = SigningKey::from_bytes(&secret_bytes);
        let verifying_key: VerifyingKey = (&signing_key).into();

        let secret = signing_key.to_bytes();
        let public_bytes = verifying_key.to_bytes();

        let pkcs8_der = wrap_ed25519_private_pkcs8(&secret);
        let encoding = EncodingKey::from_ed_der(&pkcs8_der);
        let decoding = DecodingKey::from_ed_der(&public_bytes);

        let kid_hash = Sha256::digest(public_bytes);
        let kid = format!(
            "test-{}",
            kid_hash
                .iter()
                .take(4)
                .map(|b| format!("{b:02x}"))
                .collect::<String>()
        );

        Self {
            kid,
            encoding,
            decoding,
        }
    }
}

fn wrap_ed25519_private_pkcs8(secret: &[u8; 32]) -> Vec<u8> {
    let mut der = Vec::with_capacity(48);
    der.extend_from_slice(&[0x30, 0x2e]);
    der.extend_from_slice(&[0x02, 0x01, 0x00]);
    der.extend_from_slice(&[0x30, 0x05, 0x06, 0x03, 0x2b, 0x65, 0x70]);
    der.extend_from_slice(&[0x04, 0x22, 0x04, 0x20]);
    der.extend_from_slice(secret);
    der
}

/// Session token claims as the auth provider issues them.
#[derive(Debug, Serialize)]
pub struct TestClaims {
    pub iss: String,
    pub sub: String,
    pub iat: i64,
    pub exp: i64,
}

/// Mint a session token for `user_id` with a custom issuer and lifetime.
pub fn mint_token_with(keys: &TestSigningKeys, issuer: &str, user_id: &str, ttl_secs: i64) -> String {
    let now = chrono::Utc::now();
    let claims = TestClaims {
        iss: issuer.to_string(),
        sub: user_id.to_string(),
        iat: now.timestamp(),
        exp: (now + chrono::Duration::seconds(ttl_secs)).timestamp(),
    };

    let mut header = Header::new(Algorithm::EdDSA);
    header.kid = Some(keys.kid.clone());

    jsonwebtoken::encode(&header, &claims, &keys.encoding).expect("mint test token")
}

/// Mint a valid five-minute session token for `user_id`.
pub fn mint_token(keys: &TestSigningKeys, user_id: &str) -> String {
    mint_token_with(keys, TEST_ISSUER, user_id, 300)
}

/// Mint a token that expired well outside the validation leeway.
pub fn mint_expired_token(keys: &TestSigningKeys, user_id: &str) -> String {
    mint_token_with(keys, TEST_ISSUER, user_id, -600)
}

pub fn test_config() -> Config {
    Config {
        database_url: None,
        auth_issuer: TEST_ISSUER.to_string(),
        auth_jwks_url: "http://127.0.0.1:9/.well-known/jwks.json".to_string(),
        auth_audience: None,
        port: 0,
        client_origin: None,
        worker_id: 0,
        socket: SocketTimeouts::default(),
    }
}

/// Build a test AppState with an in-memory message store and a static JWKS key.
pub fn test_state() -> (AppState, TestSigningKeys, Arc<MemoryMessageStore>) {
    test_state_with(test_config())
}

pub fn test_state_with(config: Config) -> (AppState, TestSigningKeys, Arc<MemoryMessageStore>) {
    let signing_keys = TestSigningKeys::from_seed("sonar-test-seed");

    // Pre-load the JWKS client with the test key so it doesn't hit the network.
    let jwks = JwksClient::with_static_key(
        &signing_keys.kid,
        signing_keys.decoding.clone(),
        Algorithm::EdDSA,
    );
    let auth = Arc::new(JwtIdentityResolver::new(jwks, TEST_ISSUER, None));
    let store = Arc::new(MemoryMessageStore::new());

    let state = AppState::new(config, auth, store.clone());

    (state, signing_keys, store)
}

/// Build the full application router wired to a fresh test state.
pub fn test_app() -> (Router, AppState, TestSigningKeys, Arc<MemoryMessageStore>) {
    test_app_with(test_config())
}

pub fn test_app_with(config: Config) -> (Router, AppState, TestSigningKeys, Arc<MemoryMessageStore>) {
    let (state, keys, store) = test_state_with(config);
    let app = sonar_api::routes::router().with_state(state.clone());
    (app, state, keys, store)
}

/// Start an actual TCP server for WebSocket testing. The server runs in the background.
pub async fn start_server() -> (SocketAddr, AppState, TestSigningKeys, Arc<MemoryMessageStore>) {
    start_server_with(test_config()).await
}

/// Like [`start_server`], with custom socket timeouts.
pub async fn start_server_with_timeouts(
    socket: SocketTimeouts,
) -> (SocketAddr, AppState, TestSigningKeys, Arc<MemoryMessageStore>) {
    start_server_with(Config {
        socket,
        ..test_config()
    })
    .await
}

pub async fn start_server_with(
    config: Config,
) -> (SocketAddr, AppState, TestSigningKeys, Arc<MemoryMessageStore>) {
    let (app, state, keys, store) = test_app_with(config);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (addr, state, keys, store)
}
