use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use axum::http::HeaderValue;
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sonar_api::auth::identity::{IdentityResolver, JwtIdentityResolver};
use sonar_api::auth::jwks::JwksClient;
use sonar_api::config::Config;
use sonar_api::db::messages::{MemoryMessageStore, MessageStore, PgMessageStore};
use sonar_api::AppState;
use sonar_common::SnowflakeGenerator;

#[tokio::main]
async fn main() {
    // Load .env file (silently skip if missing; env vars may be set externally)
    if dotenvy::dotenv().is_err() {
        let env_path = Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
        let _ = dotenvy::from_path(env_path);
    }

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();
    let port = config.port;

    let messages: Arc<dyn MessageStore> = match &config.database_url {
        Some(url) => {
            let db = sonar_api::db::pool::connect(url).expect("failed to create database pool");
            let snowflake = Arc::new(SnowflakeGenerator::new(config.worker_id));
            Arc::new(PgMessageStore::new(db, snowflake))
        }
        None => {
            tracing::warn!("DATABASE_URL not set, messages are kept in memory only");
            Arc::new(MemoryMessageStore::new())
        }
    };

    // JWKS client for validating provider-issued identity tokens.
    let jwks = JwksClient::new(&config.auth_jwks_url);
    let auth: Arc<dyn IdentityResolver> = Arc::new(JwtIdentityResolver::new(
        jwks,
        config.auth_issuer.clone(),
        config.auth_audience.clone(),
    ));

    tracing::info!(
        issuer = %config.auth_issuer,
        worker_id = config.worker_id,
        "sonar-api configured"
    );

    let cors = match config.client_origin.as_deref() {
        Some(origin) => {
            let origin: HeaderValue = origin.parse().expect("CLIENT_ORIGIN is not a valid origin");
            CorsLayer::new()
                .allow_origin(origin)
                .allow_methods(Any)
                .allow_headers(Any)
        }
        None => CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any),
    };

    let state = AppState::new(config, auth, messages);
    let gateway = state.gateway.clone();
    let drain_limit = state.config.socket.writer_drain * 2;

    let app = Router::new()
        .merge(sonar_api::routes::router())
        .merge(sonar_api::routes::docs())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!(%addr, "sonar-api listening");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("failed to bind");
    let stopping = gateway.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            stopping.shutdown();
        })
        .await
        .expect("server error");

    // Upgraded sockets outlive the HTTP server; give them time to send close frames.
    if !gateway.drain(drain_limit).await {
        tracing::warn!(remaining = gateway.live_sockets(), "sockets still open at exit");
    }

    tracing::info!("sonar-api stopped");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(?err, "failed to listen for ctrl-c");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::error!(?err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("shutdown signal received");
}
