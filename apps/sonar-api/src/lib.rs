pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod gateway;
pub mod models;
pub mod routes;

use std::sync::Arc;

use auth::identity::IdentityResolver;
use config::Config;
use db::messages::MessageStore;
use gateway::Gateway;

/// Shared application state available to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub auth: Arc<dyn IdentityResolver>,
    pub messages: Arc<dyn MessageStore>,
    pub gateway: Gateway,
}

impl AppState {
    /// Wire a fresh gateway around `messages`. Every call yields independent
    /// presence state.
    pub fn new(
        config: Config,
        auth: Arc<dyn IdentityResolver>,
        messages: Arc<dyn MessageStore>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            auth,
            gateway: Gateway::new(messages.clone()),
            messages,
        }
    }
}
