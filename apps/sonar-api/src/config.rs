use std::time::Duration;

/// Sonar API configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// PostgreSQL connection string. When unset, messages are kept in memory.
    pub database_url: Option<String>,
    /// Expected `iss` claim of identity tokens issued by the auth provider.
    pub auth_issuer: String,
    /// JWKS endpoint of the auth provider.
    pub auth_jwks_url: String,
    /// Expected `aud` claim. Audience is not checked when unset.
    pub auth_audience: Option<String>,
    /// Port the HTTP server binds to.
    pub port: u16,
    /// Allowed CORS origin for browser clients. Any origin when unset.
    pub client_origin: Option<String>,
    /// Worker ID embedded in generated message IDs.
    pub worker_id: u16,
    /// Handshake, liveness and drain limits for `/socket` connections.
    pub socket: SocketTimeouts,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SocketTimeouts {
    /// Time allowed between the upgrade and the client's `user_connected`.
    pub confirm: Duration,
    /// Interval between server pings.
    pub ping_interval: Duration,
    /// A connection with no inbound frame for this long is dropped.
    pub idle: Duration,
    /// How long the writer gets to flush and send the close frame.
    pub writer_drain: Duration,
}

impl Default for SocketTimeouts {
    fn default() -> Self {
        Self {
            confirm: Duration::from_secs(10),
            ping_interval: Duration::from_secs(30),
            idle: Duration::from_secs(75),
            writer_drain: Duration::from_secs(5),
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Panics with a descriptive message if a required variable is missing.
    pub fn from_env() -> Self {
        Self {
            database_url: optional_var("DATABASE_URL"),
            auth_issuer: required_var("AUTH_ISSUER"),
            auth_jwks_url: required_var("AUTH_JWKS_URL"),
            auth_audience: optional_var("AUTH_AUDIENCE"),
            port: std::env::var("PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(5001),
            client_origin: optional_var("CLIENT_ORIGIN"),
            worker_id: std::env::var("WORKER_ID")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(0),
            socket: SocketTimeouts::default(),
        }
    }
}

fn required_var(name: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| panic!("{name} env var is required"))
}

fn optional_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn socket_defaults_keep_idle_above_ping_interval() {
        let t = SocketTimeouts::default();
        assert_eq!(t.confirm, Duration::from_secs(10));
        assert_eq!(t.ping_interval, Duration::from_secs(30));
        assert_eq!(t.idle, Duration::from_secs(75));
        assert!(t.idle > t.ping_interval * 2);
    }
}
