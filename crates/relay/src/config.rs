// Relay server configuration.
//
// Centralizes environment variable parsing with defaults for local
// development.

use std::net::SocketAddr;

/// Core relay server configuration.
///
/// Constructed via [`RelayConfig::from_env`] which reads environment
/// variables and falls back to sensible development defaults.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Listen address (host:port).
    pub listen_addr: SocketAddr,
    /// Log filter directive (e.g. `info`, `switchboard_relay=debug`).
    pub log_filter: String,
}

impl RelayConfig {
    /// Parse configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |---|---|
    /// | `SWITCHBOARD_RELAY_HOST` | `0.0.0.0` |
    /// | `SWITCHBOARD_RELAY_PORT` | `8080` |
    /// | `SWITCHBOARD_RELAY_LOG_FILTER` | `info` |
    pub fn from_env() -> Self {
        Self::from_env_fn(|key| std::env::var(key))
    }

    /// Testable constructor that accepts an environment lookup function.
    fn from_env_fn<F>(env: F) -> Self
    where
        F: Fn(&str) -> Result<String, std::env::VarError>,
    {
        let host = env("SWITCHBOARD_RELAY_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let port: u16 = env("SWITCHBOARD_RELAY_PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(8080);
        let listen_addr = format!("{host}:{port}")
            .parse()
            .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], port)));

        let log_filter =
            env("SWITCHBOARD_RELAY_LOG_FILTER").unwrap_or_else(|_| "info".into());

        Self { listen_addr, log_filter }
    }
}
