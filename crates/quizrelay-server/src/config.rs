use serde::Deserialize;

/// Top-level server configuration, loaded from `quizrelay.toml`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_addr: String,
    pub limits: LimitsConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".to_string(),
            limits: LimitsConfig::default(),
        }
    }
}

/// Bounded constants of the relay. Production runs on the defaults;
/// integration tests shrink the timings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Total concurrent WebSocket connections accepted by this process.
    pub max_ws_connections: usize,
    /// Outbound frame queue per connection; a full queue closes the
    /// slow connection.
    pub outbound_buffer: usize,
    /// Messages allowed per connection per rolling second.
    pub rate_limit_per_sec: u32,
    pub heartbeat_interval_secs: u64,
    pub room_max_age_secs: u64,
    pub host_disconnect_grace_secs: u64,
    pub restore_min_interval_secs: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_ws_connections: 1000,
            outbound_buffer: 256,
            rate_limit_per_sec: 20,
            heartbeat_interval_secs: 30,
            room_max_age_secs: 2 * 60 * 60,
            host_disconnect_grace_secs: 5 * 60,
            restore_min_interval_secs: 5,
        }
    }
}

impl ServerConfig {
    /// Validate configuration; exits on values the relay cannot run with.
    pub fn validate(&self) {
        if self.listen_addr.parse::<std::net::SocketAddr>().is_err() {
            tracing::error!(
                addr = %self.listen_addr,
                "listen_addr is not a valid socket address"
            );
            std::process::exit(1);
        }
        if self.limits.rate_limit_per_sec == 0
            || self.limits.heartbeat_interval_secs == 0
            || self.limits.room_max_age_secs == 0
            || self.limits.outbound_buffer == 0
        {
            tracing::error!("limits must be non-zero");
            std::process::exit(1);
        }
    }

    /// Load config from `quizrelay.toml` if it exists, then apply env
    /// var overrides. `PORT` follows the deployment convention;
    /// `QUIZRELAY_LISTEN_ADDR` wins when both are set.
    pub fn load() -> Self {
        let mut config = match std::fs::read_to_string("quizrelay.toml") {
            Ok(content) => match toml::from_str::<ServerConfig>(&content) {
                Ok(cfg) => {
                    tracing::info!("Loaded configuration from quizrelay.toml");
                    cfg
                },
                Err(e) => {
                    tracing::warn!("Failed to parse quizrelay.toml: {e}, using defaults");
                    ServerConfig::default()
                },
            },
            Err(_) => ServerConfig::default(),
        };

        if let Ok(port) = std::env::var("PORT")
            && !port.is_empty()
        {
            config.listen_addr = format!("0.0.0.0:{port}");
        }
        if let Ok(addr) = std::env::var("QUIZRELAY_LISTEN_ADDR")
            && !addr.is_empty()
        {
            config.listen_addr = addr;
        }

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_values() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.listen_addr, "0.0.0.0:8080");
        assert_eq!(cfg.limits.rate_limit_per_sec, 20);
        assert_eq!(cfg.limits.room_max_age_secs, 7200);
        assert_eq!(cfg.limits.host_disconnect_grace_secs, 300);
        assert_eq!(cfg.limits.heartbeat_interval_secs, 30);
        assert_eq!(cfg.limits.restore_min_interval_secs, 5);
    }

    #[test]
    fn parse_minimal_toml() {
        let toml_str = r#"
listen_addr = "127.0.0.1:9090"

[limits]
rate_limit_per_sec = 5
"#;
        let cfg: ServerConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(cfg.listen_addr, "127.0.0.1:9090");
        assert_eq!(cfg.limits.rate_limit_per_sec, 5);
        // unspecified limits keep their defaults
        assert_eq!(cfg.limits.room_max_age_secs, 7200);
    }

    #[test]
    fn validate_accepts_default_config() {
        ServerConfig::default().validate();
    }

    #[test]
    fn validate_rejects_invalid_addr() {
        let cfg = ServerConfig {
            listen_addr: "not-an-address".to_string(),
            ..ServerConfig::default()
        };
        // validate() calls process::exit, so test the underlying check
        assert!(cfg.listen_addr.parse::<std::net::SocketAddr>().is_err());
    }
}
