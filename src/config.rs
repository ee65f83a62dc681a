//! Process-level configuration loaded from the environment.
//!
//! Runtime behavior (trigger times, thresholds, enable flags) lives in the
//! `bot_config` database row and is re-read by the loops every cycle; this
//! module only covers what must be known before the database exists.

use std::net::SocketAddr;

/// Environment-derived application settings
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// SQLite URL, e.g. "sqlite://data/sepa.db"
    pub database_url: String,
    /// HTTP/WebSocket bind address
    pub bind_addr: SocketAddr,
    /// Snapshot polls before the paper broker reports a fill
    pub paper_fill_polls: u32,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://data/sepa.db".to_string(),
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 3000)),
            paper_fill_polls: 2,
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables, falling back to
    /// defaults on missing or unparseable values.
    pub fn from_env() -> Self {
        let mut config = AppConfig::default();

        if let Ok(url) = std::env::var("DATABASE_URL") {
            if !url.is_empty() {
                config.database_url = url;
            }
        }

        if let Ok(addr) = std::env::var("BIND_ADDR") {
            match addr.parse() {
                Ok(value) => config.bind_addr = value,
                Err(e) => {
                    tracing::warn!(
                        "Invalid BIND_ADDR '{}': {}, using default {}",
                        addr,
                        e,
                        config.bind_addr
                    );
                }
            }
        }

        if let Ok(polls) = std::env::var("PAPER_FILL_POLLS") {
            if let Ok(value) = polls.parse::<u32>() {
                if value > 0 {
                    config.paper_fill_polls = value;
                }
            }
        }

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.database_url, "sqlite://data/sepa.db");
        assert_eq!(config.bind_addr.port(), 3000);
        assert!(config.paper_fill_polls > 0);
    }
}
