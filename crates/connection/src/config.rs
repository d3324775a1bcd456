use std::time::Duration;

use serde::{Deserialize, Serialize};

use ferry_protocol::constants::{WS_MAX_MESSAGE_SIZE, WS_PING_PERIOD, WS_PONG_WAIT};

/// Settings for one persistent connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// WebSocket endpoint, e.g. `ws://localhost:3000`.
    #[serde(default = "default_url")]
    pub url: String,

    #[serde(default = "default_ping_period_secs")]
    pub ping_period_secs: u64,

    /// Silence window after which the connection is declared dead.
    #[serde(default = "default_pong_wait_secs")]
    pub pong_wait_secs: u64,

    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
}

fn default_url() -> String {
    "ws://localhost:3000".into()
}

fn default_ping_period_secs() -> u64 {
    WS_PING_PERIOD.as_secs()
}

fn default_pong_wait_secs() -> u64 {
    WS_PONG_WAIT.as_secs()
}

fn default_max_message_size() -> usize {
    WS_MAX_MESSAGE_SIZE
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            ping_period_secs: default_ping_period_secs(),
            pong_wait_secs: default_pong_wait_secs(),
            max_message_size: default_max_message_size(),
        }
    }
}

impl ConnectionConfig {
    /// Default settings pointed at `url`.
    pub fn with_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    pub fn ping_period(&self) -> Duration {
        Duration::from_secs(self.ping_period_secs.max(1))
    }

    pub fn pong_wait(&self) -> Duration {
        Duration::from_secs(self.pong_wait_secs.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = ConnectionConfig::default();
        assert_eq!(cfg.url, "ws://localhost:3000");
        assert_eq!(cfg.ping_period(), Duration::from_secs(5));
        assert_eq!(cfg.pong_wait(), Duration::from_secs(60));
        assert_eq!(cfg.max_message_size, 16 * 1024 * 1024);
    }

    #[test]
    fn missing_fields_use_defaults() {
        let cfg: ConnectionConfig = serde_json::from_str(r#"{"url":"ws://10.0.0.5:9000"}"#).unwrap();
        assert_eq!(cfg.url, "ws://10.0.0.5:9000");
        assert_eq!(cfg.pong_wait_secs, 60);
    }

    #[test]
    fn zero_durations_are_clamped() {
        let cfg = ConnectionConfig {
            ping_period_secs: 0,
            pong_wait_secs: 0,
            ..ConnectionConfig::default()
        };
        assert_eq!(cfg.ping_period(), Duration::from_secs(1));
        assert_eq!(cfg.pong_wait(), Duration::from_secs(1));
    }
}
