//! Transport connection settings.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Settings for the shared realtime transport connection.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RealtimeConfig {
    /// Websocket endpoint of the realtime gateway.
    pub url: String,
    /// Publishable API key sent as the `apikey` query parameter.
    pub api_key: String,
    /// Optional access token (JWT) for authenticated channels.
    pub access_token: Option<String>,
    /// Transport-level keepalive interval in seconds.
    pub socket_heartbeat_secs: u64,
    /// Timeout for connecting and for channel join replies, in seconds.
    pub connect_timeout_secs: u64,
    /// Capacity of each topic's inbound message queue.
    pub channel_buffer: usize,
    /// Events retained per channel for inspection.
    pub history_capacity: usize,
}

impl std::fmt::Debug for RealtimeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealtimeConfig")
            .field("url", &self.url)
            .field("api_key", &"[REDACTED]")
            .field(
                "access_token",
                &self.access_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("socket_heartbeat_secs", &self.socket_heartbeat_secs)
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .field("channel_buffer", &self.channel_buffer)
            .field("history_capacity", &self.history_capacity)
            .finish()
    }
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            url: "ws://localhost:4000/realtime/v1/websocket".into(),
            api_key: String::new(),
            access_token: None,
            socket_heartbeat_secs: 25,
            connect_timeout_secs: 15,
            channel_buffer: 256,
            history_capacity: 100,
        }
    }
}

impl RealtimeConfig {
    pub fn socket_heartbeat(&self) -> Duration {
        Duration::from_secs(self.socket_heartbeat_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Websocket URL including the `apikey` and protocol version parameters.
    pub fn ws_url(&self) -> String {
        let sep = if self.url.contains('?') { '&' } else { '?' };
        format!("{}{sep}apikey={}&vsn=1.0.0", self.url, self.api_key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_redacts_secrets() {
        let config = RealtimeConfig {
            api_key: "anon-key-123".into(),
            access_token: Some("jwt-secret".into()),
            ..Default::default()
        };
        let debug = format!("{config:?}");
        assert!(!debug.contains("anon-key-123"));
        assert!(!debug.contains("jwt-secret"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn ws_url_appends_query() {
        let config = RealtimeConfig {
            url: "wss://rt.example.com/socket".into(),
            api_key: "k".into(),
            ..Default::default()
        };
        assert_eq!(config.ws_url(), "wss://rt.example.com/socket?apikey=k&vsn=1.0.0");

        let config = RealtimeConfig {
            url: "wss://rt.example.com/socket?region=eu".into(),
            api_key: "k".into(),
            ..Default::default()
        };
        assert_eq!(
            config.ws_url(),
            "wss://rt.example.com/socket?region=eu&apikey=k&vsn=1.0.0"
        );
    }
}
