//! Settings types.

use roomcast_core::ReconnectPolicy;
use serde::{Deserialize, Serialize};

/// Root settings document.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RoomcastSettings {
    /// Gateway settings.
    pub server: ServerSettings,
    /// Client transport settings.
    pub transport: TransportSettings,
    /// Logging settings.
    pub logging: LoggingSettings,
}

/// Gateway network and connection settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Bind port.
    pub port: u16,
    /// WebSocket endpoint path.
    pub path: String,
    /// Outbound frames buffered per connection before deliveries drop.
    pub send_queue: usize,
    /// Ping interval in milliseconds.
    pub heartbeat_interval_ms: u64,
    /// Silence after which a connection is closed, in milliseconds.
    pub heartbeat_timeout_ms: u64,
    /// Max inbound WebSocket message size in bytes.
    pub max_message_size: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 4000,
            path: "/socket.io".to_string(),
            send_queue: 256,
            heartbeat_interval_ms: 25_000,
            heartbeat_timeout_ms: 60_000,
            max_message_size: 1024 * 1024,
        }
    }
}

/// Client transport settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TransportSettings {
    /// Server base URL (`ws://host:port`).
    pub url: String,
    /// Endpoint path appended to `url`.
    pub path: String,
    /// Reconnect policy.
    pub reconnect: ReconnectPolicy,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:4000".to_string(),
            path: "/socket.io".to_string(),
            reconnect: ReconnectPolicy::default(),
        }
    }
}

impl TransportSettings {
    /// Full endpoint URL.
    pub fn endpoint(&self) -> String {
        format!("{}{}", self.url.trim_end_matches('/'), self.path)
    }
}

/// Logging settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of compact text.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_joins_url_and_path() {
        let t = TransportSettings {
            url: "ws://example.com/".into(),
            ..TransportSettings::default()
        };
        assert_eq!(t.endpoint(), "ws://example.com/socket.io");
    }

    #[test]
    fn serializes_camel_case() {
        let json = serde_json::to_value(RoomcastSettings::default()).unwrap();
        assert_eq!(json["server"]["sendQueue"], 256);
        assert_eq!(json["transport"]["reconnect"]["reconnectionDelayMaxMs"], 5000);
    }
}
