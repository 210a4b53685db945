use serde::{Deserialize, Serialize};

/// Configuration for the WebSocket relay transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// WebSocket URL of the relay server.
    pub url: String,
    /// Whether to connect to the relay automatically when a session starts.
    pub auto_connect: bool,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:8080".into(),
            auto_connect: false,
        }
    }
}
