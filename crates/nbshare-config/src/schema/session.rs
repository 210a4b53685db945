//! Session, mirror, and channel configuration types.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How a collaboration session is established and how long requests may take.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Name under which the host shares its service.
    pub service_name: String,
    /// Timeout for a request awaiting a response (valid range: 100-600000).
    pub request_timeout_ms: u32,
    /// How many times a guest retries finding the shared service (0-20).
    pub guest_retry_attempts: u32,
    /// Base delay between guest retries; grows linearly (0-60000).
    pub guest_retry_delay_ms: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            service_name: "nbshare-live".into(),
            request_timeout_ms: 30_000,
            guest_retry_attempts: 3,
            guest_retry_delay_ms: 500,
        }
    }
}

impl SessionConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(u64::from(self.request_timeout_ms))
    }

    pub fn guest_retry_delay(&self) -> Duration {
        Duration::from_millis(u64::from(self.guest_retry_delay_ms))
    }
}

/// Guest-side mirror naming.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MirrorConfig {
    /// Prepended to a host view type to form the mirror view type.
    pub view_type_prefix: String,
    /// Key under `metadata.custom` that carries a cell's friendly id.
    pub friendly_id_key: String,
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            view_type_prefix: "mirror-".into(),
            friendly_id_key: "friendlyId".into(),
        }
    }
}

impl MirrorConfig {
    pub fn mirror_view_type(&self, view_type: &str) -> String {
        format!("{}{}", self.view_type_prefix, view_type)
    }
}

/// Buffer sizes for the peer channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Frames buffered per direction (valid range: 8-65536).
    pub capacity: u32,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self { capacity: 256 }
    }
}
