//! Configuration schema types for nbshare.
//!
//! All structs use `serde(default)` so partial configs work correctly.

mod relay;
mod session;
mod system;

pub use relay::*;
pub use session::*;
pub use system::*;

use serde::{Deserialize, Serialize};

/// Current config schema version.
pub const CONFIG_SCHEMA_VERSION: u32 = 1;

/// Root configuration for nbshare.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NbshareConfig {
    pub session: SessionConfig,
    pub mirror: MirrorConfig,
    pub channel: ChannelConfig,
    pub relay: RelayConfig,
    pub logging: LoggingConfig,
}
