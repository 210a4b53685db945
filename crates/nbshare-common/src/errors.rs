use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("config parse error: {0}")]
    ParseError(String),

    #[error("config validation error: {0}")]
    ValidationError(String),
}

/// Failures of the mirroring protocol.
///
/// `UnavailableHost` and `DroppedNotification` are expected conditions:
/// callers treat them as "feature off" and "nothing to do" respectively
/// and never surface them to the user.
#[derive(Debug, thiserror::Error)]
pub enum MirrorError {
    #[error("collaboration host unavailable")]
    UnavailableHost,

    #[error("loading failed: {0}")]
    LoadFailure(String),

    #[error("dropped notification: {0}")]
    DroppedNotification(String),

    #[error("transport failure: {0}")]
    TransportFailure(String),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("malformed message: {0}")]
    Decode(String),

    #[error("remote error: {0}")]
    Remote(String),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl From<serde_json::Error> for MirrorError {
    fn from(err: serde_json::Error) -> Self {
        MirrorError::Decode(err.to_string())
    }
}
