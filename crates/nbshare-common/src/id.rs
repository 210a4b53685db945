use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(String);

impl SessionId {
    pub fn new() -> Self {
        Self(new_id())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Cross-process handle for a single cell.
///
/// Derived from the cell's local URI on the host, so the same cell always
/// maps to the same id for as long as its URI is stable.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FriendlyId(String);

impl FriendlyId {
    /// Length in hex characters of a derived id.
    pub const LEN: usize = 16;

    pub fn from_cell_uri(cell_uri: &str) -> Self {
        let digest = Sha256::digest(cell_uri.as_bytes());
        let mut id = String::with_capacity(Self::LEN);
        for byte in digest.iter().take(Self::LEN / 2) {
            id.push_str(&format!("{byte:02x}"));
        }
        Self(id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for FriendlyId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for FriendlyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
