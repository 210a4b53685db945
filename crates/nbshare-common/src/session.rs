use serde::{Deserialize, Serialize};

use crate::id::SessionId;

/// Which side of a collaboration session this process is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Owns the authoritative documents and the real kernels.
    Host,
    /// Works against mirrors; every real operation goes to the host.
    Guest,
}

/// A live collaboration session as seen by the local process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub id: SessionId,
    pub role: Role,
}

impl SessionInfo {
    pub fn new(role: Role) -> Self {
        Self {
            id: SessionId::new(),
            role,
        }
    }
}
