//! The collaboration service the controllers are built on.

use std::sync::Arc;

use async_trait::async_trait;
use nbshare_common::{Result, SessionInfo, UriMapper};
use tokio::sync::watch;

use crate::channel::{SharedService, SharedServiceProxy};

/// A collaboration service: announces sessions, brokers named shared
/// services between host and guests, and translates URIs.
#[async_trait]
pub trait CollaborationApi: Send + Sync {
    /// The session this process is currently part of, if any.
    fn session(&self) -> Option<SessionInfo>;

    /// Fires on every session start, end, or role change.
    fn session_changes(&self) -> watch::Receiver<Option<SessionInfo>>;

    /// Host side: publish a service under `name`.
    /// `Ok(None)` when there is no hosted session to share it in.
    async fn share_service(&self, name: &str) -> Result<Option<SharedService>>;

    /// Guest side: connect to the host's service `name`.
    /// `Ok(None)` when the host has not shared it (yet).
    async fn get_shared_service(&self, name: &str) -> Result<Option<SharedServiceProxy>>;

    fn uri_mapper(&self) -> Arc<dyn UriMapper>;
}
