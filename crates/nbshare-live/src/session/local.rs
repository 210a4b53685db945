//! In-process collaboration service.
//!
//! Every participant gets its own [`LocalCollaboration`] over a shared
//! [`LocalRegistry`]; services shared by a host are found by guests
//! through the registry and connected with in-memory endpoints.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use nbshare_common::{PrefixUriMapper, Result, Role, SessionInfo, UriMapper};
use tokio::sync::watch;
use tracing::{debug, info};

use super::api::CollaborationApi;
use crate::channel::{ChannelSettings, Endpoint, SharedService, SharedServiceProxy};

/// Services shared in-process, by name.
#[derive(Clone, Default)]
pub struct LocalRegistry {
    services: Arc<Mutex<HashMap<String, SharedService>>>,
}

impl LocalRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn services(&self) -> MutexGuard<'_, HashMap<String, SharedService>> {
        self.services.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn publish(&self, service: SharedService) {
        if let Some(previous) = self
            .services()
            .insert(service.name().to_string(), service)
        {
            previous.close();
        }
    }

    fn lookup(&self, name: &str) -> Option<SharedService> {
        self.services()
            .get(name)
            .filter(|service| !service.is_closed())
            .cloned()
    }

    fn withdraw(&self, name: &str) {
        if let Some(service) = self.services().remove(name) {
            service.close();
        }
    }
}

/// One participant's view of an in-process collaboration.
pub struct LocalCollaboration {
    registry: LocalRegistry,
    settings: ChannelSettings,
    mapper: Arc<dyn UriMapper>,
    session: watch::Sender<Option<SessionInfo>>,
    shared: Mutex<Vec<String>>,
}

impl LocalCollaboration {
    pub fn new(registry: LocalRegistry, settings: ChannelSettings) -> Self {
        Self::with_mapper(registry, settings, Arc::new(PrefixUriMapper::identity()))
    }

    pub fn with_mapper(
        registry: LocalRegistry,
        settings: ChannelSettings,
        mapper: Arc<dyn UriMapper>,
    ) -> Self {
        let (session, _) = watch::channel(None);
        Self {
            registry,
            settings,
            mapper,
            session,
            shared: Mutex::new(Vec::new()),
        }
    }

    /// Join a new session in `role`, replacing any current one.
    pub fn start_session(&self, role: Role) -> SessionInfo {
        let info = SessionInfo::new(role);
        info!(session = %info.id, ?role, "Local session started");
        self.session.send_replace(Some(info.clone()));
        info
    }

    /// Leave the current session and withdraw every service this
    /// participant shared.
    pub fn end_session(&self) {
        let shared: Vec<String> = self
            .shared
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain(..)
            .collect();
        for name in shared {
            self.registry.withdraw(&name);
        }
        if self.session.send_replace(None).is_some() {
            info!("Local session ended");
        }
    }

    fn role(&self) -> Option<Role> {
        self.session.borrow().as_ref().map(|info| info.role)
    }
}

#[async_trait]
impl CollaborationApi for LocalCollaboration {
    fn session(&self) -> Option<SessionInfo> {
        self.session.borrow().clone()
    }

    fn session_changes(&self) -> watch::Receiver<Option<SessionInfo>> {
        self.session.subscribe()
    }

    async fn share_service(&self, name: &str) -> Result<Option<SharedService>> {
        if self.role() != Some(Role::Host) {
            return Ok(None);
        }
        let service = SharedService::new(name, self.settings);
        self.registry.publish(service.clone());
        self.shared
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(name.to_string());
        debug!(service = name, "Service shared locally");
        Ok(Some(service))
    }

    async fn get_shared_service(&self, name: &str) -> Result<Option<SharedServiceProxy>> {
        if self.role() != Some(Role::Guest) {
            return Ok(None);
        }
        let Some(service) = self.registry.lookup(name) else {
            return Ok(None);
        };
        let (host_end, guest_end) = Endpoint::pair(self.settings.capacity);
        service.attach(host_end);
        Ok(Some(SharedServiceProxy::connect(name, guest_end, self.settings)))
    }

    fn uri_mapper(&self) -> Arc<dyn UriMapper> {
        Arc::clone(&self.mapper)
    }
}
