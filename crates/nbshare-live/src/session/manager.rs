//! Session manager: keeps exactly one controller matching the current role.

use std::sync::Arc;

use nbshare_common::{Event, EventBus, Result, Role, SessionInfo};
use nbshare_config::NbshareConfig;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::api::CollaborationApi;
use crate::guest::GuestController;
use crate::host::HostController;
use crate::protocol::ProviderDescriptor;
use crate::workbench::{GuestWorkbench, HostWorkbench};

/// The controller for the current session.
pub enum Controller {
    Host(HostController),
    Guest(GuestController),
}

impl Controller {
    pub fn role(&self) -> Role {
        match self {
            Controller::Host(_) => Role::Host,
            Controller::Guest(_) => Role::Guest,
        }
    }

    fn dispose(&mut self) {
        match self {
            Controller::Host(host) => host.dispose(),
            Controller::Guest(guest) => guest.dispose(),
        }
    }
}

struct ManagerInner {
    config: NbshareConfig,
    host_workbench: Arc<dyn HostWorkbench>,
    guest_workbench: Arc<dyn GuestWorkbench>,
    api: Arc<dyn CollaborationApi>,
    events: EventBus,
    controller: Mutex<Option<Controller>>,
}

impl ManagerInner {
    /// Tear down the current controller, then build one for `session`.
    async fn switch(&self, session: Option<SessionInfo>) -> Result<bool> {
        let mut slot = self.controller.lock().await;
        if let Some(mut previous) = slot.take() {
            let role = previous.role();
            previous.dispose();
            self.events.publish(Event::ControllerDisposed(role));
            info!(?role, "Controller disposed");
        }

        let Some(session) = session else {
            debug!("No session; no controller");
            return Ok(false);
        };

        let (controller, started) = match session.role {
            Role::Host => {
                let mut host = HostController::new(
                    Arc::clone(&self.api),
                    Arc::clone(&self.host_workbench),
                    self.config.clone(),
                );
                let started = host.initialize().await?;
                (Controller::Host(host), started)
            }
            Role::Guest => {
                let mut guest = GuestController::new(
                    Arc::clone(&self.api),
                    Arc::clone(&self.guest_workbench),
                    self.config.clone(),
                    self.events.clone(),
                );
                let started = guest.initialize().await?;
                (Controller::Guest(guest), started)
            }
        };

        if started {
            info!(session = %session.id, role = ?session.role, "Controller started");
            self.events.publish(Event::ControllerStarted(session.role));
        }
        *slot = Some(controller);
        Ok(started)
    }
}

/// Watches the collaboration service and swaps controllers as sessions
/// start, end, or change role.
pub struct SessionManager {
    config: NbshareConfig,
    host_workbench: Arc<dyn HostWorkbench>,
    guest_workbench: Arc<dyn GuestWorkbench>,
    events: EventBus,
    inner: Option<Arc<ManagerInner>>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl SessionManager {
    pub fn new(
        config: NbshareConfig,
        host_workbench: Arc<dyn HostWorkbench>,
        guest_workbench: Arc<dyn GuestWorkbench>,
        events: EventBus,
    ) -> Self {
        Self {
            config,
            host_workbench,
            guest_workbench,
            events,
            inner: None,
            cancel: CancellationToken::new(),
            task: None,
        }
    }

    /// Start following the collaboration service.
    ///
    /// `None` means no collaboration service is installed: the feature is
    /// off and `Ok(false)` is returned. Otherwise a controller is built for
    /// the current session (if any) and `Ok(true)` is returned once the
    /// manager is watching for changes, even if that controller is inert.
    pub async fn initialize(&mut self, api: Option<Arc<dyn CollaborationApi>>) -> Result<bool> {
        let Some(api) = api else {
            debug!("Collaboration service unavailable; notebook mirroring disabled");
            return Ok(false);
        };
        if self.inner.is_some() {
            self.dispose();
            self.cancel = CancellationToken::new();
        }

        let mut changes = api.session_changes();
        let current = changes.borrow_and_update().clone();

        let inner = Arc::new(ManagerInner {
            config: self.config.clone(),
            host_workbench: Arc::clone(&self.host_workbench),
            guest_workbench: Arc::clone(&self.guest_workbench),
            api,
            events: self.events.clone(),
            controller: Mutex::new(None),
        });

        if let Err(e) = inner.switch(current).await {
            warn!(error = %e, "Controller failed to start");
        }

        let watcher = Arc::clone(&inner);
        let cancel = self.cancel.clone();
        self.task = Some(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    changed = changes.changed() => {
                        if changed.is_err() {
                            debug!("Collaboration service gone");
                            break;
                        }
                    }
                }
                let session = changes.borrow_and_update().clone();
                if let Err(e) = watcher.switch(session).await {
                    warn!(error = %e, "Controller failed to start");
                }
            }
        }));
        self.inner = Some(inner);
        Ok(true)
    }

    /// Rebuild the controller for the current session from scratch.
    pub async fn reconnect(&self) -> Result<bool> {
        let Some(inner) = &self.inner else {
            return Ok(false);
        };
        info!("Reconnecting");
        inner.switch(inner.api.session()).await
    }

    pub async fn active_role(&self) -> Option<Role> {
        let inner = self.inner.as_ref()?;
        let slot = inner.controller.lock().await;
        slot.as_ref().map(Controller::role)
    }

    /// Host only: re-read the workbench's providers and announce them.
    pub async fn refresh_providers(&self) -> Option<Vec<ProviderDescriptor>> {
        let inner = self.inner.as_ref()?;
        let slot = inner.controller.lock().await;
        match slot.as_ref()? {
            Controller::Host(host) => Some(host.refresh_providers().await),
            Controller::Guest(_) => None,
        }
    }

    /// Host only: the provider list guests receive.
    pub async fn list_providers(&self) -> Option<Vec<ProviderDescriptor>> {
        let inner = self.inner.as_ref()?;
        let slot = inner.controller.lock().await;
        match slot.as_ref()? {
            Controller::Host(host) => Some(host.list_providers()),
            Controller::Guest(_) => None,
        }
    }

    /// Guest only: original view types that have a mirror.
    pub async fn mirrored_view_types(&self) -> Vec<String> {
        let Some(inner) = &self.inner else {
            return Vec::new();
        };
        let slot = inner.controller.lock().await;
        match slot.as_ref() {
            Some(Controller::Guest(guest)) => guest.mirrored_view_types(),
            _ => Vec::new(),
        }
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Stop watching and dispose the current controller.
    pub fn dispose(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            task.abort();
        }
        if let Some(inner) = self.inner.take() {
            // Busy only while a caller is mid-call; the controller then
            // disposes itself on drop.
            if let Ok(mut slot) = inner.controller.try_lock() {
                if let Some(mut controller) = slot.take() {
                    let role = controller.role();
                    controller.dispose();
                    self.events.publish(Event::ControllerDisposed(role));
                }
            }
        }
        self.events.publish(Event::Shutdown);
        info!("Session manager disposed");
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        if self.inner.is_some() {
            self.dispose();
        }
    }
}
