//! Guest controller: mirrors the host's notebook providers.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use nbshare_common::{Event, EventBus, MirrorError, Result, UriComponents, UriMapper};
use nbshare_config::schema::MirrorConfig;
use nbshare_config::NbshareConfig;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::identity::MirrorDocuments;
use super::kernel::MirrorKernel;
use super::provider::MirrorContentProvider;
use super::relay;
use crate::channel::{Inbound, SharedServiceProxy};
use crate::protocol::{Priority, ProviderDescriptor, Request, Selector};
use crate::session::CollaborationApi;
use crate::workbench::{GuestWorkbench, MirrorContribution};

/// State shared between the controller and its notification loop.
pub(crate) struct GuestState {
    pub(crate) mirror_config: MirrorConfig,
    pub(crate) workbench: Arc<dyn GuestWorkbench>,
    pub(crate) proxy: SharedServiceProxy,
    pub(crate) mapper: Arc<dyn UriMapper>,
    pub(crate) documents: Arc<MirrorDocuments>,
    /// Registered mirrors, keyed by the host's original view type.
    mirrors: Mutex<HashMap<String, Arc<MirrorContentProvider>>>,
    events: EventBus,
}

impl GuestState {
    fn mirrors(&self) -> MutexGuard<'_, HashMap<String, Arc<MirrorContentProvider>>> {
        self.mirrors.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn mirror(&self, view_type: &str) -> Option<Arc<MirrorContentProvider>> {
        self.mirrors().get(view_type).cloned()
    }

    /// Register a mirror for a host provider. Returns `false` if one exists.
    pub(crate) fn register_mirror(&self, descriptor: &ProviderDescriptor) -> bool {
        if self.mirrors().contains_key(&descriptor.view_type) {
            return false;
        }
        let contribution = MirrorContribution {
            view_type: self.mirror_config.mirror_view_type(&descriptor.view_type),
            display_name: descriptor.display_name.clone(),
            selector: descriptor.selector.clone(),
            priority: descriptor.priority,
            exclusive: false,
        };
        self.install(&descriptor.view_type, contribution);
        true
    }

    /// Register a mirror for a view type the host never announced,
    /// claiming files with the same extension as `uri`.
    pub(crate) fn register_lazy_mirror(
        &self,
        view_type: &str,
        uri: &UriComponents,
    ) -> Arc<MirrorContentProvider> {
        let pattern = format!("*{}", uri.extension().unwrap_or_default());
        let contribution = MirrorContribution {
            view_type: self.mirror_config.mirror_view_type(view_type),
            display_name: format!("Live Share - {view_type}"),
            selector: vec![Selector::new(pattern)],
            priority: Priority::Default,
            exclusive: true,
        };
        self.install(view_type, contribution)
    }

    fn install(&self, view_type: &str, contribution: MirrorContribution) -> Arc<MirrorContentProvider> {
        let mirror_view_type = contribution.view_type.clone();
        let provider = Arc::new(MirrorContentProvider::new(
            view_type,
            mirror_view_type.clone(),
            self.proxy.clone(),
            Arc::clone(&self.mapper),
            Arc::clone(&self.documents),
        ));
        let kernel = Arc::new(MirrorKernel::new(
            view_type,
            self.proxy.clone(),
            Arc::clone(&self.mapper),
        ));

        self.workbench
            .register_content_provider(contribution, Arc::clone(&provider), kernel);
        self.mirrors()
            .insert(view_type.to_string(), Arc::clone(&provider));

        info!(view_type, %mirror_view_type, "Mirror registered");
        self.events.publish(Event::MirrorRegistered {
            view_type: view_type.to_string(),
            mirror_view_type,
        });
        provider
    }

    fn unregister_all(&self) {
        let mirrors: Vec<Arc<MirrorContentProvider>> =
            self.mirrors().drain().map(|(_, provider)| provider).collect();
        for provider in mirrors {
            self.workbench
                .unregister_content_provider(provider.mirror_view_type());
        }
        self.documents.clear();
    }
}

/// Runs on a guest for the lifetime of one session.
pub struct GuestController {
    api: Arc<dyn CollaborationApi>,
    workbench: Arc<dyn GuestWorkbench>,
    config: NbshareConfig,
    events: EventBus,
    cancel: CancellationToken,
    state: Option<Arc<GuestState>>,
    task: Option<JoinHandle<()>>,
}

impl GuestController {
    pub fn new(
        api: Arc<dyn CollaborationApi>,
        workbench: Arc<dyn GuestWorkbench>,
        config: NbshareConfig,
        events: EventBus,
    ) -> Self {
        Self {
            api,
            workbench,
            config,
            events,
            cancel: CancellationToken::new(),
            state: None,
            task: None,
        }
    }

    /// Find the host's service, fetch its providers, and register one
    /// mirror per provider.
    ///
    /// Returns `Ok(false)` when the host never shares the service; the
    /// controller then stays inert.
    pub async fn initialize(&mut self) -> Result<bool> {
        let Some(proxy) = self.find_service().await else {
            info!(
                service = %self.config.session.service_name,
                "Host service not found; mirroring disabled for this session"
            );
            return Ok(false);
        };

        let providers: Vec<ProviderDescriptor> =
            match proxy.request_as(Request::GuestInitialize).await {
                Ok(providers) => providers,
                Err(e) => {
                    proxy.close();
                    return Err(e);
                }
            };

        let Some(inbound) = proxy.take_inbound() else {
            proxy.close();
            return Err(MirrorError::TransportFailure(
                "host channel already consumed".into(),
            ));
        };

        let state = Arc::new(GuestState {
            mirror_config: self.config.mirror.clone(),
            workbench: Arc::clone(&self.workbench),
            proxy,
            mapper: self.api.uri_mapper(),
            documents: Arc::new(MirrorDocuments::new(
                self.config.mirror.friendly_id_key.clone(),
            )),
            mirrors: Mutex::new(HashMap::new()),
            events: self.events.clone(),
        });

        for descriptor in &providers {
            state.register_mirror(descriptor);
        }
        info!(count = providers.len(), "Guest initialized");

        self.task = Some(tokio::spawn(run_notifications(
            Arc::clone(&state),
            inbound,
            self.cancel.clone(),
        )));
        self.state = Some(state);
        Ok(true)
    }

    /// Original view types that currently have a mirror.
    pub fn mirrored_view_types(&self) -> Vec<String> {
        let Some(state) = &self.state else {
            return Vec::new();
        };
        let mut view_types: Vec<String> = state.mirrors().keys().cloned().collect();
        view_types.sort();
        view_types
    }

    pub fn mirror(&self, view_type: &str) -> Option<Arc<MirrorContentProvider>> {
        self.state.as_ref()?.mirror(view_type)
    }

    /// Stop relaying, unregister every mirror, and drop the host channel.
    pub fn dispose(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            task.abort();
        }
        if let Some(state) = self.state.take() {
            state.unregister_all();
            state.proxy.close();
        }
        debug!("Guest controller disposed");
    }

    async fn find_service(&self) -> Option<SharedServiceProxy> {
        let name = &self.config.session.service_name;
        let attempts = self.config.session.guest_retry_attempts;
        let delay = self.config.session.guest_retry_delay();

        for attempt in 0..=attempts {
            if attempt > 0 {
                let wait = delay * attempt;
                debug!(attempt, ?wait, "Retrying shared service lookup");
                tokio::select! {
                    _ = self.cancel.cancelled() => return None,
                    _ = tokio::time::sleep(wait) => {}
                }
            }

            match self.api.get_shared_service(name).await {
                Ok(Some(proxy)) => return Some(proxy),
                Ok(None) => {}
                Err(e) => warn!(error = %e, attempt, "Shared service lookup failed"),
            }
        }
        None
    }
}

impl Drop for GuestController {
    fn drop(&mut self) {
        self.dispose();
    }
}

async fn run_notifications(
    state: Arc<GuestState>,
    mut inbound: mpsc::UnboundedReceiver<Inbound>,
    cancel: CancellationToken,
) {
    loop {
        let message = tokio::select! {
            _ = cancel.cancelled() => break,
            message = inbound.recv() => match message {
                Some(message) => message,
                None => {
                    info!("Host channel closed");
                    break;
                }
            },
        };

        match message {
            Inbound::Notification(notification) => {
                let event = notification.event();
                match relay::apply(&state, notification).await {
                    Ok(()) => debug!(event, "Applied notification"),
                    Err(MirrorError::DroppedNotification(_)) => {}
                    Err(e) => warn!(event, error = %e, "Failed to apply notification"),
                }
            }
            Inbound::Request { request, .. } => {
                warn!(method = request.method(), "Ignoring request sent to guest");
            }
        }
    }
}
