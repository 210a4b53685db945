//! Host controller: shares the notebook service and relays editor state.

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use nbshare_common::{FriendlyId, MirrorError, Result, UriMapper};
use nbshare_config::NbshareConfig;
use serde_json::Value;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::channel::{RequestHandler, SharedService};
use crate::protocol::{
    ActiveDocumentPayload, BackupContext, CellMetadataPayload, CellOutputsEntry,
    CellOutputsPayload, CellRange, Notification, NotebookSnapshot, ProviderDescriptor,
    ProvidersPayload, Request, SelectionPayload,
};
use crate::session::CollaborationApi;
use crate::workbench::{EditorState, HostDocument, HostWorkbench, WorkbenchEvent};

/// Provider list captured from the workbench; replaced on refresh.
type ProviderList = Arc<RwLock<Vec<ProviderDescriptor>>>;

/// Runs on the host for the lifetime of one session.
pub struct HostController {
    api: Arc<dyn CollaborationApi>,
    workbench: Arc<dyn HostWorkbench>,
    config: NbshareConfig,
    providers: ProviderList,
    service: Option<SharedService>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl HostController {
    /// Captures the workbench's provider list; later changes are picked up
    /// only through [`HostController::refresh_providers`].
    pub fn new(
        api: Arc<dyn CollaborationApi>,
        workbench: Arc<dyn HostWorkbench>,
        config: NbshareConfig,
    ) -> Self {
        let providers = Arc::new(RwLock::new(workbench.content_providers()));
        Self {
            api,
            workbench,
            config,
            providers,
            service: None,
            cancel: CancellationToken::new(),
            task: None,
        }
    }

    /// Share the service, start answering guest requests, and start
    /// relaying editor state. `Ok(false)` if the service could not be shared.
    pub async fn initialize(&mut self) -> Result<bool> {
        let name = &self.config.session.service_name;
        let Some(service) = self.api.share_service(name).await? else {
            info!(service = %name, "Could not share service; mirroring disabled for this session");
            return Ok(false);
        };

        let mapper = self.api.uri_mapper();
        let key = self.config.mirror.friendly_id_key.clone();

        service.on_request(Arc::new(HostHandler {
            workbench: Arc::clone(&self.workbench),
            mapper: Arc::clone(&mapper),
            providers: Arc::clone(&self.providers),
            friendly_id_key: key.clone(),
        }));

        let relay = StateRelay {
            service: service.clone(),
            workbench: Arc::clone(&self.workbench),
            mapper,
            providers: Arc::clone(&self.providers),
            friendly_id_key: key,
            active: self.workbench.active_editor(),
        };
        let events = self.workbench.subscribe();
        self.task = Some(tokio::spawn(relay.run(events, self.cancel.clone())));
        self.service = Some(service);

        info!(
            service = %name,
            providers = self.list_providers().len(),
            "Host service shared"
        );
        Ok(true)
    }

    /// The provider list as last captured. Repeated calls return the same list.
    pub fn list_providers(&self) -> Vec<ProviderDescriptor> {
        self.providers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Re-read the workbench's providers and tell guests about them.
    pub async fn refresh_providers(&self) -> Vec<ProviderDescriptor> {
        let providers = refresh(&self.providers, self.workbench.as_ref());
        if let Some(service) = &self.service {
            service
                .notify(Notification::ProvidersChanged(ProvidersPayload {
                    providers: providers.clone(),
                }))
                .await;
        }
        providers
    }

    pub fn service(&self) -> Option<&SharedService> {
        self.service.as_ref()
    }

    /// Stop relaying and disconnect every guest.
    pub fn dispose(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            task.abort();
        }
        if let Some(service) = self.service.take() {
            service.close();
        }
        debug!("Host controller disposed");
    }
}

impl Drop for HostController {
    fn drop(&mut self) {
        self.dispose();
    }
}

fn refresh(providers: &ProviderList, workbench: &dyn HostWorkbench) -> Vec<ProviderDescriptor> {
    let fresh = workbench.content_providers();
    *providers.write().unwrap_or_else(|e| e.into_inner()) = fresh.clone();
    fresh
}

/// Snapshot of `document` with every cell's friendly id in its metadata.
fn snapshot_with_ids(document: &HostDocument, key: &str) -> NotebookSnapshot {
    let mut snapshot = document.to_snapshot();
    for (cell, host_cell) in snapshot.cells.iter_mut().zip(&document.cells) {
        let id = FriendlyId::from_cell_uri(&host_cell.uri.to_string());
        cell.metadata = std::mem::take(&mut cell.metadata).with_friendly_id(key, &id);
    }
    snapshot
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

struct HostHandler {
    workbench: Arc<dyn HostWorkbench>,
    mapper: Arc<dyn UriMapper>,
    providers: ProviderList,
    friendly_id_key: String,
}

#[async_trait]
impl RequestHandler for HostHandler {
    async fn handle(&self, request: Request) -> Result<Value> {
        let method = request.method();
        debug!(method, "Handling guest request");

        match request {
            Request::GuestInitialize => {
                let providers = self
                    .providers
                    .read()
                    .unwrap_or_else(|e| e.into_inner())
                    .clone();
                Ok(serde_json::to_value(providers)?)
            }
            Request::OpenNotebook(view_type, uri, context) => {
                let uri = self.mapper.to_local(&uri)?;
                match self.workbench.open_document(&view_type, &uri, &context).await? {
                    Some(document) => Ok(serde_json::to_value(snapshot_with_ids(
                        &document,
                        &self.friendly_id_key,
                    ))?),
                    None => {
                        debug!(%uri, %view_type, "No such document");
                        Ok(Value::Null)
                    }
                }
            }
            Request::SaveNotebook(view_type, uri) => {
                let uri = self.mapper.to_local(&uri)?;
                self.workbench.save_document(&view_type, &uri).await?;
                Ok(Value::Null)
            }
            Request::SaveNotebookAs(view_type, target, source) => {
                let target = self.mapper.to_local(&target)?;
                let source = self.mapper.to_local(&source)?;
                self.workbench
                    .save_document_as(&view_type, &target, &source)
                    .await?;
                Ok(Value::Null)
            }
            Request::BackupNotebook(view_type, uri, context) => {
                let uri = self.mapper.to_local(&uri)?;
                let context = BackupContext {
                    destination: self.mapper.to_local(&context.destination)?,
                };
                let info = self
                    .workbench
                    .backup_document(&view_type, &uri, &context)
                    .await?;
                Ok(serde_json::to_value(info)?)
            }
            Request::DeleteBackup(view_type, id) => {
                self.workbench.delete_backup(&view_type, &id).await?;
                Ok(Value::Null)
            }
            Request::ExecuteCell(view_type, document, _cell, index) => {
                let document = self.mapper.to_local(&document)?;
                let range = cell_range(index)?;
                self.workbench
                    .execute_cells(&view_type, &document, Some(range))
                    .await?;
                Ok(Value::Null)
            }
            Request::CancelExecuteCell(view_type, document, _cell, index) => {
                let document = self.mapper.to_local(&document)?;
                let range = cell_range(index)?;
                self.workbench
                    .cancel_cells(&view_type, &document, Some(range))
                    .await?;
                Ok(Value::Null)
            }
            Request::ExecuteDocument(view_type, document) => {
                let document = self.mapper.to_local(&document)?;
                self.workbench
                    .execute_cells(&view_type, &document, None)
                    .await?;
                Ok(Value::Null)
            }
            Request::CancelExecuteDocument(view_type, document) => {
                let document = self.mapper.to_local(&document)?;
                self.workbench
                    .cancel_cells(&view_type, &document, None)
                    .await?;
                Ok(Value::Null)
            }
        }
    }
}

fn cell_range(index: usize) -> Result<CellRange> {
    CellRange::checked(index).ok_or_else(|| MirrorError::Decode(format!("cell index {index} out of range")))
}

// ---------------------------------------------------------------------------
// Editor state relay
// ---------------------------------------------------------------------------

struct StateRelay {
    service: SharedService,
    workbench: Arc<dyn HostWorkbench>,
    mapper: Arc<dyn UriMapper>,
    providers: ProviderList,
    friendly_id_key: String,
    active: Option<EditorState>,
}

impl StateRelay {
    async fn run(
        mut self,
        mut events: broadcast::Receiver<WorkbenchEvent>,
        cancel: CancellationToken,
    ) {
        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => break,
                event = events.recv() => match event {
                    Ok(event) => event,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Workbench events lagged; some state was not relayed");
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                },
            };
            self.handle(event).await;
        }
    }

    async fn handle(&mut self, event: WorkbenchEvent) {
        match event {
            WorkbenchEvent::ActiveEditorChanged(editor) => {
                let payload = match &editor {
                    Some(editor) => ActiveDocumentPayload {
                        uri_components: Some(self.mapper.to_shared(&editor.uri)),
                        view_type: Some(editor.view_type.clone()),
                        options: self.workbench.content_options(&editor.view_type),
                    },
                    None => ActiveDocumentPayload::default(),
                };
                self.send(Notification::ActiveDocumentChanged(payload)).await;

                if let Some(editor) = &editor {
                    self.send_selection(editor).await;
                }
                self.active = editor;
            }
            WorkbenchEvent::SelectionChanged(editor) => {
                let is_active = self
                    .active
                    .as_ref()
                    .is_some_and(|active| active.uri == editor.uri && active.view_type == editor.view_type);
                if !is_active {
                    return;
                }
                self.send_selection(&editor).await;
                self.active = Some(editor);
            }
            WorkbenchEvent::CellMetadataChanged {
                uri,
                cell_uri,
                metadata,
                ..
            } => {
                let id = FriendlyId::from_cell_uri(&cell_uri.to_string());
                let metadata = metadata.with_friendly_id(&self.friendly_id_key, &id);
                self.send(Notification::CellMetadataChanged(CellMetadataPayload {
                    uri_components: self.mapper.to_shared(&uri),
                    cell_friendly_id: id,
                    metadata,
                }))
                .await;
            }
            WorkbenchEvent::CellOutputsChanged { uri, cells, .. } => {
                let data = cells
                    .into_iter()
                    .map(|(cell_uri, outputs)| CellOutputsEntry {
                        friendly_id: FriendlyId::from_cell_uri(&cell_uri.to_string()),
                        outputs,
                    })
                    .collect();
                self.send(Notification::CellOutputsChanged(CellOutputsPayload {
                    uri_components: self.mapper.to_shared(&uri),
                    data,
                }))
                .await;
            }
            WorkbenchEvent::ProvidersChanged => {
                let providers = refresh(&self.providers, self.workbench.as_ref());
                self.send(Notification::ProvidersChanged(ProvidersPayload { providers }))
                    .await;
            }
        }
    }

    async fn send_selection(&self, editor: &EditorState) {
        let Some(index) = editor.selection else {
            return;
        };
        self.send(Notification::ActiveSelectionChanged(SelectionPayload {
            uri_components: self.mapper.to_shared(&editor.uri),
            view_type: editor.view_type.clone(),
            range: CellRange::single(index),
        }))
        .await;
    }

    async fn send(&self, notification: Notification) {
        let event = notification.event();
        let guests = self.service.notify(notification).await;
        debug!(event, guests, "Relayed notification");
    }
}
