//! In-memory workbench: a host and guest editor model without a UI.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use nbshare_common::{MirrorError, Result, UriComponents};
use tokio::sync::broadcast;
use tracing::debug;

use super::{
    CellEdit, EditorState, GuestWorkbench, HostDocument, HostWorkbench, MirrorContribution,
    VisibleEditor, WorkbenchEvent,
};
use crate::guest::{MirrorContentProvider, MirrorKernel};
use crate::protocol::{
    BackupContext, BackupInfo, CellMetadata, CellOutput, CellRange, ContentOptions,
    NotebookSnapshot, OpenContext, ProviderDescriptor,
};

/// A recorded kernel call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Execution {
    pub view_type: String,
    pub uri: UriComponents,
    pub range: Option<CellRange>,
    pub cancel: bool,
}

struct OpenDocument {
    view_type: String,
    document: HostDocument,
}

struct Registration {
    contribution: MirrorContribution,
    provider: Arc<MirrorContentProvider>,
    kernel: Arc<MirrorKernel>,
}

struct VisibleDocument {
    view_type: String,
    snapshot: NotebookSnapshot,
}

#[derive(Default)]
struct State {
    // host
    providers: Vec<ProviderDescriptor>,
    options: HashMap<String, ContentOptions>,
    documents: HashMap<UriComponents, OpenDocument>,
    active: Option<EditorState>,
    saved: Vec<UriComponents>,
    backups: HashMap<String, UriComponents>,
    next_backup: u64,
    executions: Vec<Execution>,
    // guest
    registrations: HashMap<String, Registration>,
    visible: Vec<(UriComponents, VisibleDocument)>,
    decorations: HashMap<UriComponents, CellRange>,
}

/// Keeps documents, editors, and registrations in memory.
///
/// Acts as a host workbench (documents are added directly and state
/// changes are broadcast as [`WorkbenchEvent`]s) and as a guest workbench
/// (mirror providers are registered and `open_with` materializes a
/// document through them).
pub struct MemoryWorkbench {
    state: Mutex<State>,
    events: broadcast::Sender<WorkbenchEvent>,
}

impl Default for MemoryWorkbench {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryWorkbench {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            state: Mutex::new(State::default()),
            events,
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn emit(&self, event: WorkbenchEvent) {
        // No subscribers just means no session is running.
        let _ = self.events.send(event);
    }

    // -- host -------------------------------------------------------------

    pub fn add_provider(&self, descriptor: ProviderDescriptor) {
        self.state().providers.push(descriptor);
    }

    /// Add a provider after a session started and announce the change.
    pub fn register_provider(&self, descriptor: ProviderDescriptor) {
        self.add_provider(descriptor);
        self.emit(WorkbenchEvent::ProvidersChanged);
    }

    pub fn set_content_options(&self, view_type: &str, options: ContentOptions) {
        self.state().options.insert(view_type.to_string(), options);
    }

    pub fn add_document(&self, view_type: &str, uri: &UriComponents, snapshot: NotebookSnapshot) {
        let document = HostDocument::from_snapshot(uri, snapshot);
        self.state().documents.insert(
            uri.clone(),
            OpenDocument {
                view_type: view_type.to_string(),
                document,
            },
        );
    }

    pub fn document(&self, uri: &UriComponents) -> Option<HostDocument> {
        self.state().documents.get(uri).map(|open| open.document.clone())
    }

    pub fn set_active_editor(&self, editor: Option<EditorState>) {
        self.state().active = editor.clone();
        self.emit(WorkbenchEvent::ActiveEditorChanged(editor));
    }

    /// Move the selection of the editor showing `uri`, active or not.
    pub fn set_selection(&self, uri: &UriComponents, view_type: &str, index: usize) {
        let editor = EditorState {
            uri: uri.clone(),
            view_type: view_type.to_string(),
            selection: Some(index),
        };
        {
            let mut state = self.state();
            if let Some(active) = state.active.as_mut() {
                if active.uri == editor.uri && active.view_type == editor.view_type {
                    active.selection = Some(index);
                }
            }
        }
        self.emit(WorkbenchEvent::SelectionChanged(editor));
    }

    pub fn set_cell_metadata(&self, uri: &UriComponents, index: usize, metadata: CellMetadata) -> bool {
        let event = {
            let mut state = self.state();
            let Some(open) = state.documents.get_mut(uri) else {
                return false;
            };
            let Some(cell) = open.document.cells.get_mut(index) else {
                return false;
            };
            cell.metadata = metadata.clone();
            WorkbenchEvent::CellMetadataChanged {
                uri: uri.clone(),
                view_type: open.view_type.clone(),
                cell_uri: cell.uri.clone(),
                metadata,
            }
        };
        self.emit(event);
        true
    }

    pub fn set_cell_outputs(&self, uri: &UriComponents, index: usize, outputs: Vec<CellOutput>) -> bool {
        let event = {
            let mut state = self.state();
            let Some(open) = state.documents.get_mut(uri) else {
                return false;
            };
            let Some(cell) = open.document.cells.get_mut(index) else {
                return false;
            };
            cell.outputs = outputs.clone();
            WorkbenchEvent::CellOutputsChanged {
                uri: uri.clone(),
                view_type: open.view_type.clone(),
                cells: vec![(cell.uri.clone(), outputs)],
            }
        };
        self.emit(event);
        true
    }

    pub fn saved(&self) -> Vec<UriComponents> {
        self.state().saved.clone()
    }

    pub fn backups(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.state().backups.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn executions(&self) -> Vec<Execution> {
        self.state().executions.clone()
    }

    // -- guest ------------------------------------------------------------

    pub fn registered_view_types(&self) -> Vec<String> {
        let mut view_types: Vec<String> = self.state().registrations.keys().cloned().collect();
        view_types.sort();
        view_types
    }

    pub fn contribution(&self, view_type: &str) -> Option<MirrorContribution> {
        self.state()
            .registrations
            .get(view_type)
            .map(|registration| registration.contribution.clone())
    }

    pub fn provider(&self, view_type: &str) -> Option<Arc<MirrorContentProvider>> {
        self.state()
            .registrations
            .get(view_type)
            .map(|registration| Arc::clone(&registration.provider))
    }

    /// The mirror document shown for `uri`.
    pub fn visible_document(&self, uri: &UriComponents) -> Option<NotebookSnapshot> {
        self.state()
            .visible
            .iter()
            .find(|(visible, _)| visible == uri)
            .map(|(_, doc)| doc.snapshot.clone())
    }

    pub fn decoration(&self, uri: &UriComponents) -> Option<CellRange> {
        self.state().decorations.get(uri).copied()
    }

    /// Replace `delete_count` cells of a visible mirror at `start` with `cells`.
    pub fn edit_cells(
        &self,
        uri: &UriComponents,
        start: usize,
        delete_count: usize,
        cells: Vec<crate::protocol::CellSnapshot>,
    ) -> bool {
        let inserted = cells.len();
        let provider = {
            let mut state = self.state();
            let Some((_, doc)) = state.visible.iter_mut().find(|(visible, _)| visible == uri) else {
                return false;
            };
            let len = doc.snapshot.cells.len();
            let start = start.min(len);
            let end = start.saturating_add(delete_count).min(len);
            doc.snapshot.cells.splice(start..end, cells);
            let view_type = doc.view_type.clone();
            state
                .registrations
                .get(&view_type)
                .map(|registration| Arc::clone(&registration.provider))
        };
        if let Some(provider) = provider {
            provider.cells_changed(uri, start, delete_count, inserted);
        }
        true
    }

    /// Move one cell of a visible mirror from `from` to `to`.
    pub fn move_cell(&self, uri: &UriComponents, from: usize, to: usize) -> bool {
        let provider = {
            let mut state = self.state();
            let Some((_, doc)) = state.visible.iter_mut().find(|(visible, _)| visible == uri) else {
                return false;
            };
            let cells = &mut doc.snapshot.cells;
            if from >= cells.len() {
                return false;
            }
            let cell = cells.remove(from);
            let to = to.min(cells.len());
            cells.insert(to, cell);
            let view_type = doc.view_type.clone();
            state
                .registrations
                .get(&view_type)
                .map(|registration| Arc::clone(&registration.provider))
        };
        if let Some(provider) = provider {
            provider.cell_moved(uri, from, to);
        }
        true
    }

    /// Run one cell of a visible mirror through its kernel.
    pub fn run_cell(&self, uri: &UriComponents, index: usize) -> Result<()> {
        let kernel = self.kernel_for(uri)?;
        kernel.execute_cell(uri, &uri.with_fragment(&format!("cell-{index}")), index)
    }

    pub fn run_all(&self, uri: &UriComponents) -> Result<()> {
        self.kernel_for(uri)?.execute_document(uri)
    }

    /// Close a visible mirror.
    pub fn close(&self, uri: &UriComponents) {
        let provider = {
            let mut state = self.state();
            let Some(pos) = state.visible.iter().position(|(visible, _)| visible == uri) else {
                return;
            };
            let (_, doc) = state.visible.remove(pos);
            state.decorations.remove(uri);
            state
                .registrations
                .get(&doc.view_type)
                .map(|registration| Arc::clone(&registration.provider))
        };
        if let Some(provider) = provider {
            provider.close_document(uri);
        }
    }

    fn kernel_for(&self, uri: &UriComponents) -> Result<Arc<MirrorKernel>> {
        let state = self.state();
        state
            .visible
            .iter()
            .find(|(visible, _)| visible == uri)
            .and_then(|(_, doc)| state.registrations.get(&doc.view_type))
            .map(|registration| Arc::clone(&registration.kernel))
            .ok_or_else(|| MirrorError::LoadFailure(format!("{uri} is not open")))
    }

    fn open_document_of(&self, view_type: &str, uri: &UriComponents) -> Result<()> {
        let state = self.state();
        match state.documents.get(uri) {
            Some(open) if open.view_type == view_type => Ok(()),
            _ => Err(MirrorError::LoadFailure(format!(
                "{uri} is not open as {view_type}"
            ))),
        }
    }
}

#[async_trait]
impl HostWorkbench for MemoryWorkbench {
    fn content_providers(&self) -> Vec<ProviderDescriptor> {
        self.state().providers.clone()
    }

    fn content_options(&self, view_type: &str) -> Option<ContentOptions> {
        self.state().options.get(view_type).cloned()
    }

    fn subscribe(&self) -> broadcast::Receiver<WorkbenchEvent> {
        self.events.subscribe()
    }

    fn active_editor(&self) -> Option<EditorState> {
        self.state().active.clone()
    }

    async fn open_document(
        &self,
        view_type: &str,
        uri: &UriComponents,
        _context: &OpenContext,
    ) -> Result<Option<HostDocument>> {
        let state = self.state();
        Ok(state
            .documents
            .get(uri)
            .filter(|open| open.view_type == view_type)
            .map(|open| open.document.clone()))
    }

    async fn save_document(&self, view_type: &str, uri: &UriComponents) -> Result<()> {
        self.open_document_of(view_type, uri)?;
        self.state().saved.push(uri.clone());
        Ok(())
    }

    async fn save_document_as(
        &self,
        view_type: &str,
        target: &UriComponents,
        source: &UriComponents,
    ) -> Result<()> {
        self.open_document_of(view_type, source)?;
        let mut state = self.state();
        let snapshot = match state.documents.get(source) {
            Some(open) => open.document.to_snapshot(),
            None => return Err(MirrorError::LoadFailure(format!("{source} is not open"))),
        };
        state.documents.insert(
            target.clone(),
            OpenDocument {
                view_type: view_type.to_string(),
                document: HostDocument::from_snapshot(target, snapshot),
            },
        );
        state.saved.push(target.clone());
        Ok(())
    }

    async fn backup_document(
        &self,
        view_type: &str,
        uri: &UriComponents,
        _context: &BackupContext,
    ) -> Result<BackupInfo> {
        self.open_document_of(view_type, uri)?;
        let mut state = self.state();
        state.next_backup += 1;
        let id = format!("backup-{}", state.next_backup);
        state.backups.insert(id.clone(), uri.clone());
        Ok(BackupInfo { id })
    }

    async fn delete_backup(&self, _view_type: &str, backup_id: &str) -> Result<()> {
        if self.state().backups.remove(backup_id).is_none() {
            debug!(backup_id, "Backup already gone");
        }
        Ok(())
    }

    async fn execute_cells(
        &self,
        view_type: &str,
        uri: &UriComponents,
        range: Option<CellRange>,
    ) -> Result<()> {
        self.open_document_of(view_type, uri)?;
        self.state().executions.push(Execution {
            view_type: view_type.to_string(),
            uri: uri.clone(),
            range,
            cancel: false,
        });
        Ok(())
    }

    async fn cancel_cells(
        &self,
        view_type: &str,
        uri: &UriComponents,
        range: Option<CellRange>,
    ) -> Result<()> {
        self.state().executions.push(Execution {
            view_type: view_type.to_string(),
            uri: uri.clone(),
            range,
            cancel: true,
        });
        Ok(())
    }
}

#[async_trait]
impl GuestWorkbench for MemoryWorkbench {
    fn register_content_provider(
        &self,
        contribution: MirrorContribution,
        provider: Arc<MirrorContentProvider>,
        kernel: Arc<MirrorKernel>,
    ) {
        debug!(view_type = %contribution.view_type, "Content provider registered");
        self.state().registrations.insert(
            contribution.view_type.clone(),
            Registration {
                contribution,
                provider,
                kernel,
            },
        );
    }

    fn unregister_content_provider(&self, view_type: &str) {
        let mut state = self.state();
        state.registrations.remove(view_type);
        state.visible.retain(|(_, doc)| doc.view_type != view_type);
    }

    async fn open_with(&self, uri: &UriComponents, view_type: &str) -> Result<()> {
        let provider = self.provider(view_type).ok_or_else(|| {
            MirrorError::LoadFailure(format!("no provider registered for {view_type}"))
        })?;

        // The lock must not be held across the round-trip to the host.
        let snapshot = provider.open(uri, OpenContext::default()).await?;
        provider.resolve(uri);

        let mut state = self.state();
        let document = VisibleDocument {
            view_type: view_type.to_string(),
            snapshot,
        };
        match state.visible.iter_mut().find(|(visible, _)| visible == uri) {
            Some((_, existing)) => *existing = document,
            None => state.visible.push((uri.clone(), document)),
        }
        Ok(())
    }

    fn visible_editors(&self) -> Vec<VisibleEditor> {
        self.state()
            .visible
            .iter()
            .map(|(uri, doc)| VisibleEditor {
                uri: uri.clone(),
                view_type: doc.view_type.clone(),
            })
            .collect()
    }

    fn set_selection_decoration(&self, uri: &UriComponents, range: CellRange) {
        self.state().decorations.insert(uri.clone(), range);
    }

    fn apply_cell_edit(&self, uri: &UriComponents, index: usize, edit: CellEdit) -> bool {
        let mut state = self.state();
        let Some((_, doc)) = state.visible.iter_mut().find(|(visible, _)| visible == uri) else {
            return false;
        };
        let Some(cell) = doc.snapshot.cells.get_mut(index) else {
            return false;
        };
        match edit {
            CellEdit::Metadata(metadata) => cell.metadata = metadata,
            CellEdit::Outputs(outputs) => cell.outputs = outputs,
        }
        true
    }
}
