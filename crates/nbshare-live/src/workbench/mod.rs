//! The editor application as seen by the controllers.
//!
//! The host drives a [`HostWorkbench`] that owns the real documents and
//! kernels. The guest drives a [`GuestWorkbench`] into which it registers
//! mirror providers and pushes remote state. [`MemoryWorkbench`] implements
//! both in memory, for tests and embedders without an editor.

mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use nbshare_common::{Result, UriComponents};
use tokio::sync::broadcast;

use crate::guest::{MirrorContentProvider, MirrorKernel};
use crate::protocol::{
    BackupContext, BackupInfo, CellKind, CellMetadata, CellOutput, CellRange, CellSnapshot,
    ContentOptions, NotebookMetadata, NotebookSnapshot, OpenContext, Priority,
    ProviderDescriptor, Selector,
};

pub use memory::{Execution, MemoryWorkbench};

// ---------------------------------------------------------------------------
// Host side
// ---------------------------------------------------------------------------

/// An editor showing a notebook, with the cell index of its primary selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditorState {
    pub uri: UriComponents,
    pub view_type: String,
    pub selection: Option<usize>,
}

/// Changes the host relays to guests. URIs are host-local.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkbenchEvent {
    ActiveEditorChanged(Option<EditorState>),
    SelectionChanged(EditorState),
    CellMetadataChanged {
        uri: UriComponents,
        view_type: String,
        cell_uri: UriComponents,
        metadata: CellMetadata,
    },
    CellOutputsChanged {
        uri: UriComponents,
        view_type: String,
        cells: Vec<(UriComponents, Vec<CellOutput>)>,
    },
    ProvidersChanged,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HostCell {
    pub uri: UriComponents,
    pub kind: CellKind,
    pub language: String,
    pub metadata: CellMetadata,
    pub outputs: Vec<CellOutput>,
    pub source: String,
}

/// A live document on the host. Unlike a snapshot, every cell knows its URI.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HostDocument {
    pub languages: Vec<String>,
    pub metadata: NotebookMetadata,
    pub cells: Vec<HostCell>,
}

impl HostDocument {
    /// Cell `n` of `uri` gets the URI `uri#cell-n`.
    pub fn from_snapshot(uri: &UriComponents, snapshot: NotebookSnapshot) -> Self {
        let cells = snapshot
            .cells
            .into_iter()
            .enumerate()
            .map(|(n, cell)| HostCell {
                uri: uri.with_fragment(&format!("cell-{n}")),
                kind: cell.kind,
                language: cell.language,
                metadata: cell.metadata,
                outputs: cell.outputs,
                source: cell.source,
            })
            .collect();
        Self {
            languages: snapshot.languages,
            metadata: snapshot.metadata,
            cells,
        }
    }

    pub fn to_snapshot(&self) -> NotebookSnapshot {
        NotebookSnapshot {
            languages: self.languages.clone(),
            metadata: self.metadata.clone(),
            cells: self
                .cells
                .iter()
                .map(|cell| CellSnapshot {
                    kind: cell.kind,
                    language: cell.language.clone(),
                    metadata: cell.metadata.clone(),
                    outputs: cell.outputs.clone(),
                    source: cell.source.clone(),
                })
                .collect(),
        }
    }
}

#[async_trait]
pub trait HostWorkbench: Send + Sync {
    /// Notebook content providers currently registered.
    fn content_providers(&self) -> Vec<ProviderDescriptor>;

    fn content_options(&self, view_type: &str) -> Option<ContentOptions>;

    fn subscribe(&self) -> broadcast::Receiver<WorkbenchEvent>;

    fn active_editor(&self) -> Option<EditorState>;

    /// `Ok(None)` when the provider cannot produce the document.
    async fn open_document(
        &self,
        view_type: &str,
        uri: &UriComponents,
        context: &OpenContext,
    ) -> Result<Option<HostDocument>>;

    async fn save_document(&self, view_type: &str, uri: &UriComponents) -> Result<()>;

    async fn save_document_as(
        &self,
        view_type: &str,
        target: &UriComponents,
        source: &UriComponents,
    ) -> Result<()>;

    async fn backup_document(
        &self,
        view_type: &str,
        uri: &UriComponents,
        context: &BackupContext,
    ) -> Result<BackupInfo>;

    async fn delete_backup(&self, view_type: &str, backup_id: &str) -> Result<()>;

    /// Run the cells in `range`, or the whole document when `None`.
    async fn execute_cells(
        &self,
        view_type: &str,
        uri: &UriComponents,
        range: Option<CellRange>,
    ) -> Result<()>;

    async fn cancel_cells(
        &self,
        view_type: &str,
        uri: &UriComponents,
        range: Option<CellRange>,
    ) -> Result<()>;
}

// ---------------------------------------------------------------------------
// Guest side
// ---------------------------------------------------------------------------

/// What the guest contributes to the workbench for one mirror.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirrorContribution {
    pub view_type: String,
    pub display_name: String,
    pub selector: Vec<Selector>,
    pub priority: Priority,
    /// Only this provider may open matching files.
    pub exclusive: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VisibleEditor {
    pub uri: UriComponents,
    pub view_type: String,
}

/// A single-cell edit pushed from the host.
#[derive(Debug, Clone, PartialEq)]
pub enum CellEdit {
    Metadata(CellMetadata),
    Outputs(Vec<CellOutput>),
}

#[async_trait]
pub trait GuestWorkbench: Send + Sync {
    fn register_content_provider(
        &self,
        contribution: MirrorContribution,
        provider: Arc<MirrorContentProvider>,
        kernel: Arc<MirrorKernel>,
    );

    fn unregister_content_provider(&self, view_type: &str);

    /// Show `uri` in an editor backed by the provider for `view_type`.
    async fn open_with(&self, uri: &UriComponents, view_type: &str) -> Result<()>;

    fn visible_editors(&self) -> Vec<VisibleEditor>;

    fn set_selection_decoration(&self, uri: &UriComponents, range: CellRange);

    /// Apply `edit` to cell `index` of the open document `uri`.
    /// Returns `false` when there is no such document or cell.
    fn apply_cell_edit(&self, uri: &UriComponents, index: usize, edit: CellEdit) -> bool;
}
