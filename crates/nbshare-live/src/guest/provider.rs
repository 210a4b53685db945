//! Content provider backing a mirror view type on the guest.

use std::sync::Arc;

use nbshare_common::{MirrorError, Result, UriComponents, UriMapper};
use tokio::sync::watch;
use tracing::debug;

use super::identity::MirrorDocuments;
use crate::channel::SharedServiceProxy;
use crate::protocol::{BackupContext, BackupInfo, ContentOptions, NotebookSnapshot, OpenContext, Request};

/// Serves documents of one mirror view type by forwarding every operation
/// to the host's provider for the original view type.
pub struct MirrorContentProvider {
    view_type: String,
    mirror_view_type: String,
    proxy: SharedServiceProxy,
    mapper: Arc<dyn UriMapper>,
    documents: Arc<MirrorDocuments>,
    options: watch::Sender<ContentOptions>,
}

impl MirrorContentProvider {
    pub fn new(
        view_type: impl Into<String>,
        mirror_view_type: impl Into<String>,
        proxy: SharedServiceProxy,
        mapper: Arc<dyn UriMapper>,
        documents: Arc<MirrorDocuments>,
    ) -> Self {
        let (options, _) = watch::channel(ContentOptions::default());
        Self {
            view_type: view_type.into(),
            mirror_view_type: mirror_view_type.into(),
            proxy,
            mapper,
            documents,
            options,
        }
    }

    /// The host view type this mirror stands in for.
    pub fn view_type(&self) -> &str {
        &self.view_type
    }

    pub fn mirror_view_type(&self) -> &str {
        &self.mirror_view_type
    }

    /// Fetch the document from the host and start tracking its cells.
    pub async fn open(&self, uri: &UriComponents, context: OpenContext) -> Result<NotebookSnapshot> {
        let shared = self.mapper.to_shared(uri);
        let value = self
            .proxy
            .request(Request::OpenNotebook(self.view_type.clone(), shared, context))
            .await?;

        if value.is_null() {
            return Err(MirrorError::LoadFailure(format!(
                "host returned no document for {uri}"
            )));
        }

        let snapshot: NotebookSnapshot = serde_json::from_value(value)?;
        self.documents.record(uri, &snapshot);
        debug!(
            view_type = %self.mirror_view_type,
            %uri,
            cells = snapshot.cells.len(),
            "Opened mirror document"
        );
        Ok(snapshot)
    }

    /// Nothing to do: the host already resolved the document when it opened it.
    pub fn resolve(&self, uri: &UriComponents) {
        debug!(view_type = %self.mirror_view_type, %uri, "Resolve");
    }

    pub async fn save(&self, uri: &UriComponents) -> Result<()> {
        let shared = self.mapper.to_shared(uri);
        self.proxy
            .request(Request::SaveNotebook(self.view_type.clone(), shared))
            .await?;
        Ok(())
    }

    pub async fn save_as(&self, target: &UriComponents, source: &UriComponents) -> Result<()> {
        let target = self.mapper.to_shared(target);
        let source = self.mapper.to_shared(source);
        self.proxy
            .request(Request::SaveNotebookAs(self.view_type.clone(), target, source))
            .await?;
        Ok(())
    }

    pub async fn backup(&self, uri: &UriComponents, context: BackupContext) -> Result<BackupHandle> {
        let shared = self.mapper.to_shared(uri);
        let context = BackupContext {
            destination: self.mapper.to_shared(&context.destination),
        };
        let info: BackupInfo = self
            .proxy
            .request_as(Request::BackupNotebook(self.view_type.clone(), shared, context))
            .await?;
        Ok(BackupHandle {
            id: info.id,
            view_type: self.view_type.clone(),
            proxy: self.proxy.clone(),
        })
    }

    pub fn options(&self) -> ContentOptions {
        self.options.borrow().clone()
    }

    pub fn subscribe_options(&self) -> watch::Receiver<ContentOptions> {
        self.options.subscribe()
    }

    /// Returns `true` (and wakes subscribers) only if the options differ.
    pub fn set_options(&self, options: ContentOptions) -> bool {
        self.options.send_if_modified(|current| {
            if *current == options {
                return false;
            }
            *current = options;
            true
        })
    }

    /// Record a structural edit made locally to an open mirror.
    pub fn cells_changed(&self, uri: &UriComponents, start: usize, delete_count: usize, inserted: usize) {
        self.documents.splice(uri, start, delete_count, inserted);
    }

    /// Record a local drag of one cell from `from` to `to`.
    pub fn cell_moved(&self, uri: &UriComponents, from: usize, to: usize) {
        self.documents.move_cell(uri, from, to);
    }

    pub fn close_document(&self, uri: &UriComponents) {
        self.documents.remove(uri);
    }
}

/// A backup the host holds on the guest's behalf.
pub struct BackupHandle {
    id: String,
    view_type: String,
    proxy: SharedServiceProxy,
}

impl BackupHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Ask the host to discard the backup. Best effort; nothing is awaited.
    pub fn delete(self) {
        if let Err(e) = self
            .proxy
            .send_detached(Request::DeleteBackup(self.view_type, self.id))
        {
            debug!(error = %e, "Backup delete not sent");
        }
    }
}

impl std::fmt::Debug for BackupHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackupHandle")
            .field("id", &self.id)
            .field("view_type", &self.view_type)
            .finish()
    }
}
