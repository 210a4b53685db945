//! Host ↔ guest scenarios over an in-process collaboration session.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;

use nbshare_common::{Event, EventBus, FriendlyId, MirrorError, PrefixUriMapper, Role, UriComponents};
use nbshare_config::NbshareConfig;

use crate::channel::ChannelSettings;
use crate::guest::GuestController;
use crate::host::HostController;
use crate::protocol::{
    BackupContext, BackupInfo, CellKind, CellMetadata, CellOutput, CellOutputsEntry, CellOutputsPayload,
    CellRange, CellSnapshot, ContentOptions, Notification, NotebookSnapshot, OpenContext,
    Priority, ProviderDescriptor, Request, Selector,
};
use crate::session::{CollaborationApi, LocalCollaboration, LocalRegistry, SessionManager};
use crate::workbench::{
    EditorState, Execution, HostDocument, HostWorkbench, MemoryWorkbench, WorkbenchEvent,
};

const JUPYTER: &str = "jupyter";

fn descriptor(view_type: &str, pattern: &str) -> ProviderDescriptor {
    ProviderDescriptor {
        view_type: view_type.into(),
        display_name: format!("{view_type} notebooks"),
        priority: Priority::Default,
        selector: vec![Selector::new(pattern)],
    }
}

fn notebook(sources: &[&str]) -> NotebookSnapshot {
    NotebookSnapshot {
        languages: vec!["python".into()],
        cells: sources
            .iter()
            .enumerate()
            .map(|(n, source)| CellSnapshot {
                kind: if n == 0 { CellKind::Markdown } else { CellKind::Code },
                language: if n == 0 { "markdown".into() } else { "python".into() },
                metadata: CellMetadata::default(),
                outputs: Vec::new(),
                source: source.to_string(),
            })
            .collect(),
        ..NotebookSnapshot::default()
    }
}

fn host_uri(path: &str) -> UriComponents {
    UriComponents::file(&format!("/work{path}"))
}

fn guest_uri(path: &str) -> UriComponents {
    format!("vsls:{path}").parse().unwrap()
}

fn editor(path: &str, view_type: &str, selection: Option<usize>) -> EditorState {
    EditorState {
        uri: host_uri(path),
        view_type: view_type.into(),
        selection,
    }
}

fn test_config() -> NbshareConfig {
    let mut config = NbshareConfig::default();
    config.session.request_timeout_ms = 5_000;
    config.session.guest_retry_attempts = 0;
    config
}

async fn eventually(what: &str, check: impl Fn() -> bool) {
    for _ in 0..300 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

struct Harness {
    host_wb: Arc<MemoryWorkbench>,
    guest_wb: Arc<MemoryWorkbench>,
    host_api: Arc<LocalCollaboration>,
    guest_api: Arc<LocalCollaboration>,
    host: SessionManager,
    guest: SessionManager,
    guest_events: EventBus,
}

impl Harness {
    fn new(config: &NbshareConfig, providers: Vec<ProviderDescriptor>) -> Self {
        let registry = LocalRegistry::new();
        let settings = ChannelSettings::from_config(config);
        let host_api = Arc::new(LocalCollaboration::with_mapper(
            registry.clone(),
            settings,
            Arc::new(PrefixUriMapper::new("/work", "vsls")),
        ));
        let guest_api = Arc::new(LocalCollaboration::new(registry, settings));

        let host_wb = Arc::new(MemoryWorkbench::new());
        for provider in providers {
            host_wb.add_provider(provider);
        }
        let guest_wb = Arc::new(MemoryWorkbench::new());
        let guest_events = EventBus::new(64);

        let host = SessionManager::new(
            config.clone(),
            host_wb.clone(),
            host_wb.clone(),
            EventBus::new(64),
        );
        let guest = SessionManager::new(
            config.clone(),
            guest_wb.clone(),
            guest_wb.clone(),
            guest_events.clone(),
        );

        Self {
            host_wb,
            guest_wb,
            host_api,
            guest_api,
            host,
            guest,
            guest_events,
        }
    }

    /// Host and guest both in a session, host first.
    async fn started(providers: Vec<ProviderDescriptor>) -> Self {
        let mut harness = Self::new(&test_config(), providers);
        harness.host_api.start_session(Role::Host);
        harness.guest_api.start_session(Role::Guest);
        let host_api: Arc<dyn CollaborationApi> = harness.host_api.clone();
        let guest_api: Arc<dyn CollaborationApi> = harness.guest_api.clone();
        assert!(harness.host.initialize(Some(host_api)).await.unwrap());
        assert!(harness.guest.initialize(Some(guest_api)).await.unwrap());
        harness
    }

    /// Host opens `path` in the active editor; wait for the guest mirror.
    async fn show(&self, path: &str, snapshot: NotebookSnapshot, selection: Option<usize>) {
        self.host_wb.add_document(JUPYTER, &host_uri(path), snapshot);
        self.host_wb
            .set_active_editor(Some(editor(path, JUPYTER, selection)));
        let uri = guest_uri(path);
        eventually("guest mirror to open", || {
            self.guest_wb.visible_document(&uri).is_some()
        })
        .await;
    }
}

// ---------------------------------------------------------------------------
// Provider exchange
// ---------------------------------------------------------------------------

#[tokio::test]
async fn one_mirror_per_host_provider() {
    let harness = Harness::started(vec![
        descriptor(JUPYTER, "*.ipynb"),
        descriptor("markdown-nb", "*.md"),
    ])
    .await;

    assert_eq!(
        harness.guest_wb.registered_view_types(),
        vec!["mirror-jupyter", "mirror-markdown-nb"]
    );
    assert_eq!(
        harness.guest.mirrored_view_types().await,
        vec![JUPYTER, "markdown-nb"]
    );

    let contribution = harness.guest_wb.contribution("mirror-jupyter").unwrap();
    assert_eq!(contribution.display_name, "jupyter notebooks");
    assert_eq!(contribution.selector, vec![Selector::new("*.ipynb")]);
    assert!(!contribution.exclusive);
}

#[tokio::test]
async fn list_providers_is_stable() {
    let harness = Harness::started(vec![descriptor(JUPYTER, "*.ipynb")]).await;

    let first = harness.host.list_providers().await.unwrap();
    let second = harness.host.list_providers().await.unwrap();
    assert_eq!(first, second);
    assert_eq!(first, vec![descriptor(JUPYTER, "*.ipynb")]);
    assert!(harness.guest.list_providers().await.is_none());
}

#[tokio::test]
async fn providers_added_later_reach_guests() {
    let harness = Harness::started(vec![descriptor(JUPYTER, "*.ipynb")]).await;

    harness
        .host_wb
        .register_provider(descriptor("sql-nb", "*.sqlnb"));

    eventually("late provider to be mirrored", || {
        harness.guest_wb.contribution("mirror-sql-nb").is_some()
    })
    .await;
    assert_eq!(harness.host.list_providers().await.unwrap().len(), 2);
    assert_eq!(harness.guest_wb.registered_view_types().len(), 2);
}

#[tokio::test]
async fn mirror_registration_is_published() {
    let mut harness = Harness::new(&test_config(), vec![descriptor(JUPYTER, "*.ipynb")]);
    let mut events = harness.guest_events.subscribe();
    harness.host_api.start_session(Role::Host);
    harness.guest_api.start_session(Role::Guest);
    let host_api: Arc<dyn CollaborationApi> = harness.host_api.clone();
    let guest_api: Arc<dyn CollaborationApi> = harness.guest_api.clone();
    harness.host.initialize(Some(host_api)).await.unwrap();
    harness.guest.initialize(Some(guest_api)).await.unwrap();

    match events.recv().await.unwrap() {
        Event::MirrorRegistered {
            view_type,
            mirror_view_type,
        } => {
            assert_eq!(view_type, JUPYTER);
            assert_eq!(mirror_view_type, "mirror-jupyter");
        }
        other => panic!("unexpected event {other:?}"),
    }
    assert!(matches!(
        events.recv().await.unwrap(),
        Event::ControllerStarted(Role::Guest)
    ));
}

// ---------------------------------------------------------------------------
// Content provider
// ---------------------------------------------------------------------------

#[tokio::test]
async fn open_then_save_preserves_cells() {
    let harness = Harness::started(vec![descriptor(JUPYTER, "*.ipynb")]).await;
    let original = notebook(&["# Title", "x = 1", "print(x)"]);
    harness.show("/a.ipynb", original.clone(), None).await;

    let mirror = harness.guest_wb.visible_document(&guest_uri("/a.ipynb")).unwrap();
    assert_eq!(mirror.cells.len(), original.cells.len());
    for (mirrored, source) in mirror.cells.iter().zip(&original.cells) {
        assert_eq!(mirrored.kind, source.kind);
        assert_eq!(mirrored.source, source.source);
        assert!(mirrored.metadata.friendly_id("friendlyId").is_some());
    }

    let provider = harness.guest_wb.provider("mirror-jupyter").unwrap();
    provider.save(&guest_uri("/a.ipynb")).await.unwrap();
    provider
        .save_as(&guest_uri("/b.ipynb"), &guest_uri("/a.ipynb"))
        .await
        .unwrap();

    assert_eq!(
        harness.host_wb.saved(),
        vec![host_uri("/a.ipynb"), host_uri("/b.ipynb")]
    );
    let copy = harness.host_wb.document(&host_uri("/b.ipynb")).unwrap();
    assert_eq!(copy.to_snapshot(), original);
}

#[tokio::test]
async fn open_of_unknown_document_is_load_failure() {
    let harness = Harness::started(vec![descriptor(JUPYTER, "*.ipynb")]).await;
    let provider = harness.guest_wb.provider("mirror-jupyter").unwrap();

    let err = provider
        .open(&guest_uri("/missing.ipynb"), OpenContext::default())
        .await
        .unwrap_err();
    assert!(matches!(err, MirrorError::LoadFailure(_)));
}

#[tokio::test]
async fn save_errors_surface_to_the_guest() {
    let harness = Harness::started(vec![descriptor(JUPYTER, "*.ipynb")]).await;
    let provider = harness.guest_wb.provider("mirror-jupyter").unwrap();

    let err = provider.save(&guest_uri("/never-opened.ipynb")).await.unwrap_err();
    assert!(matches!(err, MirrorError::Remote(_)));
}

#[tokio::test]
async fn backups_are_created_and_deleted_on_the_host() {
    let harness = Harness::started(vec![descriptor(JUPYTER, "*.ipynb")]).await;
    harness.show("/a.ipynb", notebook(&["# a"]), None).await;
    let provider = harness.guest_wb.provider("mirror-jupyter").unwrap();

    let handle = provider
        .backup(
            &guest_uri("/a.ipynb"),
            BackupContext {
                destination: guest_uri("/.backup/a"),
            },
        )
        .await
        .unwrap();
    assert_eq!(harness.host_wb.backups(), vec![handle.id().to_string()]);

    handle.delete();
    eventually("backup to be deleted", || harness.host_wb.backups().is_empty()).await;
}

#[tokio::test]
async fn active_document_options_reach_the_mirror() {
    let harness = Harness::started(vec![descriptor(JUPYTER, "*.ipynb")]).await;
    let options = ContentOptions {
        transient_outputs: true,
        ..ContentOptions::default()
    };
    harness.host_wb.set_content_options(JUPYTER, options.clone());
    harness.show("/a.ipynb", notebook(&["# a"]), None).await;

    let provider = harness.guest_wb.provider("mirror-jupyter").unwrap();
    assert_eq!(provider.options(), options);
}

#[tokio::test]
async fn unannounced_view_type_gets_a_lazy_mirror() {
    let harness = Harness::started(vec![descriptor(JUPYTER, "*.ipynb")]).await;
    harness
        .host_wb
        .add_document("scratch", &host_uri("/notes.nb"), notebook(&["# n"]));
    harness
        .host_wb
        .set_active_editor(Some(editor("/notes.nb", "scratch", None)));

    let uri = guest_uri("/notes.nb");
    eventually("lazy mirror to open", || {
        harness.guest_wb.visible_document(&uri).is_some()
    })
    .await;

    let contribution = harness.guest_wb.contribution("mirror-scratch").unwrap();
    assert_eq!(contribution.display_name, "Live Share - scratch");
    assert_eq!(contribution.selector, vec![Selector::new("*.nb")]);
    assert!(contribution.exclusive);
}

// ---------------------------------------------------------------------------
// State relay
// ---------------------------------------------------------------------------

#[tokio::test]
async fn metadata_change_updates_exactly_that_cell() {
    let harness = Harness::started(vec![descriptor(JUPYTER, "*.ipynb")]).await;
    harness
        .show("/a.ipynb", notebook(&["# t", "a = 1", "b = 2"]), None)
        .await;
    let uri = guest_uri("/a.ipynb");

    let metadata = CellMetadata {
        execution_order: Some(7),
        ..CellMetadata::default()
    };
    assert!(harness
        .host_wb
        .set_cell_metadata(&host_uri("/a.ipynb"), 1, metadata));

    eventually("metadata to arrive", || {
        harness.guest_wb.visible_document(&uri).unwrap().cells[1]
            .metadata
            .execution_order
            == Some(7)
    })
    .await;

    let mirror = harness.guest_wb.visible_document(&uri).unwrap();
    assert_eq!(mirror.cells[0].metadata.execution_order, None);
    assert_eq!(mirror.cells[2].metadata.execution_order, None);
    let expected = FriendlyId::from_cell_uri("file:///work/a.ipynb#cell-1");
    assert_eq!(mirror.cells[1].metadata.friendly_id("friendlyId"), Some(expected));
}

#[tokio::test]
async fn outputs_follow_cells_across_local_inserts() {
    let harness = Harness::started(vec![descriptor(JUPYTER, "*.ipynb")]).await;
    harness
        .show("/a.ipynb", notebook(&["# t", "a = 1"]), None)
        .await;
    let uri = guest_uri("/a.ipynb");

    // A guest-side insert at the top shifts the host's cell 1 to index 2.
    assert!(harness
        .guest_wb
        .edit_cells(&uri, 0, 0, notebook(&["# inserted"]).cells));

    harness
        .host_wb
        .set_cell_outputs(&host_uri("/a.ipynb"), 1, vec![CellOutput::text("o", "1")]);

    eventually("outputs to arrive", || {
        !harness.guest_wb.visible_document(&uri).unwrap().cells[2]
            .outputs
            .is_empty()
    })
    .await;
    let mirror = harness.guest_wb.visible_document(&uri).unwrap();
    assert!(mirror.cells[0].outputs.is_empty());
    assert!(mirror.cells[1].outputs.is_empty());
}

#[tokio::test]
async fn outputs_follow_cells_across_local_moves() {
    let harness = Harness::started(vec![descriptor(JUPYTER, "*.ipynb")]).await;
    harness
        .show("/a.ipynb", notebook(&["# t", "a = 1", "b = 2"]), None)
        .await;
    let uri = guest_uri("/a.ipynb");

    // Drag the host's cell 1 to the bottom of the guest's mirror.
    assert!(harness.guest_wb.move_cell(&uri, 1, 2));
    assert!(!harness.guest_wb.move_cell(&uri, 9, 0));

    harness
        .host_wb
        .set_cell_outputs(&host_uri("/a.ipynb"), 1, vec![CellOutput::text("o", "moved")]);

    eventually("outputs to reach the moved cell", || {
        !harness.guest_wb.visible_document(&uri).unwrap().cells[2]
            .outputs
            .is_empty()
    })
    .await;
    let mirror = harness.guest_wb.visible_document(&uri).unwrap();
    assert_eq!(mirror.cells[2].source, "a = 1");
    assert!(mirror.cells[1].outputs.is_empty());
}

#[tokio::test]
async fn selection_decorates_the_visible_mirror() {
    let harness = Harness::started(vec![descriptor(JUPYTER, "*.ipynb")]).await;
    harness
        .show("/a.ipynb", notebook(&["# t", "a", "b", "c"]), Some(0))
        .await;
    let uri = guest_uri("/a.ipynb");
    eventually("initial selection", || {
        harness.guest_wb.decoration(&uri) == Some(CellRange::single(0))
    })
    .await;

    harness.host_wb.set_selection(&host_uri("/a.ipynb"), JUPYTER, 2);
    eventually("selection to move", || {
        harness.guest_wb.decoration(&uri) == Some(CellRange { start: 2, end: 3 })
    })
    .await;
}

#[tokio::test]
async fn selection_without_a_visible_mirror_is_ignored() {
    let harness = Harness::started(vec![descriptor(JUPYTER, "*.ipynb")]).await;
    harness.show("/a.ipynb", notebook(&["# t", "a", "b"]), None).await;
    let a = guest_uri("/a.ipynb");
    harness.guest_wb.close(&a);

    // Selection in an editor the host is not focused on is never relayed.
    harness.host_wb.add_document(JUPYTER, &host_uri("/side.ipynb"), notebook(&["# s"]));
    harness.host_wb.set_selection(&host_uri("/side.ipynb"), JUPYTER, 0);
    // The guest closed its mirror, so this one has nowhere to land.
    harness.host_wb.set_selection(&host_uri("/a.ipynb"), JUPYTER, 2);

    // Notifications apply in order: once the next document is open, the
    // selections above have been handled.
    harness.show("/b.ipynb", notebook(&["# b"]), None).await;
    assert_eq!(harness.guest_wb.decoration(&a), None);
    assert_eq!(harness.guest_wb.decoration(&guest_uri("/side.ipynb")), None);
}

#[tokio::test]
async fn unknown_friendly_id_is_dropped() {
    let config = test_config();
    let registry = LocalRegistry::new();
    let settings = ChannelSettings::from_config(&config);
    let host_api = Arc::new(LocalCollaboration::with_mapper(
        registry.clone(),
        settings,
        Arc::new(PrefixUriMapper::new("/work", "vsls")),
    ));
    let guest_api = Arc::new(LocalCollaboration::new(registry, settings));
    host_api.start_session(Role::Host);
    guest_api.start_session(Role::Guest);

    let host_wb = Arc::new(MemoryWorkbench::new());
    host_wb.add_provider(descriptor(JUPYTER, "*.ipynb"));
    host_wb.add_document(JUPYTER, &host_uri("/a.ipynb"), notebook(&["# t", "a", "b"]));
    let guest_wb = Arc::new(MemoryWorkbench::new());

    let mut host = HostController::new(host_api.clone(), host_wb.clone(), config.clone());
    assert!(host.initialize().await.unwrap());
    let mut guest = GuestController::new(guest_api.clone(), guest_wb.clone(), config, EventBus::new(8));
    assert!(guest.initialize().await.unwrap());

    host_wb.set_active_editor(Some(editor("/a.ipynb", JUPYTER, None)));
    let uri = guest_uri("/a.ipynb");
    eventually("mirror to open", || guest_wb.visible_document(&uri).is_some()).await;
    let before = guest_wb.visible_document(&uri).unwrap();

    let service = host.service().unwrap();
    service.notify(Notification::CellOutputsChanged(CellOutputsPayload {
        uri_components: uri.clone(),
        data: vec![CellOutputsEntry {
            friendly_id: FriendlyId::from("ffffffffffffffff"),
            outputs: vec![CellOutput::text("x", "should not land")],
        }],
    }))
    .await;
    // Same notification for a document the guest never opened.
    service.notify(Notification::CellOutputsChanged(CellOutputsPayload {
        uri_components: guest_uri("/elsewhere.ipynb"),
        data: vec![CellOutputsEntry {
            friendly_id: FriendlyId::from_cell_uri("file:///work/elsewhere.ipynb#cell-0"),
            outputs: vec![CellOutput::text("x", "nor this")],
        }],
    }))
    .await;

    // Barrier: a later valid change proves the earlier ones were processed.
    host_wb.set_cell_metadata(
        &host_uri("/a.ipynb"),
        0,
        CellMetadata {
            editable: Some(false),
            ..CellMetadata::default()
        },
    );
    eventually("barrier change", || {
        guest_wb.visible_document(&uri).unwrap().cells[0].metadata.editable == Some(false)
    })
    .await;

    let after = guest_wb.visible_document(&uri).unwrap();
    for (a, b) in after.cells.iter().zip(&before.cells) {
        assert_eq!(a.outputs, b.outputs);
    }
    assert!(guest_wb.visible_document(&guest_uri("/elsewhere.ipynb")).is_none());

    guest.dispose();
    host.dispose();
}

// ---------------------------------------------------------------------------
// Kernel
// ---------------------------------------------------------------------------

#[tokio::test]
async fn guest_execution_runs_on_the_host() {
    let harness = Harness::started(vec![descriptor(JUPYTER, "*.ipynb")]).await;
    harness.show("/a.ipynb", notebook(&["# t", "a", "b"]), None).await;
    let uri = guest_uri("/a.ipynb");

    harness.guest_wb.run_cell(&uri, 1).unwrap();
    harness.guest_wb.run_all(&uri).unwrap();

    eventually("executions on host", || harness.host_wb.executions().len() == 2).await;
    assert_eq!(
        harness.host_wb.executions(),
        vec![
            Execution {
                view_type: JUPYTER.into(),
                uri: host_uri("/a.ipynb"),
                range: Some(CellRange::single(1)),
                cancel: false,
            },
            Execution {
                view_type: JUPYTER.into(),
                uri: host_uri("/a.ipynb"),
                range: None,
                cancel: false,
            },
        ]
    );
}

#[tokio::test]
async fn out_of_range_cell_index_is_rejected() {
    let harness = Harness::started(vec![descriptor(JUPYTER, "*.ipynb")]).await;
    harness.show("/a.ipynb", notebook(&["# t", "a"]), None).await;
    let doc = guest_uri("/a.ipynb");

    let proxy = harness
        .guest_api
        .get_shared_service(&test_config().session.service_name)
        .await
        .unwrap()
        .unwrap();
    proxy
        .send_detached(Request::ExecuteCell(JUPYTER.into(), doc.clone(), doc.clone(), usize::MAX))
        .unwrap();
    let err = proxy
        .request(Request::CancelExecuteCell(JUPYTER.into(), doc.clone(), doc, usize::MAX))
        .await
        .unwrap_err();
    assert!(matches!(err, MirrorError::Remote(ref m) if m.contains("out of range")));

    // The host still answers this guest.
    let providers: Vec<ProviderDescriptor> =
        proxy.request_as(Request::GuestInitialize).await.unwrap();
    assert_eq!(providers.len(), 1);
    assert!(harness.host_wb.executions().is_empty());
}

#[tokio::test]
async fn foreign_shared_uri_is_rejected_by_the_host() {
    let harness = Harness::started(vec![descriptor(JUPYTER, "*.ipynb")]).await;
    let proxy = harness
        .guest_api
        .get_shared_service(&test_config().session.service_name)
        .await
        .unwrap()
        .unwrap();

    let outside: UriComponents = "vsls://elsewhere/a.ipynb".parse().unwrap();
    let err = proxy
        .request(Request::SaveNotebook(JUPYTER.into(), outside))
        .await
        .unwrap_err();
    assert!(matches!(err, MirrorError::Remote(ref m) if m.contains("not a shared workspace URI")));
    assert!(harness.host_wb.saved().is_empty());
}

// ---------------------------------------------------------------------------
// Back-pressure
// ---------------------------------------------------------------------------

/// Host workbench whose document loads take a while.
struct SlowOpen {
    inner: Arc<MemoryWorkbench>,
    delay: Duration,
}

#[async_trait]
impl HostWorkbench for SlowOpen {
    fn content_providers(&self) -> Vec<ProviderDescriptor> {
        self.inner.content_providers()
    }

    fn content_options(&self, view_type: &str) -> Option<ContentOptions> {
        self.inner.content_options(view_type)
    }

    fn subscribe(&self) -> broadcast::Receiver<WorkbenchEvent> {
        self.inner.subscribe()
    }

    fn active_editor(&self) -> Option<EditorState> {
        HostWorkbench::active_editor(self.inner.as_ref())
    }

    async fn open_document(
        &self,
        view_type: &str,
        uri: &UriComponents,
        context: &OpenContext,
    ) -> nbshare_common::Result<Option<HostDocument>> {
        tokio::time::sleep(self.delay).await;
        self.inner.open_document(view_type, uri, context).await
    }

    async fn save_document(&self, view_type: &str, uri: &UriComponents) -> nbshare_common::Result<()> {
        self.inner.save_document(view_type, uri).await
    }

    async fn save_document_as(
        &self,
        view_type: &str,
        target: &UriComponents,
        source: &UriComponents,
    ) -> nbshare_common::Result<()> {
        self.inner.save_document_as(view_type, target, source).await
    }

    async fn backup_document(
        &self,
        view_type: &str,
        uri: &UriComponents,
        context: &BackupContext,
    ) -> nbshare_common::Result<BackupInfo> {
        self.inner.backup_document(view_type, uri, context).await
    }

    async fn delete_backup(&self, view_type: &str, backup_id: &str) -> nbshare_common::Result<()> {
        self.inner.delete_backup(view_type, backup_id).await
    }

    async fn execute_cells(
        &self,
        view_type: &str,
        uri: &UriComponents,
        range: Option<CellRange>,
    ) -> nbshare_common::Result<()> {
        self.inner.execute_cells(view_type, uri, range).await
    }

    async fn cancel_cells(
        &self,
        view_type: &str,
        uri: &UriComponents,
        range: Option<CellRange>,
    ) -> nbshare_common::Result<()> {
        self.inner.cancel_cells(view_type, uri, range).await
    }
}

#[tokio::test]
async fn notification_burst_during_open_does_not_stall_the_guest() {
    let mut config = test_config();
    config.channel.capacity = 8;
    let registry = LocalRegistry::new();
    let settings = ChannelSettings::from_config(&config);
    let host_api = Arc::new(LocalCollaboration::with_mapper(
        registry.clone(),
        settings,
        Arc::new(PrefixUriMapper::new("/work", "vsls")),
    ));
    let guest_api = Arc::new(LocalCollaboration::new(registry, settings));
    host_api.start_session(Role::Host);
    guest_api.start_session(Role::Guest);

    let host_wb = Arc::new(MemoryWorkbench::new());
    host_wb.add_provider(descriptor(JUPYTER, "*.ipynb"));
    host_wb.add_document(JUPYTER, &host_uri("/a.ipynb"), notebook(&["# t", "a"]));
    let slow = Arc::new(SlowOpen {
        inner: host_wb.clone(),
        delay: Duration::from_millis(300),
    });
    let guest_wb = Arc::new(MemoryWorkbench::new());

    let mut host = HostController::new(host_api.clone(), slow, config.clone());
    assert!(host.initialize().await.unwrap());
    let mut guest = GuestController::new(guest_api.clone(), guest_wb.clone(), config, EventBus::new(8));
    assert!(guest.initialize().await.unwrap());

    // The guest starts opening the mirror and waits on the slow host.
    host_wb.set_active_editor(Some(editor("/a.ipynb", JUPYTER, None)));
    tokio::time::sleep(Duration::from_millis(50)).await;
    for n in 0..40 {
        host_wb.set_cell_outputs(
            &host_uri("/a.ipynb"),
            1,
            vec![CellOutput::text("o", &n.to_string())],
        );
    }

    let uri = guest_uri("/a.ipynb");
    eventually("mirror to open", || guest_wb.visible_document(&uri).is_some()).await;

    host_wb.set_cell_outputs(&host_uri("/a.ipynb"), 1, vec![CellOutput::text("o", "last")]);
    eventually("outputs after the burst", || {
        guest_wb.visible_document(&uri).unwrap().cells[1].outputs
            == vec![CellOutput::text("o", "last")]
    })
    .await;

    guest.dispose();
    host.dispose();
}

// ---------------------------------------------------------------------------
// Session lifecycle
// ---------------------------------------------------------------------------

#[tokio::test]
async fn no_collaboration_service_disables_the_feature() {
    let mut harness = Harness::new(&test_config(), Vec::new());
    assert!(!harness.guest.initialize(None).await.unwrap());
    assert_eq!(harness.guest.active_role().await, None);
}

#[tokio::test]
async fn guest_without_host_stays_inert() {
    let mut harness = Harness::new(&test_config(), vec![descriptor(JUPYTER, "*.ipynb")]);
    harness.guest_api.start_session(Role::Guest);
    let guest_api: Arc<dyn CollaborationApi> = harness.guest_api.clone();

    assert!(harness.guest.initialize(Some(guest_api)).await.unwrap());
    assert_eq!(harness.guest.active_role().await, Some(Role::Guest));
    assert!(harness.guest_wb.registered_view_types().is_empty());
}

#[tokio::test]
async fn guest_retries_until_the_host_shares() {
    let mut config = test_config();
    config.session.guest_retry_attempts = 10;
    config.session.guest_retry_delay_ms = 20;
    let mut harness = Harness::new(&config, vec![descriptor(JUPYTER, "*.ipynb")]);
    harness.host_api.start_session(Role::Host);
    harness.guest_api.start_session(Role::Guest);
    let host_api: Arc<dyn CollaborationApi> = harness.host_api.clone();
    let guest_api: Arc<dyn CollaborationApi> = harness.guest_api.clone();

    let Harness { host, guest, .. } = &mut harness;
    let (guest_started, host_started) = tokio::join!(guest.initialize(Some(guest_api)), async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        host.initialize(Some(host_api)).await
    });
    assert!(host_started.unwrap());
    assert!(guest_started.unwrap());
    assert_eq!(harness.guest_wb.registered_view_types(), vec!["mirror-jupyter"]);
}

#[tokio::test]
async fn session_end_disposes_controllers() {
    let harness = Harness::started(vec![descriptor(JUPYTER, "*.ipynb")]).await;
    assert_eq!(harness.host.active_role().await, Some(Role::Host));

    harness.guest_api.end_session();
    eventually("guest mirrors to be unregistered", || {
        harness.guest_wb.registered_view_types().is_empty()
    })
    .await;

    harness.host_api.end_session();
    for _ in 0..300 {
        if harness.host.active_role().await.is_none() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(harness.host.active_role().await, None);
}

#[tokio::test]
async fn reconnect_rebuilds_the_guest() {
    let harness = Harness::started(vec![descriptor(JUPYTER, "*.ipynb")]).await;
    let mut events = harness.guest_events.subscribe();

    assert!(harness.guest.reconnect().await.unwrap());
    assert_eq!(harness.guest_wb.registered_view_types(), vec!["mirror-jupyter"]);

    assert!(matches!(
        events.recv().await.unwrap(),
        Event::ControllerDisposed(Role::Guest)
    ));
    assert!(matches!(
        events.recv().await.unwrap(),
        Event::MirrorRegistered { .. }
    ));
    assert!(matches!(
        events.recv().await.unwrap(),
        Event::ControllerStarted(Role::Guest)
    ));

    // The rebuilt guest still mirrors the host.
    harness.show("/a.ipynb", notebook(&["# a"]), None).await;
}
