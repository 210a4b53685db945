//! Applies host notifications to the guest workbench.

use nbshare_common::{MirrorError, Result};
use tracing::debug;

use super::controller::GuestState;
use crate::protocol::{
    ActiveDocumentPayload, CellMetadataPayload, CellOutputsPayload, Notification,
    ProvidersPayload, SelectionPayload,
};
use crate::workbench::CellEdit;

/// Apply one notification.
///
/// Notifications that name a document or cell the guest does not have
/// come back as [`MirrorError::DroppedNotification`]; callers ignore those.
pub(crate) async fn apply(state: &GuestState, notification: Notification) -> Result<()> {
    match notification {
        Notification::ActiveDocumentChanged(payload) => active_document(state, payload).await,
        Notification::ActiveSelectionChanged(payload) => selection(state, payload),
        Notification::CellMetadataChanged(payload) => cell_metadata(state, payload),
        Notification::CellOutputsChanged(payload) => cell_outputs(state, payload),
        Notification::ProvidersChanged(payload) => providers(state, payload),
    }
}

async fn active_document(state: &GuestState, payload: ActiveDocumentPayload) -> Result<()> {
    let (Some(shared), Some(view_type)) = (payload.uri_components, payload.view_type) else {
        debug!("Host has no active notebook");
        return Ok(());
    };

    let uri = state.mapper.to_local(&shared)?;
    let provider = match state.mirror(&view_type) {
        Some(provider) => provider,
        None => state.register_lazy_mirror(&view_type, &uri),
    };
    if let Some(options) = payload.options {
        provider.set_options(options);
    }

    state
        .workbench
        .open_with(&uri, provider.mirror_view_type())
        .await
}

fn selection(state: &GuestState, payload: SelectionPayload) -> Result<()> {
    let uri = state.mapper.to_local(&payload.uri_components)?;
    let visible = state
        .workbench
        .visible_editors()
        .into_iter()
        .any(|editor| editor.uri == uri);

    if visible {
        state.workbench.set_selection_decoration(&uri, payload.range);
    }
    Ok(())
}

fn cell_metadata(state: &GuestState, payload: CellMetadataPayload) -> Result<()> {
    let uri = state.mapper.to_local(&payload.uri_components)?;
    let index = state
        .documents
        .index_of(&uri, &payload.cell_friendly_id)
        .ok_or_else(|| MirrorError::DroppedNotification(format!("no cell {}", payload.cell_friendly_id)))?;

    if state
        .workbench
        .apply_cell_edit(&uri, index, CellEdit::Metadata(payload.metadata))
    {
        Ok(())
    } else {
        Err(MirrorError::DroppedNotification(format!("{uri} is not open")))
    }
}

fn cell_outputs(state: &GuestState, payload: CellOutputsPayload) -> Result<()> {
    let uri = state.mapper.to_local(&payload.uri_components)?;
    let mut applied = 0;
    for entry in payload.data {
        let Some(index) = state.documents.index_of(&uri, &entry.friendly_id) else {
            continue;
        };
        if state
            .workbench
            .apply_cell_edit(&uri, index, CellEdit::Outputs(entry.outputs))
        {
            applied += 1;
        }
    }

    if applied == 0 {
        return Err(MirrorError::DroppedNotification(format!(
            "no matching cells in {uri}"
        )));
    }
    Ok(())
}

fn providers(state: &GuestState, payload: ProvidersPayload) -> Result<()> {
    let added = payload
        .providers
        .iter()
        .filter(|descriptor| state.register_mirror(descriptor))
        .count();
    debug!(added, "Providers changed");
    Ok(())
}
