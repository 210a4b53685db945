//! Index ↔ friendly-id tables for mirrored documents.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use nbshare_common::{FriendlyId, UriComponents};

use crate::protocol::NotebookSnapshot;

/// Friendly ids of a mirrored document's cells, by position.
///
/// Built from the snapshot the host sent when the mirror was opened.
/// Cells inserted locally afterwards have no id until the document is
/// opened again.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdentityTable {
    ids: Vec<Option<FriendlyId>>,
}

impl IdentityTable {
    /// Ids that occur on more than one cell are dropped for all of them.
    pub fn from_snapshot(snapshot: &NotebookSnapshot, key: &str) -> Self {
        let ids: Vec<Option<FriendlyId>> = snapshot
            .cells
            .iter()
            .map(|cell| cell.metadata.friendly_id(key))
            .collect();

        let mut seen = HashSet::new();
        let mut duplicated = HashSet::new();
        for id in ids.iter().flatten() {
            if !seen.insert(id.clone()) {
                duplicated.insert(id.clone());
            }
        }

        let ids = ids
            .into_iter()
            .map(|id| id.filter(|id| !duplicated.contains(id)))
            .collect();
        Self { ids }
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn index_of(&self, id: &FriendlyId) -> Option<usize> {
        self.ids.iter().position(|slot| slot.as_ref() == Some(id))
    }

    pub fn id_at(&self, index: usize) -> Option<&FriendlyId> {
        self.ids.get(index).and_then(Option::as_ref)
    }

    /// Replace `delete_count` cells at `start` with `inserted` unidentified cells.
    pub fn splice(&mut self, start: usize, delete_count: usize, inserted: usize) {
        let start = start.min(self.ids.len());
        let end = start.saturating_add(delete_count).min(self.ids.len());
        self.ids
            .splice(start..end, std::iter::repeat(None).take(inserted));
    }

    pub fn move_cell(&mut self, from: usize, to: usize) {
        if from >= self.ids.len() {
            return;
        }
        let id = self.ids.remove(from);
        let to = to.min(self.ids.len());
        self.ids.insert(to, id);
    }
}

/// Identity tables of every mirror the guest has open, by guest-local URI.
pub struct MirrorDocuments {
    key: String,
    tables: Mutex<HashMap<UriComponents, IdentityTable>>,
}

impl MirrorDocuments {
    pub fn new(friendly_id_key: impl Into<String>) -> Self {
        Self {
            key: friendly_id_key.into(),
            tables: Mutex::new(HashMap::new()),
        }
    }

    fn tables(&self) -> MutexGuard<'_, HashMap<UriComponents, IdentityTable>> {
        self.tables.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn record(&self, uri: &UriComponents, snapshot: &NotebookSnapshot) {
        let table = IdentityTable::from_snapshot(snapshot, &self.key);
        self.tables().insert(uri.clone(), table);
    }

    pub fn index_of(&self, uri: &UriComponents, id: &FriendlyId) -> Option<usize> {
        self.tables().get(uri)?.index_of(id)
    }

    /// Returns `false` when `uri` is not a recorded mirror.
    pub fn splice(
        &self,
        uri: &UriComponents,
        start: usize,
        delete_count: usize,
        inserted: usize,
    ) -> bool {
        match self.tables().get_mut(uri) {
            Some(table) => {
                table.splice(start, delete_count, inserted);
                true
            }
            None => false,
        }
    }

    /// Returns `false` when `uri` is not a recorded mirror.
    pub fn move_cell(&self, uri: &UriComponents, from: usize, to: usize) -> bool {
        match self.tables().get_mut(uri) {
            Some(table) => {
                table.move_cell(from, to);
                true
            }
            None => false,
        }
    }

    pub fn remove(&self, uri: &UriComponents) {
        self.tables().remove(uri);
    }

    pub fn contains(&self, uri: &UriComponents) -> bool {
        self.tables().contains_key(uri)
    }

    pub fn clear(&self) {
        self.tables().clear();
    }
}
