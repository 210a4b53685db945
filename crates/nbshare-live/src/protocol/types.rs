//! Notebook transfer types shared by host and guest.

use std::collections::BTreeMap;

use nbshare_common::{FriendlyId, UriComponents};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ---------------------------------------------------------------------------
// Providers
// ---------------------------------------------------------------------------

/// Whether a provider is picked automatically for matching files.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Offered through "open with" only.
    Option,
    #[default]
    Default,
}

/// A file-name pattern a provider claims.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Selector {
    pub filename_pattern: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exclude_filename_pattern: Option<String>,
}

impl Selector {
    pub fn new(filename_pattern: impl Into<String>) -> Self {
        Self {
            filename_pattern: filename_pattern.into(),
            exclude_filename_pattern: None,
        }
    }
}

/// A notebook content provider registered on the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderDescriptor {
    pub view_type: String,
    pub display_name: String,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub selector: Vec<Selector>,
}

// ---------------------------------------------------------------------------
// Cells & documents
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CellKind {
    Markdown,
    Code,
}

/// One rendered representation of an output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputItem {
    pub mime: String,
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellOutput {
    #[serde(default)]
    pub id: String,
    pub items: Vec<OutputItem>,
}

impl CellOutput {
    pub fn text(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            items: vec![OutputItem {
                mime: "text/plain".into(),
                value: Value::String(text.into()),
            }],
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CellMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub editable: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_order: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_state: Option<String>,
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub custom: Map<String, Value>,
}

impl CellMetadata {
    /// Read the friendly id stored under `custom[key]`.
    pub fn friendly_id(&self, key: &str) -> Option<FriendlyId> {
        self.custom
            .get(key)
            .and_then(Value::as_str)
            .map(FriendlyId::from)
    }

    /// Copy of the metadata with `custom[key]` set to `id`.
    pub fn with_friendly_id(mut self, key: &str, id: &FriendlyId) -> Self {
        self.custom
            .insert(key.to_string(), Value::String(id.as_str().to_string()));
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NotebookMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub editable: Option<bool>,
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub custom: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellSnapshot {
    pub kind: CellKind,
    pub language: String,
    #[serde(default)]
    pub metadata: CellMetadata,
    #[serde(default)]
    pub outputs: Vec<CellOutput>,
    pub source: String,
}

/// Point-in-time transfer form of a notebook document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NotebookSnapshot {
    #[serde(default)]
    pub languages: Vec<String>,
    #[serde(default)]
    pub metadata: NotebookMetadata,
    pub cells: Vec<CellSnapshot>,
}

// ---------------------------------------------------------------------------
// Provider options & request contexts
// ---------------------------------------------------------------------------

/// Which parts of a document are excluded from round-trips.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ContentOptions {
    pub transient_outputs: bool,
    pub transient_metadata: BTreeMap<String, bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OpenContext {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backup_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupContext {
    pub destination: UriComponents,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupInfo {
    pub id: String,
}

/// Half-open range of cell indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellRange {
    pub start: usize,
    pub end: usize,
}

impl CellRange {
    /// Range covering just `index`. Saturates at `usize::MAX`; use
    /// [`CellRange::checked`] for indices that arrive off the wire.
    pub fn single(index: usize) -> Self {
        Self {
            start: index,
            end: index.saturating_add(1),
        }
    }

    pub fn checked(index: usize) -> Option<Self> {
        Some(Self {
            start: index,
            end: index.checked_add(1)?,
        })
    }

    pub fn contains(&self, index: usize) -> bool {
        index >= self.start && index < self.end
    }
}
