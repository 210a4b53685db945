//! Requests, notifications, and the frame envelope that carries them.
//!
//! Every message is decoded exhaustively at the channel boundary: an
//! unknown method or event name, or a payload of the wrong shape, fails
//! in [`Frame::decode`] and never reaches a handler.

use nbshare_common::{FriendlyId, MirrorError, UriComponents};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::types::{
    BackupContext, CellMetadata, CellOutput, CellRange, ContentOptions, OpenContext,
    ProviderDescriptor,
};

// ---------------------------------------------------------------------------
// Requests (guest → host)
// ---------------------------------------------------------------------------

/// Requests a guest sends to the host.
///
/// Parameters travel positionally, e.g.
/// `{"method":"open-notebook","params":["jupyter",{..uri..},{}]}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", content = "params", rename_all = "kebab-case")]
pub enum Request {
    GuestInitialize,
    /// `[viewType, uri, openContext]`
    OpenNotebook(String, UriComponents, OpenContext),
    /// `[viewType, uri]`
    SaveNotebook(String, UriComponents),
    /// `[viewType, target, source]`
    SaveNotebookAs(String, UriComponents, UriComponents),
    /// `[viewType, uri, backupContext]`
    BackupNotebook(String, UriComponents, BackupContext),
    /// `[viewType, backupId]`
    DeleteBackup(String, String),
    /// `[viewType, docUri, cellUri, cellIndex]`
    ExecuteCell(String, UriComponents, UriComponents, usize),
    /// `[viewType, docUri, cellUri, cellIndex]`
    CancelExecuteCell(String, UriComponents, UriComponents, usize),
    /// `[viewType, docUri]`
    ExecuteDocument(String, UriComponents),
    /// `[viewType, docUri]`
    CancelExecuteDocument(String, UriComponents),
}

impl Request {
    /// Wire name of the request.
    pub fn method(&self) -> &'static str {
        match self {
            Request::GuestInitialize => "guest-initialize",
            Request::OpenNotebook(..) => "open-notebook",
            Request::SaveNotebook(..) => "save-notebook",
            Request::SaveNotebookAs(..) => "save-notebook-as",
            Request::BackupNotebook(..) => "backup-notebook",
            Request::DeleteBackup(..) => "delete-backup",
            Request::ExecuteCell(..) => "execute-cell",
            Request::CancelExecuteCell(..) => "cancel-execute-cell",
            Request::ExecuteDocument(..) => "execute-document",
            Request::CancelExecuteDocument(..) => "cancel-execute-document",
        }
    }

    /// Whether the sender waits for a response.
    pub fn expects_reply(&self) -> bool {
        !matches!(
            self,
            Request::DeleteBackup(..)
                | Request::ExecuteCell(..)
                | Request::CancelExecuteCell(..)
                | Request::ExecuteDocument(..)
                | Request::CancelExecuteDocument(..)
        )
    }
}

// ---------------------------------------------------------------------------
// Notifications (host → guest)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveDocumentPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri_components: Option<UriComponents>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub view_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<ContentOptions>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectionPayload {
    pub uri_components: UriComponents,
    pub view_type: String,
    pub range: CellRange,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CellMetadataPayload {
    pub uri_components: UriComponents,
    pub cell_friendly_id: FriendlyId,
    pub metadata: CellMetadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CellOutputsEntry {
    pub friendly_id: FriendlyId,
    pub outputs: Vec<CellOutput>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CellOutputsPayload {
    pub uri_components: UriComponents,
    pub data: Vec<CellOutputsEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvidersPayload {
    pub providers: Vec<ProviderDescriptor>,
}

/// One-way messages the host broadcasts to every guest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload", rename_all = "kebab-case")]
pub enum Notification {
    ActiveDocumentChanged(ActiveDocumentPayload),
    ActiveSelectionChanged(SelectionPayload),
    CellMetadataChanged(CellMetadataPayload),
    CellOutputsChanged(CellOutputsPayload),
    ProvidersChanged(ProvidersPayload),
}

impl Notification {
    /// Wire name of the notification.
    pub fn event(&self) -> &'static str {
        match self {
            Notification::ActiveDocumentChanged(_) => "active-document-changed",
            Notification::ActiveSelectionChanged(_) => "active-selection-changed",
            Notification::CellMetadataChanged(_) => "cell-metadata-changed",
            Notification::CellOutputsChanged(_) => "cell-outputs-changed",
            Notification::ProvidersChanged(_) => "providers-changed",
        }
    }
}

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// Result of a request as carried back to the requester.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "value", rename_all = "snake_case")]
pub enum Outcome {
    Ok(Value),
    Error(String),
}

/// A single text frame on the shared channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Frame {
    /// `id` is absent for fire-and-forget requests; no response follows.
    Request {
        #[serde(default)]
        id: Option<u64>,
        request: Request,
    },
    Response {
        id: u64,
        outcome: Outcome,
    },
    Notify {
        notification: Notification,
    },
}

impl Frame {
    pub fn encode(&self) -> Result<String, MirrorError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(text: &str) -> Result<Self, MirrorError> {
        Ok(serde_json::from_str(text)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn uri(path: &str) -> UriComponents {
        UriComponents {
            scheme: "vsls".into(),
            path: path.into(),
            ..UriComponents::default()
        }
    }

    #[test]
    fn open_request_params_are_positional() {
        let frame = Frame::Request {
            id: Some(7),
            request: Request::OpenNotebook("jupyter".into(), uri("/a.ipynb"), OpenContext::default()),
        };
        let value: Value = serde_json::from_str(&frame.encode().unwrap()).unwrap();
        assert_eq!(value["kind"], "request");
        assert_eq!(value["id"], 7);
        assert_eq!(value["request"]["method"], "open-notebook");
        assert_eq!(value["request"]["params"][0], "jupyter");
        assert_eq!(value["request"]["params"][1]["path"], "/a.ipynb");
    }

    #[test]
    fn guest_initialize_has_no_params() {
        let text = r#"{"kind":"request","id":1,"request":{"method":"guest-initialize"}}"#;
        let frame = Frame::decode(text).unwrap();
        assert_eq!(
            frame,
            Frame::Request {
                id: Some(1),
                request: Request::GuestInitialize
            }
        );
    }

    #[test]
    fn fire_and_forget_request_decodes_without_id() {
        let text = json!({
            "kind": "request",
            "request": {
                "method": "execute-document",
                "params": ["jupyter", {"scheme": "vsls", "path": "/a.ipynb"}]
            }
        })
        .to_string();
        match Frame::decode(&text).unwrap() {
            Frame::Request { id: None, request } => {
                assert_eq!(request.method(), "execute-document");
                assert!(!request.expects_reply());
            }
            other => panic!("unexpected frame {other:?}"),
        }
    }

    #[test]
    fn notification_uses_event_and_payload() {
        let frame = Frame::Notify {
            notification: Notification::ActiveSelectionChanged(SelectionPayload {
                uri_components: uri("/a.ipynb"),
                view_type: "jupyter".into(),
                range: CellRange { start: 2, end: 3 },
            }),
        };
        let value: Value = serde_json::from_str(&frame.encode().unwrap()).unwrap();
        assert_eq!(value["notification"]["event"], "active-selection-changed");
        assert_eq!(value["notification"]["payload"]["viewType"], "jupyter");
        assert_eq!(value["notification"]["payload"]["range"]["start"], 2);
        assert_eq!(value["notification"]["payload"]["range"]["end"], 3);
    }

    #[test]
    fn empty_active_document_payload_decodes() {
        let text = r#"{"kind":"notify","notification":{"event":"active-document-changed","payload":{}}}"#;
        let frame = Frame::decode(text).unwrap();
        assert_eq!(
            frame,
            Frame::Notify {
                notification: Notification::ActiveDocumentChanged(ActiveDocumentPayload::default())
            }
        );
    }

    #[test]
    fn unknown_method_is_rejected_at_decode() {
        let text = r#"{"kind":"request","id":3,"request":{"method":"format-disk","params":[]}}"#;
        assert!(matches!(Frame::decode(text), Err(MirrorError::Decode(_))));
    }

    #[test]
    fn malformed_payload_is_rejected_at_decode() {
        // cellIndex must be a number
        let text = json!({
            "kind": "request",
            "request": {
                "method": "execute-cell",
                "params": ["jupyter", {"path": "/a"}, {"path": "/a"}, "three"]
            }
        })
        .to_string();
        assert!(matches!(Frame::decode(&text), Err(MirrorError::Decode(_))));

        let text = r#"{"kind":"notify","notification":{"event":"cell-outputs-changed","payload":{"data":[]}}}"#;
        assert!(matches!(Frame::decode(text), Err(MirrorError::Decode(_))));
    }

    #[test]
    fn error_outcome_round_trips() {
        let frame = Frame::Response {
            id: 9,
            outcome: Outcome::Error("no such document".into()),
        };
        let decoded = Frame::decode(&frame.encode().unwrap()).unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn request_wire_names_match_serde_tags() {
        let requests = [
            Request::GuestInitialize,
            Request::SaveNotebook("v".into(), uri("/a")),
            Request::SaveNotebookAs("v".into(), uri("/b"), uri("/a")),
            Request::DeleteBackup("v".into(), "bk-1".into()),
            Request::CancelExecuteCell("v".into(), uri("/a"), uri("/a"), 0),
            Request::CancelExecuteDocument("v".into(), uri("/a")),
        ];
        for request in requests {
            let value = serde_json::to_value(&request).unwrap();
            assert_eq!(value["method"], request.method());
        }
    }
}
