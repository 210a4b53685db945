//! Wire protocol for the shared notebook service.
//!
//! Guests talk to the host with [`Request`]s and get a JSON value back;
//! the host pushes [`Notification`]s to every guest without waiting for
//! an acknowledgment. Both ride inside a [`Frame`].

mod messages;
mod types;

pub use messages::{
    ActiveDocumentPayload, CellMetadataPayload, CellOutputsEntry, CellOutputsPayload, Frame,
    Notification, Outcome, ProvidersPayload, Request, SelectionPayload,
};
pub use types::{
    BackupContext, BackupInfo, CellKind, CellMetadata, CellOutput, CellRange, CellSnapshot,
    ContentOptions, NotebookMetadata, NotebookSnapshot, OpenContext, OutputItem, Priority,
    ProviderDescriptor, Selector,
};
