//! Session lifecycle: the collaboration service and the controller swap.

mod api;
mod local;
mod manager;

pub use api::CollaborationApi;
pub use local::{LocalCollaboration, LocalRegistry};
pub use manager::{Controller, SessionManager};
