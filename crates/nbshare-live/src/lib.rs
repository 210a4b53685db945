//! Live notebook mirroring between a collaboration host and its guests.
//!
//! The host shares a request/notify service through a [`CollaborationApi`];
//! each guest registers a mirror content provider per host provider and
//! keeps its mirrors in step with the host's editors.

pub mod channel;
pub mod guest;
pub mod host;
pub mod protocol;
pub mod relay;
pub mod session;
pub mod workbench;

#[cfg(test)]
mod tests;

pub use channel::{ChannelSettings, Endpoint, SharedService, SharedServiceProxy};
pub use guest::{GuestController, MirrorContentProvider, MirrorKernel};
pub use host::HostController;
pub use protocol::{Frame, Notification, NotebookSnapshot, ProviderDescriptor, Request};
pub use relay::RelayCollaboration;
pub use session::{CollaborationApi, LocalCollaboration, LocalRegistry, SessionManager};
pub use workbench::{GuestWorkbench, HostWorkbench, MemoryWorkbench};
