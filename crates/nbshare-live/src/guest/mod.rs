//! Guest side: mirror providers and kernels that forward to the host.

mod controller;
mod identity;
mod kernel;
mod provider;
mod relay;

pub use controller::GuestController;
pub use identity::{IdentityTable, MirrorDocuments};
pub use kernel::MirrorKernel;
pub use provider::{BackupHandle, MirrorContentProvider};
