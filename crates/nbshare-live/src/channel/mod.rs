//! Request/notify plumbing between host and guests.

pub mod endpoint;
pub mod peer;
pub mod service;

pub use endpoint::{ChannelSettings, Endpoint};
pub use peer::{Inbound, PeerChannel};
pub use service::{RequestHandler, SharedService, SharedServiceProxy};
