//! Session transport over the WebSocket relay.

mod client;
pub mod wire;

pub use client::{connect, RelayCollaboration};
pub use wire::{HostFrame, RelayHello, RelayResponse, SESSION_NOT_FOUND};
