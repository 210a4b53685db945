//! Relay-level wire protocol.
//!
//! A relay session has one host and any number of guests. Guests exchange
//! bare channel frames with the relay. The host sees every guest's frames
//! wrapped in [`RelayResponse::FromGuest`] and addresses its replies with
//! [`HostFrame::ToGuest`]; the relay never looks inside a channel frame.

use serde::{Deserialize, Serialize};

/// First message a client sends to identify itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RelayHello {
    HostHello { session: String },
    GuestHello { session: String },
}

impl RelayHello {
    pub fn session(&self) -> &str {
        match self {
            RelayHello::HostHello { session } | RelayHello::GuestHello { session } => session,
        }
    }
}

/// Messages the relay itself sends to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RelayResponse {
    SessionReady { session: String },
    /// To a guest: a host is serving the session.
    PeerConnected,
    /// To a guest: the host went away.
    PeerDisconnected,
    /// To the host: a guest joined and was given this number.
    GuestJoined { guest: u64 },
    GuestLeft { guest: u64 },
    /// To the host: one channel frame from `guest`.
    FromGuest { guest: u64, frame: String },
    Error { message: String },
}

/// What a host sends after its hello.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HostFrame {
    ToGuest { guest: u64, frame: String },
}

/// Error text the relay sends when a guest names an unknown session.
pub const SESSION_NOT_FOUND: &str = "session not found";
