//! Raw text-frame endpoints.

use nbshare_config::NbshareConfig;
use std::time::Duration;
use tokio::sync::mpsc;

/// One side of a bidirectional text-frame pipe.
///
/// An endpoint does not know what the frames mean; the in-process pair,
/// the WebSocket relay bridge, and anything else that can move strings
/// around all produce one.
#[derive(Debug)]
pub struct Endpoint {
    pub(crate) tx: mpsc::Sender<String>,
    pub(crate) rx: mpsc::Receiver<String>,
}

impl Endpoint {
    pub fn new(tx: mpsc::Sender<String>, rx: mpsc::Receiver<String>) -> Self {
        Self { tx, rx }
    }

    /// Two endpoints wired to each other.
    pub fn pair(capacity: usize) -> (Endpoint, Endpoint) {
        let (a_tx, b_rx) = mpsc::channel(capacity);
        let (b_tx, a_rx) = mpsc::channel(capacity);
        (Endpoint::new(a_tx, a_rx), Endpoint::new(b_tx, b_rx))
    }
}

/// Buffer and timeout settings for peer channels.
#[derive(Debug, Clone, Copy)]
pub struct ChannelSettings {
    pub capacity: usize,
    pub request_timeout: Duration,
}

impl ChannelSettings {
    pub fn from_config(config: &NbshareConfig) -> Self {
        Self {
            capacity: config.channel.capacity as usize,
            request_timeout: config.session.request_timeout(),
        }
    }
}

impl Default for ChannelSettings {
    fn default() -> Self {
        Self::from_config(&NbshareConfig::default())
    }
}
