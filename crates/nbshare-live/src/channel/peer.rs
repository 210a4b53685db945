//! Request/notify channel over a text-frame endpoint.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use nbshare_common::{MirrorError, Result};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::endpoint::{ChannelSettings, Endpoint};
use crate::protocol::{Frame, Notification, Outcome, Request};

/// A message from the peer that is not a response to one of ours.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Request { id: Option<u64>, request: Request },
    Notification(Notification),
}

struct PeerInner {
    label: String,
    outbound: mpsc::Sender<String>,
    /// Requests awaiting a response, keyed by request id.
    pending: Mutex<HashMap<u64, oneshot::Sender<Outcome>>>,
    next_id: AtomicU64,
    timeout: Duration,
    cancel: CancellationToken,
}

impl PeerInner {
    fn pending(&self) -> MutexGuard<'_, HashMap<u64, oneshot::Sender<Outcome>>> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Drop every waiter; their receivers observe a closed channel.
    fn fail_pending(&self) {
        let dropped = self.pending().drain().count();
        if dropped > 0 {
            debug!(peer = %self.label, dropped, "Failed pending requests");
        }
    }
}

/// One logical connection to a peer.
///
/// Responses are matched to requests by id in a background reader task;
/// everything else the peer sends comes out of the [`Inbound`] receiver
/// returned by [`PeerChannel::spawn`], in arrival order. The inbound queue
/// is unbounded so a slow consumer never stops responses from being routed.
#[derive(Clone)]
pub struct PeerChannel {
    inner: Arc<PeerInner>,
}

impl PeerChannel {
    pub fn spawn(
        endpoint: Endpoint,
        settings: ChannelSettings,
        label: impl Into<String>,
    ) -> (Self, mpsc::UnboundedReceiver<Inbound>) {
        let Endpoint { tx, rx } = endpoint;
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let inner = Arc::new(PeerInner {
            label: label.into(),
            outbound: tx,
            pending: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            timeout: settings.request_timeout,
            cancel: CancellationToken::new(),
        });

        tokio::spawn(read_loop(Arc::clone(&inner), rx, inbound_tx));

        (Self { inner }, inbound_rx)
    }

    pub fn label(&self) -> &str {
        &self.inner.label
    }

    /// Send a request and wait for its response.
    pub async fn request(&self, request: Request) -> Result<Value> {
        let method = request.method();
        if self.is_closed() {
            return Err(MirrorError::TransportFailure(format!(
                "channel closed before {method}"
            )));
        }

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.inner.pending().insert(id, tx);

        // The reader may have shut down between the check above and the insert.
        if self.is_closed() {
            self.inner.pending().remove(&id);
            return Err(MirrorError::TransportFailure(format!(
                "channel closed before {method}"
            )));
        }

        let text = match (Frame::Request {
            id: Some(id),
            request,
        })
        .encode()
        {
            Ok(text) => text,
            Err(e) => {
                self.inner.pending().remove(&id);
                return Err(e);
            }
        };

        debug!(peer = %self.inner.label, id, method, "Sending request");
        if self.inner.outbound.send(text).await.is_err() {
            self.inner.pending().remove(&id);
            return Err(MirrorError::TransportFailure("peer disconnected".into()));
        }

        match tokio::time::timeout(self.inner.timeout, rx).await {
            Ok(Ok(Outcome::Ok(value))) => Ok(value),
            Ok(Ok(Outcome::Error(message))) => Err(MirrorError::Remote(message)),
            Ok(Err(_)) => Err(MirrorError::TransportFailure(format!(
                "channel closed while awaiting {method}"
            ))),
            Err(_) => {
                self.inner.pending().remove(&id);
                warn!(peer = %self.inner.label, id, method, "Request timed out");
                Err(MirrorError::Timeout(self.inner.timeout))
            }
        }
    }

    /// Send a request and decode its response.
    pub async fn request_as<T: DeserializeOwned>(&self, request: Request) -> Result<T> {
        let value = self.request(request).await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Send a request that gets no response.
    pub fn send_detached(&self, request: Request) -> Result<()> {
        debug!(peer = %self.inner.label, method = request.method(), "Sending detached request");
        self.post(Frame::Request { id: None, request })
    }

    /// Send a notification, waiting up to the request timeout for buffer
    /// space.
    pub async fn notify(&self, notification: Notification) -> Result<()> {
        if self.is_closed() {
            return Err(MirrorError::TransportFailure("channel closed".into()));
        }
        let text = Frame::Notify { notification }.encode()?;
        match tokio::time::timeout(self.inner.timeout, self.inner.outbound.send(text)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(MirrorError::TransportFailure("peer disconnected".into())),
            Err(_) => Err(MirrorError::Timeout(self.inner.timeout)),
        }
    }

    pub async fn respond(&self, id: u64, outcome: Outcome) -> Result<()> {
        let text = Frame::Response { id, outcome }.encode()?;
        self.inner
            .outbound
            .send(text)
            .await
            .map_err(|_| MirrorError::TransportFailure("peer disconnected".into()))
    }

    /// Stop reading and fail every pending request.
    pub fn close(&self) {
        self.inner.cancel.cancel();
        self.inner.fail_pending();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }

    /// Resolves once the channel is closed from either side.
    pub async fn closed(&self) {
        self.inner.cancel.cancelled().await;
    }

    /// Queue a frame without waiting for buffer space.
    fn post(&self, frame: Frame) -> Result<()> {
        if self.is_closed() {
            return Err(MirrorError::TransportFailure("channel closed".into()));
        }
        let text = frame.encode()?;
        self.inner.outbound.try_send(text).map_err(|e| match e {
            TrySendError::Full(_) => MirrorError::TransportFailure("outbound buffer full".into()),
            TrySendError::Closed(_) => MirrorError::TransportFailure("peer disconnected".into()),
        })
    }
}

async fn read_loop(
    inner: Arc<PeerInner>,
    mut rx: mpsc::Receiver<String>,
    inbound_tx: mpsc::UnboundedSender<Inbound>,
) {
    loop {
        let text = tokio::select! {
            _ = inner.cancel.cancelled() => break,
            text = rx.recv() => match text {
                Some(text) => text,
                None => break,
            },
        };

        let frame = match Frame::decode(&text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(peer = %inner.label, error = %e, "Rejected malformed frame");
                continue;
            }
        };

        match frame {
            Frame::Response { id, outcome } => {
                let waiter = inner.pending().remove(&id);
                match waiter {
                    Some(tx) => {
                        let _ = tx.send(outcome);
                    }
                    None => debug!(peer = %inner.label, id, "Response for unknown request"),
                }
            }
            Frame::Request { id, request } => {
                let _ = inbound_tx.send(Inbound::Request { id, request });
            }
            Frame::Notify { notification } => {
                let _ = inbound_tx.send(Inbound::Notification(notification));
            }
        }
    }

    inner.cancel.cancel();
    inner.fail_pending();
    debug!(peer = %inner.label, "Peer channel closed");
}
