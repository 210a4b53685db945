//! The host's shared service and the guest's proxy to it.

use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use nbshare_common::{MirrorError, Result};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::endpoint::{ChannelSettings, Endpoint};
use super::peer::{Inbound, PeerChannel};
use crate::protocol::{Notification, Outcome, Request};

/// Answers guest requests on the host.
#[async_trait]
pub trait RequestHandler: Send + Sync {
    async fn handle(&self, request: Request) -> Result<Value>;
}

// ---------------------------------------------------------------------------
// Host side
// ---------------------------------------------------------------------------

struct ServiceInner {
    name: String,
    settings: ChannelSettings,
    guests: Mutex<Vec<PeerChannel>>,
    handler: RwLock<Option<Arc<dyn RequestHandler>>>,
    cancel: CancellationToken,
}

impl ServiceInner {
    fn handler(&self) -> Option<Arc<dyn RequestHandler>> {
        self.handler
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

/// A named service the host shares with every guest in the session.
///
/// Each attached guest gets its own [`PeerChannel`]; requests from one
/// guest are handled one at a time in arrival order.
#[derive(Clone)]
pub struct SharedService {
    inner: Arc<ServiceInner>,
}

impl SharedService {
    pub fn new(name: impl Into<String>, settings: ChannelSettings) -> Self {
        Self {
            inner: Arc::new(ServiceInner {
                name: name.into(),
                settings,
                guests: Mutex::new(Vec::new()),
                handler: RwLock::new(None),
                cancel: CancellationToken::new(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Install the handler for guest requests. Replaces any previous one.
    pub fn on_request(&self, handler: Arc<dyn RequestHandler>) {
        *self
            .inner
            .handler
            .write()
            .unwrap_or_else(|e| e.into_inner()) = Some(handler);
    }

    /// Start serving a newly connected guest.
    pub fn attach(&self, endpoint: Endpoint) -> PeerChannel {
        let mut guests = self.inner.guests.lock().unwrap_or_else(|e| e.into_inner());
        let label = format!("{}#guest{}", self.inner.name, guests.len() + 1);
        let (channel, inbound) = PeerChannel::spawn(endpoint, self.inner.settings, label);
        guests.push(channel.clone());
        drop(guests);

        info!(service = %self.inner.name, guest = channel.label(), "Guest attached");
        tokio::spawn(serve_guest(Arc::clone(&self.inner), channel.clone(), inbound));
        channel
    }

    /// Broadcast to every live guest. Returns how many guests it reached.
    pub async fn notify(&self, notification: Notification) -> usize {
        let guests: Vec<PeerChannel> = {
            let mut guests = self.inner.guests.lock().unwrap_or_else(|e| e.into_inner());
            guests.retain(|guest| !guest.is_closed());
            guests.clone()
        };

        let mut reached = 0;
        for guest in &guests {
            match guest.notify(notification.clone()).await {
                Ok(()) => reached += 1,
                Err(e) => {
                    warn!(guest = guest.label(), event = notification.event(), error = %e, "Notification not delivered");
                }
            }
        }
        reached
    }

    pub fn guest_count(&self) -> usize {
        let guests = self.inner.guests.lock().unwrap_or_else(|e| e.into_inner());
        guests.iter().filter(|guest| !guest.is_closed()).count()
    }

    /// Stop serving and disconnect every guest.
    pub fn close(&self) {
        self.inner.cancel.cancel();
        let guests: Vec<PeerChannel> = self
            .inner
            .guests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain(..)
            .collect();
        for guest in guests {
            guest.close();
        }
        info!(service = %self.inner.name, "Shared service closed");
    }

    pub fn is_closed(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }

    /// Resolves once [`SharedService::close`] has been called.
    pub async fn closed(&self) {
        self.inner.cancel.cancelled().await;
    }
}

async fn serve_guest(
    inner: Arc<ServiceInner>,
    channel: PeerChannel,
    mut inbound: mpsc::UnboundedReceiver<Inbound>,
) {
    loop {
        let message = tokio::select! {
            _ = inner.cancel.cancelled() => break,
            message = inbound.recv() => match message {
                Some(message) => message,
                None => break,
            },
        };

        match message {
            Inbound::Request { id, request } => {
                let method = request.method();
                let result = match inner.handler() {
                    Some(handler) => run_handler(handler, request).await,
                    None => Err(MirrorError::UnavailableHost),
                };

                let Some(id) = id else {
                    if let Err(e) = result {
                        debug!(guest = channel.label(), method, error = %e, "Detached request failed");
                    }
                    continue;
                };

                let outcome = match result {
                    Ok(value) => Outcome::Ok(value),
                    Err(e) => {
                        debug!(guest = channel.label(), method, error = %e, "Request failed");
                        Outcome::Error(e.to_string())
                    }
                };
                if channel.respond(id, outcome).await.is_err() {
                    break;
                }
            }
            Inbound::Notification(notification) => {
                warn!(guest = channel.label(), event = notification.event(), "Ignoring notification sent to host");
            }
        }
    }

    channel.close();
    debug!(guest = channel.label(), "Guest detached");
}

/// Run one request on its own task so a panicking handler costs only that
/// request.
async fn run_handler(handler: Arc<dyn RequestHandler>, request: Request) -> Result<Value> {
    match tokio::spawn(async move { handler.handle(request).await }).await {
        Ok(result) => result,
        Err(e) => {
            warn!(error = %e, "Request handler panicked");
            Err(MirrorError::Remote("request handler failed".into()))
        }
    }
}

// ---------------------------------------------------------------------------
// Guest side
// ---------------------------------------------------------------------------

/// The guest's handle on the host's shared service.
#[derive(Clone)]
pub struct SharedServiceProxy {
    channel: PeerChannel,
    inbound: Arc<Mutex<Option<mpsc::UnboundedReceiver<Inbound>>>>,
}

impl SharedServiceProxy {
    pub fn connect(name: &str, endpoint: Endpoint, settings: ChannelSettings) -> Self {
        let (channel, inbound) = PeerChannel::spawn(endpoint, settings, format!("{name}#host"));
        Self {
            channel,
            inbound: Arc::new(Mutex::new(Some(inbound))),
        }
    }

    pub async fn request(&self, request: Request) -> Result<Value> {
        self.channel.request(request).await
    }

    pub async fn request_as<T: DeserializeOwned>(&self, request: Request) -> Result<T> {
        self.channel.request_as(request).await
    }

    pub fn send_detached(&self, request: Request) -> Result<()> {
        self.channel.send_detached(request)
    }

    /// Take the stream of host-originated messages. Only the first caller gets it.
    pub fn take_inbound(&self) -> Option<mpsc::UnboundedReceiver<Inbound>> {
        self.inbound.lock().unwrap_or_else(|e| e.into_inner()).take()
    }

    pub fn close(&self) {
        self.channel.close();
    }

    pub fn is_closed(&self) -> bool {
        self.channel.is_closed()
    }
}
