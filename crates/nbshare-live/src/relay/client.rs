//! WebSocket client for the relay, and a collaboration service built on it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use nbshare_common::{MirrorError, PrefixUriMapper, Result, Role, SessionInfo, UriMapper};
use nbshare_config::NbshareConfig;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use super::wire::{HostFrame, RelayHello, RelayResponse, SESSION_NOT_FOUND};
use crate::channel::{ChannelSettings, Endpoint, SharedService, SharedServiceProxy};
use crate::session::CollaborationApi;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Open a relay connection and return it as an [`Endpoint`].
///
/// Waits for the relay's `session_ready`. A guest naming a session that no
/// host has opened gets [`MirrorError::UnavailableHost`].
pub async fn connect(
    url: &str,
    hello: RelayHello,
    settings: ChannelSettings,
) -> Result<Endpoint> {
    let ws = handshake(url, &hello, settings).await?;
    let (to_local, local_rx) = mpsc::channel(settings.capacity);
    let (local_tx, from_local) = mpsc::channel(settings.capacity);
    tokio::spawn(bridge(ws, to_local, from_local));
    Ok(Endpoint::new(local_tx, local_rx))
}

async fn handshake(url: &str, hello: &RelayHello, settings: ChannelSettings) -> Result<WsStream> {
    let (mut ws, _) = tokio::time::timeout(
        settings.request_timeout,
        tokio_tungstenite::connect_async(url),
    )
    .await
    .map_err(|_| MirrorError::Timeout(settings.request_timeout))?
    .map_err(|e| MirrorError::TransportFailure(format!("relay connect failed: {e}")))?;

    let text = serde_json::to_string(hello)?;
    ws.send(WsMessage::Text(text.into()))
        .await
        .map_err(|e| MirrorError::TransportFailure(e.to_string()))?;

    await_ready(&mut ws, settings.request_timeout).await?;
    info!(url, session = hello.session(), "Relay session ready");
    Ok(ws)
}

async fn await_ready(ws: &mut WsStream, timeout: Duration) -> Result<()> {
    let frame = tokio::time::timeout(timeout, ws.next())
        .await
        .map_err(|_| MirrorError::Timeout(timeout))?;

    match frame {
        Some(Ok(WsMessage::Text(text))) => match serde_json::from_str::<RelayResponse>(&text)? {
            RelayResponse::SessionReady { .. } => Ok(()),
            RelayResponse::Error { message } if message == SESSION_NOT_FOUND => {
                Err(MirrorError::UnavailableHost)
            }
            RelayResponse::Error { message } => Err(MirrorError::TransportFailure(message)),
            other => Err(MirrorError::Decode(format!(
                "expected session_ready, got {other:?}"
            ))),
        },
        Some(Ok(_)) => Err(MirrorError::Decode("expected text frame from relay".into())),
        Some(Err(e)) => Err(MirrorError::TransportFailure(e.to_string())),
        None => Err(MirrorError::TransportFailure(
            "relay closed before session_ready".into(),
        )),
    }
}

/// Pump frames between the socket and the local endpoint until either side closes.
async fn bridge(ws: WsStream, to_local: mpsc::Sender<String>, mut from_local: mpsc::Receiver<String>) {
    let (mut writer, mut reader) = ws.split();

    loop {
        tokio::select! {
            outgoing = from_local.recv() => match outgoing {
                Some(text) => {
                    if writer.send(WsMessage::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                None => {
                    let _ = writer.send(WsMessage::Close(None)).await;
                    break;
                }
            },
            incoming = reader.next() => match incoming {
                Some(Ok(WsMessage::Text(text))) => {
                    if let Ok(status) = serde_json::from_str::<RelayResponse>(&text) {
                        match status {
                            RelayResponse::PeerConnected => info!("Relay peer connected"),
                            RelayResponse::PeerDisconnected => info!("Relay peer disconnected"),
                            RelayResponse::Error { message } => warn!(%message, "Relay error"),
                            other => debug!(?other, "Ignoring host-side relay status"),
                        }
                        continue;
                    }
                    if to_local.send(text.to_string()).await.is_err() {
                        break;
                    }
                }
                Some(Ok(WsMessage::Ping(data))) => {
                    let _ = writer.send(WsMessage::Pong(data)).await;
                }
                Some(Ok(WsMessage::Close(_))) | None => break,
                Some(Err(e)) => {
                    warn!(error = %e, "Relay connection error");
                    break;
                }
                Some(Ok(_)) => {}
            },
        }
    }
    debug!("Relay bridge stopped");
}

/// Host side of a relay session: give every guest the relay announces its
/// own lane into `service`, and address each lane's output back to that
/// guest. Ends when the socket or the service closes.
async fn host_bridge(ws: WsStream, service: SharedService, settings: ChannelSettings) {
    let (mut writer, mut reader) = ws.split();
    let (out_tx, mut out_rx) = mpsc::channel::<(u64, String)>(settings.capacity);
    let mut lanes: HashMap<u64, mpsc::Sender<String>> = HashMap::new();

    loop {
        tokio::select! {
            _ = service.closed() => {
                let _ = writer.send(WsMessage::Close(None)).await;
                break;
            }
            Some((guest, frame)) = out_rx.recv() => {
                let text = match serde_json::to_string(&HostFrame::ToGuest { guest, frame }) {
                    Ok(text) => text,
                    Err(e) => {
                        warn!(guest, error = %e, "Could not encode frame for guest");
                        continue;
                    }
                };
                if writer.send(WsMessage::Text(text.into())).await.is_err() {
                    break;
                }
            }
            incoming = reader.next() => match incoming {
                Some(Ok(WsMessage::Text(text))) => match serde_json::from_str::<RelayResponse>(&text) {
                    Ok(RelayResponse::GuestJoined { guest }) => {
                        let (to_lane, lane_rx) = mpsc::channel(settings.capacity);
                        let (lane_tx, mut from_lane) = mpsc::channel::<String>(settings.capacity);
                        service.attach(Endpoint::new(lane_tx, lane_rx));
                        lanes.insert(guest, to_lane);

                        let out = out_tx.clone();
                        tokio::spawn(async move {
                            while let Some(frame) = from_lane.recv().await {
                                if out.send((guest, frame)).await.is_err() {
                                    break;
                                }
                            }
                        });
                        info!(guest, "Relay guest joined");
                    }
                    Ok(RelayResponse::GuestLeft { guest }) => {
                        // Dropping the lane ends that guest's channel.
                        lanes.remove(&guest);
                        info!(guest, "Relay guest left");
                    }
                    Ok(RelayResponse::FromGuest { guest, frame }) => match lanes.get(&guest) {
                        Some(lane) => {
                            if lane.send(frame).await.is_err() {
                                lanes.remove(&guest);
                            }
                        }
                        None => debug!(guest, "Frame from unknown guest"),
                    },
                    Ok(RelayResponse::Error { message }) => warn!(%message, "Relay error"),
                    Ok(other) => debug!(?other, "Ignoring relay status"),
                    Err(e) => debug!(error = %e, "Unrecognized frame from relay"),
                },
                Some(Ok(WsMessage::Ping(data))) => {
                    let _ = writer.send(WsMessage::Pong(data)).await;
                }
                Some(Ok(WsMessage::Close(_))) | None => break,
                Some(Err(e)) => {
                    warn!(error = %e, "Relay connection error");
                    break;
                }
                Some(Ok(_)) => {}
            },
        }
    }
    debug!(service = service.name(), guests = lanes.len(), "Relay host bridge stopped");
}

// ---------------------------------------------------------------------------
// Collaboration service
// ---------------------------------------------------------------------------

/// Collaboration over a relay server. Each shared service becomes one
/// relay session named `<session>/<service>`.
pub struct RelayCollaboration {
    url: String,
    session_name: String,
    settings: ChannelSettings,
    mapper: Arc<dyn UriMapper>,
    session: watch::Sender<Option<SessionInfo>>,
}

impl RelayCollaboration {
    pub fn new(config: &NbshareConfig, session_name: impl Into<String>) -> Self {
        let (session, _) = watch::channel(None);
        Self {
            url: config.relay.url.clone(),
            session_name: session_name.into(),
            settings: ChannelSettings::from_config(config),
            mapper: Arc::new(PrefixUriMapper::identity()),
            session,
        }
    }

    /// A collaboration already started in `role` when `relay.auto_connect`
    /// is set; `None` otherwise.
    pub fn auto_start(config: &NbshareConfig, session_name: impl Into<String>, role: Role) -> Option<Self> {
        let session_name = session_name.into();
        if !config.relay.auto_connect {
            debug!(session = %session_name, "Relay auto-connect is off");
            return None;
        }
        let collaboration = Self::new(config, session_name);
        collaboration.start_session(role);
        Some(collaboration)
    }

    pub fn with_mapper(mut self, mapper: Arc<dyn UriMapper>) -> Self {
        self.mapper = mapper;
        self
    }

    pub fn start_session(&self, role: Role) -> SessionInfo {
        let info = SessionInfo::new(role);
        info!(session = %self.session_name, ?role, "Relay session started");
        self.session.send_replace(Some(info.clone()));
        info
    }

    pub fn end_session(&self) {
        self.session.send_replace(None);
    }

    fn role(&self) -> Option<Role> {
        self.session.borrow().as_ref().map(|info| info.role)
    }

    fn relay_session(&self, service: &str) -> String {
        format!("{}/{}", self.session_name, service)
    }
}

#[async_trait]
impl CollaborationApi for RelayCollaboration {
    fn session(&self) -> Option<SessionInfo> {
        self.session.borrow().clone()
    }

    fn session_changes(&self) -> watch::Receiver<Option<SessionInfo>> {
        self.session.subscribe()
    }

    async fn share_service(&self, name: &str) -> Result<Option<SharedService>> {
        if self.role() != Some(Role::Host) {
            return Ok(None);
        }
        let hello = RelayHello::HostHello {
            session: self.relay_session(name),
        };
        let ws = handshake(&self.url, &hello, self.settings).await?;
        let service = SharedService::new(name, self.settings);
        tokio::spawn(host_bridge(ws, service.clone(), self.settings));
        Ok(Some(service))
    }

    async fn get_shared_service(&self, name: &str) -> Result<Option<SharedServiceProxy>> {
        if self.role() != Some(Role::Guest) {
            return Ok(None);
        }
        let hello = RelayHello::GuestHello {
            session: self.relay_session(name),
        };
        match connect(&self.url, hello, self.settings).await {
            Ok(endpoint) => Ok(Some(SharedServiceProxy::connect(name, endpoint, self.settings))),
            Err(MirrorError::UnavailableHost) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn uri_mapper(&self) -> Arc<dyn UriMapper> {
        Arc::clone(&self.mapper)
    }
}
