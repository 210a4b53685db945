//! Per-connection handler: classify, register, then route frames.

use std::net::SocketAddr;
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use nbshare_live::relay::{HostFrame, RelayHello, RelayResponse};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tokio_util::sync::CancellationToken;

use crate::session::{Role, SessionStore};

type WsSink = SplitSink<WebSocketStream<TcpStream>, Message>;
type WsSource = SplitStream<WebSocketStream<TcpStream>>;

const HELLO_TIMEOUT: Duration = Duration::from_secs(10);

pub async fn handle_connection(ws: WebSocketStream<TcpStream>, addr: SocketAddr, store: SessionStore) {
    let (sink, mut stream) = ws.split();

    let Some((session, role)) = read_hello(&mut stream, addr).await else {
        return;
    };

    match role {
        Role::Host => serve_host(sink, stream, addr, session, store).await,
        Role::Guest => serve_guest(sink, stream, addr, session, store).await,
    }
}

async fn serve_host(mut sink: WsSink, mut stream: WsSource, addr: SocketAddr, session: String, store: SessionStore) {
    let (tx, mut rx) = mpsc::channel::<String>(256);
    let superseded = CancellationToken::new();
    let waiting = store.attach_host(&session, tx.clone(), superseded.clone()).await;
    tracing::info!(peer = %addr, session = %session, guests = waiting.len(), "Host registered");

    let ready = RelayResponse::SessionReady {
        session: session.clone(),
    };
    let mut announced = send_response(&mut sink, &ready).await.is_ok();
    for guest in waiting {
        if !announced {
            break;
        }
        announced = send_response(&mut sink, &RelayResponse::GuestJoined { guest })
            .await
            .is_ok();
    }
    if announced {
        for guest in store.guest_txs(&session).await {
            send_to(&guest, &RelayResponse::PeerConnected).await;
        }

        loop {
            tokio::select! {
                _ = superseded.cancelled() => {
                    tracing::info!(peer = %addr, session = %session, "Host superseded");
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                }
                Some(text) = rx.recv() => {
                    if sink.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                frame = stream.next() => match frame {
                    Some(Ok(Message::Text(text))) => match serde_json::from_str::<HostFrame>(&text) {
                        Ok(HostFrame::ToGuest { guest, frame }) => match store.guest_tx(&session, guest).await {
                            Some(guest_tx) => {
                                if guest_tx.send(frame).await.is_err() {
                                    tracing::debug!(session = %session, guest, "Guest channel closed");
                                }
                            }
                            None => tracing::debug!(session = %session, guest, "Frame for departed guest"),
                        },
                        Err(e) => tracing::debug!(peer = %addr, error = %e, "Unaddressed host frame"),
                    },
                    Some(Ok(Message::Ping(data))) => {
                        let _ = sink.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        tracing::debug!(peer = %addr, error = %e, "WS error");
                        break;
                    }
                    Some(Ok(_)) => {}
                },
            }
        }
    }

    tracing::info!(peer = %addr, session = %session, "Host disconnected");
    if let Some(guests) = store.detach_host(&session, &tx).await {
        for guest in guests {
            send_to(&guest, &RelayResponse::PeerDisconnected).await;
        }
    }
}

async fn serve_guest(mut sink: WsSink, mut stream: WsSource, addr: SocketAddr, session: String, store: SessionStore) {
    let (tx, mut rx) = mpsc::channel::<String>(256);
    let (guest, host) = match store.join_guest(&session, tx).await {
        Ok(joined) => joined,
        Err(message) => {
            tracing::info!(peer = %addr, session = %session, "Guest named an unknown session");
            let _ = send_response(
                &mut sink,
                &RelayResponse::Error {
                    message: message.into(),
                },
            )
            .await;
            return;
        }
    };
    tracing::info!(peer = %addr, session = %session, guest, "Guest registered");

    let ready = RelayResponse::SessionReady {
        session: session.clone(),
    };
    if send_response(&mut sink, &ready).await.is_ok() {
        if let Some(host) = host {
            let _ = send_response(&mut sink, &RelayResponse::PeerConnected).await;
            send_to(&host, &RelayResponse::GuestJoined { guest }).await;
        }

        loop {
            tokio::select! {
                Some(text) = rx.recv() => {
                    if sink.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                frame = stream.next() => match frame {
                    Some(Ok(Message::Text(text))) => match store.host_tx(&session).await {
                        Some(host) => {
                            let wrapped = RelayResponse::FromGuest {
                                guest,
                                frame: text.to_string(),
                            };
                            send_to(&host, &wrapped).await;
                        }
                        None => tracing::debug!(session = %session, guest, "No host; frame dropped"),
                    },
                    Some(Ok(Message::Ping(data))) => {
                        let _ = sink.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        tracing::debug!(peer = %addr, error = %e, "WS error");
                        break;
                    }
                    Some(Ok(_)) => {}
                },
            }
        }
    }

    tracing::info!(peer = %addr, session = %session, guest, "Guest disconnected");
    if let Some(host) = store.leave_guest(&session, guest).await {
        send_to(&host, &RelayResponse::GuestLeft { guest }).await;
    }
}

async fn read_hello(stream: &mut WsSource, addr: SocketAddr) -> Option<(String, Role)> {
    match tokio::time::timeout(HELLO_TIMEOUT, stream.next()).await {
        Ok(Some(Ok(Message::Text(text)))) => match serde_json::from_str::<RelayHello>(&text) {
            Ok(RelayHello::HostHello { session }) => Some((session, Role::Host)),
            Ok(RelayHello::GuestHello { session }) => Some((session, Role::Guest)),
            Err(e) => {
                tracing::warn!(peer = %addr, error = %e, "Invalid hello message");
                None
            }
        },
        Ok(Some(Ok(_))) => {
            tracing::warn!(peer = %addr, "Expected text hello");
            None
        }
        Ok(Some(Err(e))) => {
            tracing::warn!(peer = %addr, error = %e, "WS error during hello");
            None
        }
        Ok(None) => {
            tracing::debug!(peer = %addr, "Connection closed before hello");
            None
        }
        Err(_) => {
            tracing::warn!(peer = %addr, "Hello timeout");
            None
        }
    }
}

async fn send_response(
    sink: &mut WsSink,
    response: &RelayResponse,
) -> Result<(), tokio_tungstenite::tungstenite::Error> {
    let json = serde_json::to_string(response).unwrap_or_default();
    sink.send(Message::Text(json.into())).await
}

/// Queue a relay message on another client's connection.
async fn send_to(peer: &mpsc::Sender<String>, response: &RelayResponse) {
    match serde_json::to_string(response) {
        Ok(json) => {
            if peer.send(json).await.is_err() {
                tracing::debug!("Peer channel closed");
            }
        }
        Err(e) => tracing::warn!(error = %e, "Could not encode relay message"),
    }
}
