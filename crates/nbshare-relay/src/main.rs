//! nbshare-relay: WebSocket relay between a notebook host and its guest.
//!
//! Groups connections by session name: one host and any number of guests.
//! Guest frames reach the host tagged with the guest's number, and the
//! host's replies are routed back by that number. Channel frames are never
//! looked inside.

mod connection;
mod session;

use std::time::Duration;

use clap::Parser;
use nbshare_config::schema::LoggingConfig;
use nbshare_config::NbshareConfig;
use tokio::net::TcpListener;
use tokio_tungstenite::accept_async;

use crate::connection::handle_connection;
use crate::session::SessionStore;

#[derive(Parser)]
#[command(name = "nbshare-relay", about = "WebSocket relay for shared notebook sessions")]
struct Args {
    /// Port to listen on.
    #[arg(short, long, default_value_t = 8080)]
    port: u16,

    /// Maximum age in seconds of a session no guest has joined.
    #[arg(long, default_value_t = 300)]
    session_ttl: u64,
}

#[tokio::main]
async fn main() -> std::io::Result<()> {
    let (config, config_error) = match nbshare_config::load_config() {
        Ok(config) => (config, None),
        Err(e) => (NbshareConfig::default(), Some(e)),
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_directive(&config.logging).into()),
        )
        .init();
    if let Some(e) = config_error {
        tracing::warn!(error = %e, "Using default config");
    }

    let args = Args::parse();
    let store = SessionStore::new();

    let addr = format!("0.0.0.0:{}", args.port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("nbshare-relay listening on {}", addr);

    let reaper = store.clone();
    let ttl = Duration::from_secs(args.session_ttl);
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(Duration::from_secs(60)).await;
            let reaped = reaper.reap_stale(ttl).await;
            let sessions = reaper.count().await;
            tracing::debug!(reaped, sessions, "Reaper tick");
        }
    });

    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                let store = store.clone();
                tokio::spawn(async move {
                    match accept_async(stream).await {
                        Ok(ws) => handle_connection(ws, peer, store).await,
                        Err(e) => tracing::warn!(peer = %peer, error = %e, "WS handshake failed"),
                    }
                });
            }
            Err(e) => tracing::warn!(error = %e, "TCP accept error"),
        }
    }
}

/// Filter for this binary when `RUST_LOG` is unset.
fn log_directive(logging: &LoggingConfig) -> String {
    format!("nbshare_relay={}", logging.level.as_directive())
}
