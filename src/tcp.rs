//! Raw TCP relay: one configured port bridged to any number of stream peers.
//!
//! Every chunk the port receives goes out to every connected peer, in the
//! order it was received; bytes from any peer go onto the wire. There is no
//! framing and no protocol, just bytes both ways.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{tcp, TcpListener};
use tokio::sync::{broadcast, oneshot};
use tracing::{debug, info, info_span, warn, Instrument};

use crate::{
    config::LineSettings,
    error::Error,
    line::LineName,
    policy::{AccessPolicy, Capability},
    registry::Registry,
    session::{Session, SessionEvent},
};

/// Open the line and serve stream peers forever.
///
/// Bind to port 0 and pass `bound_port` to learn the actual port. Returns
/// only on a startup failure; a dead peer is that peer's problem.
pub async fn run(
    registry: Arc<Registry>,
    policy: &AccessPolicy,
    line: &LineName,
    settings: LineSettings,
    port: u16,
    bound_port: Option<oneshot::Sender<u16>>,
) -> Result<(), Error> {
    policy.ensure(Capability::Relay, line)?;

    // Bind before opening the line, so a bad port number cannot leave the
    // line registered open behind a relay that never started.
    let listener = TcpListener::bind(SocketAddr::from(([0, 0, 0, 0], port)))
        .await
        .map_err(|e| Error::BadConfig(format!("could not bind TCP port {port}: {e}")))?;

    let addr = listener
        .local_addr()
        .map_err(|e| Error::BadConfig(e.to_string()))?;

    let session = registry.open(line, settings).await?;

    if let Some(reply) = bound_port {
        let _ = reply.send(addr.port());
    }

    info!(%addr, line = %line, "TCP relay listening");

    loop {
        let (stream, peer) = listener
            .accept()
            .await
            .map_err(|e| Error::device(line, format!("TCP accept failed: {e}")))?;

        debug!(%peer, "Peer connected");

        let session = Arc::clone(&session);
        tokio::spawn(handle_peer(stream, session).instrument(info_span!("peer", %peer)));
    }
}

/// One peer: relay in both directions until either side gives up.
///
/// Each peer holds its own event subscription, so all peers see the same
/// payloads in the same order without any shared peer list.
async fn handle_peer(stream: tokio::net::TcpStream, session: Arc<Session>) {
    let (mut from_peer, mut to_peer) = stream.into_split();
    let mut events = session.subscribe();
    let mut inbound = vec![0u8; 4096];

    loop {
        tokio::select! {
            // The subscription keeps the event channel alive, so a closed
            // line is signalled by the token, not by the channel closing.
            _ = session.closed() => {
                debug!("Line closed, dropping peer");
                break;
            }
            event = events.recv() => {
                if !forward_event(event, &mut to_peer).await {
                    break;
                }
            }
            read = from_peer.read(&mut inbound) => {
                match read {
                    Ok(0) => {
                        debug!("Peer disconnected");
                        break;
                    }
                    Ok(n) => {
                        match session.write(inbound[..n].to_vec()).await {
                            Ok(()) => {}
                            Err(Error::NotOpen(_)) => {
                                debug!("Line closed, dropping peer");
                                break;
                            }
                            // The peer has no error channel; log and keep
                            // relaying.
                            Err(e) => warn!(%e, "Relay write failed"),
                        }
                    }
                    Err(e) => {
                        debug!(%e, "Peer read failed");
                        break;
                    }
                }
            }
        }
    }
}

/// `true` to keep the peer, `false` to drop it.
async fn forward_event(
    event: Result<SessionEvent, broadcast::error::RecvError>,
    to_peer: &mut tcp::OwnedWriteHalf,
) -> bool {
    match event {
        Ok(SessionEvent::Received { bytes, .. }) => {
            if let Err(e) = to_peer.write_all(&bytes).await {
                debug!(%e, "Peer write failed");
                return false;
            }
            true
        }
        Ok(SessionEvent::Written { .. }) => true,
        Ok(SessionEvent::Fault { reason, .. }) => {
            warn!(%reason, "Device fault");
            true
        }
        Err(broadcast::error::RecvError::Lagged(missed)) => {
            warn!(missed, "Peer too slow, payloads dropped");
            true
        }
        Err(broadcast::error::RecvError::Closed) => {
            debug!("Session gone, dropping peer");
            false
        }
    }
}
