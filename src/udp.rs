//! Raw UDP relay: one configured port bridged to datagram peers.
//!
//! There are no connections to accept; a peer is whoever has sent us a
//! datagram. Every chunk the port receives is sent to every endpoint learned
//! so far, and every inbound datagram goes onto the wire.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio::sync::{broadcast, oneshot};
use tracing::{debug, info, warn};

use crate::{
    config::LineSettings,
    error::Error,
    line::LineName,
    policy::{AccessPolicy, Capability},
    registry::Registry,
    session::SessionEvent,
};

/// Open the line and relay datagrams forever.
///
/// Bind to port 0 and pass `bound_port` to learn the actual port. Returns
/// only on a startup failure.
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
    let socket = UdpSocket::bind(SocketAddr::from(([0, 0, 0, 0], port)))
        .await
        .map_err(|e| Error::BadConfig(format!("could not bind UDP port {port}: {e}")))?;

    let addr = socket
        .local_addr()
        .map_err(|e| Error::BadConfig(e.to_string()))?;

    let session = registry.open(line, settings).await?;

    if let Some(reply) = bound_port {
        let _ = reply.send(addr.port());
    }

    info!(%addr, line = %line, "UDP relay listening");

    let mut peers: HashSet<SocketAddr> = HashSet::new();
    let mut events = session.subscribe();
    let mut datagram = vec![0u8; 64 * 1024];

    loop {
        tokio::select! {
            _ = session.closed() => {
                debug!("Line closed, relay done");
                return Ok(());
            }
            event = events.recv() => {
                match event {
                    Ok(SessionEvent::Received { bytes, .. }) => {
                        for peer in &peers {
                            if let Err(e) = socket.send_to(&bytes, peer).await {
                                debug!(%peer, %e, "Send failed");
                            }
                        }
                    }
                    Ok(SessionEvent::Written { .. }) => {}
                    Ok(SessionEvent::Fault { reason, .. }) => {
                        warn!(%reason, "Device fault");
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(missed, "Relay too slow, payloads dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        debug!("Session gone, relay done");
                        return Ok(());
                    }
                }
            }
            incoming = socket.recv_from(&mut datagram) => {
                // A vanished peer can surface here as an ICMP error on the
                // socket. The relay outlives its peers.
                let (n, peer) = match incoming {
                    Ok(received) => received,
                    Err(e) => {
                        warn!(%e, "UDP receive failed");
                        continue;
                    }
                };

                if peers.insert(peer) {
                    debug!(%peer, "Learned peer");
                }

                match session.write(datagram[..n].to_vec()).await {
                    Ok(()) => {}
                    Err(Error::NotOpen(_)) => {
                        debug!("Line closed, relay done");
                        return Ok(());
                    }
                    Err(e) => warn!(%e, "Relay write failed"),
                }
            }
        }
    }
}
