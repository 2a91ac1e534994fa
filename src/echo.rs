//! Echo mode: everything the line receives is written straight back to it.
//!
//! No network surface at all. Useful to verify cabling and settings from the
//! far end of the wire.

use std::sync::Arc;

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

/// Open the line and echo until it closes.
///
/// `ready` fires once the loop is armed.
pub async fn run(
    registry: Arc<Registry>,
    policy: &AccessPolicy,
    line: &LineName,
    settings: LineSettings,
    ready: Option<oneshot::Sender<()>>,
) -> Result<(), Error> {
    policy.ensure(Capability::Relay, line)?;

    let session = registry.open(line, settings).await?;
    let mut events = session.subscribe();

    if let Some(reply) = ready {
        let _ = reply.send(());
    }

    info!(line = %line, "Echoing");

    loop {
        let event = tokio::select! {
            _ = session.closed() => {
                debug!("Line closed, echo done");
                return Ok(());
            }
            event = events.recv() => event,
        };

        match event {
            Ok(SessionEvent::Received { bytes, .. }) => {
                match session.write(bytes).await {
                    Ok(()) => {}
                    Err(Error::NotOpen(_)) => {
                        debug!("Line closed, echo done");
                        return Ok(());
                    }
                    Err(e) => warn!(%e, "Echo write failed"),
                }
            }
            // Our own writes come back as events; ignore them.
            Ok(SessionEvent::Written { .. }) => {}
            Ok(SessionEvent::Fault { reason, .. }) => {
                warn!(%reason, "Device fault");
            }
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                warn!(missed, "Echo too slow, payloads dropped");
            }
            Err(broadcast::error::RecvError::Closed) => {
                debug!("Session gone, echo done");
                return Ok(());
            }
        }
    }
}
