//! The push socket: a websocket bound to one open port.
//!
//! Every chunk the port receives is pushed to the client as a binary frame;
//! frames from the client are written to the port. One socket serves one
//! port, and closing the port ends the socket.

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Extension, Path, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures::{sink::Sink, stream::Stream, SinkExt, StreamExt};
use tokio::sync::broadcast;
use tracing::{debug, info_span, warn, Instrument};

use crate::{
    error::Error,
    line::LineName,
    policy::Capability,
    rest::ApiError,
    server::ApiContext,
    session::{Session, SessionEvent},
};

pub(crate) async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(name): Path<String>,
    Extension(ctx): Extension<Arc<ApiContext>>,
) -> Result<impl IntoResponse, ApiError> {
    let line = LineName::canonicalize(&name)?;
    ctx.policy.ensure(Capability::Subscribe, &line)?;

    let session = ctx
        .registry
        .get(&line)
        .await
        .ok_or_else(|| Error::NotOpen(line.to_string()))?;

    // Read and write are gated per direction, not at upgrade time: a
    // read-only policy still gets pushed data, it just cannot write.
    let forward_data = ctx.policy.check(Capability::Read, &line);
    let allow_writes = ctx.policy.check(Capability::Write, &line);

    let span = info_span!("ws", line = %line);

    Ok(ws.on_upgrade(move |socket| {
        handle_websocket(socket, session, forward_data, allow_writes).instrument(span)
    }))
}

async fn handle_websocket(
    websocket: WebSocket,
    session: Arc<Session>,
    forward_data: bool,
    allow_writes: bool,
) {
    debug!("Websocket connected");

    let (sink, stream) = websocket.split();
    let events = session.subscribe();

    let push_handle = tokio::spawn(
        push_events(sink, events, forward_data, Arc::clone(&session))
            .instrument(info_span!("push")),
    );

    read_frames(stream, session, allow_writes)
        .instrument(info_span!("read"))
        .await;

    // The client is gone (or the line closed under it); tearing the push
    // task down closes the underlying TCP connection.
    push_handle.abort();
}

/// Forward session events to the client until the session dies or the
/// client leaves.
async fn push_events<S>(
    mut sink: S,
    mut events: broadcast::Receiver<SessionEvent>,
    forward_data: bool,
    session: Arc<Session>,
) where
    S: Sink<Message> + Unpin,
{
    loop {
        // Holding the session `Arc` keeps the event channel alive, so a
        // closed line is signalled by the token, never by `RecvError::Closed`.
        let event = tokio::select! {
            _ = session.closed() => {
                debug!("Line closed, closing socket");
                let _ = sink.send(Message::Close(None)).await;
                break;
            }
            event = events.recv() => event,
        };

        match event {
            Ok(SessionEvent::Received { bytes, .. }) => {
                if !forward_data {
                    continue;
                }
                if sink.send(Message::Binary(bytes)).await.is_err() {
                    debug!("Client disconnected");
                    break;
                }
            }
            Ok(SessionEvent::Written { .. }) => {}
            Ok(SessionEvent::Fault { reason, .. }) => {
                warn!(%reason, "Device fault, closing socket");
                let _ = sink.send(Message::Close(None)).await;
                break;
            }
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                warn!(missed, "Too slow, events dropped");
            }
            Err(broadcast::error::RecvError::Closed) => {
                debug!("Session gone, closing socket");
                let _ = sink.send(Message::Close(None)).await;
                break;
            }
        }
    }
}

/// Write client frames to the port until the client leaves.
///
/// A rejected write is logged and reported to no one; it never tears the
/// session down. A line closed by someone else ends the socket normally.
async fn read_frames<S>(mut stream: S, session: Arc<Session>, allow_writes: bool)
where
    S: Stream<Item = Result<Message, axum::Error>> + Unpin,
{
    loop {
        let message = tokio::select! {
            _ = session.closed() => {
                debug!("Line closed, ending socket");
                break;
            }
            message = stream.next() => message,
        };

        let Some(Ok(message)) = message else {
            break;
        };

        let bytes = match message {
            Message::Binary(bytes) => bytes,
            Message::Text(text) => text.into_bytes(),
            Message::Ping(_) | Message::Pong(_) => continue,
            Message::Close(_) => {
                debug!("Client disconnected");
                break;
            }
        };

        if !allow_writes {
            debug!(len = bytes.len(), "Dropping frame, writes not permitted");
            continue;
        }

        match session.write(bytes).await {
            Ok(()) => {}
            Err(Error::NotOpen(_)) => {
                debug!("Line closed, ending socket");
                break;
            }
            Err(e) => warn!(%e, "Write failed"),
        }
    }
}
