use std::sync::Arc;

use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info_span, warn, Instrument};

use crate::{
    buffer::{BufferStatus, ReceiveBuffer},
    config::LineSettings,
    device::{DeviceHandle, DeviceNotice},
    error::Error,
    line::LineName,
};

/// How many unread events a slow subscriber may fall behind before it
/// starts losing them. Publication never blocks on subscribers.
const EVENT_CAPACITY: usize = 1024;

/// Something that happened on a session, pushed to all subscribers.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// Bytes arrived from the wire.
    ///
    /// Carries the raw chunk as it came off the device, not a buffer
    /// snapshot, so push adapters can forward the exact payload without
    /// touching shared state.
    Received {
        /// The line the bytes arrived on.
        line: LineName,

        /// The raw payload.
        bytes: Vec<u8>,
    },

    /// Bytes were successfully written to the wire.
    Written {
        /// The line written to.
        line: LineName,

        /// The payload that was written.
        bytes: Vec<u8>,
    },

    /// The device reported a failure outside any client request,
    /// e.g. a read error on the line. The session stays alive; only an
    /// explicit close terminates it.
    Fault {
        /// The line the fault occurred on.
        line: LineName,

        /// What the device reported.
        reason: String,
    },
}

/// The single point of serialized access to one open line.
///
/// Owns the device handle and the receive buffer. Two independent mutexes
/// guard it: the buffer lock serializes buffer mutation (device-arrival
/// appends and client drains), the write lock serializes writes to the
/// device. A write may proceed concurrently with a drain; two writers or two
/// buffer mutators never interleave.
///
/// Neither lock is ever held across event publication: subscribers are
/// notified after the critical section ends, through a broadcast channel
/// which drops events for laggards instead of stalling the publisher.
#[derive(Debug)]
pub struct Session {
    name: LineName,
    settings: LineSettings,
    device: DeviceHandle,
    buffer: Arc<Mutex<ReceiveBuffer>>,
    write_lock: Mutex<()>,
    events: broadcast::Sender<SessionEvent>,
    closed: CancellationToken,
    _pump: JoinHandle<()>,
}

impl Session {
    /// Bind an opened device into a session.
    ///
    /// Spawns the pump task which turns device notices into buffer appends
    /// and published events.
    pub(crate) fn new(mut device: DeviceHandle, settings: LineSettings, rx_capacity: usize) -> Self {
        let name = device.name().clone();
        let buffer = Arc::new(Mutex::new(ReceiveBuffer::new(rx_capacity)));
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        let notices = device
            .take_notices()
            .expect("A fresh device still has its notices");

        let pump = spawn_pump(notices, Arc::clone(&buffer), events.clone(), name.clone());

        Self {
            name,
            settings,
            device,
            buffer,
            write_lock: Mutex::new(()),
            events,
            closed: CancellationToken::new(),
            _pump: pump,
        }
    }

    /// The line this session owns.
    pub fn name(&self) -> &LineName {
        &self.name
    }

    /// The settings the line was opened with.
    pub fn settings(&self) -> &LineSettings {
        &self.settings
    }

    /// Put bytes on the wire.
    ///
    /// Holds the write lock across the device call, since the device admits
    /// one in-flight write; the `Written` event is published after release.
    /// The lock is released on every exit path, including device failure.
    pub async fn write(&self, bytes: Vec<u8>) -> Result<(), Error> {
        {
            let _write = self.write_lock.lock().await;
            self.device.write(bytes.clone()).await?;
        }

        if self.events.send(SessionEvent::Written {
            line: self.name.clone(),
            bytes,
        }).is_err() {
            debug!("No subscribers for written event");
        }

        Ok(())
    }

    /// Destructive read of the receive buffer.
    ///
    /// Returns up to `max_bytes` buffered bytes (`None` means everything)
    /// and the overflow flag observed at drain time, then clears the buffer.
    pub async fn drain_buffer(&self, max_bytes: Option<usize>) -> (Vec<u8>, bool) {
        self.buffer.lock().await.drain(max_bytes)
    }

    /// Discard all buffered bytes without returning them.
    pub async fn clear_buffer(&self) {
        self.buffer.lock().await.clear();
    }

    /// Consistent snapshot of the buffer's fill, capacity and overflow flag.
    pub async fn peek_available(&self) -> BufferStatus {
        self.buffer.lock().await.status()
    }

    /// Subscribe to this session's events.
    ///
    /// Dropping the receiver is unsubscribing; the session never keeps a
    /// strong reference to its subscribers.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Completes once the session has been shut down.
    ///
    /// Subscribers holding an `Arc` to the session keep the event channel
    /// alive, so they cannot rely on the channel closing; this is how they
    /// learn the line is gone.
    pub async fn closed(&self) {
        self.closed.cancelled().await
    }

    /// Tear the session down.
    ///
    /// Cancels the device first, which fails any queued or in-flight write
    /// with [`Error::NotOpen`] instead of letting it hang, then waits for
    /// in-flight lock holders to finish before discarding buffered bytes.
    /// Safe to call more than once.
    pub(crate) async fn shutdown(&self) {
        self.device.shutdown();
        self.closed.cancel();

        let _write = self.write_lock.lock().await;
        let mut buffer = self.buffer.lock().await;
        buffer.clear();
    }
}

fn spawn_pump(
    mut notices: tokio::sync::mpsc::UnboundedReceiver<DeviceNotice>,
    buffer: Arc<Mutex<ReceiveBuffer>>,
    events: broadcast::Sender<SessionEvent>,
    name: LineName,
) -> JoinHandle<()> {
    let span = info_span!("pump", line = %name);

    tokio::spawn(
        async move {
            while let Some(notice) = notices.recv().await {
                match notice {
                    DeviceNotice::Data(bytes) => {
                        {
                            let mut buffer = buffer.lock().await;
                            let stored = buffer.append(&bytes);
                            if stored < bytes.len() {
                                debug!(lost = bytes.len() - stored, "Receive buffer overflow");
                            }
                        }

                        // Publish the raw chunk after the lock is gone.
                        let _ = events.send(SessionEvent::Received {
                            line: name.clone(),
                            bytes,
                        });
                    }
                    DeviceNotice::Fault(reason) => {
                        warn!(%reason, "Device fault");
                        let _ = events.send(SessionEvent::Fault {
                            line: name.clone(),
                            reason,
                        });
                    }
                }
            }

            debug!("Pump done");
        }
        .instrument(span),
    )
}
