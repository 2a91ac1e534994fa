use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::{config::LineSettings, error::Error, line::LineName};

/// Real serial port devices.
pub mod serial;

/// In-memory devices, useful to test without actual serial ports.
pub mod mock;

/// Something the device task tells its session.
#[derive(Debug, Clone)]
pub enum DeviceNotice {
    /// Bytes arrived from the wire.
    Data(Vec<u8>),

    /// The device failed while reading; the line is likely gone.
    Fault(String),
}

/// A queued write plus the channel its completion is reported on.
#[derive(Debug)]
pub(crate) struct WriteRequest {
    pub(crate) bytes: Vec<u8>,
    pub(crate) completion: oneshot::Sender<Result<(), Error>>,
}

/// A handle to one open device.
///
/// The device itself lives in a spawned task which owns the underlying I/O
/// resource. Writes are queued onto the task one at a time and completed via
/// a reply channel; arriving bytes are pushed out as [`DeviceNotice`]s.
/// Cancelling the token tears the task down and fails anything still queued.
#[derive(Debug)]
pub struct DeviceHandle {
    name: LineName,
    writes: mpsc::UnboundedSender<WriteRequest>,
    notices: Option<mpsc::UnboundedReceiver<DeviceNotice>>,
    cancel: CancellationToken,
    _task: JoinHandle<()>,
}

impl DeviceHandle {
    pub(crate) fn new(
        name: LineName,
        writes: mpsc::UnboundedSender<WriteRequest>,
        notices: mpsc::UnboundedReceiver<DeviceNotice>,
        cancel: CancellationToken,
        task: JoinHandle<()>,
    ) -> Self {
        Self {
            name,
            writes,
            notices: Some(notices),
            cancel,
            _task: task,
        }
    }

    /// The line this device is open on.
    pub fn name(&self) -> &LineName {
        &self.name
    }

    /// Queue a write and wait for the device to complete or reject it.
    ///
    /// A device that has shut down (line closed underneath us) surfaces as
    /// [`Error::NotOpen`], not as a write failure.
    pub async fn write(&self, bytes: Vec<u8>) -> Result<(), Error> {
        let (completion, completed) = oneshot::channel();

        self.writes
            .send(WriteRequest { bytes, completion })
            .map_err(|_| Error::NotOpen(self.name.to_string()))?;

        match completed.await {
            Ok(result) => result,
            // The device task dropped our completion: it was cancelled
            // while our write was queued or in flight.
            Err(_) => Err(Error::NotOpen(self.name.to_string())),
        }
    }

    /// Take the notice receiver. Yields `None` on the second call.
    ///
    /// The session's pump task is the one consumer of arrival notices.
    pub fn take_notices(&mut self) -> Option<mpsc::UnboundedReceiver<DeviceNotice>> {
        self.notices.take()
    }

    /// Tear the device task down.
    ///
    /// Idempotent. Queued and in-flight writes fail rather than hang.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

impl Drop for DeviceHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Opens devices. The seam between the registry and the actual hardware,
/// which lets everything above it run against [`mock::MockDeviceFactory`]
/// in tests.
pub trait DeviceFactory: Send + Sync {
    /// Open the named line with the given settings.
    fn open(&self, name: &LineName, settings: &LineSettings) -> Result<DeviceHandle, Error>;

    /// The lines the host knows about, open or not.
    fn lines(&self) -> Result<Vec<LineName>, Error>;
}
