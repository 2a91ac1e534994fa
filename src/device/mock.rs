//! A mock device, useful to test session and transport behavior without
//! actual serial ports.
//!
//! Opening a line through [`MockDeviceFactory`] produces a normal
//! [`DeviceHandle`] plus a [`MockLink`] the test can pick up: feeding the
//! link plays the role of bytes arriving on the wire, and everything written
//! through the session pops out on the link's `written` channel.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info_span, Instrument};

use crate::{
    config::LineSettings,
    device::{DeviceFactory, DeviceHandle, DeviceNotice, WriteRequest},
    error::Error,
    line::LineName,
};

/// The test's side of a mock device.
#[derive(Debug)]
pub struct MockLink {
    /// Sending here is "bytes arrived from the wire".
    pub feed: mpsc::UnboundedSender<DeviceNotice>,

    /// Everything the session writes to the device ends up here.
    pub written: mpsc::UnboundedReceiver<Vec<u8>>,
}

/// Opens in-memory devices.
#[derive(Debug, Default)]
pub struct MockDeviceFactory {
    links: Mutex<HashMap<LineName, MockLink>>,
    host_lines: Mutex<Vec<LineName>>,
    open_delay: Mutex<Option<Duration>>,
    refuse_opens: AtomicBool,
    fail_writes: Arc<AtomicBool>,
    stall_writes: Arc<AtomicBool>,
}

impl MockDeviceFactory {
    /// A fresh factory with well-behaved devices.
    pub fn new() -> Self {
        Self::default()
    }

    /// Pretend the host has this line, so it shows up in listings.
    pub fn add_host_line(&self, name: LineName) {
        self.host_lines.lock().expect("Lock works").push(name);
    }

    /// Make every open sit on the calling thread for `delay` first, the way
    /// a real serial open blocks in the driver.
    pub fn delay_opens(&self, delay: Duration) {
        *self.open_delay.lock().expect("Lock works") = Some(delay);
    }

    /// Make subsequent opens fail with a device error.
    pub fn refuse_opens(&self) {
        self.refuse_opens.store(true, Ordering::SeqCst);
    }

    /// Make devices reject every write.
    pub fn fail_writes(&self) {
        self.fail_writes.store(true, Ordering::SeqCst);
    }

    /// Make devices sit on writes forever (until shutdown).
    ///
    /// Used to exercise close-while-a-write-is-in-flight.
    pub fn stall_writes(&self) {
        self.stall_writes.store(true, Ordering::SeqCst);
    }

    /// Take the link for an opened line. `None` if it was never opened
    /// or the link was already taken.
    pub fn link(&self, name: &LineName) -> Option<MockLink> {
        self.links.lock().expect("Lock works").remove(name)
    }
}

impl DeviceFactory for MockDeviceFactory {
    fn open(&self, name: &LineName, settings: &LineSettings) -> Result<DeviceHandle, Error> {
        settings.validate()?;

        if let Some(delay) = *self.open_delay.lock().expect("Lock works") {
            std::thread::sleep(delay);
        }

        if self.refuse_opens.load(Ordering::SeqCst) {
            return Err(Error::device(name, "mock refuses to open"));
        }

        let (write_tx, mut write_rx) = mpsc::unbounded_channel::<WriteRequest>();
        let (notice_tx, notice_rx) = mpsc::unbounded_channel::<DeviceNotice>();
        let (written_tx, written_rx) = mpsc::unbounded_channel::<Vec<u8>>();

        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();
        let task_name = name.clone();
        let fail = Arc::clone(&self.fail_writes);
        let stall = Arc::clone(&self.stall_writes);
        let span = info_span!("mock-device", line = %name);

        let task = tokio::spawn(
            async move {
                loop {
                    tokio::select! {
                        _ = task_cancel.cancelled() => {
                            debug!("Mock device cancelled");
                            break;
                        }
                        request = write_rx.recv() => {
                            let Some(WriteRequest { bytes, completion }) = request else {
                                break;
                            };

                            if stall.load(Ordering::SeqCst) {
                                // Hold the write until shutdown; its
                                // completion drops when we break.
                                task_cancel.cancelled().await;
                                break;
                            }

                            if fail.load(Ordering::SeqCst) {
                                let _ = completion
                                    .send(Err(Error::write(&task_name, "mock write failure")));
                                continue;
                            }

                            let _ = written_tx.send(bytes);
                            let _ = completion.send(Ok(()));
                        }
                    }
                }
            }
            .instrument(span),
        );

        self.links.lock().expect("Lock works").insert(
            name.clone(),
            MockLink {
                feed: notice_tx,
                written: written_rx,
            },
        );

        Ok(DeviceHandle::new(
            name.clone(),
            write_tx,
            notice_rx,
            cancel,
            task,
        ))
    }

    fn lines(&self) -> Result<Vec<LineName>, Error> {
        Ok(self.host_lines.lock().expect("Lock works").clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(name: &str) -> LineName {
        LineName::canonicalize(name).unwrap()
    }

    #[tokio::test]
    async fn writes_pop_out_on_the_link() {
        let factory = MockDeviceFactory::new();
        let name = line("mock0");

        let handle = factory.open(&name, &LineSettings::default()).unwrap();
        let mut link = factory.link(&name).unwrap();

        handle.write(b"hi".to_vec()).await.unwrap();

        assert_eq!(link.written.recv().await.unwrap(), b"hi");
    }

    #[tokio::test]
    async fn fed_bytes_show_up_as_notices() {
        let factory = MockDeviceFactory::new();
        let name = line("mock1");

        let mut handle = factory.open(&name, &LineSettings::default()).unwrap();
        let link = factory.link(&name).unwrap();
        let mut notices = handle.take_notices().unwrap();

        link.feed.send(DeviceNotice::Data(b"ping".to_vec())).unwrap();

        match notices.recv().await.unwrap() {
            DeviceNotice::Data(bytes) => assert_eq!(bytes, b"ping"),
            other => panic!("Unexpected notice: {other:?}"),
        }
    }

    #[tokio::test]
    async fn shutdown_fails_a_stalled_write() {
        let factory = MockDeviceFactory::new();
        factory.stall_writes();
        let name = line("mock2");

        let handle = Arc::new(factory.open(&name, &LineSettings::default()).unwrap());

        let writer = {
            let handle = Arc::clone(&handle);
            tokio::spawn(async move { handle.write(b"stuck".to_vec()).await })
        };

        // Give the write a chance to reach the device task.
        tokio::task::yield_now().await;
        handle.shutdown();

        let result = writer.await.unwrap();
        assert_eq!(result, Err(Error::NotOpen(name.to_string())));
    }

    #[tokio::test]
    async fn refused_open_is_a_device_error() {
        let factory = MockDeviceFactory::new();
        factory.refuse_opens();

        let result = factory.open(&line("mock3"), &LineSettings::default());
        assert!(matches!(result, Err(Error::Device { .. })));
    }
}
