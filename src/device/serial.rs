use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_serial::SerialPortBuilderExt;
use tokio_util::codec::{BytesCodec, Decoder};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info_span, trace, Instrument};

use crate::{
    config::{LineSettings, Parity},
    device::{DeviceFactory, DeviceHandle, DeviceNotice, WriteRequest},
    error::Error,
    line::LineName,
};

/// Opens actual serial ports via the host's serial driver.
#[derive(Debug, Default)]
pub struct SerialDeviceFactory;

fn data_bits(bits: u8) -> tokio_serial::DataBits {
    match bits {
        5 => tokio_serial::DataBits::Five,
        6 => tokio_serial::DataBits::Six,
        7 => tokio_serial::DataBits::Seven,
        // Settings are validated before they reach the factory.
        _ => tokio_serial::DataBits::Eight,
    }
}

fn stop_bits(bits: u8) -> tokio_serial::StopBits {
    match bits {
        2 => tokio_serial::StopBits::Two,
        _ => tokio_serial::StopBits::One,
    }
}

fn parity(parity: Parity) -> Result<tokio_serial::Parity, Error> {
    match parity {
        Parity::None => Ok(tokio_serial::Parity::None),
        Parity::Even => Ok(tokio_serial::Parity::Even),
        Parity::Odd => Ok(tokio_serial::Parity::Odd),
        Parity::Mark | Parity::Space => Err(Error::BadConfig(
            "mark/space parity is not supported by the host serial driver".into(),
        )),
    }
}

impl DeviceFactory for SerialDeviceFactory {
    fn open(&self, name: &LineName, settings: &LineSettings) -> Result<DeviceHandle, Error> {
        settings.validate()?;

        debug!(%name, %settings, "Opening serial port");

        let stream = tokio_serial::new(name.as_str(), settings.baud_rate)
            .data_bits(data_bits(settings.data_bits))
            .stop_bits(stop_bits(settings.stop_bits))
            .parity(parity(settings.parity)?)
            .open_native_async()
            .map_err(|e| Error::device(name, e))?;

        // Sink: bytes to put on wire. Stream: bytes read from wire.
        // Raw chunks; this server does not frame.
        let (mut sink, mut wire) = BytesCodec::new().framed(stream).split();

        let (write_tx, mut write_rx) = mpsc::unbounded_channel::<WriteRequest>();
        let (notice_tx, notice_rx) = mpsc::unbounded_channel::<DeviceNotice>();

        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();
        let task_name = name.clone();
        let span = info_span!("device", line = %name);

        let task = tokio::spawn(
            async move {
                loop {
                    tokio::select! {
                        _ = task_cancel.cancelled() => {
                            debug!("Device task cancelled");
                            break;
                        }
                        request = write_rx.recv() => {
                            let Some(WriteRequest { bytes, completion }) = request else {
                                break;
                            };

                            trace!(len = bytes.len(), "Putting bytes on wire");

                            let result = sink
                                .send(Bytes::from(bytes))
                                .await
                                .map_err(|e| Error::write(&task_name, e));

                            let failed = result.is_err();

                            // A writer that gave up waiting is fine.
                            let _ = completion.send(result);

                            if failed {
                                error!("Serial port error in send, exiting");
                                break;
                            }
                        }
                        from_wire = wire.next() => {
                            match from_wire {
                                Some(Ok(chunk)) => {
                                    trace!(len = chunk.len(), "Bytes from wire");
                                    if notice_tx.send(DeviceNotice::Data(chunk.to_vec())).is_err() {
                                        debug!("Notice receiver gone, exiting");
                                        break;
                                    }
                                }
                                Some(Err(e)) => {
                                    error!(?e, "Serial port read error, exiting");
                                    let _ = notice_tx.send(DeviceNotice::Fault(e.to_string()));
                                    break;
                                }
                                None => {
                                    debug!("Serial port stream ended");
                                    let _ = notice_tx
                                        .send(DeviceNotice::Fault("port disconnected".into()));
                                    break;
                                }
                            }
                        }
                    }
                }
            }
            .instrument(span),
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
        available_lines()
    }
}

/// List the names of the host's serial ports.
pub fn available_lines() -> Result<Vec<LineName>, Error> {
    let ports = tokio_serial::available_ports().map_err(|e| Error::Device {
        line: "<host>".into(),
        reason: e.to_string(),
    })?;

    Ok(ports
        .into_iter()
        .map(|info| LineName::from_host(&info.port_name))
        .collect())
}
