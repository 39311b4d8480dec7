//! Serial transport for the RS-485 bus
//!
//! Opens the port and bridges its blocking byte I/O to the engine's frame
//! channels: a reader task feeds raw bytes through the frame codec, a
//! writer task drains outbound frames onto the wire. Transport failure is
//! fatal and propagates out of [`SerialTransport::join`].

use std::io::{Read, Write};
use std::time::Duration;

use bytes::BytesMut;
use serialport::SerialPort;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::{Decoder, Encoder};
use tracing::{debug, info};

use crate::core::{BusConfig, Error, Result};
use crate::protocol::{Frame, FrameCodec};

/// Poll interval for the blocking serial read
const READ_TIMEOUT: Duration = Duration::from_millis(100);

/// A running serial transport
pub struct SerialTransport {
    reader: JoinHandle<Result<()>>,
    writer: JoinHandle<Result<()>>,
}

impl SerialTransport {
    /// Opens the configured port and spawns the read/write bridge tasks
    ///
    /// Decoded inbound frames are sent to `frames`; frames received on
    /// `outbound` are encoded and written to the wire in order.
    pub fn spawn(
        config: &BusConfig,
        frames: mpsc::Sender<Frame>,
        outbound: mpsc::Receiver<Frame>,
    ) -> Result<SerialTransport> {
        let port = serialport::new(&config.port, config.baud_rate)
            .timeout(READ_TIMEOUT)
            .open()
            .map_err(|e| Error::transport(format!("failed to open {}: {}", config.port, e)))?;

        let write_port = port
            .try_clone()
            .map_err(|e| Error::transport(format!("failed to clone port handle: {}", e)))?;

        info!(port = %config.port, baud = config.baud_rate, "serial port open");

        let reader = tokio::task::spawn_blocking(move || read_loop(port, frames));
        let writer = tokio::task::spawn_blocking(move || write_loop(write_port, outbound));

        Ok(SerialTransport { reader, writer })
    }

    /// Waits for either bridge task to stop and returns its outcome
    ///
    /// Either side stopping means the bus is gone, so the first result wins.
    pub async fn join(self) -> Result<()> {
        let outcome = tokio::select! {
            reader = self.reader => reader,
            writer = self.writer => writer,
        };

        outcome.map_err(|e| Error::transport(format!("transport task failed: {}", e)))?
    }
}

/// Feeds port bytes through the codec until the engine goes away
fn read_loop(mut port: Box<dyn SerialPort>, frames: mpsc::Sender<Frame>) -> Result<()> {
    let mut codec = FrameCodec::new();
    let mut buffer = BytesMut::with_capacity(256);
    let mut chunk = [0u8; 64];

    loop {
        match port.read(&mut chunk) {
            Ok(0) => return Err(Error::transport("serial port closed")),
            Ok(n) => {
                buffer.extend_from_slice(&chunk[..n]);
                while let Some(frame) = codec.decode(&mut buffer)? {
                    if frames.blocking_send(frame).is_err() {
                        debug!("engine dropped its frame receiver, reader stopping");
                        return Ok(());
                    }
                }
            }
            // Idle bus; keep polling
            Err(ref e) if e.kind() == std::io::ErrorKind::TimedOut => continue,
            Err(e) => return Err(Error::transport(format!("serial read failed: {}", e))),
        }
    }
}

/// Writes outbound frames to the wire in channel order
fn write_loop(mut port: Box<dyn SerialPort>, mut outbound: mpsc::Receiver<Frame>) -> Result<()> {
    let mut codec = FrameCodec::new();
    let mut buffer = BytesMut::with_capacity(64);

    while let Some(frame) = outbound.blocking_recv() {
        buffer.clear();
        codec.encode(frame, &mut buffer)?;
        port.write_all(&buffer)
            .map_err(|e| Error::transport(format!("serial write failed: {}", e)))?;
        port.flush()
            .map_err(|e| Error::transport(format!("serial flush failed: {}", e)))?;
    }

    debug!("engine dropped its outbound sender, writer stopping");
    Ok(())
}
