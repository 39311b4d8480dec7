//! Bus transport and scheduling
//!
//! This module wires the protocol engine to a physical serial port and
//! provides the timing primitives the engine schedules with.

pub mod scheduler;
pub mod transport;

pub use self::scheduler::{Retransmit, Timeout};
pub use self::transport::SerialTransport;

use tokio::sync::mpsc;

use crate::core::{BusConfig, Result};
use crate::protocol::{BusEngine, BusEvent};
use crate::registry::CellRegistry;

/// Owns one bus session: a serial transport plus the protocol engine
pub struct BusManager {
    config: BusConfig,
}

impl BusManager {
    /// Creates a manager for the configured port
    pub fn new(config: BusConfig) -> Self {
        BusManager { config }
    }

    /// Opens the port and runs the protocol cycle until the transport fails
    ///
    /// Discoveries are reported on `events`; the receiver may be dropped by
    /// callers that do not care.
    pub async fn run<R>(self, registry: R, events: mpsc::Sender<BusEvent>) -> Result<()>
    where
        R: CellRegistry + Send + 'static,
    {
        let (frames_tx, frames_rx) = mpsc::channel(self.config.channel_capacity);
        let (out_tx, out_rx) = mpsc::channel(self.config.channel_capacity);

        let transport = SerialTransport::spawn(&self.config, frames_tx, out_rx)?;
        let engine = BusEngine::new(self.config, registry, frames_rx, out_tx, events);

        tokio::select! {
            result = engine.run() => result,
            result = transport.join() => result,
        }
    }
}
