//! Floor bus controller daemon
//!
//! Opens the RS-485 serial port given on the command line and runs the
//! discovery/status/update cycle until the transport fails.

use tokio::sync::mpsc;
use tracing::{error, info};

use floorbus::{BusConfig, BusEvent, BusManager, MemoryRegistry, Result};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let mut config = BusConfig::default();
    let mut args = std::env::args().skip(1);
    if let Some(port) = args.next() {
        config.port = port;
    }
    if let Some(baud) = args.next() {
        config.baud_rate = baud
            .parse()
            .map_err(|_| floorbus::Error::invalid_state(format!("bad baud rate: {}", baud)))?;
    }

    let (events_tx, mut events_rx) = mpsc::channel(64);
    tokio::spawn(async move {
        while let Some(event) = events_rx.recv().await {
            match event {
                BusEvent::NodeDiscovered(addr) => info!(%addr, "node discovered"),
                BusEvent::AddressingComplete { nodes } => {
                    info!(nodes, "floor enumerated, entering polling cycle");
                }
            }
        }
    });

    let manager = BusManager::new(config);
    if let Err(e) = manager.run(MemoryRegistry::new(), events_tx).await {
        error!(error = %e, "bus controller stopped");
        return Err(e);
    }

    Ok(())
}
