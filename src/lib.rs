//! floorbus: a controller for addressable LED floor nodes on a shared
//! half-duplex RS-485 bus.
//!
//! A single master continuously cycles through three stages: enumerating
//! nodes by ascending-address probing, polling each node's status, and
//! pushing corrective color/fade commands wherever a node has drifted from
//! its desired state.

pub mod bus;
pub mod core;
pub mod protocol;
pub mod registry;

// Re-export commonly used items
pub use self::bus::BusManager;
pub use self::core::{BusConfig, Error, NodeAddress, NodeStatus, Result};
pub use self::protocol::{BusEvent, Frame, FrameType, Stage};
pub use self::registry::{CellRegistry, CellState, MemoryRegistry};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
