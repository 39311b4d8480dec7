//! Core types for the floor bus controller
//!
//! This module contains the fundamental building blocks used throughout the library.

pub mod error;
pub mod serde;
pub mod types;

pub use self::error::{Error, Result};
pub use self::types::{BusConfig, Color, NodeAddress, NodeStatus};

/// The controller's own address on the bus
pub const MASTER_ADDRESS: u8 = 0x01;

/// Broadcast address, matched by every node
pub const BROADCAST_ADDRESS: u8 = 0xFF;

/// Default baud rate of the RS-485 bus
pub const DEFAULT_BAUD_RATE: u32 = 9600;

/// Status flag: node is mid-fade
pub const FLAG_FADING: u8 = 0x01;

/// Status flag: node's touch sensor is triggered
pub const FLAG_SENSOR_DETECT: u8 = 0x02;

/// Fade durations are sent as multiples of this many milliseconds
pub const FADE_TICK_MS: u64 = 250;
