use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{Error, Result, FLAG_FADING, FLAG_SENSOR_DETECT};

/// An RGB color as sent on the wire
pub type Color = [u8; 3];

/// Address of a node on the multi-drop bus
///
/// Two values are reserved: the controller itself and the broadcast
/// address. Everything strictly between them is a valid node address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeAddress(pub u8);

impl NodeAddress {
    /// The controller's own (master) address
    pub const MASTER: NodeAddress = NodeAddress(super::MASTER_ADDRESS);

    /// The broadcast address, matched by every node
    pub const BROADCAST: NodeAddress = NodeAddress(super::BROADCAST_ADDRESS);

    /// Returns whether this is an assignable node address
    pub fn is_node(&self) -> bool {
        self.0 > super::MASTER_ADDRESS && self.0 < super::BROADCAST_ADDRESS
    }

    /// Returns the next address up the bus
    pub fn next(&self) -> NodeAddress {
        NodeAddress(self.0.saturating_add(1))
    }
}

impl fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Status reported by a node in reply to a STATUS poll
///
/// Parsed wholesale from the reply body and overwritten wholesale on each
/// successful poll; individual fields are never merged across polls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeStatus {
    /// Whether the node is currently mid-fade
    pub fading: bool,
    /// Whether the node's touch sensor is triggered
    pub sensor: bool,
    /// The color the node is currently showing
    pub color: Color,
    /// The color the node is fading toward (only meaningful while fading)
    pub target: Color,
}

impl NodeStatus {
    /// Parses a status record from a STATUS reply body
    ///
    /// Body layout: `[flags, r, g, b]`, extended with the fade target
    /// `[tr, tg, tb]` while the node is fading.
    pub fn from_body(body: &[u8]) -> Result<Self> {
        if body.len() < 4 {
            return Err(Error::protocol(format!(
                "status body too short: {} bytes",
                body.len()
            )));
        }

        let flags = body[0];
        let fading = flags & FLAG_FADING != 0;
        let sensor = flags & FLAG_SENSOR_DETECT != 0;
        let color = [body[1], body[2], body[3]];

        // A node that is not fading has no meaningful target; report its
        // current color so comparisons collapse to the current color.
        let target = if fading {
            if body.len() < 7 {
                return Err(Error::protocol("fading status body missing fade target"));
            }
            [body[4], body[5], body[6]]
        } else {
            color
        };

        Ok(NodeStatus {
            fading,
            sensor,
            color,
            target,
        })
    }
}

/// Configuration for the bus controller
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    /// Serial port device path
    pub port: String,
    /// Baud rate of the RS-485 bus
    pub baud_rate: u32,
    /// Interval between retransmissions of the addressing probe
    #[serde(serialize_with = "super::serde::serialize_duration")]
    #[serde(deserialize_with = "super::serde::deserialize_duration")]
    pub ack_timeout: Duration,
    /// How long to wait for a status reply before retrying
    #[serde(serialize_with = "super::serde::serialize_duration")]
    #[serde(deserialize_with = "super::serde::deserialize_duration")]
    pub status_timeout: Duration,
    /// How long the addressing stage waits for a new node before advancing
    #[serde(serialize_with = "super::serde::serialize_duration")]
    #[serde(deserialize_with = "super::serde::deserialize_duration")]
    pub addressing_timeout: Duration,
    /// Status polls sent to a node before it is skipped for the pass
    pub status_retry_limit: u8,
    /// Capacity of the internal frame and event channels
    pub channel_capacity: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        BusConfig {
            port: "/dev/ttyUSB0".to_string(),
            baud_rate: super::DEFAULT_BAUD_RATE,
            ack_timeout: Duration::from_millis(100),
            status_timeout: Duration::from_millis(500),
            addressing_timeout: Duration::from_millis(1000),
            status_retry_limit: 2,
            channel_capacity: 64,
        }
    }
}
