use std::time::Duration;

use bytes::Bytes;

use crate::core::{Color, NodeAddress, FADE_TICK_MS};

/// Frame types used on the bus
///
/// Values match the command table baked into the node firmware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrameType {
    /// Acknowledge a node's address announcement
    Ack = 0x01,
    /// Addressing probe (from master) or address announcement (from node)
    Addr = 0x02,
    /// Set a node's color immediately
    Color = 0x04,
    /// Start a timed fade on a node
    Fade = 0x05,
    /// Poll (from master) or report (from node) a node's status
    Status = 0x06,
}

impl FrameType {
    /// Parses a frame type from its wire byte
    pub fn from_byte(byte: u8) -> Option<FrameType> {
        match byte {
            0x01 => Some(FrameType::Ack),
            0x02 => Some(FrameType::Addr),
            0x04 => Some(FrameType::Color),
            0x05 => Some(FrameType::Fade),
            0x06 => Some(FrameType::Status),
            _ => None,
        }
    }

    /// Returns the wire byte for this frame type
    pub fn as_byte(self) -> u8 {
        self as u8
    }
}

/// One structured message unit on the bus, immutable once parsed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Frame type
    pub frame_type: FrameType,
    /// Address the frame was sent from
    pub src: NodeAddress,
    /// Address the frame is addressed to
    pub dest: NodeAddress,
    /// Frame body
    pub body: Bytes,
}

impl Frame {
    /// Creates a frame originating from the master
    pub fn new(frame_type: FrameType, dest: NodeAddress, body: impl Into<Bytes>) -> Frame {
        Frame {
            frame_type,
            src: NodeAddress::MASTER,
            dest,
            body: body.into(),
        }
    }

    /// Broadcast addressing probe carrying the current highest known address
    ///
    /// Only the unclaimed node directly above `floor` is eligible to answer,
    /// which keeps enumeration contention-free.
    pub fn addr_probe(floor: NodeAddress) -> Frame {
        Frame::new(FrameType::Addr, NodeAddress::BROADCAST, vec![floor.0])
    }

    /// One-shot acknowledgement of a node's address announcement
    pub fn ack(dest: NodeAddress) -> Frame {
        Frame::new(FrameType::Ack, dest, Bytes::new())
    }

    /// One-shot status poll
    pub fn status_request(dest: NodeAddress) -> Frame {
        Frame::new(FrameType::Status, dest, Bytes::new())
    }

    /// Immediate color correction
    pub fn color(dest: NodeAddress, color: Color) -> Frame {
        Frame::new(FrameType::Color, dest, color.to_vec())
    }

    /// Fade correction; the duration is sent as a count of 250 ms ticks
    pub fn fade(dest: NodeAddress, target: Color, duration: Duration) -> Frame {
        let ticks = (duration.as_millis() as u64 + FADE_TICK_MS / 2) / FADE_TICK_MS;
        let body = vec![target[0], target[1], target[2], ticks.min(u8::MAX as u64) as u8];
        Frame::new(FrameType::Fade, dest, body)
    }

    /// Returns whether the frame was sent by the controller itself
    ///
    /// The bus is half-duplex, so the controller hears its own transmissions.
    pub fn is_from_master(&self) -> bool {
        self.src == NodeAddress::MASTER
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_type_round_trip() {
        for frame_type in [
            FrameType::Ack,
            FrameType::Addr,
            FrameType::Color,
            FrameType::Fade,
            FrameType::Status,
        ] {
            assert_eq!(FrameType::from_byte(frame_type.as_byte()), Some(frame_type));
        }
        assert_eq!(FrameType::from_byte(0x00), None);
        assert_eq!(FrameType::from_byte(0x7F), None);
    }

    #[test]
    fn test_addr_probe_is_broadcast() {
        let probe = Frame::addr_probe(NodeAddress::MASTER);
        assert_eq!(probe.dest, NodeAddress::BROADCAST);
        assert_eq!(probe.src, NodeAddress::MASTER);
        assert_eq!(&probe.body[..], &[NodeAddress::MASTER.0]);
    }

    #[test]
    fn test_fade_duration_ticks() {
        let frame = Frame::fade(NodeAddress(2), [0, 0, 255], Duration::from_millis(1000));
        assert_eq!(&frame.body[..], &[0, 0, 255, 4]);

        // Rounded, not truncated
        let frame = Frame::fade(NodeAddress(2), [1, 2, 3], Duration::from_millis(1100));
        assert_eq!(frame.body[3], 4);
        let frame = Frame::fade(NodeAddress(2), [1, 2, 3], Duration::from_millis(1200));
        assert_eq!(frame.body[3], 5);

        // Clamped to a single byte
        let frame = Frame::fade(NodeAddress(2), [1, 2, 3], Duration::from_secs(120));
        assert_eq!(frame.body[3], u8::MAX);
    }
}
