use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::debug;

use super::frame::{Frame, FrameType};
use crate::core::{Error, NodeAddress};

/// Start-of-frame marker
const SOM: u8 = 0x7E;

/// Bytes before the body: SOM, dest, src, type, body length
const HEADER_LEN: usize = 5;

/// Upper bound on body length; anything larger is line noise
const MAX_BODY_LEN: usize = 32;

/// Frame codec for the RS-485 wire format
///
/// Wire layout: `SOM, dest, src, type, len, body[len], crc`. The CRC-8
/// (Dallas/iButton polynomial, matching the node firmware) covers everything
/// between the SOM and the CRC itself. Frames that fail the CRC or carry an
/// unknown type are dropped here and the decoder resynchronizes at the next
/// SOM, so stage handlers never see an invalid frame.
#[derive(Clone, Default)]
pub struct FrameCodec;

impl FrameCodec {
    /// Creates a new frame codec
    pub fn new() -> Self {
        FrameCodec
    }
}

/// One step of the Dallas/iButton CRC-8
fn crc8_update(mut crc: u8, byte: u8) -> u8 {
    crc ^= byte;
    for _ in 0..8 {
        crc = if crc & 1 != 0 { (crc >> 1) ^ 0x8C } else { crc >> 1 };
    }
    crc
}

fn crc8(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0, |crc, &b| crc8_update(crc, b))
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            // Drop any line noise ahead of the next frame marker
            match src.iter().position(|&b| b == SOM) {
                Some(0) => {}
                Some(start) => src.advance(start),
                None => {
                    src.clear();
                    return Ok(None);
                }
            }

            if src.len() < HEADER_LEN {
                return Ok(None);
            }

            let body_len = src[4] as usize;
            if body_len > MAX_BODY_LEN {
                debug!(body_len, "implausible frame length, resynchronizing");
                src.advance(1);
                continue;
            }

            let frame_len = HEADER_LEN + body_len + 1;
            if src.len() < frame_len {
                return Ok(None);
            }

            let crc = src[frame_len - 1];
            if crc8(&src[1..frame_len - 1]) != crc {
                debug!("frame checksum mismatch, resynchronizing");
                src.advance(1);
                continue;
            }

            let Some(frame_type) = FrameType::from_byte(src[3]) else {
                debug!(byte = src[3], "unknown frame type, resynchronizing");
                src.advance(1);
                continue;
            };

            let dest = NodeAddress(src[1]);
            let src_addr = NodeAddress(src[2]);
            src.advance(HEADER_LEN);
            let body = src.split_to(body_len).freeze();
            src.advance(1); // crc

            return Ok(Some(Frame {
                frame_type,
                src: src_addr,
                dest,
                body,
            }));
        }
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = Error;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        if item.body.len() > MAX_BODY_LEN {
            return Err(Error::codec(format!(
                "frame body too long: {} bytes",
                item.body.len()
            )));
        }

        dst.put_u8(SOM);
        dst.put_u8(item.dest.0);
        dst.put_u8(item.src.0);
        dst.put_u8(item.frame_type.as_byte());
        dst.put_u8(item.body.len() as u8);
        dst.extend_from_slice(&item.body);

        let payload_start = dst.len() - (item.body.len() + 4);
        let crc = crc8(&dst[payload_start..]);
        dst.put_u8(crc);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn round_trip(frame: Frame) -> Frame {
        let mut codec = FrameCodec::new();
        let mut bytes = BytesMut::new();
        codec.encode(frame, &mut bytes).unwrap();
        codec.decode(&mut bytes).unwrap().expect("complete frame")
    }

    #[test]
    fn test_codec_round_trip() {
        let frame = Frame::fade(NodeAddress(9), [0, 0, 255], Duration::from_millis(1000));
        let decoded = round_trip(frame.clone());
        assert_eq!(decoded, frame);
    }

    #[test]
    fn test_codec_empty_body() {
        let frame = Frame::status_request(NodeAddress(3));
        let decoded = round_trip(frame.clone());
        assert_eq!(decoded, frame);
        assert!(decoded.body.is_empty());
    }

    #[test]
    fn test_partial_input_yields_none() {
        let mut codec = FrameCodec::new();
        let mut bytes = BytesMut::new();
        codec
            .encode(Frame::addr_probe(NodeAddress::MASTER), &mut bytes)
            .unwrap();

        let mut partial = BytesMut::from(&bytes[..bytes.len() - 2]);
        assert!(codec.decode(&mut partial).unwrap().is_none());

        // Once the rest arrives, the frame decodes
        partial.extend_from_slice(&bytes[bytes.len() - 2..]);
        assert!(codec.decode(&mut partial).unwrap().is_some());
    }

    #[test]
    fn test_corrupt_checksum_is_dropped() {
        let mut codec = FrameCodec::new();
        let mut bytes = BytesMut::new();
        codec
            .encode(Frame::ack(NodeAddress(2)), &mut bytes)
            .unwrap();

        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        assert!(codec.decode(&mut bytes).unwrap().is_none());
    }

    #[test]
    fn test_resync_through_garbage() {
        let mut codec = FrameCodec::new();
        let mut bytes = BytesMut::new();

        // Leading noise, including a stray SOM, then a valid frame
        bytes.extend_from_slice(&[0x00, 0x13, SOM, 0x02]);
        let frame = Frame::color(NodeAddress(5), [10, 20, 30]);
        codec.encode(frame.clone(), &mut bytes).unwrap();

        let decoded = codec.decode(&mut bytes).unwrap().expect("frame after noise");
        assert_eq!(decoded, frame);
    }

    #[test]
    fn test_unknown_type_is_dropped() {
        let mut codec = FrameCodec::new();
        let mut bytes = BytesMut::new();
        codec
            .encode(Frame::ack(NodeAddress(2)), &mut bytes)
            .unwrap();

        // Rewrite the type byte and fix up the CRC
        bytes[3] = 0x7F;
        let len = bytes.len();
        let crc = crc8(&bytes[1..len - 1]);
        bytes[len - 1] = crc;

        assert!(codec.decode(&mut bytes).unwrap().is_none());
    }
}
