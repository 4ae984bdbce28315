//! On-wire segment and control message formats.
//!
//! Everything in this module describes plaintext layouts; encryption of the
//! full encoded buffer happens in [`crate::cipher`]. All integers are
//! big-endian.
//!
//! # Segment layout
//!
//! ```text
//! ┌────────┬──────────┬───────┬───────┬─────────────┬───────┬─────────┐
//! │ stream │ frame_id │ index │ count │ payload_len │ flags │ payload │
//! │ 1 byte │ 4 bytes  │ 2     │ 2     │ 2           │ 1     │ var     │
//! └────────┴──────────┴───────┴───────┴─────────────┴───────┴─────────┘
//! ```
//!
//! Control messages travel as the payload of a segment with
//! `stream = Control`; the frame id, index and count fields are zero.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::WireError;

/// Segment header size in bytes.
pub const SEGMENT_HEADER_SIZE: usize = 12;

/// Maximum payload bytes per segment, chosen to keep the sealed datagram
/// within a common path MTU.
pub const MAX_PAYLOAD: usize = 1316;

/// Fixed number of segments per logical audio frame.
pub const AUDIO_GROUP_SIZE: u16 = 3;

/// Retransmission flag (bit 0 of the segment flags byte).
const FLAG_RETRANSMIT: u8 = 0x01;

/// Which stream a segment belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    Video,
    Audio,
    Control,
}

impl StreamKind {
    pub fn as_u8(self) -> u8 {
        match self {
            StreamKind::Video => 0,
            StreamKind::Audio => 1,
            StreamKind::Control => 2,
        }
    }

    pub fn from_u8(value: u8) -> Result<Self, WireError> {
        match value {
            0 => Ok(StreamKind::Video),
            1 => Ok(StreamKind::Audio),
            2 => Ok(StreamKind::Control),
            other => Err(WireError::UnknownStream(other)),
        }
    }
}

/// The unit on the wire: one slice of a logical frame.
///
/// Segments are immutable once constructed by the sender; a retransmission
/// carries identical id, index, count and payload with the retransmit flag
/// set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub stream: StreamKind,
    pub frame_id: i32,
    pub index: u16,
    pub count: u16,
    pub retransmit: bool,
    pub payload: Bytes,
}

impl Segment {
    /// Encode into the plaintext wire layout.
    pub fn encode(&self) -> Bytes {
        debug_assert!(self.payload.len() <= MAX_PAYLOAD);

        let mut buf = BytesMut::with_capacity(SEGMENT_HEADER_SIZE + self.payload.len());
        buf.put_u8(self.stream.as_u8());
        buf.put_i32(self.frame_id);
        buf.put_u16(self.index);
        buf.put_u16(self.count);
        buf.put_u16(self.payload.len() as u16);
        buf.put_u8(if self.retransmit { FLAG_RETRANSMIT } else { 0 });
        buf.put_slice(&self.payload);
        buf.freeze()
    }

    /// Decode from a plaintext buffer.
    pub fn decode(data: &[u8]) -> Result<Self, WireError> {
        if data.len() < SEGMENT_HEADER_SIZE {
            return Err(WireError::Truncated {
                need: SEGMENT_HEADER_SIZE,
                have: data.len(),
            });
        }

        let mut buf = data;
        let stream = StreamKind::from_u8(buf.get_u8())?;
        let frame_id = buf.get_i32();
        let index = buf.get_u16();
        let count = buf.get_u16();
        let payload_len = buf.get_u16() as usize;
        let flags = buf.get_u8();

        if payload_len > MAX_PAYLOAD {
            return Err(WireError::PayloadTooLarge(payload_len));
        }
        if buf.remaining() < payload_len {
            return Err(WireError::Truncated {
                need: payload_len,
                have: buf.remaining(),
            });
        }

        Ok(Segment {
            stream,
            frame_id,
            index,
            count,
            retransmit: flags & FLAG_RETRANSMIT != 0,
            payload: Bytes::copy_from_slice(&buf[..payload_len]),
        })
    }

    /// Wrap a control message in a segment envelope.
    pub fn control(message: &ControlMessage) -> Self {
        Segment {
            stream: StreamKind::Control,
            frame_id: 0,
            index: 0,
            count: 1,
            retransmit: false,
            payload: message.encode(),
        }
    }
}

/// Marker byte at the start of every video frame payload.
///
/// Written by the sender before segmentation; the video scheduler reads it
/// to drive keyframe catch-up and to skip unchanged-screen frames.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameMarker {
    /// Self-contained frame, decodable without references.
    pub keyframe: bool,
    /// The screen did not change; there is no picture to render.
    pub empty: bool,
}

impl FrameMarker {
    const KEYFRAME: u8 = 0x01;
    const EMPTY: u8 = 0x02;

    pub fn encode(self) -> u8 {
        let mut b = 0;
        if self.keyframe {
            b |= Self::KEYFRAME;
        }
        if self.empty {
            b |= Self::EMPTY;
        }
        b
    }

    pub fn decode(byte: u8) -> Self {
        FrameMarker {
            keyframe: byte & Self::KEYFRAME != 0,
            empty: byte & Self::EMPTY != 0,
        }
    }

    /// Read the marker off a reassembled video frame payload.
    pub fn from_frame(payload: &[u8]) -> Self {
        payload.first().copied().map(Self::decode).unwrap_or_default()
    }
}

/// Short control messages exchanged between the endpoints.
///
/// `Clipboard` is carried on the reliable socket only; everything else rides
/// the datagram path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlMessage {
    Ping(u32),
    Pong(u32),
    Nack {
        stream: StreamKind,
        frame_id: i32,
        index: u16,
    },
    KeyframeRequest {
        reinitialize: bool,
    },
    Bitrate {
        bps: u32,
        burst_bps: u32,
    },
    Dimensions {
        width: u16,
        height: u16,
        dpi: u16,
        codec_id: u8,
    },
    Clipboard(Bytes),
}

impl ControlMessage {
    const TAG_PING: u8 = 1;
    const TAG_PONG: u8 = 2;
    const TAG_NACK: u8 = 3;
    const TAG_KEYFRAME_REQUEST: u8 = 4;
    const TAG_BITRATE: u8 = 5;
    const TAG_DIMENSIONS: u8 = 6;
    const TAG_CLIPBOARD: u8 = 7;

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(16);
        match self {
            ControlMessage::Ping(id) => {
                buf.put_u8(Self::TAG_PING);
                buf.put_u32(*id);
            }
            ControlMessage::Pong(id) => {
                buf.put_u8(Self::TAG_PONG);
                buf.put_u32(*id);
            }
            ControlMessage::Nack { stream, frame_id, index } => {
                buf.put_u8(Self::TAG_NACK);
                buf.put_u8(stream.as_u8());
                buf.put_i32(*frame_id);
                buf.put_u16(*index);
            }
            ControlMessage::KeyframeRequest { reinitialize } => {
                buf.put_u8(Self::TAG_KEYFRAME_REQUEST);
                buf.put_u8(u8::from(*reinitialize));
            }
            ControlMessage::Bitrate { bps, burst_bps } => {
                buf.put_u8(Self::TAG_BITRATE);
                buf.put_u32(*bps);
                buf.put_u32(*burst_bps);
            }
            ControlMessage::Dimensions { width, height, dpi, codec_id } => {
                buf.put_u8(Self::TAG_DIMENSIONS);
                buf.put_u16(*width);
                buf.put_u16(*height);
                buf.put_u16(*dpi);
                buf.put_u8(*codec_id);
            }
            ControlMessage::Clipboard(payload) => {
                buf.put_u8(Self::TAG_CLIPBOARD);
                buf.put_u32(payload.len() as u32);
                buf.put_slice(payload);
            }
        }
        buf.freeze()
    }

    pub fn decode(data: &[u8]) -> Result<Self, WireError> {
        let mut buf = data;
        if buf.remaining() < 1 {
            return Err(WireError::Truncated { need: 1, have: 0 });
        }
        let tag = buf.get_u8();

        let need = |need: usize, buf: &&[u8]| -> Result<(), WireError> {
            if buf.remaining() < need {
                Err(WireError::Truncated { need, have: buf.remaining() })
            } else {
                Ok(())
            }
        };

        match tag {
            Self::TAG_PING => {
                need(4, &buf)?;
                Ok(ControlMessage::Ping(buf.get_u32()))
            }
            Self::TAG_PONG => {
                need(4, &buf)?;
                Ok(ControlMessage::Pong(buf.get_u32()))
            }
            Self::TAG_NACK => {
                need(7, &buf)?;
                let stream = StreamKind::from_u8(buf.get_u8())?;
                Ok(ControlMessage::Nack {
                    stream,
                    frame_id: buf.get_i32(),
                    index: buf.get_u16(),
                })
            }
            Self::TAG_KEYFRAME_REQUEST => {
                need(1, &buf)?;
                Ok(ControlMessage::KeyframeRequest {
                    reinitialize: buf.get_u8() != 0,
                })
            }
            Self::TAG_BITRATE => {
                need(8, &buf)?;
                Ok(ControlMessage::Bitrate {
                    bps: buf.get_u32(),
                    burst_bps: buf.get_u32(),
                })
            }
            Self::TAG_DIMENSIONS => {
                need(7, &buf)?;
                Ok(ControlMessage::Dimensions {
                    width: buf.get_u16(),
                    height: buf.get_u16(),
                    dpi: buf.get_u16(),
                    codec_id: buf.get_u8(),
                })
            }
            Self::TAG_CLIPBOARD => {
                need(4, &buf)?;
                let len = buf.get_u32() as usize;
                need(len, &buf)?;
                Ok(ControlMessage::Clipboard(Bytes::copy_from_slice(&buf[..len])))
            }
            other => Err(WireError::UnknownControl(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_segment() -> Segment {
        Segment {
            stream: StreamKind::Video,
            frame_id: 42,
            index: 3,
            count: 10,
            retransmit: false,
            payload: Bytes::from_static(b"encoded picture slice"),
        }
    }

    #[test]
    fn test_segment_encode_decode() {
        let segment = sample_segment();
        let wire = segment.encode();
        let decoded = Segment::decode(&wire).unwrap();
        assert_eq!(decoded, segment);
    }

    #[test]
    fn test_segment_retransmit_flag() {
        let mut segment = sample_segment();
        segment.retransmit = true;
        let decoded = Segment::decode(&segment.encode()).unwrap();
        assert!(decoded.retransmit);
        assert_eq!(decoded.frame_id, segment.frame_id);
        assert_eq!(decoded.index, segment.index);
        assert_eq!(decoded.payload, segment.payload);
    }

    #[test]
    fn test_segment_truncated_header() {
        let wire = sample_segment().encode();
        let err = Segment::decode(&wire[..SEGMENT_HEADER_SIZE - 1]).unwrap_err();
        assert!(matches!(err, WireError::Truncated { .. }));
    }

    #[test]
    fn test_segment_truncated_payload() {
        let wire = sample_segment().encode();
        let err = Segment::decode(&wire[..wire.len() - 1]).unwrap_err();
        assert!(matches!(err, WireError::Truncated { .. }));
    }

    #[test]
    fn test_segment_unknown_stream() {
        let mut wire = sample_segment().encode().to_vec();
        wire[0] = 9;
        assert_eq!(Segment::decode(&wire).unwrap_err(), WireError::UnknownStream(9));
    }

    #[test]
    fn test_negative_frame_id_roundtrip() {
        let mut segment = sample_segment();
        segment.frame_id = -1;
        let decoded = Segment::decode(&segment.encode()).unwrap();
        assert_eq!(decoded.frame_id, -1);
    }

    #[test]
    fn test_control_messages_roundtrip() {
        let messages = [
            ControlMessage::Ping(7),
            ControlMessage::Pong(7),
            ControlMessage::Nack {
                stream: StreamKind::Audio,
                frame_id: 30,
                index: 4,
            },
            ControlMessage::KeyframeRequest { reinitialize: true },
            ControlMessage::Bitrate {
                bps: 10_000_000,
                burst_bps: 100_000_000,
            },
            ControlMessage::Dimensions {
                width: 2560,
                height: 1440,
                dpi: 192,
                codec_id: 1,
            },
            ControlMessage::Clipboard(Bytes::from_static(b"copied text")),
        ];

        for message in &messages {
            let decoded = ControlMessage::decode(&message.encode()).unwrap();
            assert_eq!(&decoded, message);
        }
    }

    #[test]
    fn test_control_envelope() {
        let message = ControlMessage::Nack {
            stream: StreamKind::Video,
            frame_id: 100,
            index: 2,
        };
        let segment = Segment::control(&message);
        assert_eq!(segment.stream, StreamKind::Control);

        let wire = segment.encode();
        let decoded = Segment::decode(&wire).unwrap();
        assert_eq!(ControlMessage::decode(&decoded.payload).unwrap(), message);
    }

    #[test]
    fn test_control_unknown_tag() {
        assert_eq!(
            ControlMessage::decode(&[200]).unwrap_err(),
            WireError::UnknownControl(200)
        );
    }

    #[test]
    fn test_frame_marker_bits() {
        let marker = FrameMarker { keyframe: true, empty: false };
        assert_eq!(FrameMarker::decode(marker.encode()), marker);

        let empty = FrameMarker { keyframe: false, empty: true };
        assert_eq!(FrameMarker::decode(empty.encode()), empty);

        assert_eq!(FrameMarker::from_frame(&[]), FrameMarker::default());
        assert!(FrameMarker::from_frame(&[0x01, 0xFF]).keyframe);
    }
}
