//! Frame segmentation with burst pacing.
//!
//! A logical frame is split into ordered, size-bounded segments, sealed and
//! handed to the datagram socket in index order. Outgoing segments are kept
//! in a [`RetransmitStore`] keyed by frame id so NACKs can be served from
//! the stored copy without re-encoding the frame.

use std::net::SocketAddr;
use std::thread;
use std::time::{Duration, Instant};

use bytes::Bytes;
use log::{debug, warn};

use crate::cipher::PacketCipher;
use crate::error::SocketError;
use crate::socket::MediaSocket;
use crate::wire::{Segment, StreamKind, MAX_PAYLOAD};

/// Allowance above the pacing budget before the sender throttles.
const PACING_SLACK_BYTES: usize = 5000;

/// Sleep granularity while throttled.
const PACING_SLEEP: Duration = Duration::from_millis(1);

/// True when the sender is ahead of its pacing budget.
///
/// The budget is `elapsed * burst_bitrate / 8` bytes with a fixed slack; a
/// non-positive `burst_bitrate` disables pacing entirely.
fn over_budget(bytes_sent: usize, elapsed: Duration, burst_bitrate: i64) -> bool {
    if burst_bitrate <= 0 {
        return false;
    }
    let budget = elapsed.as_secs_f64() * burst_bitrate as f64 / 8.0;
    bytes_sent.saturating_sub(PACING_SLACK_BYTES) as f64 > budget
}

/// One sender-side frame retained for retransmission.
struct StoredFrame {
    frame_id: i32,
    segments: Vec<Segment>,
}

/// Ring of recently sent frames, indexed by `frame_id % capacity`.
///
/// A newer frame mapping to the same slot displaces the older one; NACKs for
/// displaced frames are no longer servable and are ignored.
pub struct RetransmitStore {
    slots: Vec<Option<StoredFrame>>,
}

impl RetransmitStore {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0);
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        RetransmitStore { slots }
    }

    fn slot_index(&self, frame_id: i32) -> usize {
        frame_id.rem_euclid(self.slots.len() as i32) as usize
    }

    /// Retain the segments of a freshly sent frame.
    pub fn store(&mut self, frame_id: i32, segments: Vec<Segment>) {
        let index = self.slot_index(frame_id);
        self.slots[index] = Some(StoredFrame { frame_id, segments });
    }

    /// Look up one stored segment, if the frame is still buffered.
    pub fn lookup(&self, frame_id: i32, index: u16) -> Option<&Segment> {
        let slot = self.slots[self.slot_index(frame_id)].as_ref()?;
        if slot.frame_id != frame_id {
            return None;
        }
        slot.segments.get(index as usize)
    }
}

/// Splits frames into sealed datagrams and paces them onto the socket.
pub struct Segmenter<'a> {
    cipher: &'a PacketCipher,
    socket: &'a MediaSocket,
    peer: SocketAddr,
}

impl<'a> Segmenter<'a> {
    pub fn new(cipher: &'a PacketCipher, socket: &'a MediaSocket, peer: SocketAddr) -> Self {
        Segmenter { cipher, socket, peer }
    }

    /// Split `frame` into segments, seal and send each in index order, and
    /// retain copies in `store` for NACK service.
    ///
    /// Returns the number of segments sent. An empty frame still produces a
    /// single empty segment so the receiver learns the frame exists.
    pub fn emit(
        &self,
        frame: &[u8],
        frame_id: i32,
        stream: StreamKind,
        burst_bitrate: i64,
        store: &mut RetransmitStore,
    ) -> Result<u16, SocketError> {
        let count = frame.len().div_ceil(MAX_PAYLOAD).max(1) as u16;

        let mut segments = Vec::with_capacity(count as usize);
        let started = Instant::now();
        let mut bytes_sent = 0usize;

        for index in 0..count {
            while over_budget(bytes_sent, started.elapsed(), burst_bitrate) {
                thread::sleep(PACING_SLEEP);
            }

            let start = index as usize * MAX_PAYLOAD;
            let end = (start + MAX_PAYLOAD).min(frame.len());
            let segment = Segment {
                stream,
                frame_id,
                index,
                count,
                retransmit: false,
                payload: Bytes::copy_from_slice(&frame[start..end]),
            };

            let datagram = self.cipher.seal_datagram(&segment.encode());
            self.socket.send_to(self.peer, &datagram)?;
            bytes_sent += datagram.len();
            segments.push(segment);
        }

        store.store(frame_id, segments);
        Ok(count)
    }

    /// Serve a NACK: re-send the named segment with the retransmission flag
    /// set, if it is still buffered.
    ///
    /// Returns whether the segment could be served. The stored payload is
    /// sent byte-identically; only the flag differs from the original.
    pub fn handle_nack(
        &self,
        store: &RetransmitStore,
        frame_id: i32,
        index: u16,
    ) -> Result<bool, SocketError> {
        match store.lookup(frame_id, index) {
            Some(segment) => {
                let mut replay = segment.clone();
                replay.retransmit = true;
                let datagram = self.cipher.seal_datagram(&replay.encode());
                self.socket.send_to(self.peer, &datagram)?;
                debug!("served NACK for frame {} index {}", frame_id, index);
                Ok(true)
            }
            None => {
                warn!("NACKed frame {} index {} no longer buffered", frame_id, index);
                Ok(false)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cipher::KEY_SIZE;
    use crate::socket::{RecvTimeout, RECV_BUFFER_SIZE};

    fn test_cipher() -> PacketCipher {
        PacketCipher::new([9u8; KEY_SIZE])
    }

    fn socket_pair() -> (MediaSocket, MediaSocket, SocketAddr) {
        let mut rx = MediaSocket::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        rx.set_timeout(RecvTimeout::After(Duration::from_millis(500))).unwrap();
        let tx = MediaSocket::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let peer = rx.local_addr().unwrap();
        (tx, rx, peer)
    }

    fn recv_segment(cipher: &PacketCipher, rx: &MediaSocket) -> Segment {
        let mut buf = [0u8; RECV_BUFFER_SIZE];
        let (len, _) = rx.recv(&mut buf).unwrap();
        let plain = cipher.open_datagram(&buf[..len]).unwrap();
        Segment::decode(&plain).unwrap()
    }

    #[test]
    fn test_single_segment_frame() {
        let cipher = test_cipher();
        let (tx, rx, peer) = socket_pair();
        let segmenter = Segmenter::new(&cipher, &tx, peer);
        let mut store = RetransmitStore::new(16);

        let count = segmenter
            .emit(b"one small frame", 1, StreamKind::Video, 0, &mut store)
            .unwrap();
        assert_eq!(count, 1);

        let segment = recv_segment(&cipher, &rx);
        assert_eq!(segment.frame_id, 1);
        assert_eq!(segment.index, 0);
        assert_eq!(segment.count, 1);
        assert!(!segment.retransmit);
        assert_eq!(&segment.payload[..], b"one small frame");
    }

    #[test]
    fn test_multi_segment_order_and_reassembly() {
        let cipher = test_cipher();
        let (tx, rx, peer) = socket_pair();
        let segmenter = Segmenter::new(&cipher, &tx, peer);
        let mut store = RetransmitStore::new(16);

        let frame: Vec<u8> = (0..3 * MAX_PAYLOAD + 10).map(|i| i as u8).collect();
        let count = segmenter.emit(&frame, 7, StreamKind::Video, 0, &mut store).unwrap();
        assert_eq!(count, 4);

        let mut reassembled = Vec::new();
        for expected_index in 0..count {
            let segment = recv_segment(&cipher, &rx);
            assert_eq!(segment.index, expected_index);
            assert_eq!(segment.count, 4);
            reassembled.extend_from_slice(&segment.payload);
        }
        assert_eq!(reassembled, frame);
    }

    #[test]
    fn test_empty_frame_sends_one_segment() {
        let cipher = test_cipher();
        let (tx, rx, peer) = socket_pair();
        let segmenter = Segmenter::new(&cipher, &tx, peer);
        let mut store = RetransmitStore::new(16);

        let count = segmenter.emit(b"", 2, StreamKind::Video, 0, &mut store).unwrap();
        assert_eq!(count, 1);

        let segment = recv_segment(&cipher, &rx);
        assert!(segment.payload.is_empty());
        assert_eq!(segment.count, 1);
    }

    #[test]
    fn test_nack_replays_identical_payload() {
        let cipher = test_cipher();
        let (tx, rx, peer) = socket_pair();
        let segmenter = Segmenter::new(&cipher, &tx, peer);
        let mut store = RetransmitStore::new(16);

        let frame: Vec<u8> = (0..2 * MAX_PAYLOAD).map(|i| (i % 251) as u8).collect();
        segmenter.emit(&frame, 30, StreamKind::Video, 0, &mut store).unwrap();

        let original_0 = recv_segment(&cipher, &rx);
        let original_1 = recv_segment(&cipher, &rx);

        assert!(segmenter.handle_nack(&store, 30, 1).unwrap());
        let replay = recv_segment(&cipher, &rx);

        assert!(replay.retransmit);
        assert_eq!(replay.frame_id, original_1.frame_id);
        assert_eq!(replay.index, original_1.index);
        assert_eq!(replay.payload, original_1.payload);
        assert_ne!(replay.payload, original_0.payload);
    }

    #[test]
    fn test_nack_for_displaced_frame_not_served() {
        let cipher = test_cipher();
        let (tx, rx, peer) = socket_pair();
        let segmenter = Segmenter::new(&cipher, &tx, peer);
        let mut store = RetransmitStore::new(4);

        segmenter.emit(b"old", 1, StreamKind::Video, 0, &mut store).unwrap();
        // Frame 5 maps to the same slot as frame 1 in a 4-slot store.
        segmenter.emit(b"new", 5, StreamKind::Video, 0, &mut store).unwrap();
        recv_segment(&cipher, &rx);
        recv_segment(&cipher, &rx);

        assert!(!segmenter.handle_nack(&store, 1, 0).unwrap());
        assert!(segmenter.handle_nack(&store, 5, 0).unwrap());
    }

    #[test]
    fn test_store_lookup_bounds() {
        let mut store = RetransmitStore::new(8);
        store.store(
            3,
            vec![Segment {
                stream: StreamKind::Audio,
                frame_id: 3,
                index: 0,
                count: 1,
                retransmit: false,
                payload: Bytes::from_static(b"pcm"),
            }],
        );

        assert!(store.lookup(3, 0).is_some());
        assert!(store.lookup(3, 1).is_none());
        assert!(store.lookup(11, 0).is_none());
    }

    #[test]
    fn test_pacing_budget() {
        // Pacing disabled.
        assert!(!over_budget(1_000_000, Duration::ZERO, 0));
        assert!(!over_budget(1_000_000, Duration::ZERO, -1));

        // Within the slack allowance.
        assert!(!over_budget(PACING_SLACK_BYTES, Duration::ZERO, 8_000));

        // One second at 8 kbps allows 1000 bytes plus slack.
        let burst = 8_000;
        assert!(!over_budget(PACING_SLACK_BYTES + 999, Duration::from_secs(1), burst));
        assert!(over_budget(PACING_SLACK_BYTES + 1_001, Duration::from_secs(1), burst));
    }
}
