//! Receive-side NACK engine.
//!
//! Periodically scans the reassembly ring for gaps and turns eligible ones
//! into `Nack` control messages. Scans are globally rate-limited and each
//! scan issues at most a small budget of requests, so a burst of loss never
//! floods the reverse path.

use std::time::{Duration, Instant};

use log::info;

use crate::wire::{ControlMessage, StreamKind};

use super::ring::RingBuffer;

/// Minimum spacing between gap scans, and between NACKs touching the same
/// frame.
pub const NACK_SCAN_INTERVAL: Duration = Duration::from_millis(6);

/// NACK requests issued per scan.
const NACKS_PER_SCAN: usize = 1;

/// Delay before a missing audio segment is requested.
const AUDIO_INITIAL_DELAY: Duration = Duration::from_millis(6);

/// Base delay before a missing video segment is requested; each retry backs
/// off by the same amount again.
const VIDEO_DELAY_STEP: Duration = Duration::from_millis(8);

/// How long a missing index must have been outstanding before a NACK for it
/// is eligible, given how often it has already been requested.
pub fn initial_delay(stream: StreamKind, retries: u8) -> Duration {
    match stream {
        StreamKind::Audio => AUDIO_INITIAL_DELAY,
        _ => VIDEO_DELAY_STEP * (retries as u32 + 1),
    }
}

/// Gap scanner for one stream's ring.
pub struct NackEngine {
    stream: StreamKind,
    last_scan: Option<Instant>,
}

impl NackEngine {
    pub fn new(stream: StreamKind) -> Self {
        NackEngine {
            stream,
            last_scan: None,
        }
    }

    /// Scan `ring` for eligible gaps and emit a NACK for each through
    /// `send`. Returns how many were issued. Calls closer together than the
    /// scan interval are no-ops.
    pub fn tick(
        &mut self,
        ring: &mut RingBuffer,
        now: Instant,
        mut send: impl FnMut(ControlMessage),
    ) -> usize {
        if let Some(last) = self.last_scan {
            if now.duration_since(last) < NACK_SCAN_INTERVAL {
                return 0;
            }
        }
        self.last_scan = Some(now);

        let stream = self.stream;
        let gaps = ring.gaps(now, NACKS_PER_SCAN, |retries| initial_delay(stream, retries));

        for &(frame_id, index) in &gaps {
            info!("missing {:?} frame {} index {}, NACKing", stream, frame_id, index);
            send(ControlMessage::Nack {
                stream,
                frame_id,
                index,
            });
        }
        gaps.len()
    }
}
