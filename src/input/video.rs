//! Video playback scheduler.
//!
//! Drives the render sink from the video ring in strict id order. A gap
//! that persists is escaped by requesting a keyframe and, once one is fully
//! reassembled, skipping straight to it. When playback falls behind, ready
//! frames are decoded without being presented to catch up.

use std::time::{Duration, Instant};

use log::{info, warn};

use crate::wire::ControlMessage;

use super::ring::{Frame, RingBuffer};

/// Minimum spacing between keyframe requests.
pub const KEYFRAME_REQUEST_INTERVAL: Duration = Duration::from_millis(250);

/// Falling this many frames behind the newest seen id triggers a keyframe
/// request.
pub const KEYFRAME_LAG_THRESHOLD: i32 = 3;

/// Render target for reassembled video frames. Implemented by the decoder
/// and presentation layer outside the core.
pub trait VideoSink {
    /// Decode one frame. With `present` false the frame is decoded only to
    /// advance the reference chain, not displayed.
    fn render(&mut self, frame: &Frame, present: bool);
}

/// What one scheduler poll did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct VideoPoll {
    /// A frame was consumed and handed to the sink.
    pub rendered: bool,
    /// The consumed frame was presented (not a catch-up decode).
    pub presented: bool,
    /// The consumed frame was an unchanged-screen marker; the sink was not
    /// invoked.
    pub empty: bool,
    /// Frames dropped while catching up to a keyframe.
    pub skipped: usize,
    /// A keyframe request went out on this poll.
    pub keyframe_requested: bool,
}

/// Scheduler state for one video ring.
pub struct VideoScheduler {
    waiting_for_iframe: bool,
    last_keyframe_request: Option<Instant>,
}

impl VideoScheduler {
    pub fn new() -> Self {
        VideoScheduler {
            waiting_for_iframe: false,
            last_keyframe_request: None,
        }
    }

    pub fn is_waiting_for_iframe(&self) -> bool {
        self.waiting_for_iframe
    }

    fn request_keyframe(
        &mut self,
        now: Instant,
        send: &mut impl FnMut(ControlMessage),
    ) -> bool {
        if let Some(last) = self.last_keyframe_request {
            if now.duration_since(last) < KEYFRAME_REQUEST_INTERVAL {
                return false;
            }
        }
        self.last_keyframe_request = Some(now);
        self.waiting_for_iframe = true;
        send(ControlMessage::KeyframeRequest { reinitialize: false });
        true
    }

    /// Advance playback by at most one frame.
    pub fn poll(
        &mut self,
        ring: &mut RingBuffer,
        sink: &mut dyn VideoSink,
        now: Instant,
        mut send: impl FnMut(ControlMessage),
    ) -> VideoPoll {
        let mut outcome = VideoPoll::default();

        // A complete keyframe ahead of the playhead beats filling the gap:
        // drop everything before it and resume there.
        let keyframe = ring.latest_keyframe_id();
        if keyframe > 0 && keyframe - 1 > ring.last_rendered_id() {
            let dropped = ring.skip_until(keyframe - 1);
            if !dropped.is_empty() {
                warn!(
                    "skipping {} frames to catch up to keyframe {}",
                    dropped.len(),
                    keyframe
                );
            }
            outcome.skipped = dropped.len();
        }

        let next = ring.last_rendered_id() + 1;

        if ring.ready(next) {
            let marker = ring.frame_marker(next).unwrap_or_default();
            if marker.keyframe {
                self.waiting_for_iframe = false;
            }

            // With the following frame already complete, decode this one
            // without presenting to close the gap faster.
            let present = !ring.ready(next + 1);

            if let Some(frame) = ring.consume(next) {
                outcome.rendered = true;
                if marker.empty {
                    outcome.empty = true;
                } else {
                    sink.render(&frame, present);
                    outcome.presented = present;
                }
            }
            return outcome;
        }

        // The next frame is stuck. Once the stream has moved on far enough,
        // stop waiting for retransmissions and ask for a fresh keyframe.
        let behind = ring.max_id_seen() - ring.last_rendered_id();
        if behind > KEYFRAME_LAG_THRESHOLD && self.request_keyframe(now, &mut send) {
            info!(
                "{} frames behind with frame {} missing, requesting keyframe",
                behind, next
            );
            outcome.keyframe_requested = true;
        }

        outcome
    }
}

impl Default for VideoScheduler {
    fn default() -> Self {
        Self::new()
    }
}
