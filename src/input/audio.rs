//! Audio playback scheduler.
//!
//! Keeps the sink-side queue between a lower and an upper bound, trading
//! latency for continuity. Below the lower bound it stops feeding the sink
//! and accumulates; above the upper bound it drops the oldest ready frames
//! until the queue drains back to the target. Consumption always starts on
//! a frame (group) boundary.

use log::{info, warn};

use crate::wire::{AUDIO_GROUP_SIZE, MAX_PAYLOAD};

use super::ring::RingBuffer;

/// Below this many queued bytes the scheduler buffers instead of playing.
pub const AUDIO_QUEUE_LOWER_LIMIT: usize = 18_000;
/// Above this many queued bytes a flush is triggered.
pub const AUDIO_QUEUE_UPPER_LIMIT: usize = 59_000;
/// Buffering and flushing both aim for this queue depth.
pub const AUDIO_QUEUE_TARGET: usize = 28_000;

/// Destination for decoded or passthrough PCM. Implemented by the platform
/// audio device outside the core.
pub trait AudioSink {
    /// Bytes handed to the device but not yet played.
    fn queued_bytes(&self) -> usize;
    /// Append PCM to the device queue.
    fn queue(&mut self, pcm: &[u8]);
    /// Tear down and reopen the device for a new stream format.
    fn reconfigure(&mut self, sample_rate: u32, channels: u8);
}

/// What one scheduler poll did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct AudioPoll {
    pub frames_played: usize,
    pub frames_flushed: usize,
}

/// Jitter-buffer driver for the audio ring.
pub struct AudioScheduler {
    started: bool,
    buffering: bool,
    flushing: bool,
    format: Option<(u32, u8)>,
    pending_format: Option<(u32, u8)>,
}

impl AudioScheduler {
    pub fn new() -> Self {
        AudioScheduler {
            started: false,
            buffering: false,
            flushing: false,
            format: None,
            pending_format: None,
        }
    }

    /// The scheduler is withholding output until the queue refills.
    pub fn is_buffering(&self) -> bool {
        self.buffering
    }

    /// The scheduler is dropping frames until the queue drains.
    pub fn is_flushing(&self) -> bool {
        self.flushing
    }

    /// Announce a stream format. The sink is reopened before the next push
    /// if the format changed.
    pub fn set_format(&mut self, sample_rate: u32, channels: u8) {
        if self.format != Some((sample_rate, channels)) {
            self.pending_format = Some((sample_rate, channels));
        }
    }

    /// Estimate of bytes still ahead of the playhead: frames pending in the
    /// ring (at the wire-size upper bound, as the sender fills segments) plus
    /// what the device already queued.
    fn runway_bytes(&self, ring: &RingBuffer, queued: usize) -> usize {
        let pending = (ring.max_id_seen() - ring.last_rendered_id()).max(0) as usize;
        pending * AUDIO_GROUP_SIZE as usize * MAX_PAYLOAD + queued
    }

    /// Feed consecutive ready frames to the sink, buffering or flushing as
    /// the queue depth dictates.
    pub fn poll(&mut self, ring: &mut RingBuffer, sink: &mut dyn AudioSink) -> AudioPoll {
        let mut outcome = AudioPoll::default();
        let mut queued = sink.queued_bytes();

        // Nothing has played yet: start from the newest frame rather than
        // working through a stale backlog.
        if !self.started {
            if ring.max_id_seen() == 0 {
                return outcome;
            }
            let skipped = ring.skip_until(ring.max_id_seen() - 1);
            if !skipped.is_empty() {
                info!("audio start: skipped {} stale frames", skipped.len());
            }
            self.started = true;
        }

        let runway = self.runway_bytes(ring, queued);
        if !self.buffering && runway < AUDIO_QUEUE_LOWER_LIMIT {
            info!("audio queue low ({} bytes ahead), buffering", runway);
            self.buffering = true;
        }
        if self.buffering {
            if runway < AUDIO_QUEUE_TARGET {
                return outcome;
            }
            info!("audio caught up ({} bytes ahead)", runway);
            self.buffering = false;
        }

        loop {
            let next = ring.last_rendered_id() + 1;
            if !ring.ready(next) {
                break;
            }

            // While flushing, keep dropping until the queue reaches the
            // target, not merely the upper limit.
            let limit = if self.flushing {
                AUDIO_QUEUE_TARGET
            } else {
                AUDIO_QUEUE_UPPER_LIMIT
            };

            if queued > limit {
                warn!("audio queue full ({} bytes), skipping frame {}", queued, next);
                ring.skip_until(next);
                outcome.frames_flushed += 1;
                self.flushing = true;
                continue;
            }
            self.flushing = false;

            if let Some((rate, channels)) = self.pending_format.take() {
                sink.reconfigure(rate, channels);
                self.format = Some((rate, channels));
            }

            match ring.consume(next) {
                Some(frame) => {
                    queued += frame.payload.len();
                    sink.queue(&frame.payload);
                    outcome.frames_played += 1;
                }
                None => break,
            }
        }

        outcome
    }
}

impl Default for AudioScheduler {
    fn default() -> Self {
        Self::new()
    }
}
