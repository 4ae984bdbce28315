//! Adaptive bitrate controller.
//!
//! Once per statistics window the controller turns the observed NACK rate
//! into a new encoder bitrate. Losses pull the target down along a piecewise
//! curve; quiet windows let it climb halfway back toward the working
//! bitrate, the highest rate recently seen to hold up. A per-bucket loss
//! history damps oscillation around a rate that keeps failing.

use std::time::{Duration, Instant};

use log::info;

/// Length of one statistics window.
pub const STATS_WINDOW: Duration = Duration::from_secs(3);

/// Floor and ceiling for the encoder bitrate, in bits per second.
pub const MINIMUM_BITRATE: u32 = 1_000_000;
pub const MAXIMUM_BITRATE: u32 = 30_000_000;

/// Granularity of the loss history.
pub const BITRATE_BUCKET_SIZE: u32 = 500_000;

/// Burst ceiling relative to the target, for segmenter pacing.
const BURST_FACTOR: u32 = 4;

/// Relative change below which the encoder keeps its configuration and only
/// the pacing budget moves.
const RECONFIGURE_THRESHOLD: f64 = 0.05;

/// Historical NACK rate above which a bucket is considered lossy and climbs
/// into it are held back.
const LOSSY_BUCKET_RATE: f64 = 6.0;

/// New settings published at the end of a window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitrateUpdate {
    /// Encoder target, bits per second.
    pub bitrate: u32,
    /// Pacing ceiling for the segmenter, bits per second.
    pub burst_bitrate: u32,
    /// The change is large enough to warrant a new encoder configuration.
    pub reconfigure: bool,
}

/// NACK-rate driven bitrate governor.
pub struct BitrateController {
    target: f64,
    working: f64,
    window_started: Instant,
    nacks_in_window: u64,
    nacks_by_bucket: Vec<u64>,
    seconds_by_bucket: Vec<f64>,
}

impl BitrateController {
    pub fn new(initial_bitrate: u32, now: Instant) -> Self {
        let initial = initial_bitrate.clamp(MINIMUM_BITRATE, MAXIMUM_BITRATE) as f64;
        let buckets = (MAXIMUM_BITRATE / BITRATE_BUCKET_SIZE) as usize + 5;
        BitrateController {
            target: initial,
            working: initial,
            window_started: now,
            nacks_in_window: 0,
            nacks_by_bucket: vec![0; buckets],
            seconds_by_bucket: vec![0.0; buckets],
        }
    }

    /// Current encoder target in bits per second.
    pub fn target_bitrate(&self) -> u32 {
        self.target as u32
    }

    /// Highest recently sustained bitrate in bits per second.
    pub fn working_bitrate(&self) -> u32 {
        self.working as u32
    }

    /// Pacing ceiling derived from the current target.
    pub fn burst_bitrate(&self) -> u32 {
        (self.target as u32).saturating_mul(BURST_FACTOR)
    }

    /// Count NACKs observed since the last window rollover.
    pub fn record_nacks(&mut self, count: u64) {
        self.nacks_in_window += count;
    }

    fn bucket(&self, bitrate: f64) -> usize {
        ((bitrate as u32 / BITRATE_BUCKET_SIZE) as usize).min(self.nacks_by_bucket.len() - 1)
    }

    /// Historical NACKs per second observed while running in the bucket of
    /// `bitrate`.
    fn bucket_loss_rate(&self, bitrate: f64) -> f64 {
        let bucket = self.bucket(bitrate);
        let seconds = self.seconds_by_bucket[bucket];
        if seconds <= 0.0 {
            0.0
        } else {
            self.nacks_by_bucket[bucket] as f64 / seconds
        }
    }

    /// Roll the statistics window if it has elapsed and derive new settings.
    ///
    /// Returns `None` while the window is still open.
    pub fn update(&mut self, now: Instant) -> Option<BitrateUpdate> {
        let elapsed = now.duration_since(self.window_started);
        if elapsed < STATS_WINDOW {
            return None;
        }

        let seconds = elapsed.as_secs_f64();
        let rate = self.nacks_in_window as f64 / seconds;

        let bucket = self.bucket(self.target);
        self.nacks_by_bucket[bucket] += self.nacks_in_window;
        self.seconds_by_bucket[bucket] += seconds;

        let previous = self.target;

        let multiplier = if rate > 50.0 {
            Some(0.75)
        } else if rate > 25.0 {
            Some(0.83)
        } else if rate > 15.0 {
            Some(0.90)
        } else if rate > 10.0 {
            Some(0.95)
        } else if rate > 6.0 {
            Some(0.98)
        } else {
            None
        };

        match multiplier {
            Some(m) => {
                self.target *= m;
                // A decrease resets the sustained estimate; the link just
                // proved it cannot hold the old rate.
                self.working = self.target;
            }
            None => {
                let proposed_working = (self.target * 1.05).max(self.working);
                let proposed = (self.target + proposed_working) / 2.0;
                // A bucket that has historically been lossy is not climbed
                // back into on the strength of one quiet window. Each held
                // window dilutes the bucket's rate until it clears.
                if self.bucket_loss_rate(proposed) <= LOSSY_BUCKET_RATE {
                    self.working = proposed_working;
                    self.target = proposed;
                } else {
                    let held = self.bucket(proposed);
                    self.seconds_by_bucket[held] += seconds;
                }
            }
        }

        self.target = self
            .target
            .clamp(MINIMUM_BITRATE as f64, MAXIMUM_BITRATE as f64);
        self.working = self.working.min(MAXIMUM_BITRATE as f64);

        info!(
            "bitrate window: {:.1} NACKs/s, target {} -> {} bps",
            rate, previous as u64, self.target as u64
        );

        self.nacks_in_window = 0;
        self.window_started = now;

        let relative_change = (self.target - previous).abs() / previous;
        Some(BitrateUpdate {
            bitrate: self.target as u32,
            burst_bitrate: self.burst_bitrate(),
            reconfigure: relative_change > RECONFIGURE_THRESHOLD,
        })
    }
}
