//! Lock-free transport statistics.
//!
//! Counters are plain atomics updated from the network and playback threads;
//! `snapshot()` produces a copyable view for logging and monitoring.

use std::sync::atomic::{AtomicU64, Ordering};

/// Statistics tracked with atomics (no locking needed).
#[derive(Default)]
pub struct SessionStats {
    /// Datagrams received on the media socket.
    pub packets_received: AtomicU64,
    /// Datagrams sent on the media socket.
    pub packets_sent: AtomicU64,
    /// Payload bytes delivered to reassembly.
    pub bytes_received: AtomicU64,
    /// Datagrams dropped because the MAC did not verify.
    pub auth_failures: AtomicU64,
    /// Datagrams dropped because of framing violations.
    pub malformed_packets: AtomicU64,
    /// Segments below the rendered watermark.
    pub old_segments: AtomicU64,
    /// Segments whose index had already arrived (redundancy, not error).
    pub duplicate_segments: AtomicU64,
    /// Frames displaced from the ring by newer ids before completion.
    pub frames_overwritten: AtomicU64,
    /// Frames skipped by the playback schedulers (stale video, audio flush).
    pub frames_skipped: AtomicU64,
    /// NACK requests sent by the receive side.
    pub nacks_sent: AtomicU64,
    /// NACK requests served by the send side.
    pub retransmits_served: AtomicU64,
    /// Retransmitted segments received.
    pub retransmits_received: AtomicU64,
    /// Keyframe requests issued by the video scheduler.
    pub keyframe_requests: AtomicU64,
    /// Transmission errors on send.
    pub send_errors: AtomicU64,
}

impl SessionStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment a counter by one.
    pub fn bump(&self, counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Take a copyable snapshot of all counters.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            packets_received: self.packets_received.load(Ordering::Relaxed),
            packets_sent: self.packets_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            auth_failures: self.auth_failures.load(Ordering::Relaxed),
            malformed_packets: self.malformed_packets.load(Ordering::Relaxed),
            old_segments: self.old_segments.load(Ordering::Relaxed),
            duplicate_segments: self.duplicate_segments.load(Ordering::Relaxed),
            frames_overwritten: self.frames_overwritten.load(Ordering::Relaxed),
            frames_skipped: self.frames_skipped.load(Ordering::Relaxed),
            nacks_sent: self.nacks_sent.load(Ordering::Relaxed),
            retransmits_served: self.retransmits_served.load(Ordering::Relaxed),
            retransmits_received: self.retransmits_received.load(Ordering::Relaxed),
            keyframe_requests: self.keyframe_requests.load(Ordering::Relaxed),
            send_errors: self.send_errors.load(Ordering::Relaxed),
        }
    }
}

/// Statistics snapshot for external access.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub packets_received: u64,
    pub packets_sent: u64,
    pub bytes_received: u64,
    pub auth_failures: u64,
    pub malformed_packets: u64,
    pub old_segments: u64,
    pub duplicate_segments: u64,
    pub frames_overwritten: u64,
    pub frames_skipped: u64,
    pub nacks_sent: u64,
    pub retransmits_served: u64,
    pub retransmits_received: u64,
    pub keyframe_requests: u64,
    pub send_errors: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_reflects_counters() {
        let stats = SessionStats::new();
        stats.bump(&stats.packets_received);
        stats.bump(&stats.packets_received);
        stats.bump(&stats.nacks_sent);

        let snap = stats.snapshot();
        assert_eq!(snap.packets_received, 2);
        assert_eq!(snap.nacks_sent, 1);
        assert_eq!(snap.auth_failures, 0);
    }
}
