//! Ring reassembly buffer.
//!
//! A fixed array of frame slots indexed by `frame_id % capacity`. The modulo
//! slot identity is load-bearing: it is what makes duplicate and overwrite
//! detection O(1), so the ring must never be replaced by a list. One network
//! thread writes segments in, one playback thread consumes ready frames.
//!
//! Frame ids are positive and monotonically increasing on the sender. A slot
//! holding id `i` is displaced when a segment with id `j > i` maps to the
//! same slot; the displaced frame is reported as dropped. Segments at or
//! below the consumed watermark are dropped without effect.

use std::time::{Duration, Instant};

use log::{debug, warn};

use crate::error::SegmentDrop;
use crate::wire::{FrameMarker, Segment, StreamKind, MAX_PAYLOAD};

/// Video ring capacity in frame slots.
pub const VIDEO_RING_SLOTS: usize = 275;
/// Audio ring capacity in logical frames (groups of segments).
pub const AUDIO_RING_SLOTS: usize = 25;

/// How far behind `max_id_seen` a frame must fall before its missing
/// segments are treated as gaps rather than reordering.
pub const VIDEO_SAFETY_MARGIN: i32 = 5;
pub const AUDIO_SAFETY_MARGIN: i32 = 4;

/// Per-index retransmission request cap. Past it the segment is abandoned
/// and the frame will eventually be displaced.
pub const NACK_RETRY_CAP: u8 = 2;

/// Slot sentinel; real frame ids are positive.
const EMPTY_SLOT: i32 = -1;

/// A fully reassembled frame handed to playback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub id: i32,
    pub stream: StreamKind,
    pub payload: Vec<u8>,
}

/// What `receive` did with an accepted segment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReceiveOutcome {
    /// The segment completed its frame.
    pub frame_ready: bool,
    /// An older, incomplete frame was displaced from the slot.
    pub displaced: Option<i32>,
    /// An in-frame gap became NACK-eligible on this arrival (video only).
    pub early_nack: Option<(i32, u16)>,
}

/// One entry of the ring. Owns the payload storage for one in-flight frame.
struct FrameSlot {
    id: i32,
    /// Total segment count; 0 while the slot is a placeholder reserved by
    /// the gap scan before any segment arrived.
    count: u16,
    received: u16,
    arrived: Vec<bool>,
    /// NACKs issued per index; bounded by [`NACK_RETRY_CAP`].
    nack_counts: Vec<u8>,
    /// Cursor of the in-frame early-NACK scan.
    early_cursor: i32,
    created: Instant,
    last_arrival: Instant,
    last_nack_time: Instant,
    payload: Vec<u8>,
    size: usize,
}

impl FrameSlot {
    fn empty(now: Instant) -> Self {
        FrameSlot {
            id: EMPTY_SLOT,
            count: 0,
            received: 0,
            arrived: Vec::new(),
            nack_counts: Vec::new(),
            early_cursor: -1,
            created: now,
            last_arrival: now,
            last_nack_time: now,
            payload: Vec::new(),
            size: 0,
        }
    }

    fn clear(&mut self) {
        self.id = EMPTY_SLOT;
        self.count = 0;
        self.received = 0;
        self.arrived.clear();
        self.nack_counts.clear();
        self.early_cursor = -1;
        self.size = 0;
    }

    fn init(&mut self, id: i32, count: u16, now: Instant) {
        // Keep NACK bookkeeping from a placeholder for the same id.
        let keep_nacks = if self.id == id {
            std::mem::take(&mut self.nack_counts)
        } else {
            Vec::new()
        };

        self.id = id;
        self.count = count;
        self.received = 0;
        self.arrived = vec![false; count as usize];
        self.nack_counts = vec![0; count as usize];
        for (i, n) in keep_nacks.into_iter().enumerate().take(count as usize) {
            self.nack_counts[i] = n;
        }
        self.early_cursor = -1;
        self.created = now;
        self.last_arrival = now;
        self.last_nack_time = now;
        self.payload.clear();
        self.payload.resize(count as usize * MAX_PAYLOAD, 0);
        self.size = 0;
    }

    /// Reserve the slot for a frame no segment has arrived for yet, so NACK
    /// retries can be tracked. The segment count is unknown until the first
    /// copy arrives, so only index 0 is requested.
    fn reserve(&mut self, id: i32, now: Instant) {
        self.id = id;
        self.count = 0;
        self.received = 0;
        self.arrived.clear();
        self.nack_counts = vec![0];
        self.early_cursor = -1;
        self.created = now;
        self.last_arrival = now;
        self.last_nack_time = now;
        self.size = 0;
    }

    fn is_placeholder(&self) -> bool {
        self.id != EMPTY_SLOT && self.count == 0
    }

    fn is_ready(&self) -> bool {
        self.count > 0 && self.received == self.count
    }

    /// Pick the next missing index whose pending-NACK record is eligible,
    /// charging the record. At most one index per frame per scan.
    fn next_retry(&mut self, now: Instant, initial_delay: &impl Fn(u8) -> Duration) -> Option<u16> {
        let indices = if self.is_placeholder() { 1 } else { self.count as usize };

        for index in 0..indices {
            if !self.is_placeholder() && self.arrived[index] {
                continue;
            }
            let retries = self.nack_counts[index];
            if retries >= NACK_RETRY_CAP {
                continue;
            }
            let delay = initial_delay(retries);
            if now.duration_since(self.created) < delay
                || now.duration_since(self.last_nack_time) < delay
            {
                continue;
            }
            self.nack_counts[index] += 1;
            self.last_nack_time = now;
            return Some(index as u16);
        }
        None
    }
}

/// Fixed-size reassembly buffer for one stream.
pub struct RingBuffer {
    stream: StreamKind,
    slots: Vec<FrameSlot>,
    max_id_seen: i32,
    last_rendered_id: i32,
    /// Most recent fully reassembled keyframe (video only).
    latest_keyframe_id: i32,
    safety_margin: i32,
}

impl RingBuffer {
    /// Create a ring sized for the given stream.
    pub fn new(stream: StreamKind) -> Self {
        let (capacity, margin) = match stream {
            StreamKind::Audio => (AUDIO_RING_SLOTS, AUDIO_SAFETY_MARGIN),
            _ => (VIDEO_RING_SLOTS, VIDEO_SAFETY_MARGIN),
        };
        Self::with_capacity(stream, capacity, margin)
    }

    /// Create a ring with explicit geometry (tests and special deployments).
    pub fn with_capacity(stream: StreamKind, capacity: usize, safety_margin: i32) -> Self {
        assert!(capacity > 0);
        let now = Instant::now();
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || FrameSlot::empty(now));
        RingBuffer {
            stream,
            slots,
            max_id_seen: 0,
            last_rendered_id: 0,
            latest_keyframe_id: 0,
            safety_margin,
        }
    }

    pub fn stream(&self) -> StreamKind {
        self.stream
    }

    /// Highest frame id any segment has been seen for. Non-decreasing.
    pub fn max_id_seen(&self) -> i32 {
        self.max_id_seen
    }

    /// Highest frame id consumed or skipped. Non-decreasing.
    pub fn last_rendered_id(&self) -> i32 {
        self.last_rendered_id
    }

    /// Id of the newest fully reassembled keyframe, or 0.
    pub fn latest_keyframe_id(&self) -> i32 {
        self.latest_keyframe_id
    }

    fn slot_index(&self, frame_id: i32) -> usize {
        frame_id.rem_euclid(self.slots.len() as i32) as usize
    }

    /// Store one segment. O(1).
    pub fn receive(&mut self, segment: &Segment, now: Instant) -> Result<ReceiveOutcome, SegmentDrop> {
        if segment.frame_id <= 0
            || segment.count == 0
            || segment.index >= segment.count
            || segment.payload.len() > MAX_PAYLOAD
        {
            return Err(SegmentDrop::Inconsistent);
        }
        if segment.frame_id <= self.last_rendered_id {
            return Err(SegmentDrop::OldSegment);
        }

        let mut outcome = ReceiveOutcome::default();
        let slot_index = self.slot_index(segment.frame_id);

        let (slot_id, placeholder, slot_count, slot_received) = {
            let slot = &self.slots[slot_index];
            (slot.id, slot.is_placeholder(), slot.count, slot.received)
        };

        if slot_id > segment.frame_id {
            return Err(SegmentDrop::StaleFrame);
        }

        if slot_id != segment.frame_id || placeholder {
            if slot_id != EMPTY_SLOT && slot_id < segment.frame_id && !placeholder {
                // Displace the older frame and advance the watermark past it
                // so its indices are never reported as gaps.
                debug!(
                    "frame {} displaced by {} with {}/{} segments",
                    slot_id, segment.frame_id, slot_received, slot_count
                );
                outcome.displaced = Some(slot_id);
                self.last_rendered_id = self.last_rendered_id.max(slot_id);
            }
            self.slots[slot_index].init(segment.frame_id, segment.count, now);
        } else if slot_count != segment.count {
            return Err(SegmentDrop::Inconsistent);
        }

        let early_gate =
            now.duration_since(self.slots[slot_index].last_nack_time) > super::nack::NACK_SCAN_INTERVAL;

        let slot = &mut self.slots[slot_index];
        let index = segment.index as usize;
        if slot.arrived[index] {
            return Err(SegmentDrop::DuplicateSegment);
        }

        slot.arrived[index] = true;
        slot.received += 1;
        slot.last_arrival = now;

        let place = index * MAX_PAYLOAD;
        slot.payload[place..place + segment.payload.len()].copy_from_slice(&segment.payload);
        slot.size += segment.payload.len();

        self.max_id_seen = self.max_id_seen.max(segment.frame_id);

        // Out-of-order arrival inside the frame exposes gaps early: indices
        // well behind the newest arrival are already worth requesting.
        if self.stream == StreamKind::Video && segment.index > 4 && early_gate {
            let slot = &mut self.slots[slot_index];
            let to_index = segment.index as i32 - 5;
            let from = (slot.early_cursor + 1).max(0);
            for i in from..=to_index {
                slot.early_cursor = slot.early_cursor.max(i);
                let i_usize = i as usize;
                if !slot.arrived[i_usize] && slot.nack_counts[i_usize] < NACK_RETRY_CAP {
                    slot.nack_counts[i_usize] += 1;
                    slot.last_nack_time = now;
                    outcome.early_nack = Some((segment.frame_id, i as u16));
                    break;
                }
            }
        }

        let slot = &self.slots[slot_index];
        if slot.is_ready() {
            outcome.frame_ready = true;
            if self.stream == StreamKind::Video && FrameMarker::decode(slot.payload[0]).keyframe {
                self.latest_keyframe_id = self.latest_keyframe_id.max(slot.id);
            }
        }

        Ok(outcome)
    }

    /// All segment indices of `id` are present.
    pub fn ready(&self, id: i32) -> bool {
        let slot = &self.slots[self.slot_index(id)];
        slot.id == id && slot.is_ready()
    }

    /// Peek the frame marker of a ready video frame without consuming it.
    pub fn frame_marker(&self, id: i32) -> Option<FrameMarker> {
        let slot = &self.slots[self.slot_index(id)];
        if slot.id == id && slot.is_ready() {
            Some(FrameMarker::from_frame(&slot.payload[..1.min(slot.size)]))
        } else {
            None
        }
    }

    /// Atomically read the reassembled payload, free the slot and advance the
    /// watermark. Returns `None` unless the frame is ready.
    pub fn consume(&mut self, id: i32) -> Option<Frame> {
        let slot_index = self.slot_index(id);
        let stream = self.stream;
        let slot = &mut self.slots[slot_index];
        if slot.id != id || !slot.is_ready() {
            return None;
        }

        // Interior segments are always full, so the reassembled bytes are
        // the first `size` bytes of the slot storage.
        let mut payload = std::mem::take(&mut slot.payload);
        payload.truncate(slot.size);
        slot.clear();

        self.last_rendered_id = self.last_rendered_id.max(id);
        Some(Frame { id, stream, payload })
    }

    /// Drop every frame at or below `id`, advancing the watermark.
    ///
    /// Used by the video scheduler to catch up to a keyframe and by the
    /// audio scheduler to flush an over-full queue. Returns the ids of
    /// frames that actually held data.
    pub fn skip_until(&mut self, id: i32) -> Vec<i32> {
        let mut dropped = Vec::new();
        if id <= self.last_rendered_id {
            return dropped;
        }

        for skipped in self.last_rendered_id + 1..=id {
            let slot_index = self.slot_index(skipped);
            let slot = &mut self.slots[slot_index];
            if slot.id == skipped {
                if !slot.is_ready() && !slot.is_placeholder() {
                    warn!(
                        "skipping incomplete frame {} ({}/{} segments)",
                        skipped, slot.received, slot.count
                    );
                }
                dropped.push(skipped);
                slot.clear();
            }
        }
        self.last_rendered_id = id;
        dropped
    }

    /// Yield NACK-eligible `(frame_id, index)` gaps, oldest frame first.
    ///
    /// Only frames older than `max_id_seen - safety_margin` are considered;
    /// newer holes are assumed to be in-flight reordering. At most one index
    /// per frame and `budget` indices in total are yielded per call, and
    /// each yielded index has its pending-NACK record charged.
    pub fn gaps(
        &mut self,
        now: Instant,
        budget: usize,
        initial_delay: impl Fn(u8) -> Duration,
    ) -> Vec<(i32, u16)> {
        let mut out = Vec::new();
        let limit = self.max_id_seen - self.safety_margin;
        let mut id = self.last_rendered_id + 1;

        while id <= limit && out.len() < budget {
            let slot_index = self.slot_index(id);
            let slot = &mut self.slots[slot_index];

            if slot.id == EMPTY_SLOT {
                // No segment of this frame ever arrived. Reserve the slot so
                // the retry cap holds across scans, and request the first
                // index to get the frame started.
                slot.reserve(id, now);
                slot.nack_counts[0] = 1;
                slot.last_nack_time = now;
                out.push((id, 0));
            } else if slot.id == id && !slot.is_ready() {
                if let Some(index) = slot.next_retry(now, &initial_delay) {
                    out.push((id, index));
                }
            }
            // A slot holding a different id means this frame can no longer
            // be recovered; the displacement path has already advanced the
            // watermark or will on the next arrival.

            id += 1;
        }
        out
    }

    /// Count of frames currently held (placeholders excluded).
    pub fn pending_frames(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| s.id != EMPTY_SLOT && !s.is_placeholder())
            .count()
    }
}
