//! Session orchestrator.
//!
//! Owns the sockets and key material, glues the send and receive halves
//! together and supervises peer liveness. Thread placement follows one
//! thread per role: a network thread drives reassembly and NACKs, a
//! playback thread consumes frames, the capture/encode/send path runs on
//! the sender, and clipboard rides the reliable socket. Every loop checks a
//! shared shutdown flag each iteration; there is no asynchronous
//! cancellation.

pub mod discovery;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, Sender};
use log::{debug, info, warn};
use parking_lot::{Mutex, RwLock};

use crate::bitrate::BitrateController;
use crate::cipher::PacketCipher;
use crate::config::SessionConfig;
use crate::error::{SegmentDrop, SessionError, SocketError};
use crate::input::audio::{AudioScheduler, AudioSink};
use crate::input::nack::NackEngine;
use crate::input::ring::RingBuffer;
use crate::input::video::{VideoScheduler, VideoSink};
use crate::output::segmenter::{RetransmitStore, Segmenter};
use crate::socket::{BulkListener, BulkSocket, MediaSocket, RecvTimeout, RECV_BUFFER_SIZE};
use crate::stats::SessionStats;
use crate::wire::{ControlMessage, FrameMarker, Segment, StreamKind};

use self::discovery::{DiscoveryReply, DiscoveryRequest};

/// How often the client pings the server.
pub const PING_INTERVAL: Duration = Duration::from_millis(500);

/// Receive timeout of the steady-state media loops; short enough that the
/// shutdown flag and NACK cadence are honoured.
const MEDIA_RECV_TIMEOUT: Duration = Duration::from_millis(10);

/// How many frames the sender-side retransmit stores retain.
const VIDEO_STORE_FRAMES: usize = 275;
const AUDIO_STORE_FRAMES: usize = 25;

/// Suppression window for malformed-packet logging.
const MALFORMED_LOG_WINDOW: Duration = Duration::from_secs(3);

/// Encoder settings published by the control plane and read by the encoder
/// thread. Single writer; the dirty flags carry release/acquire ordering
/// for the plain fields.
#[derive(Default)]
pub struct EncoderControls {
    bitrate: AtomicU32,
    burst_bitrate: AtomicU32,
    settings_dirty: AtomicBool,
    keyframe_requested: AtomicBool,
    reinitialize: AtomicBool,
    dimensions: Mutex<Option<(u16, u16, u16, u8)>>,
}

impl EncoderControls {
    pub fn new(initial_bitrate: u32, burst_bitrate: u32) -> Self {
        let controls = EncoderControls::default();
        controls.bitrate.store(initial_bitrate, Ordering::Relaxed);
        controls.burst_bitrate.store(burst_bitrate, Ordering::Relaxed);
        controls
    }

    /// Publish a new bitrate pair. Field stores happen before the dirty
    /// flag's release store, so `take_settings` reads them coherently.
    pub fn publish_bitrate(&self, bitrate: u32, burst_bitrate: u32) {
        self.bitrate.store(bitrate, Ordering::Relaxed);
        self.burst_bitrate.store(burst_bitrate, Ordering::Relaxed);
        self.settings_dirty.store(true, Ordering::Release);
    }

    /// Take pending settings, if any. Called from the encoder thread.
    pub fn take_settings(&self) -> Option<(u32, u32)> {
        if self.settings_dirty.swap(false, Ordering::Acquire) {
            Some((
                self.bitrate.load(Ordering::Relaxed),
                self.burst_bitrate.load(Ordering::Relaxed),
            ))
        } else {
            None
        }
    }

    /// Current pacing ceiling for the segmenter.
    pub fn burst_bitrate(&self) -> u32 {
        self.burst_bitrate.load(Ordering::Relaxed)
    }

    pub fn request_keyframe(&self, reinitialize: bool) {
        if reinitialize {
            self.reinitialize.store(true, Ordering::Relaxed);
        }
        self.keyframe_requested.store(true, Ordering::Release);
    }

    /// Take a pending keyframe request; the bool is the reinitialize flag.
    pub fn take_keyframe_request(&self) -> Option<bool> {
        if self.keyframe_requested.swap(false, Ordering::Acquire) {
            Some(self.reinitialize.swap(false, Ordering::Relaxed))
        } else {
            None
        }
    }

    pub fn set_dimensions(&self, width: u16, height: u16, dpi: u16, codec_id: u8) {
        *self.dimensions.lock() = Some((width, height, dpi, codec_id));
    }

    pub fn dimensions(&self) -> Option<(u16, u16, u16, u8)> {
        *self.dimensions.lock()
    }
}

/// Lifecycle state of one remote peer.
pub struct Peer {
    pub id: u32,
    media_addr: Mutex<Option<SocketAddr>>,
    bulk: Mutex<Option<BulkSocket>>,
    last_seen: Mutex<Instant>,
    deactivating: AtomicBool,
    holders: AtomicUsize,
}

impl Peer {
    fn new(id: u32, now: Instant) -> Self {
        Peer {
            id,
            media_addr: Mutex::new(None),
            bulk: Mutex::new(None),
            last_seen: Mutex::new(now),
            deactivating: AtomicBool::new(false),
            holders: AtomicUsize::new(0),
        }
    }

    /// Record ingress from this peer.
    pub fn touch(&self, now: Instant) {
        *self.last_seen.lock() = now;
    }

    pub fn silent_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(*self.last_seen.lock())
    }

    pub fn set_media_addr(&self, addr: SocketAddr) {
        *self.media_addr.lock() = Some(addr);
    }

    pub fn media_addr(&self) -> Option<SocketAddr> {
        *self.media_addr.lock()
    }

    pub fn is_deactivating(&self) -> bool {
        self.deactivating.load(Ordering::Acquire)
    }

    /// Enter the deactivating state: no new sends may target this peer, and
    /// teardown waits for every active reference to drop.
    pub fn begin_deactivation(&self) {
        self.deactivating.store(true, Ordering::Release);
    }

    /// Claim an active reference for the duration of a send. Fails once
    /// deactivation has begun.
    pub fn activate(self: &Arc<Self>) -> Option<ActiveRef> {
        if self.is_deactivating() {
            return None;
        }
        self.holders.fetch_add(1, Ordering::AcqRel);
        Some(ActiveRef { peer: self.clone() })
    }

    fn idle(&self) -> bool {
        self.holders.load(Ordering::Acquire) == 0
    }
}

/// RAII active reference; while any exist the peer's resources stay alive.
pub struct ActiveRef {
    peer: Arc<Peer>,
}

impl std::ops::Deref for ActiveRef {
    type Target = Peer;

    fn deref(&self) -> &Peer {
        &self.peer
    }
}

impl Drop for ActiveRef {
    fn drop(&mut self) {
        self.peer.holders.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Set of connected peers. Broadcasts take the read lock; lifecycle takes
/// the write lock.
pub struct PeerTable {
    peers: RwLock<HashMap<u32, Arc<Peer>>>,
    next_id: AtomicU32,
}

impl PeerTable {
    pub fn new() -> Self {
        PeerTable {
            peers: RwLock::new(HashMap::new()),
            next_id: AtomicU32::new(1),
        }
    }

    pub fn add(&self, now: Instant) -> Arc<Peer> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let peer = Arc::new(Peer::new(id, now));
        self.peers.write().insert(id, peer.clone());
        peer
    }

    pub fn get(&self, id: u32) -> Option<Arc<Peer>> {
        self.peers.read().get(&id).cloned()
    }

    pub fn find_by_media_addr(&self, addr: SocketAddr) -> Option<Arc<Peer>> {
        self.peers
            .read()
            .values()
            .find(|p| p.media_addr() == Some(addr))
            .cloned()
    }

    /// A freshly accepted peer has no media address until its first
    /// datagram arrives.
    pub fn find_awaiting_media_addr(&self) -> Option<Arc<Peer>> {
        self.peers
            .read()
            .values()
            .find(|p| p.media_addr().is_none() && !p.is_deactivating())
            .cloned()
    }

    /// Run `f` once per active peer, holding an active reference across the
    /// call. Deactivating peers are skipped.
    pub fn for_each_active(&self, mut f: impl FnMut(&ActiveRef)) {
        for peer in self.peers.read().values() {
            if let Some(active) = peer.activate() {
                f(&active);
            }
        }
    }

    /// Mark peers silent beyond `window` as deactivating.
    pub fn reap_silent(&self, now: Instant, window: Duration) -> Vec<u32> {
        let mut reaped = Vec::new();
        for peer in self.peers.read().values() {
            if !peer.is_deactivating() && peer.silent_for(now) > window {
                info!("peer {} silent for {:?}, deactivating", peer.id, peer.silent_for(now));
                peer.begin_deactivation();
                reaped.push(peer.id);
            }
        }
        reaped
    }

    /// Remove deactivating peers whose active references have all been
    /// released, shutting their sockets. Returns the removed peers.
    pub fn finalize_deactivated(&self) -> Vec<Arc<Peer>> {
        let mut removed = Vec::new();
        let mut peers = self.peers.write();
        peers.retain(|_, peer| {
            if peer.is_deactivating() && peer.idle() {
                if let Some(bulk) = peer.bulk.lock().take() {
                    bulk.shutdown();
                }
                removed.push(peer.clone());
                false
            } else {
                true
            }
        });
        removed
    }

    pub fn active_count(&self) -> usize {
        self.peers.read().values().filter(|p| !p.is_deactivating()).count()
    }

    pub fn len(&self) -> usize {
        self.peers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.read().is_empty()
    }
}

impl Default for PeerTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Client-side receive pipeline: decrypt, decode, reassemble, recover.
///
/// Owned by the network thread; the rings are shared with the playback
/// thread behind short-lived locks.
pub struct MediaReceiver {
    cipher: PacketCipher,
    pub video: Arc<Mutex<RingBuffer>>,
    pub audio: Arc<Mutex<RingBuffer>>,
    video_nack: NackEngine,
    audio_nack: NackEngine,
    control_tx: Sender<ControlMessage>,
    stats: Arc<SessionStats>,
    ping_in_flight: Option<(u32, Instant)>,
    rtt: Option<Duration>,
    last_malformed_log: Option<Instant>,
}

impl MediaReceiver {
    pub fn new(
        cipher: PacketCipher,
        control_tx: Sender<ControlMessage>,
        stats: Arc<SessionStats>,
    ) -> Self {
        MediaReceiver {
            cipher,
            video: Arc::new(Mutex::new(RingBuffer::new(StreamKind::Video))),
            audio: Arc::new(Mutex::new(RingBuffer::new(StreamKind::Audio))),
            video_nack: NackEngine::new(StreamKind::Video),
            audio_nack: NackEngine::new(StreamKind::Audio),
            control_tx,
            stats,
            ping_in_flight: None,
            rtt: None,
            last_malformed_log: None,
        }
    }

    /// Last measured round-trip time.
    pub fn rtt(&self) -> Option<Duration> {
        self.rtt
    }

    /// Process one datagram off the media socket.
    pub fn handle_datagram(&mut self, datagram: &[u8], now: Instant) {
        let plaintext = match self.cipher.open_datagram(datagram) {
            Ok(p) => p,
            Err(crate::error::CipherError::AuthenticationFailed) => {
                // Tampered or stale; count and move on.
                self.stats.bump(&self.stats.auth_failures);
                return;
            }
            Err(crate::error::CipherError::MalformedPacket(reason)) => {
                self.note_malformed(reason, now);
                return;
            }
        };

        let segment = match Segment::decode(&plaintext) {
            Ok(s) => s,
            Err(err) => {
                self.note_malformed("segment decode failed", now);
                debug!("segment decode error: {err}");
                return;
            }
        };

        self.stats.bump(&self.stats.packets_received);

        match segment.stream {
            StreamKind::Control => self.handle_control(&segment, now),
            stream => self.handle_media(&segment, stream, now),
        }
    }

    fn handle_media(&mut self, segment: &Segment, stream: StreamKind, now: Instant) {
        if segment.retransmit {
            self.stats.bump(&self.stats.retransmits_received);
        }

        let ring = match stream {
            StreamKind::Audio => &self.audio,
            _ => &self.video,
        };

        let result = ring.lock().receive(segment, now);
        match result {
            Ok(outcome) => {
                self.stats
                    .bytes_received
                    .fetch_add(segment.payload.len() as u64, Ordering::Relaxed);
                if let Some(displaced) = outcome.displaced {
                    self.stats.bump(&self.stats.frames_overwritten);
                    debug!("{:?} frame {} lost to overwrite", stream, displaced);
                }
                if let Some((frame_id, index)) = outcome.early_nack {
                    self.stats.bump(&self.stats.nacks_sent);
                    let _ = self.control_tx.send(ControlMessage::Nack {
                        stream,
                        frame_id,
                        index,
                    });
                }
            }
            Err(SegmentDrop::OldSegment) | Err(SegmentDrop::StaleFrame) => {
                self.stats.bump(&self.stats.old_segments);
            }
            Err(SegmentDrop::DuplicateSegment) => {
                // Redundancy, not an error; a NACKed segment and its
                // original may both arrive.
                self.stats.bump(&self.stats.duplicate_segments);
                if segment.retransmit {
                    debug!(
                        "retransmitted {:?} {}:{} arrived after the original",
                        stream, segment.frame_id, segment.index
                    );
                }
            }
            Err(SegmentDrop::Inconsistent) => {
                self.note_malformed("inconsistent segment layout", now);
            }
        }
    }

    fn handle_control(&mut self, segment: &Segment, now: Instant) {
        let message = match ControlMessage::decode(&segment.payload) {
            Ok(m) => m,
            Err(err) => {
                self.note_malformed("control decode failed", now);
                debug!("control decode error: {err}");
                return;
            }
        };

        match message {
            ControlMessage::Pong(id) => {
                if let Some((sent_id, sent_at)) = self.ping_in_flight {
                    if sent_id == id {
                        self.rtt = Some(now.duration_since(sent_at));
                        self.ping_in_flight = None;
                    }
                }
            }
            ControlMessage::Ping(id) => {
                let _ = self.control_tx.send(ControlMessage::Pong(id));
            }
            other => debug!("unexpected control message on media path: {other:?}"),
        }
    }

    /// Send a liveness ping.
    pub fn send_ping(&mut self, id: u32, now: Instant) {
        self.ping_in_flight = Some((id, now));
        let _ = self.control_tx.send(ControlMessage::Ping(id));
    }

    /// Run both NACK engines. Returns how many NACKs went out.
    pub fn tick_nacks(&mut self, now: Instant) -> usize {
        let stats = &self.stats;
        let control_tx = &self.control_tx;
        let mut sent = 0;

        let mut emit = |message: ControlMessage| {
            stats.bump(&stats.nacks_sent);
            let _ = control_tx.send(message);
        };

        sent += self.video_nack.tick(&mut self.video.lock(), now, &mut emit);
        sent += self.audio_nack.tick(&mut self.audio.lock(), now, &mut emit);
        sent
    }

    fn note_malformed(&mut self, reason: &str, now: Instant) {
        self.stats.bump(&self.stats.malformed_packets);
        let due = match self.last_malformed_log {
            Some(last) => now.duration_since(last) >= MALFORMED_LOG_WINDOW,
            None => true,
        };
        if due {
            warn!("dropping malformed packet: {reason}");
            self.last_malformed_log = Some(now);
        }
    }
}

/// Server endpoint: owns the media socket, the listener and the peer table.
///
/// The embedding application drives it from the orchestrator thread
/// (`accept_peer`, `reap`), the capture thread (`broadcast_*`) and the
/// network thread (`pump_media`).
pub struct ServerSession {
    config: SessionConfig,
    cipher: PacketCipher,
    media: MediaSocket,
    listener: BulkListener,
    pub peers: PeerTable,
    pub controls: Arc<EncoderControls>,
    pub stats: Arc<SessionStats>,
    video_store: Mutex<RetransmitStore>,
    audio_store: Mutex<RetransmitStore>,
    next_video_id: AtomicI32,
    next_audio_id: AtomicI32,
    connection_id: AtomicU32,
    started: Instant,
    ever_joined: AtomicBool,
    shutdown: Arc<AtomicBool>,
}

impl ServerSession {
    /// Bind both sockets on ephemeral ports.
    pub fn bind(config: SessionConfig) -> Result<Self, SessionError> {
        let any = SocketAddr::from(([0, 0, 0, 0], 0));
        let mut media = MediaSocket::bind(any)?;
        media.set_timeout(RecvTimeout::After(MEDIA_RECV_TIMEOUT))?;
        let listener = BulkListener::bind(any)?;

        let controls = EncoderControls::new(
            config.initial_bitrate,
            config.initial_bitrate.saturating_mul(4),
        );
        let cipher = PacketCipher::new(config.key);

        Ok(ServerSession {
            config,
            cipher,
            media,
            listener,
            peers: PeerTable::new(),
            controls: Arc::new(controls),
            stats: Arc::new(SessionStats::new()),
            video_store: Mutex::new(RetransmitStore::new(VIDEO_STORE_FRAMES)),
            audio_store: Mutex::new(RetransmitStore::new(AUDIO_STORE_FRAMES)),
            next_video_id: AtomicI32::new(1),
            next_audio_id: AtomicI32::new(1),
            connection_id: AtomicU32::new(rand::random()),
            started: Instant::now(),
            ever_joined: AtomicBool::new(false),
            shutdown: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn udp_port(&self) -> u16 {
        self.media.local_addr().map(|a| a.port()).unwrap_or(0)
    }

    pub fn tcp_port(&self) -> u16 {
        self.listener.local_addr().map(|a| a.port()).unwrap_or(0)
    }

    /// Correlation id for logs; re-rolled when the table empties.
    pub fn connection_id(&self) -> u32 {
        self.connection_id.load(Ordering::Relaxed)
    }

    /// Accept one client: reliable connection plus discovery handshake.
    pub fn accept_peer(&self, timeout: Duration) -> Result<Arc<Peer>, SessionError> {
        let (mut bulk, addr) = self.listener.accept_timeout(timeout)?;
        bulk.set_timeout(RecvTimeout::After(self.config.liveness_window))?;

        let request: DiscoveryRequest = discovery::recv_request(&mut bulk, &self.cipher)?;
        info!(
            "discovery from user {} at {} (caps: {:?})",
            request.user_id, addr, request.capabilities
        );

        let now = Instant::now();
        let peer = self.peers.add(now);
        let reply = DiscoveryReply {
            client_id: peer.id,
            udp_port: self.udp_port(),
            tcp_port: self.tcp_port(),
            connection_id: self.connection_id(),
            audio_sample_rate: self.config.audio_sample_rate,
        };
        discovery::send_reply(&mut bulk, &self.cipher, &reply)?;

        *peer.bulk.lock() = Some(bulk);
        self.ever_joined.store(true, Ordering::Relaxed);
        info!("peer {} joined (connection {:08x})", peer.id, self.connection_id());
        Ok(peer)
    }

    fn next_frame_id(&self, stream: StreamKind) -> i32 {
        match stream {
            StreamKind::Audio => self.next_audio_id.fetch_add(1, Ordering::Relaxed),
            _ => self.next_video_id.fetch_add(1, Ordering::Relaxed),
        }
    }

    /// Segment and send a video frame to every active peer. Returns the
    /// frame id it was stamped with.
    pub fn broadcast_video(&self, payload: &[u8], marker: FrameMarker) -> Result<i32, SessionError> {
        let mut frame = Vec::with_capacity(payload.len() + 1);
        frame.push(marker.encode());
        frame.extend_from_slice(payload);

        let id = self.next_frame_id(StreamKind::Video);
        self.broadcast(&frame, id, StreamKind::Video, &self.video_store)?;
        Ok(id)
    }

    /// Segment and send one audio frame (a group of segments).
    pub fn broadcast_audio(&self, pcm: &[u8]) -> Result<i32, SessionError> {
        let id = self.next_frame_id(StreamKind::Audio);
        self.broadcast(pcm, id, StreamKind::Audio, &self.audio_store)?;
        Ok(id)
    }

    fn broadcast(
        &self,
        frame: &[u8],
        id: i32,
        stream: StreamKind,
        store: &Mutex<RetransmitStore>,
    ) -> Result<(), SessionError> {
        let burst = self.controls.burst_bitrate() as i64;
        let mut store = store.lock();

        self.peers.for_each_active(|peer| {
            let Some(addr) = peer.media_addr() else {
                return;
            };
            let segmenter = Segmenter::new(&self.cipher, &self.media, addr);
            match segmenter.emit(frame, id, stream, burst, &mut store) {
                Ok(count) => {
                    self.stats
                        .packets_sent
                        .fetch_add(count as u64, Ordering::Relaxed);
                }
                Err(err) => {
                    self.stats.bump(&self.stats.send_errors);
                    warn!("send to peer {} failed: {err}", peer.id);
                }
            }
        });
        Ok(())
    }

    /// Receive and dispatch one control datagram from a client. Returns
    /// false on timeout.
    pub fn pump_media(&self, now: Instant) -> Result<bool, SessionError> {
        let mut buf = [0u8; RECV_BUFFER_SIZE];
        let (len, from) = match self.media.recv(&mut buf) {
            Ok(ok) => ok,
            Err(SocketError::Timeout) => return Ok(false),
            Err(err) => return Err(err.into()),
        };

        let plaintext = match self.cipher.open_datagram(&buf[..len]) {
            Ok(p) => p,
            Err(_) => {
                self.stats.bump(&self.stats.auth_failures);
                return Ok(true);
            }
        };
        let segment = match Segment::decode(&plaintext) {
            Ok(s) => s,
            Err(_) => {
                self.stats.bump(&self.stats.malformed_packets);
                return Ok(true);
            }
        };

        // First authenticated datagram from a new address binds it to the
        // peer that is still waiting for its media path.
        let peer = self.peers.find_by_media_addr(from).or_else(|| {
            let peer = self.peers.find_awaiting_media_addr()?;
            peer.set_media_addr(from);
            info!("peer {} media path established from {}", peer.id, from);
            Some(peer)
        });
        let Some(peer) = peer else {
            debug!("datagram from unknown address {from}");
            return Ok(true);
        };
        peer.touch(now);

        if segment.stream != StreamKind::Control {
            debug!("unexpected media segment from client {}", peer.id);
            return Ok(true);
        }
        let Ok(message) = ControlMessage::decode(&segment.payload) else {
            self.stats.bump(&self.stats.malformed_packets);
            return Ok(true);
        };

        // No sends target a deactivating peer, not even pong replies.
        let Some(active) = peer.activate() else {
            return Ok(true);
        };
        self.handle_client_control(&active, message, from);
        Ok(true)
    }

    fn handle_client_control(&self, peer: &ActiveRef, message: ControlMessage, from: SocketAddr) {
        match message {
            ControlMessage::Ping(id) => {
                let pong = Segment::control(&ControlMessage::Pong(id));
                let datagram = self.cipher.seal_datagram(&pong.encode());
                if self.media.send_to(from, &datagram).is_err() {
                    self.stats.bump(&self.stats.send_errors);
                }
            }
            ControlMessage::Nack { stream, frame_id, index } => {
                let store = match stream {
                    StreamKind::Audio => &self.audio_store,
                    _ => &self.video_store,
                };
                let segmenter = Segmenter::new(&self.cipher, &self.media, from);
                match segmenter.handle_nack(&store.lock(), frame_id, index) {
                    Ok(true) => self.stats.bump(&self.stats.retransmits_served),
                    Ok(false) => {}
                    Err(_) => self.stats.bump(&self.stats.send_errors),
                }
            }
            ControlMessage::KeyframeRequest { reinitialize } => {
                self.stats.bump(&self.stats.keyframe_requests);
                self.controls.request_keyframe(reinitialize);
            }
            ControlMessage::Bitrate { bps, burst_bps } => {
                self.controls.publish_bitrate(bps, burst_bps);
            }
            ControlMessage::Dimensions { width, height, dpi, codec_id } => {
                self.controls.set_dimensions(width, height, dpi, codec_id);
            }
            other => debug!("unexpected control from client {}: {other:?}", peer.id),
        }
    }

    /// Poll a peer's reliable socket for one clipboard payload.
    pub fn poll_clipboard(&self, peer: &Peer, timeout: Duration) -> Result<Option<Vec<u8>>, SessionError> {
        let mut guard = peer.bulk.lock();
        let Some(bulk) = guard.as_mut() else {
            return Err(SessionError::Closed);
        };
        bulk.set_timeout(RecvTimeout::After(timeout))?;

        let frame = match bulk.recv_framed() {
            Ok(f) => f,
            Err(SocketError::Timeout) => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let plaintext = self.cipher.open_datagram(&frame)?;
        match ControlMessage::decode(&plaintext) {
            Ok(ControlMessage::Clipboard(bytes)) => Ok(Some(bytes.to_vec())),
            Ok(other) => {
                debug!("unexpected bulk message: {other:?}");
                Ok(None)
            }
            Err(_) => {
                self.stats.bump(&self.stats.malformed_packets);
                Ok(None)
            }
        }
    }

    /// Liveness sweep: deactivate silent peers, tear down released ones and
    /// re-roll the connection id when the session empties.
    pub fn reap(&self, now: Instant) -> Vec<u32> {
        let reaped = self.peers.reap_silent(now, self.config.liveness_window);
        let removed = self.peers.finalize_deactivated();
        for peer in &removed {
            info!("peer {} torn down", peer.id);
        }
        if !removed.is_empty() && self.peers.active_count() == 0 {
            let fresh: u32 = rand::random();
            self.connection_id.store(fresh, Ordering::Relaxed);
            info!("all peers gone, connection id now {fresh:08x}");
        }
        reaped
    }

    /// An un-joined server past its exit timeout should terminate.
    pub fn should_self_terminate(&self, now: Instant) -> bool {
        match self.config.exit_timeout {
            Some(timeout) => {
                !self.ever_joined.load(Ordering::Relaxed)
                    && now.duration_since(self.started) > timeout
            }
            None => false,
        }
    }

    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    /// Run the orchestrator role: accept joining peers, dispatch inbound
    /// control traffic, supervise liveness and honour the self-termination
    /// timer. Returns when the shutdown flag is raised or the timer fires.
    ///
    /// The capture/encode path calls `broadcast_video`/`broadcast_audio`
    /// from its own thread; clipboard polling gets a thread per peer.
    pub fn run_orchestrator(&self) {
        const ACCEPT_SLICE: Duration = Duration::from_millis(50);

        while !self.is_closed() {
            let now = Instant::now();

            match self.accept_peer(ACCEPT_SLICE) {
                Ok(_) | Err(SessionError::Socket(SocketError::Timeout)) => {}
                Err(err) => warn!("accept failed: {err}"),
            }

            loop {
                match self.pump_media(Instant::now()) {
                    Ok(true) => {}
                    Ok(false) => break,
                    Err(err) => {
                        warn!("media pump failed: {err}");
                        break;
                    }
                }
            }

            self.reap(now);

            if self.should_self_terminate(now) {
                info!("no peer ever joined, self-terminating");
                self.close();
            }
        }
    }

    /// Spawn [`run_orchestrator`](Self::run_orchestrator) on its own thread.
    pub fn spawn_orchestrator(self: &Arc<Self>) -> std::io::Result<JoinHandle<()>> {
        let session = self.clone();
        thread::Builder::new()
            .name("fg-orchestrator".into())
            .spawn(move || session.run_orchestrator())
    }

    /// Begin teardown; loops observe the flag and exit after their current
    /// send completes.
    pub fn close(&self) {
        self.shutdown.store(true, Ordering::Release);
        for peer in self.peers.peers.read().values() {
            peer.begin_deactivation();
        }
        self.peers.finalize_deactivated();
    }

    pub fn is_closed(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }
}

/// Client endpoint, connected and ready to stream.
pub struct ClientSession {
    cipher: PacketCipher,
    media: MediaSocket,
    server_media_addr: SocketAddr,
    bulk: Mutex<BulkSocket>,
    pub reply: DiscoveryReply,
    pub stats: Arc<SessionStats>,
    control_tx: Sender<ControlMessage>,
    control_rx: Receiver<ControlMessage>,
    receiver: Option<MediaReceiver>,
    config: SessionConfig,
    shutdown: Arc<AtomicBool>,
    threads: Vec<JoinHandle<()>>,
}

impl ClientSession {
    /// Connect to a server's reliable port and complete discovery.
    pub fn connect(
        server: SocketAddr,
        config: SessionConfig,
        user_id: u64,
    ) -> Result<ClientSession, SessionError> {
        let cipher = PacketCipher::new(config.key);

        let mut bulk = BulkSocket::connect(server, config.liveness_window)?;
        bulk.set_timeout(RecvTimeout::After(config.liveness_window))?;
        discovery::send_request(
            &mut bulk,
            &cipher,
            &DiscoveryRequest {
                user_id,
                capabilities: vec!["video".into(), "audio".into(), "clipboard".into()],
            },
        )?;
        let reply = discovery::recv_reply(&mut bulk, &cipher)?;

        let mut media = MediaSocket::bind(SocketAddr::from(([0, 0, 0, 0], 0)))?;
        media.set_timeout(RecvTimeout::After(MEDIA_RECV_TIMEOUT))?;
        let server_media_addr = SocketAddr::new(server.ip(), reply.udp_port);

        let stats = Arc::new(SessionStats::new());
        let (control_tx, control_rx) = unbounded();
        let receiver = MediaReceiver::new(cipher.clone(), control_tx.clone(), stats.clone());

        info!(
            "joined as client {} (connection {:08x})",
            reply.client_id, reply.connection_id
        );

        Ok(ClientSession {
            cipher,
            media,
            server_media_addr,
            bulk: Mutex::new(bulk),
            reply,
            stats,
            control_tx,
            control_rx,
            receiver: Some(receiver),
            config,
            shutdown: Arc::new(AtomicBool::new(false)),
            threads: Vec::new(),
        })
    }

    /// Borrow the receive pipeline for manual driving (tests, custom loops).
    pub fn receiver_mut(&mut self) -> Option<&mut MediaReceiver> {
        self.receiver.as_mut()
    }

    /// Queue a control message for the network thread to send.
    pub fn send_control(&self, message: ControlMessage) {
        let _ = self.control_tx.send(message);
    }

    /// Send a clipboard payload over the reliable socket.
    pub fn send_clipboard(&self, bytes: &[u8]) -> Result<(), SessionError> {
        let message = ControlMessage::Clipboard(bytes::Bytes::copy_from_slice(bytes));
        let sealed = self.cipher.seal_datagram(&message.encode());
        self.bulk.lock().send_framed(&sealed)?;
        Ok(())
    }

    /// Spawn the network and playback threads.
    ///
    /// The network thread owns the socket and the receive pipeline; the
    /// playback thread owns the schedulers and sinks. Both exit when the
    /// shutdown flag is raised.
    pub fn start(
        &mut self,
        mut audio_sink: Box<dyn AudioSink + Send>,
        mut video_sink: Box<dyn VideoSink + Send>,
    ) -> Result<(), SessionError> {
        let mut receiver = self.receiver.take().ok_or(SessionError::Closed)?;
        let video_ring = receiver.video.clone();
        let audio_ring = receiver.audio.clone();

        let media = self.media.try_clone()?;
        let server_addr = self.server_media_addr;
        let cipher = self.cipher.clone();
        let control_rx = self.control_rx.clone();
        let shutdown = self.shutdown.clone();
        let stats = self.stats.clone();
        let initial_bitrate = self.config.initial_bitrate;
        let sample_rate = self.reply.audio_sample_rate;

        let network = thread::Builder::new()
            .name("fg-network".into())
            .spawn(move || {
                let mut ping_id = 0u32;
                let mut last_ping = Instant::now() - PING_INTERVAL;
                let mut bitrate = BitrateController::new(initial_bitrate, Instant::now());
                let mut nacks_seen = 0u64;
                let mut buf = [0u8; RECV_BUFFER_SIZE];

                while !shutdown.load(Ordering::Acquire) {
                    let now = Instant::now();

                    match media.recv(&mut buf) {
                        Ok((len, _)) => receiver.handle_datagram(&buf[..len], now),
                        Err(SocketError::Timeout) => {}
                        Err(SocketError::Closed) => break,
                        Err(SocketError::Io(err)) => {
                            warn!("media socket error: {err}");
                            break;
                        }
                    }

                    receiver.tick_nacks(now);

                    if now.duration_since(last_ping) >= PING_INTERVAL {
                        ping_id = ping_id.wrapping_add(1);
                        receiver.send_ping(ping_id, now);
                        last_ping = now;
                    }

                    // The NACK counters double as the loss signal for the
                    // bitrate window.
                    let total_nacks = stats.nacks_sent.load(Ordering::Relaxed);
                    bitrate.record_nacks(total_nacks - nacks_seen);
                    nacks_seen = total_nacks;
                    if let Some(update) = bitrate.update(now) {
                        let _ = receiver.control_tx.send(ControlMessage::Bitrate {
                            bps: update.bitrate,
                            burst_bps: update.burst_bitrate,
                        });
                    }

                    // Drain queued control traffic; completing in-progress
                    // sends before honouring shutdown.
                    while let Ok(message) = control_rx.try_recv() {
                        let segment = Segment::control(&message);
                        let datagram = cipher.seal_datagram(&segment.encode());
                        match media.send_to(server_addr, &datagram) {
                            Ok(_) => {
                                stats.packets_sent.fetch_add(1, Ordering::Relaxed);
                            }
                            Err(_) => {
                                stats.bump(&stats.send_errors);
                            }
                        }
                    }
                }
            })?;

        let shutdown = self.shutdown.clone();
        let control_tx = self.control_tx.clone();
        let stats = self.stats.clone();

        let playback = thread::Builder::new()
            .name("fg-playback".into())
            .spawn(move || {
                let mut audio_scheduler = AudioScheduler::new();
                audio_scheduler.set_format(sample_rate, 2);
                let mut video_scheduler = VideoScheduler::new();

                while !shutdown.load(Ordering::Acquire) {
                    let now = Instant::now();

                    let audio_outcome = {
                        let mut ring = audio_ring.lock();
                        audio_scheduler.poll(&mut ring, audio_sink.as_mut())
                    };
                    let video_outcome = {
                        let mut ring = video_ring.lock();
                        video_scheduler.poll(&mut ring, video_sink.as_mut(), now, |m| {
                            let _ = control_tx.send(m);
                        })
                    };

                    if video_outcome.keyframe_requested {
                        stats.bump(&stats.keyframe_requests);
                    }
                    let skipped = audio_outcome.frames_flushed + video_outcome.skipped;
                    if skipped > 0 {
                        stats
                            .frames_skipped
                            .fetch_add(skipped as u64, Ordering::Relaxed);
                    }

                    if !video_outcome.rendered && audio_outcome.frames_played == 0 {
                        thread::sleep(Duration::from_millis(1));
                    }
                }
            })?;

        self.threads.push(network);
        self.threads.push(playback);
        Ok(())
    }

    /// Raise the shutdown flag and join the worker threads.
    pub fn stop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        for handle in self.threads.drain(..) {
            let _ = handle.join();
        }
    }
}

impl Drop for ClientSession {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::ring::Frame;
    use crate::wire::MAX_PAYLOAD;

    /// Route `log` output through env_logger so failing runs can be
    /// replayed with `RUST_LOG=debug`.
    fn init_logging() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn test_config() -> SessionConfig {
        SessionConfig::from_hex_key("00112233445566778899aabbccddeeff").unwrap()
    }

    struct NullAudio;

    impl AudioSink for NullAudio {
        fn queued_bytes(&self) -> usize {
            crate::input::audio::AUDIO_QUEUE_TARGET
        }
        fn queue(&mut self, _pcm: &[u8]) {}
        fn reconfigure(&mut self, _rate: u32, _channels: u8) {}
    }

    struct CollectingVideo {
        frames: Vec<i32>,
    }

    impl VideoSink for CollectingVideo {
        fn render(&mut self, frame: &Frame, _present: bool) {
            self.frames.push(frame.id);
        }
    }

    /// Connect a client to a server over loopback, completing discovery and
    /// binding the media path.
    fn establish() -> (ServerSession, ClientSession, Arc<Peer>) {
        init_logging();
        let server = ServerSession::bind(test_config()).unwrap();
        let tcp = server.tcp_port();
        let addr: SocketAddr = format!("127.0.0.1:{tcp}").parse().unwrap();

        let client_thread =
            thread::spawn(move || ClientSession::connect(addr, test_config(), 7).unwrap());
        let peer = server.accept_peer(Duration::from_secs(2)).unwrap();
        let mut client = client_thread.join().unwrap();

        // Bind the media path: the client's first control datagram teaches
        // the server its address.
        client.send_control(ControlMessage::Ping(1));
        pump_client_control(&client, &server);
        assert!(peer.media_addr().is_some());

        // Absorb the pong so later drains see only test traffic.
        drain_media(&mut client, Instant::now(), |_| true);

        (server, client, peer)
    }

    /// Seal and push everything in the client's control queue to the
    /// server, then let the server process it.
    fn pump_client_control(client: &ClientSession, server: &ServerSession) {
        while let Ok(message) = client.control_rx.try_recv() {
            let segment = Segment::control(&message);
            let datagram = client.cipher.seal_datagram(&segment.encode());
            client
                .media
                .send_to(SocketAddr::new("127.0.0.1".parse().unwrap(), server.udp_port()), &datagram)
                .unwrap();
        }
        let deadline = Instant::now() + Duration::from_millis(500);
        while Instant::now() < deadline {
            if !server.pump_media(Instant::now()).unwrap() {
                break;
            }
        }
    }

    /// Drain every datagram queued on the client's media socket into the
    /// receive pipeline, except those a filter rejects.
    fn drain_media(
        client: &mut ClientSession,
        now: Instant,
        mut keep: impl FnMut(&Segment) -> bool,
    ) -> usize {
        let cipher = client.cipher.clone();
        let mut buf = [0u8; RECV_BUFFER_SIZE];
        let mut fed = 0;
        loop {
            match client.media.recv(&mut buf) {
                Ok((len, _)) => {
                    let plain = cipher.open_datagram(&buf[..len]).unwrap();
                    let segment = Segment::decode(&plain).unwrap();
                    if keep(&segment) {
                        client.receiver_mut().unwrap().handle_datagram(&buf[..len], now);
                        fed += 1;
                    }
                }
                Err(SocketError::Timeout) => return fed,
                Err(err) => panic!("media drain failed: {err}"),
            }
        }
    }

    fn render_available(client: &mut ClientSession, sink: &mut CollectingVideo, now: Instant) {
        let receiver = client.receiver.as_mut().unwrap();
        let video = receiver.video.clone();
        let mut scheduler = VideoScheduler::new();
        loop {
            let mut ring = video.lock();
            let outcome = scheduler.poll(&mut ring, sink, now, |_| {});
            if !outcome.rendered {
                break;
            }
        }
    }

    #[test]
    fn test_loss_free_video_stream() {
        // Sixty 10-segment frames, all delivered: everything renders, no
        // NACKs, no drops.
        let (server, mut client, _peer) = establish();

        // Send in small bursts, draining between them, so the loopback
        // socket buffer never overflows.
        let payload = vec![0x5Au8; 9 * MAX_PAYLOAD + 64];
        let now = Instant::now();
        let mut fed = 0;
        for _ in 0..12 {
            for _ in 0..5 {
                server.broadcast_video(&payload, FrameMarker::default()).unwrap();
            }
            fed += drain_media(&mut client, now, |_| true);
        }
        assert_eq!(fed, 600);

        let mut sink = CollectingVideo { frames: Vec::new() };
        render_available(&mut client, &mut sink, now);

        assert_eq!(sink.frames.len(), 60);
        assert_eq!(sink.frames.last(), Some(&60));
        assert_eq!(
            client.receiver.as_ref().unwrap().video.lock().last_rendered_id(),
            60
        );

        let snapshot = client.stats.snapshot();
        assert_eq!(snapshot.nacks_sent, 0);
        assert_eq!(snapshot.frames_overwritten, 0);

        let nacks = client
            .receiver
            .as_mut()
            .unwrap()
            .tick_nacks(now + Duration::from_millis(100));
        assert_eq!(nacks, 0);
    }

    #[test]
    fn test_single_segment_loss_recovers_via_nack() {
        let (server, mut client, _peer) = establish();

        // Segment (30, 4) is lost in transit.
        let payload = vec![0xC3u8; 9 * MAX_PAYLOAD + 64];
        let mut now = Instant::now();
        let mut fed = 0;
        for _ in 0..8 {
            for _ in 0..5 {
                server.broadcast_video(&payload, FrameMarker::default()).unwrap();
            }
            fed += drain_media(&mut client, now, |s| !(s.frame_id == 30 && s.index == 4));
        }
        assert_eq!(fed, 399);

        // The gap scan finds the hole and emits exactly one NACK.
        now += Duration::from_millis(20);
        let sent = client.receiver.as_mut().unwrap().tick_nacks(now);
        assert_eq!(sent, 1);
        let message = client.control_rx.try_recv().unwrap();
        assert_eq!(
            message,
            ControlMessage::Nack {
                stream: StreamKind::Video,
                frame_id: 30,
                index: 4,
            }
        );

        // Relay it to the server, which serves the retransmission.
        let segment = Segment::control(&message);
        let datagram = client.cipher.seal_datagram(&segment.encode());
        client
            .media
            .send_to(client.server_media_addr, &datagram)
            .unwrap();
        while server.pump_media(Instant::now()).unwrap() {}
        assert_eq!(server.stats.snapshot().retransmits_served, 1);

        // The replayed segment completes frame 30.
        now += Duration::from_millis(5);
        let fed = drain_media(&mut client, now, |s| {
            assert!(s.retransmit);
            assert_eq!((s.frame_id, s.index), (30, 4));
            true
        });
        assert_eq!(fed, 1);

        let mut sink = CollectingVideo { frames: Vec::new() };
        render_available(&mut client, &mut sink, now);
        assert_eq!(sink.frames.len(), 40);
        assert_eq!(
            client.receiver.as_ref().unwrap().video.lock().last_rendered_id(),
            40
        );

        let snapshot = client.stats.snapshot();
        assert_eq!(snapshot.nacks_sent, 1);
        assert_eq!(snapshot.retransmits_received, 1);
    }

    #[test]
    fn test_peer_liveness_timeout() {
        init_logging();
        let mut config = test_config();
        config.liveness_window = Duration::from_millis(50);

        let server = ServerSession::bind(config).unwrap();
        let now = Instant::now();
        let peer = server.peers.add(now);
        peer.set_media_addr("127.0.0.1:9999".parse().unwrap());
        assert_eq!(server.peers.active_count(), 1);
        let first_id = server.connection_id();

        // Within the window: nothing happens.
        assert!(server.reap(now + Duration::from_millis(20)).is_empty());

        // Silent past the window: the peer enters deactivation, broadcasts
        // skip it, and with no holders it is torn down in the same sweep.
        let reaped = server.reap(now + Duration::from_millis(80));
        assert_eq!(reaped, vec![peer.id]);
        assert!(peer.is_deactivating());
        let mut visited = 0;
        server.peers.for_each_active(|_| visited += 1);
        assert_eq!(visited, 0);

        assert!(peer.activate().is_none());
        assert_eq!(server.peers.len(), 0, "peer should be torn down once idle");
        assert_eq!(server.peers.active_count(), 0);

        // The connection id was re-rolled for the next join (random, so the
        // value itself may rarely collide with the old one).
        let _ = first_id;
    }

    #[test]
    fn test_active_ref_blocks_teardown() {
        let table = PeerTable::new();
        let now = Instant::now();
        let peer = table.add(now);

        let held = peer.activate().expect("peer is active");
        peer.begin_deactivation();

        // Still referenced: teardown waits.
        assert!(table.finalize_deactivated().is_empty());
        assert_eq!(table.len(), 1);

        // No new references while deactivating.
        assert!(peer.activate().is_none());

        drop(held);
        let removed = table.finalize_deactivated();
        assert_eq!(removed.len(), 1);
        assert_eq!(table.len(), 0);
    }

    #[test]
    fn test_clipboard_rides_bulk_socket() {
        let (server, client, peer) = establish();

        client.send_clipboard(b"copied between machines").unwrap();
        let received = server
            .poll_clipboard(&peer, Duration::from_millis(500))
            .unwrap()
            .expect("clipboard payload");
        assert_eq!(received, b"copied between machines");

        // Nothing else queued.
        assert!(server
            .poll_clipboard(&peer, Duration::from_millis(20))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_bitrate_and_keyframe_controls_reach_encoder() {
        let (server, client, _peer) = establish();

        client.send_control(ControlMessage::Bitrate {
            bps: 6_000_000,
            burst_bps: 24_000_000,
        });
        client.send_control(ControlMessage::KeyframeRequest { reinitialize: true });
        client.send_control(ControlMessage::Dimensions {
            width: 1920,
            height: 1080,
            dpi: 96,
            codec_id: 1,
        });
        pump_client_control(&client, &server);

        assert_eq!(server.controls.take_settings(), Some((6_000_000, 24_000_000)));
        assert_eq!(server.controls.take_keyframe_request(), Some(true));
        assert_eq!(server.controls.take_keyframe_request(), None);
        assert_eq!(server.controls.dimensions(), Some((1920, 1080, 96, 1)));
        assert_eq!(server.controls.burst_bitrate(), 24_000_000);
    }

    #[test]
    fn test_ping_pong_rtt() {
        let (server, mut client, peer) = establish();

        let now = Instant::now();
        client.receiver_mut().unwrap().send_ping(9, now);
        pump_client_control(&client, &server);
        assert!(peer.silent_for(Instant::now()) < Duration::from_secs(1));

        // The pong comes back on the media socket.
        let fed = drain_media(&mut client, now + Duration::from_millis(5), |_| true);
        assert_eq!(fed, 1);
        assert!(client.receiver.as_ref().unwrap().rtt().is_some());
    }

    #[test]
    fn test_orchestrator_thread_accepts_and_shuts_down() {
        init_logging();
        let server = Arc::new(ServerSession::bind(test_config()).unwrap());
        let handle = server.spawn_orchestrator().unwrap();

        // The handshake completes against the orchestrator thread.
        let addr: SocketAddr = format!("127.0.0.1:{}", server.tcp_port()).parse().unwrap();
        let client = ClientSession::connect(addr, test_config(), 99).unwrap();
        assert_eq!(client.reply.client_id, 1);
        assert_eq!(server.peers.len(), 1);

        server.close();
        handle.join().unwrap();
    }

    #[test]
    fn test_self_termination_when_never_joined() {
        init_logging();
        let mut config = test_config();
        config.exit_timeout = Some(Duration::from_millis(10));
        let server = ServerSession::bind(config).unwrap();

        let later = Instant::now() + Duration::from_millis(50);
        assert!(server.should_self_terminate(later));

        // Once a peer has ever joined, the timer is disarmed.
        server.ever_joined.store(true, Ordering::Relaxed);
        assert!(!server.should_self_terminate(later));
    }

    #[test]
    fn test_streaming_threads_end_to_end() {
        let (server, mut client, peer) = establish();

        client
            .start(Box::new(NullAudio), Box::new(CountingVideo::new()))
            .unwrap();

        let payload = vec![0x11u8; 2 * MAX_PAYLOAD];
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut sent = 0;
        while Instant::now() < deadline && sent < 30 {
            server.broadcast_video(&payload, FrameMarker::default()).unwrap();
            sent += 1;
            // Serve pings and NACKs arriving meanwhile.
            while server.pump_media(Instant::now()).unwrap() {}
            thread::sleep(Duration::from_millis(5));
        }

        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            while server.pump_media(Instant::now()).unwrap() {}
            if client.stats.snapshot().packets_received >= 60 {
                break;
            }
            thread::sleep(Duration::from_millis(5));
        }

        client.stop();
        let snapshot = client.stats.snapshot();
        assert!(snapshot.packets_received >= 60, "got {snapshot:?}");
        assert!(peer.media_addr().is_some());
        server.close();
        assert!(server.is_closed());
    }

    struct CountingVideo {
        rendered: usize,
    }

    impl CountingVideo {
        fn new() -> Self {
            CountingVideo { rendered: 0 }
        }
    }

    impl VideoSink for CountingVideo {
        fn render(&mut self, _frame: &Frame, _present: bool) {
            self.rendered += 1;
        }
    }
}
