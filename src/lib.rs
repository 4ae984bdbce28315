//! Wire and media transport core for interactive remote-desktop streaming.
//!
//! One endpoint captures, encodes and sends screen and audio frames over an
//! unreliable datagram channel; the other reassembles, recovers losses and
//! schedules playback while streaming control traffic back. This crate is
//! the transport core only: capture sources, codecs, input injection and
//! rendering live outside it and connect through the [`input::AudioSink`]
//! and [`input::VideoSink`] traits and the [`session::EncoderControls`]
//! handle.
//!
//! # Layout
//!
//! - [`cipher`] — authenticated per-datagram encryption
//! - [`wire`] — segment and control-message formats
//! - [`socket`] — timeout-aware datagram and reliable sockets
//! - [`output`] — segmentation, burst pacing, retransmission serving
//! - [`input`] — reassembly ring, NACK engine, playback schedulers
//! - [`bitrate`] — loss-driven encoder bitrate governor
//! - [`session`] — orchestration: discovery, peers, liveness, threads
//!
//! # Data path
//!
//! ```text
//! encoder ─► Segmenter ─► Cipher ─► socket ─ ─ network ─ ─ socket ─► Cipher
//!                                                                      │
//!         render ◄─ scheduler ◄─ ring buffer ◄─ segment decode ◄───────┘
//! ```

pub mod bitrate;
pub mod cipher;
pub mod config;
pub mod error;
pub mod input;
pub mod output;
pub mod session;
pub mod socket;
pub mod stats;
pub mod wire;

pub use bitrate::{BitrateController, BitrateUpdate};
pub use cipher::PacketCipher;
pub use config::SessionConfig;
pub use error::{CipherError, SessionError, SocketError, WireError};
pub use input::{AudioScheduler, AudioSink, Frame, NackEngine, RingBuffer, VideoScheduler, VideoSink};
pub use output::{RetransmitStore, Segmenter};
pub use session::{ClientSession, EncoderControls, MediaReceiver, Peer, PeerTable, ServerSession};
pub use stats::{SessionStats, StatsSnapshot};
pub use wire::{ControlMessage, FrameMarker, Segment, StreamKind, MAX_PAYLOAD};
