//! Error types for the transport core.
//!
//! Transient I/O (timeouts) is modelled as a distinct variant so callers can
//! loop on it without logging at error level. Everything else is reported to
//! the session orchestrator, which is the single place that decides between
//! teardown and continue.

use std::io;
use thiserror::Error;

/// Errors raised while sealing or opening encrypted datagrams.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum CipherError {
    /// The MAC did not verify. The payload was never touched.
    #[error("packet authentication failed")]
    AuthenticationFailed,

    /// Length fields are inconsistent with the buffer.
    #[error("malformed packet: {0}")]
    MalformedPacket(&'static str),
}

/// Errors raised while decoding segment or control payloads.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum WireError {
    #[error("truncated payload: need {need} bytes, have {have}")]
    Truncated { need: usize, have: usize },

    #[error("unknown stream kind {0}")]
    UnknownStream(u8),

    #[error("unknown control message tag {0}")]
    UnknownControl(u8),

    #[error("payload of {0} bytes exceeds the maximum segment payload")]
    PayloadTooLarge(usize),
}

/// Errors raised by the datagram and reliable sockets.
#[derive(Error, Debug)]
pub enum SocketError {
    /// No data arrived within the configured timeout. Retryable.
    #[error("receive timed out")]
    Timeout,

    /// The peer closed the connection or the socket was shut down.
    #[error("socket closed")]
    Closed,

    #[error("socket I/O error: {0}")]
    Io(#[from] io::Error),
}

impl SocketError {
    /// True for errors a receive loop should simply retry on.
    pub fn is_transient(&self) -> bool {
        matches!(self, SocketError::Timeout)
    }
}

/// Errors raised during session setup and teardown.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("discovery handshake failed: {0}")]
    HandshakeFailed(String),

    /// The session has been closed; no further operations are possible.
    #[error("session closed")]
    Closed,

    #[error("invalid session configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Socket(#[from] SocketError),

    #[error(transparent)]
    Cipher(#[from] CipherError),

    #[error("session I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Reasons a received segment was dropped without being stored.
///
/// These are expected conditions on a lossy, reordering channel; they are
/// counted in [`crate::stats::SessionStats`] and never treated as failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentDrop {
    /// The segment's frame id is at or below the rendered watermark.
    OldSegment,
    /// The index already arrived for this frame.
    DuplicateSegment,
    /// The slot holds a newer frame than the segment's.
    StaleFrame,
    /// The segment's index or size disagrees with the frame's layout.
    Inconsistent,
}
