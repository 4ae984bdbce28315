//! Session configuration.
//!
//! The orchestrator is configured with the shared AES key (16 binary bytes
//! or 32 hex characters), an initial encoder bitrate, the peer liveness
//! window and an optional self-termination timeout for servers nobody joins.

use std::time::Duration;

use crate::cipher::KEY_SIZE;
use crate::error::SessionError;

/// Default liveness window: a peer silent for this long is deactivated.
pub const DEFAULT_LIVENESS_WINDOW: Duration = Duration::from_secs(3);

/// Default self-termination timeout for an un-joined server.
pub const DEFAULT_EXIT_TIMEOUT: Duration = Duration::from_secs(60);

/// Default audio sample rate advertised during discovery.
pub const DEFAULT_AUDIO_SAMPLE_RATE: u32 = 44_100;

/// Configuration for one session endpoint.
#[derive(Clone)]
pub struct SessionConfig {
    /// Shared symmetric key for the packet cipher.
    pub key: [u8; KEY_SIZE],
    /// Initial encoder target bitrate, bits per second.
    pub initial_bitrate: u32,
    /// Maximum peer silence before deactivation begins.
    pub liveness_window: Duration,
    /// How long an un-joined server waits before self-terminating.
    /// `None` disables auto-exit.
    pub exit_timeout: Option<Duration>,
    /// Sample rate of the audio stream.
    pub audio_sample_rate: u32,
}

impl SessionConfig {
    pub fn new(key: [u8; KEY_SIZE]) -> Self {
        SessionConfig {
            key,
            initial_bitrate: 10_000_000,
            liveness_window: DEFAULT_LIVENESS_WINDOW,
            exit_timeout: Some(DEFAULT_EXIT_TIMEOUT),
            audio_sample_rate: DEFAULT_AUDIO_SAMPLE_RATE,
        }
    }

    /// Build a config from a 32-character hex key string.
    pub fn from_hex_key(hex_key: &str) -> Result<Self, SessionError> {
        Ok(Self::new(parse_hex_key(hex_key)?))
    }
}

/// Parse key material given as a hexadecimal string.
pub fn parse_hex_key(hex_key: &str) -> Result<[u8; KEY_SIZE], SessionError> {
    let bytes = hex::decode(hex_key.trim())
        .map_err(|e| SessionError::Config(format!("invalid hex key: {e}")))?;
    bytes.as_slice().try_into().map_err(|_| {
        SessionError::Config(format!(
            "key must be {} bytes, got {}",
            KEY_SIZE,
            bytes.len()
        ))
    })
}

/// Interpret a command-line style timeout: `-1` disables auto-exit, any
/// positive value is seconds.
pub fn exit_timeout_from_secs(secs: i64) -> Result<Option<Duration>, SessionError> {
    match secs {
        -1 => Ok(None),
        s if s > 0 => Ok(Some(Duration::from_secs(s as u64))),
        s => Err(SessionError::Config(format!("invalid exit timeout: {s}"))),
    }
}
