//! Receive side: reassembly, loss recovery and playback scheduling.

pub mod audio;
pub mod nack;
pub mod ring;
pub mod video;

pub use audio::{AudioScheduler, AudioSink};
pub use nack::NackEngine;
pub use ring::{Frame, ReceiveOutcome, RingBuffer};
pub use video::{VideoScheduler, VideoSink};
