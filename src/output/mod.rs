//! Send side: frame segmentation, burst pacing and retransmission serving.

pub mod segmenter;

pub use segmenter::{RetransmitStore, Segmenter};
