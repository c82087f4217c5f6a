//! Capture pipeline
//!
//! Owns the input device seam and the tasks that turn a continuous device
//! stream into tagged realtime-input chunks:
//! - `CaptureBackend` / `VideoBackend` traits (the device boundary)
//! - fixed-block frame assembly
//! - the encode-and-forward pipeline tasks
//! - concrete backends: cpal microphone, xcap screen frames

pub mod backend;
pub mod framer;
pub mod mic;
pub mod pipeline;
pub mod video;

pub use backend::{AudioFrame, CaptureBackend, CaptureConfig, VideoBackend, VideoFrame};
pub use framer::FrameAssembler;
pub use mic::MicBackend;
pub use video::ScreenBackend;
