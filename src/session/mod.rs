//! Live session management
//!
//! This module provides the `LiveSession` abstraction that manages:
//! - Microphone (and optional screen) capture
//! - The duplex session channel to the model
//! - Response dispatch and gapless playback
//! - Lifecycle state, teardown, and session statistics

mod config;
mod controller;
mod stats;

pub use config::{default_termination_phrases, SessionConfig, VideoConfig};
pub use controller::{LiveSession, SessionState, StopReason};
pub use stats::{SessionStats, TranscriptSegment};
