//! Playback scheduling against the output device clock.

pub mod scheduler;
pub mod sink;

pub use scheduler::{OutputBackend, PlaybackBuffer, PlaybackScheduler};
pub use sink::SpeakerSink;
