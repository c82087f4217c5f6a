//! Gapless playback scheduling
//!
//! Every decoded chunk is scheduled against the output device's own clock
//! at `max(now, next_start_time)`, and the cursor advances by the chunk's
//! duration. Chunks arriving faster than real time queue back-to-back with
//! no overlap; chunks arriving slower leave a natural silence gap. The
//! cursor is the only mutable state in the playback path, and it is owned
//! here, driven by the single inbound dispatch task, so it needs no lock.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use crate::error::{PlaybackError, SessionError};
use crate::pcm;

/// A decoded block of f32 samples at the output rate, mono.
#[derive(Debug, Clone)]
pub struct PlaybackBuffer {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl PlaybackBuffer {
    pub fn duration_secs(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

/// The output device boundary.
///
/// `now` is the device's monotonic clock (seconds), distinct from wall
/// time. `schedule` must honor future start times itself — that is what
/// lets the scheduler get away with a single cursor instead of a queue.
#[async_trait]
pub trait OutputBackend: Send + Sync {
    fn now(&self) -> f64;

    fn schedule(&self, buffer: PlaybackBuffer, start_time: f64) -> Result<(), PlaybackError>;

    /// Release the output device. Idempotent.
    async fn close(&self) -> Result<(), PlaybackError>;
}

/// Decodes incoming audio chunks and schedules them gaplessly.
pub struct PlaybackScheduler {
    output: Arc<dyn OutputBackend>,
    sample_rate: u32,
    next_start_time: f64,
    chunks_scheduled: u64,
}

impl PlaybackScheduler {
    pub fn new(output: Arc<dyn OutputBackend>, sample_rate: u32) -> Self {
        Self {
            output,
            sample_rate,
            next_start_time: 0.0,
            chunks_scheduled: 0,
        }
    }

    /// Decode one PCM16 chunk and schedule it. Returns the start time the
    /// buffer was scheduled at.
    ///
    /// Must be called in chunk arrival order; the non-overlap guarantee
    /// relies on it.
    pub fn enqueue(&mut self, pcm_bytes: &[u8]) -> Result<f64, SessionError> {
        let frame = pcm::from_pcm16(pcm_bytes, 1, self.sample_rate)?;
        let buffer = PlaybackBuffer {
            samples: frame.samples,
            sample_rate: self.sample_rate,
        };

        let duration = buffer.duration_secs();
        let start_time = self.output.now().max(self.next_start_time);
        self.output.schedule(buffer, start_time)?;
        self.next_start_time = start_time + duration;
        self.chunks_scheduled += 1;

        debug!(
            "scheduled {:.3}s of audio at t={:.3} (cursor now {:.3})",
            duration, start_time, self.next_start_time
        );
        Ok(start_time)
    }

    pub fn next_start_time(&self) -> f64 {
        self.next_start_time
    }

    pub fn chunks_scheduled(&self) -> u64 {
        self.chunks_scheduled
    }
}
