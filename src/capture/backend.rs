use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::CaptureError;

/// One block of captured audio: f32 samples in [-1.0, 1.0], interleaved
/// when multi-channel, at the device-native rate.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    pub samples: Vec<f32>,
    pub channels: u16,
    pub sample_rate: u32,
}

impl AudioFrame {
    pub fn duration_secs(&self) -> f64 {
        self.samples.len() as f64 / (self.sample_rate as f64 * self.channels as f64)
    }
}

/// One captured video frame, tightly-packed RGB8.
#[derive(Debug, Clone)]
pub struct VideoFrame {
    pub width: u32,
    pub height: u32,
    pub rgb: Vec<u8>,
}

/// Configuration for audio capture backends.
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Preferred sample rate; the backend may fall back to the device
    /// default, which then appears in the frames and the MIME tag.
    pub preferred_sample_rate: u32,
    /// Target channel count (the session uses mono).
    pub channels: u16,
    /// Named input device, or the platform default.
    pub device: Option<String>,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            preferred_sample_rate: 16000,
            channels: 1,
            device: None,
        }
    }
}

/// Audio capture backend: owns the input device handle for the session.
///
/// `start` acquires the device (this is the user-consent point on platforms
/// that gate microphone access) and yields frames over a channel at the
/// device's natural callback granularity. The receiver closing without a
/// `stop` call means the device was lost.
#[async_trait]
pub trait CaptureBackend: Send + Sync {
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>, CaptureError>;

    /// Stop the device track. Idempotent.
    async fn stop(&mut self) -> Result<(), CaptureError>;

    fn is_capturing(&self) -> bool;

    /// Actual capture rate, valid after `start`.
    fn sample_rate(&self) -> u32;

    /// Backend name for logging.
    fn name(&self) -> &str;
}

/// Video capture backend for the video-augmented variant. Pull-based: the
/// pipeline samples the latest frame on its own timer, so a slow source
/// never blocks audio.
#[async_trait]
pub trait VideoBackend: Send + Sync {
    async fn start(&mut self) -> Result<(), CaptureError>;

    /// Latest available frame, or `None` if nothing new was produced yet.
    async fn latest_frame(&mut self) -> Result<Option<VideoFrame>, CaptureError>;

    /// Stop the video track. Idempotent.
    async fn stop(&mut self) -> Result<(), CaptureError>;

    fn name(&self) -> &str;
}
