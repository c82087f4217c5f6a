use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::channel::{ChannelConfig, ResponseModality};

/// Settings for the video-augmented session variant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoConfig {
    /// Wall-clock cadence for sampling the latest frame.
    pub interval: Duration,

    /// Fixed downscale factor applied before JPEG encoding.
    pub downscale: u32,

    /// JPEG quality (1-100).
    pub jpeg_quality: u8,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            downscale: 4,
            jpeg_quality: 70,
        }
    }
}

/// Configuration for a live session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Unique session identifier (e.g., "live-<uuid>")
    pub session_id: String,

    /// Remote model, voice, and instruction parameters for the channel
    pub channel: ChannelConfig,

    /// Capture block size in samples
    /// Default: 4096
    pub block_size: usize,

    /// Sample rate of model audio responses
    /// Default: 24000 (24kHz)
    pub output_sample_rate: u32,

    /// How long `Initializing` may wait for the channel to open
    pub connect_timeout: Duration,

    /// Bound on each individual teardown step
    pub teardown_timeout: Duration,

    /// Outbound chunk queue depth; chunks beyond it are dropped, never
    /// buffered
    pub outbound_queue_depth: usize,

    /// Termination phrases checked against transcript fragments
    pub termination_phrases: Vec<String>,

    /// Video settings; `None` runs the audio-only variant
    pub video: Option<VideoConfig>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            session_id: format!("live-{}", uuid::Uuid::new_v4()),
            channel: ChannelConfig {
                model: "gemini-2.5-flash-native-audio-preview-09-2025".to_string(),
                response_modality: ResponseModality::Audio,
                voice: Some("Puck".to_string()),
                system_instruction: None,
            },
            block_size: 4096,
            output_sample_rate: 24000,
            connect_timeout: Duration::from_secs(10),
            teardown_timeout: Duration::from_secs(2),
            outbound_queue_depth: 32,
            termination_phrases: default_termination_phrases(),
            video: None,
        }
    }
}

/// The stock phrase set. Deployments are expected to override this; note
/// that short tokens like "bye" match aggressively under containment.
pub fn default_termination_phrases() -> Vec<String> {
    ["exit", "stop", "end call", "goodbye", "bye", "مع السلامة", "اقفل"]
        .into_iter()
        .map(str::to_string)
        .collect()
}
