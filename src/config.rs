use anyhow::Result;
use serde::Deserialize;
use std::time::Duration;

use crate::channel::{ChannelConfig, ResponseModality};
use crate::capture::CaptureConfig;
use crate::session::{default_termination_phrases, SessionConfig, VideoConfig};

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub session: SessionSection,
    #[serde(default)]
    pub audio: AudioSection,
    #[serde(default)]
    pub video: VideoSection,
    #[serde(default)]
    pub termination: TerminationSection,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SessionSection {
    pub model: String,
    pub modality: ResponseModality,
    pub voice: Option<String>,
    pub system_instruction: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct AudioSection {
    pub input_sample_rate: u32,
    pub output_sample_rate: u32,
    pub block_size: usize,
    pub channels: u16,
    pub input_device: Option<String>,
    pub output_device: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct VideoSection {
    pub enabled: bool,
    pub interval_secs: f64,
    pub downscale: u32,
    pub jpeg_quality: u8,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct TerminationSection {
    pub phrases: Vec<String>,
}

impl Default for SessionSection {
    fn default() -> Self {
        let defaults = SessionConfig::default();
        Self {
            model: defaults.channel.model,
            modality: defaults.channel.response_modality,
            voice: defaults.channel.voice,
            system_instruction: None,
        }
    }
}

impl Default for AudioSection {
    fn default() -> Self {
        Self {
            input_sample_rate: 16000,
            output_sample_rate: 24000,
            block_size: 4096,
            channels: 1,
            input_device: None,
            output_device: None,
        }
    }
}

impl Default for VideoSection {
    fn default() -> Self {
        let defaults = VideoConfig::default();
        Self {
            enabled: false,
            interval_secs: defaults.interval.as_secs_f64(),
            downscale: defaults.downscale,
            jpeg_quality: defaults.jpeg_quality,
        }
    }
}

impl Default for TerminationSection {
    fn default() -> Self {
        Self {
            phrases: default_termination_phrases(),
        }
    }
}

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path))
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    /// Translate file settings into a runnable session configuration.
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            channel: ChannelConfig {
                model: self.session.model.clone(),
                response_modality: self.session.modality,
                voice: self.session.voice.clone(),
                system_instruction: self.session.system_instruction.clone(),
            },
            block_size: self.audio.block_size,
            output_sample_rate: self.audio.output_sample_rate,
            termination_phrases: self.termination.phrases.clone(),
            video: self.video.enabled.then(|| VideoConfig {
                interval: Duration::from_secs_f64(self.video.interval_secs),
                downscale: self.video.downscale,
                jpeg_quality: self.video.jpeg_quality,
            }),
            ..SessionConfig::default()
        }
    }

    pub fn capture_config(&self) -> CaptureConfig {
        CaptureConfig {
            preferred_sample_rate: self.audio.input_sample_rate,
            channels: self.audio.channels,
            device: self.audio.input_device.clone(),
        }
    }
}
