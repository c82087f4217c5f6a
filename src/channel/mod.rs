//! Session channel boundary
//!
//! The bidirectional connection to the remote conversational model is an
//! external collaborator: this module defines only the types and traits the
//! core consumes. Implementations (a websocket client, an in-process echo
//! for the loopback demo, test fakes) live outside the core.
//!
//! The original callback hooks (`onOpen`/`onMessage`/`onClose`/`onError`)
//! are re-expressed as [`ServerMessage`]s delivered in arrival order over a
//! single mpsc receiver, which makes the FIFO guarantee explicit.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::ChannelError;

/// Desired response modality for the live session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseModality {
    Audio,
    Text,
}

/// Connection parameters handed to the channel implementation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Remote model identifier.
    pub model: String,

    /// Whether the model should answer with audio or text.
    pub response_modality: ResponseModality,

    /// Voice/style selection, if the modality is audio.
    pub voice: Option<String>,

    /// Optional system instruction string.
    pub system_instruction: Option<String>,
}

/// One realtime-input unit: a transport-text payload plus its MIME-like tag
/// (`audio/pcm;rate=16000` or `image/jpeg`). Matches the original wire
/// shape, hence the camelCase field names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncodedChunk {
    pub mime_type: String,
    pub data: String,
}

impl EncodedChunk {
    /// Tag for PCM audio at the given sample rate.
    pub fn audio(sample_rate: u32, data: String) -> Self {
        Self {
            mime_type: format!("audio/pcm;rate={}", sample_rate),
            data,
        }
    }

    /// Tag for a JPEG-compressed video frame.
    pub fn jpeg(data: String) -> Self {
        Self {
            mime_type: "image/jpeg".to_string(),
            data,
        }
    }

    pub fn is_audio(&self) -> bool {
        self.mime_type.starts_with("audio/pcm")
    }
}

/// Typed messages received from the channel, strictly FIFO.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerMessage {
    /// The remote handshake completed.
    Opened,
    /// A fragment of recognized input speech.
    Transcript { text: String },
    /// One encoded chunk of model audio (PCM16 at the output rate).
    AudioChunk { chunk: EncodedChunk },
    /// The remote side closed the connection.
    Closed,
    /// The connection failed.
    Error { message: String },
}

/// Outbound half of an open session channel.
#[async_trait]
pub trait SessionChannel: Send + Sync {
    /// Send one realtime-input message. Fire-and-forget from the capture
    /// pipeline's point of view; a failure here ends the session.
    async fn send(&self, chunk: EncodedChunk) -> Result<(), ChannelError>;

    /// Close the channel. Safe to call more than once.
    async fn close(&self) -> Result<(), ChannelError>;
}

/// An open channel: the outbound handle plus the inbound message stream.
pub struct ChannelHandle {
    pub channel: std::sync::Arc<dyn SessionChannel>,
    pub messages: mpsc::Receiver<ServerMessage>,
}

/// Factory for session channels, provided by the host.
///
/// Implementations must deliver [`ServerMessage::Opened`] as the first
/// message once the remote handshake completes.
#[async_trait]
pub trait ChannelConnector: Send + Sync {
    async fn connect(&self, config: &ChannelConfig) -> Result<ChannelHandle, ChannelError>;
}
