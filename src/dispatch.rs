//! Response dispatcher
//!
//! Demultiplexes inbound server messages into transcript, audio, and
//! lifecycle actions, one message at a time in arrival order. The
//! termination-phrase policy lives here: a recognized phrase anywhere in a
//! transcript fragment turns the whole message into a stop trigger and the
//! fragment is discarded.

use tracing::warn;

use crate::channel::{EncodedChunk, ServerMessage};
use crate::error::DecodeError;
use crate::pcm;
use crate::session::StopReason;

/// What the lifecycle controller should do with one inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatch {
    /// The channel handshake completed.
    Opened,
    /// A transcript fragment to record/surface.
    Transcript(String),
    /// Decoded PCM16 bytes ready for the playback scheduler.
    Audio(Vec<u8>),
    /// One of the teardown triggers fired.
    Stop(StopReason),
    /// Nothing to do (e.g. an undecodable chunk was dropped).
    Skip,
}

pub struct ResponseDispatcher {
    /// Normalized (lowercased, trimmed) termination phrases. Supplied by
    /// configuration; this type never hard-codes any.
    phrases: Vec<String>,
}

impl ResponseDispatcher {
    pub fn new<I, S>(termination_phrases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let phrases = termination_phrases
            .into_iter()
            .map(|p| p.as_ref().trim().to_lowercase())
            .filter(|p| !p.is_empty())
            .collect();
        Self { phrases }
    }

    /// Process one server message. Performs no buffering: each message is
    /// fully handled (or dropped) before the next one is looked at.
    pub fn dispatch(&self, message: ServerMessage) -> Dispatch {
        match message {
            ServerMessage::Opened => Dispatch::Opened,
            ServerMessage::Transcript { text } => {
                if self.matches_termination(&text) {
                    Dispatch::Stop(StopReason::Keyword)
                } else {
                    Dispatch::Transcript(text)
                }
            }
            ServerMessage::AudioChunk { chunk } => self.decode_audio(chunk),
            ServerMessage::Closed => Dispatch::Stop(StopReason::ChannelClosed),
            ServerMessage::Error { message } => {
                warn!("channel reported error: {}", message);
                Dispatch::Stop(StopReason::ChannelError)
            }
        }
    }

    /// Case- and whitespace-insensitive containment test against the
    /// configured phrase set.
    pub fn matches_termination(&self, text: &str) -> bool {
        let normalized = text.trim().to_lowercase();
        if normalized.is_empty() {
            return false;
        }
        self.phrases.iter().any(|phrase| normalized.contains(phrase))
    }

    /// Decode one audio chunk. A malformed chunk is non-fatal: it is
    /// dropped whole and processing continues with the next message.
    fn decode_audio(&self, chunk: EncodedChunk) -> Dispatch {
        if !chunk.is_audio() {
            warn!("ignoring non-audio chunk tagged '{}'", chunk.mime_type);
            return Dispatch::Skip;
        }
        match pcm::from_transport_text(&chunk.data) {
            Ok(bytes) => Dispatch::Audio(bytes),
            Err(e @ DecodeError::TransportText(_)) => {
                warn!("dropping undecodable audio chunk: {}", e);
                Dispatch::Skip
            }
            Err(e) => {
                warn!("dropping malformed audio chunk: {}", e);
                Dispatch::Skip
            }
        }
    }
}
