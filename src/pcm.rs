//! PCM frame codec
//!
//! Converts between native f32 samples and 16-bit signed PCM, and between
//! binary PCM and the base64 transport-text encoding used on the session
//! channel. No resampling happens here: samples must already be at the
//! target rate.

use base64::Engine;

use crate::capture::AudioFrame;
use crate::error::DecodeError;

/// Scale factor between f32 samples in [-1.0, 1.0] and 16-bit PCM.
pub const PCM16_SCALE: f32 = 32768.0;

/// Convert f32 samples to little-endian, channel-interleaved PCM16 bytes.
///
/// Each sample maps to `round(s * 32768)` clamped to the i16 range, so a
/// full-scale 1.0 becomes 32767 rather than wrapping.
pub fn to_pcm16(samples: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        let scaled = (sample * PCM16_SCALE).round();
        let clamped = scaled.clamp(i16::MIN as f32, i16::MAX as f32) as i16;
        bytes.extend_from_slice(&clamped.to_le_bytes());
    }
    bytes
}

/// Inverse of [`to_pcm16`]: little-endian PCM16 bytes back to an
/// [`AudioFrame`] of f32 samples, dividing by 32768.0.
///
/// Fails without partially decoding if the payload is not a whole number
/// of samples or the sample count does not divide across `channels`.
pub fn from_pcm16(bytes: &[u8], channels: u16, sample_rate: u32) -> Result<AudioFrame, DecodeError> {
    if bytes.len() % 2 != 0 {
        return Err(DecodeError::TruncatedPcm { len: bytes.len() });
    }

    let sample_count = bytes.len() / 2;
    if channels > 1 && sample_count % channels as usize != 0 {
        return Err(DecodeError::ChannelMismatch {
            samples: sample_count,
            channels,
        });
    }

    let samples = bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 / PCM16_SCALE)
        .collect();

    Ok(AudioFrame {
        samples,
        channels,
        sample_rate,
    })
}

/// Encode binary PCM as transport-safe text (base64).
pub fn to_transport_text(bytes: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

/// Decode transport text back to the exact original bytes.
pub fn from_transport_text(text: &str) -> Result<Vec<u8>, DecodeError> {
    Ok(base64::engine::general_purpose::STANDARD.decode(text)?)
}
