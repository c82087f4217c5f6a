use thiserror::Error;

/// Capture device failures: acquisition denied, hardware missing, or a
/// device that disappeared mid-session.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("capture device unavailable or denied: {0}")]
    Unavailable(String),

    #[error("capture device lost: {0}")]
    Lost(String),

    #[error("capture backend error: {0}")]
    Backend(String),
}

/// Session channel failures (connect, send, or an unexpected close).
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("channel connect failed: {0}")]
    Connect(String),

    #[error("channel send failed: {0}")]
    Send(String),

    #[error("channel closed")]
    Closed,
}

/// Malformed transport payloads. A decode never partially succeeds: the
/// chunk is rejected whole.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("invalid transport text: {0}")]
    TransportText(#[from] base64::DecodeError),

    #[error("truncated PCM payload: {len} bytes is not a whole number of 16-bit samples")]
    TruncatedPcm { len: usize },

    #[error("{samples} samples cannot be split across {channels} channels")]
    ChannelMismatch { samples: usize, channels: u16 },
}

/// Output device failures.
#[derive(Debug, Error)]
pub enum PlaybackError {
    #[error("output device error: {0}")]
    Output(String),

    #[error("output device closed")]
    Closed,
}

/// Unified error type surfaced by the session lifecycle.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Capture(#[from] CaptureError),

    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Playback(#[from] PlaybackError),
}
