pub mod capture;
pub mod channel;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod pcm;
pub mod playback;
pub mod session;

pub use capture::{
    AudioFrame, CaptureBackend, CaptureConfig, FrameAssembler, MicBackend, ScreenBackend,
    VideoBackend, VideoFrame,
};
pub use channel::{
    ChannelConfig, ChannelConnector, ChannelHandle, EncodedChunk, ResponseModality, ServerMessage,
    SessionChannel,
};
pub use config::Config;
pub use dispatch::{Dispatch, ResponseDispatcher};
pub use error::{CaptureError, ChannelError, DecodeError, PlaybackError, SessionError};
pub use playback::{OutputBackend, PlaybackBuffer, PlaybackScheduler, SpeakerSink};
pub use session::{
    LiveSession, SessionConfig, SessionState, SessionStats, StopReason, TranscriptSegment,
    VideoConfig,
};
