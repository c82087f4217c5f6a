use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::SessionState;

/// Statistics about a live session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStats {
    /// Current lifecycle state
    pub state: SessionState,

    /// When the session started
    pub started_at: DateTime<Utc>,

    /// Total duration in seconds
    pub duration_secs: f64,

    /// Number of realtime-input chunks sent to the channel
    pub chunks_sent: u64,

    /// Number of response audio chunks scheduled for playback
    pub chunks_played: u64,

    /// Number of transcript segments received
    pub transcript_segments_count: usize,
}

/// A single transcript fragment received from the channel
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptSegment {
    /// Transcribed text
    pub text: String,

    /// When this fragment was received
    pub timestamp: DateTime<Utc>,
}
