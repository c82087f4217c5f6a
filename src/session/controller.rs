//! Live session lifecycle
//!
//! One `LiveSession` owns the microphone, the optional screen source, the
//! session channel, and the speaker for the duration of a conversation.
//! The state machine is strictly forward-moving:
//!
//!   Idle -> Initializing -> Connected -> Ending -> Ended
//!
//! Teardown is triggered from many places (user stop, termination phrase,
//! channel close or error, device loss, drop) but runs exactly once: the
//! first trigger wins the transition into `Ending` and every later trigger
//! is a no-op.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use super::{SessionConfig, SessionStats, TranscriptSegment};
use crate::capture::{pipeline, CaptureBackend, VideoBackend};
use crate::channel::{ChannelConnector, ChannelHandle, EncodedChunk, ServerMessage, SessionChannel};
use crate::dispatch::{Dispatch, ResponseDispatcher};
use crate::error::{ChannelError, SessionError};
use crate::playback::{OutputBackend, PlaybackScheduler};

/// Lifecycle states. Transitions only move rightward; `Ended` is terminal
/// and a session is never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Initializing,
    Connected,
    Ending,
    Ended,
}

/// Why a session left `Connected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Explicit `stop()` call
    User,
    /// A termination phrase was recognized in a transcript
    Keyword,
    /// The channel reported an error
    ChannelError,
    /// The channel closed from the remote side
    ChannelClosed,
    /// The capture device disappeared mid-session
    CaptureLost,
    /// The output device failed while scheduling audio
    PlaybackFailed,
    /// The session handle was dropped while still live
    Disposed,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            StopReason::User => "user",
            StopReason::Keyword => "keyword",
            StopReason::ChannelError => "channel error",
            StopReason::ChannelClosed => "channel closed",
            StopReason::CaptureLost => "capture lost",
            StopReason::PlaybackFailed => "playback failed",
            StopReason::Disposed => "disposed",
        };
        write!(f, "{}", label)
    }
}

struct SessionInner {
    config: SessionConfig,
    state_tx: watch::Sender<SessionState>,
    started_at: DateTime<Utc>,
    ended_at: Mutex<Option<DateTime<Utc>>>,
    chunks_sent: AtomicU64,
    chunks_played: AtomicU64,
    transcript: Mutex<Vec<TranscriptSegment>>,
    stop_reason: Mutex<Option<StopReason>>,

    // Resources released during teardown. Each is take()n exactly once.
    capture: Mutex<Option<Box<dyn CaptureBackend>>>,
    video: Option<Arc<pipeline::VideoSlot>>,
    channel: Mutex<Option<Arc<dyn SessionChannel>>>,
    output: Mutex<Option<Arc<dyn OutputBackend>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

/// Handle to one live conversation.
pub struct LiveSession {
    inner: Arc<SessionInner>,
}

impl LiveSession {
    /// Bring a session up: acquire devices, connect the channel, wait for
    /// it to open, then spawn the capture/outbound/inbound tasks.
    ///
    /// On any failure everything acquired so far is released and the
    /// session lands in `Ended`; partial sessions are never returned.
    /// The open wait is bounded by `config.connect_timeout`, so this
    /// never hangs in `Initializing`.
    pub async fn start(
        config: SessionConfig,
        mut capture: Box<dyn CaptureBackend>,
        mut video: Option<Box<dyn VideoBackend>>,
        connector: &dyn ChannelConnector,
        output: Arc<dyn OutputBackend>,
    ) -> Result<Self, SessionError> {
        let (state_tx, _) = watch::channel(SessionState::Idle);
        state_tx.send_replace(SessionState::Initializing);
        info!("starting live session {}", config.session_id);

        let frames = match capture.start().await {
            Ok(frames) => frames,
            Err(e) => {
                error!("failed to start capture: {}", e);
                release_partial(&state_tx, &config, &mut capture, None, None, &output, false)
                    .await;
                return Err(e.into());
            }
        };
        info!("capturing from '{}' at {} Hz", capture.name(), capture.sample_rate());

        if let Some(backend) = video.as_mut() {
            if let Err(e) = backend.start().await {
                error!("failed to start video source: {}", e);
                release_partial(&state_tx, &config, &mut capture, None, None, &output, true)
                    .await;
                return Err(e.into());
            }
        }

        let handle = match connector.connect(&config.channel).await {
            Ok(handle) => handle,
            Err(e) => {
                error!("channel connect failed: {}", e);
                release_partial(
                    &state_tx,
                    &config,
                    &mut capture,
                    video.as_deref_mut(),
                    None,
                    &output,
                    true,
                )
                .await;
                return Err(e.into());
            }
        };
        let ChannelHandle {
            channel,
            mut messages,
        } = handle;

        // The session is not usable until the channel confirms it opened.
        let open_failure = match timeout(config.connect_timeout, messages.recv()).await {
            Ok(Some(ServerMessage::Opened)) => None,
            Ok(Some(ServerMessage::Error { message })) => {
                Some(ChannelError::Connect(message))
            }
            Ok(Some(_)) | Ok(None) => {
                Some(ChannelError::Connect("channel closed before opening".into()))
            }
            Err(_) => Some(ChannelError::Connect(format!(
                "no open confirmation within {:?}",
                config.connect_timeout
            ))),
        };
        if let Some(e) = open_failure {
            error!("channel did not open: {}", e);
            release_partial(
                &state_tx,
                &config,
                &mut capture,
                video.as_deref_mut(),
                Some(&channel),
                &output,
                true,
            )
            .await;
            return Err(e.into());
        }

        state_tx.send_replace(SessionState::Connected);
        info!("session {} connected", config.session_id);

        let inner = Arc::new(SessionInner {
            started_at: Utc::now(),
            ended_at: Mutex::new(None),
            state_tx,
            chunks_sent: AtomicU64::new(0),
            chunks_played: AtomicU64::new(0),
            transcript: Mutex::new(Vec::new()),
            stop_reason: Mutex::new(None),
            capture: Mutex::new(Some(capture)),
            video: video.map(|backend| Arc::new(pipeline::VideoSlot::new(backend))),
            channel: Mutex::new(Some(channel.clone())),
            output: Mutex::new(Some(output.clone())),
            tasks: Mutex::new(Vec::new()),
            config,
        });

        let (chunk_tx, mut chunk_rx) =
            mpsc::channel::<EncodedChunk>(inner.config.outbound_queue_depth);

        // Outbound: the only task that talks to the channel's send side.
        let outbound = {
            let inner = inner.clone();
            let channel = channel.clone();
            tokio::spawn(async move {
                while let Some(chunk) = chunk_rx.recv().await {
                    if let Err(e) = channel.send(chunk).await {
                        warn!("realtime input send failed: {}", e);
                        inner.clone().shutdown(StopReason::ChannelError).await;
                        break;
                    }
                    inner.chunks_sent.fetch_add(1, Ordering::Relaxed);
                }
            })
        };

        // Capture: assembles device frames into fixed blocks and encodes
        // them. The frame stream closing while we are still connected
        // means the device went away.
        let capture_task = {
            let inner = inner.clone();
            let chunk_tx = chunk_tx.clone();
            tokio::spawn(async move {
                let forwarded = pipeline::run_audio(frames, inner.config.block_size, chunk_tx).await;
                debug!("capture pipeline finished after {} chunks", forwarded);
                if *inner.state_tx.borrow() == SessionState::Connected {
                    warn!("capture stream ended while session was live");
                    inner.clone().shutdown(StopReason::CaptureLost).await;
                }
            })
        };

        let video_task = inner.video.clone().map(|slot| {
            let video_config = inner.config.video.clone().unwrap_or_default();
            tokio::spawn(pipeline::run_video(slot, video_config, chunk_tx.clone()))
        });

        // Inbound: the single consumer of server messages. The playback
        // cursor lives inside the scheduler, which only this task touches.
        let inbound = {
            let inner = inner.clone();
            let dispatcher = ResponseDispatcher::new(&inner.config.termination_phrases);
            let mut scheduler = PlaybackScheduler::new(output, inner.config.output_sample_rate);
            tokio::spawn(async move {
                while let Some(message) = messages.recv().await {
                    match dispatcher.dispatch(message) {
                        Dispatch::Opened => {
                            debug!("ignoring duplicate open notification");
                        }
                        Dispatch::Transcript(text) => {
                            debug!("transcript: {}", text);
                            inner.transcript.lock().await.push(TranscriptSegment {
                                text,
                                timestamp: Utc::now(),
                            });
                        }
                        Dispatch::Audio(pcm_bytes) => match scheduler.enqueue(&pcm_bytes) {
                            Ok(_) => {
                                inner.chunks_played.fetch_add(1, Ordering::Relaxed);
                            }
                            Err(SessionError::Decode(e)) => {
                                warn!("dropping malformed audio chunk: {}", e);
                            }
                            Err(e) => {
                                error!("playback scheduling failed: {}", e);
                                inner.clone().shutdown(StopReason::PlaybackFailed).await;
                                break;
                            }
                        },
                        Dispatch::Stop(reason) => {
                            inner.clone().shutdown(reason).await;
                            break;
                        }
                        Dispatch::Skip => {}
                    }
                }
                if *inner.state_tx.borrow() == SessionState::Connected {
                    inner.clone().shutdown(StopReason::ChannelClosed).await;
                }
            })
        };

        {
            let mut tasks = inner.tasks.lock().await;
            tasks.push(outbound);
            tasks.push(capture_task);
            tasks.push(inbound);
            if let Some(task) = video_task {
                tasks.push(task);
            }
        }

        Ok(Self { inner })
    }

    /// Stop the session and return final statistics. Safe to call more
    /// than once; later calls only observe.
    pub async fn stop(&self) -> SessionStats {
        self.inner.clone().shutdown(StopReason::User).await;
        self.stats().await
    }

    pub fn id(&self) -> &str {
        &self.inner.config.session_id
    }

    pub fn state(&self) -> SessionState {
        *self.inner.state_tx.borrow()
    }

    /// Watch lifecycle transitions as they happen.
    pub fn state_changes(&self) -> watch::Receiver<SessionState> {
        self.inner.state_tx.subscribe()
    }

    pub async fn stop_reason(&self) -> Option<StopReason> {
        *self.inner.stop_reason.lock().await
    }

    pub async fn transcript(&self) -> Vec<TranscriptSegment> {
        self.inner.transcript.lock().await.clone()
    }

    pub async fn stats(&self) -> SessionStats {
        // A finished session reports the duration it actually ran.
        let end = self.inner.ended_at.lock().await.unwrap_or_else(Utc::now);
        SessionStats {
            state: *self.inner.state_tx.borrow(),
            started_at: self.inner.started_at,
            duration_secs: (end - self.inner.started_at).num_milliseconds() as f64 / 1000.0,
            chunks_sent: self.inner.chunks_sent.load(Ordering::Relaxed),
            chunks_played: self.inner.chunks_played.load(Ordering::Relaxed),
            transcript_segments_count: self.inner.transcript.lock().await.len(),
        }
    }

    /// Block until the session reaches `Ended`.
    pub async fn wait_until_ended(&self) {
        let mut rx = self.inner.state_tx.subscribe();
        while *rx.borrow() != SessionState::Ended {
            if rx.changed().await.is_err() {
                break;
            }
        }
    }
}

impl Drop for LiveSession {
    fn drop(&mut self) {
        if *self.inner.state_tx.borrow() == SessionState::Ended {
            return;
        }
        warn!("live session dropped while active, releasing in background");
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let inner = self.inner.clone();
            handle.spawn(async move {
                inner.shutdown(StopReason::Disposed).await;
            });
        }
    }
}

impl SessionInner {
    /// Tear the session down. The compare-and-set into `Ending` makes this
    /// exactly-once: concurrent triggers race for the transition and all
    /// losers return immediately.
    ///
    /// Teardown order matters: stop feeding (capture, video), close the
    /// channel, release the output, and only then mark `Ended` and abort
    /// the worker tasks. Aborting last lets a worker task run this whole
    /// function on its own stack.
    async fn shutdown(self: Arc<Self>, reason: StopReason) {
        let won = self.state_tx.send_if_modified(|state| {
            if matches!(*state, SessionState::Ending | SessionState::Ended) {
                false
            } else {
                *state = SessionState::Ending;
                true
            }
        });
        if !won {
            return;
        }

        info!("session {} ending ({})", self.config.session_id, reason);
        *self.stop_reason.lock().await = Some(reason);
        *self.ended_at.lock().await = Some(Utc::now());

        // Each step is bounded and its failure logged and swallowed, so a
        // stuck or failing resource cannot prevent the others from being
        // released.
        if let Some(mut capture) = self.capture.lock().await.take() {
            match timeout(self.config.teardown_timeout, capture.stop()).await {
                Ok(Err(e)) => warn!("capture stop failed: {}", e),
                Err(_) => warn!("capture stop timed out"),
                Ok(Ok(())) => {}
            }
        }

        if let Some(slot) = &self.video {
            // A grab still in flight keeps its backend; close never waits
            // on it.
            if let Some(mut video) = slot.close().await {
                match timeout(self.config.teardown_timeout, video.stop()).await {
                    Ok(Err(e)) => warn!("video stop failed: {}", e),
                    Err(_) => warn!("video stop timed out"),
                    Ok(Ok(())) => {}
                }
            }
        }

        if let Some(channel) = self.channel.lock().await.take() {
            match timeout(self.config.teardown_timeout, channel.close()).await {
                Ok(Err(e)) => warn!("channel close failed: {}", e),
                Err(_) => warn!("channel close timed out"),
                Ok(Ok(())) => {}
            }
        }

        if let Some(output) = self.output.lock().await.take() {
            match timeout(self.config.teardown_timeout, output.close()).await {
                Ok(Err(e)) => warn!("output close failed: {}", e),
                Err(_) => warn!("output close timed out"),
                Ok(Ok(())) => {}
            }
        }

        self.state_tx.send_replace(SessionState::Ended);
        info!("session {} ended ({})", self.config.session_id, reason);

        let mut tasks = self.tasks.lock().await;
        for task in tasks.drain(..) {
            task.abort();
        }
    }
}

/// Release whatever `start` had acquired when a later step fails. Always
/// lands the state in `Ended`.
async fn release_partial(
    state_tx: &watch::Sender<SessionState>,
    config: &SessionConfig,
    capture: &mut Box<dyn CaptureBackend>,
    video: Option<&mut (dyn VideoBackend + 'static)>,
    channel: Option<&Arc<dyn SessionChannel>>,
    output: &Arc<dyn OutputBackend>,
    capture_started: bool,
) {
    if capture_started {
        if let Err(e) = capture.stop().await {
            warn!("capture stop failed during aborted start: {}", e);
        }
    }
    if let Some(video) = video {
        if let Err(e) = video.stop().await {
            warn!("video stop failed during aborted start: {}", e);
        }
    }
    if let Some(channel) = channel {
        match timeout(config.teardown_timeout, channel.close()).await {
            Ok(Err(e)) => warn!("channel close failed during aborted start: {}", e),
            Err(_) => warn!("channel close timed out during aborted start"),
            Ok(Ok(())) => {}
        }
    }
    if let Err(e) = output.close().await {
        warn!("output close failed during aborted start: {}", e);
    }
    state_tx.send_replace(SessionState::Ended);
}
