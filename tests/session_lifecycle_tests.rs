// Integration tests for the session lifecycle state machine: startup,
// teardown triggers, idempotent stop, and resource release.

use async_trait::async_trait;
use nova_live::{
    AudioFrame, CaptureBackend, CaptureError, ChannelConfig, ChannelConnector, ChannelError,
    ChannelHandle, EncodedChunk, LiveSession, OutputBackend, PlaybackBuffer, PlaybackError,
    ServerMessage, SessionChannel, SessionConfig, SessionState, StopReason, VideoBackend,
    VideoConfig, VideoFrame,
};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

// ---------------------------------------------------------------------------
// Test doubles

struct MockCapture {
    fail_start: bool,
    stop_calls: Arc<AtomicU32>,
    frame_tx_slot: Arc<Mutex<Option<mpsc::Sender<AudioFrame>>>>,
    capturing: bool,
}

impl MockCapture {
    fn new() -> (
        Box<Self>,
        Arc<AtomicU32>,
        Arc<Mutex<Option<mpsc::Sender<AudioFrame>>>>,
    ) {
        let stop_calls = Arc::new(AtomicU32::new(0));
        let slot = Arc::new(Mutex::new(None));
        let capture = Box::new(Self {
            fail_start: false,
            stop_calls: stop_calls.clone(),
            frame_tx_slot: slot.clone(),
            capturing: false,
        });
        (capture, stop_calls, slot)
    }

    fn failing() -> (Box<Self>, Arc<AtomicU32>) {
        let stop_calls = Arc::new(AtomicU32::new(0));
        let capture = Box::new(Self {
            fail_start: true,
            stop_calls: stop_calls.clone(),
            frame_tx_slot: Arc::new(Mutex::new(None)),
            capturing: false,
        });
        (capture, stop_calls)
    }
}

#[async_trait]
impl CaptureBackend for MockCapture {
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>, CaptureError> {
        if self.fail_start {
            return Err(CaptureError::Unavailable("permission denied".into()));
        }
        let (tx, rx) = mpsc::channel(64);
        *self.frame_tx_slot.lock().unwrap() = Some(tx);
        self.capturing = true;
        Ok(rx)
    }

    async fn stop(&mut self) -> Result<(), CaptureError> {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
        self.frame_tx_slot.lock().unwrap().take();
        self.capturing = false;
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.capturing
    }

    fn sample_rate(&self) -> u32 {
        16000
    }

    fn name(&self) -> &str {
        "mock-capture"
    }
}

struct MockChannel {
    sent: Mutex<Vec<EncodedChunk>>,
    close_calls: AtomicU32,
}

struct MockConnector {
    channel: Arc<MockChannel>,
    server_tx_slot: Mutex<Option<mpsc::Sender<ServerMessage>>>,
    send_opened: bool,
    fail_connect: bool,
    connect_calls: AtomicU32,
}

impl MockConnector {
    fn new() -> Self {
        Self {
            channel: Arc::new(MockChannel {
                sent: Mutex::new(Vec::new()),
                close_calls: AtomicU32::new(0),
            }),
            server_tx_slot: Mutex::new(None),
            send_opened: true,
            fail_connect: false,
            connect_calls: AtomicU32::new(0),
        }
    }

    fn silent() -> Self {
        let mut connector = Self::new();
        connector.send_opened = false;
        connector
    }

    fn failing() -> Self {
        let mut connector = Self::new();
        connector.fail_connect = true;
        connector
    }

    fn server_tx(&self) -> mpsc::Sender<ServerMessage> {
        self.server_tx_slot
            .lock()
            .unwrap()
            .clone()
            .expect("connect was never called")
    }

    fn sent_chunks(&self) -> Vec<EncodedChunk> {
        self.channel.sent.lock().unwrap().clone()
    }

    fn close_calls(&self) -> u32 {
        self.channel.close_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChannelConnector for MockConnector {
    async fn connect(&self, _config: &ChannelConfig) -> Result<ChannelHandle, ChannelError> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_connect {
            return Err(ChannelError::Connect("refused".into()));
        }
        let (tx, rx) = mpsc::channel(64);
        if self.send_opened {
            tx.send(ServerMessage::Opened).await.ok();
        }
        *self.server_tx_slot.lock().unwrap() = Some(tx);
        Ok(ChannelHandle {
            channel: self.channel.clone(),
            messages: rx,
        })
    }
}

#[async_trait]
impl SessionChannel for MockChannel {
    async fn send(&self, chunk: EncodedChunk) -> Result<(), ChannelError> {
        self.sent.lock().unwrap().push(chunk);
        Ok(())
    }

    async fn close(&self) -> Result<(), ChannelError> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct FakeOutput {
    schedule_calls: AtomicU32,
    close_calls: AtomicU32,
    fail_schedule: AtomicBool,
}

impl FakeOutput {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            schedule_calls: AtomicU32::new(0),
            close_calls: AtomicU32::new(0),
            fail_schedule: AtomicBool::new(false),
        })
    }

    fn failing() -> Arc<Self> {
        let output = Self::new();
        output.fail_schedule.store(true, Ordering::SeqCst);
        output
    }
}

#[async_trait]
impl OutputBackend for FakeOutput {
    fn now(&self) -> f64 {
        0.0
    }

    fn schedule(&self, _buffer: PlaybackBuffer, _start_time: f64) -> Result<(), PlaybackError> {
        if self.fail_schedule.load(Ordering::SeqCst) {
            return Err(PlaybackError::Output("device yanked".into()));
        }
        self.schedule_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) -> Result<(), PlaybackError> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Video source whose grab never returns, like a wedged compositor.
struct StallingVideo;

#[async_trait]
impl VideoBackend for StallingVideo {
    async fn start(&mut self) -> Result<(), CaptureError> {
        Ok(())
    }

    async fn latest_frame(&mut self) -> Result<Option<VideoFrame>, CaptureError> {
        std::future::pending().await
    }

    async fn stop(&mut self) -> Result<(), CaptureError> {
        Ok(())
    }

    fn name(&self) -> &str {
        "stalling-video"
    }
}

fn test_config() -> SessionConfig {
    SessionConfig {
        session_id: "live-test".into(),
        connect_timeout: Duration::from_millis(500),
        ..SessionConfig::default()
    }
}

async fn wait_for<F: Fn() -> bool>(condition: F, what: &str) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !condition() {
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {}", what);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

// ---------------------------------------------------------------------------
// Startup

#[tokio::test]
async fn test_successful_start_reaches_connected() {
    let (capture, _, _) = MockCapture::new();
    let connector = MockConnector::new();

    let session = LiveSession::start(test_config(), capture, None, &connector, FakeOutput::new())
        .await
        .unwrap();

    assert_eq!(session.state(), SessionState::Connected);
    assert_eq!(connector.connect_calls.load(Ordering::SeqCst), 1);
    session.stop().await;
}

#[tokio::test]
async fn test_denied_device_fails_before_connecting() {
    let (capture, stop_calls) = MockCapture::failing();
    let connector = MockConnector::new();

    let result =
        LiveSession::start(test_config(), capture, None, &connector, FakeOutput::new()).await;

    assert!(result.is_err());
    // The channel was never dialed and the failed device is not "stopped".
    assert_eq!(connector.connect_calls.load(Ordering::SeqCst), 0);
    assert_eq!(stop_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_connect_failure_releases_capture() {
    let (capture, stop_calls, _) = MockCapture::new();
    let connector = MockConnector::failing();

    let result =
        LiveSession::start(test_config(), capture, None, &connector, FakeOutput::new()).await;

    assert!(result.is_err());
    assert_eq!(stop_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_start_does_not_hang_when_channel_never_opens() {
    let (capture, stop_calls, _) = MockCapture::new();
    let connector = MockConnector::silent();
    let output = FakeOutput::new();

    let result =
        LiveSession::start(test_config(), capture, None, &connector, output.clone()).await;

    assert!(result.is_err());
    assert_eq!(stop_calls.load(Ordering::SeqCst), 1);
    assert_eq!(connector.close_calls(), 1);
    assert_eq!(output.close_calls.load(Ordering::SeqCst), 1);
}

// ---------------------------------------------------------------------------
// Teardown triggers

#[tokio::test]
async fn test_stop_is_idempotent() {
    let (capture, stop_calls, _) = MockCapture::new();
    let connector = MockConnector::new();

    let session = LiveSession::start(test_config(), capture, None, &connector, FakeOutput::new())
        .await
        .unwrap();

    let stats = session.stop().await;
    assert_eq!(stats.state, SessionState::Ended);

    let stats = session.stop().await;
    assert_eq!(stats.state, SessionState::Ended);

    assert_eq!(stop_calls.load(Ordering::SeqCst), 1);
    assert_eq!(connector.close_calls(), 1);
    assert_eq!(session.stop_reason().await, Some(StopReason::User));
}

#[tokio::test]
async fn test_channel_error_tears_down_exactly_once() {
    let (capture, stop_calls, _) = MockCapture::new();
    let connector = MockConnector::new();
    let output = FakeOutput::new();

    let session = LiveSession::start(test_config(), capture, None, &connector, output.clone())
        .await
        .unwrap();

    connector
        .server_tx()
        .send(ServerMessage::Error {
            message: "socket reset".into(),
        })
        .await
        .unwrap();

    session.wait_until_ended().await;
    assert_eq!(session.state(), SessionState::Ended);
    assert_eq!(session.stop_reason().await, Some(StopReason::ChannelError));
    assert_eq!(stop_calls.load(Ordering::SeqCst), 1);
    assert_eq!(connector.close_calls(), 1);
    assert_eq!(output.close_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_remote_close_ends_session() {
    let (capture, _, _) = MockCapture::new();
    let connector = MockConnector::new();

    let session = LiveSession::start(test_config(), capture, None, &connector, FakeOutput::new())
        .await
        .unwrap();

    connector.server_tx().send(ServerMessage::Closed).await.unwrap();

    session.wait_until_ended().await;
    assert_eq!(session.stop_reason().await, Some(StopReason::ChannelClosed));
}

#[tokio::test]
async fn test_termination_phrase_ends_session() {
    let (capture, _, _) = MockCapture::new();
    let connector = MockConnector::new();

    let session = LiveSession::start(test_config(), capture, None, &connector, FakeOutput::new())
        .await
        .unwrap();

    connector
        .server_tx()
        .send(ServerMessage::Transcript {
            text: "ok goodbye then".into(),
        })
        .await
        .unwrap();

    session.wait_until_ended().await;
    assert_eq!(session.stop_reason().await, Some(StopReason::Keyword));
    // The matching fragment is discarded, not recorded.
    assert!(session.transcript().await.is_empty());
}

#[tokio::test]
async fn test_output_failure_ends_session() {
    let (capture, stop_calls, _) = MockCapture::new();
    let connector = MockConnector::new();
    let output = FakeOutput::failing();

    let session = LiveSession::start(test_config(), capture, None, &connector, output.clone())
        .await
        .unwrap();

    let pcm_bytes = nova_live::pcm::to_pcm16(&vec![0.2f32; 2400]);
    let chunk = EncodedChunk::audio(24000, nova_live::pcm::to_transport_text(&pcm_bytes));
    connector
        .server_tx()
        .send(ServerMessage::AudioChunk { chunk })
        .await
        .unwrap();

    session.wait_until_ended().await;
    assert_eq!(session.stop_reason().await, Some(StopReason::PlaybackFailed));
    assert_eq!(stop_calls.load(Ordering::SeqCst), 1);
    assert_eq!(output.close_calls.load(Ordering::SeqCst), 1);

    let stats = session.stats().await;
    assert_eq!(stats.chunks_played, 0);
}

#[tokio::test]
async fn test_stop_stays_bounded_while_video_grab_is_stuck() {
    let (capture, stop_calls, _) = MockCapture::new();
    let connector = MockConnector::new();

    let mut config = test_config();
    config.teardown_timeout = Duration::from_millis(200);
    config.video = Some(VideoConfig {
        interval: Duration::from_millis(10),
        ..VideoConfig::default()
    });

    let session = LiveSession::start(
        config,
        capture,
        Some(Box::new(StallingVideo)),
        &connector,
        FakeOutput::new(),
    )
    .await
    .unwrap();

    // Let the sampling loop check the source out and wedge in the grab.
    tokio::time::sleep(Duration::from_millis(100)).await;

    let stats = tokio::time::timeout(Duration::from_secs(1), session.stop())
        .await
        .expect("stop must stay bounded while a frame grab is stuck");

    assert_eq!(stats.state, SessionState::Ended);
    assert_eq!(stop_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_duration_freezes_once_ended() {
    let (capture, _, _) = MockCapture::new();
    let connector = MockConnector::new();

    let session = LiveSession::start(test_config(), capture, None, &connector, FakeOutput::new())
        .await
        .unwrap();

    let at_stop = session.stop().await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    let later = session.stats().await;

    assert_eq!(at_stop.duration_secs, later.duration_secs);
}

#[tokio::test]
async fn test_device_loss_ends_session() {
    let (capture, _, frame_tx_slot) = MockCapture::new();
    let connector = MockConnector::new();

    let session = LiveSession::start(test_config(), capture, None, &connector, FakeOutput::new())
        .await
        .unwrap();

    // The device vanishing closes the frame stream without a stop call.
    frame_tx_slot.lock().unwrap().take();

    session.wait_until_ended().await;
    assert_eq!(session.stop_reason().await, Some(StopReason::CaptureLost));
}

// ---------------------------------------------------------------------------
// Data paths

#[tokio::test]
async fn test_capture_frames_forward_as_tagged_chunks() {
    let (capture, _, frame_tx_slot) = MockCapture::new();
    let connector = MockConnector::new();

    let session = LiveSession::start(test_config(), capture, None, &connector, FakeOutput::new())
        .await
        .unwrap();

    let frame_tx = frame_tx_slot.lock().unwrap().clone().unwrap();
    frame_tx
        .send(AudioFrame {
            samples: vec![0.1; 4096],
            channels: 1,
            sample_rate: 16000,
        })
        .await
        .unwrap();

    wait_for(|| !connector.sent_chunks().is_empty(), "chunk to be sent").await;

    let sent = connector.sent_chunks();
    assert_eq!(sent[0].mime_type, "audio/pcm;rate=16000");

    let stats = session.stop().await;
    assert!(stats.chunks_sent >= 1);
}

#[tokio::test]
async fn test_response_audio_is_scheduled_and_counted() {
    let (capture, _, _) = MockCapture::new();
    let connector = MockConnector::new();
    let output = FakeOutput::new();

    let session = LiveSession::start(test_config(), capture, None, &connector, output.clone())
        .await
        .unwrap();

    let pcm_bytes = nova_live::pcm::to_pcm16(&vec![0.2f32; 2400]);
    let chunk = EncodedChunk::audio(24000, nova_live::pcm::to_transport_text(&pcm_bytes));
    connector
        .server_tx()
        .send(ServerMessage::AudioChunk { chunk })
        .await
        .unwrap();

    wait_for(
        || output.schedule_calls.load(Ordering::SeqCst) == 1,
        "audio to be scheduled",
    )
    .await;

    let stats = session.stop().await;
    assert_eq!(stats.chunks_played, 1);
}

#[tokio::test]
async fn test_transcripts_accumulate_in_order() {
    let (capture, _, _) = MockCapture::new();
    let connector = MockConnector::new();

    let session = LiveSession::start(test_config(), capture, None, &connector, FakeOutput::new())
        .await
        .unwrap();

    for text in ["first", "second", "third"] {
        connector
            .server_tx()
            .send(ServerMessage::Transcript { text: text.into() })
            .await
            .unwrap();
    }

    wait_for_transcripts(&session, 3).await;

    let transcript = session.transcript().await;
    let texts: Vec<&str> = transcript.iter().map(|s| s.text.as_str()).collect();
    assert_eq!(texts, vec!["first", "second", "third"]);

    let stats = session.stop().await;
    assert_eq!(stats.transcript_segments_count, 3);
}

async fn wait_for_transcripts(session: &LiveSession, count: usize) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while session.transcript().await.len() < count {
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {} transcript segments", count);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
