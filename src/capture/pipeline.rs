//! Capture pipeline tasks
//!
//! The audio loop pulls device frames, reassembles them into fixed blocks,
//! encodes each block (PCM16 -> transport text), and forwards the tagged
//! chunk into the session's bounded outbound queue. The video loop samples
//! the latest frame on a fixed wall-clock timer, downscales it, and sends
//! it as `image/jpeg` on the same queue.
//!
//! Both loops use `try_send`: when the channel is down or backlogged,
//! chunks are dropped rather than buffered. Stale realtime audio is worse
//! than no audio.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use super::backend::{AudioFrame, VideoBackend};
use super::framer::FrameAssembler;
use super::video;
use crate::channel::EncodedChunk;
use crate::pcm;
use crate::session::VideoConfig;

/// Drive the audio capture loop until the device stream ends.
///
/// Returns the number of chunks forwarded. The frame receiver closing is
/// how device loss surfaces; the caller decides whether that was expected.
pub async fn run_audio(
    mut frames: mpsc::Receiver<AudioFrame>,
    block_size: usize,
    out: mpsc::Sender<EncodedChunk>,
) -> u64 {
    let mut assembler = FrameAssembler::new(block_size);
    let mut forwarded: u64 = 0;
    let mut dropped: u64 = 0;

    info!("audio capture pipeline started (block size {})", block_size);

    while let Some(frame) = frames.recv().await {
        let sample_rate = frame.sample_rate;
        for block in assembler.push(&frame.samples) {
            let pcm_bytes = pcm::to_pcm16(&block);
            let chunk = EncodedChunk::audio(sample_rate, pcm::to_transport_text(&pcm_bytes));
            match out.try_send(chunk) {
                Ok(()) => forwarded += 1,
                Err(_) => {
                    // Channel torn down or backlogged: drop, never queue.
                    dropped += 1;
                }
            }
        }
    }

    info!(
        "audio capture pipeline stopped ({} chunks forwarded, {} dropped)",
        forwarded, dropped
    );
    forwarded
}

/// Shared custody of the video backend between the sampling loop and the
/// lifecycle controller.
///
/// The loop checks the backend out for each grab and checks it back in
/// afterwards, so the mutex is never held across `latest_frame`. Teardown
/// flips `closed` and takes whatever is parked; a grab that is still in
/// flight is simply left behind, which keeps `close` free of unbounded
/// waits even when the underlying OS capture wedges.
pub struct VideoSlot {
    backend: Mutex<Option<Box<dyn VideoBackend>>>,
    closed: AtomicBool,
}

impl VideoSlot {
    pub fn new(backend: Box<dyn VideoBackend>) -> Self {
        Self {
            backend: Mutex::new(Some(backend)),
            closed: AtomicBool::new(false),
        }
    }

    /// Mark the slot closed and hand back the backend if it is parked.
    /// `None` means a grab is mid-flight; the loop stops the backend
    /// itself when (if) that grab returns. Never waits on the grab.
    pub async fn close(&self) -> Option<Box<dyn VideoBackend>> {
        self.closed.store(true, Ordering::SeqCst);
        self.backend.lock().await.take()
    }

    async fn check_out(&self) -> Option<Box<dyn VideoBackend>> {
        let mut guard = self.backend.lock().await;
        if self.closed.load(Ordering::SeqCst) {
            return None;
        }
        guard.take()
    }

    /// Park the backend again. If the slot closed while it was out, the
    /// backend is rejected and returned to the caller, who now owns its
    /// shutdown.
    async fn check_in(&self, backend: Box<dyn VideoBackend>) -> Option<Box<dyn VideoBackend>> {
        let mut guard = self.backend.lock().await;
        if self.closed.load(Ordering::SeqCst) {
            return Some(backend);
        }
        *guard = Some(backend);
        None
    }
}

/// Drive the video sampling loop.
///
/// Runs on its own timer, independent of the audio path. The backend is
/// checked out of the slot around each grab; the loop exits once teardown
/// closes the slot.
pub async fn run_video(slot: Arc<VideoSlot>, config: VideoConfig, out: mpsc::Sender<EncodedChunk>) {
    let mut cadence = tokio::time::interval(config.interval);
    cadence.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    info!(
        "video capture pipeline started ({}x downscale every {:?})",
        config.downscale, config.interval
    );

    loop {
        cadence.tick().await;

        let Some(mut backend) = slot.check_out().await else {
            break;
        };
        let grabbed = backend.latest_frame().await;
        if let Some(mut backend) = slot.check_in(backend).await {
            // Teardown ran while the grab was out; nothing stops this
            // backend but us.
            if let Err(e) = backend.stop().await {
                warn!("video stop failed: {}", e);
            }
            break;
        }

        let frame = match grabbed {
            Ok(Some(frame)) => frame,
            Ok(None) => continue,
            Err(e) => {
                warn!("video frame grab failed: {}", e);
                continue;
            }
        };

        let scaled = video::downscale(&frame, config.downscale);
        match video::encode_jpeg(&scaled, config.jpeg_quality) {
            Ok(jpeg) => {
                let chunk = EncodedChunk::jpeg(pcm::to_transport_text(&jpeg));
                if out.try_send(chunk).is_err() {
                    debug!("video chunk dropped, outbound queue unavailable");
                }
            }
            Err(e) => warn!("video frame encode failed: {}", e),
        }
    }

    info!("video capture pipeline stopped");
}
