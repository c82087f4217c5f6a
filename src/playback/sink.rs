//! Speaker output via cpal.
//!
//! Implements the output-device contract the scheduler relies on: a
//! monotonic clock and start-time-honoring playback. The clock is the
//! count of samples the device has consumed, so it advances exactly at the
//! output rate regardless of wall time. Scheduled buffers wait in a queue;
//! the stream callback renders silence until each buffer's start sample
//! comes due.
//!
//! Same thread discipline as the microphone backend: the `!Send` stream
//! lives on its own OS thread for the life of the sink.

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, SampleRate, StreamConfig};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{mpsc as std_mpsc, Arc, Mutex};
use tokio::sync::oneshot;
use tracing::{error, info, warn};

use super::scheduler::{OutputBackend, PlaybackBuffer};
use crate::error::PlaybackError;

struct Scheduled {
    start_sample: u64,
    samples: Vec<f32>,
}

struct SinkShared {
    queue: Mutex<VecDeque<Scheduled>>,
    /// Samples consumed by the device so far; this is the output clock.
    clock_samples: AtomicU64,
    sample_rate: u32,
}

pub struct SpeakerSink {
    shared: Arc<SinkShared>,
    stop_tx: Mutex<Option<std_mpsc::Sender<()>>>,
}

impl SpeakerSink {
    /// Open the output device at `sample_rate` (mono source material; the
    /// device may be multi-channel, each channel gets the same signal).
    pub async fn open(sample_rate: u32, device: Option<String>) -> Result<Self, PlaybackError> {
        let shared = Arc::new(SinkShared {
            queue: Mutex::new(VecDeque::new()),
            clock_samples: AtomicU64::new(0),
            sample_rate,
        });

        let (ready_tx, ready_rx) = oneshot::channel::<Result<(), PlaybackError>>();
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();
        let thread_shared = shared.clone();

        std::thread::Builder::new()
            .name("speaker-sink".into())
            .spawn(move || playback_thread(thread_shared, device, ready_tx, stop_rx))
            .map_err(|e| PlaybackError::Output(e.to_string()))?;

        match ready_rx.await {
            Ok(Ok(())) => {
                info!("speaker output opened at {} Hz", sample_rate);
                Ok(Self {
                    shared,
                    stop_tx: Mutex::new(Some(stop_tx)),
                })
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(PlaybackError::Output(
                "output thread exited before reporting readiness".into(),
            )),
        }
    }
}

#[async_trait]
impl OutputBackend for SpeakerSink {
    fn now(&self) -> f64 {
        self.shared.clock_samples.load(Ordering::Relaxed) as f64 / self.shared.sample_rate as f64
    }

    fn schedule(&self, buffer: PlaybackBuffer, start_time: f64) -> Result<(), PlaybackError> {
        if self.stop_tx.lock().map(|g| g.is_none()).unwrap_or(true) {
            return Err(PlaybackError::Closed);
        }
        let start_sample = (start_time * self.shared.sample_rate as f64).round() as u64;
        let mut queue = self
            .shared
            .queue
            .lock()
            .map_err(|_| PlaybackError::Output("playback queue poisoned".into()))?;
        queue.push_back(Scheduled {
            start_sample,
            samples: buffer.samples,
        });
        Ok(())
    }

    async fn close(&self) -> Result<(), PlaybackError> {
        let stop_tx = self
            .stop_tx
            .lock()
            .map_err(|_| PlaybackError::Output("sink state poisoned".into()))?
            .take();
        if let Some(stop_tx) = stop_tx {
            let _ = stop_tx.send(());
            info!("speaker output closed");
        }
        Ok(())
    }
}

impl Drop for SpeakerSink {
    fn drop(&mut self) {
        if let Ok(mut guard) = self.stop_tx.lock() {
            if let Some(stop_tx) = guard.take() {
                let _ = stop_tx.send(());
            }
        }
    }
}

fn playback_thread(
    shared: Arc<SinkShared>,
    device: Option<String>,
    ready_tx: oneshot::Sender<Result<(), PlaybackError>>,
    stop_rx: std_mpsc::Receiver<()>,
) {
    let stream = match build_output_stream(&shared, device) {
        Ok(stream) => stream,
        Err(e) => {
            let _ = ready_tx.send(Err(e));
            return;
        }
    };

    if let Err(e) = stream.play() {
        let _ = ready_tx.send(Err(PlaybackError::Output(e.to_string())));
        return;
    }
    let _ = ready_tx.send(Ok(()));

    let _ = stop_rx.recv();
    drop(stream);
}

fn build_output_stream(
    shared: &Arc<SinkShared>,
    device: Option<String>,
) -> Result<cpal::Stream, PlaybackError> {
    let host = cpal::default_host();
    let device = match device {
        Some(name) => {
            let mut devices = host
                .output_devices()
                .map_err(|e| PlaybackError::Output(e.to_string()))?;
            devices
                .find(|d| d.name().map(|n| n == name).unwrap_or(false))
                .ok_or_else(|| PlaybackError::Output(format!("output device '{}' not found", name)))?
        }
        None => host
            .default_output_device()
            .ok_or_else(|| PlaybackError::Output("no default output device available".into()))?,
    };

    info!(
        "audio output device: {}",
        device.name().unwrap_or_else(|_| "unknown".into())
    );

    let rate = shared.sample_rate;
    let ranges = device
        .supported_output_configs()
        .map_err(|e| PlaybackError::Output(e.to_string()))?;
    let mut selected = None;
    for range in ranges {
        if range.sample_format() == SampleFormat::F32
            && range.min_sample_rate().0 <= rate
            && range.max_sample_rate().0 >= rate
        {
            selected = Some(range.with_sample_rate(SampleRate(rate)));
            break;
        }
    }
    // No resampling in this crate: the device must take the output rate.
    let supported = selected.ok_or_else(|| {
        PlaybackError::Output(format!("output device does not support f32 at {} Hz", rate))
    })?;

    let config: StreamConfig = supported.into();
    let channels = usize::from(config.channels.max(1));
    let shared = shared.clone();

    let err_fn = |err| error!("output stream error: {}", err);

    let stream = device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _: &_| {
                render(&shared, data, channels);
            },
            err_fn,
            None,
        )
        .map_err(|e| PlaybackError::Output(e.to_string()))?;

    Ok(stream)
}

/// Fill one callback's worth of output, honoring scheduled start times.
fn render(shared: &SinkShared, data: &mut [f32], channels: usize) {
    let frames = data.len() / channels.max(1);
    let mut t = shared.clock_samples.load(Ordering::Relaxed);

    // try_lock: on contention emit silence rather than stall the device.
    if let Ok(mut queue) = shared.queue.try_lock() {
        for frame in data.chunks_mut(channels) {
            let mut value = 0.0f32;
            while let Some(front) = queue.front() {
                if t < front.start_sample {
                    break;
                }
                let idx = (t - front.start_sample) as usize;
                if idx < front.samples.len() {
                    value = front.samples[idx];
                    break;
                }
                queue.pop_front();
            }
            for sample in frame {
                *sample = value;
            }
            t += 1;
        }
    } else {
        warn!("playback queue contended, emitting silence");
        for sample in data.iter_mut() {
            *sample = 0.0;
        }
        t += frames as u64;
    }

    shared.clock_samples.store(t, Ordering::Relaxed);
}
