//! Microphone capture via cpal.
//!
//! cpal streams are not `Send`, so the stream lives on a dedicated OS
//! thread for the whole capture; the backend talks to it over a stop
//! channel. Frames are converted to mono f32 and handed to the async side
//! with `try_send` so the audio callback never blocks.

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, SampleRate, StreamConfig};
use std::sync::mpsc as std_mpsc;
use tokio::sync::{mpsc, oneshot};
use tracing::{error, info, warn};

use super::backend::{AudioFrame, CaptureBackend, CaptureConfig};
use crate::error::CaptureError;

/// Frames buffered between the capture thread and the pipeline task.
const FRAME_QUEUE_DEPTH: usize = 64;

pub struct MicBackend {
    config: CaptureConfig,
    sample_rate: u32,
    stop_tx: Option<std_mpsc::Sender<()>>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl MicBackend {
    pub fn new(config: CaptureConfig) -> Self {
        Self {
            config,
            sample_rate: 0,
            stop_tx: None,
            thread: None,
        }
    }

    /// List input device names so a host can expose a selector.
    pub fn list_devices() -> Result<Vec<String>, CaptureError> {
        let host = cpal::default_host();
        let devices = host
            .input_devices()
            .map_err(|e| CaptureError::Unavailable(e.to_string()))?;
        let mut names = Vec::new();
        for device in devices {
            if let Ok(name) = device.name() {
                names.push(name);
            }
        }
        Ok(names)
    }
}

#[async_trait]
impl CaptureBackend for MicBackend {
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>, CaptureError> {
        if self.stop_tx.is_some() {
            return Err(CaptureError::Backend("capture already started".into()));
        }

        let (frame_tx, frame_rx) = mpsc::channel::<AudioFrame>(FRAME_QUEUE_DEPTH);
        let (ready_tx, ready_rx) = oneshot::channel::<Result<u32, CaptureError>>();
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();
        let config = self.config.clone();
        let fault_tx = stop_tx.clone();

        let thread = std::thread::Builder::new()
            .name("mic-capture".into())
            .spawn(move || capture_thread(config, frame_tx, ready_tx, stop_rx, fault_tx))
            .map_err(|e| CaptureError::Backend(e.to_string()))?;

        match ready_rx.await {
            Ok(Ok(rate)) => {
                info!("microphone capture started at {} Hz", rate);
                self.sample_rate = rate;
                self.stop_tx = Some(stop_tx);
                self.thread = Some(thread);
                Ok(frame_rx)
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(CaptureError::Backend(
                "capture thread exited before reporting readiness".into(),
            )),
        }
    }

    async fn stop(&mut self) -> Result<(), CaptureError> {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
            info!("microphone capture stopped");
        }
        if let Some(thread) = self.thread.take() {
            // Join off the runtime; the thread exits as soon as it sees
            // the stop signal and drops the stream.
            let _ = tokio::task::spawn_blocking(move || {
                if thread.join().is_err() {
                    warn!("microphone capture thread panicked");
                }
            })
            .await;
        }
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.stop_tx.is_some()
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn name(&self) -> &str {
        "cpal-microphone"
    }
}

impl Drop for MicBackend {
    fn drop(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
    }
}

fn capture_thread(
    config: CaptureConfig,
    frame_tx: mpsc::Sender<AudioFrame>,
    ready_tx: oneshot::Sender<Result<u32, CaptureError>>,
    stop_rx: std_mpsc::Receiver<()>,
    fault_tx: std_mpsc::Sender<()>,
) {
    let (stream, rate) = match build_input_stream(&config, frame_tx, fault_tx) {
        Ok(pair) => pair,
        Err(e) => {
            let _ = ready_tx.send(Err(e));
            return;
        }
    };

    if let Err(e) = stream.play() {
        let _ = ready_tx.send(Err(CaptureError::Unavailable(e.to_string())));
        return;
    }
    let _ = ready_tx.send(Ok(rate));

    // Parked until stop() fires, the stream faults, or the backend drops.
    let _ = stop_rx.recv();
    drop(stream);
}

fn build_input_stream(
    config: &CaptureConfig,
    frame_tx: mpsc::Sender<AudioFrame>,
    fault_tx: std_mpsc::Sender<()>,
) -> Result<(cpal::Stream, u32), CaptureError> {
    let host = cpal::default_host();
    let device = match &config.device {
        Some(name) => {
            let mut devices = host
                .input_devices()
                .map_err(|e| CaptureError::Unavailable(e.to_string()))?;
            devices
                .find(|d| d.name().map(|n| &n == name).unwrap_or(false))
                .ok_or_else(|| {
                    CaptureError::Unavailable(format!("input device '{}' not found", name))
                })?
        }
        None => host.default_input_device().ok_or_else(|| {
            CaptureError::Unavailable(format!(
                "no default input device available; {}",
                mic_permission_hint()
            ))
        })?,
    };

    info!(
        "audio input device: {}",
        device.name().unwrap_or_else(|_| "unknown".into())
    );

    // Prefer the requested rate; fall back to the device default. The
    // session tags frames with whatever rate was actually selected, so no
    // resampling is needed anywhere.
    let preferred = config.preferred_sample_rate;
    let mut selected = None;
    if let Ok(ranges) = device.supported_input_configs() {
        for range in ranges {
            if range.min_sample_rate().0 <= preferred && range.max_sample_rate().0 >= preferred {
                selected = Some(range.with_sample_rate(SampleRate(preferred)));
                break;
            }
        }
    }
    let supported = match selected {
        Some(cfg) => cfg,
        None => device
            .default_input_config()
            .map_err(|e| CaptureError::Unavailable(e.to_string()))?,
    };

    let format = supported.sample_format();
    let stream_config: StreamConfig = supported.into();
    let rate = stream_config.sample_rate.0;
    let channels = usize::from(stream_config.channels.max(1));

    info!(
        "capture config: format={:?} rate={}Hz channels={}",
        format, rate, channels
    );

    // Wakes the capture thread so it drops the stream; the frame channel
    // then closes and the session sees the device loss.
    let make_err_fn = move || {
        let fault_tx = fault_tx.clone();
        move |err| {
            error!("input stream error: {}", err);
            let _ = fault_tx.send(());
        }
    };

    let stream = match format {
        SampleFormat::F32 => {
            let tx = frame_tx.clone();
            device
                .build_input_stream(
                    &stream_config,
                    move |data: &[f32], _: &_| {
                        deliver(&tx, rate, downmix(data, channels, |s| s));
                    },
                    make_err_fn(),
                    None,
                )
                .map_err(|e| CaptureError::Unavailable(e.to_string()))?
        }
        SampleFormat::I16 => {
            let tx = frame_tx.clone();
            device
                .build_input_stream(
                    &stream_config,
                    move |data: &[i16], _: &_| {
                        deliver(&tx, rate, downmix(data, channels, |s| s as f32 / 32_768.0));
                    },
                    make_err_fn(),
                    None,
                )
                .map_err(|e| CaptureError::Unavailable(e.to_string()))?
        }
        SampleFormat::U16 => {
            let tx = frame_tx.clone();
            device
                .build_input_stream(
                    &stream_config,
                    move |data: &[u16], _: &_| {
                        deliver(
                            &tx,
                            rate,
                            downmix(data, channels, |s| (s as f32 - 32_768.0) / 32_768.0),
                        );
                    },
                    make_err_fn(),
                    None,
                )
                .map_err(|e| CaptureError::Unavailable(e.to_string()))?
        }
        other => {
            return Err(CaptureError::Unavailable(format!(
                "unsupported sample format: {:?}",
                other
            )))
        }
    };

    Ok((stream, rate))
}

/// Hand one mono frame to the async side. Never blocks the audio
/// callback; a full queue means the consumer stalled and losing a frame
/// is the right trade.
fn deliver(frame_tx: &mpsc::Sender<AudioFrame>, rate: u32, samples: Vec<f32>) {
    let _ = frame_tx.try_send(AudioFrame {
        samples,
        channels: 1,
        sample_rate: rate,
    });
}

/// Average interleaved channels down to mono while converting to f32.
fn downmix<T: Copy>(data: &[T], channels: usize, convert: impl Fn(T) -> f32) -> Vec<f32> {
    if channels <= 1 {
        return data.iter().map(|&s| convert(s)).collect();
    }
    data.chunks_exact(channels)
        .map(|frame| frame.iter().map(|&s| convert(s)).sum::<f32>() / channels as f32)
        .collect()
}

fn mic_permission_hint() -> &'static str {
    #[cfg(target_os = "macos")]
    {
        "macOS: System Settings > Privacy & Security > Microphone"
    }
    #[cfg(target_os = "linux")]
    {
        "Linux: check PipeWire/PulseAudio permissions and that the device is not muted"
    }
    #[cfg(target_os = "windows")]
    {
        "Windows: Settings > Privacy & Security > Microphone"
    }
    #[cfg(not(any(target_os = "macos", target_os = "linux", target_os = "windows")))]
    {
        "check OS microphone permissions"
    }
}
