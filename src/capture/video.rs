//! Video frame processing for the video-augmented variant.
//!
//! Frames are downscaled by a fixed factor to bound bandwidth, then
//! JPEG-compressed before they go out as `image/jpeg` realtime input.

use async_trait::async_trait;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::RgbImage;
use tracing::info;

use super::backend::{VideoBackend, VideoFrame};
use crate::error::CaptureError;

/// Downscale a frame by `factor` in both dimensions.
pub fn downscale(frame: &VideoFrame, factor: u32) -> VideoFrame {
    let factor = factor.max(1);
    if factor == 1 {
        return frame.clone();
    }

    let image = match RgbImage::from_raw(frame.width, frame.height, frame.rgb.clone()) {
        Some(image) => image,
        // Malformed dimensions; pass through untouched rather than panic.
        None => return frame.clone(),
    };

    let width = (frame.width / factor).max(1);
    let height = (frame.height / factor).max(1);
    let scaled = image::imageops::resize(&image, width, height, FilterType::Triangle);

    VideoFrame {
        width,
        height,
        rgb: scaled.into_raw(),
    }
}

/// Compress a frame to JPEG bytes.
pub fn encode_jpeg(frame: &VideoFrame, quality: u8) -> Result<Vec<u8>, CaptureError> {
    let image = RgbImage::from_raw(frame.width, frame.height, frame.rgb.clone()).ok_or_else(
        || {
            CaptureError::Backend(format!(
                "video frame buffer does not match {}x{}",
                frame.width, frame.height
            ))
        },
    )?;

    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, quality)
        .encode_image(&image)
        .map_err(|e| CaptureError::Backend(e.to_string()))?;
    Ok(out)
}

/// Screen-frame video source backed by xcap.
///
/// Grabs the primary monitor on demand; the session's 1 Hz timer drives
/// the cadence, so this never produces frames on its own.
pub struct ScreenBackend {
    running: bool,
}

impl ScreenBackend {
    pub fn new() -> Self {
        Self { running: false }
    }
}

impl Default for ScreenBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VideoBackend for ScreenBackend {
    async fn start(&mut self) -> Result<(), CaptureError> {
        // Probe once so a missing/denied screen surfaces at session start
        // instead of as a silent stream of grab failures.
        let monitors = xcap::Monitor::all().map_err(|e| CaptureError::Unavailable(e.to_string()))?;
        if monitors.is_empty() {
            return Err(CaptureError::Unavailable("no monitors available".into()));
        }
        info!("screen capture started ({} monitors)", monitors.len());
        self.running = true;
        Ok(())
    }

    async fn latest_frame(&mut self) -> Result<Option<VideoFrame>, CaptureError> {
        if !self.running {
            return Ok(None);
        }

        // Grabbing is blocking OS work; keep it off the async worker.
        let frame = tokio::task::spawn_blocking(grab_primary_monitor)
            .await
            .map_err(|e| CaptureError::Backend(e.to_string()))??;
        Ok(Some(frame))
    }

    async fn stop(&mut self) -> Result<(), CaptureError> {
        self.running = false;
        Ok(())
    }

    fn name(&self) -> &str {
        "xcap-screen"
    }
}

fn grab_primary_monitor() -> Result<VideoFrame, CaptureError> {
    let monitors = xcap::Monitor::all().map_err(|e| CaptureError::Lost(e.to_string()))?;
    let monitor = monitors
        .into_iter()
        .next()
        .ok_or_else(|| CaptureError::Lost("no monitors available".into()))?;

    let image = monitor
        .capture_image()
        .map_err(|e| CaptureError::Lost(e.to_string()))?;
    let width = image.width();
    let height = image.height();
    let rgba = image.into_raw();

    // RGBA -> tightly packed RGB.
    let mut rgb = Vec::with_capacity((width * height * 3) as usize);
    for pixel in rgba.chunks_exact(4) {
        rgb.extend_from_slice(&pixel[..3]);
    }

    Ok(VideoFrame { width, height, rgb })
}
