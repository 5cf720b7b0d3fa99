//! Frame ingestion sources.
//!
//! - Synthetic mock generator (always available)
//! - Local video files (feature: ingest-file-ffmpeg)
//! - USB and Pi cameras over V4L2 (feature: ingest-v4l2)
//!
//! Every source shares the same contract: `open` fails fast, `read` never
//! blocks past the configured timeout and returns `None` on end of stream or
//! stall, and `close` releases the device.

#[cfg(feature = "ingest-v4l2")]
pub mod camera;
pub mod mock;
#[cfg(feature = "ingest-v4l2")]
mod normalize;
#[cfg(feature = "ingest-file-ffmpeg")]
pub mod video;

use std::time::Duration;

#[cfg(feature = "ingest-v4l2")]
pub use camera::{CameraConfig, CameraSource};
pub use mock::{mock_target_box, MockConfig, MockSource};
#[cfg(feature = "ingest-file-ffmpeg")]
pub use video::{VideoConfig, VideoSource};

use crate::config::{CameraType, CaptureSettings};
use crate::error::AcquisitionError;
use crate::frame::Frame;

/// Statistics for a frame source.
#[derive(Clone, Debug)]
pub struct SourceStats {
    pub frames_captured: u64,
    pub source: String,
}

/// Closed set of frame sources, selected at startup.
pub enum FrameSource {
    Mock(MockSource),
    #[cfg(feature = "ingest-file-ffmpeg")]
    Video(VideoSource),
    #[cfg(feature = "ingest-v4l2")]
    Camera(CameraSource),
}

impl FrameSource {
    /// Build the source for a resolved camera type. `Auto` must be resolved first.
    pub fn from_settings(
        camera: CameraType,
        capture: &CaptureSettings,
    ) -> Result<Self, AcquisitionError> {
        match camera {
            CameraType::Mock | CameraType::Auto => Ok(Self::Mock(MockSource::new(MockConfig {
                width: capture.width,
                height: capture.height,
                fps: capture.fps,
                max_frames: capture.mock_max_frames,
                ..MockConfig::default()
            }))),
            CameraType::Video => Self::video(capture),
            CameraType::Usb => Self::camera(capture, "usb"),
            CameraType::Picamera => Self::camera(capture, "picamera"),
        }
    }

    #[cfg(feature = "ingest-file-ffmpeg")]
    fn video(capture: &CaptureSettings) -> Result<Self, AcquisitionError> {
        let path = capture.video_path.clone().ok_or_else(|| AcquisitionError::Open {
            source_name: "video".to_string(),
            reason: "no video_path configured".to_string(),
        })?;
        Ok(Self::Video(VideoSource::new(VideoConfig {
            path,
            width: capture.width,
            height: capture.height,
            fps: capture.fps,
            looping: capture.video_loop,
        })))
    }

    #[cfg(not(feature = "ingest-file-ffmpeg"))]
    fn video(_capture: &CaptureSettings) -> Result<Self, AcquisitionError> {
        Err(AcquisitionError::Unsupported(
            "video".to_string(),
            "ingest-file-ffmpeg",
        ))
    }

    #[cfg(feature = "ingest-v4l2")]
    fn camera(capture: &CaptureSettings, kind: &'static str) -> Result<Self, AcquisitionError> {
        Ok(Self::Camera(CameraSource::new(CameraConfig {
            width: capture.width,
            height: capture.height,
            fps: capture.fps,
            read_timeout: capture.read_timeout(),
            ..CameraConfig::for_index(capture.camera_index, kind)
        })))
    }

    #[cfg(not(feature = "ingest-v4l2"))]
    fn camera(_capture: &CaptureSettings, kind: &'static str) -> Result<Self, AcquisitionError> {
        Err(AcquisitionError::Unsupported(kind.to_string(), "ingest-v4l2"))
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Mock(_) => "mock",
            #[cfg(feature = "ingest-file-ffmpeg")]
            Self::Video(_) => "video",
            #[cfg(feature = "ingest-v4l2")]
            Self::Camera(_) => "camera",
        }
    }

    pub fn open(&mut self) -> Result<(), AcquisitionError> {
        match self {
            Self::Mock(source) => {
                source.open();
                Ok(())
            }
            #[cfg(feature = "ingest-file-ffmpeg")]
            Self::Video(source) => source.open(),
            #[cfg(feature = "ingest-v4l2")]
            Self::Camera(source) => source.open(),
        }
    }

    /// Next frame, or `None` on end of stream or when `timeout` passes first.
    pub fn read(&mut self, timeout: Duration) -> Option<Frame> {
        match self {
            Self::Mock(source) => source.read(timeout),
            #[cfg(feature = "ingest-file-ffmpeg")]
            Self::Video(source) => source.read(timeout),
            // The camera stream carries its own dequeue timeout set at open.
            #[cfg(feature = "ingest-v4l2")]
            Self::Camera(source) => source.read(),
        }
    }

    pub fn close(&mut self) {
        match self {
            Self::Mock(source) => source.close(),
            #[cfg(feature = "ingest-file-ffmpeg")]
            Self::Video(source) => source.close(),
            #[cfg(feature = "ingest-v4l2")]
            Self::Camera(source) => source.close(),
        }
    }

    pub fn resolution(&self) -> (u32, u32) {
        match self {
            Self::Mock(source) => source.resolution(),
            #[cfg(feature = "ingest-file-ffmpeg")]
            Self::Video(source) => source.resolution(),
            #[cfg(feature = "ingest-v4l2")]
            Self::Camera(source) => source.resolution(),
        }
    }

    pub fn is_healthy(&self) -> bool {
        match self {
            Self::Mock(source) => source.is_healthy(),
            #[cfg(feature = "ingest-file-ffmpeg")]
            Self::Video(source) => source.is_healthy(),
            #[cfg(feature = "ingest-v4l2")]
            Self::Camera(source) => source.is_healthy(),
        }
    }

    /// End of stream reached; further reads will never yield a frame.
    pub fn is_finished(&self) -> bool {
        match self {
            Self::Mock(source) => source.is_finished(),
            #[cfg(feature = "ingest-file-ffmpeg")]
            Self::Video(source) => source.is_finished(),
            #[cfg(feature = "ingest-v4l2")]
            Self::Camera(_) => false,
        }
    }

    pub fn stats(&self) -> SourceStats {
        match self {
            Self::Mock(source) => source.stats(),
            #[cfg(feature = "ingest-file-ffmpeg")]
            Self::Video(source) => source.stats(),
            #[cfg(feature = "ingest-v4l2")]
            Self::Camera(source) => source.stats(),
        }
    }
}
