//! V4L2 camera source.
//!
//! Serves both USB webcams and the Pi camera module (through the libcamera
//! V4L2 compatibility layer). Frames are captured through an mmap stream with a
//! bounded dequeue timeout so a stalled camera yields `None` instead of hanging.

use ouroboros::self_referencing;
use std::time::{Duration, Instant};

use super::normalize::{normalize_to_rgb, PixelFormat};
use super::SourceStats;
use crate::error::AcquisitionError;
use crate::frame::Frame;

#[derive(Clone, Debug)]
pub struct CameraConfig {
    /// Device path (e.g., "/dev/video0").
    pub device: String,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub read_timeout: Duration,
    /// Label used in logs ("usb" or "picamera").
    pub kind: &'static str,
}

impl CameraConfig {
    pub fn for_index(index: u32, kind: &'static str) -> Self {
        Self {
            device: format!("/dev/video{index}"),
            width: 640,
            height: 480,
            fps: 30,
            read_timeout: Duration::from_secs(1),
            kind,
        }
    }
}

#[self_referencing]
struct CameraState {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

pub struct CameraSource {
    config: CameraConfig,
    state: Option<CameraState>,
    format: PixelFormat,
    active_width: u32,
    active_height: u32,
    sequence: u64,
    last_frame_at: Option<Instant>,
    last_error: Option<String>,
}

impl CameraSource {
    pub fn new(config: CameraConfig) -> Self {
        Self {
            active_width: config.width,
            active_height: config.height,
            config,
            state: None,
            format: PixelFormat::Rgb24,
            sequence: 0,
            last_frame_at: None,
            last_error: None,
        }
    }

    pub(crate) fn open(&mut self) -> Result<(), AcquisitionError> {
        use v4l::buffer::Type;
        use v4l::video::Capture;

        let open_err = |reason: String| AcquisitionError::Open {
            source_name: self.config.device.clone(),
            reason,
        };

        let device = v4l::Device::with_path(&self.config.device)
            .map_err(|e| open_err(format!("open device: {e}")))?;
        let mut wanted = device
            .format()
            .map_err(|e| open_err(format!("read format: {e}")))?;
        wanted.width = self.config.width;
        wanted.height = self.config.height;
        wanted.fourcc = v4l::FourCC::new(b"MJPG");

        let format = match device.set_format(&wanted) {
            Ok(format) => format,
            Err(err) => {
                log::warn!(
                    "CameraSource: failed to set format on {}: {}",
                    self.config.device,
                    err
                );
                device
                    .format()
                    .map_err(|e| open_err(format!("read format after set failure: {e}")))?
            }
        };
        self.format = PixelFormat::from_fourcc(&format.fourcc.repr).ok_or_else(|| {
            open_err(format!("unsupported pixel format {}", format.fourcc))
        })?;

        if self.config.fps > 0 {
            let params = v4l::video::capture::Parameters::with_fps(self.config.fps);
            if let Err(err) = device.set_params(&params) {
                log::warn!(
                    "CameraSource: failed to set fps on {}: {}",
                    self.config.device,
                    err
                );
            }
        }

        self.active_width = format.width;
        self.active_height = format.height;

        let timeout = self.config.read_timeout;
        let state = CameraStateTryBuilder {
            device,
            stream_builder: |device| {
                let mut stream =
                    v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, 4)?;
                stream.set_timeout(timeout);
                Ok::<_, std::io::Error>(stream)
            },
        }
        .try_build()
        .map_err(|e| open_err(format!("create buffer stream: {e}")))?;
        self.state = Some(state);
        self.last_error = None;

        log::info!(
            "CameraSource: opened {} camera {} ({}x{} {:?})",
            self.config.kind,
            self.config.device,
            self.active_width,
            self.active_height,
            self.format
        );
        Ok(())
    }

    pub(crate) fn read(&mut self) -> Option<Frame> {
        use v4l::io::traits::CaptureStream;

        let state = self.state.as_mut()?;
        let captured = state.with_mut(|fields| {
            fields
                .stream
                .next()
                .map(|(buf, meta)| buf[..(meta.bytesused as usize).min(buf.len())].to_vec())
        });
        let raw = match captured {
            Ok(raw) => raw,
            Err(err) => {
                log::debug!("CameraSource: read on {} failed: {}", self.config.device, err);
                self.last_error = Some(err.to_string());
                return None;
            }
        };

        let frame = normalize_to_rgb(&raw, self.active_width, self.active_height, self.format)
            .and_then(|rgb| {
                Frame::from_rgb(rgb, self.active_width, self.active_height, self.sequence)
            });
        match frame {
            Ok(frame) => {
                self.sequence += 1;
                self.last_frame_at = Some(Instant::now());
                self.last_error = None;
                Some(frame)
            }
            Err(err) => {
                log::warn!("CameraSource: dropped malformed frame: {}", err);
                self.last_error = Some(err.to_string());
                None
            }
        }
    }

    pub(crate) fn close(&mut self) {
        if self.state.take().is_some() {
            log::info!(
                "CameraSource: closed {} after {} frames",
                self.config.device,
                self.sequence
            );
        }
    }

    pub(crate) fn resolution(&self) -> (u32, u32) {
        (self.active_width, self.active_height)
    }

    pub(crate) fn is_healthy(&self) -> bool {
        if self.state.is_none() || self.last_error.is_some() {
            return false;
        }
        match self.last_frame_at {
            Some(at) => at.elapsed() <= self.health_grace(),
            None => true,
        }
    }

    pub(crate) fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.sequence,
            source: self.config.device.clone(),
        }
    }

    fn health_grace(&self) -> Duration {
        let base_ms = if self.config.fps == 0 {
            2_000
        } else {
            (1000 / self.config.fps).saturating_mul(6)
        };
        Duration::from_millis(u64::from(base_ms.max(2_000)))
    }
}
