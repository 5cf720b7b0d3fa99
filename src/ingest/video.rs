//! Local video file source using FFmpeg.
//!
//! Decoded frames are scaled to the configured capture resolution and paced to
//! the configured frame rate. At end of file the input is reopened when looping
//! is enabled; otherwise `read` reports end of stream.

use ffmpeg_next as ffmpeg;
use std::time::{Duration, Instant};

use super::SourceStats;
use crate::error::AcquisitionError;
use crate::frame::Frame;

#[derive(Clone, Debug)]
pub struct VideoConfig {
    pub path: String,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub looping: bool,
}

struct Decoder {
    input: ffmpeg::format::context::Input,
    stream_index: usize,
    decoder: ffmpeg::codec::decoder::Video,
    scaler: ffmpeg::software::scaling::Context,
}

pub struct VideoSource {
    config: VideoConfig,
    decoder: Option<Decoder>,
    sequence: u64,
    loops: u64,
    interval: Duration,
    next_due: Option<Instant>,
    last_error: Option<String>,
}

impl VideoSource {
    pub fn new(config: VideoConfig) -> Self {
        Self {
            interval: Duration::from_secs_f64(1.0 / config.fps.max(1) as f64),
            config,
            decoder: None,
            sequence: 0,
            loops: 0,
            next_due: None,
            last_error: None,
        }
    }

    pub(crate) fn open(&mut self) -> Result<(), AcquisitionError> {
        if self.config.path.contains("://") {
            return Err(AcquisitionError::Open {
                source_name: self.config.path.clone(),
                reason: "video source only supports local paths".to_string(),
            });
        }
        ffmpeg::init().map_err(|e| AcquisitionError::Open {
            source_name: self.config.path.clone(),
            reason: format!("initialize ffmpeg: {e}"),
        })?;
        self.decoder = Some(open_decoder(&self.config)?);
        self.next_due = Some(Instant::now());
        log::info!(
            "VideoSource: opened {} (loop={})",
            self.config.path,
            self.config.looping
        );
        Ok(())
    }

    pub(crate) fn read(&mut self, timeout: Duration) -> Option<Frame> {
        if let Some(due) = self.next_due {
            let wait = due.saturating_duration_since(Instant::now());
            std::thread::sleep(wait.min(timeout));
        }
        self.next_due = Some(Instant::now() + self.interval);

        let deadline = Instant::now() + timeout;
        loop {
            let decoder = self.decoder.as_mut()?;
            match decode_next(decoder, deadline) {
                Ok(Some(pixels)) => {
                    let frame = Frame::from_rgb(
                        pixels,
                        self.config.width,
                        self.config.height,
                        self.sequence,
                    );
                    return match frame {
                        Ok(frame) => {
                            self.sequence += 1;
                            self.last_error = None;
                            Some(frame)
                        }
                        Err(err) => {
                            self.last_error = Some(err.to_string());
                            None
                        }
                    };
                }
                Ok(None) if self.config.looping && self.sequence > 0 => {
                    self.loops += 1;
                    log::debug!(
                        "VideoSource: rewinding {} (loop {})",
                        self.config.path,
                        self.loops
                    );
                    match open_decoder(&self.config) {
                        Ok(decoder) => self.decoder = Some(decoder),
                        Err(err) => {
                            self.last_error = Some(err.to_string());
                            self.decoder = None;
                            return None;
                        }
                    }
                }
                Ok(None) => {
                    log::info!("VideoSource: end of {}", self.config.path);
                    self.decoder = None;
                    return None;
                }
                Err(err) => {
                    log::warn!("VideoSource: decode failed: {}", err);
                    self.last_error = Some(err.to_string());
                    return None;
                }
            }
        }
    }

    pub(crate) fn close(&mut self) {
        if self.decoder.take().is_some() {
            log::info!(
                "VideoSource: closed {} after {} frames",
                self.config.path,
                self.sequence
            );
        }
    }

    pub(crate) fn resolution(&self) -> (u32, u32) {
        (self.config.width, self.config.height)
    }

    pub(crate) fn is_healthy(&self) -> bool {
        self.decoder.is_some() && self.last_error.is_none()
    }

    /// True once a non-looping file has been read to the end.
    pub(crate) fn is_finished(&self) -> bool {
        self.decoder.is_none() && self.last_error.is_none() && self.sequence > 0
    }

    pub(crate) fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.sequence,
            source: self.config.path.clone(),
        }
    }
}

fn open_decoder(config: &VideoConfig) -> Result<Decoder, AcquisitionError> {
    let open_err = |reason: String| AcquisitionError::Open {
        source_name: config.path.clone(),
        reason,
    };
    let input = ffmpeg::format::input(&config.path).map_err(|e| open_err(e.to_string()))?;
    let stream = input
        .streams()
        .best(ffmpeg::media::Type::Video)
        .ok_or_else(|| open_err("file has no video track".to_string()))?;
    let stream_index = stream.index();
    let context = ffmpeg::codec::context::Context::from_parameters(stream.parameters())
        .map_err(|e| open_err(format!("load decoder parameters: {e}")))?;
    let decoder = context
        .decoder()
        .video()
        .map_err(|e| open_err(format!("open video decoder: {e}")))?;
    let scaler = ffmpeg::software::scaling::context::Context::get(
        decoder.format(),
        decoder.width(),
        decoder.height(),
        ffmpeg::util::format::pixel::Pixel::RGB24,
        config.width,
        config.height,
        ffmpeg::software::scaling::flag::Flags::BILINEAR,
    )
    .map_err(|e| open_err(format!("create scaler: {e}")))?;
    Ok(Decoder {
        input,
        stream_index,
        decoder,
        scaler,
    })
}

/// Decode the next frame as packed RGB. `Ok(None)` means end of file.
fn decode_next(d: &mut Decoder, deadline: Instant) -> Result<Option<Vec<u8>>, AcquisitionError> {
    let mut decoded = ffmpeg::frame::Video::empty();
    let mut rgb = ffmpeg::frame::Video::empty();
    loop {
        if d.decoder.receive_frame(&mut decoded).is_ok() {
            d.scaler
                .run(&decoded, &mut rgb)
                .map_err(|e| AcquisitionError::Read(format!("scale frame: {e}")))?;
            return frame_to_pixels(&rgb).map(Some);
        }
        if Instant::now() > deadline {
            return Err(AcquisitionError::Read("decode timed out".to_string()));
        }
        let Some((stream, packet)) = d.input.packets().next() else {
            return Ok(None);
        };
        if stream.index() != d.stream_index {
            continue;
        }
        d.decoder
            .send_packet(&packet)
            .map_err(|e| AcquisitionError::Read(format!("send packet: {e}")))?;
    }
}

fn frame_to_pixels(frame: &ffmpeg::frame::Video) -> Result<Vec<u8>, AcquisitionError> {
    let width = frame.width() as usize;
    let height = frame.height() as usize;
    let row_bytes = width * 3;
    let stride = frame.stride(0);
    let data = frame.data(0);

    if stride == row_bytes {
        return data
            .get(..row_bytes * height)
            .map(<[u8]>::to_vec)
            .ok_or_else(|| AcquisitionError::Read("frame buffer is truncated".to_string()));
    }

    let mut pixels = Vec::with_capacity(row_bytes * height);
    for row in 0..height {
        let start = row * stride;
        let chunk = data
            .get(start..start + row_bytes)
            .ok_or_else(|| AcquisitionError::Read("frame row is out of bounds".to_string()))?;
        pixels.extend_from_slice(chunk);
    }
    Ok(pixels)
}
