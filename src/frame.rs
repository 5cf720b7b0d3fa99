//! Captured frames.
//!
//! A `Frame` is produced once by a frame source and then moved through the
//! pipeline. Pixels are private; readers borrow them through [`Frame::image`].

use image::RgbImage;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use crate::error::AcquisitionError;

/// Immutable RGB8 capture.
pub struct Frame {
    image: RgbImage,
    sequence: u64,
    captured_at: Instant,
    timestamp_ms: u64,
}

impl Frame {
    /// Build a frame from an RGB8 buffer. Called by ingestion sources.
    pub fn from_rgb(
        pixels: Vec<u8>,
        width: u32,
        height: u32,
        sequence: u64,
    ) -> Result<Self, AcquisitionError> {
        let actual = pixels.len();
        let image = RgbImage::from_raw(width, height, pixels).ok_or(
            AcquisitionError::BadBuffer {
                width,
                height,
                actual,
            },
        )?;
        Ok(Self::from_image(image, sequence))
    }

    pub fn from_image(image: RgbImage, sequence: u64) -> Self {
        Self {
            image,
            sequence,
            captured_at: Instant::now(),
            timestamp_ms: now_ms(),
        }
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn resolution(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn captured_at(&self) -> Instant {
        self.captured_at
    }

    /// Wall-clock capture time in milliseconds since the Unix epoch.
    pub fn timestamp_ms(&self) -> u64 {
        self.timestamp_ms
    }

    pub fn meta(&self) -> FrameMeta {
        FrameMeta {
            sequence: self.sequence,
            timestamp_ms: self.timestamp_ms,
            width: self.width(),
            height: self.height(),
        }
    }

    /// Copy of the pixels for rendering. The captured frame itself is never mutated.
    pub fn to_canvas(&self) -> RgbImage {
        self.image.clone()
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("sequence", &self.sequence)
            .field("width", &self.width())
            .field("height", &self.height())
            .field("timestamp_ms", &self.timestamp_ms)
            .finish()
    }
}

/// Pixel-free description of a frame, handed to alert sinks and the stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize)]
pub struct FrameMeta {
    pub sequence: u64,
    pub timestamp_ms: u64,
    pub width: u32,
    pub height: u32,
}

pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_rgb_rejects_short_buffer() {
        let err = Frame::from_rgb(vec![0u8; 10], 4, 4, 1).unwrap_err();
        assert!(matches!(err, AcquisitionError::BadBuffer { actual: 10, .. }));
    }

    #[test]
    fn meta_mirrors_frame() {
        let frame = Frame::from_rgb(vec![0u8; 4 * 3 * 3], 4, 3, 7).expect("frame");
        let meta = frame.meta();
        assert_eq!(meta.sequence, 7);
        assert_eq!((meta.width, meta.height), (4, 3));
        assert_eq!(frame.resolution(), (4, 3));
    }
}
