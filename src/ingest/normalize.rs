use crate::error::AcquisitionError;

/// Pixel layouts delivered by capture devices.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum PixelFormat {
    Rgb24,
    Yuyv,
    Mjpeg,
}

impl PixelFormat {
    pub(crate) fn from_fourcc(fourcc: &[u8; 4]) -> Option<Self> {
        match fourcc {
            b"RGB3" => Some(Self::Rgb24),
            b"YUYV" => Some(Self::Yuyv),
            b"MJPG" | b"JPEG" => Some(Self::Mjpeg),
            _ => None,
        }
    }
}

/// Convert a device buffer to packed RGB8.
pub(crate) fn normalize_to_rgb(
    pixels: &[u8],
    width: u32,
    height: u32,
    format: PixelFormat,
) -> Result<Vec<u8>, AcquisitionError> {
    let area = (width as usize)
        .checked_mul(height as usize)
        .ok_or_else(|| AcquisitionError::Read("frame dimensions overflow".to_string()))?;
    match format {
        PixelFormat::Rgb24 => {
            let expected = area * 3;
            if pixels.len() < expected {
                return Err(AcquisitionError::BadBuffer {
                    width,
                    height,
                    actual: pixels.len(),
                });
            }
            Ok(pixels[..expected].to_vec())
        }
        PixelFormat::Yuyv => yuyv_to_rgb(pixels, width, height, area),
        PixelFormat::Mjpeg => {
            let decoded = image::load_from_memory_with_format(pixels, image::ImageFormat::Jpeg)
                .map_err(|e| AcquisitionError::Read(format!("mjpeg decode: {e}")))?
                .into_rgb8();
            if decoded.dimensions() != (width, height) {
                let resized = image::imageops::resize(
                    &decoded,
                    width,
                    height,
                    image::imageops::FilterType::Triangle,
                );
                return Ok(resized.into_raw());
            }
            Ok(decoded.into_raw())
        }
    }
}

fn yuyv_to_rgb(
    pixels: &[u8],
    width: u32,
    height: u32,
    area: usize,
) -> Result<Vec<u8>, AcquisitionError> {
    if pixels.len() < area * 2 || width % 2 != 0 {
        return Err(AcquisitionError::BadBuffer {
            width,
            height,
            actual: pixels.len(),
        });
    }
    let mut rgb = Vec::with_capacity(area * 3);
    for chunk in pixels[..area * 2].chunks_exact(4) {
        let u = chunk[1] as f32 - 128.0;
        let v = chunk[3] as f32 - 128.0;
        for y in [chunk[0], chunk[2]] {
            let y = y as f32;
            rgb.push(clamp_to_u8(y + 1.402 * v));
            rgb.push(clamp_to_u8(y - 0.344_136 * u - 0.714_136 * v));
            rgb.push(clamp_to_u8(y + 1.772 * u));
        }
    }
    Ok(rgb)
}

fn clamp_to_u8(value: f32) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}
