//! Pixel-format conversion and frame scaling.

use image::imageops::{self, FilterType};
use image::RgbImage;

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid {format} length: expected {expected}, got {actual}")]
    InvalidLength {
        format: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("scale factor must be positive and finite, got {0}")]
    InvalidScale(f64),
}

fn check_len(
    buf: &[u8],
    format: &'static str,
    width: u32,
    height: u32,
    bytes_per_pixel: usize,
) -> Result<usize, FrameError> {
    let expected = width as usize * height as usize * bytes_per_pixel;
    if buf.len() < expected {
        return Err(FrameError::InvalidLength {
            format,
            expected,
            actual: buf.len(),
        });
    }
    Ok(expected)
}

/// BT.601 limited-range YCbCr to RGB, integer arithmetic.
fn ycbcr_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
    let c = i32::from(y) - 16;
    let d = i32::from(u) - 128;
    let e = i32::from(v) - 128;
    let clamp = |x: i32| ((x + 128) >> 8).clamp(0, 255) as u8;
    [
        clamp(298 * c + 409 * e),
        clamp(298 * c - 100 * d - 208 * e),
        clamp(298 * c + 516 * d),
    ]
}

/// Convert packed YUYV (4:2:2) to RGB.
///
/// YUYV packs two pixels per 4 bytes: [Y0, U, Y1, V]; both pixels share
/// the chroma pair, so the pixel count must be even.
pub fn yuyv_to_rgb(yuyv: &[u8], width: u32, height: u32) -> Result<RgbImage, FrameError> {
    let expected = check_len(yuyv, "YUYV", width, height, 2)?;
    let mut rgb = Vec::with_capacity(expected / 2 * 3);
    for chunk in yuyv[..expected].chunks_exact(4) {
        let (y0, u, y1, v) = (chunk[0], chunk[1], chunk[2], chunk[3]);
        rgb.extend_from_slice(&ycbcr_to_rgb(y0, u, v));
        rgb.extend_from_slice(&ycbcr_to_rgb(y1, u, v));
    }
    RgbImage::from_raw(width, height, rgb).ok_or(FrameError::InvalidLength {
        format: "YUYV",
        expected,
        actual: yuyv.len(),
    })
}

/// Wrap packed 24-bit RGB (V4L2 `RGB3`).
pub fn rgb3_to_rgb(buf: &[u8], width: u32, height: u32) -> Result<RgbImage, FrameError> {
    let expected = check_len(buf, "RGB3", width, height, 3)?;
    RgbImage::from_raw(width, height, buf[..expected].to_vec()).ok_or(FrameError::InvalidLength {
        format: "RGB3",
        expected,
        actual: buf.len(),
    })
}

/// Resize by `factor` with bilinear filtering; a factor of 1 is a no-op.
pub fn scale(image: RgbImage, factor: f64) -> Result<RgbImage, FrameError> {
    if !(factor.is_finite() && factor > 0.0) {
        return Err(FrameError::InvalidScale(factor));
    }
    if factor == 1.0 {
        return Ok(image);
    }
    let width = ((f64::from(image.width()) * factor).round() as u32).max(1);
    let height = ((f64::from(image.height()) * factor).round() as u32).max(1);
    Ok(imageops::resize(&image, width, height, FilterType::Triangle))
}
