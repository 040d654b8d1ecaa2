//! Captured frames and raw-buffer conversion to grayscale.

use image::GrayImage;
use std::time::Instant;

/// A captured grayscale camera frame.
#[derive(Clone)]
pub struct Frame {
    pub image: GrayImage,
    pub timestamp: Instant,
    pub sequence: u32,
    pub is_dark: bool,
}

impl Frame {
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Average pixel brightness (0.0–255.0).
    pub fn avg_brightness(&self) -> f32 {
        let data = self.image.as_raw();
        if data.is_empty() {
            return 0.0;
        }
        data.iter().map(|&b| b as f32).sum::<f32>() / data.len() as f32
    }
}

/// Convert packed YUYV (4:2:2) to grayscale by extracting the Y channel.
///
/// YUYV packs two pixels per 4 bytes: [Y0, U, Y1, V].
pub fn yuyv_to_grayscale(yuyv: &[u8], width: u32, height: u32) -> Result<GrayImage, FrameError> {
    let expected = (width * height * 2) as usize;
    if yuyv.len() < expected {
        return Err(FrameError::InvalidLength {
            format: "YUYV",
            expected,
            actual: yuyv.len(),
        });
    }
    let luma = yuyv[..expected].iter().step_by(2).copied().collect();
    gray_image(width, height, luma)
}

/// 8-bit grayscale passthrough.
pub fn grey_to_grayscale(buf: &[u8], width: u32, height: u32) -> Result<GrayImage, FrameError> {
    let expected = (width * height) as usize;
    if buf.len() < expected {
        return Err(FrameError::InvalidLength {
            format: "GREY",
            expected,
            actual: buf.len(),
        });
    }
    gray_image(width, height, buf[..expected].to_vec())
}

/// 16-bit little-endian grayscale, keeping the high byte.
pub fn y16_to_grayscale(buf: &[u8], width: u32, height: u32) -> Result<GrayImage, FrameError> {
    let expected = (width * height * 2) as usize;
    if buf.len() < expected {
        return Err(FrameError::InvalidLength {
            format: "Y16",
            expected,
            actual: buf.len(),
        });
    }
    let luma = buf[..expected]
        .chunks_exact(2)
        .map(|px| (u16::from_le_bytes([px[0], px[1]]) >> 8) as u8)
        .collect();
    gray_image(width, height, luma)
}

fn gray_image(width: u32, height: u32, luma: Vec<u8>) -> Result<GrayImage, FrameError> {
    GrayImage::from_raw(width, height, luma).ok_or(FrameError::BadDimensions { width, height })
}

/// True if more than `threshold_pct` of pixels fall in the darkest bucket (0–31).
pub fn is_dark_frame(gray: &[u8], threshold_pct: f32) -> bool {
    if gray.is_empty() {
        return true;
    }
    let dark_count = gray.iter().filter(|&&p| p < 32).count();
    (dark_count as f32 / gray.len() as f32) > threshold_pct
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid {format} length: expected {expected}, got {actual}")]
    InvalidLength {
        format: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("buffer does not fit a {width}x{height} image")]
    BadDimensions { width: u32, height: u32 },
}
