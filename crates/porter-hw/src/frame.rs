//! Frame type and pixel-format conversion.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("invalid buffer length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
    #[error("frame has zero area ({width}x{height})")]
    Empty { width: u32, height: u32 },
    #[error("cannot convert {from} to {to}")]
    UnsupportedConversion { from: PixelFormat, to: PixelFormat },
}

/// Pixel layout of a frame buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PixelFormat {
    /// 8-bit grayscale, 1 byte/pixel.
    Gray8,
    /// Packed 8-bit RGB, 3 bytes/pixel.
    Rgb8,
    /// YUYV 4:2:2 packed, 2 bytes/pixel.
    Yuyv,
    /// 16-bit little-endian grayscale, 2 bytes/pixel.
    Y16,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Gray8 => 1,
            PixelFormat::Rgb8 => 3,
            PixelFormat::Yuyv | PixelFormat::Y16 => 2,
        }
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PixelFormat::Gray8 => "Gray8",
            PixelFormat::Rgb8 => "Rgb8",
            PixelFormat::Yuyv => "YUYV",
            PixelFormat::Y16 => "Y16",
        };
        f.write_str(name)
    }
}

/// A captured camera frame.
#[derive(Clone)]
pub struct Frame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub timestamp: std::time::Instant,
    pub sequence: u32,
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("format", &self.format)
            .field("sequence", &self.sequence)
            .field("bytes", &self.data.len())
            .finish()
    }
}

impl Frame {
    /// Wrap a raw buffer, checking that it holds `width * height` pixels of `format`.
    ///
    /// Trailing bytes beyond the expected length (driver padding) are truncated.
    pub fn new(
        mut data: Vec<u8>,
        width: u32,
        height: u32,
        format: PixelFormat,
        sequence: u32,
    ) -> Result<Self, FrameError> {
        if width == 0 || height == 0 {
            return Err(FrameError::Empty { width, height });
        }
        let expected = width as usize * height as usize * format.bytes_per_pixel();
        if data.len() < expected {
            return Err(FrameError::InvalidLength {
                expected,
                actual: data.len(),
            });
        }
        data.truncate(expected);
        Ok(Self {
            data,
            width,
            height,
            format,
            timestamp: std::time::Instant::now(),
            sequence,
        })
    }

    /// Return a copy of this frame in `target` format.
    pub fn convert(&self, target: PixelFormat) -> Result<Frame, FrameError> {
        if self.format == target {
            return Ok(self.clone());
        }
        let data = match (self.format, target) {
            (PixelFormat::Yuyv, PixelFormat::Gray8) => {
                yuyv_to_grayscale(&self.data, self.width, self.height)?
            }
            (PixelFormat::Y16, PixelFormat::Gray8) => y16_to_grayscale(&self.data),
            (PixelFormat::Rgb8, PixelFormat::Gray8) => rgb_to_grayscale(&self.data),
            (PixelFormat::Yuyv, PixelFormat::Rgb8) => {
                yuyv_to_rgb(&self.data, self.width, self.height)?
            }
            (PixelFormat::Gray8, PixelFormat::Rgb8) => {
                self.data.iter().flat_map(|&y| [y, y, y]).collect()
            }
            (from, to) => return Err(FrameError::UnsupportedConversion { from, to }),
        };
        Ok(Frame {
            data,
            width: self.width,
            height: self.height,
            format: target,
            timestamp: self.timestamp,
            sequence: self.sequence,
        })
    }
}

/// Convert packed YUYV (4:2:2) to grayscale by extracting the Y channel.
///
/// YUYV packs two pixels per 4 bytes: [Y0, U, Y1, V].
pub fn yuyv_to_grayscale(yuyv: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let expected = (width * height * 2) as usize;
    if yuyv.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: yuyv.len(),
        });
    }
    Ok(yuyv[..expected].iter().step_by(2).copied().collect())
}

/// Convert packed YUYV (4:2:2) to RGB using BT.601 integer coefficients.
pub fn yuyv_to_rgb(yuyv: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let expected = (width * height * 2) as usize;
    if yuyv.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: yuyv.len(),
        });
    }
    let mut rgb = Vec::with_capacity(expected / 2 * 3);
    for chunk in yuyv[..expected].chunks_exact(4) {
        let (y0, u, y1, v) = (chunk[0], chunk[1], chunk[2], chunk[3]);
        rgb.extend_from_slice(&ycbcr_to_rgb(y0, u, v));
        rgb.extend_from_slice(&ycbcr_to_rgb(y1, u, v));
    }
    Ok(rgb)
}

fn ycbcr_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
    let c = y as i32 - 16;
    let d = u as i32 - 128;
    let e = v as i32 - 128;
    let clamp = |x: i32| ((x + 128) >> 8).clamp(0, 255) as u8;
    [
        clamp(298 * c + 409 * e),
        clamp(298 * c - 100 * d - 208 * e),
        clamp(298 * c + 516 * d),
    ]
}

/// Downscale 16-bit little-endian grayscale to 8-bit by keeping the high byte.
pub fn y16_to_grayscale(y16: &[u8]) -> Vec<u8> {
    y16.chunks_exact(2).map(|px| px[1]).collect()
}

/// Luma from packed RGB using integer Rec. 601 weights.
pub fn rgb_to_grayscale(rgb: &[u8]) -> Vec<u8> {
    rgb.chunks_exact(3)
        .map(|px| ((77 * px[0] as u32 + 150 * px[1] as u32 + 29 * px[2] as u32) >> 8) as u8)
        .collect()
}
