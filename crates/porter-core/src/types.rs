use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Axis-aligned face box in frame pixels, contained within the frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaceRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl FaceRegion {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    /// Clamp a floating-point detector box into a `frame_width × frame_height` frame.
    ///
    /// Returns `None` if nothing of the box remains inside the frame.
    pub fn from_box_clamped(
        x: f32,
        y: f32,
        width: f32,
        height: f32,
        frame_width: u32,
        frame_height: u32,
    ) -> Option<Self> {
        if !(x.is_finite() && y.is_finite() && width.is_finite() && height.is_finite()) {
            return None;
        }
        let fw = frame_width as f32;
        let fh = frame_height as f32;
        let x1 = x.clamp(0.0, fw);
        let y1 = y.clamp(0.0, fh);
        let x2 = (x + width).clamp(0.0, fw);
        let y2 = (y + height).clamp(0.0, fh);

        let region = Self {
            x: x1.floor() as u32,
            y: y1.floor() as u32,
            width: (x2 - x1.floor()).floor() as u32,
            height: (y2 - y1.floor()).floor() as u32,
        };
        (region.width > 0 && region.height > 0).then_some(region)
    }

    pub fn right(&self) -> u32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> u32 {
        self.y + self.height
    }
}

/// Sub-rectangle of a still image sent for recognition.
///
/// Always non-empty and inside the source image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CropRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl CropRegion {
    pub fn full(width: u32, height: u32) -> Self {
        Self {
            x: 0,
            y: 0,
            width,
            height,
        }
    }

    pub fn contains(&self, face: &FaceRegion) -> bool {
        face.x >= self.x
            && face.y >= self.y
            && face.right() <= self.x + self.width
            && face.bottom() <= self.y + self.height
    }

    pub fn fits_within(&self, width: u32, height: u32) -> bool {
        self.width > 0
            && self.height > 0
            && self.x + self.width <= width
            && self.y + self.height <= height
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameSize {
    pub width: u32,
    pub height: u32,
}

/// Faces found in one processed frame, published for overlay rendering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionSnapshot {
    /// Monotonic per-loop counter of published snapshots.
    pub sequence: u64,
    pub frame_size: FrameSize,
    pub faces: Vec<FaceRegion>,
    pub captured_at: DateTime<Utc>,
}

/// First photo of a visitor, scaled for display.
#[derive(Debug, Clone, PartialEq)]
pub struct Thumbnail {
    pub source: PathBuf,
    pub image: image::RgbImage,
}

/// A whitelisted visitor, one per store folder.
#[derive(Debug, Clone, PartialEq)]
pub struct Visitor {
    /// Unique; doubles as the store folder name.
    pub name: String,
    pub image_folder: PathBuf,
    /// `None` when the folder has no readable photo.
    pub thumbnail: Option<Thumbnail>,
    pub display_width: u32,
    pub photo_count: usize,
}

/// Result of asking the recognition service who is in a still.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum RecognitionOutcome {
    /// Non-empty, best match first.
    Matched(Vec<String>),
    NoMatch,
    NoFaceDetected,
    ServiceError(String),
}
