//! Turn a captured still into the JPEG sent for recognition.

use crate::crop::CropPlanner;
use crate::locator::{DetectionError, FaceLocator};
use crate::types::{CropRegion, FaceRegion, FrameSize};
use image::codecs::jpeg::JpegEncoder;
use image::{ExtendedColorType, ImageEncoder, RgbImage};
use porter_hw::{Frame, FrameError, PixelFormat};
use thiserror::Error;

pub const DEFAULT_JPEG_QUALITY: u8 = 90;

#[derive(Error, Debug)]
pub enum StillError {
    #[error("still frame: {0}")]
    Frame(#[from] FrameError),
    #[error("still buffer does not match {width}x{height}")]
    Buffer { width: u32, height: u32 },
    #[error("JPEG encoding failed: {0}")]
    Encode(#[from] image::ImageError),
}

/// A cropped, encoded still ready for the recognition service.
#[derive(Debug, Clone, PartialEq)]
pub struct StillImage {
    pub jpeg: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub region: CropRegion,
    pub source_size: FrameSize,
}

impl StillImage {
    pub fn is_empty(&self) -> bool {
        self.jpeg.is_empty()
    }
}

/// Crops a still around the best face and encodes it.
#[derive(Debug, Clone, Copy)]
pub struct StillPreparer {
    planner: CropPlanner,
    jpeg_quality: u8,
}

impl Default for StillPreparer {
    fn default() -> Self {
        Self::new(CropPlanner::default(), DEFAULT_JPEG_QUALITY)
    }
}

impl StillPreparer {
    pub fn new(planner: CropPlanner, jpeg_quality: u8) -> Self {
        Self {
            planner,
            jpeg_quality: jpeg_quality.clamp(1, 100),
        }
    }

    pub fn prepare(&self, still: &Frame, locator: &mut dyn FaceLocator) -> Result<StillImage, StillError> {
        let face = best_face(still, locator);
        self.encode(still, face)
    }

    /// Encode the whole still, for when no locator is available.
    pub fn prepare_uncropped(&self, still: &Frame) -> Result<StillImage, StillError> {
        self.encode(still, None)
    }

    fn encode(&self, still: &Frame, face: Option<FaceRegion>) -> Result<StillImage, StillError> {
        let rgb = still.convert(PixelFormat::Rgb8)?;
        let region = self.planner.plan(rgb.width, rgb.height, face.as_ref());

        let image = RgbImage::from_raw(rgb.width, rgb.height, rgb.data).ok_or(StillError::Buffer {
            width: rgb.width,
            height: rgb.height,
        })?;
        let cropped =
            image::imageops::crop_imm(&image, region.x, region.y, region.width, region.height).to_image();

        let mut jpeg = Vec::new();
        JpegEncoder::new_with_quality(&mut jpeg, self.jpeg_quality).write_image(
            cropped.as_raw(),
            cropped.width(),
            cropped.height(),
            ExtendedColorType::Rgb8,
        )?;

        tracing::debug!(
            crop = ?region,
            face = face.is_some(),
            bytes = jpeg.len(),
            "prepared still"
        );

        Ok(StillImage {
            jpeg,
            width: cropped.width(),
            height: cropped.height(),
            region,
            source_size: FrameSize {
                width: rgb.width,
                height: rgb.height,
            },
        })
    }
}

/// First face the locator reports, or `None` to use the whole still.
fn best_face(still: &Frame, locator: &mut dyn FaceLocator) -> Option<FaceRegion> {
    let analysis = match still.convert(locator.preferred_format()) {
        Ok(frame) => frame,
        Err(e) => {
            tracing::debug!(error = %e, "still not convertible for locator, using full frame");
            return None;
        }
    };
    match locator.locate(&analysis) {
        Ok(faces) => faces.into_iter().next(),
        Err(DetectionError::UnsupportedPixelFormat { found, expected }) => {
            tracing::debug!(%found, %expected, "locator rejected still, using full frame");
            None
        }
        Err(e) => {
            tracing::warn!(error = %e, "face location failed on still, using full frame");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(Result<Vec<FaceRegion>, ()>, PixelFormat);

    impl FaceLocator for Fixed {
        fn preferred_format(&self) -> PixelFormat {
            self.1
        }

        fn locate(&mut self, frame: &Frame) -> Result<Vec<FaceRegion>, DetectionError> {
            crate::locator::ensure_supported(self, frame)?;
            self.0
                .clone()
                .map_err(|_| DetectionError::InferenceFailed("boom".into()))
        }
    }

    fn rgb_still(width: u32, height: u32) -> Frame {
        let data = (0..width * height)
            .flat_map(|i| [(i % 251) as u8, 64, 128])
            .collect();
        Frame::new(data, width, height, PixelFormat::Rgb8, 1).unwrap()
    }

    fn decoded_size(jpeg: &[u8]) -> (u32, u32) {
        let img = image::load_from_memory(jpeg).unwrap();
        (img.width(), img.height())
    }

    #[test]
    fn test_crops_around_first_face() {
        let mut locator = Fixed(
            Ok(vec![FaceRegion::new(300, 200, 40, 40), FaceRegion::new(0, 0, 10, 10)]),
            PixelFormat::Gray8,
        );
        let prepared = StillPreparer::default()
            .prepare(&rgb_still(640, 480), &mut locator)
            .unwrap();
        assert_eq!(prepared.region, CropRegion { x: 150, y: 50, width: 340, height: 340 });
        assert_eq!((prepared.width, prepared.height), (340, 340));
        assert_eq!(decoded_size(&prepared.jpeg), (340, 340));
        assert_eq!(prepared.source_size, FrameSize { width: 640, height: 480 });
    }

    #[test]
    fn test_no_face_uses_full_frame() {
        let mut locator = Fixed(Ok(vec![]), PixelFormat::Gray8);
        let prepared = StillPreparer::default()
            .prepare(&rgb_still(64, 48), &mut locator)
            .unwrap();
        assert_eq!(prepared.region, CropRegion::full(64, 48));
        assert_eq!(decoded_size(&prepared.jpeg), (64, 48));
    }

    #[test]
    fn test_unsupported_format_uses_full_frame() {
        // Rgb8 cannot be converted to Y16.
        let mut locator = Fixed(Ok(vec![FaceRegion::new(1, 1, 2, 2)]), PixelFormat::Y16);
        let prepared = StillPreparer::default()
            .prepare(&rgb_still(32, 32), &mut locator)
            .unwrap();
        assert_eq!(prepared.region, CropRegion::full(32, 32));
    }

    #[test]
    fn test_locator_failure_uses_full_frame() {
        let mut locator = Fixed(Err(()), PixelFormat::Gray8);
        let prepared = StillPreparer::new(CropPlanner::new(10), 50)
            .prepare(&rgb_still(32, 32), &mut locator)
            .unwrap();
        assert_eq!(prepared.region, CropRegion::full(32, 32));
        assert!(!prepared.is_empty());
    }

    #[test]
    fn test_uncropped_from_yuyv_still() {
        let yuyv = Frame::new(vec![128; 8 * 4 * 2], 8, 4, PixelFormat::Yuyv, 0).unwrap();
        let prepared = StillPreparer::default().prepare_uncropped(&yuyv).unwrap();
        assert_eq!(prepared.region, CropRegion::full(8, 4));
        assert_eq!(decoded_size(&prepared.jpeg), (8, 4));
    }
}
