//! Face location over a single frame.

use crate::types::FaceRegion;
use porter_hw::{Frame, PixelFormat};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DetectionError {
    #[error("unsupported pixel format {found} (locator expects {expected})")]
    UnsupportedPixelFormat {
        found: PixelFormat,
        expected: PixelFormat,
    },
    #[error("model file not found: {0} (download SCRFD det_10g.onnx from insightface and place it in the model directory)")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Finds faces in a frame.
///
/// Implementations are deterministic for identical input and return an empty
/// vector, not an error, when no face is present. The first region is the
/// best candidate.
pub trait FaceLocator: Send {
    /// Pixel format frames should be captured or converted to before `locate`.
    fn preferred_format(&self) -> PixelFormat;

    fn supports(&self, format: PixelFormat) -> bool {
        format == self.preferred_format()
    }

    fn locate(&mut self, frame: &Frame) -> Result<Vec<FaceRegion>, DetectionError>;
}

/// Reject frames the locator cannot read.
pub fn ensure_supported(locator: &dyn FaceLocator, frame: &Frame) -> Result<(), DetectionError> {
    if locator.supports(frame.format) {
        Ok(())
    } else {
        Err(DetectionError::UnsupportedPixelFormat {
            found: frame.format,
            expected: locator.preferred_format(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct GrayOnly;

    impl FaceLocator for GrayOnly {
        fn preferred_format(&self) -> PixelFormat {
            PixelFormat::Gray8
        }

        fn locate(&mut self, frame: &Frame) -> Result<Vec<FaceRegion>, DetectionError> {
            ensure_supported(self, frame)?;
            Ok(vec![])
        }
    }

    #[test]
    fn test_ensure_supported() {
        let mut locator = GrayOnly;
        let gray = Frame::new(vec![0; 4], 2, 2, PixelFormat::Gray8, 0).unwrap();
        assert!(locator.locate(&gray).unwrap().is_empty());

        let rgb = gray.convert(PixelFormat::Rgb8).unwrap();
        let err = locator.locate(&rgb).unwrap_err();
        assert!(matches!(
            err,
            DetectionError::UnsupportedPixelFormat {
                found: PixelFormat::Rgb8,
                expected: PixelFormat::Gray8
            }
        ));
    }
}
