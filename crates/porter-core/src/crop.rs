//! Crop planning around the best detected face.

use crate::types::{CropRegion, FaceRegion};

pub const DEFAULT_CROP_MARGIN: u32 = 150;

/// Expands a face box by a fixed margin, clamped to the image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropPlanner {
    margin: u32,
}

impl Default for CropPlanner {
    fn default() -> Self {
        Self::new(DEFAULT_CROP_MARGIN)
    }
}

impl CropPlanner {
    pub fn new(margin: u32) -> Self {
        Self { margin }
    }

    pub fn margin(&self) -> u32 {
        self.margin
    }

    /// Plan the crop for a `width × height` image.
    ///
    /// Without a detection the whole image is used. A detection reaching
    /// past the image is clamped first, so the result is always non-empty
    /// for a non-empty image and lies inside it.
    pub fn plan(&self, width: u32, height: u32, detection: Option<&FaceRegion>) -> CropRegion {
        let Some(face) = detection else {
            return CropRegion::full(width, height);
        };

        let fx = face.x.min(width.saturating_sub(1));
        let fy = face.y.min(height.saturating_sub(1));
        let x = fx.saturating_sub(self.margin);
        let y = fy.saturating_sub(self.margin);
        let span_w = face.width.saturating_add(self.margin.saturating_mul(2));
        let span_h = face.height.saturating_add(self.margin.saturating_mul(2));

        let crop = CropRegion {
            x,
            y,
            width: span_w.min(width - x),
            height: span_h.min(height - y),
        };
        if crop.width == 0 || crop.height == 0 {
            return CropRegion::full(width, height);
        }
        crop
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_detection_is_full_frame() {
        let planner = CropPlanner::default();
        assert_eq!(planner.plan(640, 480, None), CropRegion::full(640, 480));
    }

    #[test]
    fn test_margin_clamped_at_origin() {
        let planner = CropPlanner::default();
        let face = FaceRegion::new(100, 100, 50, 50);
        let crop = planner.plan(1000, 1000, Some(&face));
        assert_eq!(crop, CropRegion { x: 0, y: 0, width: 350, height: 350 });
        assert!(crop.contains(&face));
    }

    #[test]
    fn test_margin_inside_image() {
        let planner = CropPlanner::default();
        let face = FaceRegion::new(400, 300, 100, 120);
        let crop = planner.plan(1920, 1080, Some(&face));
        assert_eq!(crop, CropRegion { x: 250, y: 150, width: 400, height: 420 });
    }

    #[test]
    fn test_margin_clamped_at_far_edge() {
        let planner = CropPlanner::default();
        let face = FaceRegion::new(560, 400, 80, 80);
        let crop = planner.plan(640, 480, Some(&face));
        assert_eq!(crop, CropRegion { x: 410, y: 250, width: 230, height: 230 });
        assert!(crop.fits_within(640, 480));
        assert!(crop.contains(&face));
    }

    #[test]
    fn test_zero_margin_is_face() {
        let planner = CropPlanner::new(0);
        let face = FaceRegion::new(10, 20, 30, 40);
        let crop = planner.plan(100, 100, Some(&face));
        assert_eq!(crop, CropRegion { x: 10, y: 20, width: 30, height: 40 });
    }

    #[test]
    fn test_crop_always_inside_image() {
        let planner = CropPlanner::default();
        let sizes = [(1, 1), (64, 48), (640, 480), (1000, 1000)];
        for &(w, h) in &sizes {
            for &(x, y, fw, fh) in &[(0, 0, 1, 1), (w / 2, h / 2, w / 4 + 1, h / 4 + 1), (w - 1, h - 1, 1, 1)] {
                let face = FaceRegion::new(x, y, fw, fh);
                let crop = planner.plan(w, h, Some(&face));
                assert!(crop.fits_within(w, h), "{crop:?} not inside {w}x{h}");
                assert!(crop.contains(&face), "{crop:?} does not contain {face:?}");
            }
        }
    }
}
