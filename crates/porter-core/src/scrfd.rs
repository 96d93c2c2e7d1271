//! SCRFD face locator via ONNX Runtime.
//!
//! Letterboxes a grayscale frame to the 640×640 model input, decodes the
//! three anchor-free stride heads and suppresses overlapping boxes.

use crate::locator::{ensure_supported, DetectionError, FaceLocator};
use crate::types::FaceRegion;
use image::imageops::FilterType;
use image::GrayImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use porter_hw::{Frame, PixelFormat};
use std::path::Path;

const SCRFD_INPUT_SIZE: usize = 640;
const SCRFD_MEAN: f32 = 127.5;
const SCRFD_STD: f32 = 128.0;
const SCRFD_NMS_THRESHOLD: f32 = 0.4;
const SCRFD_STRIDES: [usize; 3] = [8, 16, 32];
const SCRFD_ANCHORS_PER_CELL: usize = 2;

pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.5;

/// Maps letterboxed model coordinates back to the source frame.
#[derive(Debug, Clone, Copy)]
struct Letterbox {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

impl Letterbox {
    fn fit(width: u32, height: u32, target: usize) -> (Self, u32, u32) {
        let scale = (target as f32 / width as f32).min(target as f32 / height as f32);
        let new_w = ((width as f32 * scale).round() as u32).clamp(1, target as u32);
        let new_h = ((height as f32 * scale).round() as u32).clamp(1, target as u32);
        let letterbox = Self {
            scale,
            pad_x: (target as u32 - new_w) as f32 / 2.0,
            pad_y: (target as u32 - new_h) as f32 / 2.0,
        };
        (letterbox, new_w, new_h)
    }

    fn to_frame(self, x: f32, y: f32) -> (f32, f32) {
        ((x - self.pad_x) / self.scale, (y - self.pad_y) / self.scale)
    }
}

/// A scored box in frame coordinates, before clamping.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Candidate {
    x1: f32,
    y1: f32,
    x2: f32,
    y2: f32,
    score: f32,
}

impl Candidate {
    fn area(&self) -> f32 {
        (self.x2 - self.x1).max(0.0) * (self.y2 - self.y1).max(0.0)
    }

    fn iou(&self, other: &Candidate) -> f32 {
        let inter_w = (self.x2.min(other.x2) - self.x1.max(other.x1)).max(0.0);
        let inter_h = (self.y2.min(other.y2) - self.y1.max(other.y1)).max(0.0);
        let inter = inter_w * inter_h;
        let union = self.area() + other.area() - inter;
        if union > 0.0 {
            inter / union
        } else {
            0.0
        }
    }
}

/// Output tensor indices for one stride: (score_idx, bbox_idx).
type StrideOutputs = (usize, usize);

pub struct ScrfdLocator {
    session: Session,
    stride_outputs: [StrideOutputs; 3],
    confidence_threshold: f32,
}

impl ScrfdLocator {
    /// Load the SCRFD ONNX model from the given path.
    pub fn load(model_path: &Path, confidence_threshold: f32) -> Result<Self, DetectionError> {
        if !model_path.exists() {
            return Err(DetectionError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let output_names: Vec<String> = session
            .outputs()
            .iter()
            .map(|o| o.name().to_string())
            .collect();

        if output_names.len() < 6 {
            return Err(DetectionError::InferenceFailed(format!(
                "SCRFD model requires score and bbox outputs for 3 strides, got {} outputs",
                output_names.len()
            )));
        }

        let stride_outputs = discover_outputs(&output_names);
        tracing::info!(
            path = %model_path.display(),
            outputs = ?output_names,
            mapping = ?stride_outputs,
            "loaded SCRFD model"
        );

        Ok(Self {
            session,
            stride_outputs,
            confidence_threshold,
        })
    }

    fn preprocess(frame: &Frame) -> Result<(Array4<f32>, Letterbox), DetectionError> {
        let gray = GrayImage::from_raw(frame.width, frame.height, frame.data.clone())
            .ok_or_else(|| DetectionError::InferenceFailed("frame buffer does not match its size".into()))?;

        let (letterbox, new_w, new_h) = Letterbox::fit(frame.width, frame.height, SCRFD_INPUT_SIZE);
        // Triangle = bilinear; keeps edges sharp enough for small faces.
        let resized = image::imageops::resize(&gray, new_w, new_h, FilterType::Triangle);

        // Zero is the normalized value of the mean, so the padding needs no fill.
        let mut tensor = Array4::<f32>::zeros((1, 3, SCRFD_INPUT_SIZE, SCRFD_INPUT_SIZE));
        let off_x = letterbox.pad_x.floor() as usize;
        let off_y = letterbox.pad_y.floor() as usize;
        for (x, y, pixel) in resized.enumerate_pixels() {
            let v = (pixel.0[0] as f32 - SCRFD_MEAN) / SCRFD_STD;
            let (tx, ty) = (off_x + x as usize, off_y + y as usize);
            for c in 0..3 {
                tensor[[0, c, ty, tx]] = v;
            }
        }

        Ok((tensor, letterbox))
    }
}

impl FaceLocator for ScrfdLocator {
    fn preferred_format(&self) -> PixelFormat {
        PixelFormat::Gray8
    }

    fn locate(&mut self, frame: &Frame) -> Result<Vec<FaceRegion>, DetectionError> {
        ensure_supported(self, frame)?;
        let (input, letterbox) = Self::preprocess(frame)?;

        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut candidates = Vec::new();
        for (pos, &stride) in SCRFD_STRIDES.iter().enumerate() {
            let (score_idx, bbox_idx) = self.stride_outputs[pos];
            let (_, scores) = outputs[score_idx].try_extract_tensor::<f32>().map_err(|e| {
                DetectionError::InferenceFailed(format!("scores stride {stride}: {e}"))
            })?;
            let (_, bboxes) = outputs[bbox_idx].try_extract_tensor::<f32>().map_err(|e| {
                DetectionError::InferenceFailed(format!("bboxes stride {stride}: {e}"))
            })?;
            candidates.extend(decode_stride(
                scores,
                bboxes,
                stride,
                letterbox,
                self.confidence_threshold,
            ));
        }

        let kept = nms(candidates, SCRFD_NMS_THRESHOLD);
        tracing::trace!(faces = kept.len(), "SCRFD detections");

        Ok(kept
            .iter()
            .filter_map(|c| {
                FaceRegion::from_box_clamped(
                    c.x1,
                    c.y1,
                    c.x2 - c.x1,
                    c.y2 - c.y1,
                    frame.width,
                    frame.height,
                )
            })
            .collect())
    }
}

/// Find score/bbox outputs by name ("score_8", "bbox_16", ...), else assume
/// the standard positional layout [scores 8/16/32, bboxes 8/16/32, ...].
fn discover_outputs(names: &[String]) -> [StrideOutputs; 3] {
    let find = |prefix: &str, stride: usize| {
        let target = format!("{prefix}_{stride}");
        names.iter().position(|n| *n == target)
    };

    let named: Option<Vec<StrideOutputs>> = SCRFD_STRIDES
        .iter()
        .map(|&s| Some((find("score", s)?, find("bbox", s)?)))
        .collect();

    match named {
        Some(v) => [v[0], v[1], v[2]],
        None => [(0, 3), (1, 4), (2, 5)],
    }
}

/// Decode one stride head into frame-space candidates above `threshold`.
fn decode_stride(
    scores: &[f32],
    bboxes: &[f32],
    stride: usize,
    letterbox: Letterbox,
    threshold: f32,
) -> Vec<Candidate> {
    let grid_w = SCRFD_INPUT_SIZE / stride;
    let grid_h = SCRFD_INPUT_SIZE / stride;
    let anchors = grid_w * grid_h * SCRFD_ANCHORS_PER_CELL;
    let s = stride as f32;

    (0..anchors.min(scores.len()))
        .filter(|&i| scores[i] > threshold)
        .filter_map(|i| {
            let d = bboxes.get(i * 4..i * 4 + 4)?;
            let cell = i / SCRFD_ANCHORS_PER_CELL;
            let cx = (cell % grid_w) as f32 * s;
            let cy = (cell / grid_w) as f32 * s;
            let (x1, y1) = letterbox.to_frame(cx - d[0] * s, cy - d[1] * s);
            let (x2, y2) = letterbox.to_frame(cx + d[2] * s, cy + d[3] * s);
            Some(Candidate {
                x1,
                y1,
                x2,
                y2,
                score: scores[i],
            })
        })
        .collect()
}

/// Greedy non-maximum suppression, highest score first.
fn nms(mut candidates: Vec<Candidate>, iou_threshold: f32) -> Vec<Candidate> {
    candidates.sort_by(|a, b| b.score.total_cmp(&a.score));
    let mut kept: Vec<Candidate> = Vec::with_capacity(candidates.len());
    for c in candidates {
        if kept.iter().all(|k| k.iou(&c) <= iou_threshold) {
            kept.push(c);
        }
    }
    kept
}
