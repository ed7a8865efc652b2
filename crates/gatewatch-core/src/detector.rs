//! UltraFace face detector via ONNX Runtime.
//!
//! Runs the RFB-320 variant of the Ultra-Light-Fast face detector. The
//! model emits pre-decoded corner boxes normalized to [0, 1] plus
//! background/face scores, so post-processing is a confidence filter and
//! NMS.

use crate::types::FaceBox;
use image::imageops::{self, FilterType};
use image::GrayImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const DETECTOR_INPUT_WIDTH: u32 = 320;
const DETECTOR_INPUT_HEIGHT: u32 = 240;
const DETECTOR_MEAN: f32 = 127.0;
const DETECTOR_STD: f32 = 128.0;
const DETECTOR_CONFIDENCE_THRESHOLD: f32 = 0.7;
const DETECTOR_NMS_THRESHOLD: f32 = 0.3;
/// Scores per anchor: [background, face].
const SCORES_PER_ANCHOR: usize = 2;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

impl From<ort::Error<ort::session::builder::SessionBuilder>> for DetectorError {
    fn from(e: ort::Error<ort::session::builder::SessionBuilder>) -> Self {
        DetectorError::Ort(e.into())
    }
}

/// UltraFace-based face detector.
pub struct FaceDetector {
    session: Session,
}

impl FaceDetector {
    /// Load the UltraFace ONNX model from the given path.
    pub fn load(model_path: &Path) -> Result<Self, DetectorError> {
        if !model_path.exists() {
            return Err(DetectorError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = %model_path.display(),
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded UltraFace model"
        );

        Ok(Self { session })
    }

    /// Detect faces in a grayscale frame, returning boxes sorted by confidence.
    pub fn detect(&mut self, frame: &GrayImage) -> Result<Vec<FaceBox>, DetectorError> {
        let input = preprocess(frame);

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, scores) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| DetectorError::InferenceFailed(format!("scores: {e}")))?;
        let (_, boxes) = outputs[1]
            .try_extract_tensor::<f32>()
            .map_err(|e| DetectorError::InferenceFailed(format!("boxes: {e}")))?;

        let detections = decode(
            scores,
            boxes,
            frame.width() as f32,
            frame.height() as f32,
            DETECTOR_CONFIDENCE_THRESHOLD,
        );

        let mut result = nms(detections, DETECTOR_NMS_THRESHOLD);
        result.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        Ok(result)
    }
}

/// Resize to the 320×240 model input and normalize to the UltraFace
/// distribution, replicating the single gray channel across RGB.
fn preprocess(frame: &GrayImage) -> Array4<f32> {
    let resized = imageops::resize(
        frame,
        DETECTOR_INPUT_WIDTH,
        DETECTOR_INPUT_HEIGHT,
        FilterType::Triangle,
    );

    let (w, h) = (DETECTOR_INPUT_WIDTH as usize, DETECTOR_INPUT_HEIGHT as usize);
    let mut tensor = Array4::<f32>::zeros((1, 3, h, w));

    for (x, y, pixel) in resized.enumerate_pixels() {
        let normalized = (pixel.0[0] as f32 - DETECTOR_MEAN) / DETECTOR_STD;
        tensor[[0, 0, y as usize, x as usize]] = normalized;
        tensor[[0, 1, y as usize, x as usize]] = normalized;
        tensor[[0, 2, y as usize, x as usize]] = normalized;
    }

    tensor
}

/// Filter anchors by face score and scale normalized corners to frame
/// coordinates.
fn decode(
    scores: &[f32],
    boxes: &[f32],
    frame_w: f32,
    frame_h: f32,
    threshold: f32,
) -> Vec<FaceBox> {
    let num_anchors = scores.len() / SCORES_PER_ANCHOR;
    let mut detections = Vec::new();

    for idx in 0..num_anchors {
        let confidence = scores[idx * SCORES_PER_ANCHOR + 1];
        if confidence < threshold {
            continue;
        }

        let off = idx * 4;
        if off + 3 >= boxes.len() {
            break;
        }

        let x1 = (boxes[off] * frame_w).clamp(0.0, frame_w);
        let y1 = (boxes[off + 1] * frame_h).clamp(0.0, frame_h);
        let x2 = (boxes[off + 2] * frame_w).clamp(0.0, frame_w);
        let y2 = (boxes[off + 3] * frame_h).clamp(0.0, frame_h);
        if x2 <= x1 || y2 <= y1 {
            continue;
        }

        detections.push(FaceBox { x1, y1, x2, y2, confidence });
    }

    detections
}

/// Non-maximum suppression: drop boxes overlapping a higher-confidence one.
fn nms(mut detections: Vec<FaceBox>, iou_threshold: f32) -> Vec<FaceBox> {
    detections.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut keep: Vec<FaceBox> = Vec::new();
    for det in detections {
        if keep.iter().all(|k| iou(k, &det) <= iou_threshold) {
            keep.push(det);
        }
    }
    keep
}

fn iou(a: &FaceBox, b: &FaceBox) -> f32 {
    let x1 = a.x1.max(b.x1);
    let y1 = a.y1.max(b.y1);
    let x2 = a.x2.min(b.x2);
    let y2 = a.y2.min(b.y2);

    let inter = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let union = a.width() * a.height() + b.width() * b.height() - inter;

    if union > 0.0 {
        inter / union
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn face(x1: f32, y1: f32, x2: f32, y2: f32, conf: f32) -> FaceBox {
        FaceBox { x1, y1, x2, y2, confidence: conf }
    }

    #[test]
    fn test_preprocess_shape_and_normalization() {
        let frame = GrayImage::from_pixel(640, 480, image::Luma([127u8]));
        let tensor = preprocess(&frame);
        assert_eq!(tensor.shape(), &[1, 3, 240, 320]);
        // 127 is the model mean, so every value normalizes to 0.0.
        assert!(tensor.iter().all(|v| v.abs() < 1e-6));
    }

    #[test]
    fn test_preprocess_channels_identical() {
        let mut frame = GrayImage::from_pixel(320, 240, image::Luma([40u8]));
        frame.put_pixel(10, 10, image::Luma([200u8]));
        let tensor = preprocess(&frame);
        for y in 0..240 {
            for x in 0..320 {
                assert_eq!(tensor[[0, 0, y, x]], tensor[[0, 1, y, x]]);
                assert_eq!(tensor[[0, 1, y, x]], tensor[[0, 2, y, x]]);
            }
        }
    }

    #[test]
    fn test_decode_filters_low_confidence() {
        // Two anchors: one background-dominant, one face-dominant.
        let scores = [0.9, 0.1, 0.1, 0.9];
        let boxes = [0.0, 0.0, 0.5, 0.5, 0.25, 0.25, 0.75, 0.75];
        let dets = decode(&scores, &boxes, 320.0, 240.0, 0.7);
        assert_eq!(dets.len(), 1);
        assert_eq!(dets[0].x1, 0.25 * 320.0);
        assert_eq!(dets[0].y2, 0.75 * 240.0);
    }

    #[test]
    fn test_decode_rejects_degenerate_boxes() {
        let scores = [0.05, 0.95];
        let boxes = [0.5, 0.5, 0.5, 0.5]; // zero area
        assert!(decode(&scores, &boxes, 320.0, 240.0, 0.7).is_empty());
    }

    #[test]
    fn test_decode_clamps_to_frame() {
        let scores = [0.05, 0.95];
        let boxes = [-0.1, -0.1, 1.2, 1.2];
        let dets = decode(&scores, &boxes, 320.0, 240.0, 0.7);
        assert_eq!(dets.len(), 1);
        assert_eq!(dets[0].x1, 0.0);
        assert_eq!(dets[0].x2, 320.0);
        assert_eq!(dets[0].y2, 240.0);
    }

    #[test]
    fn test_iou_disjoint_and_identical() {
        let a = face(0.0, 0.0, 10.0, 10.0, 1.0);
        let b = face(20.0, 20.0, 30.0, 30.0, 1.0);
        assert!(iou(&a, &b).abs() < 1e-6);
        assert!((iou(&a, &a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_nms_keeps_highest_confidence() {
        let dets = vec![
            face(0.0, 0.0, 100.0, 100.0, 0.8),
            face(5.0, 5.0, 105.0, 105.0, 0.95),
            face(300.0, 300.0, 350.0, 350.0, 0.75),
        ];
        let kept = nms(dets, 0.3);
        assert_eq!(kept.len(), 2);
        assert!((kept[0].confidence - 0.95).abs() < 1e-6);
        assert!((kept[1].confidence - 0.75).abs() < 1e-6);
    }

    #[test]
    fn test_nms_empty() {
        assert!(nms(Vec::new(), 0.3).is_empty());
    }
}
