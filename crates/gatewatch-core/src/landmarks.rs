//! 68-point facial landmark localization via ONNX Runtime.
//!
//! Runs a MobileNet landmark regressor on an expanded square crop of a
//! detected face. The 68-point output (ibug layout) is reduced to the
//! five points the aligner needs: eye centers, nose tip, mouth corners.

use crate::types::FaceBox;
use image::imageops::{self, FilterType};
use image::GrayImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::ops::Range;
use std::path::Path;
use thiserror::Error;

const LANDMARK_INPUT_SIZE: u32 = 112;
const LANDMARK_POINTS: usize = 68;
/// Detector boxes hug the face tightly; the landmark model was trained on
/// looser crops, so the box is expanded before cropping.
const CROP_EXPANSION: f32 = 1.25;

// Five-point reduction over the ibug 68-point layout.
const LEFT_EYE: Range<usize> = 36..42;
const RIGHT_EYE: Range<usize> = 42..48;
const NOSE_TIP: usize = 30;
const MOUTH_LEFT: usize = 48;
const MOUTH_RIGHT: usize = 54;

#[derive(Error, Debug)]
pub enum LandmarkError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

impl From<ort::Error<ort::session::builder::SessionBuilder>> for LandmarkError {
    fn from(e: ort::Error<ort::session::builder::SessionBuilder>) -> Self {
        LandmarkError::Ort(e.into())
    }
}

/// Five alignment points in frame coordinates:
/// [left_eye, right_eye, nose, left_mouth, right_mouth].
pub type FivePoints = [(f32, f32); 5];

/// MobileNet 68-point landmark regressor.
pub struct FaceLandmarker {
    session: Session,
}

impl FaceLandmarker {
    /// Load the landmark ONNX model from the given path.
    pub fn load(model_path: &Path) -> Result<Self, LandmarkError> {
        if !model_path.exists() {
            return Err(LandmarkError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = %model_path.display(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded landmark model"
        );

        Ok(Self { session })
    }

    /// Locate the five alignment points for a detected face.
    pub fn five_points(
        &mut self,
        frame: &GrayImage,
        face: &FaceBox,
    ) -> Result<FivePoints, LandmarkError> {
        let crop = CropRect::around(face, frame.width(), frame.height());
        let cropped = imageops::crop_imm(frame, crop.x, crop.y, crop.side, crop.side).to_image();
        let resized = imageops::resize(
            &cropped,
            LANDMARK_INPUT_SIZE,
            LANDMARK_INPUT_SIZE,
            FilterType::Triangle,
        );

        let input = preprocess(&resized);
        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| LandmarkError::InferenceFailed(format!("landmarks: {e}")))?;

        if raw.len() < LANDMARK_POINTS * 2 {
            return Err(LandmarkError::InferenceFailed(format!(
                "expected {} landmark coordinates, got {}",
                LANDMARK_POINTS * 2,
                raw.len()
            )));
        }

        // Normalized crop-space coordinates → frame coordinates.
        let points: Vec<(f32, f32)> = raw[..LANDMARK_POINTS * 2]
            .chunks_exact(2)
            .map(|xy| {
                (
                    crop.x as f32 + xy[0] * crop.side as f32,
                    crop.y as f32 + xy[1] * crop.side as f32,
                )
            })
            .collect();

        Ok(reduce_to_five(&points))
    }
}

/// Square crop region, clamped to frame bounds.
struct CropRect {
    x: u32,
    y: u32,
    side: u32,
}

impl CropRect {
    fn around(face: &FaceBox, frame_w: u32, frame_h: u32) -> CropRect {
        let (cx, cy) = face.center();
        let side = (face.width().max(face.height()) * CROP_EXPANSION)
            .min(frame_w.min(frame_h) as f32)
            .max(1.0);

        let half = side / 2.0;
        let x = (cx - half).clamp(0.0, frame_w as f32 - side);
        let y = (cy - half).clamp(0.0, frame_h as f32 - side);

        CropRect {
            x: x as u32,
            y: y as u32,
            side: side as u32,
        }
    }
}

/// Normalize a 112×112 gray crop into a [0, 1] NCHW tensor.
fn preprocess(crop: &GrayImage) -> Array4<f32> {
    let size = LANDMARK_INPUT_SIZE as usize;
    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));

    for (x, y, pixel) in crop.enumerate_pixels() {
        let normalized = pixel.0[0] as f32 / 255.0;
        tensor[[0, 0, y as usize, x as usize]] = normalized;
        tensor[[0, 1, y as usize, x as usize]] = normalized;
        tensor[[0, 2, y as usize, x as usize]] = normalized;
    }

    tensor
}

/// Reduce the 68-point layout to the five alignment points. Eye centers
/// are the mean of the six points outlining each eye.
fn reduce_to_five(points: &[(f32, f32)]) -> FivePoints {
    let mean = |range: Range<usize>| -> (f32, f32) {
        let n = range.len() as f32;
        let (sx, sy) = points[range]
            .iter()
            .fold((0.0, 0.0), |(ax, ay), (x, y)| (ax + x, ay + y));
        (sx / n, sy / n)
    };

    [
        mean(LEFT_EYE),
        mean(RIGHT_EYE),
        points[NOSE_TIP],
        points[MOUTH_LEFT],
        points[MOUTH_RIGHT],
    ]
}
