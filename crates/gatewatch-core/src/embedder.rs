//! 128-d face embedding extraction via ONNX Runtime.
//!
//! Runs a MobileFaceNet embedder on the aligned 112×112 crop and
//! L2-normalizes the output so Euclidean distances are comparable
//! across frames and enrollments.

use crate::alignment::ALIGNED_SIZE;
use crate::types::{Descriptor, DESCRIPTOR_DIM};
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const EMBEDDER_MEAN: f32 = 127.5;
const EMBEDDER_STD: f32 = 127.5;

#[derive(Error, Debug)]
pub enum EmbedderError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

impl From<ort::Error<ort::session::builder::SessionBuilder>> for EmbedderError {
    fn from(e: ort::Error<ort::session::builder::SessionBuilder>) -> Self {
        EmbedderError::Ort(e.into())
    }
}

/// MobileFaceNet-based descriptor extractor.
pub struct FaceEmbedder {
    session: Session,
}

impl FaceEmbedder {
    /// Load the embedding ONNX model from the given path.
    pub fn load(model_path: &Path) -> Result<Self, EmbedderError> {
        if !model_path.exists() {
            return Err(EmbedderError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(path = %model_path.display(), "loaded embedding model");

        Ok(Self { session })
    }

    /// Extract a descriptor from an aligned 112×112 grayscale crop.
    pub fn embed(&mut self, aligned: &[u8]) -> Result<Descriptor, EmbedderError> {
        let input = preprocess(aligned);

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| EmbedderError::InferenceFailed(format!("embedding: {e}")))?;

        if raw.len() != DESCRIPTOR_DIM {
            return Err(EmbedderError::InferenceFailed(format!(
                "expected {DESCRIPTOR_DIM}-dim embedding, got {}",
                raw.len()
            )));
        }

        Ok(Descriptor { values: l2_normalize(raw) })
    }
}

/// Symmetric normalization of the aligned crop into a NCHW tensor,
/// gray channel replicated across RGB.
fn preprocess(aligned: &[u8]) -> Array4<f32> {
    let size = ALIGNED_SIZE;
    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));

    for y in 0..size {
        for x in 0..size {
            let pixel = aligned.get(y * size + x).copied().unwrap_or(0) as f32;
            let normalized = (pixel - EMBEDDER_MEAN) / EMBEDDER_STD;
            tensor[[0, 0, y, x]] = normalized;
            tensor[[0, 1, y, x]] = normalized;
            tensor[[0, 2, y, x]] = normalized;
        }
    }

    tensor
}

fn l2_normalize(raw: &[f32]) -> Vec<f32> {
    let norm: f32 = raw.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        raw.iter().map(|x| x / norm).collect()
    } else {
        raw.to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preprocess_shape() {
        let aligned = vec![128u8; ALIGNED_SIZE * ALIGNED_SIZE];
        let tensor = preprocess(&aligned);
        assert_eq!(tensor.shape(), &[1, 3, ALIGNED_SIZE, ALIGNED_SIZE]);
    }

    #[test]
    fn test_preprocess_symmetric_normalization() {
        // 0 → -1.0, 255 → +1.0
        let mut aligned = vec![0u8; ALIGNED_SIZE * ALIGNED_SIZE];
        aligned[1] = 255;
        let tensor = preprocess(&aligned);
        assert!((tensor[[0, 0, 0, 0]] + 1.0).abs() < 1e-6);
        assert!((tensor[[0, 0, 0, 1]] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_preprocess_short_buffer_pads_black() {
        let tensor = preprocess(&[]);
        assert!((tensor[[0, 0, 111, 111]] + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_l2_normalize() {
        let normalized = l2_normalize(&[3.0, 4.0]);
        assert!((normalized[0] - 0.6).abs() < 1e-6);
        assert!((normalized[1] - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_l2_normalize_zero_vector() {
        let normalized = l2_normalize(&[0.0, 0.0]);
        assert_eq!(normalized, vec![0.0, 0.0]);
    }
}
