use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Dimensionality of enrolled face descriptors. Enrollment stores
/// 128-dimensional vectors; anything else in the database is legacy
/// garbage and is skipped during gallery construction.
pub const DESCRIPTOR_DIM: usize = 128;

/// Calibrated Euclidean-distance threshold for the 128-d embedding model.
/// A probe at exactly this distance from a gallery entry is a match.
pub const DEFAULT_MATCH_THRESHOLD: f32 = 0.6;

#[derive(Error, Debug)]
pub enum DescriptorError {
    #[error("descriptor is not a JSON number array: {0}")]
    Unparseable(#[from] serde_json::Error),
    #[error("descriptor has {actual} dimensions, expected {expected}")]
    WrongLength { expected: usize, actual: usize },
}

/// A 128-dimensional face descriptor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Descriptor {
    pub values: Vec<f32>,
}

impl Descriptor {
    /// Parse a descriptor from its stored JSON-text form, validating the
    /// dimensionality against [`DESCRIPTOR_DIM`].
    pub fn from_json(text: &str) -> Result<Self, DescriptorError> {
        let values: Vec<f32> = serde_json::from_str(text)?;
        if values.len() != DESCRIPTOR_DIM {
            return Err(DescriptorError::WrongLength {
                expected: DESCRIPTOR_DIM,
                actual: values.len(),
            });
        }
        Ok(Self { values })
    }

    /// Euclidean distance to another descriptor.
    pub fn distance(&self, other: &Descriptor) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

/// Axis-aligned bounding box for a detected face, in frame coordinates.
#[derive(Debug, Clone)]
pub struct FaceBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub confidence: f32,
}

impl FaceBox {
    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }

    pub fn center(&self) -> (f32, f32) {
        ((self.x1 + self.x2) / 2.0, (self.y1 + self.y2) / 2.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_distance_identical() {
        let a = Descriptor { values: vec![0.5; DESCRIPTOR_DIM] };
        assert_eq!(a.distance(&a), 0.0);
    }

    #[test]
    fn test_distance_unit_apart() {
        let a = Descriptor { values: vec![0.0, 0.0] };
        let b = Descriptor { values: vec![3.0, 4.0] };
        assert!((a.distance(&b) - 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_from_json_valid() {
        let text = serde_json::to_string(&vec![0.25f32; DESCRIPTOR_DIM]).unwrap();
        let d = Descriptor::from_json(&text).unwrap();
        assert_eq!(d.values.len(), DESCRIPTOR_DIM);
        assert_eq!(d.values[0], 0.25);
    }

    #[test]
    fn test_from_json_wrong_length() {
        let text = serde_json::to_string(&vec![0.1f32; 64]).unwrap();
        match Descriptor::from_json(&text) {
            Err(DescriptorError::WrongLength { expected, actual }) => {
                assert_eq!(expected, DESCRIPTOR_DIM);
                assert_eq!(actual, 64);
            }
            other => panic!("expected WrongLength, got {other:?}"),
        }
    }

    #[test]
    fn test_from_json_not_an_array() {
        assert!(matches!(
            Descriptor::from_json("\"corrupted\""),
            Err(DescriptorError::Unparseable(_))
        ));
    }

    #[test]
    fn test_face_box_geometry() {
        let b = FaceBox { x1: 10.0, y1: 20.0, x2: 40.0, y2: 80.0, confidence: 0.9 };
        assert_eq!(b.width(), 30.0);
        assert_eq!(b.height(), 60.0);
        assert_eq!(b.center(), (25.0, 50.0));
    }
}
