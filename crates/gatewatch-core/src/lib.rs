//! gatewatch-core — Face pipeline for the entrance monitor.
//!
//! Detects faces in a captured frame (UltraFace), locates 68 facial
//! landmarks, aligns each face to a canonical crop and extracts a
//! 128-dimensional descriptor, which is matched against a tenant's
//! enrolled gallery by Euclidean distance.

pub mod alignment;
pub mod detector;
pub mod embedder;
pub mod gallery;
pub mod landmarks;
pub mod types;

pub use gallery::{Gallery, Match, Matcher};
pub use types::{Descriptor, FaceBox, DEFAULT_MATCH_THRESHOLD, DESCRIPTOR_DIM};
