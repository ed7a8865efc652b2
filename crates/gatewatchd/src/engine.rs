//! Recognition engine thread.
//!
//! The three ort sessions live on one dedicated OS thread behind an mpsc
//! request loop; camera workers share a clone-safe [`EngineHandle`]. One
//! request runs a whole frame through detect → landmarks → align → embed
//! and returns the descriptors of every face found.

use gatewatch_core::alignment;
use gatewatch_core::detector::{DetectorError, FaceDetector};
use gatewatch_core::embedder::{EmbedderError, FaceEmbedder};
use gatewatch_core::landmarks::{FaceLandmarker, LandmarkError};
use gatewatch_core::Descriptor;
use std::path::PathBuf;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("landmark error: {0}")]
    Landmark(#[from] LandmarkError),
    #[error("embedder error: {0}")]
    Embedder(#[from] EmbedderError),
    #[error("frame decode failed: {0}")]
    Decode(String),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Locations of the three model artifacts.
pub struct ModelPaths {
    pub detector: PathBuf,
    pub landmarks: PathBuf,
    pub embedder: PathBuf,
}

/// Messages sent from camera workers to the engine thread.
enum EngineRequest {
    Analyze {
        jpeg: Vec<u8>,
        reply: oneshot::Sender<Result<Vec<Descriptor>, EngineError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    /// Extract a descriptor for every face in an encoded frame.
    pub async fn analyze(&self, jpeg: Vec<u8>) -> Result<Vec<Descriptor>, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Analyze { jpeg, reply: reply_tx })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// Loads all three models synchronously so a missing or corrupt artifact
/// surfaces here, where the caller downgrades to connectivity-only
/// monitoring instead of crashing.
pub fn spawn_engine(paths: &ModelPaths) -> Result<EngineHandle, EngineError> {
    let mut detector = FaceDetector::load(&paths.detector)?;
    let mut landmarker = FaceLandmarker::load(&paths.landmarks)?;
    let mut embedder = FaceEmbedder::load(&paths.embedder)?;

    let (tx, mut rx) = mpsc::channel::<EngineRequest>(16);

    std::thread::Builder::new()
        .name("gatewatch-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Analyze { jpeg, reply } => {
                        let result =
                            run_analyze(&mut detector, &mut landmarker, &mut embedder, &jpeg);
                        let _ = reply.send(result);
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })
        .expect("failed to spawn engine thread");

    Ok(EngineHandle { tx })
}

/// Engine double for monitor tests: answers every analyze request with
/// the same fixed descriptor set.
#[cfg(test)]
pub fn stub_engine(descriptors: Vec<Descriptor>) -> EngineHandle {
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(16);
    tokio::spawn(async move {
        while let Some(EngineRequest::Analyze { reply, .. }) = rx.recv().await {
            let _ = reply.send(Ok(descriptors.clone()));
        }
    });
    EngineHandle { tx }
}

/// Decode a frame, detect faces and extract one descriptor per face.
///
/// A face whose landmark or embedding extraction fails is skipped with a
/// warning; the remaining faces in the frame still count.
fn run_analyze(
    detector: &mut FaceDetector,
    landmarker: &mut FaceLandmarker,
    embedder: &mut FaceEmbedder,
    jpeg: &[u8],
) -> Result<Vec<Descriptor>, EngineError> {
    let frame = image::load_from_memory(jpeg)
        .map_err(|e| EngineError::Decode(e.to_string()))?
        .to_luma8();

    let faces = detector.detect(&frame)?;
    tracing::debug!(faces = faces.len(), "frame analyzed");

    let mut descriptors = Vec::with_capacity(faces.len());
    for face in &faces {
        let points = match landmarker.five_points(&frame, face) {
            Ok(points) => points,
            Err(err) => {
                tracing::warn!(error = %err, "landmark extraction failed; skipping face");
                continue;
            }
        };

        let aligned = alignment::align_face(&frame, &points);
        match embedder.embed(&aligned) {
            Ok(descriptor) => descriptors.push(descriptor),
            Err(err) => {
                tracing::warn!(error = %err, "embedding extraction failed; skipping face");
            }
        }
    }

    Ok(descriptors)
}
