//! Model bootstrap: fetch missing ONNX artifacts and start the engine.
//!
//! Runs once at startup. Any failure here — network down, disk full,
//! corrupt artifact — is reported to the caller, which keeps the daemon
//! alive in connectivity-only mode.

use crate::config::Config;
use crate::engine::{self, EngineHandle, ModelPaths};
use anyhow::{bail, Context, Result};
use std::path::Path;

const DETECTOR_MODEL_FILE: &str = "version-RFB-320.onnx";
const LANDMARK_MODEL_FILE: &str = "landmark68_mbv2.onnx";
const EMBEDDER_MODEL_FILE: &str = "mobilefacenet_128.onnx";

const DETECTOR_URLS: [&str; 2] = [
    "https://github.com/onnx/models/raw/main/validated/vision/body_analysis/ultraface/models/version-RFB-320.onnx",
    "https://huggingface.co/ykk648/face_lib/resolve/main/face_detect/version-RFB-320.onnx",
];
const LANDMARK_URLS: [&str; 2] = [
    "https://huggingface.co/ykk648/face_lib/resolve/main/face_landmark/landmark68_mbv2.onnx",
    "https://github.com/gatewatch-io/models/releases/download/v1/landmark68_mbv2.onnx",
];
const EMBEDDER_URLS: [&str; 2] = [
    "https://huggingface.co/ykk648/face_lib/resolve/main/face_embedding/mobilefacenet_128.onnx",
    "https://github.com/gatewatch-io/models/releases/download/v1/mobilefacenet_128.onnx",
];

/// A real ONNX artifact is hundreds of KB; anything smaller is an error
/// page saved to disk.
const MIN_MODEL_BYTES: usize = 64 * 1024;

/// Fetch any missing artifacts, then spawn the recognition engine.
pub async fn init_recognition(cfg: &Config) -> Result<EngineHandle> {
    let paths = ModelPaths {
        detector: cfg.model_dir.join(DETECTOR_MODEL_FILE),
        landmarks: cfg.model_dir.join(LANDMARK_MODEL_FILE),
        embedder: cfg.model_dir.join(EMBEDDER_MODEL_FILE),
    };

    if cfg.auto_download {
        ensure_models(cfg, &paths).await?;
    }

    Ok(engine::spawn_engine(&paths)?)
}

async fn ensure_models(cfg: &Config, paths: &ModelPaths) -> Result<()> {
    std::fs::create_dir_all(&cfg.model_dir)
        .with_context(|| format!("failed to create model dir {}", cfg.model_dir.display()))?;

    let client = reqwest::Client::builder()
        .build()
        .context("failed to create HTTP client")?;

    let wanted: [(&Path, &[&str]); 3] = [
        (&paths.detector, &DETECTOR_URLS),
        (&paths.landmarks, &LANDMARK_URLS),
        (&paths.embedder, &EMBEDDER_URLS),
    ];

    for (path, urls) in wanted {
        if path.exists() {
            continue;
        }
        download_with_fallback(&client, urls, path).await?;
    }

    Ok(())
}

/// Try each mirror in order; the last error wins if all fail.
async fn download_with_fallback(
    client: &reqwest::Client,
    urls: &[&str],
    path: &Path,
) -> Result<()> {
    let mut last_err = None;
    for url in urls {
        match download_file(client, url, path).await {
            Ok(()) => return Ok(()),
            Err(err) => {
                tracing::warn!(url = %url, error = %err, "model download failed; trying next mirror");
                last_err = Some(err);
            }
        }
    }

    Err(last_err.expect("at least one model URL").context(format!(
        "could not fetch model artifact {}",
        path.display()
    )))
}

async fn download_file(client: &reqwest::Client, url: &str, path: &Path) -> Result<()> {
    tracing::info!(url, "downloading model artifact");

    let response = client
        .get(url)
        .send()
        .await
        .with_context(|| format!("request to {url} failed"))?;

    if !response.status().is_success() {
        bail!("HTTP {} from {url}", response.status());
    }

    let bytes = response.bytes().await.context("failed to read response body")?;
    if bytes.len() < MIN_MODEL_BYTES {
        bail!("downloaded artifact is suspiciously small ({} bytes)", bytes.len());
    }

    std::fs::write(path, &bytes)
        .with_context(|| format!("failed to write {}", path.display()))?;

    tracing::info!(path = %path.display(), bytes = bytes.len(), "model artifact ready");
    Ok(())
}
