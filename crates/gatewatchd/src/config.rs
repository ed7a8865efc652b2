use std::path::PathBuf;

/// Daemon configuration, loaded from environment variables.
pub struct Config {
    /// Directory holding the registry and per-school databases.
    pub data_dir: PathBuf,
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Path to the external frame decoder binary.
    pub ffmpeg_path: PathBuf,
    /// Seconds between polling passes over the camera fleet.
    pub poll_interval_secs: u64,
    /// Hard upper bound on one frame acquisition.
    pub capture_timeout_secs: u64,
    /// Timeout for a degraded-mode reachability probe.
    pub probe_timeout_secs: u64,
    /// Euclidean distance threshold for a positive match.
    pub match_threshold: f32,
    /// Whether missing model artifacts are fetched at startup.
    pub auto_download: bool,
}

impl Config {
    /// Load configuration from `GATEWATCH_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let data_dir = std::env::var("GATEWATCH_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                std::env::var("XDG_DATA_HOME")
                    .map(PathBuf::from)
                    .unwrap_or_else(|_| {
                        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                        PathBuf::from(home).join(".local/share")
                    })
                    .join("gatewatch")
            });

        let model_dir = std::env::var("GATEWATCH_MODEL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("models"));

        Self {
            data_dir,
            model_dir,
            ffmpeg_path: std::env::var("GATEWATCH_FFMPEG")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("ffmpeg")),
            poll_interval_secs: env_u64("GATEWATCH_POLL_INTERVAL_SECS", 30),
            capture_timeout_secs: env_u64("GATEWATCH_CAPTURE_TIMEOUT_SECS", 10),
            probe_timeout_secs: env_u64("GATEWATCH_PROBE_TIMEOUT_SECS", 5),
            match_threshold: env_f32(
                "GATEWATCH_MATCH_THRESHOLD",
                gatewatch_core::DEFAULT_MATCH_THRESHOLD,
            ),
            auto_download: std::env::var("GATEWATCH_AUTO_DOWNLOAD")
                .map(|v| v != "0")
                .unwrap_or(true),
        }
    }

    /// Path to the coordinating service's own registry database.
    pub fn registry_db_path(&self) -> PathBuf {
        self.data_dir.join("registry.db")
    }
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
