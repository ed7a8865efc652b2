//! Camera monitor loop.
//!
//! Every polling pass lists the eligible cameras across all schools,
//! builds one gallery per school, and dispatches each camera to its own
//! task: grab a frame, extract descriptors, match against the school's
//! gallery, record attendance. A camera still in flight from a previous
//! pass is skipped, never double-dispatched. Without a recognition
//! engine the loop degrades to TCP reachability probes.

use crate::config::Config;
use crate::engine::EngineHandle;
use chrono::Local;
use gatewatch_capture::FrameGrabber;
use gatewatch_core::{Gallery, Matcher};
use gatewatch_store::{Camera, Registry, SightingOutcome, StoreError, TenantStore};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::MissedTickBehavior;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Health {
    Online,
    Offline,
}

pub struct Monitor {
    registry: Registry,
    data_dir: PathBuf,
    grabber: FrameGrabber,
    engine: Option<EngineHandle>,
    match_threshold: f32,
    poll_interval: Duration,
    probe_timeout: Duration,
    /// Camera ids dispatched and not yet finished.
    in_flight: Mutex<HashSet<i64>>,
    /// Last observed reachability per camera, for transition logging.
    health: Mutex<HashMap<i64, Health>>,
    /// Cameras already warned about a private stream address.
    flagged_local: Mutex<HashSet<i64>>,
}

impl Monitor {
    pub fn new(registry: Registry, cfg: &Config, engine: Option<EngineHandle>) -> Monitor {
        Monitor {
            registry,
            data_dir: cfg.data_dir.clone(),
            grabber: FrameGrabber::new(
                cfg.ffmpeg_path.clone(),
                Duration::from_secs(cfg.capture_timeout_secs),
            ),
            engine,
            match_threshold: cfg.match_threshold,
            poll_interval: Duration::from_secs(cfg.poll_interval_secs),
            probe_timeout: Duration::from_secs(cfg.probe_timeout_secs),
            in_flight: Mutex::new(HashSet::new()),
            health: Mutex::new(HashMap::new()),
            flagged_local: Mutex::new(HashSet::new()),
        }
    }

    /// Run polling passes forever. A failed pass is logged and the next
    /// one proceeds; nothing in here takes the daemon down.
    pub async fn run(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            if let Err(err) = Arc::clone(&self).tick().await {
                tracing::error!(error = %err, "polling pass failed");
            }
        }
    }

    /// One polling pass: list eligible cameras and dispatch each.
    pub async fn tick(self: Arc<Self>) -> Result<(), StoreError> {
        let cameras = self.registry.eligible_cameras().await?;
        if cameras.is_empty() {
            return Ok(());
        }
        tracing::debug!(cameras = cameras.len(), "polling pass");

        match self.engine.clone() {
            Some(engine) => self.dispatch_recognition(cameras, engine).await,
            None => self.dispatch_probes(cameras).await,
        }
        Ok(())
    }

    /// Group cameras by school, build one gallery per school for this
    /// pass, and spawn one task per camera.
    async fn dispatch_recognition(self: Arc<Self>, cameras: Vec<Camera>, engine: EngineHandle) {
        let mut by_school: BTreeMap<i64, Vec<Camera>> = BTreeMap::new();
        for cam in cameras {
            by_school.entry(cam.school_id).or_default().push(cam);
        }

        for (school_id, cams) in by_school {
            let gallery = match self.load_gallery(school_id).await {
                Ok(Some(gallery)) => Arc::new(gallery),
                Ok(None) => {
                    tracing::debug!(school_id, "no valid enrolled descriptors; skipping cameras this pass");
                    continue;
                }
                Err(err) => {
                    tracing::warn!(school_id, error = %err, "gallery unavailable; skipping cameras this pass");
                    continue;
                }
            };

            for cam in cams {
                if !self.claim(cam.id).await {
                    tracing::debug!(camera_id = cam.id, "previous cycle still in flight; skipping");
                    continue;
                }
                self.flag_local_address(&cam).await;

                let monitor = Arc::clone(&self);
                let engine = engine.clone();
                let gallery = Arc::clone(&gallery);
                tokio::spawn(async move {
                    monitor.process_camera(&cam, &engine, &gallery).await;
                    monitor.release(cam.id).await;
                });
            }
        }
    }

    /// Degraded mode: no recognition engine, reachability probes only.
    async fn dispatch_probes(self: Arc<Self>, cameras: Vec<Camera>) {
        for cam in cameras {
            if !self.claim(cam.id).await {
                continue;
            }
            self.flag_local_address(&cam).await;

            let monitor = Arc::clone(&self);
            tokio::spawn(async move {
                let health = if probe_reachable(&cam.url, monitor.probe_timeout).await {
                    Health::Online
                } else {
                    Health::Offline
                };
                monitor.note_health(&cam, health).await;
                monitor.release(cam.id).await;
            });
        }
    }

    async fn load_gallery(&self, school_id: i64) -> Result<Option<Gallery>, StoreError> {
        let store = TenantStore::open(&self.data_dir, school_id).await?;
        let rows = store.enrolled_descriptors().await?;
        let gallery = Gallery::build(rows);
        Ok(if gallery.is_empty() { None } else { Some(gallery) })
    }

    /// Full pipeline for one camera: acquire → analyze → match → record.
    async fn process_camera(&self, cam: &Camera, engine: &EngineHandle, gallery: &Gallery) {
        let Some(jpeg) = self.grabber.grab(&cam.url).await else {
            self.note_health(cam, Health::Offline).await;
            return;
        };
        self.note_health(cam, Health::Online).await;

        let descriptors = match engine.analyze(jpeg).await {
            Ok(descriptors) => descriptors,
            Err(err) => {
                tracing::warn!(camera_id = cam.id, error = %err, "frame analysis failed");
                return;
            }
        };
        if descriptors.is_empty() {
            // Nobody at the gate. The common case.
            return;
        }

        let store = match TenantStore::open(&self.data_dir, cam.school_id).await {
            Ok(store) => store,
            Err(err) => {
                tracing::warn!(school_id = cam.school_id, error = %err, "dropping sighting; tenant store unreachable");
                return;
            }
        };

        let now = Local::now();
        for probe in &descriptors {
            let Some(matched) = gallery.identify(probe, self.match_threshold) else {
                continue;
            };

            match store.record_sighting(matched.student_id, &matched.name, now).await {
                Ok(SightingOutcome::NewlyRecorded) => {
                    tracing::info!(
                        school_id = cam.school_id,
                        student_id = matched.student_id,
                        name = %matched.name,
                        distance = matched.distance,
                        "attendance recorded"
                    );
                }
                Ok(SightingOutcome::AlreadyRecorded) => {
                    tracing::debug!(student_id = matched.student_id, "attendance already recorded today");
                }
                Err(err) => {
                    tracing::warn!(student_id = matched.student_id, error = %err, "dropping sighting; attendance write failed");
                }
            }
        }
    }

    /// Claim a camera for this pass. False if a previous cycle still runs.
    async fn claim(&self, camera_id: i64) -> bool {
        self.in_flight.lock().await.insert(camera_id)
    }

    async fn release(&self, camera_id: i64) {
        self.in_flight.lock().await.remove(&camera_id);
    }

    #[cfg(test)]
    async fn in_flight_count(&self) -> usize {
        self.in_flight.lock().await.len()
    }

    async fn note_health(&self, cam: &Camera, health: Health) {
        let prev = self.health.lock().await.insert(cam.id, health);
        if prev == Some(health) {
            return;
        }
        match health {
            Health::Online => {
                tracing::info!(camera_id = cam.id, name = %cam.name, "camera online");
            }
            Health::Offline => {
                tracing::warn!(camera_id = cam.id, name = %cam.name, "camera unreachable");
            }
        }
    }

    /// Warn once per camera whose stream address is private or loopback;
    /// a cloud-hosted coordinator will never reach it.
    async fn flag_local_address(&self, cam: &Camera) {
        let Some((host, _)) = stream_endpoint(&cam.url) else {
            return;
        };
        if !is_private_address(&host) {
            return;
        }
        if self.flagged_local.lock().await.insert(cam.id) {
            tracing::warn!(
                camera_id = cam.id,
                name = %cam.name,
                host = %host,
                "camera has a private stream address; configure DDNS or a public address if this coordinator runs off-site"
            );
        }
    }
}

/// TCP connect probe: can we reach the camera's host and port at all?
async fn probe_reachable(url: &str, timeout: Duration) -> bool {
    let Some((host, port)) = stream_endpoint(url) else {
        return false;
    };
    matches!(
        tokio::time::timeout(timeout, tokio::net::TcpStream::connect((host.as_str(), port))).await,
        Ok(Ok(_))
    )
}

/// Extract (host, port) from a stream URL, defaulting the port by scheme.
fn stream_endpoint(url: &str) -> Option<(String, u16)> {
    let (scheme, rest) = url.split_once("://")?;
    let authority = rest.split(['/', '?']).next()?;
    let host_port = authority.rsplit_once('@').map(|(_, h)| h).unwrap_or(authority);

    let (host, port) = match host_port.rsplit_once(':') {
        Some((host, port)) => (host, port.parse().ok()?),
        None => (host_port, default_port(scheme)?),
    };

    if host.is_empty() {
        return None;
    }
    Some((host.to_string(), port))
}

fn default_port(scheme: &str) -> Option<u16> {
    match scheme {
        "rtsp" => Some(554),
        "http" => Some(80),
        "https" => Some(443),
        _ => None,
    }
}

fn is_private_address(host: &str) -> bool {
    host == "localhost"
        || host.starts_with("127.")
        || host.starts_with("192.168.")
        || host.starts_with("10.")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::stub_engine;
    use gatewatch_core::{Descriptor, DESCRIPTOR_DIM};
    use std::os::unix::fs::PermissionsExt;

    fn test_config(dir: &std::path::Path, decoder: &std::path::Path) -> Config {
        Config {
            data_dir: dir.to_path_buf(),
            model_dir: dir.join("models"),
            ffmpeg_path: decoder.to_path_buf(),
            poll_interval_secs: 30,
            capture_timeout_secs: 2,
            probe_timeout_secs: 1,
            match_threshold: 0.6,
            auto_download: false,
        }
    }

    fn stub_decoder(dir: &std::path::Path) -> std::path::PathBuf {
        let path = dir.join("decoder.sh");
        std::fs::write(&path, "#!/bin/sh\nprintf 'JPEGDATA'\n").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    /// The admin subsystem owns the registry tables; tests play that role
    /// through a second connection onto the same file.
    fn seed_camera(data_dir: &std::path::Path, camera_id: i64, school_id: i64, url: &str) {
        let conn = rusqlite::Connection::open(data_dir.join("registry.db")).unwrap();
        conn.execute(
            "INSERT OR IGNORE INTO schools (id, name) VALUES (?1, 'Test School')",
            rusqlite::params![school_id],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO cameras (id, school_id, name, url, purpose, status)
             VALUES (?1, ?2, 'front gate', ?3, 'entrance', 'active')",
            rusqlite::params![camera_id, school_id, url],
        )
        .unwrap();
    }

    fn enroll_student(
        data_dir: &std::path::Path,
        school_id: i64,
        student_id: i64,
        name: &str,
        descriptor: &[f32],
    ) {
        let conn = rusqlite::Connection::open(
            data_dir.join(format!("school_{school_id}.db")),
        )
        .unwrap();
        conn.execute(
            "INSERT INTO students (id, name) VALUES (?1, ?2)",
            rusqlite::params![student_id, name],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO face_descriptors (student_id, descriptor) VALUES (?1, ?2)",
            rusqlite::params![student_id, serde_json::to_string(descriptor).unwrap()],
        )
        .unwrap();
    }

    async fn wait_for_idle(monitor: &Arc<Monitor>) {
        for _ in 0..100 {
            if monitor.in_flight_count().await == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("dispatched camera tasks did not finish");
    }

    #[test]
    fn test_stream_endpoint_rtsp_default_port() {
        assert_eq!(
            stream_endpoint("rtsp://gate.school.example/stream1"),
            Some(("gate.school.example".into(), 554))
        );
    }

    #[test]
    fn test_stream_endpoint_explicit_port_and_credentials() {
        assert_eq!(
            stream_endpoint("rtsp://admin:pw@10.0.0.8:8554/h264"),
            Some(("10.0.0.8".into(), 8554))
        );
    }

    #[test]
    fn test_stream_endpoint_http_schemes() {
        assert_eq!(stream_endpoint("http://cam/mjpeg"), Some(("cam".into(), 80)));
        assert_eq!(stream_endpoint("https://cam/mjpeg"), Some(("cam".into(), 443)));
    }

    #[test]
    fn test_stream_endpoint_rejects_garbage() {
        assert_eq!(stream_endpoint("not a url"), None);
        assert_eq!(stream_endpoint("ftp://cam/stream"), None);
        assert_eq!(stream_endpoint("rtsp://:554/stream"), None);
    }

    #[test]
    fn test_is_private_address() {
        assert!(is_private_address("192.168.1.20"));
        assert!(is_private_address("10.4.0.9"));
        assert!(is_private_address("localhost"));
        assert!(is_private_address("127.0.0.1"));
        assert!(!is_private_address("school-gate.example.com"));
        assert!(!is_private_address("177.44.12.8"));
    }

    #[tokio::test]
    async fn test_claim_excludes_in_flight_camera() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Registry::open(&dir.path().join("registry.db")).await.unwrap();
        let cfg = test_config(dir.path(), &stub_decoder(dir.path()));
        let monitor = Arc::new(Monitor::new(registry, &cfg, None));

        assert!(monitor.claim(7).await);
        assert!(!monitor.claim(7).await, "in-flight camera must not be re-dispatched");
        monitor.release(7).await;
        assert!(monitor.claim(7).await);
    }

    #[tokio::test]
    async fn test_tick_with_no_cameras_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Registry::open(&dir.path().join("registry.db")).await.unwrap();
        let cfg = test_config(dir.path(), &stub_decoder(dir.path()));
        let monitor = Arc::new(Monitor::new(registry, &cfg, None));

        Arc::clone(&monitor).tick().await.unwrap();
        assert_eq!(monitor.in_flight_count().await, 0);
    }

    #[tokio::test]
    async fn test_degraded_tick_probes_without_recording() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Registry::open(&dir.path().join("registry.db")).await.unwrap();
        // Port 9 (discard) is not listening; the probe comes back offline.
        seed_camera(dir.path(), 1, 1, "rtsp://127.0.0.1:9/stream");

        let cfg = test_config(dir.path(), &stub_decoder(dir.path()));
        let monitor = Arc::new(Monitor::new(registry, &cfg, None));

        Arc::clone(&monitor).tick().await.unwrap();
        wait_for_idle(&monitor).await;

        // Connectivity-only: no tenant store touched, no attendance written.
        assert!(!dir.path().join("school_1.db").exists());
    }

    #[tokio::test]
    async fn test_recognition_tick_records_attendance_once() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Registry::open(&dir.path().join("registry.db")).await.unwrap();
        seed_camera(dir.path(), 1, 1, "rtsp://gate.example/stream");

        TenantStore::provision(dir.path(), 1).await.unwrap();
        let mut descriptor = vec![0.0f32; DESCRIPTOR_DIM];
        descriptor[0] = 0.25;
        enroll_student(dir.path(), 1, 10, "Ana", &descriptor);

        let cfg = test_config(dir.path(), &stub_decoder(dir.path()));
        let engine = stub_engine(vec![Descriptor { values: descriptor }]);
        let monitor = Arc::new(Monitor::new(registry, &cfg, Some(engine)));

        Arc::clone(&monitor).tick().await.unwrap();
        wait_for_idle(&monitor).await;

        let store = TenantStore::open(dir.path(), 1).await.unwrap();
        let today = Local::now().date_naive();
        let rows = store.attendance_on(today).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].student_id, 10);
        assert_eq!(store.pending_notifications().await.unwrap().len(), 1);

        // A later pass sees the same face again: nothing new is written.
        Arc::clone(&monitor).tick().await.unwrap();
        wait_for_idle(&monitor).await;
        assert_eq!(store.attendance_on(today).await.unwrap().len(), 1);
        assert_eq!(store.pending_notifications().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unmatched_face_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Registry::open(&dir.path().join("registry.db")).await.unwrap();
        seed_camera(dir.path(), 1, 1, "rtsp://gate.example/stream");

        TenantStore::provision(dir.path(), 1).await.unwrap();
        enroll_student(dir.path(), 1, 10, "Ana", &vec![0.0f32; DESCRIPTOR_DIM]);

        // A stranger: far beyond the match threshold from every enrollment.
        let mut stranger = vec![0.0f32; DESCRIPTOR_DIM];
        stranger[0] = 5.0;

        let cfg = test_config(dir.path(), &stub_decoder(dir.path()));
        let engine = stub_engine(vec![Descriptor { values: stranger }]);
        let monitor = Arc::new(Monitor::new(registry, &cfg, Some(engine)));

        Arc::clone(&monitor).tick().await.unwrap();
        wait_for_idle(&monitor).await;

        let store = TenantStore::open(dir.path(), 1).await.unwrap();
        assert!(store.attendance_on(Local::now().date_naive()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unprovisioned_tenant_skipped_without_error() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Registry::open(&dir.path().join("registry.db")).await.unwrap();
        seed_camera(dir.path(), 1, 2, "rtsp://gate.example/stream");

        let cfg = test_config(dir.path(), &stub_decoder(dir.path()));
        let engine = stub_engine(Vec::new());
        let monitor = Arc::new(Monitor::new(registry, &cfg, Some(engine)));

        Arc::clone(&monitor).tick().await.unwrap();
        wait_for_idle(&monitor).await;

        // The sighting path never ran and nothing provisioned school 2.
        assert!(!dir.path().join("school_2.db").exists());
    }
}
