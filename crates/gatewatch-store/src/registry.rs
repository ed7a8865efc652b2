//! Coordinating service registry: schools and their cameras.
//!
//! The registry is owned by the administrative subsystem; the monitor
//! only reads it. Failing to open it at startup is the one fatal error
//! in the pipeline — nothing works without the camera list.

use crate::StoreError;
use serde::Serialize;
use std::path::Path;
use tokio_rusqlite::Connection;

const REGISTRY_SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS schools (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL,
        status TEXT NOT NULL DEFAULT 'active',
        created_at TEXT DEFAULT CURRENT_TIMESTAMP
    );

    CREATE TABLE IF NOT EXISTS cameras (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        school_id INTEGER NOT NULL REFERENCES schools(id),
        name TEXT NOT NULL,
        url TEXT,
        purpose TEXT NOT NULL DEFAULT 'classroom',
        status TEXT NOT NULL DEFAULT 'inactive',
        created_at TEXT DEFAULT CURRENT_TIMESTAMP
    );
";

/// A registered camera, as the administrative subsystem wrote it.
#[derive(Debug, Clone, Serialize)]
pub struct Camera {
    pub id: i64,
    pub school_id: i64,
    pub name: String,
    pub url: String,
    pub purpose: String,
    pub status: String,
}

/// Read access to the camera registry.
pub struct Registry {
    conn: Connection,
}

impl Registry {
    /// Open (and if needed create) the registry database.
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path).await?;
        conn.call(|conn| {
            conn.execute_batch(REGISTRY_SCHEMA)?;
            conn.busy_timeout(std::time::Duration::from_secs(5))?;
            Ok(())
        })
        .await?;

        tracing::info!(path = %path.display(), "camera registry opened");
        Ok(Self { conn })
    }

    /// Cameras the monitor polls: active, entrance or presence purpose,
    /// with a non-empty stream URL — across all schools.
    pub async fn eligible_cameras(&self) -> Result<Vec<Camera>, StoreError> {
        let cameras = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, school_id, name, url, purpose, status
                     FROM cameras
                     WHERE status = 'active'
                       AND purpose IN ('entrance', 'presence')
                       AND url IS NOT NULL
                       AND url != ''",
                )?;
                let rows = stmt
                    .query_map([], |row| {
                        Ok(Camera {
                            id: row.get(0)?,
                            school_id: row.get(1)?,
                            name: row.get(2)?,
                            url: row.get(3)?,
                            purpose: row.get(4)?,
                            status: row.get(5)?,
                        })
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;

        Ok(cameras)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn registry_with_cameras(
        rows: &[(i64, &str, &str, &str, &str)],
    ) -> (Registry, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let registry = Registry::open(&dir.path().join("registry.db")).await.unwrap();

        let rows: Vec<(i64, String, String, String, String)> = rows
            .iter()
            .map(|(s, n, u, p, st)| (*s, n.to_string(), u.to_string(), p.to_string(), st.to_string()))
            .collect();
        registry
            .conn
            .call(move |conn| {
                conn.execute("INSERT INTO schools (id, name) VALUES (1, 'Escola Um'), (2, 'Escola Dois')", [])?;
                for (school_id, name, url, purpose, status) in rows {
                    conn.execute(
                        "INSERT INTO cameras (school_id, name, url, purpose, status)
                         VALUES (?1, ?2, ?3, ?4, ?5)",
                        rusqlite::params![school_id, name, url, purpose, status],
                    )?;
                }
                Ok(())
            })
            .await
            .unwrap();

        (registry, dir)
    }

    #[tokio::test]
    async fn test_eligibility_filter() {
        let (registry, _dir) = registry_with_cameras(&[
            (1, "gate", "rtsp://cam1/stream", "entrance", "active"),
            (1, "yard", "rtsp://cam2/stream", "presence", "active"),
            (1, "classroom", "rtsp://cam3/stream", "classroom", "active"),
            (1, "disabled gate", "rtsp://cam4/stream", "entrance", "inactive"),
            (2, "unconfigured gate", "", "entrance", "active"),
        ])
        .await;

        let cameras = registry.eligible_cameras().await.unwrap();
        let names: Vec<_> = cameras.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["gate", "yard"]);
    }

    #[tokio::test]
    async fn test_empty_registry_is_no_op() {
        let (registry, _dir) = registry_with_cameras(&[]).await;
        assert!(registry.eligible_cameras().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cameras_span_schools() {
        let (registry, _dir) = registry_with_cameras(&[
            (1, "gate one", "rtsp://a/s", "entrance", "active"),
            (2, "gate two", "rtsp://b/s", "entrance", "active"),
        ])
        .await;

        let cameras = registry.eligible_cameras().await.unwrap();
        let schools: Vec<_> = cameras.iter().map(|c| c.school_id).collect();
        assert_eq!(schools, vec![1, 2]);
    }
}
