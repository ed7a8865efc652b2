//! Per-school data store: roster, descriptors, attendance, outbox.
//!
//! Each school owns one database file (`school_<id>.db`). The monitor
//! appends attendance and notifications; it never mutates or deletes
//! history. "At most one attendance record per student per day" is a
//! unique index, not an application-level check — concurrent sightings
//! from different cameras race on the insert and exactly one wins.

use crate::StoreError;
use chrono::{DateTime, Local, NaiveDate};
use std::path::{Path, PathBuf};
use tokio_rusqlite::Connection;
use uuid::Uuid;

/// Schema applied on every open. `IF NOT EXISTS` throughout, so legacy
/// tenant files created before the attendance unique index pick it up.
const TENANT_SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS students (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL,
        class_name TEXT,
        guardian_phone TEXT,
        face_descriptor TEXT,
        created_at TEXT DEFAULT CURRENT_TIMESTAMP
    );

    CREATE TABLE IF NOT EXISTS face_descriptors (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        student_id INTEGER NOT NULL UNIQUE REFERENCES students(id) ON DELETE CASCADE,
        descriptor TEXT NOT NULL,
        created_at TEXT DEFAULT CURRENT_TIMESTAMP
    );

    CREATE TABLE IF NOT EXISTS attendance (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        student_id INTEGER NOT NULL REFERENCES students(id),
        day TEXT NOT NULL,
        status TEXT NOT NULL DEFAULT 'present',
        arrived_at TEXT NOT NULL
    );

    CREATE UNIQUE INDEX IF NOT EXISTS idx_attendance_student_day
        ON attendance (student_id, day);

    CREATE TABLE IF NOT EXISTS notifications (
        id TEXT PRIMARY KEY,
        student_id INTEGER NOT NULL REFERENCES students(id),
        kind TEXT NOT NULL,
        message TEXT NOT NULL,
        delivered INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL
    );
";

/// Result of recording a sighting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SightingOutcome {
    /// First sighting of this student today: attendance row written and
    /// one notification queued.
    NewlyRecorded,
    /// Attendance already exists for (student, day): nothing written.
    AlreadyRecorded,
}

/// One attendance row, joined with the student name for display.
#[derive(Debug, Clone)]
pub struct AttendanceRow {
    pub student_id: i64,
    pub student_name: String,
    pub day: String,
    pub status: String,
    pub arrived_at: String,
}

/// Handle to one school's data store.
#[derive(Debug)]
pub struct TenantStore {
    school_id: i64,
    conn: Connection,
}

impl TenantStore {
    pub fn db_path(data_dir: &Path, school_id: i64) -> PathBuf {
        data_dir.join(format!("school_{school_id}.db"))
    }

    /// Open an existing tenant database.
    ///
    /// A school whose database file does not exist has no provisioned
    /// storage yet; sightings for it are dropped by the caller, so this
    /// must not create the file as a side effect.
    pub async fn open(data_dir: &Path, school_id: i64) -> Result<Self, StoreError> {
        let path = Self::db_path(data_dir, school_id);
        if !path.exists() {
            return Err(StoreError::TenantUnavailable { school_id });
        }
        Self::open_at(&path, school_id).await
    }

    /// Create and initialize a tenant database. Used by the enrollment
    /// side of the admin tooling and by tests.
    pub async fn provision(data_dir: &Path, school_id: i64) -> Result<Self, StoreError> {
        std::fs::create_dir_all(data_dir)?;
        Self::open_at(&Self::db_path(data_dir, school_id), school_id).await
    }

    async fn open_at(path: &Path, school_id: i64) -> Result<Self, StoreError> {
        let conn = Connection::open(path).await?;
        conn.call(|conn| {
            conn.execute_batch(TENANT_SCHEMA)?;
            conn.busy_timeout(std::time::Duration::from_secs(5))?;
            Ok(())
        })
        .await?;
        Ok(Self { school_id, conn })
    }

    pub fn school_id(&self) -> i64 {
        self.school_id
    }

    /// `(student_id, name, descriptor_json)` for every student with a
    /// stored descriptor. The dedicated descriptor table wins over the
    /// legacy per-student column.
    pub async fn enrolled_descriptors(&self) -> Result<Vec<(i64, String, String)>, StoreError> {
        let rows = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT s.id, s.name, COALESCE(fd.descriptor, s.face_descriptor) AS descriptor
                     FROM students s
                     LEFT JOIN face_descriptors fd ON fd.student_id = s.id
                     WHERE fd.descriptor IS NOT NULL OR s.face_descriptor IS NOT NULL
                     ORDER BY s.id",
                )?;
                let rows = stmt
                    .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;

        Ok(rows)
    }

    /// Record that `student_id` was seen at `at`.
    ///
    /// Inserts attendance for the local calendar day unless a row already
    /// exists; on first insert, queues exactly one arrival notification in
    /// the same transaction. An insert conflict means another camera (or
    /// an earlier frame) got there first and is reported as
    /// [`SightingOutcome::AlreadyRecorded`].
    pub async fn record_sighting(
        &self,
        student_id: i64,
        student_name: &str,
        at: DateTime<Local>,
    ) -> Result<SightingOutcome, StoreError> {
        let day = at.format("%Y-%m-%d").to_string();
        let time_of_day = at.format("%H:%M:%S").to_string();
        let created_at = at.to_rfc3339();
        let message = format!("{student_name} arrived at school at {time_of_day}");

        let outcome = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;

                let inserted = tx.execute(
                    "INSERT INTO attendance (student_id, day, status, arrived_at)
                     VALUES (?1, ?2, 'present', ?3)
                     ON CONFLICT (student_id, day) DO NOTHING",
                    rusqlite::params![student_id, day, time_of_day],
                )?;

                if inserted == 0 {
                    tx.commit()?;
                    return Ok(SightingOutcome::AlreadyRecorded);
                }

                tx.execute(
                    "INSERT INTO notifications (id, student_id, kind, message, created_at)
                     VALUES (?1, ?2, 'arrival', ?3, ?4)",
                    rusqlite::params![
                        Uuid::new_v4().to_string(),
                        student_id,
                        message,
                        created_at
                    ],
                )?;

                tx.commit()?;
                Ok(SightingOutcome::NewlyRecorded)
            })
            .await?;

        Ok(outcome)
    }

    /// Attendance for one calendar day, newest arrivals last.
    pub async fn attendance_on(&self, day: NaiveDate) -> Result<Vec<AttendanceRow>, StoreError> {
        let day = day.format("%Y-%m-%d").to_string();
        let rows = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT a.student_id, s.name, a.day, a.status, a.arrived_at
                     FROM attendance a
                     JOIN students s ON s.id = a.student_id
                     WHERE a.day = ?1
                     ORDER BY a.arrived_at",
                )?;
                let rows = stmt
                    .query_map([day], |row| {
                        Ok(AttendanceRow {
                            student_id: row.get(0)?,
                            student_name: row.get(1)?,
                            day: row.get(2)?,
                            status: row.get(3)?,
                            arrived_at: row.get(4)?,
                        })
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;

        Ok(rows)
    }

    /// Undelivered notification rows, oldest first. The delivery worker
    /// (out of process) polls this and flips `delivered`.
    pub async fn pending_notifications(&self) -> Result<Vec<(String, i64, String)>, StoreError> {
        let rows = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, student_id, message FROM notifications
                     WHERE delivered = 0 ORDER BY created_at",
                )?;
                let rows = stmt
                    .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;

        Ok(rows)
    }
}
