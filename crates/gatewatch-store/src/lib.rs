//! gatewatch-store — SQLite storage for the entrance monitor.
//!
//! Two layers: the coordinating service's own registry (schools and
//! their cameras) and one database file per school holding the roster,
//! enrolled descriptors, attendance and the notification outbox. Every
//! tenant-scoped read and write goes through a [`TenantStore`] opened
//! for exactly one school id.

pub mod registry;
pub mod tenant;

use thiserror::Error;

pub use registry::{Camera, Registry};
pub use tenant::{AttendanceRow, SightingOutcome, TenantStore};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("school {school_id} has no provisioned data store")]
    TenantUnavailable { school_id: i64 },
    #[error("database: {0}")]
    Database(#[from] tokio_rusqlite::Error),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}
