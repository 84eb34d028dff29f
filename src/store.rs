use std::path::{Path, PathBuf};

use anyhow::{Result, anyhow};
use rusqlite::{Connection, params};
use thiserror::Error;
use tracing::warn;

use crate::models::{ApplicationRecord, ApplicationStatus};

#[derive(Debug, Error)]
pub enum StoreError {
    /// A record for this posting already exists. Records are immutable, so
    /// callers treat this as "already done", never as a reason to
    /// overwrite.
    #[error("a record for posting {posting_id} already exists")]
    Duplicate { posting_id: String },

    #[error("a run is already in progress (started {started_at})")]
    RunInProgress { started_at: String },

    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
}

/// Durable record-per-posting store. The single source of truth for
/// "already applied"; one row per posting id for the lifetime of the
/// database.
pub struct TrackingStore {
    conn: Connection,
    path: PathBuf,
}

/// Per-user data directory for the database and tailored-resume artifacts.
pub fn project_data_dir() -> Result<PathBuf> {
    if let Some(proj_dirs) = directories::ProjectDirs::from("", "", "autoapply") {
        Ok(proj_dirs.data_dir().to_path_buf())
    } else {
        Ok(PathBuf::from("."))
    }
}

impl TrackingStore {
    pub fn open() -> Result<Self> {
        let path = project_data_dir()?.join("autoapply.db");
        Self::open_at(&path)
    }

    pub fn open_at(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        // Durable-by-default: a successful record() must survive a crash
        // immediately after it returns.
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |_| Ok(()))?;
        conn.pragma_update(None, "synchronous", "FULL")?;
        Ok(Self {
            conn,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    pub fn init(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS applications (
                posting_id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                company TEXT,
                status TEXT NOT NULL CHECK (status IN ('applied', 'skipped_error')),
                reason TEXT,
                keyword_matched TEXT NOT NULL,
                resume_digest TEXT,
                applied_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE INDEX IF NOT EXISTS idx_applications_status ON applications(status);

            CREATE TABLE IF NOT EXISTS run_lock (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                started_at TEXT NOT NULL
            );
            "#,
        )?;
        Ok(())
    }

    pub fn ensure_initialized(&self) -> Result<()> {
        let tables: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='applications'",
            [],
            |row| row.get(0),
        )?;
        if tables == 0 {
            return Err(anyhow!(
                "Database not initialized. Run 'autoapply init' first."
            ));
        }
        Ok(())
    }

    /// True iff an application record for this posting exists, whatever its
    /// status. Correct across process restarts.
    pub fn contains(&self, posting_id: &str) -> Result<bool, StoreError> {
        let result = self.conn.query_row(
            "SELECT 1 FROM applications WHERE posting_id = ?1",
            [posting_id],
            |_| Ok(()),
        );
        match result {
            Ok(()) => Ok(true),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Insert exactly one immutable record. A second insert for the same
    /// posting id fails with `StoreError::Duplicate`; the existing row is
    /// never touched.
    pub fn record(&self, rec: &ApplicationRecord) -> Result<(), StoreError> {
        let result = self.conn.execute(
            "INSERT INTO applications
                 (posting_id, title, company, status, reason, keyword_matched, resume_digest, applied_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                rec.posting_id,
                rec.title,
                rec.company,
                rec.status.as_str(),
                rec.reason,
                rec.keyword_matched,
                rec.resume_digest,
                rec.applied_at,
            ],
        );
        match result {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(StoreError::Duplicate {
                    posting_id: rec.posting_id.clone(),
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn all(&self, status: Option<ApplicationStatus>) -> Result<Vec<ApplicationRecord>> {
        let mut sql = String::from(
            "SELECT posting_id, title, company, status, reason, keyword_matched, resume_digest, applied_at
             FROM applications",
        );
        if status.is_some() {
            sql.push_str(" WHERE status = ?1");
        }
        sql.push_str(" ORDER BY applied_at DESC, posting_id");

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = if let Some(s) = status {
            stmt.query_map([s.as_str()], Self::row_to_record)?
        } else {
            stmt.query_map([], Self::row_to_record)?
        };

        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn row_to_record(row: &rusqlite::Row) -> rusqlite::Result<ApplicationRecord> {
        let status_raw: String = row.get(3)?;
        let status = ApplicationStatus::parse(&status_raw).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                3,
                rusqlite::types::Type::Text,
                format!("unknown status '{status_raw}'").into(),
            )
        })?;
        Ok(ApplicationRecord {
            posting_id: row.get(0)?,
            title: row.get(1)?,
            company: row.get(2)?,
            status,
            reason: row.get(4)?,
            keyword_matched: row.get(5)?,
            resume_digest: row.get(6)?,
            applied_at: row.get(7)?,
        })
    }

    /// Insert the single-row run marker. Fails if another run holds it.
    /// The returned guard deletes the marker when dropped, so the lock is
    /// released on every exit path that unwinds; only an outright crash
    /// leaves it behind (cleared with 'autoapply unlock').
    pub fn acquire_run_lock(&self) -> Result<RunLock<'_>, StoreError> {
        let started_at = chrono::Utc::now().to_rfc3339();
        let result = self.conn.execute(
            "INSERT INTO run_lock (id, started_at) VALUES (1, ?1)",
            [&started_at],
        );
        match result {
            Ok(_) => Ok(RunLock { store: self }),
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                let started_at = self
                    .conn
                    .query_row("SELECT started_at FROM run_lock WHERE id = 1", [], |row| {
                        row.get(0)
                    })
                    .unwrap_or_else(|_| "unknown".to_string());
                Err(StoreError::RunInProgress { started_at })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Clear a stale run marker left behind by a crashed run. Returns true
    /// if a marker was present.
    pub fn force_unlock(&self) -> Result<bool> {
        let deleted = self.conn.execute("DELETE FROM run_lock WHERE id = 1", [])?;
        Ok(deleted > 0)
    }
}

pub struct RunLock<'a> {
    store: &'a TrackingStore,
}

impl std::fmt::Debug for RunLock<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunLock").finish_non_exhaustive()
    }
}

impl Drop for RunLock<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.store.conn.execute("DELETE FROM run_lock WHERE id = 1", []) {
            warn!("failed to release run lock: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::reason;

    fn open_temp(dir: &tempfile::TempDir) -> TrackingStore {
        let store = TrackingStore::open_at(&dir.path().join("test.db")).unwrap();
        store.init().unwrap();
        store
    }

    fn applied_record(posting_id: &str) -> ApplicationRecord {
        ApplicationRecord {
            posting_id: posting_id.to_string(),
            title: "Data Engineer".to_string(),
            company: Some("Acme".to_string()),
            status: ApplicationStatus::Applied,
            reason: None,
            keyword_matched: "Data Engineer".to_string(),
            resume_digest: Some("deadbeef".to_string()),
            applied_at: "2026-08-07T09:00:00Z".to_string(),
        }
    }

    #[test]
    fn record_then_contains() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_temp(&dir);

        assert!(!store.contains("4001").unwrap());
        store.record(&applied_record("4001")).unwrap();
        assert!(store.contains("4001").unwrap());
    }

    #[test]
    fn duplicate_record_is_rejected_and_row_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_temp(&dir);

        store.record(&applied_record("4001")).unwrap();

        let mut second = applied_record("4001");
        second.status = ApplicationStatus::SkippedError;
        second.reason = Some(reason::SUBMISSION_REJECTED.to_string());
        let err = store.record(&second).unwrap_err();
        assert!(matches!(err, StoreError::Duplicate { ref posting_id } if posting_id == "4001"));

        let all = store.all(None).unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].status, ApplicationStatus::Applied);
    }

    #[test]
    fn contains_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.db");
        {
            let store = TrackingStore::open_at(&path).unwrap();
            store.init().unwrap();
            store.record(&applied_record("4001")).unwrap();
        }
        let reopened = TrackingStore::open_at(&path).unwrap();
        assert!(reopened.contains("4001").unwrap());
    }

    #[test]
    fn all_filters_by_status() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_temp(&dir);

        store.record(&applied_record("4001")).unwrap();
        let mut skipped = applied_record("4002");
        skipped.status = ApplicationStatus::SkippedError;
        skipped.reason = Some(reason::TAILORING_UNAVAILABLE.to_string());
        skipped.resume_digest = None;
        store.record(&skipped).unwrap();

        assert_eq!(store.all(None).unwrap().len(), 2);
        let applied = store.all(Some(ApplicationStatus::Applied)).unwrap();
        assert_eq!(applied.len(), 1);
        assert_eq!(applied[0].posting_id, "4001");
    }

    #[test]
    fn run_lock_excludes_second_acquisition() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_temp(&dir);

        let lock = store.acquire_run_lock().unwrap();
        assert!(matches!(
            store.acquire_run_lock().unwrap_err(),
            StoreError::RunInProgress { .. }
        ));

        drop(lock);
        let _relock = store.acquire_run_lock().unwrap();
    }

    #[test]
    fn force_unlock_clears_stale_marker() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_temp(&dir);

        let lock = store.acquire_run_lock().unwrap();
        std::mem::forget(lock); // simulate a crashed run

        assert!(store.force_unlock().unwrap());
        assert!(!store.force_unlock().unwrap());
        let _lock = store.acquire_run_lock().unwrap();
    }

    #[test]
    fn ensure_initialized_requires_init() {
        let dir = tempfile::tempdir().unwrap();
        let store = TrackingStore::open_at(&dir.path().join("fresh.db")).unwrap();
        assert!(store.ensure_initialized().is_err());
        store.init().unwrap();
        store.ensure_initialized().unwrap();
    }
}
