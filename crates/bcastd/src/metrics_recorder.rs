//! Optional SQLite-backed metrics recorder. The sync pipeline never depends
//! on this for correctness — when no database path is configured a
//! `NullMetricsRecorder` is used and every call is a no-op.

use std::path::Path;

use bcast_core::types::GroupStatus;
use bcast_core::Results;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("sqlite error: {source}")]
    Sql {
        #[from]
        source: rusqlite::Error,
    },
}

#[derive(Debug, Clone)]
pub struct SyncRunRecord {
    pub external_id: String,
    pub config_id: String,
    pub config_name: String,
    pub trigger: String,
    pub started_at: DateTime<Utc>,
    pub dry_run: bool,
}

#[derive(Debug, Clone)]
pub struct TargetResultRecord {
    pub group_id: String,
    pub repo: String,
    pub status: String,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct FileChangeRecord {
    pub path: String,
    pub is_new: bool,
    pub content_len: usize,
}

/// Five record methods plus three lookup helpers, per §6.
pub trait MetricsRecorder: Send + Sync {
    fn record_run(&self, run: &SyncRunRecord) -> Result<i64, MetricsError>;
    fn finish_run(&self, run_id: i64, ended_at: DateTime<Utc>, results: &Results) -> Result<(), MetricsError>;
    fn record_group_status(&self, run_id: i64, group_id: &str, status: &GroupStatus) -> Result<(), MetricsError>;
    fn record_target_result(&self, run_id: i64, result: &TargetResultRecord) -> Result<i64, MetricsError>;
    fn record_file_change(&self, target_result_id: i64, change: &FileChangeRecord) -> Result<(), MetricsError>;

    fn resolve_group_id(&self, run_id: i64, group_id: &str) -> Result<Option<i64>, MetricsError>;
    fn resolve_repo_id(&self, repo: &str) -> Result<Option<i64>, MetricsError>;
    fn resolve_target_id(&self, run_id: i64, repo: &str) -> Result<Option<i64>, MetricsError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NullMetricsRecorder;

impl MetricsRecorder for NullMetricsRecorder {
    fn record_run(&self, _run: &SyncRunRecord) -> Result<i64, MetricsError> {
        Ok(0)
    }
    fn finish_run(&self, _run_id: i64, _ended_at: DateTime<Utc>, _results: &Results) -> Result<(), MetricsError> {
        Ok(())
    }
    fn record_group_status(&self, _run_id: i64, _group_id: &str, _status: &GroupStatus) -> Result<(), MetricsError> {
        Ok(())
    }
    fn record_target_result(&self, _run_id: i64, _result: &TargetResultRecord) -> Result<i64, MetricsError> {
        Ok(0)
    }
    fn record_file_change(&self, _target_result_id: i64, _change: &FileChangeRecord) -> Result<(), MetricsError> {
        Ok(())
    }
    fn resolve_group_id(&self, _run_id: i64, _group_id: &str) -> Result<Option<i64>, MetricsError> {
        Ok(None)
    }
    fn resolve_repo_id(&self, _repo: &str) -> Result<Option<i64>, MetricsError> {
        Ok(None)
    }
    fn resolve_target_id(&self, _run_id: i64, _repo: &str) -> Result<Option<i64>, MetricsError> {
        Ok(None)
    }
}

#[derive(Debug)]
pub struct SqliteMetricsRecorder {
    conn: Connection,
}

impl SqliteMetricsRecorder {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, MetricsError> {
        let conn = Connection::open(path)?;
        let recorder = Self { conn };
        recorder.migrate()?;
        Ok(recorder)
    }

    pub fn open_in_memory() -> Result<Self, MetricsError> {
        let conn = Connection::open_in_memory()?;
        let recorder = Self { conn };
        recorder.migrate()?;
        Ok(recorder)
    }

    fn migrate(&self) -> Result<(), MetricsError> {
        self.conn.execute_batch(
            r#"
CREATE TABLE IF NOT EXISTS sync_runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    external_id TEXT NOT NULL UNIQUE,
    config_id TEXT NOT NULL,
    config_name TEXT NOT NULL,
    trigger TEXT NOT NULL,
    started_at TEXT NOT NULL,
    ended_at TEXT,
    dry_run INTEGER NOT NULL,
    successful INTEGER,
    failed INTEGER,
    skipped INTEGER
);

CREATE TABLE IF NOT EXISTS group_statuses (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id INTEGER NOT NULL REFERENCES sync_runs(id),
    group_id TEXT NOT NULL,
    state TEXT NOT NULL,
    started_at TEXT,
    ended_at TEXT,
    error TEXT,
    message TEXT
);

CREATE TABLE IF NOT EXISTS target_results (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id INTEGER NOT NULL REFERENCES sync_runs(id),
    group_id TEXT NOT NULL,
    repo TEXT NOT NULL,
    status TEXT NOT NULL,
    error TEXT,
    started_at TEXT NOT NULL,
    ended_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_target_results_run ON target_results(run_id);
CREATE INDEX IF NOT EXISTS idx_target_results_repo ON target_results(repo);

CREATE TABLE IF NOT EXISTS file_changes (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    target_result_id INTEGER NOT NULL REFERENCES target_results(id),
    path TEXT NOT NULL,
    is_new INTEGER NOT NULL,
    content_len INTEGER NOT NULL
);
"#,
        )?;
        Ok(())
    }
}

impl MetricsRecorder for SqliteMetricsRecorder {
    fn record_run(&self, run: &SyncRunRecord) -> Result<i64, MetricsError> {
        self.conn.execute(
            "INSERT INTO sync_runs (external_id, config_id, config_name, trigger, started_at, dry_run)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                run.external_id,
                run.config_id,
                run.config_name,
                run.trigger,
                run.started_at.to_rfc3339(),
                run.dry_run as i64,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn finish_run(&self, run_id: i64, ended_at: DateTime<Utc>, results: &Results) -> Result<(), MetricsError> {
        self.conn.execute(
            "UPDATE sync_runs SET ended_at = ?1, successful = ?2, failed = ?3, skipped = ?4 WHERE id = ?5",
            params![
                ended_at.to_rfc3339(),
                results.successful as i64,
                results.failed as i64,
                results.skipped as i64,
                run_id,
            ],
        )?;
        Ok(())
    }

    fn record_group_status(&self, run_id: i64, group_id: &str, status: &GroupStatus) -> Result<(), MetricsError> {
        self.conn.execute(
            "INSERT INTO group_statuses (run_id, group_id, state, started_at, ended_at, error, message)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                run_id,
                group_id,
                format!("{:?}", status.state),
                status.started_at.map(|t| t.to_rfc3339()),
                status.ended_at.map(|t| t.to_rfc3339()),
                status.error,
                status.message,
            ],
        )?;
        Ok(())
    }

    fn record_target_result(&self, run_id: i64, result: &TargetResultRecord) -> Result<i64, MetricsError> {
        self.conn.execute(
            "INSERT INTO target_results (run_id, group_id, repo, status, error, started_at, ended_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                run_id,
                result.group_id,
                result.repo,
                result.status,
                result.error,
                result.started_at.to_rfc3339(),
                result.ended_at.to_rfc3339(),
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn record_file_change(&self, target_result_id: i64, change: &FileChangeRecord) -> Result<(), MetricsError> {
        self.conn.execute(
            "INSERT INTO file_changes (target_result_id, path, is_new, content_len) VALUES (?1, ?2, ?3, ?4)",
            params![target_result_id, change.path, change.is_new as i64, change.content_len as i64],
        )?;
        Ok(())
    }

    fn resolve_group_id(&self, run_id: i64, group_id: &str) -> Result<Option<i64>, MetricsError> {
        Ok(self
            .conn
            .query_row(
                "SELECT id FROM group_statuses WHERE run_id = ?1 AND group_id = ?2 ORDER BY id DESC LIMIT 1",
                params![run_id, group_id],
                |row| row.get(0),
            )
            .optional()?)
    }

    fn resolve_repo_id(&self, repo: &str) -> Result<Option<i64>, MetricsError> {
        Ok(self
            .conn
            .query_row(
                "SELECT id FROM target_results WHERE repo = ?1 ORDER BY id DESC LIMIT 1",
                params![repo],
                |row| row.get(0),
            )
            .optional()?)
    }

    fn resolve_target_id(&self, run_id: i64, repo: &str) -> Result<Option<i64>, MetricsError> {
        Ok(self
            .conn
            .query_row(
                "SELECT id FROM target_results WHERE run_id = ?1 AND repo = ?2 ORDER BY id DESC LIMIT 1",
                params![run_id, repo],
                |row| row.get(0),
            )
            .optional()?)
    }
}
