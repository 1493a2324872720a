//! Durable store for generation records and aggregate analytics.
//!
//! SQLite-backed. One `contracts` row per successful pipeline run, written
//! once and never mutated; one single-row `analytics` table incremented
//! atomically on both the success and failure paths, so concurrent sessions
//! never lose an update.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};

/// Counts of generated files by path-prefix classification.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMetrics {
    pub total_files: u32,
    pub source_files: u32,
    pub test_files: u32,
    pub other_files: u32,
}

/// One generated file as persisted: content plus its own path, mirroring the
/// shape clients read back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    pub content: String,
    pub path: String,
}

/// The persisted result of one successful pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRecord {
    pub record_id: String,
    pub project_name: String,
    pub prompt: String,
    pub files: BTreeMap<String, FileEntry>,
    pub file_metrics: FileMetrics,
    pub timestamp: DateTime<Utc>,
    pub status: String,
}

/// Snapshot of the aggregate counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Analytics {
    pub total_contracts: i64,
    pub total_files_generated: i64,
    pub total_source_files: i64,
    pub total_test_files: i64,
    pub total_other_files: i64,
    pub failed_generations: i64,
    pub last_error: Option<String>,
    pub last_error_timestamp: Option<String>,
    pub last_generated: Option<String>,
}

/// Async-safe handle to the contract store.
///
/// Wraps `ContractStore` behind `Arc<Mutex>` and runs all access on tokio's
/// blocking thread pool, keeping synchronous SQLite I/O off async workers.
#[derive(Clone)]
pub struct StoreHandle {
    inner: Arc<std::sync::Mutex<ContractStore>>,
}

impl StoreHandle {
    pub fn new(store: ContractStore) -> Self {
        Self {
            inner: Arc::new(std::sync::Mutex::new(store)),
        }
    }

    /// Run a closure with access to the store on a blocking thread.
    /// All data passed into `f` must be owned (`'static`).
    pub async fn call<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&ContractStore) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let store = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let guard = store
                .lock()
                .map_err(|e| anyhow::anyhow!("Store lock poisoned: {}", e))?;
            f(&guard)
        })
        .await
        .context("Store task panicked")?
    }

    /// Persist a record and bump the success counters.
    pub async fn save_record(&self, record: GenerationRecord) -> Result<()> {
        self.call(move |store| store.save_record(&record)).await
    }

    /// Record a failed run: bump the failure tally and stamp the error.
    pub async fn record_failure(&self, error: String, at: DateTime<Utc>) -> Result<()> {
        self.call(move |store| store.record_failure(&error, at)).await
    }
}

pub struct ContractStore {
    conn: Connection,
}

impl ContractStore {
    /// Open (or create) the SQLite database at the given path.
    pub fn new(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).context("Failed to open SQLite database")?;
        let store = Self { conn };
        store.init()?;
        Ok(store)
    }

    /// Create an in-memory store (for testing).
    pub fn new_in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().context("Failed to open in-memory SQLite database")?;
        let store = Self { conn };
        store.init()?;
        Ok(store)
    }

    fn init(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS contracts (
                    id TEXT PRIMARY KEY,
                    project_name TEXT NOT NULL,
                    prompt TEXT NOT NULL,
                    status TEXT NOT NULL,
                    timestamp TEXT NOT NULL,
                    files TEXT NOT NULL,
                    file_metrics TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS analytics (
                    id INTEGER PRIMARY KEY CHECK (id = 1),
                    total_contracts INTEGER NOT NULL DEFAULT 0,
                    total_files_generated INTEGER NOT NULL DEFAULT 0,
                    total_source_files INTEGER NOT NULL DEFAULT 0,
                    total_test_files INTEGER NOT NULL DEFAULT 0,
                    total_other_files INTEGER NOT NULL DEFAULT 0,
                    failed_generations INTEGER NOT NULL DEFAULT 0,
                    last_error TEXT,
                    last_error_timestamp TEXT,
                    last_generated TEXT
                );

                INSERT OR IGNORE INTO analytics (id) VALUES (1);
                ",
            )
            .context("Failed to create tables")?;
        Ok(())
    }

    /// Insert one immutable record, then increment the success counters.
    pub fn save_record(&self, record: &GenerationRecord) -> Result<()> {
        let files_json =
            serde_json::to_string(&record.files).context("Failed to serialize files")?;
        let metrics_json =
            serde_json::to_string(&record.file_metrics).context("Failed to serialize metrics")?;

        self.conn
            .execute(
                "INSERT INTO contracts (id, project_name, prompt, status, timestamp, files, file_metrics)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    record.record_id,
                    record.project_name,
                    record.prompt,
                    record.status,
                    record.timestamp.to_rfc3339(),
                    files_json,
                    metrics_json,
                ],
            )
            .context("Failed to insert contract record")?;

        let m = &record.file_metrics;
        self.conn
            .execute(
                "UPDATE analytics SET
                    total_contracts = total_contracts + 1,
                    total_files_generated = total_files_generated + ?1,
                    total_source_files = total_source_files + ?2,
                    total_test_files = total_test_files + ?3,
                    total_other_files = total_other_files + ?4,
                    last_generated = ?5
                 WHERE id = 1",
                params![
                    m.total_files,
                    m.source_files,
                    m.test_files,
                    m.other_files,
                    record.timestamp.to_rfc3339(),
                ],
            )
            .context("Failed to update generation counters")?;
        Ok(())
    }

    /// Bump the failure tally and remember the last error.
    pub fn record_failure(&self, error: &str, at: DateTime<Utc>) -> Result<()> {
        self.conn
            .execute(
                "UPDATE analytics SET
                    failed_generations = failed_generations + 1,
                    last_error = ?1,
                    last_error_timestamp = ?2
                 WHERE id = 1",
                params![error, at.to_rfc3339()],
            )
            .context("Failed to update failure counters")?;
        Ok(())
    }

    /// Fetch one record by id.
    pub fn get_record(&self, record_id: &str) -> Result<Option<GenerationRecord>> {
        let row = self
            .conn
            .query_row(
                "SELECT id, project_name, prompt, status, timestamp, files, file_metrics
                 FROM contracts WHERE id = ?1",
                params![record_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, String>(5)?,
                        row.get::<_, String>(6)?,
                    ))
                },
            )
            .optional()
            .context("Failed to query contract record")?;

        let Some((id, project_name, prompt, status, timestamp, files, metrics)) = row else {
            return Ok(None);
        };
        Ok(Some(GenerationRecord {
            record_id: id,
            project_name,
            prompt,
            status,
            timestamp: DateTime::parse_from_rfc3339(&timestamp)
                .context("Invalid stored timestamp")?
                .with_timezone(&Utc),
            files: serde_json::from_str(&files).context("Invalid stored files payload")?,
            file_metrics: serde_json::from_str(&metrics).context("Invalid stored metrics")?,
        }))
    }

    /// Read the aggregate counters.
    pub fn analytics(&self) -> Result<Analytics> {
        self.conn
            .query_row(
                "SELECT total_contracts, total_files_generated, total_source_files,
                        total_test_files, total_other_files, failed_generations,
                        last_error, last_error_timestamp, last_generated
                 FROM analytics WHERE id = 1",
                [],
                |row| {
                    Ok(Analytics {
                        total_contracts: row.get(0)?,
                        total_files_generated: row.get(1)?,
                        total_source_files: row.get(2)?,
                        total_test_files: row.get(3)?,
                        total_other_files: row.get(4)?,
                        failed_generations: row.get(5)?,
                        last_error: row.get(6)?,
                        last_error_timestamp: row.get(7)?,
                        last_generated: row.get(8)?,
                    })
                },
            )
            .context("Failed to read analytics row")
    }
}
