mod definitions;
mod jobs;
mod metrics;
mod results;
pub mod types;

use anyhow::Result;
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

/// Relational store for definitions, jobs, targets, executions and metrics.
///
/// A single sqlite connection guarded by a tokio mutex, same discipline for
/// every query path. Schema creation is idempotent so startup doubles as
/// migration for fresh columns-free tables.
pub struct Storage {
    db: Arc<Mutex<Connection>>,
    #[allow(dead_code)]
    data_dir: PathBuf,
}

impl Storage {
    pub async fn new<P: AsRef<Path>>(data_dir: P) -> Result<Self> {
        let data_dir = data_dir.as_ref().to_path_buf();
        if !data_dir.exists() {
            tokio::fs::create_dir_all(&data_dir).await?;
        }

        let db_path = data_dir.join("juscron.db");
        let db = Connection::open(&db_path)?;
        create_schema(&db)?;
        info!("Storage ready at {:?}", db_path);

        Ok(Self {
            db: Arc::new(Mutex::new(db)),
            data_dir,
        })
    }

}

fn create_schema(db: &Connection) -> Result<()> {
    db.execute(
        "CREATE TABLE IF NOT EXISTS job_definitions (
            definition_id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            cron TEXT NOT NULL,
            timezone TEXT NOT NULL,
            targets_json TEXT NOT NULL,
            scrape_type TEXT NOT NULL,
            scrape_subtype TEXT,
            credential_ref TEXT NOT NULL,
            active INTEGER NOT NULL DEFAULT 1,
            last_run_at DATETIME,
            next_run_at TEXT,
            run_count INTEGER NOT NULL DEFAULT 0,
            last_job_id TEXT,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    db.execute(
        "CREATE TABLE IF NOT EXISTS jobs (
            job_id TEXT PRIMARY KEY,
            status TEXT NOT NULL,
            scrape_type TEXT NOT NULL,
            scrape_subtype TEXT,
            credential_ref TEXT NOT NULL,
            partial INTEGER NOT NULL DEFAULT 0,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
            started_at DATETIME,
            completed_at DATETIME
        )",
        [],
    )?;

    db.execute(
        "CREATE TABLE IF NOT EXISTS job_targets (
            target_id TEXT PRIMARY KEY,
            job_id TEXT NOT NULL REFERENCES jobs(job_id),
            code TEXT NOT NULL,
            degree INTEGER NOT NULL,
            status TEXT NOT NULL,
            attempts INTEGER NOT NULL DEFAULT 0,
            error_json TEXT,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
            completed_at DATETIME
        )",
        [],
    )?;

    db.execute(
        "CREATE TABLE IF NOT EXISTS executions (
            execution_id TEXT PRIMARY KEY,
            target_id TEXT NOT NULL REFERENCES job_targets(target_id),
            job_id TEXT NOT NULL REFERENCES jobs(job_id),
            attempt INTEGER NOT NULL,
            status TEXT NOT NULL,
            started_at DATETIME DEFAULT CURRENT_TIMESTAMP,
            completed_at DATETIME,
            result_count INTEGER,
            result_payload TEXT,
            error_payload TEXT
        )",
        [],
    )?;

    db.execute(
        "CREATE TABLE IF NOT EXISTS performance_metrics (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            target_key TEXT NOT NULL,
            scrape_type TEXT NOT NULL,
            duration_ms INTEGER NOT NULL,
            success INTEGER NOT NULL,
            result_count INTEGER NOT NULL DEFAULT 0,
            error_type TEXT,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    // One normalized table per scrape type; the Data Loader reads these
    // before falling back to the execution's inlined payload.
    for table in [
        "docket_records",
        "pending_records",
        "archive_records",
        "agenda_records",
    ] {
        db.execute(
            &format!(
                "CREATE TABLE IF NOT EXISTS {} (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    execution_id TEXT NOT NULL REFERENCES executions(execution_id),
                    record_json TEXT NOT NULL,
                    created_at DATETIME DEFAULT CURRENT_TIMESTAMP
                )",
                table
            ),
            [],
        )?;
    }

    db.execute(
        "CREATE INDEX IF NOT EXISTS idx_job_targets_job ON job_targets(job_id)",
        [],
    )?;
    db.execute(
        "CREATE INDEX IF NOT EXISTS idx_executions_target ON executions(target_id)",
        [],
    )?;
    db.execute(
        "CREATE INDEX IF NOT EXISTS idx_metrics_target ON performance_metrics(target_key, id)",
        [],
    )?;

    Ok(())
}

#[cfg(test)]
pub fn test_storage() -> Storage {
    let db = Connection::open_in_memory().expect("open in-memory db");
    create_schema(&db).expect("create schema");
    Storage {
        db: Arc::new(Mutex::new(db)),
        data_dir: std::env::temp_dir(),
    }
}
