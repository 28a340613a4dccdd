use anyhow::Result;
use rusqlite::params;

use super::Storage;
use super::types::{ExecutionRecord, JobRecord, JobTargetRecord, TargetConfig};

const JOB_COLUMNS: &str =
    "job_id, status, scrape_type, scrape_subtype, credential_ref, partial, created_at, started_at, completed_at";

const TARGET_COLUMNS: &str =
    "target_id, job_id, code, degree, status, attempts, error_json, created_at, completed_at";

const EXECUTION_COLUMNS: &str = "execution_id, target_id, job_id, attempt, status, started_at, \
     completed_at, result_count, result_payload, error_payload";

fn row_to_job(row: &rusqlite::Row<'_>) -> rusqlite::Result<JobRecord> {
    Ok(JobRecord {
        job_id: row.get(0)?,
        status: row.get(1)?,
        scrape_type: row.get(2)?,
        scrape_subtype: row.get(3)?,
        credential_ref: row.get(4)?,
        partial: row.get::<_, i64>(5)? != 0,
        created_at: row.get(6)?,
        started_at: row.get(7)?,
        completed_at: row.get(8)?,
    })
}

fn row_to_target(row: &rusqlite::Row<'_>) -> rusqlite::Result<JobTargetRecord> {
    Ok(JobTargetRecord {
        target_id: row.get(0)?,
        job_id: row.get(1)?,
        code: row.get(2)?,
        degree: row.get::<_, i64>(3)? as u8,
        status: row.get(4)?,
        attempts: row.get(5)?,
        error_json: row.get(6)?,
        created_at: row.get(7)?,
        completed_at: row.get(8)?,
    })
}

fn row_to_execution(row: &rusqlite::Row<'_>) -> rusqlite::Result<ExecutionRecord> {
    Ok(ExecutionRecord {
        execution_id: row.get(0)?,
        target_id: row.get(1)?,
        job_id: row.get(2)?,
        attempt: row.get(3)?,
        status: row.get(4)?,
        started_at: row.get(5)?,
        completed_at: row.get(6)?,
        result_count: row.get(7)?,
        result_payload: row.get(8)?,
        error_payload: row.get(9)?,
    })
}

impl Storage {
    /// Creates a pending job together with one pending row per target.
    pub async fn create_job(
        &self,
        scrape_type: &str,
        scrape_subtype: Option<&str>,
        credential_ref: &str,
        targets: &[TargetConfig],
    ) -> Result<(JobRecord, Vec<JobTargetRecord>)> {
        let job_id = uuid::Uuid::new_v4().to_string();
        let db = self.db.lock().await;
        db.execute(
            "INSERT INTO jobs (job_id, status, scrape_type, scrape_subtype, credential_ref)
             VALUES (?1, 'pending', ?2, ?3, ?4)",
            params![job_id, scrape_type, scrape_subtype, credential_ref],
        )?;
        for target in targets {
            let target_id = uuid::Uuid::new_v4().to_string();
            db.execute(
                "INSERT INTO job_targets (target_id, job_id, code, degree, status)
                 VALUES (?1, ?2, ?3, ?4, 'pending')",
                params![target_id, job_id, target.code, target.degree as i64],
            )?;
        }
        let job = db.query_row(
            &format!("SELECT {} FROM jobs WHERE job_id = ?1", JOB_COLUMNS),
            params![job_id],
            row_to_job,
        )?;
        let mut stmt = db.prepare(&format!(
            "SELECT {} FROM job_targets WHERE job_id = ?1 ORDER BY created_at ASC",
            TARGET_COLUMNS
        ))?;
        let rows = stmt.query_map(params![job_id], row_to_target)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok((job, out))
    }

    pub async fn get_job(&self, job_id: &str) -> Result<Option<JobRecord>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(&format!(
            "SELECT {} FROM jobs WHERE job_id = ?1 LIMIT 1",
            JOB_COLUMNS
        ))?;
        let mut rows = stmt.query(params![job_id])?;
        match rows.next()? {
            Some(row) => Ok(Some(row_to_job(row)?)),
            None => Ok(None),
        }
    }

    pub async fn list_jobs(&self, limit: usize) -> Result<Vec<JobRecord>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(&format!(
            "SELECT {} FROM jobs ORDER BY created_at DESC LIMIT ?1",
            JOB_COLUMNS
        ))?;
        let rows = stmt.query_map(params![limit as i64], row_to_job)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub async fn update_job_status(
        &self,
        job_id: &str,
        status: &str,
        partial: Option<bool>,
    ) -> Result<bool> {
        let db = self.db.lock().await;
        let terminal = matches!(status, "completed" | "failed" | "canceled");
        let rows = if terminal {
            db.execute(
                "UPDATE jobs
                 SET status = ?1, partial = COALESCE(?2, partial), completed_at = CURRENT_TIMESTAMP
                 WHERE job_id = ?3",
                params![status, partial.map(|p| p as i64), job_id],
            )?
        } else {
            db.execute(
                "UPDATE jobs
                 SET status = ?1, started_at = COALESCE(started_at, CURRENT_TIMESTAMP)
                 WHERE job_id = ?2",
                params![status, job_id],
            )?
        };
        Ok(rows > 0)
    }

    pub async fn list_job_targets(&self, job_id: &str) -> Result<Vec<JobTargetRecord>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(&format!(
            "SELECT {} FROM job_targets WHERE job_id = ?1 ORDER BY created_at ASC",
            TARGET_COLUMNS
        ))?;
        let rows = stmt.query_map(params![job_id], row_to_target)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub async fn update_target_status(
        &self,
        target_id: &str,
        status: &str,
        error_json: Option<&str>,
    ) -> Result<bool> {
        let db = self.db.lock().await;
        let terminal = matches!(status, "completed" | "failed" | "canceled");
        let rows = if terminal {
            db.execute(
                "UPDATE job_targets
                 SET status = ?1, error_json = COALESCE(?2, error_json), completed_at = CURRENT_TIMESTAMP
                 WHERE target_id = ?3",
                params![status, error_json, target_id],
            )?
        } else {
            db.execute(
                "UPDATE job_targets SET status = ?1 WHERE target_id = ?2",
                params![status, target_id],
            )?
        };
        Ok(rows > 0)
    }

    pub async fn increment_target_attempts(&self, target_id: &str) -> Result<i64> {
        let db = self.db.lock().await;
        db.execute(
            "UPDATE job_targets SET attempts = attempts + 1 WHERE target_id = ?1",
            params![target_id],
        )?;
        let attempts = db.query_row(
            "SELECT attempts FROM job_targets WHERE target_id = ?1",
            params![target_id],
            |row| row.get(0),
        )?;
        Ok(attempts)
    }

    /// Opens a new execution row for one attempt. Retries insert fresh rows,
    /// a terminal row is never rewritten.
    pub async fn create_execution(
        &self,
        target_id: &str,
        job_id: &str,
        attempt: i64,
    ) -> Result<ExecutionRecord> {
        let execution_id = uuid::Uuid::new_v4().to_string();
        let db = self.db.lock().await;
        db.execute(
            "INSERT INTO executions (execution_id, target_id, job_id, attempt, status)
             VALUES (?1, ?2, ?3, ?4, 'running')",
            params![execution_id, target_id, job_id, attempt],
        )?;
        let rec = db.query_row(
            &format!(
                "SELECT {} FROM executions WHERE execution_id = ?1",
                EXECUTION_COLUMNS
            ),
            params![execution_id],
            row_to_execution,
        )?;
        Ok(rec)
    }

    /// Seals an execution. The `status = 'running'` guard keeps terminal rows
    /// immutable even if a cleanup path runs twice.
    pub async fn complete_execution(
        &self,
        execution_id: &str,
        status: &str,
        result_count: Option<i64>,
        result_payload: Option<&str>,
        error_payload: Option<&str>,
    ) -> Result<bool> {
        let db = self.db.lock().await;
        let rows = db.execute(
            "UPDATE executions
             SET status = ?1, completed_at = CURRENT_TIMESTAMP, result_count = ?2,
                 result_payload = ?3, error_payload = ?4
             WHERE execution_id = ?5 AND status = 'running'",
            params![status, result_count, result_payload, error_payload, execution_id],
        )?;
        Ok(rows > 0)
    }

    pub async fn get_execution(&self, execution_id: &str) -> Result<Option<ExecutionRecord>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(&format!(
            "SELECT {} FROM executions WHERE execution_id = ?1 LIMIT 1",
            EXECUTION_COLUMNS
        ))?;
        let mut rows = stmt.query(params![execution_id])?;
        match rows.next()? {
            Some(row) => Ok(Some(row_to_execution(row)?)),
            None => Ok(None),
        }
    }

    pub async fn list_executions(&self, job_id: &str) -> Result<Vec<ExecutionRecord>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(&format!(
            "SELECT {} FROM executions WHERE job_id = ?1 ORDER BY started_at ASC, attempt ASC",
            EXECUTION_COLUMNS
        ))?;
        let rows = stmt.query_map(params![job_id], row_to_execution)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Marks jobs stuck in `running` beyond the timeout as failed, along with
    /// their non-terminal targets. Returns the swept job ids.
    pub async fn sweep_stuck_jobs(&self, older_than_secs: u64) -> Result<Vec<String>> {
        let db = self.db.lock().await;
        let cutoff = format!("-{} seconds", older_than_secs);
        let mut stmt = db.prepare(
            "SELECT job_id FROM jobs
             WHERE status = 'running' AND started_at < datetime('now', ?1)",
        )?;
        let rows = stmt.query_map(params![cutoff], |row| row.get::<_, String>(0))?;
        let mut swept = Vec::new();
        for row in rows {
            swept.push(row?);
        }
        for job_id in &swept {
            db.execute(
                "UPDATE job_targets
                 SET status = 'failed', completed_at = CURRENT_TIMESTAMP
                 WHERE job_id = ?1 AND status IN ('pending', 'running')",
                params![job_id],
            )?;
            db.execute(
                "UPDATE jobs SET status = 'failed', completed_at = CURRENT_TIMESTAMP WHERE job_id = ?1",
                params![job_id],
            )?;
        }
        Ok(swept)
    }
}
