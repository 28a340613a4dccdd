use anyhow::Result;
use rusqlite::params;

use super::Storage;
use super::types::{JobDefinitionRecord, TargetConfig};

const DEFINITION_COLUMNS: &str = "definition_id, name, cron, timezone, targets_json, scrape_type, \
     scrape_subtype, credential_ref, active, last_run_at, next_run_at, run_count, last_job_id, created_at";

fn row_to_definition(row: &rusqlite::Row<'_>) -> rusqlite::Result<(JobDefinitionRecord, String)> {
    let targets_json: String = row.get(4)?;
    Ok((
        JobDefinitionRecord {
            definition_id: row.get(0)?,
            name: row.get(1)?,
            cron: row.get(2)?,
            timezone: row.get(3)?,
            targets: Vec::new(),
            scrape_type: row.get(5)?,
            scrape_subtype: row.get(6)?,
            credential_ref: row.get(7)?,
            active: row.get::<_, i64>(8)? != 0,
            last_run_at: row.get(9)?,
            next_run_at: row.get(10)?,
            run_count: row.get(11)?,
            last_job_id: row.get(12)?,
            created_at: row.get(13)?,
        },
        targets_json,
    ))
}

fn finish(pair: (JobDefinitionRecord, String)) -> Result<JobDefinitionRecord> {
    let (mut rec, targets_json) = pair;
    rec.targets = serde_json::from_str(&targets_json)?;
    Ok(rec)
}

impl Storage {
    #[allow(clippy::too_many_arguments)]
    pub async fn create_definition(
        &self,
        name: &str,
        cron: &str,
        timezone: &str,
        targets: &[TargetConfig],
        scrape_type: &str,
        scrape_subtype: Option<&str>,
        credential_ref: &str,
        next_run_at: Option<&str>,
    ) -> Result<JobDefinitionRecord> {
        let definition_id = uuid::Uuid::new_v4().to_string();
        let targets_json = serde_json::to_string(targets)?;
        let db = self.db.lock().await;
        db.execute(
            "INSERT INTO job_definitions
             (definition_id, name, cron, timezone, targets_json, scrape_type, scrape_subtype, credential_ref, active, next_run_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 1, ?9)",
            params![
                definition_id,
                name,
                cron,
                timezone,
                targets_json,
                scrape_type,
                scrape_subtype,
                credential_ref,
                next_run_at
            ],
        )?;
        let pair = db.query_row(
            &format!(
                "SELECT {} FROM job_definitions WHERE definition_id = ?1",
                DEFINITION_COLUMNS
            ),
            params![definition_id],
            row_to_definition,
        )?;
        finish(pair)
    }

    pub async fn get_definition(&self, definition_id: &str) -> Result<Option<JobDefinitionRecord>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(&format!(
            "SELECT {} FROM job_definitions WHERE definition_id = ?1 LIMIT 1",
            DEFINITION_COLUMNS
        ))?;
        let mut rows = stmt.query(params![definition_id])?;
        match rows.next()? {
            Some(row) => Ok(Some(finish(row_to_definition(row)?)?)),
            None => Ok(None),
        }
    }

    pub async fn list_definitions(&self) -> Result<Vec<JobDefinitionRecord>> {
        self.list_definitions_inner(false).await
    }

    pub async fn list_active_definitions(&self) -> Result<Vec<JobDefinitionRecord>> {
        self.list_definitions_inner(true).await
    }

    async fn list_definitions_inner(&self, active_only: bool) -> Result<Vec<JobDefinitionRecord>> {
        let db = self.db.lock().await;
        let sql = if active_only {
            format!(
                "SELECT {} FROM job_definitions WHERE active = 1 ORDER BY created_at ASC",
                DEFINITION_COLUMNS
            )
        } else {
            format!(
                "SELECT {} FROM job_definitions ORDER BY created_at ASC",
                DEFINITION_COLUMNS
            )
        };
        let mut stmt = db.prepare(&sql)?;
        let rows = stmt.query_map([], row_to_definition)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(finish(row?)?);
        }
        Ok(out)
    }

    /// Rewrites the schedule fields of a definition. History fields
    /// (run_count, last_run_at, last_job_id) are left untouched.
    #[allow(clippy::too_many_arguments)]
    pub async fn update_definition(
        &self,
        definition_id: &str,
        name: &str,
        cron: &str,
        timezone: &str,
        targets: &[TargetConfig],
        scrape_type: &str,
        scrape_subtype: Option<&str>,
        credential_ref: &str,
        next_run_at: Option<&str>,
    ) -> Result<bool> {
        let targets_json = serde_json::to_string(targets)?;
        let db = self.db.lock().await;
        let rows = db.execute(
            "UPDATE job_definitions
             SET name = ?1, cron = ?2, timezone = ?3, targets_json = ?4, scrape_type = ?5,
                 scrape_subtype = ?6, credential_ref = ?7, next_run_at = ?8
             WHERE definition_id = ?9",
            params![
                name,
                cron,
                timezone,
                targets_json,
                scrape_type,
                scrape_subtype,
                credential_ref,
                next_run_at,
                definition_id
            ],
        )?;
        Ok(rows > 0)
    }

    pub async fn set_definition_active(&self, definition_id: &str, active: bool) -> Result<bool> {
        let db = self.db.lock().await;
        let rows = db.execute(
            "UPDATE job_definitions SET active = ?1 WHERE definition_id = ?2",
            params![active as i64, definition_id],
        )?;
        Ok(rows > 0)
    }

    pub async fn delete_definition(&self, definition_id: &str) -> Result<bool> {
        let db = self.db.lock().await;
        let rows = db.execute(
            "DELETE FROM job_definitions WHERE definition_id = ?1",
            params![definition_id],
        )?;
        Ok(rows > 0)
    }

    /// Fire bookkeeping: bumps run_count, stamps last_run_at/last_job_id and
    /// stores the recomputed next occurrence.
    pub async fn record_definition_fired(
        &self,
        definition_id: &str,
        job_id: &str,
        next_run_at: Option<&str>,
    ) -> Result<bool> {
        let db = self.db.lock().await;
        let rows = db.execute(
            "UPDATE job_definitions
             SET last_run_at = CURRENT_TIMESTAMP, last_job_id = ?1, run_count = run_count + 1, next_run_at = ?2
             WHERE definition_id = ?3",
            params![job_id, next_run_at, definition_id],
        )?;
        Ok(rows > 0)
    }
}
