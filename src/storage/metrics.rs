use anyhow::Result;
use rusqlite::params;

use super::Storage;
use super::types::PerformanceMetricRecord;

const METRIC_COLUMNS: &str =
    "id, target_key, scrape_type, duration_ms, success, result_count, error_type, created_at";

fn row_to_metric(row: &rusqlite::Row<'_>) -> rusqlite::Result<PerformanceMetricRecord> {
    Ok(PerformanceMetricRecord {
        id: row.get(0)?,
        target_key: row.get(1)?,
        scrape_type: row.get(2)?,
        duration_ms: row.get(3)?,
        success: row.get::<_, i64>(4)? != 0,
        result_count: row.get(5)?,
        error_type: row.get(6)?,
        created_at: row.get(7)?,
    })
}

impl Storage {
    pub async fn add_performance_metric(
        &self,
        target_key: &str,
        scrape_type: &str,
        duration_ms: i64,
        success: bool,
        result_count: i64,
        error_type: Option<&str>,
    ) -> Result<()> {
        let db = self.db.lock().await;
        db.execute(
            "INSERT INTO performance_metrics
             (target_key, scrape_type, duration_ms, success, result_count, error_type)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                target_key,
                scrape_type,
                duration_ms,
                success as i64,
                result_count,
                error_type
            ],
        )?;
        Ok(())
    }

    /// Most recent metrics for a target, newest first.
    pub async fn list_recent_metrics(
        &self,
        target_key: &str,
        limit: usize,
    ) -> Result<Vec<PerformanceMetricRecord>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(&format!(
            "SELECT {} FROM performance_metrics WHERE target_key = ?1 ORDER BY id DESC LIMIT ?2",
            METRIC_COLUMNS
        ))?;
        let rows = stmt.query_map(params![target_key, limit as i64], row_to_metric)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }
}
