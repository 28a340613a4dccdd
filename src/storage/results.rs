use anyhow::Result;
use rusqlite::params;

use super::Storage;

/// Normalized table for a scrape type, or None for types the store does not
/// normalize (the Data Loader then goes straight to the inlined payload).
pub fn table_for_scrape_type(scrape_type: &str) -> Option<&'static str> {
    match scrape_type {
        "general_docket" => Some("docket_records"),
        "pending_manifestation" => Some("pending_records"),
        "archived" => Some("archive_records"),
        "agenda" => Some("agenda_records"),
        _ => None,
    }
}

impl Storage {
    pub async fn insert_scrape_records(
        &self,
        execution_id: &str,
        scrape_type: &str,
        records: &[serde_json::Value],
    ) -> Result<usize> {
        let Some(table) = table_for_scrape_type(scrape_type) else {
            return Ok(0);
        };
        let db = self.db.lock().await;
        let mut inserted = 0;
        for record in records {
            db.execute(
                &format!(
                    "INSERT INTO {} (execution_id, record_json) VALUES (?1, ?2)",
                    table
                ),
                params![execution_id, serde_json::to_string(record)?],
            )?;
            inserted += 1;
        }
        Ok(inserted)
    }

    pub async fn list_scrape_records(
        &self,
        execution_id: &str,
        scrape_type: &str,
    ) -> Result<Vec<serde_json::Value>> {
        let Some(table) = table_for_scrape_type(scrape_type) else {
            return Ok(Vec::new());
        };
        let db = self.db.lock().await;
        let mut stmt = db.prepare(&format!(
            "SELECT record_json FROM {} WHERE execution_id = ?1 ORDER BY id ASC",
            table
        ))?;
        let rows = stmt.query_map(params![execution_id], |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(serde_json::from_str(&row?)?);
        }
        Ok(out)
    }
}
