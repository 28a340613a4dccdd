//! Hybrid result loading and the inlined payload codec.
//!
//! Finished executions are resolved from the normalized scrape-type table
//! first; when that yields nothing, the execution's compressed payload is
//! decoded instead. The two sources are never mixed for one execution, and
//! an empty result set is data, not an error.

use std::io::{Read, Write};
use std::sync::Arc;

use anyhow::Result;
use base64::Engine;
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;

use crate::storage::Storage;

pub struct DataLoader {
    storage: Arc<Storage>,
}

impl DataLoader {
    pub fn new(storage: Arc<Storage>) -> Self {
        Self { storage }
    }

    pub async fn load(
        &self,
        execution_id: &str,
        scrape_type: &str,
    ) -> Result<Vec<serde_json::Value>> {
        let normalized = self
            .storage
            .list_scrape_records(execution_id, scrape_type)
            .await?;
        if !normalized.is_empty() {
            return Ok(normalized);
        }

        let Some(execution) = self.storage.get_execution(execution_id).await? else {
            return Ok(Vec::new());
        };
        let Some(payload) = execution.result_payload else {
            return Ok(Vec::new());
        };
        decode_records(&payload)
    }
}

/// Gzip + base64 for text-safe inlining of a record array.
pub fn encode_records(records: &[serde_json::Value]) -> Result<String> {
    let json = serde_json::to_vec(records)?;
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&json)?;
    let compressed = encoder.finish()?;
    Ok(base64::engine::general_purpose::STANDARD.encode(compressed))
}

/// Inverse of [`encode_records`]. Accepts either a bare array or an object
/// wrapping one under `records` (older scraper output).
pub fn decode_records(payload: &str) -> Result<Vec<serde_json::Value>> {
    let compressed = base64::engine::general_purpose::STANDARD.decode(payload)?;
    let mut decoder = GzDecoder::new(compressed.as_slice());
    let mut json = String::new();
    decoder.read_to_string(&mut json)?;

    let value: serde_json::Value = serde_json::from_str(&json)?;
    match value {
        serde_json::Value::Array(records) => Ok(records),
        serde_json::Value::Object(mut map) => match map.remove("records") {
            Some(serde_json::Value::Array(records)) => Ok(records),
            _ => Ok(Vec::new()),
        },
        _ => Ok(Vec::new()),
    }
}
