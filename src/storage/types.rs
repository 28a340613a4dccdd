use serde::{Deserialize, Serialize};

/// One (court x instance degree) endpoint the engine can scrape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetConfig {
    /// Court code, e.g. `TRT15`, `TJSP`, `STJ`.
    pub code: String,
    /// Instance degree: 1 = first degree, 2 = second degree, 0 = single instance.
    pub degree: u8,
}

impl TargetConfig {
    pub fn new(code: &str, degree: u8) -> Self {
        Self {
            code: code.to_string(),
            degree,
        }
    }

    /// Key used for metric grouping, e.g. `TRT15:1`.
    pub fn metric_key(&self) -> String {
        format!("{}:{}", self.code, self.degree)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobDefinitionRecord {
    pub definition_id: String,
    pub name: String,
    pub cron: String,
    pub timezone: String,
    pub targets: Vec<TargetConfig>,
    pub scrape_type: String,
    pub scrape_subtype: Option<String>,
    pub credential_ref: String,
    pub active: bool,
    pub last_run_at: Option<String>,
    pub next_run_at: Option<String>,
    pub run_count: i64,
    pub last_job_id: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub job_id: String,
    pub status: String,
    pub scrape_type: String,
    pub scrape_subtype: Option<String>,
    pub credential_ref: String,
    /// Set when the job completed but at least one target failed.
    pub partial: bool,
    pub created_at: String,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobTargetRecord {
    pub target_id: String,
    pub job_id: String,
    pub code: String,
    pub degree: u8,
    pub status: String,
    pub attempts: i64,
    pub error_json: Option<String>,
    pub created_at: String,
    pub completed_at: Option<String>,
}

impl JobTargetRecord {
    pub fn config(&self) -> TargetConfig {
        TargetConfig {
            code: self.code.clone(),
            degree: self.degree,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub execution_id: String,
    pub target_id: String,
    pub job_id: String,
    pub attempt: i64,
    pub status: String,
    pub started_at: String,
    pub completed_at: Option<String>,
    pub result_count: Option<i64>,
    /// Gzip-compressed, base64-encoded JSON array of scraped records.
    pub result_payload: Option<String>,
    /// Classified error as JSON.
    pub error_payload: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceMetricRecord {
    pub id: i64,
    pub target_key: String,
    pub scrape_type: String,
    pub duration_ms: i64,
    pub success: bool,
    pub result_count: i64,
    pub error_type: Option<String>,
    pub created_at: String,
}
