//! Execution performance tracking and read-side alerting.
//!
//! Every finished attempt is persisted as an append-only metric, then three
//! independent rules run over the target's history. Alerts are purely
//! observational; nothing here feeds back into retry or concurrency
//! decisions.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use serde::Serialize;

use crate::storage::Storage;
use crate::storage::types::TargetConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    Info,
    Warning,
    Error,
}

impl AlertSeverity {
    pub fn as_str(self) -> &'static str {
        match self {
            AlertSeverity::Info => "info",
            AlertSeverity::Warning => "warning",
            AlertSeverity::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Alert {
    pub alert_type: String,
    pub severity: AlertSeverity,
    pub message: String,
    pub target_key: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub data: serde_json::Value,
}

impl Alert {
    fn new(
        alert_type: &str,
        severity: AlertSeverity,
        message: String,
        target_key: &str,
        data: serde_json::Value,
    ) -> Self {
        Self {
            alert_type: alert_type.to_string(),
            severity,
            message,
            target_key: target_key.to_string(),
            timestamp: chrono::Utc::now(),
            data,
        }
    }
}

/// One finished attempt, success or failure, as seen by the tracker.
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    pub target: TargetConfig,
    pub scrape_type: String,
    pub duration: Duration,
    pub success: bool,
    pub result_count: i64,
    pub error_type: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AlertThresholds {
    /// Rule 1: any attempt slower than this draws a warning.
    pub slow_duration: Duration,
    /// Rule 2: consecutive failures before a recurring-failure alert.
    pub failure_streak: usize,
    /// Rule 3: minimum successful samples before degradation math applies.
    pub degradation_min_samples: usize,
    /// Rule 3: trailing window of successful executions inspected.
    pub degradation_window: usize,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            slow_duration: Duration::from_secs(30 * 60),
            failure_streak: 3,
            degradation_min_samples: 5,
            degradation_window: 20,
        }
    }
}

pub struct PerformanceTracker {
    storage: Arc<Storage>,
    thresholds: AlertThresholds,
}

impl PerformanceTracker {
    pub fn new(storage: Arc<Storage>) -> Self {
        Self::with_thresholds(storage, AlertThresholds::default())
    }

    pub fn with_thresholds(storage: Arc<Storage>, thresholds: AlertThresholds) -> Self {
        Self {
            storage,
            thresholds,
        }
    }

    /// Persists the metric and evaluates all alert rules. Rules are
    /// independent; several can fire for the same execution.
    pub async fn record(&self, outcome: &ExecutionOutcome) -> Result<Vec<Alert>> {
        let key = outcome.target.metric_key();
        self.storage
            .add_performance_metric(
                &key,
                &outcome.scrape_type,
                outcome.duration.as_millis() as i64,
                outcome.success,
                outcome.result_count,
                outcome.error_type.as_deref(),
            )
            .await?;

        let window = self
            .thresholds
            .degradation_window
            .max(self.thresholds.failure_streak * 2)
            + 1;
        // Newest first; index 0 is the metric just written.
        let history = self.storage.list_recent_metrics(&key, window).await?;

        let mut alerts = Vec::new();
        self.check_slowness(outcome, &key, &mut alerts);
        self.check_failure_streak(&history, &key, &mut alerts);
        self.check_degradation(outcome, &history, &key, &mut alerts);
        Ok(alerts)
    }

    fn check_slowness(&self, outcome: &ExecutionOutcome, key: &str, alerts: &mut Vec<Alert>) {
        if outcome.duration <= self.thresholds.slow_duration {
            return;
        }
        let measured_min = outcome.duration.as_secs_f64() / 60.0;
        let threshold_min = self.thresholds.slow_duration.as_secs_f64() / 60.0;
        alerts.push(Alert::new(
            "slow_execution",
            AlertSeverity::Warning,
            format!(
                "Execution for {} took {:.1} min (threshold {:.1} min)",
                key, measured_min, threshold_min
            ),
            key,
            serde_json::json!({
                "duration_minutes": measured_min,
                "threshold_minutes": threshold_min,
            }),
        ));
    }

    fn check_failure_streak(
        &self,
        history: &[crate::storage::types::PerformanceMetricRecord],
        key: &str,
        alerts: &mut Vec<Alert>,
    ) {
        let n = self.thresholds.failure_streak;
        if n == 0 || history.len() < n {
            return;
        }
        let streak = &history[..n];

        if streak.iter().all(|m| !m.success) {
            alerts.push(Alert::new(
                "recurring_failure",
                AlertSeverity::Error,
                format!("Last {} executions for {} all failed", n, key),
                key,
                serde_json::json!({
                    "streak": n,
                    "last_error_type": streak[0].error_type,
                }),
            ));
        } else if streak.iter().all(|m| m.success)
            // Recovery fires exactly once: when the streak has just reached
            // length n, the metric before it is still the failure.
            && history.get(n).is_some_and(|m| !m.success)
        {
            alerts.push(Alert::new(
                "recovered",
                AlertSeverity::Info,
                format!("{} recovered: last {} executions succeeded", key, n),
                key,
                serde_json::json!({ "streak": n }),
            ));
        }
    }

    fn check_degradation(
        &self,
        outcome: &ExecutionOutcome,
        history: &[crate::storage::types::PerformanceMetricRecord],
        key: &str,
        alerts: &mut Vec<Alert>,
    ) {
        if !outcome.success {
            return;
        }
        // Baseline excludes the metric just written.
        let samples: Vec<f64> = history
            .iter()
            .skip(1)
            .filter(|m| m.success)
            .take(self.thresholds.degradation_window)
            .map(|m| m.duration_ms as f64)
            .collect();
        if samples.len() < self.thresholds.degradation_min_samples {
            return;
        }
        let mean = samples.iter().sum::<f64>() / samples.len() as f64;
        let variance =
            samples.iter().map(|d| (d - mean).powi(2)).sum::<f64>() / samples.len() as f64;
        let stddev = variance.sqrt();
        let current = outcome.duration.as_millis() as f64;

        if current > mean + 2.0 * stddev && mean > 0.0 {
            let slowdown_pct = (current / mean - 1.0) * 100.0;
            alerts.push(Alert::new(
                "performance_degradation",
                AlertSeverity::Warning,
                format!(
                    "Execution for {} was {:.0}% slower than its recent average",
                    key, slowdown_pct
                ),
                key,
                serde_json::json!({
                    "duration_ms": current,
                    "mean_ms": mean,
                    "stddev_ms": stddev,
                    "slowdown_pct": slowdown_pct,
                }),
            ));
        }
    }
}
