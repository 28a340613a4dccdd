//! Scrape job execution engine.
//!
//! `submit` accepts a job and returns immediately; dispatch, retries and
//! bookkeeping run on the engine's own tasks under three independent
//! concurrency ceilings (jobs system-wide, targets per job, worker processes
//! globally).

pub mod classify;
mod executor;
pub mod loader;
pub mod logstream;
pub mod retry;
pub mod runner;
pub mod sorter;
pub mod tracker;

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Result, bail};
use tokio::sync::{Mutex, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::EngineConfig;
use crate::storage::Storage;
use crate::storage::types::TargetConfig;
use logstream::{LogEntry, LogStream};
use runner::TargetRunner;
use tracker::{Alert, AlertSeverity, ExecutionOutcome, PerformanceTracker};

/// State machine shared by jobs and job targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Pending,
    Running,
    Completed,
    Failed,
    Canceled,
}

impl RunState {
    pub fn as_str(self) -> &'static str {
        match self {
            RunState::Pending => "pending",
            RunState::Running => "running",
            RunState::Completed => "completed",
            RunState::Failed => "failed",
            RunState::Canceled => "canceled",
        }
    }

    pub fn from_status(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(RunState::Pending),
            "running" => Some(RunState::Running),
            "completed" => Some(RunState::Completed),
            "failed" => Some(RunState::Failed),
            "canceled" => Some(RunState::Canceled),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunState::Completed | RunState::Failed | RunState::Canceled
        )
    }
}

pub fn can_transition(from: RunState, to: RunState) -> bool {
    if from == to {
        return true;
    }
    match from {
        RunState::Pending => matches!(
            to,
            RunState::Running | RunState::Failed | RunState::Canceled
        ),
        RunState::Running => matches!(
            to,
            RunState::Pending | RunState::Completed | RunState::Failed | RunState::Canceled
        ),
        RunState::Completed | RunState::Failed | RunState::Canceled => false,
    }
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct JobRequest {
    pub targets: Vec<TargetConfig>,
    pub scrape_type: String,
    #[serde(default)]
    pub scrape_subtype: Option<String>,
    pub credential_ref: String,
}

#[derive(Clone)]
pub struct ExecutionEngine {
    storage: Arc<Storage>,
    config: Arc<EngineConfig>,
    logs: LogStream,
    tracker: Arc<PerformanceTracker>,
    runner: Arc<dyn TargetRunner>,
    job_slots: Arc<Semaphore>,
    process_slots: Arc<Semaphore>,
    cancellations: Arc<Mutex<HashMap<String, CancellationToken>>>,
}

impl ExecutionEngine {
    pub fn new(
        storage: Arc<Storage>,
        config: EngineConfig,
        logs: LogStream,
        runner: Arc<dyn TargetRunner>,
    ) -> Self {
        let tracker = Arc::new(PerformanceTracker::new(storage.clone()));
        let job_slots = Arc::new(Semaphore::new(config.max_concurrent_jobs));
        let process_slots = Arc::new(Semaphore::new(config.max_worker_processes));
        Self {
            storage,
            config: Arc::new(config),
            logs,
            tracker,
            runner,
            job_slots,
            process_slots,
            cancellations: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn logs(&self) -> &LogStream {
        &self.logs
    }

    pub fn storage(&self) -> Arc<Storage> {
        self.storage.clone()
    }

    /// Accepts a job and returns its id immediately; execution proceeds on
    /// the engine's own tasks, gated by the system-wide job ceiling.
    pub async fn submit(&self, request: JobRequest) -> Result<String> {
        if request.targets.is_empty() {
            bail!("job request has no targets");
        }
        if request.scrape_type.trim().is_empty() {
            bail!("job request has no scrape type");
        }

        let (job, targets) = self
            .storage
            .create_job(
                &request.scrape_type,
                request.scrape_subtype.as_deref(),
                &request.credential_ref,
                &request.targets,
            )
            .await?;

        let cancel = CancellationToken::new();
        self.cancellations
            .lock()
            .await
            .insert(job.job_id.clone(), cancel.clone());

        info!(
            "Job {} accepted: {} target(s), type {}",
            job.job_id,
            targets.len(),
            job.scrape_type
        );
        let engine = self.clone();
        let job_id = job.job_id.clone();
        tokio::spawn(executor::run_job(engine, job, targets, cancel));
        Ok(job_id)
    }

    /// Cooperative cancellation. Returns false when the job was already
    /// terminal (the call is an idempotent acknowledgement in that case).
    pub async fn cancel(&self, job_id: &str) -> Result<bool> {
        let Some(job) = self.storage.get_job(job_id).await? else {
            bail!("job {} not found", job_id);
        };
        if RunState::from_status(&job.status).is_some_and(RunState::is_terminal) {
            return Ok(false);
        }

        let token = self.cancellations.lock().await.get(job_id).cloned();
        match token {
            Some(token) => {
                token.cancel();
                self.logs
                    .append(job_id, LogEntry::warn("Cancellation requested"))
                    .await;
            }
            None => {
                // No live task owns this job (e.g. restart left a stale row);
                // settle it directly.
                for target in self.storage.list_job_targets(job_id).await? {
                    if RunState::from_status(&target.status)
                        .is_none_or(|s| !s.is_terminal())
                    {
                        self.storage
                            .update_target_status(&target.target_id, "canceled", None)
                            .await?;
                    }
                }
                self.recompute_job_status(job_id).await?;
            }
        }
        Ok(true)
    }

    /// Marks jobs running past the stuck timeout as failed and fires their
    /// cancellation tokens so any lingering tasks stand down.
    pub async fn sweep_stuck_jobs(&self) -> Result<Vec<String>> {
        let swept = self
            .storage
            .sweep_stuck_jobs(self.config.stuck_job_timeout.as_secs())
            .await?;
        if !swept.is_empty() {
            let mut cancellations = self.cancellations.lock().await;
            for job_id in &swept {
                warn!("Swept stuck job {} to failed", job_id);
                if let Some(token) = cancellations.remove(job_id) {
                    token.cancel();
                }
            }
        }
        Ok(swept)
    }

    /// Re-derives the job status from its targets: `running` while any target
    /// is pending/running, otherwise terminal per the partial-success policy
    /// (`failed` iff zero targets completed).
    pub(crate) async fn recompute_job_status(&self, job_id: &str) -> Result<RunState> {
        let targets = self.storage.list_job_targets(job_id).await?;
        let mut in_flight = 0usize;
        let mut completed = 0usize;
        let mut failed = 0usize;
        let mut canceled = 0usize;
        for target in &targets {
            match RunState::from_status(&target.status) {
                Some(RunState::Pending) | Some(RunState::Running) | None => in_flight += 1,
                Some(RunState::Completed) => completed += 1,
                Some(RunState::Failed) => failed += 1,
                Some(RunState::Canceled) => canceled += 1,
            }
        }

        let (next, partial) = if in_flight > 0 {
            (RunState::Running, None)
        } else if completed > 0 {
            (RunState::Completed, Some(failed + canceled > 0))
        } else if canceled > 0 && failed == 0 {
            (RunState::Canceled, None)
        } else {
            (RunState::Failed, None)
        };

        if let Some(job) = self.storage.get_job(job_id).await? {
            let current = RunState::from_status(&job.status).unwrap_or(RunState::Pending);
            if current != next && can_transition(current, next) {
                self.storage
                    .update_job_status(job_id, next.as_str(), partial)
                    .await?;
            }
        }
        Ok(next)
    }

    pub(crate) async fn release_cancellation(&self, job_id: &str) {
        self.cancellations.lock().await.remove(job_id);
    }

    /// Feeds a finished attempt to the performance tracker and surfaces any
    /// alerts as logs. Tracker failures are swallowed: alerting must never
    /// disturb execution.
    pub(crate) async fn report_outcome(&self, job_id: &str, outcome: ExecutionOutcome) {
        match self.tracker.record(&outcome).await {
            Ok(alerts) => {
                for alert in alerts {
                    self.emit_alert(job_id, alert).await;
                }
            }
            Err(e) => {
                warn!(
                    "Failed to record metric for {}: {}",
                    outcome.target.metric_key(),
                    e
                );
            }
        }
    }

    async fn emit_alert(&self, job_id: &str, alert: Alert) {
        let context = serde_json::json!({
            "alert_type": alert.alert_type,
            "severity": alert.severity.as_str(),
            "target": alert.target_key,
            "data": alert.data,
        });
        let entry = match alert.severity {
            AlertSeverity::Info => {
                info!("Alert [{}]: {}", alert.alert_type, alert.message);
                LogEntry::info(alert.message.clone())
            }
            AlertSeverity::Warning => {
                warn!("Alert [{}]: {}", alert.alert_type, alert.message);
                LogEntry::warn(alert.message.clone())
            }
            AlertSeverity::Error => {
                error!("Alert [{}]: {}", alert.alert_type, alert.message);
                LogEntry::error(alert.message.clone())
            }
        };
        self.logs.append(job_id, entry.with_context(context)).await;
    }
}

#[cfg(test)]
mod tests;
