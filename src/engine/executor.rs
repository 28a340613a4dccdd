//! Per-job execution: tribunal-ordered dispatch under the per-job ceiling,
//! per-target attempt/retry loop, and status recomputation after every
//! target transition.

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::error;

use super::runner::{AttemptOutcome, AttemptSpec};
use super::{ExecutionEngine, RunState, classify, loader, retry, sorter};
use crate::engine::logstream::LogEntry;
use crate::engine::tracker::ExecutionOutcome;
use crate::storage::types::{JobRecord, JobTargetRecord};

pub(crate) async fn run_job(
    engine: ExecutionEngine,
    job: JobRecord,
    targets: Vec<JobTargetRecord>,
    cancel: CancellationToken,
) {
    // System-wide job ceiling; the job stays pending while waiting for a slot.
    let Ok(_job_permit) = engine.job_slots.clone().acquire_owned().await else {
        return;
    };

    if !cancel.is_cancelled() {
        if let Err(e) = engine
            .storage
            .update_job_status(&job.job_id, "running", None)
            .await
        {
            error!("Failed to mark job {} running: {}", job.job_id, e);
        }
        engine
            .logs
            .append(
                &job.job_id,
                LogEntry::info(format!(
                    "Job started: {} target(s), type {}",
                    targets.len(),
                    job.scrape_type
                )),
            )
            .await;

        let ordered = sorter::order_records(targets);
        let per_job = Arc::new(Semaphore::new(engine.config.max_targets_per_job));
        let mut set = JoinSet::new();

        for target in ordered {
            // Acquiring before spawn keeps dispatch in sorter order while
            // enforcing the per-job ceiling.
            let permit = tokio::select! {
                permit = per_job.clone().acquire_owned() => match permit {
                    Ok(p) => p,
                    Err(_) => break,
                },
                _ = cancel.cancelled() => break,
            };
            let engine = engine.clone();
            let job = job.clone();
            let cancel = cancel.clone();
            set.spawn(async move {
                let _permit = permit;
                if let Err(e) = run_target(&engine, &job, &target, &cancel).await {
                    error!(
                        "Target {} of job {} errored: {}",
                        target.code, job.job_id, e
                    );
                    let _ = engine
                        .storage
                        .update_target_status(&target.target_id, "failed", None)
                        .await;
                    let _ = engine.recompute_job_status(&job.job_id).await;
                }
            });
        }
        while set.join_next().await.is_some() {}
    }

    // Targets never dispatched (cancel arrived first) settle as canceled.
    if cancel.is_cancelled() {
        if let Ok(leftover) = engine.storage.list_job_targets(&job.job_id).await {
            for target in leftover {
                if RunState::from_status(&target.status).is_none_or(|s| !s.is_terminal()) {
                    let _ = engine
                        .storage
                        .update_target_status(&target.target_id, "canceled", None)
                        .await;
                }
            }
        }
    }

    match engine.recompute_job_status(&job.job_id).await {
        Ok(state) => {
            engine
                .logs
                .append(
                    &job.job_id,
                    LogEntry::info(format!("Job finished with status {}", state.as_str())),
                )
                .await;
        }
        Err(e) => error!("Failed to finalize job {}: {}", job.job_id, e),
    }
    engine.release_cancellation(&job.job_id).await;
}

/// Attempt/retry loop for a single target. Every attempt writes its own
/// execution row; retry delays come from the clamped backoff table.
async fn run_target(
    engine: &ExecutionEngine,
    job: &JobRecord,
    target: &JobTargetRecord,
    cancel: &CancellationToken,
) -> Result<()> {
    let label = format!("{}:{}", target.code, target.degree);

    loop {
        if cancel.is_cancelled() {
            return settle_canceled(engine, job, target, &label).await;
        }

        let attempt = engine
            .storage
            .increment_target_attempts(&target.target_id)
            .await?;
        engine
            .storage
            .update_target_status(&target.target_id, "running", None)
            .await?;
        engine.recompute_job_status(&job.job_id).await?;
        let execution = engine
            .storage
            .create_execution(&target.target_id, &job.job_id, attempt)
            .await?;
        engine
            .logs
            .append(
                &job.job_id,
                LogEntry::info(format!("{} attempt {} started", label, attempt)).with_context(
                    serde_json::json!({ "execution_id": execution.execution_id }),
                ),
            )
            .await;

        // Global worker-process ceiling, held only for the attempt itself.
        let process_permit = engine.process_slots.clone().acquire_owned().await?;
        let started = std::time::Instant::now();
        let spec = AttemptSpec {
            job_id: job.job_id.clone(),
            execution_id: execution.execution_id.clone(),
            target: target.config(),
            scrape_type: job.scrape_type.clone(),
            scrape_subtype: job.scrape_subtype.clone(),
            credential_ref: job.credential_ref.clone(),
            timeout: engine.config.attempt_timeout,
            kill_grace: engine.config.kill_grace,
            cancel: cancel.clone(),
        };
        let outcome = engine.runner.run(&spec).await;
        drop(process_permit);
        let duration = started.elapsed();

        let failure_message = match outcome {
            Ok(AttemptOutcome::Success { records, count }) => {
                let payload = loader::encode_records(&records).ok();
                engine
                    .storage
                    .complete_execution(
                        &execution.execution_id,
                        "completed",
                        Some(count),
                        payload.as_deref(),
                        None,
                    )
                    .await?;
                engine
                    .storage
                    .insert_scrape_records(&execution.execution_id, &job.scrape_type, &records)
                    .await?;
                engine
                    .storage
                    .update_target_status(&target.target_id, "completed", None)
                    .await?;
                engine.recompute_job_status(&job.job_id).await?;
                engine
                    .logs
                    .append(
                        &job.job_id,
                        LogEntry::info(format!(
                            "{} completed with {} record(s) on attempt {}",
                            label, count, attempt
                        )),
                    )
                    .await;
                engine
                    .report_outcome(
                        &job.job_id,
                        ExecutionOutcome {
                            target: target.config(),
                            scrape_type: job.scrape_type.clone(),
                            duration,
                            success: true,
                            result_count: count,
                            error_type: None,
                        },
                    )
                    .await;
                return Ok(());
            }
            Ok(AttemptOutcome::Canceled) => {
                engine
                    .storage
                    .complete_execution(&execution.execution_id, "canceled", None, None, None)
                    .await?;
                return settle_canceled(engine, job, target, &label).await;
            }
            Ok(AttemptOutcome::TimedOut) => format!(
                "Execution timed out after {} seconds",
                engine.config.attempt_timeout.as_secs()
            ),
            Ok(AttemptOutcome::Failure { message }) => message,
            Err(e) => format!("Failed to launch scraper: {}", e),
        };

        let classified = classify::classify(
            &failure_message,
            Some(serde_json::json!({
                "tribunal": target.code,
                "grau": target.degree,
                "attempt": attempt,
            })),
        );
        let error_json = serde_json::to_string(&classified)?;
        engine
            .storage
            .complete_execution(
                &execution.execution_id,
                "failed",
                None,
                None,
                Some(&error_json),
            )
            .await?;
        engine
            .report_outcome(
                &job.job_id,
                ExecutionOutcome {
                    target: target.config(),
                    scrape_type: job.scrape_type.clone(),
                    duration,
                    success: false,
                    result_count: 0,
                    error_type: Some(classified.category.as_str().to_string()),
                },
            )
            .await;

        if classified.retryable && attempt < engine.config.max_attempts as i64 {
            let delay = retry::retry_delay(&engine.config.backoff, attempt as u32);
            engine
                .logs
                .append(
                    &job.job_id,
                    LogEntry::warn(format!(
                        "{} attempt {} failed ({}): retrying in {}s",
                        label,
                        attempt,
                        classified.category.as_str(),
                        delay.as_secs()
                    ))
                    .with_context(serde_json::json!({
                        "technical_message": classified.technical_message,
                    })),
                )
                .await;
            engine
                .storage
                .update_target_status(&target.target_id, "pending", None)
                .await?;
            engine.recompute_job_status(&job.job_id).await?;

            tokio::select! {
                _ = cancel.cancelled() => {
                    return settle_canceled(engine, job, target, &label).await;
                }
                _ = tokio::time::sleep(delay) => {}
            }
            continue;
        }

        engine
            .storage
            .update_target_status(&target.target_id, "failed", Some(&error_json))
            .await?;
        engine.recompute_job_status(&job.job_id).await?;
        engine
            .logs
            .append(
                &job.job_id,
                LogEntry::error(format!(
                    "{} failed after {} attempt(s) [{}]: {}",
                    label,
                    attempt,
                    classified.category.as_str(),
                    classified.technical_message
                )),
            )
            .await;
        return Ok(());
    }
}

async fn settle_canceled(
    engine: &ExecutionEngine,
    job: &JobRecord,
    target: &JobTargetRecord,
    label: &str,
) -> Result<()> {
    engine
        .storage
        .update_target_status(&target.target_id, "canceled", None)
        .await?;
    engine.recompute_job_status(&job.job_id).await?;
    engine
        .logs
        .append(&job.job_id, LogEntry::warn(format!("{} canceled", label)))
        .await;
    Ok(())
}
