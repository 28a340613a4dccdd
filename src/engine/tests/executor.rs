use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::json;

use crate::config::EngineConfig;
use crate::engine::logstream::LogStream;
use crate::engine::runner::{AttemptOutcome, AttemptSpec, TargetRunner};
use crate::engine::{ExecutionEngine, JobRequest, RunState};
use crate::storage::test_storage;
use crate::storage::types::TargetConfig;

/// Runner scripted per target key; unscripted attempts succeed with no
/// records. Also tracks dispatch order and peak in-flight attempts.
struct ScriptedRunner {
    outcomes: Mutex<HashMap<String, Vec<AttemptOutcome>>>,
    started: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    hold: Duration,
}

impl ScriptedRunner {
    fn new() -> Self {
        Self {
            outcomes: Mutex::new(HashMap::new()),
            started: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            hold: Duration::from_millis(10),
        }
    }

    fn script(self, key: &str, outcomes: Vec<AttemptOutcome>) -> Self {
        self.outcomes
            .lock()
            .unwrap()
            .insert(key.to_string(), outcomes);
        self
    }

    fn started_keys(&self) -> Vec<String> {
        self.started.lock().unwrap().clone()
    }

    fn peak_in_flight(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TargetRunner for ScriptedRunner {
    async fn run(&self, spec: &AttemptSpec) -> Result<AttemptOutcome> {
        let key = spec.target.metric_key();
        self.started.lock().unwrap().push(key.clone());
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.hold).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let scripted = {
            let mut outcomes = self.outcomes.lock().unwrap();
            match outcomes.get_mut(&key) {
                Some(queue) if !queue.is_empty() => Some(queue.remove(0)),
                _ => None,
            }
        };
        Ok(scripted.unwrap_or(AttemptOutcome::Success {
            records: Vec::new(),
            count: 0,
        }))
    }
}

/// Runner that blocks until the attempt's cancellation token fires.
struct BlockingRunner;

#[async_trait]
impl TargetRunner for BlockingRunner {
    async fn run(&self, spec: &AttemptSpec) -> Result<AttemptOutcome> {
        tokio::select! {
            _ = spec.cancel.cancelled() => Ok(AttemptOutcome::Canceled),
            _ = tokio::time::sleep(Duration::from_secs(30)) => Ok(AttemptOutcome::Success {
                records: Vec::new(),
                count: 0,
            }),
        }
    }
}

fn fast_config() -> EngineConfig {
    EngineConfig {
        max_attempts: 3,
        backoff: vec![Duration::from_millis(5)],
        ..EngineConfig::default()
    }
}

fn engine_with(runner: Arc<dyn TargetRunner>, config: EngineConfig) -> ExecutionEngine {
    ExecutionEngine::new(Arc::new(test_storage()), config, LogStream::new(100), runner)
}

fn request(targets: Vec<TargetConfig>) -> JobRequest {
    JobRequest {
        targets,
        scrape_type: "general_docket".to_string(),
        scrape_subtype: None,
        credential_ref: "cred-1".to_string(),
    }
}

async fn wait_terminal(engine: &ExecutionEngine, job_id: &str) -> crate::storage::types::JobRecord {
    for _ in 0..1000 {
        if let Some(job) = engine.storage().get_job(job_id).await.unwrap()
            && RunState::from_status(&job.status).is_some_and(RunState::is_terminal)
        {
            return job;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("job {} never reached a terminal state", job_id);
}

#[tokio::test]
async fn single_target_success_completes_the_job() {
    let runner = Arc::new(ScriptedRunner::new().script(
        "TRT15:1",
        vec![AttemptOutcome::Success {
            records: vec![json!({ "case": "001" })],
            count: 1,
        }],
    ));
    let engine = engine_with(runner, fast_config());

    let job_id = engine
        .submit(request(vec![TargetConfig::new("TRT15", 1)]))
        .await
        .unwrap();
    let job = wait_terminal(&engine, &job_id).await;
    assert_eq!(job.status, "completed");
    assert!(!job.partial);

    let targets = engine.storage().list_job_targets(&job_id).await.unwrap();
    assert_eq!(targets[0].status, "completed");
    assert_eq!(targets[0].attempts, 1);

    let executions = engine.storage().list_executions(&job_id).await.unwrap();
    assert_eq!(executions.len(), 1);
    assert_eq!(executions[0].status, "completed");
    assert_eq!(executions[0].result_count, Some(1));
    assert!(executions[0].result_payload.is_some());

    // Success lands in the normalized table too.
    let records = engine
        .storage()
        .list_scrape_records(&executions[0].execution_id, "general_docket")
        .await
        .unwrap();
    assert_eq!(records, vec![json!({ "case": "001" })]);
}

#[tokio::test]
async fn retryable_failure_is_retried_then_succeeds() {
    let runner = Arc::new(ScriptedRunner::new().script(
        "TRT15:1",
        vec![
            AttemptOutcome::Failure {
                message: "connect ECONNREFUSED".to_string(),
            },
            AttemptOutcome::Success {
                records: Vec::new(),
                count: 0,
            },
        ],
    ));
    let engine = engine_with(runner, fast_config());

    let job_id = engine
        .submit(request(vec![TargetConfig::new("TRT15", 1)]))
        .await
        .unwrap();
    let job = wait_terminal(&engine, &job_id).await;
    assert_eq!(job.status, "completed");

    let targets = engine.storage().list_job_targets(&job_id).await.unwrap();
    assert_eq!(targets[0].attempts, 2);

    let executions = engine.storage().list_executions(&job_id).await.unwrap();
    assert_eq!(executions.len(), 2);
    assert_eq!(executions[0].status, "failed");
    assert!(executions[0].error_payload.is_some());
    assert_eq!(executions[1].status, "completed");
}

#[tokio::test]
async fn retryable_failures_exhaust_the_attempt_budget() {
    let fail = || AttemptOutcome::Failure {
        message: "socket hang up".to_string(),
    };
    let runner = Arc::new(
        ScriptedRunner::new().script("TRT15:1", vec![fail(), fail(), fail(), fail()]),
    );
    let engine = engine_with(runner, fast_config());

    let job_id = engine
        .submit(request(vec![TargetConfig::new("TRT15", 1)]))
        .await
        .unwrap();
    let job = wait_terminal(&engine, &job_id).await;
    assert_eq!(job.status, "failed");

    let targets = engine.storage().list_job_targets(&job_id).await.unwrap();
    assert_eq!(targets[0].status, "failed");
    assert_eq!(targets[0].attempts, 3);
    assert!(targets[0].error_json.is_some());
    assert_eq!(
        engine.storage().list_executions(&job_id).await.unwrap().len(),
        3
    );
}

#[tokio::test]
async fn authentication_failure_is_not_retried() {
    let runner = Arc::new(ScriptedRunner::new().script(
        "TRT15:1",
        vec![AttemptOutcome::Failure {
            message: "Request failed with status code 401".to_string(),
        }],
    ));
    let engine = engine_with(runner, fast_config());

    let job_id = engine
        .submit(request(vec![TargetConfig::new("TRT15", 1)]))
        .await
        .unwrap();
    let job = wait_terminal(&engine, &job_id).await;
    assert_eq!(job.status, "failed");

    let targets = engine.storage().list_job_targets(&job_id).await.unwrap();
    assert_eq!(targets[0].attempts, 1);
    let error: serde_json::Value =
        serde_json::from_str(targets[0].error_json.as_ref().unwrap()).unwrap();
    assert_eq!(error["category"], "AUTHENTICATION");
}

#[tokio::test]
async fn one_exhausted_target_leaves_the_job_partially_completed() {
    let fail = || AttemptOutcome::Failure {
        message: "socket hang up".to_string(),
    };
    let runner = Arc::new(
        ScriptedRunner::new().script("TRT2:1", vec![fail(), fail(), fail()]),
    );
    let engine = engine_with(runner, fast_config());

    let job_id = engine
        .submit(request(vec![
            TargetConfig::new("TRT2", 1),
            TargetConfig::new("TRT15", 1),
            TargetConfig::new("STJ", 0),
        ]))
        .await
        .unwrap();
    let job = wait_terminal(&engine, &job_id).await;
    assert_eq!(job.status, "completed");
    assert!(job.partial);

    let targets = engine.storage().list_job_targets(&job_id).await.unwrap();
    let failed: Vec<_> = targets.iter().filter(|t| t.status == "failed").collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].code, "TRT2");
}

#[tokio::test]
async fn job_fails_only_when_no_target_completes() {
    let fail = || AttemptOutcome::Failure {
        message: "401 unauthorized".to_string(),
    };
    let runner = Arc::new(
        ScriptedRunner::new()
            .script("TRT2:1", vec![fail()])
            .script("TRT15:1", vec![fail()]),
    );
    let engine = engine_with(runner, fast_config());

    let job_id = engine
        .submit(request(vec![
            TargetConfig::new("TRT2", 1),
            TargetConfig::new("TRT15", 1),
        ]))
        .await
        .unwrap();
    let job = wait_terminal(&engine, &job_id).await;
    assert_eq!(job.status, "failed");
    assert!(!job.partial);
}

#[tokio::test]
async fn dispatch_follows_tribunal_order() {
    let runner = Arc::new(ScriptedRunner::new());
    let config = EngineConfig {
        max_targets_per_job: 1,
        ..fast_config()
    };
    let engine = engine_with(runner.clone(), config);

    let job_id = engine
        .submit(request(vec![
            TargetConfig::new("STJ", 0),
            TargetConfig::new("TRT15", 1),
            TargetConfig::new("TRT2", 1),
        ]))
        .await
        .unwrap();
    wait_terminal(&engine, &job_id).await;

    assert_eq!(runner.started_keys(), vec!["TRT2:1", "TRT15:1", "STJ:0"]);
}

#[tokio::test]
async fn per_job_ceiling_bounds_concurrent_targets() {
    let runner = Arc::new(ScriptedRunner::new());
    let config = EngineConfig {
        max_targets_per_job: 2,
        max_worker_processes: 10,
        ..fast_config()
    };
    let engine = engine_with(runner.clone(), config);

    let targets = (1..=6).map(|i| TargetConfig::new(&format!("TRT{}", i), 1)).collect();
    let job_id = engine.submit(request(targets)).await.unwrap();
    wait_terminal(&engine, &job_id).await;

    assert_eq!(runner.started_keys().len(), 6);
    assert!(runner.peak_in_flight() <= 2);
}

#[tokio::test]
async fn job_ceiling_bounds_concurrent_jobs() {
    let runner = Arc::new(ScriptedRunner::new());
    // One target per job, generous target and process slots: peak in-flight
    // attempts equals peak concurrently running jobs.
    let config = EngineConfig {
        max_concurrent_jobs: 2,
        max_targets_per_job: 8,
        max_worker_processes: 8,
        ..fast_config()
    };
    let engine = engine_with(runner.clone(), config);

    let mut job_ids = Vec::new();
    for _ in 0..5 {
        job_ids.push(
            engine
                .submit(request(vec![TargetConfig::new("TRT15", 1)]))
                .await
                .unwrap(),
        );
    }
    for job_id in &job_ids {
        assert_eq!(wait_terminal(&engine, job_id).await.status, "completed");
    }

    assert_eq!(runner.started_keys().len(), 5);
    assert!(runner.peak_in_flight() <= 2);
}

#[tokio::test]
async fn process_ceiling_bounds_attempts_across_jobs() {
    let runner = Arc::new(ScriptedRunner::new());
    let config = EngineConfig {
        max_concurrent_jobs: 4,
        max_targets_per_job: 4,
        max_worker_processes: 3,
        ..fast_config()
    };
    let engine = engine_with(runner.clone(), config);

    let mut job_ids = Vec::new();
    for _ in 0..3 {
        let targets = (1..=4).map(|i| TargetConfig::new(&format!("TRT{}", i), 1)).collect();
        job_ids.push(engine.submit(request(targets)).await.unwrap());
    }
    for job_id in &job_ids {
        wait_terminal(&engine, job_id).await;
    }

    assert!(runner.peak_in_flight() <= 3);
}

#[tokio::test]
async fn cancel_settles_running_and_pending_targets() {
    let engine = engine_with(Arc::new(BlockingRunner), fast_config());

    let job_id = engine
        .submit(request(vec![
            TargetConfig::new("TRT2", 1),
            TargetConfig::new("TRT15", 1),
            TargetConfig::new("STJ", 0),
            TargetConfig::new("TST", 0),
        ]))
        .await
        .unwrap();
    // Give the executor a moment to start dispatching.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(engine.cancel(&job_id).await.unwrap());

    let job = wait_terminal(&engine, &job_id).await;
    assert_eq!(job.status, "canceled");
    for target in engine.storage().list_job_targets(&job_id).await.unwrap() {
        assert_eq!(target.status, "canceled");
    }
}

#[tokio::test]
async fn cancel_of_a_terminal_job_is_a_no_op() {
    let engine = engine_with(Arc::new(ScriptedRunner::new()), fast_config());

    let job_id = engine
        .submit(request(vec![TargetConfig::new("TRT15", 1)]))
        .await
        .unwrap();
    wait_terminal(&engine, &job_id).await;

    assert!(!engine.cancel(&job_id).await.unwrap());
    assert!(engine.cancel("missing-job").await.is_err());
}

#[tokio::test]
async fn submit_rejects_empty_requests() {
    let engine = engine_with(Arc::new(ScriptedRunner::new()), fast_config());
    assert!(engine.submit(request(Vec::new())).await.is_err());

    let mut no_type = request(vec![TargetConfig::new("TRT15", 1)]);
    no_type.scrape_type = "  ".to_string();
    assert!(engine.submit(no_type).await.is_err());
}
