use std::convert::Infallible;

use axum::{
    Json,
    extract::{Path, Query, State},
    response::sse::{Event, Sse},
};
use tokio_stream::{Stream, StreamExt, wrappers::BroadcastStream};

use super::super::AppState;
use crate::engine::JobRequest;
use crate::engine::loader::DataLoader;
use crate::storage::types::JobTargetRecord;

pub async fn submit_job_endpoint(
    State(state): State<AppState>,
    Json(payload): Json<JobRequest>,
) -> Json<serde_json::Value> {
    match state.engine.submit(payload).await {
        Ok(job_id) => Json(serde_json::json!({
            "success": true,
            "job_id": job_id
        })),
        Err(e) => Json(serde_json::json!({
            "success": false,
            "error": format!("{}", e)
        })),
    }
}

pub async fn cancel_job_endpoint(
    Path(job_id): Path<String>,
    State(state): State<AppState>,
) -> Json<serde_json::Value> {
    match state.engine.cancel(&job_id).await {
        Ok(true) => Json(serde_json::json!({
            "success": true,
            "canceled": true,
            "message": "Cancellation requested"
        })),
        // Already terminal; cancellation is an idempotent acknowledgement.
        Ok(false) => Json(serde_json::json!({
            "success": true,
            "canceled": false,
            "message": "Job already finished"
        })),
        Err(e) => Json(serde_json::json!({
            "success": false,
            "error": format!("{}", e)
        })),
    }
}

#[derive(serde::Deserialize)]
pub struct JobQuery {
    limit: Option<usize>,
    logs: Option<usize>,
}

fn target_json(target: &JobTargetRecord) -> serde_json::Value {
    let error = target
        .error_json
        .as_deref()
        .and_then(|raw| serde_json::from_str::<serde_json::Value>(raw).ok());
    serde_json::json!({
        "target_id": target.target_id,
        "tribunal": target.code,
        "degree": target.degree,
        "status": target.status,
        "attempts": target.attempts,
        "error": error,
        "completed_at": target.completed_at,
    })
}

/// Consolidated status: the job row, every target with its classified error,
/// aggregate counts, the execution history and the recent log tail, in one
/// response.
pub async fn get_job_endpoint(
    Path(job_id): Path<String>,
    Query(query): Query<JobQuery>,
    State(state): State<AppState>,
) -> Json<serde_json::Value> {
    let job = match state.storage.get_job(&job_id).await {
        Ok(Some(job)) => job,
        Ok(None) => {
            return Json(serde_json::json!({
                "success": false,
                "error": "Job not found"
            }));
        }
        Err(e) => {
            return Json(serde_json::json!({
                "success": false,
                "error": format!("Database error: {}", e)
            }));
        }
    };

    let targets = match state.storage.list_job_targets(&job_id).await {
        Ok(targets) => targets,
        Err(e) => {
            return Json(serde_json::json!({
                "success": false,
                "error": format!("Database error: {}", e)
            }));
        }
    };
    let executions = match state.storage.list_executions(&job_id).await {
        Ok(executions) => executions,
        Err(e) => {
            return Json(serde_json::json!({
                "success": false,
                "error": format!("Database error: {}", e)
            }));
        }
    };

    let targets_completed = targets.iter().filter(|t| t.status == "completed").count();
    let targets_failed = targets.iter().filter(|t| t.status == "failed").count();
    let result_count: i64 = executions
        .iter()
        .filter(|e| e.status == "completed")
        .filter_map(|e| e.result_count)
        .sum();
    let executions = executions
        .iter()
        .map(|e| {
            serde_json::json!({
                "execution_id": e.execution_id,
                "target_id": e.target_id,
                "attempt": e.attempt,
                "status": e.status,
                "started_at": e.started_at,
                "completed_at": e.completed_at,
                "result_count": e.result_count,
            })
        })
        .collect::<Vec<_>>();

    let log_tail = state
        .engine
        .logs()
        .tail(&job_id, query.logs.unwrap_or(50))
        .await;

    Json(serde_json::json!({
        "success": true,
        "job": {
            "job_id": job.job_id,
            "status": job.status,
            "partial": job.partial,
            "scrape_type": job.scrape_type,
            "scrape_subtype": job.scrape_subtype,
            "created_at": job.created_at,
            "started_at": job.started_at,
            "completed_at": job.completed_at,
        },
        "targets": targets.iter().map(target_json).collect::<Vec<_>>(),
        "counts": {
            "targets_total": targets.len(),
            "targets_completed": targets_completed,
            "targets_failed": targets_failed,
            "result_count": result_count,
        },
        "executions": executions,
        "logs": log_tail,
    }))
}

pub async fn list_jobs_endpoint(
    Query(query): Query<JobQuery>,
    State(state): State<AppState>,
) -> Json<serde_json::Value> {
    match state.storage.list_jobs(query.limit.unwrap_or(50)).await {
        Ok(jobs) => Json(serde_json::json!({
            "success": true,
            "jobs": jobs
        })),
        Err(e) => Json(serde_json::json!({
            "success": false,
            "error": format!("Database error: {}", e)
        })),
    }
}

/// Scraped records for one execution, resolved through the hybrid loader
/// (normalized table first, inlined payload as fallback).
pub async fn get_execution_records_endpoint(
    Path((job_id, execution_id)): Path<(String, String)>,
    State(state): State<AppState>,
) -> Json<serde_json::Value> {
    let job = match state.storage.get_job(&job_id).await {
        Ok(Some(job)) => job,
        Ok(None) => {
            return Json(serde_json::json!({
                "success": false,
                "error": "Job not found"
            }));
        }
        Err(e) => {
            return Json(serde_json::json!({
                "success": false,
                "error": format!("Database error: {}", e)
            }));
        }
    };
    match state.storage.get_execution(&execution_id).await {
        Ok(Some(execution)) if execution.job_id == job_id => {}
        Ok(_) => {
            return Json(serde_json::json!({
                "success": false,
                "error": "Execution not found for this job"
            }));
        }
        Err(e) => {
            return Json(serde_json::json!({
                "success": false,
                "error": format!("Database error: {}", e)
            }));
        }
    }

    let loader = DataLoader::new(state.storage.clone());
    match loader.load(&execution_id, &job.scrape_type).await {
        Ok(records) => Json(serde_json::json!({
            "success": true,
            "count": records.len(),
            "records": records
        })),
        Err(e) => Json(serde_json::json!({
            "success": false,
            "error": format!("Failed to load records: {}", e)
        })),
    }
}

/// Live log stream for one job as server-sent events, one JSON entry per
/// event. A lagging consumer sees a marker entry instead of missed lines.
pub async fn stream_job_logs_endpoint(
    Path(job_id): Path<String>,
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let receiver = state.engine.logs().subscribe(&job_id).await;
    let stream = BroadcastStream::new(receiver).map(|msg| match msg {
        Ok(entry) => Ok(Event::default().data(
            serde_json::to_string(&entry).unwrap_or_else(|_| "{}".to_string()),
        )),
        Err(_) => Ok(Event::default()
            .data(r#"{"level":"warn","message":"Log stream lagged"}"#)),
    });
    Sse::new(stream)
}
