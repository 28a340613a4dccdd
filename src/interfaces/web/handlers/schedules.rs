use axum::{
    Json,
    extract::{Path, State},
};

use super::super::AppState;
use crate::scheduler::frequency::{self, Frequency};
use crate::storage::types::TargetConfig;

#[derive(serde::Deserialize)]
pub struct ScheduleRequest {
    name: String,
    /// Structured frequency, translated to cron server-side.
    #[serde(default)]
    frequency: Option<Frequency>,
    /// Raw cron expression, for callers that want full control.
    #[serde(default)]
    cron: Option<String>,
    #[serde(default)]
    timezone: Option<String>,
    targets: Vec<TargetConfig>,
    scrape_type: String,
    #[serde(default)]
    scrape_subtype: Option<String>,
    credential_ref: String,
}

/// Resolves the schedule fields shared by create and update. Returns the
/// stored cron expression and timezone, or a caller-facing error.
fn resolve_schedule(
    payload: &ScheduleRequest,
    default_timezone: &str,
) -> Result<(String, String), String> {
    if payload.name.trim().is_empty() {
        return Err("name is required".to_string());
    }
    if payload.targets.is_empty() {
        return Err("at least one target is required".to_string());
    }
    if payload.scrape_type.trim().is_empty() {
        return Err("scrape_type is required".to_string());
    }
    if payload.credential_ref.trim().is_empty() {
        return Err("credential_ref is required".to_string());
    }

    let cron = match (&payload.frequency, &payload.cron) {
        (Some(frequency), _) => {
            frequency::to_cron(frequency).map_err(|e| format!("Invalid frequency: {}", e))?
        }
        (None, Some(cron)) => {
            frequency::normalize(cron).map_err(|e| format!("Invalid cron expression: {}", e))?;
            cron.trim().to_string()
        }
        (None, None) => return Err("either frequency or cron is required".to_string()),
    };

    let timezone = match &payload.timezone {
        Some(tz) => {
            frequency::parse_timezone(tz).map_err(|e| format!("{}", e))?;
            tz.trim().to_string()
        }
        None => default_timezone.to_string(),
    };
    Ok((cron, timezone))
}

pub async fn create_schedule_endpoint(
    State(state): State<AppState>,
    Json(payload): Json<ScheduleRequest>,
) -> Json<serde_json::Value> {
    let (cron, timezone) = match resolve_schedule(&payload, state.scheduler.default_timezone()) {
        Ok(resolved) => resolved,
        Err(e) => return Json(serde_json::json!({ "success": false, "error": e })),
    };

    let next_run = state.scheduler.next_run_stamp(&cron, &timezone);
    let definition = match state
        .storage
        .create_definition(
            payload.name.trim(),
            &cron,
            &timezone,
            &payload.targets,
            payload.scrape_type.trim(),
            payload.scrape_subtype.as_deref(),
            payload.credential_ref.trim(),
            next_run.as_deref(),
        )
        .await
    {
        Ok(definition) => definition,
        Err(e) => {
            return Json(serde_json::json!({
                "success": false,
                "error": format!("Failed to write schedule to DB: {}", e)
            }));
        }
    };

    // Roll the row back if the runtime scheduler refuses the timer.
    if let Err(e) = state.scheduler.register(&definition).await {
        if let Err(rollback) = state
            .storage
            .delete_definition(&definition.definition_id)
            .await
        {
            tracing::warn!(
                "Failed to roll back definition {} after register failure: {}",
                definition.definition_id,
                rollback
            );
        }
        return Json(serde_json::json!({
            "success": false,
            "error": format!("Failed to register schedule: {}", e)
        }));
    }

    Json(serde_json::json!({ "success": true, "schedule": definition }))
}

pub async fn list_schedules_endpoint(State(state): State<AppState>) -> Json<serde_json::Value> {
    match state.storage.list_definitions().await {
        Ok(definitions) => Json(serde_json::json!({
            "success": true,
            "schedules": definitions
        })),
        Err(e) => Json(serde_json::json!({
            "success": false,
            "error": format!("Database error: {}", e)
        })),
    }
}

pub async fn get_schedule_endpoint(
    Path(definition_id): Path<String>,
    State(state): State<AppState>,
) -> Json<serde_json::Value> {
    match state.storage.get_definition(&definition_id).await {
        Ok(Some(definition)) => Json(serde_json::json!({
            "success": true,
            "schedule": definition
        })),
        Ok(None) => Json(serde_json::json!({
            "success": false,
            "error": "Schedule not found"
        })),
        Err(e) => Json(serde_json::json!({
            "success": false,
            "error": format!("Database error: {}", e)
        })),
    }
}

/// Full replace of the schedule fields. Run history is left untouched and the
/// timer is re-registered when the definition is active.
pub async fn update_schedule_endpoint(
    Path(definition_id): Path<String>,
    State(state): State<AppState>,
    Json(payload): Json<ScheduleRequest>,
) -> Json<serde_json::Value> {
    let (cron, timezone) = match resolve_schedule(&payload, state.scheduler.default_timezone()) {
        Ok(resolved) => resolved,
        Err(e) => return Json(serde_json::json!({ "success": false, "error": e })),
    };

    let next_run = state.scheduler.next_run_stamp(&cron, &timezone);
    match state
        .storage
        .update_definition(
            &definition_id,
            payload.name.trim(),
            &cron,
            &timezone,
            &payload.targets,
            payload.scrape_type.trim(),
            payload.scrape_subtype.as_deref(),
            payload.credential_ref.trim(),
            next_run.as_deref(),
        )
        .await
    {
        Ok(true) => {}
        Ok(false) => {
            return Json(serde_json::json!({
                "success": false,
                "error": "Schedule not found"
            }));
        }
        Err(e) => {
            return Json(serde_json::json!({
                "success": false,
                "error": format!("Database error: {}", e)
            }));
        }
    }

    let definition = match state.storage.get_definition(&definition_id).await {
        Ok(Some(definition)) => definition,
        _ => {
            return Json(serde_json::json!({
                "success": false,
                "error": "Schedule not found"
            }));
        }
    };
    if definition.active
        && let Err(e) = state.scheduler.register(&definition).await
    {
        return Json(serde_json::json!({
            "success": false,
            "error": format!("Schedule updated but timer registration failed: {}", e)
        }));
    }
    Json(serde_json::json!({ "success": true, "schedule": definition }))
}

/// Flips the active flag: pausing stops the timer without touching history,
/// reactivating registers a fresh timer.
pub async fn toggle_schedule_endpoint(
    Path(definition_id): Path<String>,
    State(state): State<AppState>,
) -> Json<serde_json::Value> {
    let definition = match state.storage.get_definition(&definition_id).await {
        Ok(Some(definition)) => definition,
        Ok(None) => {
            return Json(serde_json::json!({
                "success": false,
                "error": "Schedule not found"
            }));
        }
        Err(e) => {
            return Json(serde_json::json!({
                "success": false,
                "error": format!("Database error: {}", e)
            }));
        }
    };

    let active = !definition.active;
    if let Err(e) = state
        .storage
        .set_definition_active(&definition_id, active)
        .await
    {
        return Json(serde_json::json!({
            "success": false,
            "error": format!("Database error: {}", e)
        }));
    }

    let result = if active {
        state.scheduler.resume(&definition_id).await
    } else {
        state.scheduler.pause(&definition_id).await
    };
    match result {
        Ok(()) => Json(serde_json::json!({ "success": true, "active": active })),
        Err(e) => Json(serde_json::json!({
            "success": false,
            "error": format!("Schedule flag updated but timer change failed: {}", e)
        })),
    }
}

pub async fn delete_schedule_endpoint(
    Path(definition_id): Path<String>,
    State(state): State<AppState>,
) -> Json<serde_json::Value> {
    if let Err(e) = state.scheduler.unregister(&definition_id).await {
        tracing::warn!(
            "Failed to unschedule timer for definition {}: {}",
            definition_id,
            e
        );
    }
    match state.storage.delete_definition(&definition_id).await {
        Ok(true) => Json(serde_json::json!({
            "success": true,
            "message": "Schedule removed"
        })),
        Ok(false) => Json(serde_json::json!({
            "success": false,
            "error": "Schedule not found"
        })),
        Err(e) => Json(serde_json::json!({
            "success": false,
            "error": format!("Database error: {}", e)
        })),
    }
}
