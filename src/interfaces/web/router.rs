use axum::{
    Router,
    body::Body,
    http::{HeaderValue, Method, Request, header},
    middleware,
    middleware::Next,
    routing::{get, post},
};
use tower_http::cors::CorsLayer;

use super::AppState;
use super::handlers::{jobs, schedules};

fn build_localhost_cors(api_port: u16) -> CorsLayer {
    let origins: Vec<HeaderValue> = [
        format!("http://127.0.0.1:{}", api_port),
        format!("http://localhost:{}", api_port),
    ]
    .iter()
    .filter_map(|o| o.parse().ok())
    .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::DELETE,
            Method::PATCH,
            Method::OPTIONS,
        ])
        .allow_headers(tower_http::cors::Any)
}

pub fn build_api_router(state: AppState) -> Router {
    Router::new()
        .route(
            "/api/jobs",
            get(jobs::list_jobs_endpoint).post(jobs::submit_job_endpoint),
        )
        .route("/api/jobs/{job_id}", get(jobs::get_job_endpoint))
        .route("/api/jobs/{job_id}/cancel", post(jobs::cancel_job_endpoint))
        .route(
            "/api/jobs/{job_id}/executions/{execution_id}/records",
            get(jobs::get_execution_records_endpoint),
        )
        .route(
            "/api/jobs/{job_id}/logs/stream",
            get(jobs::stream_job_logs_endpoint),
        )
        .route(
            "/api/schedules",
            get(schedules::list_schedules_endpoint).post(schedules::create_schedule_endpoint),
        )
        .route(
            "/api/schedules/{definition_id}",
            get(schedules::get_schedule_endpoint)
                .patch(schedules::update_schedule_endpoint)
                .delete(schedules::delete_schedule_endpoint),
        )
        .route(
            "/api/schedules/{definition_id}/toggle",
            post(schedules::toggle_schedule_endpoint),
        )
        .layer(middleware::from_fn(security_headers))
        .layer(build_localhost_cors(state.api_port))
        .with_state(state)
}

async fn security_headers(req: Request<Body>, next: Next) -> axum::response::Response {
    let mut response = next.run(req).await;
    let headers = response.headers_mut();
    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    response
}
