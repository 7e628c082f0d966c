use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde_json::json;

use crate::api_state::ApiState;

/// Readiness probe: 200 while the store answers and the orchestrator takes
/// new jobs, 503 otherwise.
pub async fn ready(State(state): State<ApiState>) -> impl IntoResponse {
    let db_check = state.db.client.query("RETURN true").await;
    let accepting = state.orchestrator.accepting_jobs();
    let jobs_in_flight = state.orchestrator.in_flight();

    match db_check {
        Ok(_) if accepting => (
            StatusCode::OK,
            Json(json!({
                "status": "ok",
                "checks": { "db": "ok", "orchestrator": "ok" },
                "jobsInFlight": jobs_in_flight
            })),
        ),
        Ok(_) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "status": "error",
                "checks": { "db": "ok", "orchestrator": "shutting_down" },
                "jobsInFlight": jobs_in_flight
            })),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "status": "error",
                "checks": { "db": "fail" },
                "reason": e.to_string()
            })),
        ),
    }
}
