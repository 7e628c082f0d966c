use api_state::ApiState;
use axum::{
    extract::FromRef,
    routing::{get, patch, post},
    Router,
};
use routes::{
    ingestion::{cancel_job, create_job, get_job, get_jobs_by_document, list_jobs, trigger_ingestion},
    liveness::live,
    readiness::ready,
};

pub mod api_state;
pub mod error;
mod routes;

/// Router for API functionality, version 1
pub fn api_routes_v1<S>(_app_state: &ApiState) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
    ApiState: FromRef<S>,
{
    // Probes for k8s/systemd
    let public = Router::new()
        .route("/ready", get(ready))
        .route("/live", get(live));

    // Authorization is enforced in front of this router.
    let ingestion = Router::new()
        .route("/ingestion", post(create_job).get(list_jobs))
        .route("/ingestion/trigger", post(trigger_ingestion))
        .route("/ingestion/document/{document_id}", get(get_jobs_by_document))
        .route("/ingestion/{id}", get(get_job))
        .route("/ingestion/{id}/cancel", patch(cancel_job));

    public.merge(ingestion)
}
