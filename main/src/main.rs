use api_router::{api_routes_v1, api_state::ApiState};
use axum::{extract::FromRef, Router};
use common::{
    storage::db::SurrealDbClient,
    utils::config::{get_config, AppConfig},
};
use ingestion_pipeline::{
    IngestionConfig, IngestionOrchestrator, SimulatedProcessingUnit, SurrealDocumentBridge,
};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Set up tracing
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .try_init()
        .ok();

    // Get config
    let config = get_config()?;

    let db = Arc::new(
        SurrealDbClient::new(
            &config.surrealdb_address,
            &config.surrealdb_username,
            &config.surrealdb_password,
            &config.surrealdb_namespace,
            &config.surrealdb_database,
        )
        .await?,
    );

    // Ensure db is initialized
    db.ensure_initialized().await?;

    let orchestrator = build_orchestrator(&db, &config);
    let resumed = orchestrator.resume_unfinished().await?;
    info!(
        rescheduled = resumed.rescheduled,
        interrupted = resumed.interrupted,
        "Recovered unfinished ingestion jobs"
    );

    let api_state = ApiState::new(Arc::clone(&db), orchestrator.clone());
    let app = build_app(api_state);

    info!("Starting server listening on 0.0.0.0:{}", config.http_port);
    let serve_address = format!("0.0.0.0:{}", config.http_port);
    let listener = tokio::net::TcpListener::bind(serve_address).await?;

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!("Server error: {}", e);
    }

    orchestrator.shutdown().await;
    info!("Ingestion orchestrator stopped");

    Ok(())
}

fn build_orchestrator(db: &Arc<SurrealDbClient>, config: &AppConfig) -> IngestionOrchestrator {
    let ingestion_config = IngestionConfig::from(config);
    let unit = SimulatedProcessingUnit::from_tuning(&ingestion_config.tuning);

    IngestionOrchestrator::new(
        Arc::clone(db),
        Arc::new(SurrealDocumentBridge::new(Arc::clone(db))),
        Arc::new(unit),
        ingestion_config,
    )
}

fn build_app(api_state: ApiState) -> Router {
    Router::new()
        .nest("/api/v1", api_routes_v1(&api_state))
        .with_state(AppState { api_state })
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

#[derive(Clone, FromRef)]
struct AppState {
    api_state: ApiState,
}
