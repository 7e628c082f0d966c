use std::sync::Arc;

use common::storage::db::SurrealDbClient;
use ingestion_pipeline::IngestionOrchestrator;

#[derive(Clone)]
pub struct ApiState {
    pub db: Arc<SurrealDbClient>,
    pub orchestrator: IngestionOrchestrator,
}

impl ApiState {
    pub fn new(db: Arc<SurrealDbClient>, orchestrator: IngestionOrchestrator) -> Self {
        Self { db, orchestrator }
    }
}
