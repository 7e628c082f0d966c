use std::sync::Arc;

use common::{
    error::AppError,
    storage::{db::SurrealDbClient, types::ingestion_job::IngestionJob},
};

/// Read-only access to stored ingestion jobs.
#[derive(Clone)]
pub struct JobQuery {
    db: Arc<SurrealDbClient>,
}

impl JobQuery {
    pub fn new(db: Arc<SurrealDbClient>) -> Self {
        Self { db }
    }

    pub async fn find_one(&self, job_id: &str) -> Result<IngestionJob, AppError> {
        IngestionJob::get(&self.db, job_id).await
    }

    /// All jobs, newest first.
    pub async fn find_all(&self) -> Result<Vec<IngestionJob>, AppError> {
        IngestionJob::list_all(&self.db).await
    }

    /// Jobs for one document, newest first. Unknown documents yield an empty list.
    pub async fn get_jobs_by_document(
        &self,
        document_id: &str,
    ) -> Result<Vec<IngestionJob>, AppError> {
        IngestionJob::list_by_document(&self.db, document_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[tokio::test]
    async fn unknown_ids_behave_as_documented() {
        let db = Arc::new(
            SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
                .await
                .expect("in-memory surrealdb"),
        );
        let query = JobQuery::new(db);

        let err = query.find_one("missing").await.expect_err("unknown job");
        assert!(err.is_not_found());
        assert!(err.to_string().contains("Ingestion job with ID missing not found"));

        let jobs = query
            .get_jobs_by_document("no-such-doc")
            .await
            .expect("empty listing");
        assert!(jobs.is_empty());
        assert!(query.find_all().await.expect("list").is_empty());
    }
}
