use std::sync::Arc;

use async_trait::async_trait;
use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        types::document::{Document, DocumentStatus},
    },
};

/// Reflects ingestion outcomes onto the owning document.
///
/// Implementations must be idempotent and return `AppError::NotFound` when
/// the document does not exist.
#[async_trait]
pub trait DocumentStatusBridge: Send + Sync {
    async fn set_status(&self, document_id: &str, status: DocumentStatus) -> Result<(), AppError>;
}

/// Writes document status straight into the `document` table.
pub struct SurrealDocumentBridge {
    db: Arc<SurrealDbClient>,
}

impl SurrealDocumentBridge {
    pub fn new(db: Arc<SurrealDbClient>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl DocumentStatusBridge for SurrealDocumentBridge {
    async fn set_status(&self, document_id: &str, status: DocumentStatus) -> Result<(), AppError> {
        match Document::set_status(&self.db, document_id, status).await {
            Ok(_) => Ok(()),
            Err(AppError::NotFound(msg)) => Err(AppError::NotFound(msg)),
            Err(err) => Err(AppError::Bridge(format!(
                "failed to set document {document_id} to {}: {err}",
                status.as_str()
            ))),
        }
    }
}
