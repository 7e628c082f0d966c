use surrealdb::sql::Datetime as SurrealDatetime;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

/// Lifecycle of an uploaded document as seen by the ingestion pipeline.
#[derive(Debug, Default, Clone, Copy, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub enum DocumentStatus {
    #[serde(rename = "pending")]
    #[default]
    Pending,
    #[serde(rename = "processing")]
    Processing,
    #[serde(rename = "completed")]
    Completed,
    #[serde(rename = "failed")]
    Failed,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Pending => "pending",
            DocumentStatus::Processing => "processing",
            DocumentStatus::Completed => "completed",
            DocumentStatus::Failed => "failed",
        }
    }
}

stored_object!(Document, "document", {
    status: DocumentStatus
});

impl Document {
    pub fn with_id(id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            status: DocumentStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }

    /// Writes the status of an existing document. Repeating the same status is harmless.
    pub async fn set_status(
        db: &SurrealDbClient,
        id: &str,
        status: DocumentStatus,
    ) -> Result<Document, AppError> {
        const SET_STATUS_QUERY: &str = r#"
            UPDATE type::thing($table, $id)
            SET status = $status,
                updated_at = $now
            RETURN AFTER;
        "#;

        let mut result = db
            .client
            .query(SET_STATUS_QUERY)
            .bind(("table", Self::table_name()))
            .bind(("id", id.to_string()))
            .bind(("status", status.as_str()))
            .bind(("now", SurrealDatetime::from(Utc::now())))
            .await?;

        let updated: Option<Document> = result.take(0)?;
        updated.ok_or_else(|| AppError::NotFound(format!("Document with ID {id} not found")))
    }
}
