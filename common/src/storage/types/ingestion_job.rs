use state_machines::state_machine;
use surrealdb::sql::Datetime as SurrealDatetime;
use tracing::debug;
use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

pub const MAX_PROGRESS: u8 = 100;

#[derive(Debug, Default, Clone, Copy, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub enum JobStatus {
    #[serde(rename = "pending")]
    #[default]
    Pending,
    #[serde(rename = "running")]
    Running,
    #[serde(rename = "completed")]
    Completed,
    #[serde(rename = "failed")]
    Failed,
}

impl JobStatus {
    pub const ALL: [JobStatus; 4] = [
        JobStatus::Pending,
        JobStatus::Running,
        JobStatus::Completed,
        JobStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JobTransition {
    Start,
    Complete,
    Fail,
    Abandon,
}

impl JobTransition {
    fn as_str(self) -> &'static str {
        match self {
            JobTransition::Start => "start",
            JobTransition::Complete => "complete",
            JobTransition::Fail => "fail",
            JobTransition::Abandon => "abandon",
        }
    }
}

mod lifecycle {
    use super::state_machine;

    state_machine! {
        name: JobLifecycleMachine,
        initial: Pending,
        states: [Pending, Running, Completed, Failed],
        events {
            start {
                transition: { from: Pending, to: Running }
            }
            complete {
                transition: { from: Running, to: Completed }
            }
            fail {
                transition: { from: Running, to: Failed }
            }
            abandon {
                transition: { from: Pending, to: Failed }
                transition: { from: Running, to: Failed }
            }
        }
    }

    pub(super) fn pending() -> JobLifecycleMachine<(), Pending> {
        JobLifecycleMachine::new(())
    }

    pub(super) fn running() -> JobLifecycleMachine<(), Running> {
        pending()
            .start()
            .expect("start transition from Pending should exist")
    }
}

fn invalid_transition(state: JobStatus, event: JobTransition) -> AppError {
    AppError::InvalidTransition(format!(
        "ingestion job cannot {} from {}",
        event.as_str(),
        state.as_str()
    ))
}

fn compute_next_state(state: JobStatus, event: JobTransition) -> Result<JobStatus, AppError> {
    use lifecycle::{pending, running};
    match (state, event) {
        (JobStatus::Pending, JobTransition::Start) => pending()
            .start()
            .map(|_| JobStatus::Running)
            .map_err(|_| invalid_transition(state, event)),
        (JobStatus::Running, JobTransition::Complete) => running()
            .complete()
            .map(|_| JobStatus::Completed)
            .map_err(|_| invalid_transition(state, event)),
        (JobStatus::Running, JobTransition::Fail) => running()
            .fail()
            .map(|_| JobStatus::Failed)
            .map_err(|_| invalid_transition(state, event)),
        (JobStatus::Pending, JobTransition::Abandon) => pending()
            .abandon()
            .map(|_| JobStatus::Failed)
            .map_err(|_| invalid_transition(state, event)),
        (JobStatus::Running, JobTransition::Abandon) => running()
            .abandon()
            .map(|_| JobStatus::Failed)
            .map_err(|_| invalid_transition(state, event)),
        _ => Err(invalid_transition(state, event)),
    }
}

/// Statuses a job may be in for `event` to apply.
fn source_states(event: JobTransition) -> Vec<JobStatus> {
    JobStatus::ALL
        .into_iter()
        .filter(|state| compute_next_state(*state, event).is_ok())
        .collect()
}

fn status_strs(states: &[JobStatus]) -> Vec<&'static str> {
    states.iter().map(JobStatus::as_str).collect()
}

/// A requested mutation of a job's status columns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusUpdate {
    pub status: JobStatus,
    pub progress: Option<u8>,
    pub error_message: Option<String>,
}

impl StatusUpdate {
    pub fn new(status: JobStatus) -> Self {
        Self {
            status,
            progress: None,
            error_message: None,
        }
    }

    #[must_use]
    pub fn with_progress(mut self, progress: u8) -> Self {
        self.progress = Some(progress);
        self
    }

    #[must_use]
    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }
}

stored_object!(IngestionJob, "ingestion_job", {
    document_id: String,
    status: JobStatus,
    progress: Option<u8>,
    error_message: Option<String>,
    metadata: Option<serde_json::Value>
});

impl IngestionJob {
    pub fn new(document_id: String, metadata: Option<serde_json::Value>) -> Self {
        let now = Utc::now();

        Self {
            id: Uuid::new_v4().to_string(),
            document_id,
            status: JobStatus::Pending,
            progress: None,
            error_message: None,
            metadata,
            created_at: now,
            updated_at: now,
        }
    }

    pub async fn create_and_add_to_db(
        document_id: String,
        metadata: Option<serde_json::Value>,
        db: &SurrealDbClient,
    ) -> Result<IngestionJob, AppError> {
        let job = Self::new(document_id, metadata);
        db.store_item(job.clone()).await?;
        Ok(job)
    }

    pub async fn get(db: &SurrealDbClient, id: &str) -> Result<IngestionJob, AppError> {
        db.get_item::<IngestionJob>(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Ingestion job with ID {id} not found")))
    }

    /// Applies `update` in a single conditional statement.
    ///
    /// Returns the updated job, `None` when the lifecycle guard rejected the
    /// write (terminal job, illegal transition or progress regression), and
    /// `NotFound` when no job has this id.
    pub async fn update_status(
        db: &SurrealDbClient,
        id: &str,
        update: StatusUpdate,
    ) -> Result<Option<IngestionJob>, AppError> {
        let sources = match update.status {
            JobStatus::Pending => Vec::new(),
            JobStatus::Running => {
                let mut sources = source_states(JobTransition::Start);
                sources.push(JobStatus::Running);
                sources
            }
            JobStatus::Completed => source_states(JobTransition::Complete),
            JobStatus::Failed => source_states(JobTransition::Abandon),
        };

        Self::apply_guarded(db, id, &sources, update).await
    }

    pub async fn mark_running(
        db: &SurrealDbClient,
        id: &str,
    ) -> Result<Option<IngestionJob>, AppError> {
        Self::apply_guarded(
            db,
            id,
            &source_states(JobTransition::Start),
            StatusUpdate::new(JobStatus::Running).with_progress(0),
        )
        .await
    }

    /// Persists a progress value for a running job. Values below the stored
    /// progress are rejected.
    pub async fn record_progress(
        db: &SurrealDbClient,
        id: &str,
        progress: u8,
    ) -> Result<Option<IngestionJob>, AppError> {
        Self::apply_guarded(
            db,
            id,
            &[JobStatus::Running],
            StatusUpdate::new(JobStatus::Running).with_progress(progress),
        )
        .await
    }

    pub async fn mark_completed(
        db: &SurrealDbClient,
        id: &str,
    ) -> Result<Option<IngestionJob>, AppError> {
        Self::apply_guarded(
            db,
            id,
            &source_states(JobTransition::Complete),
            StatusUpdate::new(JobStatus::Completed).with_progress(MAX_PROGRESS),
        )
        .await
    }

    /// Fails a running job. The stored progress is left as it is.
    pub async fn mark_failed(
        db: &SurrealDbClient,
        id: &str,
        message: &str,
    ) -> Result<Option<IngestionJob>, AppError> {
        Self::apply_guarded(
            db,
            id,
            &source_states(JobTransition::Fail),
            StatusUpdate::new(JobStatus::Failed).with_error(message),
        )
        .await
    }

    /// Fails a running job on behalf of a canceller, pinning progress to the
    /// value the canceller observed.
    pub async fn mark_cancelled(
        db: &SurrealDbClient,
        id: &str,
        message: &str,
        observed_progress: Option<u8>,
    ) -> Result<Option<IngestionJob>, AppError> {
        let mut update = StatusUpdate::new(JobStatus::Failed).with_error(message);
        if let Some(progress) = observed_progress {
            update = update.with_progress(progress);
        }
        Self::apply_guarded(db, id, &source_states(JobTransition::Fail), update).await
    }

    /// Fails a job that is pending or running without a live owner.
    pub async fn mark_abandoned(
        db: &SurrealDbClient,
        id: &str,
        message: &str,
    ) -> Result<Option<IngestionJob>, AppError> {
        Self::apply_guarded(
            db,
            id,
            &source_states(JobTransition::Abandon),
            StatusUpdate::new(JobStatus::Failed).with_error(message),
        )
        .await
    }

    async fn apply_guarded(
        db: &SurrealDbClient,
        id: &str,
        sources: &[JobStatus],
        update: StatusUpdate,
    ) -> Result<Option<IngestionJob>, AppError> {
        if let Some(progress) = update.progress {
            if progress > MAX_PROGRESS {
                return Err(AppError::Validation(format!(
                    "progress must be within 0..={MAX_PROGRESS}, got {progress}"
                )));
            }
        }

        let mut assignments = vec!["status = $status", "updated_at = $now"];
        let mut conditions = vec!["status IN $sources"];
        if update.progress.is_some() {
            assignments.push("progress = $progress");
            if update.status == JobStatus::Running {
                conditions.push("(status != $running OR progress = NONE OR progress <= $progress)");
            }
        }
        if update.status == JobStatus::Pending {
            assignments.push("progress = NONE");
        }
        if update.error_message.is_some() {
            assignments.push("error_message = $error_message");
        } else {
            assignments.push("error_message = NONE");
        }

        let query = format!(
            "UPDATE type::thing($table, $id) SET {} WHERE {} RETURN AFTER;",
            assignments.join(", "),
            conditions.join(" AND ")
        );

        let mut result = db
            .client
            .query(query)
            .bind(("table", Self::table_name()))
            .bind(("id", id.to_string()))
            .bind(("status", update.status.as_str()))
            .bind(("sources", status_strs(sources)))
            .bind(("running", JobStatus::Running.as_str()))
            .bind(("progress", update.progress.map(i64::from)))
            .bind(("error_message", update.error_message.clone()))
            .bind(("now", SurrealDatetime::from(Utc::now())))
            .await?;

        let updated: Option<IngestionJob> = result.take(0)?;
        if updated.is_some() {
            return Ok(updated);
        }

        // Nothing matched: either the record is missing or the guard refused the write.
        let current = Self::get(db, id).await?;
        debug!(
            job_id = %id,
            current = current.status.as_str(),
            requested = update.status.as_str(),
            current_progress = ?current.progress,
            requested_progress = ?update.progress,
            "ingestion job update rejected by lifecycle guard"
        );
        Ok(None)
    }

    pub async fn list_all(db: &SurrealDbClient) -> Result<Vec<IngestionJob>, AppError> {
        let jobs: Vec<IngestionJob> = db
            .query("SELECT * FROM type::table($table) ORDER BY created_at DESC")
            .bind(("table", Self::table_name()))
            .await?
            .take(0)?;

        Ok(jobs)
    }

    pub async fn list_by_document(
        db: &SurrealDbClient,
        document_id: &str,
    ) -> Result<Vec<IngestionJob>, AppError> {
        let jobs: Vec<IngestionJob> = db
            .query(
                "SELECT * FROM type::table($table)
                 WHERE document_id = $document_id
                 ORDER BY created_at DESC",
            )
            .bind(("table", Self::table_name()))
            .bind(("document_id", document_id.to_string()))
            .await?
            .take(0)?;

        Ok(jobs)
    }

    pub async fn list_active_for_document(
        db: &SurrealDbClient,
        document_id: &str,
    ) -> Result<Vec<IngestionJob>, AppError> {
        let jobs: Vec<IngestionJob> = db
            .query(
                "SELECT * FROM type::table($table)
                 WHERE document_id = $document_id AND status IN $active_states
                 ORDER BY created_at DESC",
            )
            .bind(("table", Self::table_name()))
            .bind(("document_id", document_id.to_string()))
            .bind((
                "active_states",
                vec![JobStatus::Pending.as_str(), JobStatus::Running.as_str()],
            ))
            .await?
            .take(0)?;

        Ok(jobs)
    }

    /// Pending and running jobs, oldest first.
    pub async fn list_unfinished(db: &SurrealDbClient) -> Result<Vec<IngestionJob>, AppError> {
        let jobs: Vec<IngestionJob> = db
            .query(
                "SELECT * FROM type::table($table)
                 WHERE status IN $active_states
                 ORDER BY created_at ASC",
            )
            .bind(("table", Self::table_name()))
            .bind((
                "active_states",
                vec![JobStatus::Pending.as_str(), JobStatus::Running.as_str()],
            ))
            .await?
            .take(0)?;

        Ok(jobs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn memory_db() -> SurrealDbClient {
        let namespace = "test_ns";
        let database = Uuid::new_v4().to_string();
        SurrealDbClient::memory(namespace, &database)
            .await
            .expect("in-memory surrealdb")
    }

    async fn running_job(db: &SurrealDbClient, document_id: &str) -> IngestionJob {
        let job = IngestionJob::create_and_add_to_db(document_id.to_string(), None, db)
            .await
            .expect("create");
        IngestionJob::mark_running(db, &job.id)
            .await
            .expect("mark running")
            .expect("pending job starts")
    }

    #[test]
    fn lifecycle_sources_follow_state_machine() {
        assert_eq!(source_states(JobTransition::Start), vec![JobStatus::Pending]);
        assert_eq!(
            source_states(JobTransition::Complete),
            vec![JobStatus::Running]
        );
        assert_eq!(source_states(JobTransition::Fail), vec![JobStatus::Running]);
        assert_eq!(
            source_states(JobTransition::Abandon),
            vec![JobStatus::Pending, JobStatus::Running]
        );
        assert!(compute_next_state(JobStatus::Completed, JobTransition::Fail).is_err());
        assert!(compute_next_state(JobStatus::Failed, JobTransition::Start).is_err());
    }

    #[tokio::test]
    async fn test_new_job_defaults() {
        let job = IngestionJob::new("doc-1".into(), Some(json!({ "source": "manual" })));

        assert_eq!(job.document_id, "doc-1");
        assert_eq!(job.status, JobStatus::Pending);
        assert!(job.progress.is_none());
        assert!(job.error_message.is_none());
        assert_eq!(job.metadata, Some(json!({ "source": "manual" })));
        assert_eq!(job.created_at, job.updated_at);
    }

    #[tokio::test]
    async fn test_create_and_fetch_job() {
        let db = memory_db().await;

        let created = IngestionJob::create_and_add_to_db(
            "doc-1".into(),
            Some(json!({ "triggeredAt": "2026-01-01T00:00:00Z" })),
            &db,
        )
        .await
        .expect("store");

        let stored = IngestionJob::get(&db, &created.id).await.expect("fetch");
        assert_eq!(stored.id, created.id);
        assert_eq!(stored.status, JobStatus::Pending);
        assert!(stored.progress.is_none());
        assert_eq!(
            stored.metadata,
            Some(json!({ "triggeredAt": "2026-01-01T00:00:00Z" }))
        );
    }

    #[tokio::test]
    async fn test_get_missing_job_is_not_found() {
        let db = memory_db().await;
        let err = IngestionJob::get(&db, "nonexistent")
            .await
            .expect_err("missing job");
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_run_to_completion() {
        let db = memory_db().await;
        let job = running_job(&db, "doc-1").await;
        assert_eq!(job.status, JobStatus::Running);
        assert_eq!(job.progress, Some(0));

        let progressed = IngestionJob::record_progress(&db, &job.id, 40)
            .await
            .expect("progress")
            .expect("applied");
        assert_eq!(progressed.progress, Some(40));
        assert!(progressed.updated_at >= job.updated_at);

        let completed = IngestionJob::mark_completed(&db, &job.id)
            .await
            .expect("complete")
            .expect("applied");
        assert_eq!(completed.status, JobStatus::Completed);
        assert_eq!(completed.progress, Some(100));
        assert!(completed.error_message.is_none());
    }

    #[tokio::test]
    async fn test_progress_regression_is_rejected() {
        let db = memory_db().await;
        let job = running_job(&db, "doc-1").await;

        IngestionJob::record_progress(&db, &job.id, 60)
            .await
            .expect("progress")
            .expect("applied");

        let rejected = IngestionJob::record_progress(&db, &job.id, 20)
            .await
            .expect("guarded update");
        assert!(rejected.is_none());

        let same = IngestionJob::record_progress(&db, &job.id, 60)
            .await
            .expect("repeat");
        assert!(same.is_some(), "repeating a value is not a regression");

        let stored = IngestionJob::get(&db, &job.id).await.expect("fetch");
        assert_eq!(stored.progress, Some(60));
    }

    #[tokio::test]
    async fn test_out_of_range_progress_is_invalid() {
        let db = memory_db().await;
        let job = running_job(&db, "doc-1").await;

        let err = IngestionJob::record_progress(&db, &job.id, 101)
            .await
            .expect_err("out of range");
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn test_failed_job_keeps_progress_and_is_immutable() {
        let db = memory_db().await;
        let job = running_job(&db, "doc-1").await;
        IngestionJob::record_progress(&db, &job.id, 20)
            .await
            .expect("progress")
            .expect("applied");

        let failed = IngestionJob::mark_failed(&db, &job.id, "Job cancelled by user")
            .await
            .expect("fail")
            .expect("applied");
        assert_eq!(failed.status, JobStatus::Failed);
        assert_eq!(failed.progress, Some(20));
        assert_eq!(failed.error_message.as_deref(), Some("Job cancelled by user"));

        let late_completion = IngestionJob::mark_completed(&db, &job.id)
            .await
            .expect("guarded completion");
        assert!(late_completion.is_none());

        let late_progress = IngestionJob::record_progress(&db, &job.id, 80)
            .await
            .expect("guarded progress");
        assert!(late_progress.is_none());

        let second_failure = IngestionJob::mark_failed(&db, &job.id, "other")
            .await
            .expect("guarded failure");
        assert!(second_failure.is_none());

        let stored = IngestionJob::get(&db, &job.id).await.expect("fetch");
        assert_eq!(stored.status, JobStatus::Failed);
        assert_eq!(stored.progress, Some(20));
        assert_eq!(stored.error_message.as_deref(), Some("Job cancelled by user"));
    }

    #[tokio::test]
    async fn test_cancellation_pins_observed_progress() {
        let db = memory_db().await;
        let job = running_job(&db, "doc-1").await;
        IngestionJob::record_progress(&db, &job.id, 20)
            .await
            .expect("progress")
            .expect("applied");
        let observed = IngestionJob::get(&db, &job.id).await.expect("fetch");

        // A step that was already past its cancellation check lands afterwards.
        IngestionJob::record_progress(&db, &job.id, 40)
            .await
            .expect("late progress")
            .expect("applied while still running");

        let cancelled = IngestionJob::mark_cancelled(
            &db,
            &job.id,
            "Job cancelled by user",
            observed.progress,
        )
        .await
        .expect("cancel")
        .expect("applied");
        assert_eq!(cancelled.status, JobStatus::Failed);
        assert_eq!(cancelled.progress, Some(20));
        assert_eq!(
            cancelled.error_message.as_deref(),
            Some("Job cancelled by user")
        );

        let again =
            IngestionJob::mark_cancelled(&db, &job.id, "Job cancelled by user", Some(60))
                .await
                .expect("guarded cancel");
        assert!(again.is_none());
        let stored = IngestionJob::get(&db, &job.id).await.expect("fetch");
        assert_eq!(stored.progress, Some(20));
    }

    #[tokio::test]
    async fn test_completed_job_rejects_failure() {
        let db = memory_db().await;
        let job = running_job(&db, "doc-1").await;
        IngestionJob::mark_completed(&db, &job.id)
            .await
            .expect("complete")
            .expect("applied");

        let rejected = IngestionJob::mark_failed(&db, &job.id, "Job cancelled by user")
            .await
            .expect("guarded");
        assert!(rejected.is_none());

        let stored = IngestionJob::get(&db, &job.id).await.expect("fetch");
        assert_eq!(stored.status, JobStatus::Completed);
        assert!(stored.error_message.is_none());
    }

    #[tokio::test]
    async fn test_pending_job_cannot_fail_but_can_be_abandoned() {
        let db = memory_db().await;
        let job = IngestionJob::create_and_add_to_db("doc-1".into(), None, &db)
            .await
            .expect("create");

        let rejected = IngestionJob::mark_failed(&db, &job.id, "nope")
            .await
            .expect("guarded");
        assert!(rejected.is_none());

        let abandoned = IngestionJob::mark_abandoned(&db, &job.id, "interrupted")
            .await
            .expect("abandon")
            .expect("applied");
        assert_eq!(abandoned.status, JobStatus::Failed);
        assert!(abandoned.progress.is_none());
    }

    #[tokio::test]
    async fn test_update_status_contract() {
        let db = memory_db().await;
        let job = IngestionJob::create_and_add_to_db("doc-1".into(), None, &db)
            .await
            .expect("create");

        let running = IngestionJob::update_status(
            &db,
            &job.id,
            StatusUpdate::new(JobStatus::Running).with_progress(0),
        )
        .await
        .expect("running")
        .expect("applied");
        assert_eq!(running.status, JobStatus::Running);

        let back_to_pending =
            IngestionJob::update_status(&db, &job.id, StatusUpdate::new(JobStatus::Pending))
                .await
                .expect("guarded");
        assert!(back_to_pending.is_none());

        let failed = IngestionJob::update_status(
            &db,
            &job.id,
            StatusUpdate::new(JobStatus::Failed).with_error("boom"),
        )
        .await
        .expect("failed")
        .expect("applied");
        assert_eq!(failed.error_message.as_deref(), Some("boom"));

        let err = IngestionJob::update_status(
            &db,
            "nonexistent",
            StatusUpdate::new(JobStatus::Running).with_progress(10),
        )
        .await
        .expect_err("missing job");
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_listing_is_newest_first() {
        let db = memory_db().await;
        let mut ids = Vec::new();
        for _ in 0..3 {
            let job = IngestionJob::create_and_add_to_db("doc-1".into(), None, &db)
                .await
                .expect("create");
            ids.push(job.id);
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        IngestionJob::create_and_add_to_db("doc-2".into(), None, &db)
            .await
            .expect("create other");

        let by_document = IngestionJob::list_by_document(&db, "doc-1")
            .await
            .expect("list by document");
        let listed: Vec<String> = by_document.iter().map(|job| job.id.clone()).collect();
        ids.reverse();
        assert_eq!(listed, ids);

        let all = IngestionJob::list_all(&db).await.expect("list all");
        assert_eq!(all.len(), 4);
        assert!(all
            .windows(2)
            .all(|pair| pair[0].created_at >= pair[1].created_at));
    }

    #[tokio::test]
    async fn test_active_and_unfinished_listings() {
        let db = memory_db().await;
        let pending = IngestionJob::create_and_add_to_db("doc-1".into(), None, &db)
            .await
            .expect("create");
        let done = running_job(&db, "doc-1").await;
        IngestionJob::mark_completed(&db, &done.id)
            .await
            .expect("complete")
            .expect("applied");
        let running = running_job(&db, "doc-2").await;

        let active = IngestionJob::list_active_for_document(&db, "doc-1")
            .await
            .expect("active");
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, pending.id);

        let unfinished: Vec<String> = IngestionJob::list_unfinished(&db)
            .await
            .expect("unfinished")
            .into_iter()
            .map(|job| job.id)
            .collect();
        assert_eq!(unfinished, vec![pending.id, running.id]);
    }
}
