mod config;
mod registry;

pub use config::{IngestionConfig, IngestionTuning};

use std::{any::Any, panic::AssertUnwindSafe, sync::Arc};

use chrono::Utc;
use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        types::{
            document::DocumentStatus,
            ingestion_job::{IngestionJob, JobStatus},
        },
    },
};
use futures::{future::join_all, FutureExt};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use self::registry::JobRegistry;
use crate::{
    bridge::DocumentStatusBridge,
    processing::{ProcessingError, ProcessingUnit, ProgressReporter},
    query::JobQuery,
};

pub const CANCELLED_BY_USER: &str = "Job cancelled by user";
pub const CANCELLED_BY_SHUTDOWN: &str = "Job cancelled during shutdown";
pub const INTERRUPTED: &str = "Job interrupted before completion";

/// Outcome of [`IngestionOrchestrator::resume_unfinished`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ResumeReport {
    pub rescheduled: usize,
    pub interrupted: usize,
}

/// Owns the lifecycle of ingestion jobs: persists them, drives each one on
/// its own background task and reflects the outcome onto the document.
#[derive(Clone)]
#[allow(clippy::module_name_repetitions)]
pub struct IngestionOrchestrator {
    db: Arc<SurrealDbClient>,
    bridge: Arc<dyn DocumentStatusBridge>,
    unit: Arc<dyn ProcessingUnit>,
    config: IngestionConfig,
    query: JobQuery,
    registry: Arc<JobRegistry>,
}

impl IngestionOrchestrator {
    pub fn new(
        db: Arc<SurrealDbClient>,
        bridge: Arc<dyn DocumentStatusBridge>,
        unit: Arc<dyn ProcessingUnit>,
        config: IngestionConfig,
    ) -> Self {
        let query = JobQuery::new(Arc::clone(&db));
        Self {
            db,
            bridge,
            unit,
            config,
            query,
            registry: Arc::new(JobRegistry::default()),
        }
    }

    /// Persists a pending job and schedules it. Returns as soon as the job is
    /// stored; processing continues in the background.
    pub async fn create(
        &self,
        document_id: &str,
        metadata: Option<Value>,
    ) -> Result<IngestionJob, AppError> {
        let document_id = validate_request(document_id, metadata.as_ref())?;
        self.claim_document(document_id).await?;
        self.persist_and_schedule(document_id, metadata).await
    }

    /// Marks the document as processing, then creates a job for it. The
    /// document is claimed first, so a rejected trigger never touches it. A
    /// failed document update is logged and does not prevent the job.
    pub async fn trigger_ingestion(&self, document_id: &str) -> Result<IngestionJob, AppError> {
        let metadata = json!({
            "source": "trigger",
            "triggeredAt": Utc::now().to_rfc3339(),
        });
        let document_id = validate_request(document_id, Some(&metadata))?;
        self.claim_document(document_id).await?;

        if let Err(err) = self
            .bridge
            .set_status(document_id, DocumentStatus::Processing)
            .await
        {
            warn!(%document_id, error = %err, "failed to mark document as processing");
        }

        self.persist_and_schedule(document_id, Some(metadata)).await
    }

    /// Cancels a running job. Jobs in any other state are returned unchanged.
    pub async fn cancel_job(&self, job_id: &str) -> Result<IngestionJob, AppError> {
        let job = self.query.find_one(job_id).await?;
        if job.status != JobStatus::Running {
            debug!(%job_id, status = job.status.as_str(), "cancel ignored for non-running job");
            return Ok(job);
        }

        if !self.registry.signal_cancel(job_id) {
            debug!(%job_id, "cancelling a running job without a local task");
        }

        match IngestionJob::mark_cancelled(&self.db, job_id, CANCELLED_BY_USER, job.progress)
            .await?
        {
            Some(updated) => {
                info!(%job_id, document_id = %updated.document_id, progress = ?updated.progress, "ingestion job cancelled");
                self.registry
                    .release_document(&updated.document_id, Some(job_id));
                self.notify_bridge(&updated.document_id, DocumentStatus::Failed)
                    .await;
                Ok(updated)
            }
            // The job reached a terminal state first.
            None => self.query.find_one(job_id).await,
        }
    }

    pub async fn find_one(&self, job_id: &str) -> Result<IngestionJob, AppError> {
        self.query.find_one(job_id).await
    }

    pub async fn find_all(&self) -> Result<Vec<IngestionJob>, AppError> {
        self.query.find_all().await
    }

    pub async fn get_jobs_by_document(
        &self,
        document_id: &str,
    ) -> Result<Vec<IngestionJob>, AppError> {
        self.query.get_jobs_by_document(document_id).await
    }

    /// Waits for the job's background task, if this process is driving it,
    /// and returns the stored job afterwards.
    pub async fn wait_for(&self, job_id: &str) -> Result<IngestionJob, AppError> {
        if let Some(handle) = self.registry.take_handle(job_id) {
            handle.await?;
        }
        self.query.find_one(job_id).await
    }

    /// Picks up jobs left behind by a previous process. Pending jobs are
    /// scheduled again; running jobs lost their task and are failed.
    pub async fn resume_unfinished(&self) -> Result<ResumeReport, AppError> {
        let mut report = ResumeReport::default();

        for job in IngestionJob::list_unfinished(&self.db).await? {
            if self.registry.contains(&job.id) {
                continue;
            }

            match job.status {
                JobStatus::Pending => {
                    if self.config.single_active_job {
                        if let Err(err) = self.registry.reserve_document(&job.document_id) {
                            debug!(job_id = %job.id, error = %err, "pending job left for later, document busy");
                            continue;
                        }
                    }
                    info!(job_id = %job.id, document_id = %job.document_id, "rescheduling pending ingestion job");
                    self.schedule(job);
                    report.rescheduled += 1;
                }
                JobStatus::Running => {
                    if let Some(failed) =
                        IngestionJob::mark_abandoned(&self.db, &job.id, INTERRUPTED).await?
                    {
                        warn!(job_id = %failed.id, document_id = %failed.document_id, progress = ?failed.progress, "ingestion job interrupted by restart");
                        self.notify_bridge(&failed.document_id, DocumentStatus::Failed)
                            .await;
                        report.interrupted += 1;
                    }
                }
                JobStatus::Completed | JobStatus::Failed => {}
            }
        }

        Ok(report)
    }

    /// Refuses new jobs, cancels every in-flight job and waits for their
    /// tasks to record a terminal state.
    pub async fn shutdown(&self) {
        let handles = self.registry.begin_shutdown();
        info!(jobs = handles.len(), "shutting down ingestion orchestrator");
        for result in join_all(handles).await {
            if let Err(err) = result {
                error!(error = %err, "ingestion task ended abnormally during shutdown");
            }
        }
    }

    /// Jobs currently owned by a background task in this process.
    pub fn in_flight(&self) -> usize {
        self.registry.len()
    }

    /// False once [`shutdown`](Self::shutdown) has started.
    pub fn accepting_jobs(&self) -> bool {
        !self.registry.is_shutting_down()
    }

    /// Refuses new work during shutdown and, when one active job per document
    /// is enforced, reserves the document. The reservation is released on
    /// error.
    async fn claim_document(&self, document_id: &str) -> Result<(), AppError> {
        if self.registry.is_shutting_down() {
            return Err(AppError::Conflict(
                "ingestion orchestrator is shutting down".to_string(),
            ));
        }
        if !self.config.single_active_job {
            return Ok(());
        }

        self.registry.reserve_document(document_id)?;
        if let Err(err) = self.ensure_no_active_job(document_id).await {
            self.registry.release_document(document_id, None);
            return Err(err);
        }
        Ok(())
    }

    async fn persist_and_schedule(
        &self,
        document_id: &str,
        metadata: Option<Value>,
    ) -> Result<IngestionJob, AppError> {
        let job =
            match IngestionJob::create_and_add_to_db(document_id.to_string(), metadata, &self.db)
                .await
            {
                Ok(job) => job,
                Err(err) => {
                    self.registry.release_document(document_id, None);
                    return Err(err);
                }
            };

        info!(job_id = %job.id, document_id = %job.document_id, "ingestion job created");
        self.schedule(job.clone());
        Ok(job)
    }

    async fn ensure_no_active_job(&self, document_id: &str) -> Result<(), AppError> {
        let active = IngestionJob::list_active_for_document(&self.db, document_id).await?;
        match active.first() {
            Some(existing) => Err(AppError::Conflict(format!(
                "Document {document_id} already has an active ingestion job (job {})",
                existing.id
            ))),
            None => Ok(()),
        }
    }

    fn schedule(&self, job: IngestionJob) {
        let job_id = job.id.clone();
        let cancel = CancellationToken::new();
        self.registry
            .register(&job_id, &job.document_id, cancel.clone());

        let orchestrator = self.clone();
        let handle = tokio::spawn(async move { orchestrator.run_job(job, cancel).await });
        self.registry.attach_handle(&job_id, handle);
    }

    #[tracing::instrument(skip_all, fields(job_id = %job.id, document_id = %job.document_id))]
    async fn run_job(self, job: IngestionJob, cancel: CancellationToken) {
        let job_id = job.id.clone();

        if cancel.is_cancelled() {
            // Stays pending so the next start can pick it up.
            info!("ingestion job cancelled before start");
        } else {
            match IngestionJob::mark_running(&self.db, &job_id).await {
                Ok(Some(running)) => {
                    info!("ingestion job started");
                    let outcome = self.drive(&running, &cancel).await;
                    self.settle(&running, outcome).await;
                }
                Ok(None) => debug!("ingestion job was no longer pending"),
                Err(err) => error!(error = %err, "failed to start ingestion job"),
            }
        }

        self.registry.finish(&job_id);
    }

    async fn drive(
        &self,
        job: &IngestionJob,
        cancel: &CancellationToken,
    ) -> Result<(), ProcessingError> {
        let reporter = ProgressReporter::new(
            Arc::clone(&self.db),
            job.id.clone(),
            job.progress.unwrap_or(0),
        );
        let work = AssertUnwindSafe(self.unit.run(job, &reporter, cancel)).catch_unwind();

        let result = match self.config.tuning.job_timeout() {
            Some(limit) => match tokio::time::timeout(limit, work).await {
                Ok(result) => result,
                Err(_) => {
                    cancel.cancel();
                    warn!(progress = reporter.last(), "ingestion job timed out");
                    return Err(ProcessingError::Failed(format!(
                        "Job timed out after {}s",
                        limit.as_secs()
                    )));
                }
            },
            None => work.await,
        };

        result.unwrap_or_else(|panic| {
            Err(ProcessingError::Failed(format!(
                "Processing unit panicked: {}",
                panic_message(panic.as_ref())
            )))
        })
    }

    async fn settle(&self, job: &IngestionJob, outcome: Result<(), ProcessingError>) {
        let (written, document_status) = match outcome {
            Ok(()) => (
                IngestionJob::mark_completed(&self.db, &job.id).await,
                DocumentStatus::Completed,
            ),
            Err(ProcessingError::Superseded) => {
                debug!("ingestion job settled elsewhere");
                return;
            }
            Err(ProcessingError::Cancelled) => {
                let reason = if self.registry.is_shutting_down() {
                    CANCELLED_BY_SHUTDOWN
                } else {
                    CANCELLED_BY_USER
                };
                (
                    IngestionJob::mark_failed(&self.db, &job.id, reason).await,
                    DocumentStatus::Failed,
                )
            }
            Err(ProcessingError::Failed(message)) => {
                warn!(error = %message, "ingestion job failed");
                (
                    IngestionJob::mark_failed(&self.db, &job.id, &message).await,
                    DocumentStatus::Failed,
                )
            }
        };

        match written {
            Ok(Some(settled)) => {
                info!(
                    status = settled.status.as_str(),
                    progress = ?settled.progress,
                    "ingestion job finished"
                );
                self.notify_bridge(&settled.document_id, document_status)
                    .await;
            }
            Ok(None) => debug!("terminal state already recorded"),
            Err(err) => error!(error = %err, "failed to record ingestion outcome"),
        }
    }

    async fn notify_bridge(&self, document_id: &str, status: DocumentStatus) {
        if let Err(err) = self.bridge.set_status(document_id, status).await {
            warn!(%document_id, status = status.as_str(), error = %err, "document status update failed");
        }
    }
}

fn validate_request<'a>(
    document_id: &'a str,
    metadata: Option<&Value>,
) -> Result<&'a str, AppError> {
    let document_id = document_id.trim();
    if document_id.is_empty() {
        return Err(AppError::Validation(
            "documentId must not be empty".to_string(),
        ));
    }
    if metadata.is_some_and(|value| !value.is_object()) {
        return Err(AppError::Validation(
            "metadata must be a JSON object".to_string(),
        ));
    }
    Ok(document_id)
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
