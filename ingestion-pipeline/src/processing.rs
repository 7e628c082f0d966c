use std::{
    sync::{
        atomic::{AtomicU8, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        types::ingestion_job::{IngestionJob, MAX_PROGRESS},
    },
};
use thiserror::Error;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::orchestrator::IngestionTuning;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProcessingError {
    /// The unit gave up; the message becomes the job's error message.
    #[error("{0}")]
    Failed(String),
    /// The unit observed its cancellation token and stopped.
    #[error("processing cancelled")]
    Cancelled,
    /// The job left the running state underneath the unit.
    #[error("ingestion job is no longer running")]
    Superseded,
}

impl From<AppError> for ProcessingError {
    fn from(err: AppError) -> Self {
        ProcessingError::Failed(err.to_string())
    }
}

/// Persists progress for one running job.
pub struct ProgressReporter {
    db: Arc<SurrealDbClient>,
    job_id: String,
    last: AtomicU8,
}

impl ProgressReporter {
    pub fn new(db: Arc<SurrealDbClient>, job_id: String, initial: u8) -> Self {
        Self {
            db,
            job_id,
            last: AtomicU8::new(initial),
        }
    }

    /// Last progress value persisted through this reporter.
    pub fn last(&self) -> u8 {
        self.last.load(Ordering::Acquire)
    }

    /// Records `progress`, clamped to 100. Values below the last reported one
    /// are ignored. Store hiccups are logged and do not abort the unit.
    pub async fn report(&self, progress: u8) -> Result<(), ProcessingError> {
        let progress = progress.min(MAX_PROGRESS);
        let last = self.last();
        if progress < last {
            debug!(job_id = %self.job_id, progress, last, "ignoring progress regression");
            return Ok(());
        }

        match IngestionJob::record_progress(&self.db, &self.job_id, progress).await {
            Ok(Some(_)) => {
                self.last.store(progress, Ordering::Release);
                debug!(job_id = %self.job_id, progress, "ingestion progress recorded");
                Ok(())
            }
            Ok(None) => Err(ProcessingError::Superseded),
            Err(AppError::NotFound(msg)) => Err(ProcessingError::Failed(msg)),
            Err(err) => {
                warn!(job_id = %self.job_id, progress, error = %err, "failed to persist ingestion progress");
                Ok(())
            }
        }
    }
}

/// A cancellable unit of ingestion work for one job.
///
/// Implementations report non-decreasing progress through `progress` and
/// check `cancel` at every suspension point, returning
/// `ProcessingError::Cancelled` once it fires.
#[async_trait]
pub trait ProcessingUnit: Send + Sync {
    async fn run(
        &self,
        job: &IngestionJob,
        progress: &ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<(), ProcessingError>;
}

/// Stand-in unit that walks progress from 0 to 100 in fixed steps, sleeping
/// before each one.
#[derive(Debug, Clone)]
pub struct SimulatedProcessingUnit {
    step: u8,
    step_delay: Duration,
}

impl SimulatedProcessingUnit {
    pub fn new(step: u8, step_delay: Duration) -> Self {
        Self {
            step: step.max(1),
            step_delay,
        }
    }

    pub fn from_tuning(tuning: &IngestionTuning) -> Self {
        Self::new(tuning.progress_step, tuning.step_delay())
    }
}

#[async_trait]
impl ProcessingUnit for SimulatedProcessingUnit {
    async fn run(
        &self,
        job: &IngestionJob,
        progress: &ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<(), ProcessingError> {
        let mut value: u8 = 0;
        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    debug!(job_id = %job.id, progress = progress.last(), "simulated ingestion cancelled");
                    return Err(ProcessingError::Cancelled);
                }
                () = sleep(self.step_delay) => {}
            }

            progress.report(value).await?;
            if value >= MAX_PROGRESS {
                return Ok(());
            }
            value = value.saturating_add(self.step).min(MAX_PROGRESS);
        }
    }
}
