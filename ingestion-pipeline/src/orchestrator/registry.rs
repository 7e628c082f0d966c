use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard},
};

use common::error::AppError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::warn;

struct InFlightJob {
    document_id: String,
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

/// Document claim held between reservation and job creation.
const RESERVED: &str = "";

#[derive(Default)]
struct RegistryState {
    jobs: HashMap<String, InFlightJob>,
    /// document id -> job id holding the document.
    documents: HashMap<String, String>,
    shutting_down: bool,
}

/// In-process view of the jobs this orchestrator is driving.
///
/// The lock is never held across an await point.
#[derive(Default)]
pub(crate) struct JobRegistry {
    state: Mutex<RegistryState>,
}

impl JobRegistry {
    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("job registry lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    /// Claims `document_id` for a job that is about to be created.
    pub(crate) fn reserve_document(&self, document_id: &str) -> Result<(), AppError> {
        let mut state = self.lock();
        if state.shutting_down {
            return Err(AppError::Conflict(
                "ingestion orchestrator is shutting down".to_string(),
            ));
        }
        if let Some(holder) = state.documents.get(document_id) {
            let holder = if holder.is_empty() {
                "a job being created".to_string()
            } else {
                format!("job {holder}")
            };
            return Err(AppError::Conflict(format!(
                "Document {document_id} already has an active ingestion job ({holder})"
            )));
        }
        state
            .documents
            .insert(document_id.to_string(), RESERVED.to_string());
        Ok(())
    }

    /// Drops a claim on `document_id` if it is still held by `job_id`
    /// (or by a reservation when `job_id` is `None`).
    pub(crate) fn release_document(&self, document_id: &str, job_id: Option<&str>) {
        let mut state = self.lock();
        let held_by_caller = state
            .documents
            .get(document_id)
            .is_some_and(|holder| holder == job_id.unwrap_or(RESERVED));
        if held_by_caller {
            state.documents.remove(document_id);
        }
    }

    /// Tracks a job that is about to be spawned. Binds a pending document
    /// reservation to the job when one exists.
    pub(crate) fn register(&self, job_id: &str, document_id: &str, cancel: CancellationToken) {
        let mut state = self.lock();
        if let Some(holder) = state.documents.get_mut(document_id) {
            if holder.is_empty() {
                *holder = job_id.to_string();
            }
        }
        state.jobs.insert(
            job_id.to_string(),
            InFlightJob {
                document_id: document_id.to_string(),
                cancel,
                handle: None,
            },
        );
    }

    /// Stores the task handle. A task that already finished has removed its
    /// entry; its handle is dropped and the task stays detached.
    pub(crate) fn attach_handle(&self, job_id: &str, handle: JoinHandle<()>) {
        let mut state = self.lock();
        if let Some(job) = state.jobs.get_mut(job_id) {
            job.handle = Some(handle);
        }
    }

    /// Signals the job's cancellation token. Returns false when this process
    /// does not drive the job.
    pub(crate) fn signal_cancel(&self, job_id: &str) -> bool {
        let state = self.lock();
        match state.jobs.get(job_id) {
            Some(job) => {
                job.cancel.cancel();
                true
            }
            None => false,
        }
    }

    pub(crate) fn contains(&self, job_id: &str) -> bool {
        self.lock().jobs.contains_key(job_id)
    }

    pub(crate) fn take_handle(&self, job_id: &str) -> Option<JoinHandle<()>> {
        self.lock()
            .jobs
            .get_mut(job_id)
            .and_then(|job| job.handle.take())
    }

    /// Called by a job's task once it has settled.
    pub(crate) fn finish(&self, job_id: &str) {
        let mut state = self.lock();
        if let Some(job) = state.jobs.remove(job_id) {
            let held_by_job = state
                .documents
                .get(&job.document_id)
                .is_some_and(|holder| holder == job_id);
            if held_by_job {
                state.documents.remove(&job.document_id);
            }
        }
    }

    pub(crate) fn is_shutting_down(&self) -> bool {
        self.lock().shutting_down
    }

    /// Refuses new work, cancels every in-flight job and hands back their
    /// task handles.
    pub(crate) fn begin_shutdown(&self) -> Vec<JoinHandle<()>> {
        let mut state = self.lock();
        state.shutting_down = true;
        state
            .jobs
            .values_mut()
            .filter_map(|job| {
                job.cancel.cancel();
                job.handle.take()
            })
            .collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().jobs.len()
    }
}
