#![allow(clippy::missing_docs_in_private_items, clippy::result_large_err)]

pub mod bridge;
pub mod orchestrator;
pub mod processing;
pub mod query;

pub use bridge::{DocumentStatusBridge, SurrealDocumentBridge};
pub use orchestrator::{
    IngestionConfig, IngestionOrchestrator, IngestionTuning, ResumeReport, CANCELLED_BY_SHUTDOWN,
    CANCELLED_BY_USER, INTERRUPTED,
};
pub use processing::{ProcessingError, ProcessingUnit, ProgressReporter, SimulatedProcessingUnit};
pub use query::JobQuery;
