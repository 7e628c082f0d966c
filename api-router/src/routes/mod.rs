pub mod ingestion;
pub mod liveness;
pub mod readiness;
