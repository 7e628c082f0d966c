use std::time::Duration;

use common::utils::config::AppConfig;

#[derive(Debug, Clone)]
pub struct IngestionTuning {
    pub progress_step: u8,
    pub step_delay_ms: u64,
    /// Zero disables the per-job bound.
    pub job_timeout_secs: u64,
}

impl IngestionTuning {
    pub fn step_delay(&self) -> Duration {
        Duration::from_millis(self.step_delay_ms)
    }

    pub fn job_timeout(&self) -> Option<Duration> {
        (self.job_timeout_secs > 0).then(|| Duration::from_secs(self.job_timeout_secs))
    }
}

impl Default for IngestionTuning {
    fn default() -> Self {
        Self {
            progress_step: 20,
            step_delay_ms: 1_000,
            job_timeout_secs: 30 * 60,
        }
    }
}

#[derive(Debug, Clone)]
pub struct IngestionConfig {
    pub tuning: IngestionTuning,
    pub single_active_job: bool,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            tuning: IngestionTuning::default(),
            single_active_job: true,
        }
    }
}

impl From<&AppConfig> for IngestionConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            tuning: IngestionTuning {
                progress_step: config.ingestion_progress_step,
                step_delay_ms: config.ingestion_step_delay_ms,
                job_timeout_secs: config.ingestion_job_timeout_secs,
            },
            single_active_job: config.ingestion_single_active_job,
        }
    }
}
