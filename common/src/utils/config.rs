use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

#[derive(Clone, Deserialize, Debug)]
pub struct AppConfig {
    pub surrealdb_address: String,
    pub surrealdb_username: String,
    pub surrealdb_password: String,
    pub surrealdb_namespace: String,
    pub surrealdb_database: String,
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    /// Progress increment emitted by the simulated processing unit.
    #[serde(default = "default_ingestion_progress_step")]
    pub ingestion_progress_step: u8,
    /// Delay before each simulated processing step, in milliseconds.
    #[serde(default = "default_ingestion_step_delay_ms")]
    pub ingestion_step_delay_ms: u64,
    /// Upper bound for a single job run. Zero disables the bound.
    #[serde(default = "default_ingestion_job_timeout_secs")]
    pub ingestion_job_timeout_secs: u64,
    /// Reject a new job while another one is pending or running for the same document.
    #[serde(default = "default_ingestion_single_active_job")]
    pub ingestion_single_active_job: bool,
}

fn default_http_port() -> u16 {
    3000
}

fn default_ingestion_progress_step() -> u8 {
    20
}

fn default_ingestion_step_delay_ms() -> u64 {
    1_000
}

fn default_ingestion_job_timeout_secs() -> u64 {
    30 * 60
}

fn default_ingestion_single_active_job() -> bool {
    true
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            surrealdb_address: "mem://".to_string(),
            surrealdb_username: "root".to_string(),
            surrealdb_password: "root".to_string(),
            surrealdb_namespace: "ingestion".to_string(),
            surrealdb_database: "ingestion".to_string(),
            http_port: default_http_port(),
            ingestion_progress_step: default_ingestion_progress_step(),
            ingestion_step_delay_ms: default_ingestion_step_delay_ms(),
            ingestion_job_timeout_secs: default_ingestion_job_timeout_secs(),
            ingestion_single_active_job: default_ingestion_single_active_job(),
        }
    }
}

pub fn get_config() -> Result<AppConfig, ConfigError> {
    let config = Config::builder()
        .add_source(File::with_name("config").required(false))
        .add_source(Environment::default())
        .build()?;

    config.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_optional_ingestion_settings() {
        let config = Config::builder()
            .set_override("surrealdb_address", "mem://")
            .and_then(|b| b.set_override("surrealdb_username", "root"))
            .and_then(|b| b.set_override("surrealdb_password", "root"))
            .and_then(|b| b.set_override("surrealdb_namespace", "ns"))
            .and_then(|b| b.set_override("surrealdb_database", "db"))
            .expect("overrides")
            .build()
            .expect("build config");

        let app: AppConfig = config.try_deserialize().expect("deserialize");
        assert_eq!(app.http_port, 3000);
        assert_eq!(app.ingestion_progress_step, 20);
        assert_eq!(app.ingestion_step_delay_ms, 1_000);
        assert_eq!(app.ingestion_job_timeout_secs, 1_800);
        assert!(app.ingestion_single_active_job);
    }

    #[test]
    fn explicit_values_override_defaults() {
        let config = Config::builder()
            .set_override("surrealdb_address", "ws://db:8000")
            .and_then(|b| b.set_override("surrealdb_username", "admin"))
            .and_then(|b| b.set_override("surrealdb_password", "secret"))
            .and_then(|b| b.set_override("surrealdb_namespace", "ns"))
            .and_then(|b| b.set_override("surrealdb_database", "db"))
            .and_then(|b| b.set_override("ingestion_step_delay_ms", 25))
            .and_then(|b| b.set_override("ingestion_single_active_job", false))
            .expect("overrides")
            .build()
            .expect("build config");

        let app: AppConfig = config.try_deserialize().expect("deserialize");
        assert_eq!(app.surrealdb_address, "ws://db:8000");
        assert_eq!(app.ingestion_step_delay_ms, 25);
        assert!(!app.ingestion_single_active_job);
    }
}
