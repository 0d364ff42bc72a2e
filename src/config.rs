use std::net::IpAddr;
use std::time::Duration;

use crate::Settings;
use crate::health::HealthConfig;
use crate::orchestrator::OrchestratorConfig;
use crate::pipeline::PipelineConfig;
use crate::retry::RetryScheduler;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub host: IpAddr,
    pub port: u16,
    pub log_level: String,
    pub worker_count: usize,
    pub batch_size: usize,
    pub concurrency: usize,
    pub poll_interval: Duration,
    pub phase_timeout: Duration,
    pub default_max_attempts: i32,
    pub stale_after: Duration,
    pub reap_stale: bool,
    pub health_window: Duration,
    pub word_count_tolerance: f64,
    pub service: ServiceConfig,
}

/// The HTTP gateway the pipeline's collaborators live behind.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub url: String,
    pub token: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        let database_url = env_required("DATABASE_URL")?;

        let host: IpAddr = env_or("CONTENT_QUEUE_HOST", "0.0.0.0")
            .parse()
            .map_err(|e| format!("Invalid CONTENT_QUEUE_HOST: {e}"))?;

        let port: u16 = env_parse("CONTENT_QUEUE_PORT", "3000")?;
        let log_level = env_or("CONTENT_QUEUE_LOG_LEVEL", "info");

        let worker_count: usize = env_parse("CONTENT_QUEUE_WORKERS", "2")?;
        let batch_size: usize = env_parse("CONTENT_QUEUE_BATCH_SIZE", "5")?;
        let concurrency: usize = env_parse("CONTENT_QUEUE_CONCURRENCY", "2")?;
        let poll_interval = Duration::from_secs(env_parse("CONTENT_QUEUE_POLL_INTERVAL_SECS", "5")?);
        let phase_timeout =
            Duration::from_secs(env_parse("CONTENT_QUEUE_PHASE_TIMEOUT_SECS", "300")?);

        let default_max_attempts: i32 = env_parse("CONTENT_QUEUE_DEFAULT_MAX_ATTEMPTS", "3")?;
        if default_max_attempts < 1 {
            return Err("CONTENT_QUEUE_DEFAULT_MAX_ATTEMPTS must be at least 1".to_string());
        }

        let stale_after = Duration::from_secs(env_parse("CONTENT_QUEUE_STALE_AFTER_SECS", "1800")?);
        let reap_stale = matches!(
            env_or("CONTENT_QUEUE_REAP_STALE", "false").to_lowercase().as_str(),
            "true" | "1" | "yes"
        );
        let health_window =
            Duration::from_secs(env_parse::<u64>("CONTENT_QUEUE_HEALTH_WINDOW_HOURS", "24")? * 3600);

        let word_count_tolerance: f64 =
            env_parse("CONTENT_QUEUE_TARGET_WORD_COUNT_TOLERANCE", "0.5")?;
        if !(0.0..=1.0).contains(&word_count_tolerance) {
            return Err("CONTENT_QUEUE_TARGET_WORD_COUNT_TOLERANCE must be between 0 and 1".to_string());
        }

        let service = ServiceConfig {
            url: env_required("CONTENT_QUEUE_SERVICE_URL")?,
            token: std::env::var("CONTENT_QUEUE_SERVICE_TOKEN")
                .ok()
                .filter(|t| !t.is_empty()),
        };

        Ok(Config {
            database_url,
            host,
            port,
            log_level,
            worker_count: worker_count.max(1),
            batch_size: batch_size.max(1),
            concurrency: concurrency.max(1),
            poll_interval,
            phase_timeout,
            default_max_attempts,
            stale_after,
            reap_stale,
            health_window,
            word_count_tolerance,
            service,
        })
    }

    pub fn settings(&self) -> Settings {
        Settings {
            orchestrator: self.orchestrator(),
            pipeline: self.pipeline(),
            health: self.health(),
            retry: RetryScheduler::default(),
        }
    }

    pub fn orchestrator(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            worker_id: "worker-0".to_string(),
            concurrency: self.concurrency,
            default_max_attempts: self.default_max_attempts,
            stale_after: self.stale_after,
            reap_stale: self.reap_stale,
        }
    }

    pub fn pipeline(&self) -> PipelineConfig {
        PipelineConfig {
            phase_timeout: self.phase_timeout,
            word_count_tolerance: self.word_count_tolerance,
        }
    }

    pub fn health(&self) -> HealthConfig {
        HealthConfig {
            stale_after: self.stale_after,
            window: self.health_window,
            ..HealthConfig::default()
        }
    }
}

fn env_required(key: &str) -> Result<String, String> {
    std::env::var(key).map_err(|_| format!("Missing required environment variable: {key}"))
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T>(key: &str, default: &str) -> Result<T, String>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    env_or(key, default)
        .parse()
        .map_err(|e| format!("Invalid {key}: {e}"))
}
