use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::classifier::ClassifierConfig;
use crate::materializer::MaterializerConfig;

use super::BoxError;

pub const DEFAULT_INBOUND_BODY_MAX_BYTES: usize = 10 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub host: String,
    pub port: u16,
    pub org_db_path: PathBuf,
    pub task_db_path: PathBuf,
    pub intel_db_path: PathBuf,
    pub queue_db_path: PathBuf,
    pub worker_id: String,
    pub worker_poll_interval: Duration,
    pub queue_lease_secs: i64,
    pub queue_max_attempts: i64,
    pub queue_backoff_secs: i64,
    pub dedup_window: Duration,
    /// Shared secret the inbound transport must present; unset means open
    /// (local development).
    pub inbound_token: Option<String>,
    pub inbound_body_max_bytes: usize,
    /// Transport provider domains that never count as mentions.
    pub provider_domains: Vec<String>,
    pub classifier: ClassifierConfig,
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self, BoxError> {
        dotenvy::dotenv().ok();

        let host = env::var("PIPELINE_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = env::var("PIPELINE_PORT")
            .ok()
            .and_then(|value| value.parse::<u16>().ok())
            .unwrap_or(9400);

        let data_root =
            resolve_path(env::var("PIPELINE_DATA_ROOT").unwrap_or_else(|_| "data".to_string()))?;
        let org_db_path = resolve_path(
            env::var("ORG_DB_PATH")
                .unwrap_or_else(|_| data_root.join("orgs.db").to_string_lossy().into_owned()),
        )?;
        let task_db_path = resolve_path(
            env::var("TASK_DB_PATH")
                .unwrap_or_else(|_| data_root.join("tasks.db").to_string_lossy().into_owned()),
        )?;
        let intel_db_path = resolve_path(
            env::var("SENDER_INTEL_DB_PATH")
                .unwrap_or_else(|_| data_root.join("intel.db").to_string_lossy().into_owned()),
        )?;
        let queue_db_path = resolve_path(
            env::var("INGESTION_DB_PATH")
                .unwrap_or_else(|_| data_root.join("ingestion.db").to_string_lossy().into_owned()),
        )?;

        let worker_id = env::var("WORKER_INSTANCE_ID")
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| format!("pid-{}", std::process::id()));
        let worker_poll_interval = env::var("WORKER_POLL_INTERVAL_SECS")
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
            .filter(|value| *value > 0)
            .map(Duration::from_secs)
            .unwrap_or_else(|| Duration::from_secs(1));

        let queue_lease_secs = resolve_i64_env("INGESTION_QUEUE_LEASE_SECS", 60);
        let queue_max_attempts = resolve_i64_env("INGESTION_QUEUE_MAX_ATTEMPTS", 5);
        let queue_backoff_secs = resolve_i64_env("INGESTION_QUEUE_BACKOFF_SECS", 5);

        let dedup_window = Duration::from_secs(resolve_i64_env("DEDUP_WINDOW_SECS", 3600) as u64);

        let inbound_token = env::var("INBOUND_WEBHOOK_TOKEN")
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty());
        let inbound_body_max_bytes = env::var("INBOUND_BODY_MAX_BYTES")
            .ok()
            .and_then(|value| value.parse::<usize>().ok())
            .filter(|value| *value > 0)
            .unwrap_or(DEFAULT_INBOUND_BODY_MAX_BYTES);

        let provider_domains = env::var("INBOUND_PROVIDER_DOMAINS")
            .ok()
            .map(|value| {
                value
                    .split(',')
                    .map(|domain| domain.trim().to_ascii_lowercase())
                    .filter(|domain| !domain.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            host,
            port,
            org_db_path,
            task_db_path,
            intel_db_path,
            queue_db_path,
            worker_id,
            worker_poll_interval,
            queue_lease_secs,
            queue_max_attempts,
            queue_backoff_secs,
            dedup_window,
            inbound_token,
            inbound_body_max_bytes,
            provider_domains,
            classifier: ClassifierConfig::from_env(),
        })
    }

    pub fn materializer_config(&self) -> MaterializerConfig {
        MaterializerConfig {
            dedup_window: self.dedup_window,
            excluded_mention_domains: self.provider_domains.clone(),
        }
    }
}

fn resolve_path(raw: String) -> Result<PathBuf, BoxError> {
    let path = PathBuf::from(raw.trim());
    if path.is_absolute() {
        Ok(path)
    } else {
        Ok(env::current_dir()?.join(path))
    }
}

fn resolve_i64_env(key: &str, default_value: i64) -> i64 {
    env::var(key)
        .ok()
        .and_then(|value| value.parse::<i64>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(default_value)
}
