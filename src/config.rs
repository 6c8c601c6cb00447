//! Configuration types.
//!
//! Everything is read from environment variables with defaults matching the
//! message-processing task declaration: every five minutes, no catch-up, one
//! retry after two minutes.

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use secrecy::SecretString;

use crate::error::ConfigError;

/// Default cron expression: every five minutes.
pub const DEFAULT_SCHEDULE: &str = "*/5 * * * *";

/// Scheduling declaration for the pipeline task.
#[derive(Debug, Clone)]
pub struct TaskConfig {
    pub dag_id: String,
    pub task_id: String,
    pub owner: String,
    /// No slot before this instant is scheduled.
    pub start_date: DateTime<Utc>,
    /// Extra attempts after the first failure.
    pub retries: u32,
    pub retry_delay: Duration,
    /// Cron expression (5 or 6 fields).
    pub schedule: String,
    /// Replay slots missed while the service was down or busy.
    pub catchup: bool,
    pub tags: Vec<String>,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            dag_id: "dag_processa_mensagens".to_string(),
            task_id: "processar_mensagem".to_string(),
            owner: "rafael".to_string(),
            start_date: default_start_date(),
            retries: 1,
            retry_delay: Duration::from_secs(120), // 2 minutes
            schedule: DEFAULT_SCHEDULE.to_string(),
            catchup: false,
            tags: vec!["financas".to_string(), "chatgpt".to_string()],
        }
    }
}

fn default_start_date() -> DateTime<Utc> {
    NaiveDate::from_ymd_opt(2025, 7, 28)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// WhatsApp webhook listener configuration.
#[derive(Debug, Clone)]
pub struct WebhookConfig {
    /// Port for the webhook HTTP server.
    pub port: u16,
    /// Token echoed back during the subscription handshake.
    pub verify_token: String,
    /// App secret for `X-Hub-Signature-256` checks. Disabled when unset.
    pub app_secret: Option<SecretString>,
}

/// Chat-completions processor configuration.
#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    pub api_key: SecretString,
    pub model: String,
    pub base_url: String,
    pub timeout: Duration,
}

/// Document store configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub db_path: PathBuf,
    /// Collection name recorded on every saved document.
    pub collection: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("./data/message-pipeline.db"),
            collection: "mensagens".to_string(),
        }
    }
}

/// Full service configuration.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub task: TaskConfig,
    pub webhook: WebhookConfig,
    pub processor: ProcessorConfig,
    pub store: StoreConfig,
    /// Directory for rolling log files. Console only when unset.
    pub log_dir: Option<PathBuf>,
}

impl PipelineConfig {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = TaskConfig::default();

        let start_date = match lookup("PIPELINE_START_DATE") {
            Some(raw) => parse_start_date(&raw)?,
            None => defaults.start_date,
        };

        let tags = lookup("PIPELINE_TAGS")
            .map(|raw| {
                raw.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or(defaults.tags);

        let task = TaskConfig {
            dag_id: lookup("PIPELINE_DAG_ID").unwrap_or(defaults.dag_id),
            task_id: lookup("PIPELINE_TASK_ID").unwrap_or(defaults.task_id),
            owner: lookup("PIPELINE_OWNER").unwrap_or(defaults.owner),
            start_date,
            retries: parse_or(&lookup, "PIPELINE_RETRIES", defaults.retries)?,
            retry_delay: Duration::from_secs(parse_or(
                &lookup,
                "PIPELINE_RETRY_DELAY_SECS",
                defaults.retry_delay.as_secs(),
            )?),
            schedule: lookup("PIPELINE_SCHEDULE").unwrap_or(defaults.schedule),
            catchup: parse_or(&lookup, "PIPELINE_CATCHUP", defaults.catchup)?,
            tags,
        };

        let webhook = WebhookConfig {
            port: parse_or(&lookup, "PIPELINE_HTTP_PORT", 8080u16)?,
            verify_token: required(&lookup, "WHATSAPP_VERIFY_TOKEN")?,
            app_secret: lookup("WHATSAPP_APP_SECRET")
                .filter(|s| !s.is_empty())
                .map(SecretString::from),
        };

        let processor = ProcessorConfig {
            api_key: SecretString::from(required(&lookup, "OPENAI_API_KEY")?),
            model: lookup("OPENAI_MODEL").unwrap_or_else(|| "gpt-4o-mini".to_string()),
            base_url: lookup("OPENAI_BASE_URL")
                .unwrap_or_else(|| "https://api.openai.com/v1".to_string())
                .trim_end_matches('/')
                .to_string(),
            timeout: Duration::from_secs(parse_or(&lookup, "OPENAI_TIMEOUT_SECS", 60u64)?),
        };

        let store_defaults = StoreConfig::default();
        let store = StoreConfig {
            db_path: lookup("PIPELINE_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or(store_defaults.db_path),
            collection: lookup("PIPELINE_COLLECTION").unwrap_or(store_defaults.collection),
        };

        Ok(Self {
            task,
            webhook,
            processor,
            store,
            log_dir: lookup("PIPELINE_LOG_DIR").map(PathBuf::from),
        })
    }
}

fn required<F>(lookup: &F, key: &str) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        }),
        None => Ok(default),
    }
}

fn parse_start_date(raw: &str) -> Result<DateTime<Utc>, ConfigError> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
        .ok_or_else(|| ConfigError::InvalidValue {
            key: "PIPELINE_START_DATE".to_string(),
            message: format!("expected YYYY-MM-DD or RFC 3339, got '{raw}'"),
        })
}
