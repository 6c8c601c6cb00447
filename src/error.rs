//! Error types for the message pipeline.

use std::time::Duration;

/// Top-level error type for the service.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("Processor error: {0}")]
    Processor(#[from] ProcessorError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("Scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Inbound channel errors.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Invalid message format: {0}")]
    InvalidMessage(String),

    #[error("Signature verification failed for channel {name}")]
    BadSignature { name: String },

    #[error("Channel {name} unavailable: {reason}")]
    Unavailable { name: String, reason: String },
}

/// Message processor errors.
///
/// These never leave the processor as `Err`; they are folded into a
/// `ProcessResult::Failure` so the step sees one outcome shape.
#[derive(Debug, thiserror::Error)]
pub enum ProcessorError {
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Provider {provider} returned HTTP {status}: {body}")]
    HttpStatus {
        provider: String,
        status: u16,
        body: String,
    },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("Provider {provider} timed out after {timeout:?}")]
    Timeout { provider: String, timeout: Duration },
}

/// Failures of a single pipeline run.
///
/// "No message" and "processing failed" share one variant: the scheduler
/// treats them the same way and only the message differs.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("{0}")]
    Failed(String),

    #[error("Fetch failed: {0}")]
    Fetch(#[from] ChannelError),

    #[error("Persist failed: {0}")]
    Persist(#[from] DatabaseError),
}

/// Scheduler errors.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("Invalid cron expression '{expression}': {reason}")]
    InvalidSchedule { expression: String, reason: String },

    #[error("Task {task_id} failed after {attempts} attempt(s): {reason}")]
    TaskFailed {
        task_id: String,
        attempts: u32,
        reason: String,
    },

    #[error("Scheduler shut down")]
    Shutdown,
}

/// Result type alias for the service.
pub type Result<T> = std::result::Result<T, Error>;
