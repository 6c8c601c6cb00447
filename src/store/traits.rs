//! Persistence traits beyond the pipeline's `DocumentStore` seam.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::scheduler::run::{RunStatus, TaskRun};

/// A persisted processing result.
#[derive(Debug, Clone)]
pub struct StoredDocument {
    pub id: String,
    pub collection: String,
    pub data: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Read access to persisted documents.
#[async_trait]
pub trait DocumentReader: Send + Sync {
    /// Get a document by ID.
    async fn get_document(&self, id: &str) -> Result<Option<StoredDocument>, DatabaseError>;

    /// Number of documents in the configured collection.
    async fn count_documents(&self) -> Result<usize, DatabaseError>;

    /// Most recent documents first, up to `limit`.
    async fn list_recent_documents(
        &self,
        limit: usize,
    ) -> Result<Vec<StoredDocument>, DatabaseError>;
}

/// History of task attempts.
#[async_trait]
pub trait RunLog: Send + Sync {
    /// Record the start of an attempt.
    async fn insert_task_run(&self, run: &TaskRun) -> Result<(), DatabaseError>;

    /// Set the final status of an attempt.
    async fn complete_task_run(
        &self,
        id: Uuid,
        status: RunStatus,
        error: Option<&str>,
    ) -> Result<(), DatabaseError>;

    /// Most recent attempts for a task, newest first.
    async fn list_task_runs(
        &self,
        task_id: &str,
        limit: usize,
    ) -> Result<Vec<TaskRun>, DatabaseError>;
}
