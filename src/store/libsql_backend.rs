//! libSQL backend — JSON document store and task-run log.
//!
//! Supports local file and in-memory databases.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::pipeline::types::DocumentStore;
use crate::scheduler::run::{RunStatus, TaskRun};
use crate::store::migrations;
use crate::store::traits::{DocumentReader, RunLog, StoredDocument};

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
    collection: String,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path, collection: &str) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let backend = Self::from_database(db, collection).await?;
        info!(path = %path.display(), collection, "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory(collection: &str) -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;
        Self::from_database(db, collection).await
    }

    async fn from_database(db: LibSqlDatabase, collection: &str) -> Result<Self, DatabaseError> {
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        migrations::run_migrations(&conn).await?;

        Ok(Self {
            db: Arc::new(db),
            conn,
            collection: collection.to_string(),
        })
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Collection name recorded on saved documents.
    pub fn collection(&self) -> &str {
        &self.collection
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

fn opt_text(s: Option<&str>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s.to_string()),
        None => libsql::Value::Null,
    }
}

fn row_to_document(row: &libsql::Row) -> Result<StoredDocument, DatabaseError> {
    let parse = |e: libsql::Error| DatabaseError::Query(format!("document row parse: {e}"));
    let data_str: String = row.get(2).map_err(parse)?;
    let created_str: String = row.get(3).map_err(parse)?;
    let data = serde_json::from_str(&data_str)
        .map_err(|e| DatabaseError::Serialization(format!("document data: {e}")))?;

    Ok(StoredDocument {
        id: row.get(0).map_err(parse)?,
        collection: row.get(1).map_err(parse)?,
        data,
        created_at: parse_datetime(&created_str),
    })
}

fn row_to_run(row: &libsql::Row) -> Result<TaskRun, DatabaseError> {
    let parse = |e: libsql::Error| DatabaseError::Query(format!("task_run row parse: {e}"));
    let id_str: String = row.get(0).map_err(parse)?;
    let logical_str: String = row.get(3).map_err(parse)?;
    let attempt: i64 = row.get(4).map_err(parse)?;
    let status_str: String = row.get(5).map_err(parse)?;
    let started_str: String = row.get(7).map_err(parse)?;
    let completed_str: Option<String> = row.get(8).ok();

    Ok(TaskRun {
        id: Uuid::parse_str(&id_str)
            .map_err(|e| DatabaseError::Serialization(format!("task_run id: {e}")))?,
        dag_id: row.get(1).map_err(parse)?,
        task_id: row.get(2).map_err(parse)?,
        logical_date: parse_datetime(&logical_str),
        attempt: attempt.max(0) as u32,
        status: status_str
            .parse()
            .map_err(|e: String| DatabaseError::Serialization(e))?,
        error: row.get(6).ok(),
        started_at: parse_datetime(&started_str),
        completed_at: completed_str.as_deref().map(parse_datetime),
    })
}

const DOCUMENT_COLUMNS: &str = "id, collection, data, created_at";

const RUN_COLUMNS: &str =
    "id, dag_id, task_id, logical_date, attempt, status, error, started_at, completed_at";

// ── Trait implementations ───────────────────────────────────────────

#[async_trait]
impl DocumentStore for LibSqlBackend {
    async fn save(&self, data: &serde_json::Value) -> Result<String, DatabaseError> {
        let id = Uuid::new_v4().to_string();
        let body = serde_json::to_string(data)
            .map_err(|e| DatabaseError::Serialization(format!("document data: {e}")))?;

        self.conn()
            .execute(
                "INSERT INTO documents (id, collection, data, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![
                    id.clone(),
                    self.collection.clone(),
                    body,
                    Utc::now().to_rfc3339()
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("save: {e}")))?;

        debug!(document_id = %id, collection = %self.collection, "Document saved");
        Ok(id)
    }
}

#[async_trait]
impl DocumentReader for LibSqlBackend {
    async fn get_document(&self, id: &str) -> Result<Option<StoredDocument>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {DOCUMENT_COLUMNS} FROM documents WHERE id = ?1 AND collection = ?2"
                ),
                params![id, self.collection.as_str()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_document: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_document(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_document: {e}"))),
        }
    }

    async fn count_documents(&self) -> Result<usize, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT COUNT(*) FROM documents WHERE collection = ?1",
                params![self.collection.clone()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("count_documents: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(row.get::<i64>(0).unwrap_or(0).max(0) as usize),
            Ok(None) => Ok(0),
            Err(e) => Err(DatabaseError::Query(format!("count_documents: {e}"))),
        }
    }

    async fn list_recent_documents(
        &self,
        limit: usize,
    ) -> Result<Vec<StoredDocument>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {DOCUMENT_COLUMNS} FROM documents WHERE collection = ?1 \
                     ORDER BY created_at DESC, rowid DESC LIMIT ?2"
                ),
                params![self.collection.clone(), limit as i64],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_recent_documents: {e}")))?;

        let mut out = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("list_recent_documents: {e}")))?
        {
            out.push(row_to_document(&row)?);
        }
        Ok(out)
    }
}

#[async_trait]
impl RunLog for LibSqlBackend {
    async fn insert_task_run(&self, run: &TaskRun) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                &format!(
                    "INSERT INTO task_runs ({RUN_COLUMNS}) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"
                ),
                params![
                    run.id.to_string(),
                    run.dag_id.clone(),
                    run.task_id.clone(),
                    run.logical_date.to_rfc3339(),
                    run.attempt as i64,
                    run.status.to_string(),
                    opt_text(run.error.as_deref()),
                    run.started_at.to_rfc3339(),
                    opt_text(run.completed_at.map(|t| t.to_rfc3339()).as_deref()),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("insert_task_run: {e}")))?;
        Ok(())
    }

    async fn complete_task_run(
        &self,
        id: Uuid,
        status: RunStatus,
        error: Option<&str>,
    ) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "UPDATE task_runs SET status = ?1, error = ?2, completed_at = ?3 WHERE id = ?4",
                params![
                    status.to_string(),
                    opt_text(error),
                    Utc::now().to_rfc3339(),
                    id.to_string()
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("complete_task_run: {e}")))?;
        Ok(())
    }

    async fn list_task_runs(
        &self,
        task_id: &str,
        limit: usize,
    ) -> Result<Vec<TaskRun>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {RUN_COLUMNS} FROM task_runs WHERE task_id = ?1 \
                     ORDER BY started_at DESC, rowid DESC LIMIT ?2"
                ),
                params![task_id, limit as i64],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_task_runs: {e}")))?;

        let mut out = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("list_task_runs: {e}")))?
        {
            out.push(row_to_run(&row)?);
        }
        Ok(out)
    }
}
