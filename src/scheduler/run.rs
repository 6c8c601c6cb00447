//! Task run records.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::TaskConfig;

/// Status of a single attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Success,
    /// Failed, another attempt is scheduled.
    UpForRetry,
    /// Failed with no attempts left.
    Failed,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Running => write!(f, "running"),
            RunStatus::Success => write!(f, "success"),
            RunStatus::UpForRetry => write!(f, "up_for_retry"),
            RunStatus::Failed => write!(f, "failed"),
        }
    }
}

impl FromStr for RunStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(RunStatus::Running),
            "success" => Ok(RunStatus::Success),
            "up_for_retry" => Ok(RunStatus::UpForRetry),
            "failed" => Ok(RunStatus::Failed),
            other => Err(format!("unknown run status: {other}")),
        }
    }
}

/// One attempt of the task for one scheduled slot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRun {
    pub id: Uuid,
    pub dag_id: String,
    pub task_id: String,
    /// The scheduled slot this attempt belongs to.
    pub logical_date: DateTime<Utc>,
    /// 1-based attempt number.
    pub attempt: u32,
    pub status: RunStatus,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl TaskRun {
    /// A new attempt in the `running` state.
    pub fn start(config: &TaskConfig, logical_date: DateTime<Utc>, attempt: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            dag_id: config.dag_id.clone(),
            task_id: config.task_id.clone(),
            logical_date,
            attempt,
            status: RunStatus::Running,
            error: None,
            started_at: Utc::now(),
            completed_at: None,
        }
    }
}
