//! Task runner — retry policy, run records and the cron ticker.
//!
//! Runs are serial: the ticker awaits each slot (including its retries)
//! before planning the next one, so at most one run is active.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::{Instrument, error, info, info_span, warn};

use crate::config::TaskConfig;
use crate::error::SchedulerError;
use crate::pipeline::{PipelineStep, StepOutcome};
use crate::scheduler::run::{RunStatus, TaskRun};
use crate::scheduler::schedule::SlotPlanner;
use crate::store::RunLog;

/// Executes the pipeline step for a slot under the retry policy.
pub struct TaskRunner {
    config: TaskConfig,
    step: Arc<PipelineStep>,
    run_log: Option<Arc<dyn RunLog>>,
    shutdown: watch::Receiver<bool>,
}

impl TaskRunner {
    /// `shutdown` flips to `true` to abandon pending retries.
    pub fn new(
        config: TaskConfig,
        step: Arc<PipelineStep>,
        run_log: Option<Arc<dyn RunLog>>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            config,
            step,
            run_log,
            shutdown,
        }
    }

    pub fn config(&self) -> &TaskConfig {
        &self.config
    }

    /// Run the step for one slot, retrying up to `retries` more times.
    pub async fn run_slot(
        &self,
        logical_date: DateTime<Utc>,
    ) -> Result<StepOutcome, SchedulerError> {
        let max_attempts = self.config.retries.saturating_add(1);
        let mut shutdown = self.shutdown.clone();
        let mut attempt = 1;

        loop {
            if *shutdown.borrow() {
                return Err(SchedulerError::Shutdown);
            }

            let run = TaskRun::start(&self.config, logical_date, attempt);
            self.record_start(&run).await;

            let span = info_span!(
                "task_run",
                dag_id = %self.config.dag_id,
                task_id = %self.config.task_id,
                owner = %self.config.owner,
                logical_date = %logical_date,
                attempt,
            );

            let result = self.step.run().instrument(span).await;

            let reason = match result {
                Ok(outcome) => {
                    self.record_completion(&run, RunStatus::Success, None).await;
                    info!(
                        task_id = %self.config.task_id,
                        attempt,
                        message_id = %outcome.message_id,
                        "Task succeeded"
                    );
                    return Ok(outcome);
                }
                Err(e) => e.to_string(),
            };

            if attempt >= max_attempts {
                self.record_completion(&run, RunStatus::Failed, Some(&reason))
                    .await;
                error!(
                    task_id = %self.config.task_id,
                    attempts = attempt,
                    error = %reason,
                    "Task failed, no retries left"
                );
                return Err(SchedulerError::TaskFailed {
                    task_id: self.config.task_id.clone(),
                    attempts: attempt,
                    reason,
                });
            }

            self.record_completion(&run, RunStatus::UpForRetry, Some(&reason))
                .await;
            warn!(
                task_id = %self.config.task_id,
                attempt,
                error = %reason,
                "Task failed, retrying in {:?}",
                self.config.retry_delay
            );

            tokio::select! {
                _ = tokio::time::sleep(self.config.retry_delay) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        return Err(SchedulerError::Shutdown);
                    }
                }
            }
            attempt += 1;
        }
    }

    async fn record_start(&self, run: &TaskRun) {
        if let Some(ref log) = self.run_log
            && let Err(e) = log.insert_task_run(run).await
        {
            error!(run_id = %run.id, "Failed to record run start: {}", e);
        }
    }

    async fn record_completion(&self, run: &TaskRun, status: RunStatus, error: Option<&str>) {
        if let Some(ref log) = self.run_log
            && let Err(e) = log.complete_task_run(run.id, status, error).await
        {
            error!(run_id = %run.id, "Failed to record run completion: {}", e);
        }
    }
}

/// Spawn the cron ticker background task.
///
/// Sleeps until the next planned slot, runs it, and repeats until shutdown.
pub fn spawn_scheduler(
    runner: Arc<TaskRunner>,
    mut planner: SlotPlanner,
    mut shutdown: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        info!(
            dag_id = %runner.config().dag_id,
            schedule = planner.schedule().expression(),
            catchup = runner.config().catchup,
            tags = ?runner.config().tags,
            "Scheduler started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            let now = Utc::now();
            let Some(slot) = planner.next_slot(now) else {
                warn!("Schedule has no further slots, stopping");
                break;
            };
            let wait = (slot - now).to_std().unwrap_or_default();

            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            }

            planner.mark_run(slot);
            // Task failures are logged by the runner; the next slot proceeds as usual.
            if let Err(SchedulerError::Shutdown) = runner.run_slot(slot).await {
                break;
            }
        }

        info!("Scheduler stopped");
    })
}
