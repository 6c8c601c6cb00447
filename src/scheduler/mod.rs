//! In-process task scheduler: cron slots, retries, run history.

pub mod run;
pub mod runner;
pub mod schedule;

pub use run::{RunStatus, TaskRun};
pub use runner::{TaskRunner, spawn_scheduler};
pub use schedule::{CronSchedule, SlotPlanner};
