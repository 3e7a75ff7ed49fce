// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Task scheduler: time-based triggering of command executions and
//! deployment handoffs.
//!
//! The time base is UTC throughout; naive timestamps in storage are treated
//! as UTC.

mod runner;
mod trigger;

pub use runner::{DeviceDirectory, SchedulerConfig, StaticDeviceDirectory, TaskScheduler};
pub use trigger::{next_fire, parse_cron, CronSchedule};

use dx_core::TaskId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error("task not found: {0}")]
    NotFound(TaskId),
    #[error("scheduled time is in the past")]
    ScheduledInPast,
    #[error("invalid cron expression: {0}")]
    InvalidCron(String),
    #[error("invalid recurrence: {0}")]
    InvalidRecurrence(String),
    #[error("task is not in a state that allows this transition")]
    InvalidTransition,
    #[error("no target devices resolved")]
    NoTargets,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}
