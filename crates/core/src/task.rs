// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Scheduled task records.
//!
//! The scheduler's time base is UTC; naive timestamps loaded from storage are
//! treated as UTC. Trigger arithmetic lives in the controller's scheduler;
//! these are the durable records it operates on.

use crate::id::TaskId;
use crate::status::TaskStatus;
use crate::{DeviceId, GroupId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What a scheduled task does when it fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Command,
    SoftwareDeploy,
    FileDeploy,
}

/// Hour and minute of day, parsed from `"HH:MM"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeOfDay {
    pub hour: u32,
    pub minute: u32,
}

impl TimeOfDay {
    pub fn new(hour: u32, minute: u32) -> Option<Self> {
        if hour > 23 || minute > 59 {
            return None;
        }
        Some(Self { hour, minute })
    }

    /// Parse `"HH:MM"`. Returns `None` for malformed or out-of-range input.
    pub fn parse(s: &str) -> Option<Self> {
        let (h, m) = s.split_once(':')?;
        Self::new(h.trim().parse().ok()?, m.trim().parse().ok()?)
    }
}

impl std::fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

/// When a task fires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Recurrence {
    /// Fire exactly once at the task's `scheduled_time`.
    Once,
    /// Daily at the given time of day.
    Daily { time: TimeOfDay },
    /// Weekly on the listed weekdays (0 = Monday .. 6 = Sunday).
    Weekly { days: Vec<u8>, time: TimeOfDay },
    /// Monthly on the given day of month (1..=31; short months skip).
    Monthly { day: u32, time: TimeOfDay },
    /// Arbitrary 5-field cron expression (minute hour dom month dow).
    Cron { expression: String },
}

impl Recurrence {
    pub fn is_once(&self) -> bool {
        matches!(self, Recurrence::Once)
    }
}

/// One historical firing of a scheduled task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskExecution {
    pub execution_time: DateTime<Utc>,
    pub status: TaskStatus,
    #[serde(default)]
    pub completed_time: Option<DateTime<Utc>>,
    /// Downstream id: group execution id, batch id, or deployment id.
    #[serde(default)]
    pub deployment_id: Option<String>,
    /// Kind-specific outcome details (downstream aggregate status etc).
    #[serde(default)]
    pub result: Option<serde_json::Value>,
    #[serde(default)]
    pub error_message: Option<String>,
}

/// A task the scheduler fires at a future or recurring time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledTask {
    pub id: TaskId,
    pub name: String,
    pub kind: TaskKind,
    pub status: TaskStatus,
    pub scheduled_time: DateTime<Utc>,
    pub recurrence: Recurrence,
    /// Kind-specific payload: `command`/`commands`, software list, file list.
    pub payload: serde_json::Value,
    #[serde(default)]
    pub device_ids: Vec<DeviceId>,
    #[serde(default)]
    pub group_ids: Vec<GroupId>,
    #[serde(default)]
    pub last_execution: Option<DateTime<Utc>>,
    #[serde(default)]
    pub next_execution: Option<DateTime<Utc>>,
    #[serde(default)]
    pub execution_count: u64,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub history: Vec<TaskExecution>,
}

impl ScheduledTask {
    pub fn new(
        name: impl Into<String>,
        kind: TaskKind,
        scheduled_time: DateTime<Utc>,
        recurrence: Recurrence,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id: TaskId::new(),
            name: name.into(),
            kind,
            status: TaskStatus::Pending,
            scheduled_time,
            recurrence,
            payload,
            device_ids: Vec::new(),
            group_ids: Vec::new(),
            last_execution: None,
            next_execution: None,
            execution_count: 0,
            error_message: None,
            history: Vec::new(),
        }
    }

    /// Record the outcome of a firing and move the task to its post-fire
    /// state: once-tasks become terminal with `next_execution` cleared,
    /// recurring tasks go back to pending.
    pub fn finish_execution(&mut self, execution: TaskExecution) {
        self.last_execution = Some(execution.execution_time);
        self.error_message = execution.error_message.clone();
        let failed = execution.status == TaskStatus::Failed;
        self.history.push(execution);

        if self.recurrence.is_once() {
            self.status = if failed { TaskStatus::Failed } else { TaskStatus::Completed };
            self.next_execution = None;
        } else {
            self.status = if failed { TaskStatus::Failed } else { TaskStatus::Pending };
        }
    }
}

#[cfg(test)]
#[path = "task_tests.rs"]
mod tests;
