// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Status enums for commands, group executions, and scheduled tasks.
//!
//! Terminal states are sticky: transition helpers on the owning records
//! refuse to move a record out of a terminal state.

use serde::{Deserialize, Serialize};

/// Lifecycle of a single command invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Paused,
}

impl CommandStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, CommandStatus::Completed | CommandStatus::Failed)
    }
}

/// Aggregate status of a group execution or batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupStatus {
    Pending,
    Running,
    Completed,
    PartialSuccess,
    Failed,
}

impl GroupStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            GroupStatus::Completed | GroupStatus::PartialSuccess | GroupStatus::Failed
        )
    }

    /// Severity rank used to aggregate a batch from its steps:
    /// failed > partial_success > completed.
    fn severity(self) -> u8 {
        match self {
            GroupStatus::Pending | GroupStatus::Running => 0,
            GroupStatus::Completed => 1,
            GroupStatus::PartialSuccess => 2,
            GroupStatus::Failed => 3,
        }
    }

    /// Returns the more severe of two terminal states.
    pub fn worse(self, other: GroupStatus) -> GroupStatus {
        if other.severity() > self.severity() {
            other
        } else {
            self
        }
    }
}

impl std::fmt::Display for GroupStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            GroupStatus::Pending => "pending",
            GroupStatus::Running => "running",
            GroupStatus::Completed => "completed",
            GroupStatus::PartialSuccess => "partial_success",
            GroupStatus::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// Lifecycle of a scheduled task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
    Paused,
}

impl TaskStatus {
    /// Whether the scheduler may arm a trigger for a task in this state.
    pub fn is_schedulable(self) -> bool {
        matches!(self, TaskStatus::Pending | TaskStatus::Paused)
    }
}

#[cfg(test)]
#[path = "status_tests.rs"]
mod tests;
