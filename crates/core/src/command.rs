// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Command invocation records, as tracked by the controller's command queue.

use crate::id::{AgentId, CommandId, ExecutionId, SnapshotId};
use crate::status::CommandStatus;
use crate::DeviceId;
use serde::{Deserialize, Serialize};

/// One command dispatched to one agent.
///
/// Invariant: `completed_at_ms` is set iff the status is terminal. Records
/// loaded from disk that violate this are repaired by [`CommandRecord::repair`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandRecord {
    pub id: CommandId,
    pub agent_id: AgentId,
    pub command: String,
    pub shell: String,
    pub strategy: String,
    pub status: CommandStatus,
    #[serde(default)]
    pub output: String,
    #[serde(default)]
    pub error: Option<String>,
    pub created_at_ms: u64,
    #[serde(default)]
    pub started_at_ms: Option<u64>,
    #[serde(default)]
    pub completed_at_ms: Option<u64>,
    /// Snapshot taken by the agent before running this command, if any.
    #[serde(default)]
    pub snapshot_id: Option<SnapshotId>,
    /// The group execution this command belongs to, if it was fanned out.
    #[serde(default)]
    pub execution_id: Option<ExecutionId>,
    #[serde(default)]
    pub device_id: Option<DeviceId>,
}

impl CommandRecord {
    pub fn new(agent_id: AgentId, command: String, shell: String, now_ms: u64) -> Self {
        Self {
            id: CommandId::new(),
            agent_id,
            command,
            shell,
            strategy: "transactional".to_string(),
            status: CommandStatus::Pending,
            output: String::new(),
            error: None,
            created_at_ms: now_ms,
            started_at_ms: None,
            completed_at_ms: None,
            snapshot_id: None,
            execution_id: None,
            device_id: None,
        }
    }

    /// Apply a status transition, stamping timestamps.
    ///
    /// Terminal states are sticky: once completed or failed, further
    /// transitions are ignored and `false` is returned.
    pub fn transition(&mut self, status: CommandStatus, now_ms: u64) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        let old = self.status;
        self.status = status;
        if status == CommandStatus::Running && old == CommandStatus::Pending {
            self.started_at_ms = Some(now_ms);
        }
        if status.is_terminal() {
            self.completed_at_ms = Some(now_ms);
        }
        true
    }

    /// Repair obvious inconsistencies after loading from disk.
    ///
    /// Returns `true` if anything changed.
    pub fn repair(&mut self) -> bool {
        let mut changed = false;
        // completed_at without a terminal status: force completed
        if self.completed_at_ms.is_some() && !self.status.is_terminal() {
            self.status = CommandStatus::Completed;
            changed = true;
        }
        // running/terminal without started_at: backfill from creation
        if self.started_at_ms.is_none()
            && matches!(
                self.status,
                CommandStatus::Running | CommandStatus::Completed | CommandStatus::Failed
            )
        {
            self.started_at_ms = Some(self.created_at_ms);
            changed = true;
        }
        changed
    }
}

#[cfg(test)]
#[path = "command_tests.rs"]
mod tests;
