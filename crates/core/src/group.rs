// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Group execution state: one command fanned out across a device group,
//! and ordered batches of such executions.
//!
//! These are pure records; the controller's group executor drives the
//! transitions. Counter updates and completion checks happen in one call so
//! a device transition and its aggregate effect are never observable apart.

use crate::id::{AgentId, BatchId, CommandId, ExecutionId};
use crate::status::GroupStatus;
use crate::{DeviceId, GroupId};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Result of one command on one device within a group execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceResult {
    pub device_id: DeviceId,
    pub agent_id: AgentId,
    pub device_name: String,
    pub status: GroupStatus,
    #[serde(default)]
    pub output: String,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub started_at_ms: Option<u64>,
    #[serde(default)]
    pub completed_at_ms: Option<u64>,
    /// Queue entry mirroring this device's command, if one was registered.
    #[serde(default)]
    pub command_id: Option<CommandId>,
}

impl DeviceResult {
    fn new(device_id: DeviceId, agent_id: AgentId, device_name: Option<String>) -> Self {
        let device_name = device_name.unwrap_or_else(|| format!("Device-{device_id}"));
        Self {
            device_id,
            agent_id,
            device_name,
            status: GroupStatus::Pending,
            output: String::new(),
            error: None,
            started_at_ms: None,
            completed_at_ms: None,
            command_id: None,
        }
    }
}

/// Tracks execution of one command across every device in a group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupExecution {
    pub execution_id: ExecutionId,
    pub group_id: GroupId,
    pub group_name: String,
    pub command: String,
    pub shell: String,
    pub strategy: String,
    pub status: GroupStatus,
    /// Per-device results keyed by agent id, in dispatch order.
    pub device_results: IndexMap<AgentId, DeviceResult>,
    pub total_devices: usize,
    pub successful_devices: usize,
    pub failed_devices: usize,
    #[serde(default)]
    pub started_at_ms: Option<u64>,
    #[serde(default)]
    pub completed_at_ms: Option<u64>,
}

impl GroupExecution {
    pub fn new(
        group_id: GroupId,
        group_name: impl Into<String>,
        command: impl Into<String>,
        shell: impl Into<String>,
        strategy: impl Into<String>,
    ) -> Self {
        Self {
            execution_id: ExecutionId::new(),
            group_id,
            group_name: group_name.into(),
            command: command.into(),
            shell: shell.into(),
            strategy: strategy.into(),
            status: GroupStatus::Pending,
            device_results: IndexMap::new(),
            total_devices: 0,
            successful_devices: 0,
            failed_devices: 0,
            started_at_ms: None,
            completed_at_ms: None,
        }
    }

    /// Register a device to track in this execution.
    pub fn add_device(
        &mut self,
        device_id: DeviceId,
        agent_id: AgentId,
        device_name: Option<String>,
    ) {
        self.device_results
            .insert(agent_id.clone(), DeviceResult::new(device_id, agent_id, device_name));
        self.total_devices = self.device_results.len();
    }

    /// Mark a device as running, stamping its start time.
    pub fn mark_device_running(&mut self, agent_id: &AgentId, now_ms: u64) {
        if let Some(result) = self.device_results.get_mut(agent_id.as_str()) {
            if result.status == GroupStatus::Pending {
                result.status = GroupStatus::Running;
                result.started_at_ms = Some(now_ms);
            }
        }
    }

    pub fn set_device_command(&mut self, agent_id: &AgentId, command_id: CommandId) {
        if let Some(result) = self.device_results.get_mut(agent_id.as_str()) {
            result.command_id = Some(command_id);
        }
    }

    /// Record a device's terminal outcome and update the aggregate counters.
    ///
    /// Returns the execution's aggregate status if this transition made it
    /// terminal. A device already in a terminal state is left untouched, so
    /// duplicate completion events cannot double-count.
    pub fn complete_device(
        &mut self,
        agent_id: &AgentId,
        success: bool,
        output: &str,
        error: Option<&str>,
        now_ms: u64,
    ) -> Option<GroupStatus> {
        let result = self.device_results.get_mut(agent_id.as_str())?;
        if result.status.is_terminal() {
            return None;
        }

        result.status = if success { GroupStatus::Completed } else { GroupStatus::Failed };
        if !output.is_empty() {
            result.output.push_str(output);
        }
        if let Some(err) = error {
            result.error = Some(err.to_string());
        }
        if result.started_at_ms.is_none() {
            result.started_at_ms = Some(now_ms);
        }
        result.completed_at_ms = Some(now_ms);

        if success {
            self.successful_devices += 1;
        } else {
            self.failed_devices += 1;
        }

        self.check_completion(now_ms)
    }

    /// Re-evaluate the termination rule. Returns the aggregate status if the
    /// execution just became terminal.
    fn check_completion(&mut self, now_ms: u64) -> Option<GroupStatus> {
        if self.status.is_terminal() {
            return None;
        }
        let done = self.successful_devices + self.failed_devices;
        if done < self.total_devices {
            return None;
        }

        self.status = if self.failed_devices == 0 {
            GroupStatus::Completed
        } else if self.successful_devices == 0 {
            GroupStatus::Failed
        } else {
            GroupStatus::PartialSuccess
        };
        self.completed_at_ms = Some(now_ms);
        Some(self.status)
    }

    /// Agents whose device result is still non-terminal.
    pub fn unfinished_agents(&self) -> Vec<AgentId> {
        self.device_results
            .values()
            .filter(|r| !r.status.is_terminal())
            .map(|r| r.agent_id.clone())
            .collect()
    }

    /// Execution progress as a percentage of devices reaching a terminal state.
    pub fn progress(&self) -> f64 {
        if self.total_devices == 0 {
            return 0.0;
        }
        let done = self.successful_devices + self.failed_devices;
        (done as f64 / self.total_devices as f64) * 100.0
    }
}

/// Tracks sequential batch execution of multiple commands on a group.
///
/// Step `i + 1` is only dispatched after step `i` reached a terminal
/// aggregate state (or timed out).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchExecution {
    pub batch_id: BatchId,
    pub group_id: GroupId,
    pub group_name: String,
    pub commands: Vec<String>,
    pub shell: String,
    pub stop_on_failure: bool,
    pub status: GroupStatus,
    pub current_command_index: usize,
    /// Group executions started so far, one per dispatched step.
    pub execution_ids: Vec<ExecutionId>,
    #[serde(default)]
    pub started_at_ms: Option<u64>,
    #[serde(default)]
    pub completed_at_ms: Option<u64>,
    #[serde(default)]
    pub cancelled: bool,
}

impl BatchExecution {
    pub fn new(
        group_id: GroupId,
        group_name: impl Into<String>,
        commands: Vec<String>,
        shell: impl Into<String>,
        stop_on_failure: bool,
    ) -> Self {
        Self {
            batch_id: BatchId::new(),
            group_id,
            group_name: group_name.into(),
            commands,
            shell: shell.into(),
            stop_on_failure,
            status: GroupStatus::Pending,
            current_command_index: 0,
            execution_ids: Vec::new(),
            started_at_ms: None,
            completed_at_ms: None,
            cancelled: false,
        }
    }

    pub fn progress_summary(&self) -> String {
        let total = self.commands.len();
        let current = (self.current_command_index + 1).min(total);
        format!("{current}/{total} commands executed")
    }
}

#[cfg(test)]
#[path = "group_tests.rs"]
mod tests;
