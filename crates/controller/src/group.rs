// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Group command executor.
//!
//! Fans one command across every device in a group, aggregates per-device
//! completions into one execution, and sequences batches: step `i + 1` is
//! dispatched only after step `i` reached a terminal aggregate state or
//! timed out. Stop-on-failure stops a batch only on total failure; partial
//! success continues.

use crate::link::{AgentLink, LinkError};
use crate::queue::CommandQueue;
use dx_core::{
    AgentId, BatchExecution, BatchId, Clock, CommandId, CommandRecord, CommandStatus, DeviceId,
    ExecutionId, GroupExecution, GroupId, GroupStatus,
};
use dx_wire::WireEvent;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Default per-step timeout in a sequential batch.
pub const DEFAULT_STEP_TIMEOUT: Duration = Duration::from_secs(300);

/// Aggregate-state polling cadence while waiting on a step.
const STEP_POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum GroupError {
    #[error("no devices in group")]
    NoDevices,
    #[error("no commands provided")]
    NoCommands,
}

/// One device targeted by a group execution.
#[derive(Debug, Clone)]
pub struct DeviceTarget {
    pub device_id: DeviceId,
    pub agent_id: AgentId,
    pub device_name: Option<String>,
}

pub struct GroupCommandExecutor<C: Clock> {
    link: Arc<dyn AgentLink>,
    queue: Arc<CommandQueue>,
    clock: C,
    step_timeout: Duration,
    executions: Arc<Mutex<HashMap<ExecutionId, GroupExecution>>>,
    batches: Arc<Mutex<HashMap<BatchId, BatchExecution>>>,
    /// command_id → (execution, agent), for completion routing.
    command_index: Arc<Mutex<HashMap<CommandId, (ExecutionId, AgentId)>>>,
}

impl<C: Clock> GroupCommandExecutor<C> {
    pub fn new(link: Arc<dyn AgentLink>, queue: Arc<CommandQueue>, clock: C) -> Self {
        Self {
            link,
            queue,
            clock,
            step_timeout: DEFAULT_STEP_TIMEOUT,
            executions: Arc::new(Mutex::new(HashMap::new())),
            batches: Arc::new(Mutex::new(HashMap::new())),
            command_index: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn with_step_timeout(mut self, timeout: Duration) -> Self {
        self.step_timeout = timeout;
        self
    }

    /// Execute a single command on all devices in a group. Per-device sends
    /// are parallel and non-blocking; aggregation is driven by completion
    /// events. Returns the execution id immediately.
    pub async fn execute_group_command(
        &self,
        group_id: GroupId,
        group_name: &str,
        devices: &[DeviceTarget],
        command: &str,
        shell: &str,
        strategy: &str,
    ) -> Result<ExecutionId, GroupError> {
        if devices.is_empty() {
            return Err(GroupError::NoDevices);
        }

        let mut execution = GroupExecution::new(group_id, group_name, command, shell, strategy);
        for device in devices {
            execution.add_device(
                device.device_id,
                device.agent_id.clone(),
                device.device_name.clone(),
            );
        }
        execution.status = GroupStatus::Running;
        execution.started_at_ms = Some(self.clock.epoch_ms());

        let execution_id = execution.execution_id.clone();
        self.executions.lock().insert(execution_id.clone(), execution);
        tracing::info!(
            %execution_id,
            group = group_name,
            devices = devices.len(),
            command,
            "starting group command execution"
        );

        for device in devices {
            self.dispatch_to_device(&execution_id, device, command, shell, strategy).await;
        }

        Ok(execution_id)
    }

    /// Send the command to one device, registering a mirror entry in the
    /// command queue. A device without a live agent fails immediately with
    /// `agent_not_connected` (and the mirror entry is failed for visibility).
    async fn dispatch_to_device(
        &self,
        execution_id: &ExecutionId,
        device: &DeviceTarget,
        command: &str,
        shell: &str,
        strategy: &str,
    ) {
        let now_ms = self.clock.epoch_ms();
        let agent_id = &device.agent_id;

        let mut record =
            CommandRecord::new(agent_id.clone(), command.to_string(), shell.to_string(), now_ms);
        record.strategy = strategy.to_string();
        record.execution_id = Some(execution_id.clone());
        record.device_id = Some(device.device_id);
        let command_id = record.id.clone();

        if !self.link.is_connected(agent_id) {
            tracing::error!(%agent_id, %execution_id, "agent not connected");
            record.transition(CommandStatus::Failed, now_ms);
            record.error = Some("Agent not connected".to_string());
            self.queue.add(record);
            self.complete_device(execution_id, agent_id, false, "", Some("Agent not connected"));
            return;
        }

        self.queue.add(record);
        self.queue.update_status(&command_id, CommandStatus::Running, None, None, now_ms);
        self.command_index
            .lock()
            .insert(command_id.clone(), (execution_id.clone(), agent_id.clone()));
        if let Some(execution) = self.executions.lock().get_mut(execution_id.as_str()) {
            execution.set_device_command(agent_id, command_id.clone());
            execution.mark_device_running(agent_id, now_ms);
        }

        let event = WireEvent::ExecuteDeploymentCommand {
            command_id: command_id.clone(),
            command: command.to_string(),
            shell: shell.to_string(),
            execution_id: Some(execution_id.clone()),
            group_execution: true,
        };
        match self.link.dispatch(agent_id, event).await {
            Ok(()) => {
                tracing::debug!(%agent_id, %command_id, "command dispatched");
            }
            Err(LinkError::NotConnected(_)) => {
                self.fail_command(&command_id, "Agent not connected");
                self.complete_device(
                    execution_id,
                    agent_id,
                    false,
                    "",
                    Some("Agent not connected"),
                );
            }
            Err(e) => {
                let message = e.to_string();
                self.fail_command(&command_id, &message);
                self.complete_device(execution_id, agent_id, false, "", Some(&message));
            }
        }
    }

    fn fail_command(&self, command_id: &CommandId, error: &str) {
        self.queue.update_status(
            command_id,
            CommandStatus::Failed,
            None,
            Some(error),
            self.clock.epoch_ms(),
        );
    }

    /// Route a `deployment_command_completed` event by command id.
    ///
    /// Matching by command id means a completion arriving through a *new*
    /// session of the same agent is still honoured.
    pub fn handle_command_completion(
        &self,
        command_id: &CommandId,
        success: bool,
        output: &str,
        error: Option<&str>,
    ) {
        let now_ms = self.clock.epoch_ms();
        let status = if success { CommandStatus::Completed } else { CommandStatus::Failed };
        self.queue.update_status(command_id, status, Some(output), error, now_ms);

        let Some((execution_id, agent_id)) = self.command_index.lock().remove(command_id.as_str())
        else {
            return;
        };
        self.complete_device(&execution_id, &agent_id, success, output, error);
    }

    /// Record a snapshot id reported with a command's completion.
    pub fn attach_snapshot(&self, command_id: &CommandId, snapshot_id: dx_core::SnapshotId) {
        // The queue owns the durable record; nothing else tracks snapshots.
        if let Some(mut record) = self.queue.get(command_id) {
            record.snapshot_id = Some(snapshot_id);
            self.queue.add(record);
        }
    }

    fn complete_device(
        &self,
        execution_id: &ExecutionId,
        agent_id: &AgentId,
        success: bool,
        output: &str,
        error: Option<&str>,
    ) {
        let now_ms = self.clock.epoch_ms();
        let mut executions = self.executions.lock();
        let Some(execution) = executions.get_mut(execution_id.as_str()) else {
            tracing::warn!(%execution_id, "completion for unknown execution");
            return;
        };
        if let Some(terminal) = execution.complete_device(agent_id, success, output, error, now_ms)
        {
            tracing::info!(
                %execution_id,
                status = %terminal,
                successful = execution.successful_devices,
                failed = execution.failed_devices,
                "group execution finished"
            );
        }
    }

    /// Execute commands sequentially across a group: every device runs
    /// command `i` before any device sees command `i + 1`. Returns the batch
    /// id immediately; the batch runs as a background task.
    pub async fn execute_batch_sequential(
        self: &Arc<Self>,
        group_id: GroupId,
        group_name: &str,
        devices: Vec<DeviceTarget>,
        commands: Vec<String>,
        shell: &str,
        stop_on_failure: bool,
    ) -> Result<BatchId, GroupError> {
        if devices.is_empty() {
            return Err(GroupError::NoDevices);
        }
        if commands.is_empty() {
            return Err(GroupError::NoCommands);
        }

        let batch =
            BatchExecution::new(group_id, group_name, commands, shell, stop_on_failure);
        let batch_id = batch.batch_id.clone();
        self.batches.lock().insert(batch_id.clone(), batch);

        let executor = Arc::clone(self);
        let id = batch_id.clone();
        tokio::spawn(async move {
            executor.run_batch(id, devices).await;
        });

        Ok(batch_id)
    }

    async fn run_batch(&self, batch_id: BatchId, devices: Vec<DeviceTarget>) {
        let (group_id, group_name, commands, shell, stop_on_failure) = {
            let mut batches = self.batches.lock();
            let Some(batch) = batches.get_mut(batch_id.as_str()) else { return };
            batch.status = GroupStatus::Running;
            batch.started_at_ms = Some(self.clock.epoch_ms());
            (
                batch.group_id,
                batch.group_name.clone(),
                batch.commands.clone(),
                batch.shell.clone(),
                batch.stop_on_failure,
            )
        };

        tracing::info!(%batch_id, commands = commands.len(), "starting sequential batch");
        let mut worst = GroupStatus::Completed;
        let mut last_step_status = None;

        for (index, command) in commands.iter().enumerate() {
            // A cancelled batch starts no further steps; the current one has
            // already run to termination.
            if self.batches.lock().get(batch_id.as_str()).map(|b| b.cancelled).unwrap_or(true) {
                tracing::info!(%batch_id, "batch cancelled, stopping before step {index}");
                break;
            }

            {
                let mut batches = self.batches.lock();
                if let Some(batch) = batches.get_mut(batch_id.as_str()) {
                    batch.current_command_index = index;
                }
            }

            let execution_id = match self
                .execute_group_command(
                    group_id,
                    &group_name,
                    &devices,
                    command,
                    &shell,
                    "transactional",
                )
                .await
            {
                Ok(id) => id,
                Err(e) => {
                    tracing::error!(%batch_id, %e, "failed to start batch step");
                    worst = GroupStatus::Failed;
                    last_step_status = Some(GroupStatus::Failed);
                    break;
                }
            };

            {
                let mut batches = self.batches.lock();
                if let Some(batch) = batches.get_mut(batch_id.as_str()) {
                    batch.execution_ids.push(execution_id.clone());
                }
            }

            let step_status = self.await_step(&execution_id).await;
            tracing::info!(%batch_id, step = index, status = %step_status, "batch step finished");

            worst = worst.worse(step_status);
            last_step_status = Some(step_status);

            if stop_on_failure && step_status == GroupStatus::Failed {
                tracing::warn!(%batch_id, step = index, "stopping batch: all devices failed");
                break;
            }
        }

        // Aggregate rule: completed iff the last executed step completed,
        // otherwise the most severe terminal state observed.
        let final_status = match last_step_status {
            Some(GroupStatus::Completed) => GroupStatus::Completed,
            Some(_) => worst,
            None => GroupStatus::Failed,
        };
        let mut batches = self.batches.lock();
        if let Some(batch) = batches.get_mut(batch_id.as_str()) {
            batch.status = final_status;
            batch.completed_at_ms = Some(self.clock.epoch_ms());
        }
        tracing::info!(%batch_id, status = %final_status, "batch finished");
    }

    /// Poll a step's aggregate state at 1 Hz until terminal or timed out.
    /// On timeout, devices still running are failed as `agent_not_connected`
    /// and the resulting aggregate is returned.
    async fn await_step(&self, execution_id: &ExecutionId) -> GroupStatus {
        let deadline = tokio::time::Instant::now() + self.step_timeout;
        loop {
            if let Some(status) = self.terminal_status(execution_id) {
                return status;
            }
            if tokio::time::Instant::now() >= deadline {
                tracing::warn!(%execution_id, "step timed out, failing unfinished devices");
                return self.fail_unfinished(execution_id);
            }
            tokio::time::sleep(STEP_POLL_INTERVAL).await;
        }
    }

    fn terminal_status(&self, execution_id: &ExecutionId) -> Option<GroupStatus> {
        let executions = self.executions.lock();
        let execution = executions.get(execution_id.as_str())?;
        execution.status.is_terminal().then_some(execution.status)
    }

    /// Fail every non-terminal device on a timed-out step.
    fn fail_unfinished(&self, execution_id: &ExecutionId) -> GroupStatus {
        let unfinished = {
            let executions = self.executions.lock();
            executions
                .get(execution_id.as_str())
                .map(|e| e.unfinished_agents())
                .unwrap_or_default()
        };
        for agent_id in unfinished {
            self.complete_device(execution_id, &agent_id, false, "", Some("agent_not_connected"));
        }
        self.terminal_status(execution_id).unwrap_or(GroupStatus::Failed)
    }

    /// Flag a batch so no further steps start. Steps already dispatched run
    /// to termination.
    pub fn cancel_batch(&self, batch_id: &BatchId) -> bool {
        let mut batches = self.batches.lock();
        match batches.get_mut(batch_id.as_str()) {
            Some(batch) if !batch.status.is_terminal() => {
                batch.cancelled = true;
                true
            }
            _ => false,
        }
    }

    /// Snapshot copy of an execution for readers.
    pub fn execution(&self, execution_id: &ExecutionId) -> Option<GroupExecution> {
        self.executions.lock().get(execution_id.as_str()).cloned()
    }

    /// Snapshot copy of a batch for readers.
    pub fn batch(&self, batch_id: &BatchId) -> Option<BatchExecution> {
        self.batches.lock().get(batch_id.as_str()).cloned()
    }

    pub fn active_executions(&self) -> Vec<GroupExecution> {
        self.executions.lock().values().cloned().collect()
    }

    pub fn active_batches(&self) -> Vec<BatchExecution> {
        self.batches.lock().values().cloned().collect()
    }

    /// Drop a terminal execution from active tracking.
    pub fn cleanup_execution(&self, execution_id: &ExecutionId) -> bool {
        let mut executions = self.executions.lock();
        match executions.get(execution_id.as_str()) {
            Some(execution) if execution.status.is_terminal() => {
                executions.remove(execution_id.as_str());
                true
            }
            _ => false,
        }
    }

    /// Drop a terminal batch from active tracking.
    pub fn cleanup_batch(&self, batch_id: &BatchId) -> bool {
        let mut batches = self.batches.lock();
        match batches.get(batch_id.as_str()) {
            Some(batch) if batch.status.is_terminal() => {
                batches.remove(batch_id.as_str());
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
#[path = "group_tests.rs"]
mod tests;
