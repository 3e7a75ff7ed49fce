// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The scheduler loop: arm triggers, fire due tasks, and wait on the
//! execution plane for terminal state before stamping the task's history.

use super::trigger::next_fire;
use super::ScheduleError;
use crate::deploy::DeploymentDispatcher;
use crate::group::{DeviceTarget, GroupCommandExecutor};
use dx_core::{
    BatchId, Clock, DeviceId, ExecutionId, GroupId, GroupStatus, ScheduledTask, TaskExecution,
    TaskId, TaskKind, TaskStatus,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Resolves device and group ids to concrete dispatch targets. The device
/// inventory itself lives outside the core.
pub trait DeviceDirectory: Send + Sync + 'static {
    fn resolve(&self, device_ids: &[DeviceId], group_ids: &[GroupId]) -> Vec<DeviceTarget>;
}

/// File-backed device inventory for controllers running without the full
/// device database.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StaticDeviceDirectory {
    #[serde(default)]
    devices: Vec<StaticDevice>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StaticDevice {
    device_id: DeviceId,
    agent_id: String,
    #[serde(default)]
    device_name: Option<String>,
    #[serde(default)]
    group_ids: Vec<GroupId>,
}

impl StaticDeviceDirectory {
    pub fn from_file(path: &std::path::Path) -> Result<Self, ScheduleError> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn with_device(
        mut self,
        device_id: DeviceId,
        agent_id: &str,
        group_ids: Vec<GroupId>,
    ) -> Self {
        self.devices.push(StaticDevice {
            device_id,
            agent_id: agent_id.to_string(),
            device_name: None,
            group_ids,
        });
        self
    }
}

impl DeviceDirectory for StaticDeviceDirectory {
    fn resolve(&self, device_ids: &[DeviceId], group_ids: &[GroupId]) -> Vec<DeviceTarget> {
        let mut targets: Vec<DeviceTarget> = Vec::new();
        for device in &self.devices {
            let explicit = device_ids.contains(&device.device_id);
            let via_group = device.group_ids.iter().any(|g| group_ids.contains(g));
            if (explicit || via_group)
                && !targets.iter().any(|t| t.device_id == device.device_id)
            {
                targets.push(DeviceTarget {
                    device_id: device.device_id,
                    agent_id: dx_core::AgentId::from_string(&device.agent_id),
                    device_name: device.device_name.clone(),
                });
            }
        }
        targets
    }
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Persistent task table path.
    pub tasks_path: PathBuf,
    /// Wait for a single group command fired by a task.
    pub single_command_timeout: Duration,
    /// Wait for a batch fired by a task.
    pub batch_timeout: Duration,
    /// Downstream-state polling cadence.
    pub poll_interval: Duration,
    /// Missed fires older than this are coalesced instead of executed.
    pub misfire_grace: Duration,
    /// Concurrent instances cap per task.
    pub max_instances: usize,
}

impl SchedulerConfig {
    pub fn new(tasks_path: PathBuf) -> Self {
        Self {
            tasks_path,
            single_command_timeout: Duration::from_secs(300),
            batch_timeout: Duration::from_secs(600),
            poll_interval: Duration::from_secs(2),
            misfire_grace: Duration::from_secs(300),
            max_instances: 3,
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct TasksFile {
    #[serde(default)]
    tasks: Vec<ScheduledTask>,
}

pub struct TaskScheduler<C: Clock> {
    clock: C,
    config: SchedulerConfig,
    executor: Arc<GroupCommandExecutor<C>>,
    deployments: Arc<DeploymentDispatcher>,
    directory: Arc<dyn DeviceDirectory>,
    tasks: Mutex<HashMap<TaskId, ScheduledTask>>,
    running: Mutex<HashMap<TaskId, usize>>,
}

impl<C: Clock> TaskScheduler<C> {
    /// Load the task table and re-arm triggers for schedulable tasks.
    pub fn load(
        clock: C,
        config: SchedulerConfig,
        executor: Arc<GroupCommandExecutor<C>>,
        deployments: Arc<DeploymentDispatcher>,
        directory: Arc<dyn DeviceDirectory>,
    ) -> Result<Self, ScheduleError> {
        let mut tasks = HashMap::new();
        if config.tasks_path.exists() {
            let text = std::fs::read_to_string(&config.tasks_path)?;
            let file: TasksFile = serde_json::from_str(&text).unwrap_or_default();
            for task in file.tasks {
                tasks.insert(task.id.clone(), task);
            }
        }

        let scheduler = Self {
            clock,
            config,
            executor,
            deployments,
            directory,
            tasks: Mutex::new(tasks),
            running: Mutex::new(HashMap::new()),
        };
        scheduler.rearm_all()?;
        tracing::info!(count = scheduler.tasks.lock().len(), "task scheduler loaded");
        Ok(scheduler)
    }

    fn rearm_all(&self) -> Result<(), ScheduleError> {
        let now = self.clock.utc_now();
        let mut tasks = self.tasks.lock();
        for task in tasks.values_mut() {
            if !task.status.is_schedulable() {
                continue;
            }
            match next_fire(&task.recurrence, task.scheduled_time, now) {
                Ok(next) => {
                    if next.is_none() && task.recurrence.is_once() {
                        tracing::warn!(task_id = %task.id, "once-task elapsed while offline");
                    }
                    task.next_execution = next;
                }
                Err(e) => {
                    tracing::error!(task_id = %task.id, %e, "cannot re-arm task");
                    task.status = TaskStatus::Failed;
                    task.error_message = Some(e.to_string());
                }
            }
        }
        Ok(())
    }

    fn save(&self) -> Result<(), ScheduleError> {
        let file = TasksFile { tasks: self.tasks.lock().values().cloned().collect() };
        if let Some(parent) = self.config.tasks_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.config.tasks_path, serde_json::to_vec_pretty(&file)?)?;
        Ok(())
    }

    /// Register a task and arm its trigger.
    ///
    /// A once-task whose scheduled time is not in the future is rejected.
    pub fn create_task(&self, mut task: ScheduledTask) -> Result<TaskId, ScheduleError> {
        let now = self.clock.utc_now();
        if task.recurrence.is_once() && task.scheduled_time <= now {
            return Err(ScheduleError::ScheduledInPast);
        }
        task.next_execution = next_fire(&task.recurrence, task.scheduled_time, now)?;
        task.status = TaskStatus::Pending;

        let id = task.id.clone();
        self.tasks.lock().insert(id.clone(), task);
        self.save()?;
        tracing::info!(task_id = %id, "task scheduled");
        Ok(id)
    }

    /// Stop future fires. A currently-running execution is not cancelled.
    pub fn pause_task(&self, task_id: &TaskId) -> Result<(), ScheduleError> {
        self.transition(task_id, TaskStatus::Paused, &[TaskStatus::Pending])
    }

    /// Resume a paused task, re-arming its trigger.
    pub fn resume_task(&self, task_id: &TaskId) -> Result<(), ScheduleError> {
        self.transition(task_id, TaskStatus::Pending, &[TaskStatus::Paused])?;
        self.rearm(task_id)
    }

    /// Put a failed task back in rotation.
    pub fn retry_task(&self, task_id: &TaskId) -> Result<(), ScheduleError> {
        self.transition(task_id, TaskStatus::Pending, &[TaskStatus::Failed])?;
        self.rearm(task_id)
    }

    /// Cancel a task permanently.
    pub fn cancel_task(&self, task_id: &TaskId) -> Result<(), ScheduleError> {
        let mut tasks = self.tasks.lock();
        let task = tasks.get_mut(task_id.as_str()).ok_or_else(|| {
            ScheduleError::NotFound(task_id.clone())
        })?;
        task.status = TaskStatus::Cancelled;
        task.next_execution = None;
        drop(tasks);
        self.save()
    }

    fn transition(
        &self,
        task_id: &TaskId,
        to: TaskStatus,
        allowed_from: &[TaskStatus],
    ) -> Result<(), ScheduleError> {
        {
            let mut tasks = self.tasks.lock();
            let task = tasks
                .get_mut(task_id.as_str())
                .ok_or_else(|| ScheduleError::NotFound(task_id.clone()))?;
            if !allowed_from.contains(&task.status) {
                return Err(ScheduleError::InvalidTransition);
            }
            task.status = to;
        }
        self.save()
    }

    fn rearm(&self, task_id: &TaskId) -> Result<(), ScheduleError> {
        let now = self.clock.utc_now();
        {
            let mut tasks = self.tasks.lock();
            let task = tasks
                .get_mut(task_id.as_str())
                .ok_or_else(|| ScheduleError::NotFound(task_id.clone()))?;
            task.next_execution = next_fire(&task.recurrence, task.scheduled_time, now)?;
        }
        self.save()
    }

    pub fn task(&self, task_id: &TaskId) -> Option<ScheduledTask> {
        self.tasks.lock().get(task_id.as_str()).cloned()
    }

    pub fn list_tasks(&self) -> Vec<ScheduledTask> {
        self.tasks.lock().values().cloned().collect()
    }

    /// Run the trigger loop until cancelled.
    pub async fn run(self: Arc<Self>, token: CancellationToken) {
        let mut tick = tokio::time::interval(Duration::from_secs(1));
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = tick.tick() => {
                    self.tick_once();
                }
            }
        }
    }

    /// One pass over the task table: fire everything due. Fires run as
    /// background tasks; the returned handles are only awaited by tests.
    pub fn tick_once(self: &Arc<Self>) -> Vec<tokio::task::JoinHandle<()>> {
        let now = self.clock.utc_now();
        let grace = chrono::Duration::from_std(self.config.misfire_grace)
            .unwrap_or_else(|_| chrono::Duration::seconds(300));

        let due: Vec<TaskId> = {
            let tasks = self.tasks.lock();
            tasks
                .values()
                .filter(|t| t.status == TaskStatus::Pending)
                .filter(|t| t.next_execution.map(|next| next <= now).unwrap_or(false))
                .map(|t| t.id.clone())
                .collect()
        };

        let mut handles = Vec::new();
        for task_id in due {
            // Missed fires beyond the grace window coalesce to the next slot
            let fire_time = {
                let tasks = self.tasks.lock();
                let Some(task) = tasks.get(task_id.as_str()) else { continue };
                let Some(next) = task.next_execution else { continue };
                if now - next > grace && !task.recurrence.is_once() {
                    None
                } else {
                    Some(next)
                }
            };
            let Some(_fire_time) = fire_time else {
                tracing::warn!(task_id = %task_id, "coalescing missed fires");
                let _ = self.rearm(&task_id);
                continue;
            };

            // Cap concurrent instances of the same task
            let instances = self.running.lock().get(task_id.as_str()).copied().unwrap_or(0);
            if instances >= self.config.max_instances {
                tracing::warn!(task_id = %task_id, instances, "at max concurrent instances");
                let _ = self.rearm(&task_id);
                continue;
            }

            {
                let mut tasks = self.tasks.lock();
                let Some(task) = tasks.get_mut(task_id.as_str()) else { continue };
                task.status = TaskStatus::Running;
                task.execution_count += 1;
                // Clear the armed slot; it is recomputed after the run
                task.next_execution = None;
            }
            *self.running.lock().entry(task_id.clone()).or_insert(0) += 1;
            let _ = self.save();

            let scheduler = Arc::clone(self);
            let id = task_id.clone();
            handles.push(tokio::spawn(async move {
                scheduler.execute_task(id).await;
            }));
        }
        handles
    }

    async fn execute_task(&self, task_id: TaskId) {
        let Some(task) = self.task(&task_id) else { return };
        let started = self.clock.utc_now();
        tracing::info!(task_id = %task_id, name = %task.name, kind = ?task.kind, "executing task");

        let outcome = match task.kind {
            TaskKind::Command => self.execute_command_task(&task).await,
            TaskKind::SoftwareDeploy => self.execute_software_task(&task).await,
            TaskKind::FileDeploy => self.execute_file_task(&task).await,
        };

        let completed = self.clock.utc_now();
        let execution = match outcome {
            Ok((deployment_id, result)) => TaskExecution {
                execution_time: started,
                status: TaskStatus::Completed,
                completed_time: Some(completed),
                deployment_id: Some(deployment_id),
                result: Some(result),
                error_message: None,
            },
            Err(message) => TaskExecution {
                execution_time: started,
                status: TaskStatus::Failed,
                completed_time: Some(completed),
                deployment_id: None,
                result: None,
                error_message: Some(message),
            },
        };

        {
            let mut tasks = self.tasks.lock();
            if let Some(task) = tasks.get_mut(task_id.as_str()) {
                task.finish_execution(execution);
                // Recurring tasks get their next slot armed now
                if task.status == TaskStatus::Pending {
                    match next_fire(&task.recurrence, task.scheduled_time, completed) {
                        Ok(next) => task.next_execution = next,
                        Err(e) => {
                            task.status = TaskStatus::Failed;
                            task.error_message = Some(e.to_string());
                        }
                    }
                }
            }
        }
        let mut running = self.running.lock();
        if let Some(count) = running.get_mut(task_id.as_str()) {
            *count = count.saturating_sub(1);
        }
        drop(running);
        let _ = self.save();
        tracing::info!(task_id = %task_id, "task execution recorded");
    }

    /// Fire a command task and wait for the downstream terminal state.
    async fn execute_command_task(
        &self,
        task: &ScheduledTask,
    ) -> Result<(String, serde_json::Value), String> {
        let targets = self.directory.resolve(&task.device_ids, &task.group_ids);
        if targets.is_empty() {
            return Err("no target devices found".to_string());
        }

        let shell = task
            .payload
            .get("shell")
            .and_then(|v| v.as_str())
            .unwrap_or("bash")
            .to_string();
        let group_name = format!("Scheduled: {}", task.name);

        if let Some(commands) = task.payload.get("commands").and_then(|v| v.as_array()) {
            let commands: Vec<String> = commands
                .iter()
                .filter_map(|c| c.as_str().map(String::from))
                .collect();
            if commands.is_empty() {
                return Err("empty command list".to_string());
            }
            let stop_on_failure = task
                .payload
                .get("stop_on_failure")
                .and_then(|v| v.as_bool())
                .unwrap_or(true);

            let batch_id = self
                .executor
                .execute_batch_sequential(0, &group_name, targets, commands, &shell, stop_on_failure)
                .await
                .map_err(|e| e.to_string())?;

            let status = self
                .wait_for_batch(&batch_id, self.config.batch_timeout)
                .await
                .ok_or_else(|| "batch execution timed out".to_string())?;
            if status == GroupStatus::Failed {
                return Err(format!("batch {batch_id} failed"));
            }
            Ok((
                batch_id.to_string(),
                serde_json::json!({ "type": "command", "status": status }),
            ))
        } else {
            let command = task
                .payload
                .get("command")
                .and_then(|v| v.as_str())
                .ok_or_else(|| "payload has no command".to_string())?;
            let strategy = task
                .payload
                .get("strategy")
                .and_then(|v| v.as_str())
                .unwrap_or("transactional");

            let execution_id = self
                .executor
                .execute_group_command(0, &group_name, &targets, command, &shell, strategy)
                .await
                .map_err(|e| e.to_string())?;

            let status = self
                .wait_for_execution(&execution_id, self.config.single_command_timeout)
                .await
                .ok_or_else(|| "command execution timed out".to_string())?;
            if status == GroupStatus::Failed {
                return Err(format!("execution {execution_id} failed"));
            }
            Ok((
                execution_id.to_string(),
                serde_json::json!({ "type": "command", "status": status }),
            ))
        }
    }

    async fn execute_software_task(
        &self,
        task: &ScheduledTask,
    ) -> Result<(String, serde_json::Value), String> {
        let targets = self.directory.resolve(&task.device_ids, &task.group_ids);
        if targets.is_empty() {
            return Err("no target devices found".to_string());
        }
        let software = task
            .payload
            .get("software_list")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();
        let deployment_id =
            self.deployments.start_software_deployment(&targets, software).await;
        Ok((
            deployment_id.to_string(),
            serde_json::json!({ "type": "software", "deployment_id": deployment_id }),
        ))
    }

    async fn execute_file_task(
        &self,
        task: &ScheduledTask,
    ) -> Result<(String, serde_json::Value), String> {
        let targets = self.directory.resolve(&task.device_ids, &task.group_ids);
        if targets.is_empty() {
            return Err("no target devices found".to_string());
        }
        let files = task
            .payload
            .get("files")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();
        let create = task
            .payload
            .get("create_path_if_not_exists")
            .and_then(|v| v.as_bool())
            .unwrap_or(true);
        let deployment_id =
            self.deployments.start_file_deployment(&targets, &files, create).await;
        Ok((
            deployment_id.to_string(),
            serde_json::json!({ "type": "file", "deployment_id": deployment_id }),
        ))
    }

    async fn wait_for_execution(
        &self,
        execution_id: &ExecutionId,
        timeout: Duration,
    ) -> Option<GroupStatus> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(execution) = self.executor.execution(execution_id) {
                if execution.status.is_terminal() {
                    return Some(execution.status);
                }
            }
            if tokio::time::Instant::now() >= deadline {
                return None;
            }
            tokio::time::sleep(self.config.poll_interval).await;
        }
    }

    async fn wait_for_batch(&self, batch_id: &BatchId, timeout: Duration) -> Option<GroupStatus> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(batch) = self.executor.batch(batch_id) {
                if batch.status.is_terminal() {
                    return Some(batch.status);
                }
            }
            if tokio::time::Instant::now() >= deadline {
                return None;
            }
            tokio::time::sleep(self.config.poll_interval).await;
        }
    }
}

#[cfg(test)]
#[path = "runner_tests.rs"]
mod tests;
