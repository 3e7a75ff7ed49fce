// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::{SchedulerConfig, StaticDeviceDirectory, TaskScheduler};
use crate::deploy::DeploymentDispatcher;
use crate::group::GroupCommandExecutor;
use crate::link::FakeLink;
use crate::queue::CommandQueue;
use crate::sched::ScheduleError;
use dx_core::{
    AgentId, Clock, FakeClock, Recurrence, ScheduledTask, TaskKind, TaskStatus, TimeOfDay,
};
use std::sync::Arc;
use std::time::Duration;

struct Fixture {
    clock: FakeClock,
    link: Arc<FakeLink>,
    executor: Arc<GroupCommandExecutor<FakeClock>>,
    scheduler: Arc<TaskScheduler<FakeClock>>,
    _dir: tempfile::TempDir,
}

fn fixture() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let clock = FakeClock::new();
    clock.set_epoch_ms(1_750_000_000_000);

    let link = Arc::new(FakeLink::new());
    link.connect("a1");
    let queue = Arc::new(CommandQueue::open(dir.path().join("queue.json")).unwrap());
    let executor = Arc::new(GroupCommandExecutor::new(
        Arc::clone(&link) as Arc<dyn crate::link::AgentLink>,
        queue,
        clock.clone(),
    ));
    let deployments = Arc::new(DeploymentDispatcher::new(
        Arc::clone(&link) as Arc<dyn crate::link::AgentLink>,
    ));
    let directory = Arc::new(StaticDeviceDirectory::default().with_device(1, "a1", vec![10]));

    let scheduler = Arc::new(
        TaskScheduler::load(
            clock.clone(),
            SchedulerConfig::new(dir.path().join("tasks.json")),
            Arc::clone(&executor),
            deployments,
            directory,
        )
        .unwrap(),
    );
    Fixture { clock, link, executor, scheduler, _dir: dir }
}

fn command_task(clock: &FakeClock, delay_secs: i64, payload: serde_json::Value) -> ScheduledTask {
    let mut task = ScheduledTask::new(
        "scheduled-run",
        TaskKind::Command,
        clock.utc_now() + chrono::Duration::seconds(delay_secs),
        Recurrence::Once,
        payload,
    );
    task.device_ids = vec![1];
    task
}

async fn wait_for_dispatches(link: &FakeLink, count: usize) {
    for _ in 0..200 {
        if link.dispatched().len() >= count {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("expected {count} dispatches, saw {}", link.dispatched().len());
}

#[tokio::test]
async fn once_task_in_the_past_is_rejected() {
    let fx = fixture();
    let mut task = dx_core::test_support::once_command_task(
        fx.clock.utc_now() - chrono::Duration::seconds(5),
        "uptime",
    );
    task.device_ids = vec![1];
    assert!(matches!(
        fx.scheduler.create_task(task),
        Err(ScheduleError::ScheduledInPast)
    ));
}

#[tokio::test(start_paused = true)]
async fn once_command_batch_waits_for_terminal_state() {
    let fx = fixture();
    let task = command_task(
        &fx.clock,
        2,
        serde_json::json!({
            "commands": ["sleep 5", "echo done"],
            "shell": "bash",
            "stop_on_failure": true,
        }),
    );
    let task_id = fx.scheduler.create_task(task).unwrap();

    // Not due yet
    assert!(fx.scheduler.tick_once().is_empty());

    fx.clock.advance(Duration::from_secs(3));
    let handles = fx.scheduler.tick_once();
    assert_eq!(handles.len(), 1);
    assert_eq!(fx.scheduler.task(&task_id).unwrap().status, TaskStatus::Running);

    // Drive both batch steps to completion from the agent side
    let feeder = {
        let link = Arc::clone(&fx.link);
        let executor = Arc::clone(&fx.executor);
        tokio::spawn(async move {
            wait_for_dispatches(&link, 1).await;
            let first = link.command_ids_for(&AgentId::from_string("a1"))[0].clone();
            executor.handle_command_completion(&first, true, "", None);

            wait_for_dispatches(&link, 2).await;
            let second = link.command_ids_for(&AgentId::from_string("a1"))[1].clone();
            executor.handle_command_completion(&second, true, "done\n", None);
        })
    };

    for handle in handles {
        handle.await.unwrap();
    }
    feeder.await.unwrap();

    let task = fx.scheduler.task(&task_id).unwrap();
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.execution_count, 1);
    assert_eq!(task.next_execution, None, "completed once-task never fires again");

    let record = task.history.last().expect("one execution recorded");
    assert_eq!(record.status, TaskStatus::Completed);
    assert!(record.completed_time.is_some(), "stamped only after both commands finished");
    assert!(record.deployment_id.is_some(), "carries the downstream batch id");
}

#[tokio::test(start_paused = true)]
async fn recurring_task_rearms_after_a_run() {
    let fx = fixture();
    let mut task = command_task(&fx.clock, 0, serde_json::json!({ "command": "uptime" }));
    task.recurrence = Recurrence::Daily { time: TimeOfDay { hour: 4, minute: 0 } };
    let task_id = fx.scheduler.create_task(task).unwrap();

    let next = fx.scheduler.task(&task_id).unwrap().next_execution.expect("armed");
    let wait = next - fx.clock.utc_now();
    fx.clock.advance(wait.to_std().unwrap() + Duration::from_secs(1));

    let handles = fx.scheduler.tick_once();
    assert_eq!(handles.len(), 1);

    let feeder = {
        let link = Arc::clone(&fx.link);
        let executor = Arc::clone(&fx.executor);
        tokio::spawn(async move {
            wait_for_dispatches(&link, 1).await;
            let cmd = link.command_ids_for(&AgentId::from_string("a1"))[0].clone();
            executor.handle_command_completion(&cmd, true, "", None);
        })
    };
    for handle in handles {
        handle.await.unwrap();
    }
    feeder.await.unwrap();

    let task = fx.scheduler.task(&task_id).unwrap();
    assert_eq!(task.status, TaskStatus::Pending, "recurring task goes back to pending");
    let rearmed = task.next_execution.expect("re-armed for the next day");
    assert!(rearmed > fx.clock.utc_now());
}

#[tokio::test]
async fn missed_recurring_fire_beyond_grace_is_coalesced() {
    let fx = fixture();
    let mut task = command_task(&fx.clock, 0, serde_json::json!({ "command": "uptime" }));
    task.recurrence = Recurrence::Daily { time: TimeOfDay { hour: 4, minute: 0 } };
    let task_id = fx.scheduler.create_task(task).unwrap();

    let next = fx.scheduler.task(&task_id).unwrap().next_execution.expect("armed");
    let wait = next - fx.clock.utc_now();
    // Miss the slot by well over the five-minute grace window
    fx.clock.advance(wait.to_std().unwrap() + Duration::from_secs(3600));

    let handles = fx.scheduler.tick_once();
    assert!(handles.is_empty(), "missed fire must coalesce, not execute");
    assert!(fx.link.dispatched().is_empty());

    let rearmed = fx.scheduler.task(&task_id).unwrap().next_execution.expect("re-armed");
    assert!(rearmed > fx.clock.utc_now());
}

#[tokio::test]
async fn pause_resume_and_retry_transitions() {
    let fx = fixture();
    let task = command_task(&fx.clock, 3600, serde_json::json!({ "command": "uptime" }));
    let task_id = fx.scheduler.create_task(task).unwrap();

    assert!(matches!(
        fx.scheduler.resume_task(&task_id),
        Err(ScheduleError::InvalidTransition)
    ));

    fx.scheduler.pause_task(&task_id).unwrap();
    assert_eq!(fx.scheduler.task(&task_id).unwrap().status, TaskStatus::Paused);
    // Paused tasks never fire
    fx.clock.advance(Duration::from_secs(7200));
    assert!(fx.scheduler.tick_once().is_empty());

    fx.scheduler.resume_task(&task_id).unwrap();
    assert_eq!(fx.scheduler.task(&task_id).unwrap().status, TaskStatus::Pending);

    fx.scheduler.cancel_task(&task_id).unwrap();
    let task = fx.scheduler.task(&task_id).unwrap();
    assert_eq!(task.status, TaskStatus::Cancelled);
    assert_eq!(task.next_execution, None);
}

#[tokio::test(start_paused = true)]
async fn task_with_no_targets_fails() {
    let fx = fixture();
    let mut task = command_task(&fx.clock, 2, serde_json::json!({ "command": "uptime" }));
    task.device_ids = vec![999]; // unknown device
    let task_id = fx.scheduler.create_task(task).unwrap();

    fx.clock.advance(Duration::from_secs(3));
    for handle in fx.scheduler.tick_once() {
        handle.await.unwrap();
    }

    let task = fx.scheduler.task(&task_id).unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert!(task.error_message.as_deref().unwrap_or_default().contains("no target devices"));
    assert_eq!(task.next_execution, None);
}

#[tokio::test]
async fn tasks_survive_a_scheduler_restart() {
    let dir = tempfile::tempdir().unwrap();
    let clock = FakeClock::new();
    clock.set_epoch_ms(1_750_000_000_000);
    let link = Arc::new(FakeLink::new());
    let queue = Arc::new(CommandQueue::open(dir.path().join("queue.json")).unwrap());

    let build = |queue_path: std::path::PathBuf| {
        let executor = Arc::new(GroupCommandExecutor::new(
            Arc::clone(&link) as Arc<dyn crate::link::AgentLink>,
            Arc::clone(&queue),
            clock.clone(),
        ));
        let deployments = Arc::new(DeploymentDispatcher::new(
            Arc::clone(&link) as Arc<dyn crate::link::AgentLink>,
        ));
        let directory = Arc::new(StaticDeviceDirectory::default().with_device(1, "a1", vec![]));
        TaskScheduler::load(
            clock.clone(),
            SchedulerConfig::new(queue_path),
            executor,
            deployments,
            directory,
        )
        .unwrap()
    };

    let tasks_path = dir.path().join("tasks.json");
    let task_id = {
        let scheduler = build(tasks_path.clone());
        let mut task =
            command_task(&clock, 0, serde_json::json!({ "command": "uptime" }));
        task.recurrence = Recurrence::Daily { time: TimeOfDay { hour: 4, minute: 0 } };
        scheduler.create_task(task).unwrap()
    };

    let reloaded = build(tasks_path);
    let task = reloaded.task(&task_id).expect("task persisted");
    assert_eq!(task.status, TaskStatus::Pending);
    assert!(task.next_execution.is_some(), "trigger re-armed on load");
}
