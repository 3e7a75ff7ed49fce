// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::CommandQueue;
use dx_core::{AgentId, CommandRecord, CommandStatus};

fn record(command: &str) -> CommandRecord {
    CommandRecord::new(
        AgentId::from_string("agent_1"),
        command.to_string(),
        "bash".to_string(),
        1_000,
    )
}

#[test]
fn add_update_and_reload() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("command_queue.json");

    let id = {
        let queue = CommandQueue::open(&path).unwrap();
        let id = queue.add(record("uptime"));
        assert!(queue.update_status(&id, CommandStatus::Running, None, None, 2_000));
        assert!(queue.update_status(
            &id,
            CommandStatus::Completed,
            Some("up 3 days\n"),
            None,
            3_000,
        ));
        id
    };

    let reopened = CommandQueue::open(&path).unwrap();
    let loaded = reopened.get(&id).expect("record persisted");
    assert_eq!(loaded.status, CommandStatus::Completed);
    assert_eq!(loaded.output, "up 3 days\n");
    assert_eq!(loaded.completed_at_ms, Some(3_000));
}

#[test]
fn load_repairs_inconsistent_records() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("command_queue.json");

    let mut broken = record("rm -rf /tmp/x");
    broken.completed_at_ms = Some(5_000);
    // Still says running, which load must repair to completed
    broken.status = CommandStatus::Running;
    let json = serde_json::json!({ "commands": [broken] });
    std::fs::write(&path, serde_json::to_vec(&json).unwrap()).unwrap();

    let queue = CommandQueue::open(&path).unwrap();
    let repaired = queue.all().pop().unwrap();
    assert_eq!(repaired.status, CommandStatus::Completed);
    assert!(repaired.started_at_ms.is_some());
}

#[test]
fn terminal_states_reject_further_transitions() {
    let dir = tempfile::tempdir().unwrap();
    let queue = CommandQueue::open(dir.path().join("q.json")).unwrap();
    let id = queue.add(record("true"));

    queue.update_status(&id, CommandStatus::Failed, None, Some("boom"), 2_000);
    assert!(!queue.update_status(&id, CommandStatus::Running, None, None, 3_000));
    assert_eq!(queue.get(&id).unwrap().status, CommandStatus::Failed);
}

#[test]
fn pause_resume_and_clear() {
    let dir = tempfile::tempdir().unwrap();
    let queue = CommandQueue::open(dir.path().join("q.json")).unwrap();

    let running = queue.add(record("sleep 10"));
    queue.update_status(&running, CommandStatus::Running, None, None, 2_000);
    assert!(queue.pause(&running));
    assert!(!queue.pause(&running), "already paused");
    assert!(queue.resume(&running));
    assert_eq!(queue.get(&running).unwrap().status, CommandStatus::Pending);

    let done = queue.add(record("true"));
    queue.update_status(&done, CommandStatus::Running, None, None, 2_000);
    queue.update_status(&done, CommandStatus::Completed, None, None, 3_000);

    assert_eq!(queue.clear_completed(), 1);
    assert!(queue.get(&done).is_none());
    assert!(queue.get(&running).is_some());
}

#[test]
fn stats_count_by_status() {
    let dir = tempfile::tempdir().unwrap();
    let queue = CommandQueue::open(dir.path().join("q.json")).unwrap();

    let a = queue.add(record("one"));
    queue.add(record("two"));
    queue.update_status(&a, CommandStatus::Running, None, None, 2_000);

    let stats = queue.stats();
    assert_eq!(stats.get("total"), Some(&2));
    assert_eq!(stats.get("running"), Some(&1));
    assert_eq!(stats.get("pending"), Some(&1));
}

#[test]
fn second_open_on_same_path_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("q.json");
    let _held = CommandQueue::open(&path).unwrap();
    assert!(matches!(CommandQueue::open(&path), Err(super::QueueError::Locked)));
}
