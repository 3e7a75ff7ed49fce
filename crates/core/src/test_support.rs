// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Builders and helpers for other crates' tests.
//!
//! Gated behind the `test-support` feature so production builds never link
//! them.

use crate::task::{Recurrence, ScheduledTask, TaskKind};
use chrono::{DateTime, Utc};

/// Build a command task firing once at the given time.
pub fn once_command_task(scheduled_time: DateTime<Utc>, command: &str) -> ScheduledTask {
    ScheduledTask::new(
        "test-task",
        TaskKind::Command,
        scheduled_time,
        Recurrence::Once,
        serde_json::json!({ "command": command, "shell": "bash" }),
    )
}
