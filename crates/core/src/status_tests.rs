// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::{CommandStatus, GroupStatus};

#[yare::parameterized(
    pending   = { CommandStatus::Pending,   false },
    running   = { CommandStatus::Running,   false },
    paused    = { CommandStatus::Paused,    false },
    completed = { CommandStatus::Completed, true  },
    failed    = { CommandStatus::Failed,    true  },
)]
fn command_terminal(status: CommandStatus, expected: bool) {
    assert_eq!(status.is_terminal(), expected);
}

#[yare::parameterized(
    completed_vs_partial = { GroupStatus::Completed,      GroupStatus::PartialSuccess, GroupStatus::PartialSuccess },
    partial_vs_failed    = { GroupStatus::PartialSuccess, GroupStatus::Failed,         GroupStatus::Failed         },
    failed_vs_completed  = { GroupStatus::Failed,         GroupStatus::Completed,      GroupStatus::Failed         },
    same                 = { GroupStatus::Completed,      GroupStatus::Completed,      GroupStatus::Completed      },
)]
fn worse_picks_most_severe(a: GroupStatus, b: GroupStatus, expected: GroupStatus) {
    assert_eq!(a.worse(b), expected);
}

#[test]
fn group_status_serializes_snake_case() {
    let json = serde_json::to_string(&GroupStatus::PartialSuccess).unwrap();
    assert_eq!(json, "\"partial_success\"");
    assert_eq!(GroupStatus::PartialSuccess.to_string(), "partial_success");
}
