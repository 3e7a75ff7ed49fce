// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::{agent_id_for, machine_id};

#[test]
fn machine_id_is_stable() {
    assert_eq!(machine_id(), machine_id());
    assert!(!machine_id().is_empty());
}

#[test]
fn agent_id_has_prefix_and_short_hash() {
    let id = agent_id_for("4c4c4544-004d-3510-8052-b4c04f4e4d31");
    assert!(id.starts_with("agent_"));
    assert_eq!(id.len(), "agent_".len() + 8);
    // Same machine id, same agent id
    assert_eq!(id, agent_id_for("4c4c4544-004d-3510-8052-b4c04f4e4d31"));
    // Different machine id, different agent id
    assert_ne!(id, agent_id_for("some-other-machine"));
}
