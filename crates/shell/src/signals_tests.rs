// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::descendants;

#[test]
#[cfg(target_os = "linux")]
fn descendants_of_init_do_not_include_init() {
    let kids = descendants(1);
    assert!(!kids.contains(&1));
}

#[test]
#[cfg(target_os = "linux")]
fn own_process_has_no_unknown_parentage() {
    // The test runner itself has a parent; spawning nothing, our pid has no
    // descendants beyond possible test threads' children (none here).
    let pid = std::process::id();
    let kids = descendants(pid);
    assert!(!kids.contains(&pid));
}

#[tokio::test]
#[cfg(target_os = "linux")]
async fn descendants_sees_spawned_children() {
    let mut child = tokio::process::Command::new("sleep")
        .arg("5")
        .spawn()
        .expect("spawn sleep");
    let child_pid = child.id().expect("child pid");

    // The child is a direct descendant of this process
    let kids = descendants(std::process::id());
    assert!(kids.contains(&child_pid), "expected {child_pid} in {kids:?}");

    let _ = child.kill().await;
}
