// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Process-tree signal delivery.
//!
//! All descendant enumeration goes through [`descendants`] so the walk is
//! one interface rather than scattered `/proc` reads. Signals always target
//! descendants before the shell's own process group; an interactive shell
//! handles SIGINT at its prompt, so the session stays usable after a hung
//! foreground process is interrupted.

/// Enumerate all live descendant PIDs of `pid`.
///
/// A process always appears before its own children in the result.
#[cfg(target_os = "linux")]
pub fn descendants(pid: u32) -> Vec<u32> {
    use std::collections::HashMap;

    let mut children_of: HashMap<u32, Vec<u32>> = HashMap::new();

    let Ok(entries) = std::fs::read_dir("/proc") else {
        return Vec::new();
    };
    for entry in entries.flatten() {
        let name = entry.file_name();
        let Some(candidate) = name.to_str().and_then(|s| s.parse::<u32>().ok()) else {
            continue;
        };
        if let Some(ppid) = parent_of(candidate) {
            children_of.entry(ppid).or_default().push(candidate);
        }
    }

    let mut result = Vec::new();
    let mut frontier = vec![pid];
    while let Some(current) = frontier.pop() {
        if let Some(kids) = children_of.get(&current) {
            for &kid in kids {
                result.push(kid);
                frontier.push(kid);
            }
        }
    }
    result
}

#[cfg(not(target_os = "linux"))]
pub fn descendants(_pid: u32) -> Vec<u32> {
    Vec::new()
}

/// Read the parent PID from `/proc/<pid>/stat`.
///
/// The comm field may contain spaces and parentheses; the ppid is the second
/// token after the closing paren.
#[cfg(target_os = "linux")]
fn parent_of(pid: u32) -> Option<u32> {
    let stat = std::fs::read_to_string(format!("/proc/{pid}/stat")).ok()?;
    let rest = &stat[stat.rfind(')')? + 1..];
    let mut fields = rest.split_whitespace();
    let _state = fields.next()?;
    fields.next()?.parse().ok()
}

/// Send SIGINT to every descendant, then to the shell's process group.
///
/// Returns `false` when OS-level delivery is unavailable and the caller
/// should fall back to writing `^C` into stdin.
#[cfg(unix)]
pub fn interrupt_tree(pid: u32) -> bool {
    use nix::sys::signal::{kill, killpg, Signal};
    use nix::unistd::Pid;

    for child in descendants(pid) {
        if let Err(e) = kill(Pid::from_raw(child as i32), Signal::SIGINT) {
            tracing::warn!(child, %e, "could not deliver SIGINT to descendant");
        }
    }
    match killpg(Pid::from_raw(pid as i32), Signal::SIGINT) {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(pid, %e, "could not deliver SIGINT to process group");
            false
        }
    }
}

#[cfg(not(unix))]
pub fn interrupt_tree(_pid: u32) -> bool {
    false
}

/// Send SIGTSTP to the shell's process group.
///
/// Returns `false` where true suspension is unavailable (the caller writes
/// `^Z` into stdin instead).
#[cfg(unix)]
pub fn suspend_tree(pid: u32) -> bool {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    match killpg(Pid::from_raw(pid as i32), Signal::SIGTSTP) {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(pid, %e, "could not deliver SIGTSTP to process group");
            false
        }
    }
}

#[cfg(not(unix))]
pub fn suspend_tree(_pid: u32) -> bool {
    false
}

/// SIGTERM every descendant; escalate stragglers to SIGKILL after the grace
/// period. The shell itself is handled separately by the supervisor.
#[cfg(unix)]
pub async fn terminate_descendants(pid: u32, grace: std::time::Duration) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let children = descendants(pid);
    if children.is_empty() {
        return;
    }
    for &child in &children {
        let _ = kill(Pid::from_raw(child as i32), Signal::SIGTERM);
    }
    tokio::time::sleep(grace).await;
    for &child in &children {
        // Signal 0 probes liveness without delivering anything
        if kill(Pid::from_raw(child as i32), None).is_ok() {
            let _ = kill(Pid::from_raw(child as i32), Signal::SIGKILL);
        }
    }
}

#[cfg(not(unix))]
pub async fn terminate_descendants(_pid: u32, _grace: std::time::Duration) {}

/// SIGTERM the shell's process group.
#[cfg(unix)]
pub fn terminate_group(pid: u32) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;
    let _ = killpg(Pid::from_raw(pid as i32), Signal::SIGTERM);
}

#[cfg(not(unix))]
pub fn terminate_group(_pid: u32) {}

/// SIGKILL the shell's process group.
#[cfg(unix)]
pub fn kill_group(pid: u32) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;
    let _ = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL);
}

#[cfg(not(unix))]
pub fn kill_group(_pid: u32) {}

#[cfg(test)]
#[path = "signals_tests.rs"]
mod tests;
