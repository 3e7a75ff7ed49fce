// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-agent deployment command executor.
//!
//! Runs one command inside an open shell session, optionally after taking a
//! snapshot when the classifier demands one. Completion is detected
//! heuristically: a base wait after dispatch, then an idle window on the
//! session's output tap, with a case-insensitive scan for known error
//! substrings deciding success.

use dx_core::{CommandId, SessionId, SnapshotId};
use dx_shell::{ShellError, ShellSupervisor};
use dx_snapshot::{analyze, CreateSnapshot, SnapshotStore};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Base wait after dispatch before the output tap is considered.
const QUIESCENCE_BASE: Duration = Duration::from_millis(500);

/// Output silence that ends the capture.
const QUIESCENCE_IDLE: Duration = Duration::from_millis(400);

/// Upper bound on the whole capture window.
const QUIESCENCE_MAX: Duration = Duration::from_secs(10);

/// Output substrings that mark a command as unsuccessful.
const ERROR_INDICATORS: &[&str] = &[
    "access is denied",
    "the system cannot find",
    "permission denied",
    "no such file or directory",
    "command not found",
    "is not recognized as an internal or external command",
    "the filename, directory name, or volume label syntax is incorrect",
    "cannot remove",
    "failed to",
    "error:",
    "fatal:",
    "syntax error",
    "cannot access",
];

/// Outcome of one deployment command.
#[derive(Debug, Clone)]
pub struct CommandReport {
    pub command_id: CommandId,
    pub success: bool,
    pub output: String,
    pub error: Option<String>,
    pub snapshot_id: Option<SnapshotId>,
}

/// Executes deployment commands with automatic pre-command snapshots.
pub struct DeploymentExecutor {
    supervisor: Arc<ShellSupervisor>,
    store: Arc<SnapshotStore>,
    auto_snapshot: bool,
    /// Snapshot working directory; the agent process cwd when `None`.
    working_dir: Option<std::path::PathBuf>,
}

impl DeploymentExecutor {
    pub fn new(
        supervisor: Arc<ShellSupervisor>,
        store: Arc<SnapshotStore>,
        auto_snapshot: bool,
    ) -> Self {
        Self { supervisor, store, auto_snapshot, working_dir: None }
    }

    pub fn with_working_dir(mut self, dir: std::path::PathBuf) -> Self {
        self.working_dir = Some(dir);
        self
    }

    /// Execute `command` in the given session and report the outcome.
    pub async fn execute(
        &self,
        command_id: CommandId,
        command: String,
        session_id: SessionId,
    ) -> CommandReport {
        let mut error: Option<String> = None;

        // Snapshot first, when the classifier says the command warrants one.
        let snapshot_id = if self.auto_snapshot && analyze(&command).requires_backup {
            let store = Arc::clone(&self.store);
            let params = CreateSnapshot {
                command: command.clone(),
                working_dir: self.working_dir.clone(),
                ..Default::default()
            };
            match tokio::task::spawn_blocking(move || store.create_snapshot(params)).await {
                Ok(Ok(id)) => {
                    tracing::info!(%command_id, snapshot_id = %id, "snapshot before command");
                    Some(id)
                }
                Ok(Err(e)) => {
                    // The command still runs; the completion event carries
                    // the snapshot error.
                    tracing::error!(%command_id, %e, "snapshot creation failed");
                    error = Some(format!("Snapshot creation failed: {e}"));
                    None
                }
                Err(e) => {
                    tracing::error!(%command_id, %e, "snapshot task panicked");
                    error = Some("Snapshot creation failed".to_string());
                    None
                }
            }
        } else {
            None
        };

        let tap = match self.supervisor.install_tap(&session_id).await {
            Ok(rx) => rx,
            Err(e) => {
                return CommandReport {
                    command_id,
                    success: false,
                    output: String::new(),
                    error: Some(e.to_string()),
                    snapshot_id,
                };
            }
        };

        let dispatch = self.supervisor.execute_command(&session_id, &command).await;
        let output = capture_quiescent(tap).await;
        self.supervisor.remove_tap(&session_id).await;

        let mut success = true;
        if let Err(e) = dispatch {
            success = false;
            if error.is_none() {
                error = Some(dispatch_error(&e));
            }
        }
        if let Some(indicator) = scan_for_errors(&output) {
            success = false;
            if error.is_none() {
                error = Some(format!("output matched error indicator: {indicator}"));
            }
        }

        CommandReport { command_id, success, output, error, snapshot_id }
    }

    /// Roll a single command back by snapshot id.
    pub async fn rollback(&self, snapshot_id: SnapshotId) -> (bool, String) {
        let store = Arc::clone(&self.store);
        let id = snapshot_id.clone();
        match tokio::task::spawn_blocking(move || store.rollback_snapshot(&id)).await {
            Ok(Ok(true)) => (true, format!("snapshot {snapshot_id} restored")),
            Ok(Ok(false)) => (false, "rollback completed with failures".to_string()),
            Ok(Err(e)) => (false, e.to_string()),
            Err(_) => (false, "rollback task failed".to_string()),
        }
    }

    /// Roll back a whole batch, most recent snapshot first.
    pub async fn rollback_batch(&self, batch_id: dx_core::BatchId) -> bool {
        let store = Arc::clone(&self.store);
        match tokio::task::spawn_blocking(move || store.rollback_batch(&batch_id)).await {
            Ok(Ok(report)) => report.success(),
            Ok(Err(e)) => {
                tracing::error!(%e, "batch rollback failed");
                false
            }
            Err(_) => false,
        }
    }
}

fn dispatch_error(e: &ShellError) -> String {
    format!("Failed to execute command: {e}")
}

/// Collect output from the tap until it goes quiet.
async fn capture_quiescent(mut tap: mpsc::Receiver<String>) -> String {
    let mut output = String::new();
    let deadline = tokio::time::Instant::now() + QUIESCENCE_MAX;

    tokio::time::sleep(QUIESCENCE_BASE).await;
    // Drain whatever the base wait accumulated, then keep reading while the
    // stream stays busy.
    loop {
        match tokio::time::timeout(QUIESCENCE_IDLE, tap.recv()).await {
            Ok(Some(chunk)) => output.push_str(&chunk),
            Ok(None) => break,
            Err(_) => break, // idle window elapsed
        }
        if tokio::time::Instant::now() >= deadline {
            break;
        }
    }
    output
}

/// First error indicator present in the output, if any.
fn scan_for_errors(output: &str) -> Option<&'static str> {
    let lower = output.to_lowercase();
    ERROR_INDICATORS.iter().find(|needle| lower.contains(**needle)).copied()
}

#[cfg(test)]
#[path = "executor_tests.rs"]
mod tests;
