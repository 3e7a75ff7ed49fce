// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session map and the operations the controller drives over it.

use crate::detect::detect_shells;
use crate::error::ShellError;
use crate::session::{SessionInfo, ShellOutput, ShellSession};
use crate::signals;
use crate::{INTERRUPT_CHAR, SUSPEND_CHAR};
use dx_core::SessionId;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};

/// Grace period before escalating a stopped shell from SIGTERM to SIGKILL.
const STOP_GRACE: Duration = Duration::from_secs(5);

/// Capacity of a tap channel installed by the deployment executor.
const TAP_CAPACITY: usize = 256;

/// Owns every interactive shell session on this agent.
///
/// The session map is serialized behind one async mutex: command dispatch
/// and signal delivery are driven by the controller-message handler, the
/// output pumps only touch their own channels.
pub struct ShellSupervisor {
    shells: BTreeMap<String, PathBuf>,
    sessions: Mutex<HashMap<SessionId, ShellSession>>,
    output_tx: mpsc::Sender<ShellOutput>,
}

impl ShellSupervisor {
    /// Create a supervisor over the host's detected shells.
    pub fn new(output_tx: mpsc::Sender<ShellOutput>) -> Self {
        Self::with_shells(detect_shells(), output_tx)
    }

    pub fn with_shells(
        shells: BTreeMap<String, PathBuf>,
        output_tx: mpsc::Sender<ShellOutput>,
    ) -> Self {
        Self { shells, sessions: Mutex::new(HashMap::new()), output_tx }
    }

    /// Shell names available on this host, as advertised at registration.
    pub fn shell_names(&self) -> Vec<String> {
        self.shells.keys().cloned().collect()
    }

    /// Start a shell session. An existing session under the same id is
    /// stopped first (the new session replaces it).
    pub async fn start_shell(
        &self,
        session_id: SessionId,
        shell_name: &str,
    ) -> Result<(), ShellError> {
        let shell_path = self
            .shells
            .get(shell_name)
            .cloned()
            .ok_or_else(|| ShellError::UnknownShell(shell_name.to_string()))?;

        if self.sessions.lock().await.contains_key(&session_id) {
            tracing::warn!(%session_id, "session already exists, replacing");
            self.stop_shell(&session_id).await?;
        }

        let now_ms = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        let session = ShellSession::spawn(
            session_id.clone(),
            shell_name,
            &shell_path,
            self.output_tx.clone(),
            now_ms,
        )
        .await?;

        self.sessions.lock().await.insert(session_id, session);
        Ok(())
    }

    /// Write a command into a session's shell, appending a newline if absent.
    ///
    /// The interrupt and suspend characters are routed to the signal paths
    /// instead of being written through.
    pub async fn execute_command(
        &self,
        session_id: &SessionId,
        command: &str,
    ) -> Result<(), ShellError> {
        let trimmed = command.trim();
        if command.starts_with(INTERRUPT_CHAR) || trimmed == "^C" {
            return self.send_interrupt(session_id).await;
        }
        if command.starts_with(SUSPEND_CHAR) || trimmed == "^Z" {
            return self.send_suspend(session_id).await;
        }

        let mut sessions = self.sessions.lock().await;
        let session = sessions
            .get_mut(session_id.as_str())
            .ok_or_else(|| ShellError::SessionNotFound(session_id.clone()))?;
        if !session.is_running() {
            return Err(ShellError::SessionNotFound(session_id.clone()));
        }

        if command.ends_with('\n') {
            session.write_stdin(command).await
        } else {
            let mut line = command.to_string();
            line.push('\n');
            session.write_stdin(&line).await
        }
    }

    /// Interrupt the session's foreground work: SIGINT to every descendant,
    /// then to the process group. The shell itself survives.
    pub async fn send_interrupt(&self, session_id: &SessionId) -> Result<(), ShellError> {
        let mut sessions = self.sessions.lock().await;
        let session = sessions
            .get_mut(session_id.as_str())
            .ok_or_else(|| ShellError::SessionNotFound(session_id.clone()))?;

        tracing::info!(%session_id, pid = session.pid, "delivering interrupt");
        if !signals::interrupt_tree(session.pid) {
            // Last resort: the ^C character through stdin
            session.write_stdin("\u{0003}").await?;
        }
        Ok(())
    }

    /// Suspend the session's foreground work (SIGTSTP to the process group;
    /// stdin `^Z` where suspension is unavailable).
    pub async fn send_suspend(&self, session_id: &SessionId) -> Result<(), ShellError> {
        let mut sessions = self.sessions.lock().await;
        let session = sessions
            .get_mut(session_id.as_str())
            .ok_or_else(|| ShellError::SessionNotFound(session_id.clone()))?;

        tracing::info!(%session_id, pid = session.pid, "delivering suspend");
        if !signals::suspend_tree(session.pid) {
            session.write_stdin("\u{001a}").await?;
        }
        Ok(())
    }

    /// Stop a session: descendants first, then the shell, escalating from
    /// SIGTERM to SIGKILL after the grace period. Removes the session record.
    pub async fn stop_shell(&self, session_id: &SessionId) -> Result<(), ShellError> {
        let session = self
            .sessions
            .lock()
            .await
            .remove(session_id.as_str())
            .ok_or_else(|| ShellError::SessionNotFound(session_id.clone()))?;

        tracing::info!(%session_id, pid = session.pid, "stopping shell session");
        signals::terminate_descendants(session.pid, Duration::from_secs(2)).await;
        signals::terminate_group(session.pid);

        // The stdout pump flips `running` off once it has reaped the child.
        let deadline = tokio::time::Instant::now() + STOP_GRACE;
        while session.running.load(Ordering::SeqCst) {
            if tokio::time::Instant::now() >= deadline {
                tracing::warn!(%session_id, "shell did not terminate gracefully, killing");
                signals::kill_group(session.pid);
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        Ok(())
    }

    /// Stop every session (agent shutdown, controller disconnect).
    pub async fn stop_all(&self) {
        let ids: Vec<SessionId> = self.sessions.lock().await.keys().cloned().collect();
        for id in ids {
            if let Err(e) = self.stop_shell(&id).await {
                tracing::warn!(session_id = %id, %e, "error stopping session");
            }
        }
    }

    /// Install a tap receiving a copy of a session's output stream.
    ///
    /// Used by the deployment executor to capture one command's transcript;
    /// only one tap per session, replacing any prior one.
    pub async fn install_tap(
        &self,
        session_id: &SessionId,
    ) -> Result<mpsc::Receiver<String>, ShellError> {
        let sessions = self.sessions.lock().await;
        let session = sessions
            .get(session_id.as_str())
            .ok_or_else(|| ShellError::SessionNotFound(session_id.clone()))?;
        let (tx, rx) = mpsc::channel(TAP_CAPACITY);
        *session.tap.lock() = Some(tx);
        Ok(rx)
    }

    /// Remove a session's tap.
    pub async fn remove_tap(&self, session_id: &SessionId) {
        if let Some(session) = self.sessions.lock().await.get(session_id.as_str()) {
            *session.tap.lock() = None;
        }
    }

    /// Whether a running session exists under this id.
    pub async fn has_session(&self, session_id: &SessionId) -> bool {
        self.sessions
            .lock()
            .await
            .get(session_id.as_str())
            .map(|s| s.is_running())
            .unwrap_or(false)
    }

    /// The shell child's PID for a session.
    pub async fn session_pid(&self, session_id: &SessionId) -> Option<u32> {
        self.sessions.lock().await.get(session_id.as_str()).map(|s| s.pid)
    }

    /// Info view over all sessions.
    pub async fn sessions_info(&self) -> Vec<SessionInfo> {
        self.sessions.lock().await.values().map(|s| s.info()).collect()
    }

    /// Id of any running session, used when a deployment command arrives
    /// without a dedicated session.
    pub async fn any_session(&self) -> Option<SessionId> {
        self.sessions
            .lock()
            .await
            .iter()
            .find(|(_, s)| s.is_running())
            .map(|(id, _)| id.clone())
    }
}

#[cfg(test)]
#[path = "supervisor_tests.rs"]
mod tests;
