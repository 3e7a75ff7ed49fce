// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! A single interactive shell session: spawn configuration, output pumps,
//! and the exit terminator line.

use crate::error::ShellError;
use dx_core::SessionId;
use parking_lot::Mutex;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::mpsc;

/// Output pump read size.
const READ_CHUNK: usize = 4096;

/// How long a freshly spawned shell must stay alive for the start to count.
const STARTUP_GRACE: Duration = Duration::from_millis(500);

/// One chunk of shell output, tagged with its session.
#[derive(Debug, Clone)]
pub struct ShellOutput {
    pub session_id: SessionId,
    pub chunk: String,
}

/// Optional secondary consumer of a session's output, installed by the
/// deployment executor while it captures a command's transcript.
pub(crate) type Tap = Arc<Mutex<Option<mpsc::Sender<String>>>>;

/// Session info view for operators.
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub session_id: SessionId,
    pub shell_name: String,
    pub shell_path: PathBuf,
    pub running: bool,
    pub process_id: u32,
    pub created_at_ms: u64,
}

#[derive(Debug)]
pub(crate) struct ShellSession {
    pub(crate) session_id: SessionId,
    pub(crate) shell_name: String,
    pub(crate) shell_path: PathBuf,
    /// PID of the shell child; also its process-group id (new group at spawn).
    pub(crate) pid: u32,
    pub(crate) stdin: ChildStdin,
    pub(crate) child: Arc<tokio::sync::Mutex<Child>>,
    pub(crate) running: Arc<AtomicBool>,
    pub(crate) tap: Tap,
    pub(crate) created_at_ms: u64,
}

impl ShellSession {
    /// Spawn a shell child with stdin/stdout piped and output pumps running.
    ///
    /// Fails if the child dies within the startup grace period.
    pub(crate) async fn spawn(
        session_id: SessionId,
        shell_name: &str,
        shell_path: &Path,
        output_tx: mpsc::Sender<ShellOutput>,
        created_at_ms: u64,
    ) -> Result<Self, ShellError> {
        let mut cmd = Command::new(shell_path);
        configure_shell(&mut cmd, shell_name);
        cmd.env("TERM", "xterm-256color")
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);

        // New process group so signals can later target the whole subtree
        // without hitting the agent itself.
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd.spawn().map_err(|source| ShellError::SpawnFailed {
            shell: shell_name.to_string(),
            source,
        })?;

        let pid = child.id().ok_or(ShellError::DiedOnStartup { code: None })?;
        let stdin = child.stdin.take().ok_or(ShellError::StdinClosed)?;
        let stdout = child.stdout.take().ok_or(ShellError::StdinClosed)?;
        let stderr = child.stderr.take().ok_or(ShellError::StdinClosed)?;

        let running = Arc::new(AtomicBool::new(true));
        let tap: Tap = Arc::new(Mutex::new(None));
        let child = Arc::new(tokio::sync::Mutex::new(child));

        // stderr is merged into the same output stream as stdout
        tokio::spawn(pump(
            stderr,
            session_id.clone(),
            output_tx.clone(),
            Arc::clone(&tap),
            None,
            Arc::clone(&running),
        ));
        tokio::spawn(pump(
            stdout,
            session_id.clone(),
            output_tx,
            Arc::clone(&tap),
            Some(Arc::clone(&child)),
            Arc::clone(&running),
        ));

        tokio::time::sleep(STARTUP_GRACE).await;
        if let Ok(Some(status)) = child.lock().await.try_wait() {
            return Err(ShellError::DiedOnStartup { code: status.code() });
        }

        tracing::info!(%session_id, shell = shell_name, pid, "shell session started");
        Ok(Self {
            session_id,
            shell_name: shell_name.to_string(),
            shell_path: shell_path.to_path_buf(),
            pid,
            stdin,
            child,
            running,
            tap,
            created_at_ms,
        })
    }

    /// Write raw input to the shell's stdin, flushing immediately.
    pub(crate) async fn write_stdin(&mut self, text: &str) -> Result<(), ShellError> {
        self.stdin.write_all(text.as_bytes()).await?;
        self.stdin.flush().await?;
        Ok(())
    }

    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub(crate) fn info(&self) -> SessionInfo {
        SessionInfo {
            session_id: self.session_id.clone(),
            shell_name: self.shell_name.clone(),
            shell_path: self.shell_path.clone(),
            running: self.is_running(),
            process_id: self.pid,
            created_at_ms: self.created_at_ms,
        }
    }
}

/// Per-shell startup switches: minimal prompt, echo off, errors terminating,
/// so the transcript stays clean.
fn configure_shell(cmd: &mut Command, shell_name: &str) {
    match shell_name {
        "cmd" => {
            cmd.arg("/Q");
        }
        "powershell" | "pwsh" => {
            cmd.arg("-NoExit").arg("-Command").arg(
                "$ErrorActionPreference='Stop'; $ProgressPreference='SilentlyContinue';",
            );
        }
        "bash" => {
            cmd.env("PS1", "\\w\\$ ").arg("--login").arg("-i");
        }
        _ => {
            cmd.arg("-i");
        }
    }
}

/// Drain a child output stream in bounded chunks, forwarding each to the
/// session's output channel and any installed tap.
///
/// The pump owning `child` (the stdout pump) also emits the final
/// `[Process exited with code N]` line and flips `running` off.
async fn pump(
    mut reader: impl AsyncRead + Unpin + Send + 'static,
    session_id: SessionId,
    output_tx: mpsc::Sender<ShellOutput>,
    tap: Tap,
    child: Option<Arc<tokio::sync::Mutex<Child>>>,
    running: Arc<AtomicBool>,
) {
    let mut buf = [0u8; READ_CHUNK];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                let chunk = String::from_utf8_lossy(&buf[..n]).into_owned();
                if let Some(tx) = tap.lock().as_ref() {
                    let _ = tx.try_send(chunk.clone());
                }
                if output_tx
                    .send(ShellOutput { session_id: session_id.clone(), chunk })
                    .await
                    .is_err()
                {
                    break;
                }
            }
            Err(e) => {
                tracing::warn!(%session_id, %e, "error reading shell output");
                break;
            }
        }
    }

    let Some(child) = child else { return };

    // Stdout closed: the child is exiting. Collect its status for the
    // terminator line the operators rely on.
    let code = child.lock().await.wait().await.ok().and_then(|s| s.code());
    running.store(false, Ordering::SeqCst);

    let exit_line = match code {
        Some(code) => format!("\r\n[Process exited with code {code}]\r\n"),
        None => "\r\n[Process exited]\r\n".to_string(),
    };
    if let Some(tx) = tap.lock().as_ref() {
        let _ = tx.try_send(exit_line.clone());
    }
    let _ = output_tx.send(ShellOutput { session_id, chunk: exit_line }).await;
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
