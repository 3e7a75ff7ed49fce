// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Controller-event dispatch on the agent.
//!
//! Each incoming frame is validated, then routed to the shell supervisor,
//! the deployment executor, or the snapshot store. Long-running work is
//! spawned so the read loop keeps servicing frames; every operator-initiated
//! action produces exactly one terminal event upstream.

use crate::executor::DeploymentExecutor;
use dx_core::SessionId;
use dx_shell::ShellSupervisor;
use dx_wire::WireEvent;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Routes controller events to the agent's subsystems.
#[derive(Clone)]
pub struct AgentHandlers {
    supervisor: Arc<ShellSupervisor>,
    executor: Arc<DeploymentExecutor>,
    outgoing: mpsc::Sender<WireEvent>,
    activated: Arc<AtomicBool>,
}

impl AgentHandlers {
    pub fn new(
        supervisor: Arc<ShellSupervisor>,
        executor: Arc<DeploymentExecutor>,
        outgoing: mpsc::Sender<WireEvent>,
        activated: bool,
    ) -> Self {
        Self {
            supervisor,
            executor,
            outgoing,
            activated: Arc::new(AtomicBool::new(activated)),
        }
    }

    pub fn set_activated(&self, activated: bool) {
        self.activated.store(activated, Ordering::SeqCst);
    }

    async fn emit(&self, event: WireEvent) {
        if self.outgoing.send(event).await.is_err() {
            tracing::warn!("outgoing channel closed, dropping event");
        }
    }

    async fn refuse(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!(%message, "refusing controller event");
        self.emit(WireEvent::Error { message }).await;
    }

    /// Handle one controller event.
    pub async fn handle(&self, event: WireEvent) {
        match event {
            WireEvent::StartShellRequest { shell, session_id } => {
                self.handle_start_shell(shell, session_id).await;
            }
            WireEvent::StopShellRequest { session_id } => {
                self.handle_stop_shell(session_id).await;
            }
            WireEvent::CommandInput { session_id, command } => {
                if let Err(e) = self.supervisor.execute_command(&session_id, &command).await {
                    self.refuse(format!("command input failed: {e}")).await;
                }
            }
            WireEvent::ExecuteDeploymentCommand { command_id, command, shell, .. } => {
                if !self.activated.load(Ordering::SeqCst) {
                    self.refuse("agent is not activated; deployment commands refused").await;
                    return;
                }
                let handlers = self.clone();
                tokio::spawn(async move {
                    handlers.run_deployment_command(command_id, command, shell).await;
                });
            }
            WireEvent::RollbackCommand { snapshot_id } => {
                if !self.activated.load(Ordering::SeqCst) {
                    self.refuse("agent is not activated; rollback refused").await;
                    return;
                }
                let handlers = self.clone();
                tokio::spawn(async move {
                    let (success, message) =
                        handlers.executor.rollback(snapshot_id.clone()).await;
                    handlers
                        .emit(WireEvent::RollbackResult { snapshot_id, success, message })
                        .await;
                });
            }
            WireEvent::RollbackBatch { batch_id } => {
                if !self.activated.load(Ordering::SeqCst) {
                    self.refuse("agent is not activated; rollback refused").await;
                    return;
                }
                let handlers = self.clone();
                tokio::spawn(async move {
                    let success = handlers.executor.rollback_batch(batch_id.clone()).await;
                    handlers.emit(WireEvent::BatchRollbackResult { batch_id, success }).await;
                });
            }
            WireEvent::ReceiveFile {
                deployment_id,
                file_id,
                filename,
                file_data_b64,
                target_path,
                create_path_if_not_exists,
            } => {
                self.handle_receive_file(
                    deployment_id,
                    file_id,
                    filename,
                    file_data_b64,
                    target_path,
                    create_path_if_not_exists,
                )
                .await;
            }
            WireEvent::InstallSoftware { deployment_id, device_id, software_list } => {
                // Installer selection is the deployment subsystem's concern;
                // this build reports the handoff as unavailable so the
                // controller still observes a terminal event.
                tracing::warn!(deployment_id, "software install requested without installer");
                self.emit(WireEvent::SoftwareInstallationStatus {
                    deployment_id,
                    device_id,
                    status: "failed".to_string(),
                    progress: Some(0),
                    message: None,
                    error: Some(format!(
                        "no installer backend for {} package(s) on this endpoint",
                        software_list.len()
                    )),
                })
                .await;
            }
            other => {
                self.refuse(format!("unexpected event on agent: {}", other.event_name())).await;
            }
        }
    }

    async fn handle_start_shell(&self, shell: String, session_id: SessionId) {
        if session_id.is_empty() {
            self.refuse("start_shell_request without session_id").await;
            return;
        }
        match self.supervisor.start_shell(session_id.clone(), &shell).await {
            Ok(()) => {
                self.emit(WireEvent::ShellStarted { shell, session_id }).await;
            }
            Err(e) => {
                self.refuse(format!("failed to start shell {shell}: {e}")).await;
            }
        }
    }

    async fn handle_stop_shell(&self, session_id: SessionId) {
        match self.supervisor.stop_shell(&session_id).await {
            Ok(()) => {
                self.emit(WireEvent::ShellStopped { session_id }).await;
            }
            Err(e) => {
                self.refuse(format!("failed to stop session {session_id}: {e}")).await;
            }
        }
    }

    /// Run one deployment command in a session (any running session; one is
    /// started on demand) and emit the completion event.
    async fn run_deployment_command(
        &self,
        command_id: dx_core::CommandId,
        command: String,
        shell: String,
    ) {
        let session_id = match self.supervisor.any_session().await {
            Some(id) => id,
            None => {
                let id = SessionId::from_string(format!("deploy-{}", command_id.short(8)));
                if let Err(e) = self.supervisor.start_shell(id.clone(), &shell).await {
                    self.emit(WireEvent::DeploymentCommandCompleted {
                        command_id,
                        success: false,
                        output: String::new(),
                        error: Some(format!("could not start {shell}: {e}")),
                        snapshot_id: None,
                    })
                    .await;
                    return;
                }
                id
            }
        };

        let report = self.executor.execute(command_id, command, session_id).await;
        self.emit(WireEvent::DeploymentCommandCompleted {
            command_id: report.command_id,
            success: report.success,
            output: report.output,
            error: report.error,
            snapshot_id: report.snapshot_id,
        })
        .await;
    }

    async fn handle_receive_file(
        &self,
        deployment_id: i64,
        file_id: i64,
        filename: String,
        file_data_b64: String,
        target_path: String,
        create_path_if_not_exists: bool,
    ) {
        use base64::Engine;

        let result = async {
            let bytes = base64::engine::general_purpose::STANDARD
                .decode(file_data_b64.as_bytes())
                .map_err(|e| format!("invalid file data: {e}"))?;

            let dir = std::path::PathBuf::from(&target_path);
            let mut path_created = false;
            if !dir.exists() {
                if !create_path_if_not_exists {
                    return Err(format!("target path does not exist: {target_path}"));
                }
                tokio::fs::create_dir_all(&dir).await.map_err(|e| e.to_string())?;
                path_created = true;
            }
            let file_path = dir.join(&filename);
            tokio::fs::write(&file_path, &bytes).await.map_err(|e| e.to_string())?;
            Ok::<_, String>((path_created, file_path))
        }
        .await;

        let event = match result {
            Ok((path_created, file_path)) => WireEvent::FileTransferResult {
                deployment_id,
                file_id,
                success: true,
                message: Some(format!("wrote {filename}")),
                error: None,
                path_created,
                file_path: Some(file_path.display().to_string()),
            },
            Err(error) => WireEvent::FileTransferResult {
                deployment_id,
                file_id,
                success: false,
                message: None,
                error: Some(error),
                path_created: false,
                file_path: None,
            },
        };
        self.emit(event).await;
    }
}

#[cfg(test)]
#[path = "handlers_tests.rs"]
mod tests;
