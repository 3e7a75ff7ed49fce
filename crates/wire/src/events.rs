// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Typed protocol events.
//!
//! Variant names serialize to the snake_case event names the agents and the
//! controller exchange; the serde representation matches [`Frame`] exactly
//! (`event` tag, `data` content), so a typed event and a raw frame are two
//! views of the same bytes.

use crate::frame::{Frame, ProtocolError};
use dx_core::{AgentId, BatchId, CommandId, DeviceId, ExecutionId, SessionId, SnapshotId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum WireEvent {
    // ── Controller → agent ─────────────────────────────────────────────
    StartShellRequest {
        shell: String,
        session_id: SessionId,
    },
    StopShellRequest {
        session_id: SessionId,
    },
    CommandInput {
        session_id: SessionId,
        command: String,
    },
    ExecuteDeploymentCommand {
        command_id: CommandId,
        command: String,
        shell: String,
        #[serde(default)]
        execution_id: Option<ExecutionId>,
        #[serde(default)]
        group_execution: bool,
    },
    RollbackCommand {
        snapshot_id: SnapshotId,
    },
    RollbackBatch {
        batch_id: BatchId,
    },
    /// Passthrough to the software installer subsystem; the core only cares
    /// that it ends with a `software_installation_status` terminal event.
    InstallSoftware {
        deployment_id: i64,
        device_id: DeviceId,
        software_list: Vec<serde_json::Value>,
    },
    /// Passthrough to the file deployment subsystem.
    ReceiveFile {
        deployment_id: i64,
        file_id: i64,
        filename: String,
        file_data_b64: String,
        target_path: String,
        #[serde(default)]
        create_path_if_not_exists: bool,
    },

    // ── Agent → controller ─────────────────────────────────────────────
    AgentRegister {
        agent_id: AgentId,
        machine_id: String,
        device_name: String,
        ip_address: String,
        os: String,
        shells: Vec<String>,
        #[serde(default)]
        system_info: serde_json::Value,
    },
    AgentHeartbeat {
        agent_id: AgentId,
    },
    CommandOutput {
        session_id: SessionId,
        output: String,
    },
    ShellStarted {
        shell: String,
        session_id: SessionId,
    },
    ShellStopped {
        session_id: SessionId,
    },
    DeploymentCommandOutput {
        command_id: CommandId,
        output: String,
    },
    DeploymentCommandCompleted {
        command_id: CommandId,
        success: bool,
        output: String,
        #[serde(default)]
        error: Option<String>,
        #[serde(default)]
        snapshot_id: Option<SnapshotId>,
    },
    RollbackResult {
        snapshot_id: SnapshotId,
        success: bool,
        message: String,
    },
    BatchRollbackResult {
        batch_id: BatchId,
        success: bool,
    },
    SoftwareInstallationStatus {
        deployment_id: i64,
        device_id: DeviceId,
        status: String,
        #[serde(default)]
        progress: Option<u32>,
        #[serde(default)]
        message: Option<String>,
        #[serde(default)]
        error: Option<String>,
    },
    FileTransferResult {
        deployment_id: i64,
        file_id: i64,
        success: bool,
        #[serde(default)]
        message: Option<String>,
        #[serde(default)]
        error: Option<String>,
        #[serde(default)]
        path_created: bool,
        #[serde(default)]
        file_path: Option<String>,
    },

    // ── Controller → operator sessions ─────────────────────────────────
    DeviceStatusChanged {
        agent_id: AgentId,
        status: String,
    },
    /// Validation failure surfaced to the offending session.
    Error {
        message: String,
    },

    // ── Operator → controller ──────────────────────────────────────────
    /// Bind the sending operator session as the interactive owner of this
    /// agent's shell streams. Last writer wins.
    FrontendAttach {
        agent_id: AgentId,
    },
}

impl WireEvent {
    /// The wire-level event name for this variant.
    pub fn event_name(&self) -> &'static str {
        match self {
            WireEvent::StartShellRequest { .. } => "start_shell_request",
            WireEvent::StopShellRequest { .. } => "stop_shell_request",
            WireEvent::CommandInput { .. } => "command_input",
            WireEvent::ExecuteDeploymentCommand { .. } => "execute_deployment_command",
            WireEvent::RollbackCommand { .. } => "rollback_command",
            WireEvent::RollbackBatch { .. } => "rollback_batch",
            WireEvent::InstallSoftware { .. } => "install_software",
            WireEvent::ReceiveFile { .. } => "receive_file",
            WireEvent::AgentRegister { .. } => "agent_register",
            WireEvent::AgentHeartbeat { .. } => "agent_heartbeat",
            WireEvent::CommandOutput { .. } => "command_output",
            WireEvent::ShellStarted { .. } => "shell_started",
            WireEvent::ShellStopped { .. } => "shell_stopped",
            WireEvent::DeploymentCommandOutput { .. } => "deployment_command_output",
            WireEvent::DeploymentCommandCompleted { .. } => "deployment_command_completed",
            WireEvent::RollbackResult { .. } => "rollback_result",
            WireEvent::BatchRollbackResult { .. } => "batch_rollback_result",
            WireEvent::SoftwareInstallationStatus { .. } => "software_installation_status",
            WireEvent::FileTransferResult { .. } => "file_transfer_result",
            WireEvent::DeviceStatusChanged { .. } => "device_status_changed",
            WireEvent::Error { .. } => "error",
            WireEvent::FrontendAttach { .. } => "frontend_attach",
        }
    }

    /// Interpret a raw frame as a typed event.
    pub fn from_frame(frame: Frame) -> Result<Self, ProtocolError> {
        let event_name = frame.event.clone();
        let value = serde_json::json!({ "event": frame.event, "data": frame.data });
        serde_json::from_value(value).map_err(|e| {
            // Distinguish "we don't know this event" from "known event,
            // bad payload" so validation errors can name the field.
            if e.to_string().starts_with("unknown variant") {
                ProtocolError::UnknownEvent(event_name)
            } else {
                ProtocolError::Json(e)
            }
        })
    }

    /// Convert to a raw frame for transmission.
    pub fn into_frame(self) -> Result<Frame, ProtocolError> {
        let value = serde_json::to_value(&self)?;
        let event = self.event_name();
        let data = match value {
            serde_json::Value::Object(mut map) => {
                map.remove("data").unwrap_or(serde_json::Value::Null)
            }
            _ => serde_json::Value::Null,
        };
        Ok(Frame::new(event, data))
    }

    /// Encode directly to a wire text message.
    pub fn encode(self) -> Result<String, ProtocolError> {
        crate::frame::encode(&self.into_frame()?)
    }

    /// Decode a wire text message directly to a typed event.
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        Self::from_frame(crate::frame::decode(text)?)
    }
}

#[cfg(test)]
#[path = "events_tests.rs"]
mod tests;
