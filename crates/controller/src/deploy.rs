// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Deployment passthrough.
//!
//! Software and file deployments are owned by their own subsystems; the core
//! only hands payloads to the target agents and captures the terminal status
//! events that come back, so callers (the scheduler, operators) observe one
//! completion per handoff.

use crate::group::DeviceTarget;
use crate::link::AgentLink;
use dx_wire::WireEvent;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

/// Latest per-device status for one deployment.
#[derive(Debug, Clone)]
pub struct DeploymentStatus {
    pub device_id: i64,
    pub status: String,
    pub message: Option<String>,
    pub error: Option<String>,
}

pub struct DeploymentDispatcher {
    link: Arc<dyn AgentLink>,
    next_id: AtomicI64,
    statuses: Mutex<HashMap<i64, Vec<DeploymentStatus>>>,
}

impl DeploymentDispatcher {
    pub fn new(link: Arc<dyn AgentLink>) -> Self {
        Self { link, next_id: AtomicI64::new(1), statuses: Mutex::new(HashMap::new()) }
    }

    /// Hand a software list to every target agent. Returns the deployment id.
    pub async fn start_software_deployment(
        &self,
        devices: &[DeviceTarget],
        software_list: Vec<serde_json::Value>,
    ) -> i64 {
        let deployment_id = self.next_id.fetch_add(1, Ordering::SeqCst);
        for device in devices {
            let event = WireEvent::InstallSoftware {
                deployment_id,
                device_id: device.device_id,
                software_list: software_list.clone(),
            };
            if let Err(e) = self.link.dispatch(&device.agent_id, event).await {
                tracing::warn!(agent_id = %device.agent_id, %e, "software handoff failed");
                self.record(deployment_id, DeploymentStatus {
                    device_id: device.device_id,
                    status: "failed".to_string(),
                    message: None,
                    error: Some(e.to_string()),
                });
            }
        }
        deployment_id
    }

    /// Hand file payloads to every target agent. Returns the deployment id.
    ///
    /// Each file object carries `file_id`, `filename`, `file_data_b64`, and
    /// `target_path` as produced by the upload subsystem.
    pub async fn start_file_deployment(
        &self,
        devices: &[DeviceTarget],
        files: &[serde_json::Value],
        create_path_if_not_exists: bool,
    ) -> i64 {
        let deployment_id = self.next_id.fetch_add(1, Ordering::SeqCst);
        for device in devices {
            for file in files {
                let event = WireEvent::ReceiveFile {
                    deployment_id,
                    file_id: file.get("file_id").and_then(|v| v.as_i64()).unwrap_or_default(),
                    filename: str_field(file, "filename"),
                    file_data_b64: str_field(file, "file_data_b64"),
                    target_path: str_field(file, "target_path"),
                    create_path_if_not_exists,
                };
                if let Err(e) = self.link.dispatch(&device.agent_id, event).await {
                    tracing::warn!(agent_id = %device.agent_id, %e, "file handoff failed");
                    self.record(deployment_id, DeploymentStatus {
                        device_id: device.device_id,
                        status: "failed".to_string(),
                        message: None,
                        error: Some(e.to_string()),
                    });
                }
            }
        }
        deployment_id
    }

    /// Capture a `software_installation_status` event.
    pub fn record_software_status(
        &self,
        deployment_id: i64,
        device_id: i64,
        status: String,
        message: Option<String>,
        error: Option<String>,
    ) {
        self.record(deployment_id, DeploymentStatus { device_id, status, message, error });
    }

    /// Capture a `file_transfer_result` event.
    pub fn record_file_result(
        &self,
        deployment_id: i64,
        success: bool,
        message: Option<String>,
        error: Option<String>,
    ) {
        self.record(deployment_id, DeploymentStatus {
            device_id: 0,
            status: if success { "completed" } else { "failed" }.to_string(),
            message,
            error,
        });
    }

    fn record(&self, deployment_id: i64, status: DeploymentStatus) {
        self.statuses.lock().entry(deployment_id).or_default().push(status);
    }

    pub fn statuses(&self, deployment_id: i64) -> Vec<DeploymentStatus> {
        self.statuses.lock().get(&deployment_id).cloned().unwrap_or_default()
    }
}

fn str_field(value: &serde_json::Value, key: &str) -> String {
    value.get(key).and_then(|v| v.as_str()).unwrap_or_default().to_string()
}
