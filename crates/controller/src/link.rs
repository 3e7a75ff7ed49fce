// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Transport seam between the executors and the connection layer.
//!
//! The group executor and the scheduler only need "send this event to that
//! agent's room" and "is that agent live"; this trait is that surface, so
//! tests substitute a fake without any sockets.

use async_trait::async_trait;
use dx_core::AgentId;
use dx_wire::WireEvent;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("agent not connected: {0}")]
    NotConnected(AgentId),
    #[error("send failed: {0}")]
    SendFailed(String),
}

/// Room-addressed event delivery to agents.
#[async_trait]
pub trait AgentLink: Send + Sync + 'static {
    /// Deliver an event to the agent's room.
    async fn dispatch(&self, agent_id: &AgentId, event: WireEvent) -> Result<(), LinkError>;

    /// Whether the agent is bound and its heartbeat is fresh.
    fn is_connected(&self, agent_id: &AgentId) -> bool;
}

/// In-memory link for tests: records dispatches, liveness is configurable.
#[cfg(any(test, feature = "test-support"))]
pub struct FakeLink {
    dispatched: parking_lot::Mutex<Vec<(AgentId, WireEvent)>>,
    connected: parking_lot::Mutex<std::collections::HashSet<AgentId>>,
}

#[cfg(any(test, feature = "test-support"))]
impl FakeLink {
    pub fn new() -> Self {
        Self {
            dispatched: parking_lot::Mutex::new(Vec::new()),
            connected: parking_lot::Mutex::new(std::collections::HashSet::new()),
        }
    }

    pub fn connect(&self, agent_id: impl Into<AgentId>) {
        self.connected.lock().insert(agent_id.into());
    }

    pub fn disconnect(&self, agent_id: &AgentId) {
        self.connected.lock().remove(agent_id);
    }

    /// Everything dispatched so far, in order.
    pub fn dispatched(&self) -> Vec<(AgentId, WireEvent)> {
        self.dispatched.lock().clone()
    }

    /// Command ids of `execute_deployment_command` events sent to `agent`.
    pub fn command_ids_for(&self, agent_id: &AgentId) -> Vec<dx_core::CommandId> {
        self.dispatched
            .lock()
            .iter()
            .filter(|(agent, _)| agent == agent_id)
            .filter_map(|(_, event)| match event {
                WireEvent::ExecuteDeploymentCommand { command_id, .. } => {
                    Some(command_id.clone())
                }
                _ => None,
            })
            .collect()
    }
}

#[cfg(any(test, feature = "test-support"))]
impl Default for FakeLink {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(any(test, feature = "test-support"))]
#[async_trait]
impl AgentLink for FakeLink {
    async fn dispatch(&self, agent_id: &AgentId, event: WireEvent) -> Result<(), LinkError> {
        if !self.is_connected(agent_id) {
            return Err(LinkError::NotConnected(agent_id.clone()));
        }
        self.dispatched.lock().push((agent_id.clone(), event));
        Ok(())
    }

    fn is_connected(&self, agent_id: &AgentId) -> bool {
        self.connected.lock().contains(agent_id.as_str())
    }
}
