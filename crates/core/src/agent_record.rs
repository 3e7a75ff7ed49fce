// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Agent records as tracked by the controller's connection registry.

use crate::id::AgentId;
use serde::{Deserialize, Serialize};

/// Heartbeat liveness window. An agent is online iff a transport session is
/// bound and its last heartbeat is within this window.
pub const LIVENESS_WINDOW_MS: u64 = 30_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Online,
    Offline,
}

/// What the controller knows about one endpoint agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRecord {
    pub agent_id: AgentId,
    pub machine_id: String,
    pub device_name: String,
    pub ip_address: String,
    pub os: String,
    pub shells: Vec<String>,
    #[serde(default)]
    pub system_info: serde_json::Value,
    pub status: AgentStatus,
    /// Last heartbeat or registration, epoch ms.
    pub last_seen_ms: u64,
    /// Transport session currently bound to this agent, if any.
    #[serde(default)]
    pub session: Option<String>,
}

impl AgentRecord {
    /// Online iff a session is bound and the last heartbeat is fresh.
    pub fn is_live(&self, now_ms: u64) -> bool {
        self.session.is_some() && now_ms.saturating_sub(self.last_seen_ms) <= LIVENESS_WINDOW_MS
    }
}

#[cfg(test)]
#[path = "agent_record_tests.rs"]
mod tests;
