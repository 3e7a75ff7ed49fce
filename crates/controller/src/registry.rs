// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Connection registry: agent ↔ transport session ↔ operator session.
//!
//! At most one active transport session per agent (last writer wins; the
//! prior session is stale). An agent is online iff a session is bound AND
//! its last heartbeat is within the liveness window. Shell streams have one
//! interactive owner: the last operator session to attach.

use crate::link::{AgentLink, LinkError};
use async_trait::async_trait;
use dx_core::{AgentId, AgentRecord, AgentStatus, Clock};
use dx_wire::WireEvent;
use parking_lot::Mutex;
use std::collections::HashMap;
use tokio::sync::mpsc;

/// Identifies one WebSocket connection on this controller.
pub type ConnId = u64;

struct AgentEntry {
    record: AgentRecord,
    conn: Option<ConnId>,
    tx: Option<mpsc::Sender<WireEvent>>,
}

struct FrontendBinding {
    conn: ConnId,
    tx: mpsc::Sender<WireEvent>,
}

#[derive(Default)]
struct RegistryInner {
    agents: HashMap<AgentId, AgentEntry>,
    by_conn: HashMap<ConnId, AgentId>,
    /// Shell-stream owner per agent; last attach wins.
    frontends: HashMap<AgentId, FrontendBinding>,
}

/// Registration data carried by `agent_register`.
#[derive(Debug, Clone)]
pub struct Registration {
    pub agent_id: AgentId,
    pub machine_id: String,
    pub device_name: String,
    pub ip_address: String,
    pub os: String,
    pub shells: Vec<String>,
    pub system_info: serde_json::Value,
}

pub struct ConnectionRegistry<C: Clock> {
    clock: C,
    inner: Mutex<RegistryInner>,
}

impl<C: Clock> ConnectionRegistry<C> {
    pub fn new(clock: C) -> Self {
        Self { clock, inner: Mutex::new(RegistryInner::default()) }
    }

    /// Bind a transport session to an agent. A second bind replaces the
    /// prior one. Returns the stale connection, if any.
    pub fn add_agent(
        &self,
        registration: Registration,
        conn: ConnId,
        tx: mpsc::Sender<WireEvent>,
    ) -> Option<ConnId> {
        let now_ms = self.clock.epoch_ms();
        let mut inner = self.inner.lock();

        let agent_id = registration.agent_id.clone();
        let stale = inner.agents.get(&agent_id).and_then(|e| e.conn);
        if let Some(stale_conn) = stale {
            inner.by_conn.remove(&stale_conn);
            tracing::warn!(%agent_id, stale_conn, "replacing stale agent session");
        }

        let record = AgentRecord {
            agent_id: agent_id.clone(),
            machine_id: registration.machine_id,
            device_name: registration.device_name,
            ip_address: registration.ip_address,
            os: registration.os,
            shells: registration.shells,
            system_info: registration.system_info,
            status: AgentStatus::Online,
            last_seen_ms: now_ms,
            session: Some(conn.to_string()),
        };
        inner.agents.insert(
            agent_id.clone(),
            AgentEntry { record, conn: Some(conn), tx: Some(tx) },
        );
        inner.by_conn.insert(conn, agent_id.clone());
        tracing::info!(%agent_id, conn, "agent registered");
        stale
    }

    /// Record a heartbeat for an agent.
    pub fn heartbeat(&self, agent_id: &AgentId) {
        let now_ms = self.clock.epoch_ms();
        if let Some(entry) = self.inner.lock().agents.get_mut(agent_id) {
            entry.record.last_seen_ms = now_ms;
            entry.record.status = AgentStatus::Online;
        }
    }

    /// Tear down whatever this connection was bound to.
    ///
    /// If it was an agent session, the agent goes offline and the
    /// `device_status_changed` event to surface upstream is returned.
    pub fn remove_session(&self, conn: ConnId) -> Option<WireEvent> {
        let mut inner = self.inner.lock();

        inner.frontends.retain(|_, binding| binding.conn != conn);

        let agent_id = inner.by_conn.remove(&conn)?;
        if let Some(entry) = inner.agents.get_mut(&agent_id) {
            // Only unbind if this conn is still the active session
            if entry.conn == Some(conn) {
                entry.conn = None;
                entry.tx = None;
                entry.record.session = None;
                entry.record.status = AgentStatus::Offline;
                tracing::info!(%agent_id, conn, "agent session removed");
                return Some(WireEvent::DeviceStatusChanged {
                    agent_id,
                    status: "offline".to_string(),
                });
            }
        }
        None
    }

    /// Bind an operator session as the interactive owner of an agent's
    /// shell streams. Last writer wins.
    pub fn map_agent_to_frontend(
        &self,
        agent_id: AgentId,
        conn: ConnId,
        tx: mpsc::Sender<WireEvent>,
    ) {
        self.inner.lock().frontends.insert(agent_id, FrontendBinding { conn, tx });
    }

    /// The operator channel currently owning this agent's shell streams.
    pub fn frontend_for(&self, agent_id: &AgentId) -> Option<mpsc::Sender<WireEvent>> {
        self.inner.lock().frontends.get(agent_id).map(|b| b.tx.clone())
    }

    /// The agent bound to a connection, if it is an agent session.
    pub fn agent_for_conn(&self, conn: ConnId) -> Option<AgentId> {
        self.inner.lock().by_conn.get(&conn).cloned()
    }

    /// The agent a frontend connection is attached to, if any.
    pub fn attachment_for_conn(&self, conn: ConnId) -> Option<AgentId> {
        self.inner
            .lock()
            .frontends
            .iter()
            .find(|(_, binding)| binding.conn == conn)
            .map(|(agent_id, _)| agent_id.clone())
    }

    pub fn agent_record(&self, agent_id: &AgentId) -> Option<AgentRecord> {
        let now_ms = self.clock.epoch_ms();
        self.inner.lock().agents.get(agent_id).map(|entry| {
            let mut record = entry.record.clone();
            if !record.is_live(now_ms) {
                record.status = AgentStatus::Offline;
            }
            record
        })
    }

    pub fn list_agents(&self) -> Vec<AgentRecord> {
        let now_ms = self.clock.epoch_ms();
        self.inner
            .lock()
            .agents
            .values()
            .map(|entry| {
                let mut record = entry.record.clone();
                if !record.is_live(now_ms) {
                    record.status = AgentStatus::Offline;
                }
                record
            })
            .collect()
    }

    /// Online iff bound and the last heartbeat is within
    /// [`LIVENESS_WINDOW_MS`].
    pub fn is_live(&self, agent_id: &AgentId) -> bool {
        let now_ms = self.clock.epoch_ms();
        self.inner
            .lock()
            .agents
            .get(agent_id)
            .map(|entry| entry.record.is_live(now_ms))
            .unwrap_or(false)
    }

    fn agent_tx(&self, agent_id: &AgentId) -> Option<mpsc::Sender<WireEvent>> {
        self.inner.lock().agents.get(agent_id).and_then(|e| e.tx.clone())
    }
}

#[async_trait]
impl<C: Clock> AgentLink for ConnectionRegistry<C> {
    async fn dispatch(&self, agent_id: &AgentId, event: WireEvent) -> Result<(), LinkError> {
        let tx = self
            .agent_tx(agent_id)
            .ok_or_else(|| LinkError::NotConnected(agent_id.clone()))?;
        tx.send(event).await.map_err(|e| LinkError::SendFailed(e.to_string()))
    }

    fn is_connected(&self, agent_id: &AgentId) -> bool {
        self.is_live(agent_id)
    }
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
