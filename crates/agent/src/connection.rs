// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Controller transport: a reconnecting WebSocket client.
//!
//! On every (re)connect the agent registers under its agent id (that is how
//! it joins its room on the controller), then services frames until the
//! stream drops. Reconnect backoff starts at 2 s and grows ×1.2 up to 10 s.
//! Heartbeats go out every 30 s while connected.

use crate::handlers::AgentHandlers;
use dx_core::AgentId;
use dx_shell::{ShellOutput, ShellSupervisor};
use dx_wire::{ProtocolError, WireEvent};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

const RECONNECT_INITIAL: Duration = Duration::from_secs(2);
const RECONNECT_FACTOR: f64 = 1.2;
const RECONNECT_MAX: Duration = Duration::from_secs(10);
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("websocket error: {0}")]
    Ws(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

/// Registration identity sent on every connect.
#[derive(Debug, Clone)]
pub struct AgentIdentity {
    pub agent_id: AgentId,
    pub machine_id: String,
    pub device_name: String,
    pub ip_address: String,
    pub os: String,
    pub shells: Vec<String>,
    pub system_info: serde_json::Value,
}

impl AgentIdentity {
    fn register_event(&self) -> WireEvent {
        WireEvent::AgentRegister {
            agent_id: self.agent_id.clone(),
            machine_id: self.machine_id.clone(),
            device_name: self.device_name.clone(),
            ip_address: self.ip_address.clone(),
            os: self.os.clone(),
            shells: self.shells.clone(),
            system_info: self.system_info.clone(),
        }
    }
}

/// The agent's connection loop to the controller.
pub struct Connection {
    server_url: String,
    identity: AgentIdentity,
    handlers: AgentHandlers,
    supervisor: Arc<ShellSupervisor>,
    outgoing_rx: mpsc::Receiver<WireEvent>,
    output_rx: mpsc::Receiver<ShellOutput>,
}

impl Connection {
    pub fn new(
        server_url: String,
        identity: AgentIdentity,
        handlers: AgentHandlers,
        supervisor: Arc<ShellSupervisor>,
        outgoing_rx: mpsc::Receiver<WireEvent>,
        output_rx: mpsc::Receiver<ShellOutput>,
    ) -> Self {
        Self { server_url, identity, handlers, supervisor, outgoing_rx, output_rx }
    }

    /// Run until the shutdown token fires, reconnecting on every drop.
    pub async fn run(mut self, shutdown: CancellationToken) {
        let mut backoff = RECONNECT_INITIAL;

        loop {
            if shutdown.is_cancelled() {
                break;
            }

            match tokio_tungstenite::connect_async(self.server_url.as_str()).await {
                Ok((stream, _)) => {
                    tracing::info!(url = %self.server_url, agent_id = %self.identity.agent_id, "connected to controller");
                    backoff = RECONNECT_INITIAL;
                    self.serve(stream, &shutdown).await;
                    // Sessions are owned by one controller binding; a
                    // dropped transport tears them down.
                    self.supervisor.stop_all().await;
                    if shutdown.is_cancelled() {
                        break;
                    }
                    tracing::warn!("controller connection lost");
                }
                Err(e) => {
                    tracing::warn!(url = %self.server_url, %e, "connect failed");
                }
            }

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(backoff) => {}
            }
            backoff = next_backoff(backoff);
        }
    }

    /// Service one live connection until it drops or shutdown fires.
    async fn serve(
        &mut self,
        stream: tokio_tungstenite::WebSocketStream<
            tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
        >,
        shutdown: &CancellationToken,
    ) {
        let (mut sink, mut source) = stream.split();

        // Joining the room: register immediately on connect.
        if let Err(e) = send_event(&mut sink, self.identity.register_event()).await {
            tracing::warn!(%e, "failed to send registration");
            return;
        }

        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    let _ = sink.send(Message::Close(None)).await;
                    return;
                }
                _ = heartbeat.tick() => {
                    let beat = WireEvent::AgentHeartbeat {
                        agent_id: self.identity.agent_id.clone(),
                    };
                    if send_event(&mut sink, beat).await.is_err() {
                        return;
                    }
                }
                outgoing = self.outgoing_rx.recv() => {
                    let Some(event) = outgoing else { return };
                    if send_event(&mut sink, event).await.is_err() {
                        return;
                    }
                }
                output = self.output_rx.recv() => {
                    let Some(out) = output else { return };
                    let event = WireEvent::CommandOutput {
                        session_id: out.session_id,
                        output: out.chunk,
                    };
                    if send_event(&mut sink, event).await.is_err() {
                        return;
                    }
                }
                incoming = source.next() => {
                    match incoming {
                        Some(Ok(Message::Text(text))) => {
                            match WireEvent::decode(text.as_str()) {
                                Ok(event) => self.handlers.handle(event).await,
                                Err(e) => {
                                    tracing::warn!(%e, "dropping malformed frame");
                                }
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => return,
                        Some(Ok(_)) => {} // Ping/Pong/Binary
                        Some(Err(e)) => {
                            tracing::warn!(%e, "websocket read error");
                            return;
                        }
                    }
                }
            }
        }
    }
}

type WsSink = futures_util::stream::SplitSink<
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
    Message,
>;

async fn send_event(sink: &mut WsSink, event: WireEvent) -> Result<(), ConnectionError> {
    let text = event.encode()?;
    sink.send(Message::text(text)).await?;
    Ok(())
}

fn next_backoff(current: Duration) -> Duration {
    let scaled = current.mul_f64(RECONNECT_FACTOR);
    if scaled > RECONNECT_MAX {
        RECONNECT_MAX
    } else {
        scaled
    }
}

#[cfg(test)]
#[path = "connection_tests.rs"]
mod tests;
