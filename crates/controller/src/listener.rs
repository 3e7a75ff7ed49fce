// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! WebSocket accept loop and per-connection frame routing.
//!
//! A connection becomes an agent session when its first meaningful frame is
//! `agent_register`, or an operator session when it sends `frontend_attach`.
//! Agent events flow into the registry, the queue, and the group executor;
//! shell streams are echoed to the operator session attached to the agent.
//! Operator-sent control events are forwarded into the attached agent's
//! room.

use crate::deploy::DeploymentDispatcher;
use crate::group::GroupCommandExecutor;
use crate::queue::CommandQueue;
use crate::registry::{ConnId, ConnectionRegistry, Registration};
use dx_core::Clock;
use dx_wire::WireEvent;
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

/// Outbound channel depth per connection.
const SESSION_CHANNEL_CAPACITY: usize = 256;

static NEXT_CONN_ID: AtomicU64 = AtomicU64::new(1);

/// Shared controller context handed to every connection task.
pub struct ListenerCtx<C: Clock> {
    pub registry: Arc<ConnectionRegistry<C>>,
    pub executor: Arc<GroupCommandExecutor<C>>,
    pub queue: Arc<CommandQueue>,
    pub deployments: Arc<DeploymentDispatcher>,
    /// Accepted browser origins; empty means no origin checking.
    pub allowed_origins: Vec<String>,
}

/// Accept connections until cancelled.
pub async fn run<C: Clock>(
    listener: TcpListener,
    ctx: Arc<ListenerCtx<C>>,
    token: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, _peer)) => {
                        let ctx = Arc::clone(&ctx);
                        tokio::spawn(async move {
                            handle_socket(stream, ctx).await;
                        });
                    }
                    Err(e) => {
                        tracing::warn!(%e, "accept failed");
                    }
                }
            }
        }
    }
}

async fn handle_socket<C: Clock>(stream: TcpStream, ctx: Arc<ListenerCtx<C>>) {
    let origins = ctx.allowed_origins.clone();
    let callback = move |request: &Request, response: Response| {
        check_origin(request, response, &origins)
    };
    let ws = match tokio_tungstenite::accept_hdr_async(stream, callback).await {
        Ok(ws) => ws,
        Err(e) => {
            tracing::debug!(%e, "websocket handshake failed");
            return;
        }
    };

    let conn = NEXT_CONN_ID.fetch_add(1, Ordering::SeqCst);
    let (mut sink, mut source) = ws.split();
    let (tx, mut rx) = mpsc::channel::<WireEvent>(SESSION_CHANNEL_CAPACITY);

    // Writer task: everything routed to this connection goes out here.
    let writer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match event.encode() {
                Ok(text) => {
                    if sink.send(Message::text(text)).await.is_err() {
                        break;
                    }
                }
                Err(e) => tracing::error!(%e, "failed to encode outbound event"),
            }
        }
        let _ = sink.send(Message::Close(None)).await;
    });

    while let Some(message) = source.next().await {
        match message {
            Ok(Message::Text(text)) => {
                let frame = match dx_wire::decode(text.as_str()) {
                    Ok(frame) => frame,
                    Err(e) => {
                        let _ = tx
                            .send(WireEvent::Error { message: format!("malformed frame: {e}") })
                            .await;
                        continue;
                    }
                };
                match WireEvent::from_frame(frame) {
                    Ok(event) => handle_event(conn, event, &tx, &ctx).await,
                    Err(e) => {
                        let _ = tx
                            .send(WireEvent::Error { message: e.to_string() })
                            .await;
                    }
                }
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => {} // Ping/Pong/Binary
            Err(e) => {
                tracing::debug!(conn, %e, "websocket read error");
                break;
            }
        }
    }

    // Connection gone: unbind and surface the offline transition.
    if let Some(status_event) = ctx.registry.remove_session(conn) {
        broadcast_to_frontends(&ctx, status_event).await;
    }
    writer.abort();
}

/// Reject browser connections from unexpected origins. Non-browser clients
/// (agents) send no Origin header and pass through.
fn check_origin(
    request: &Request,
    response: Response,
    allowed: &[String],
) -> Result<Response, ErrorResponse> {
    if allowed.is_empty() {
        return Ok(response);
    }
    let Some(origin) = request.headers().get("origin").and_then(|v| v.to_str().ok()) else {
        return Ok(response);
    };
    if allowed.iter().any(|a| a == origin) {
        Ok(response)
    } else {
        tracing::warn!(origin, "rejecting operator session from unknown origin");
        Err(ErrorResponse::new(Some("origin not allowed".to_string())))
    }
}

async fn handle_event<C: Clock>(
    conn: ConnId,
    event: WireEvent,
    tx: &mpsc::Sender<WireEvent>,
    ctx: &Arc<ListenerCtx<C>>,
) {
    match event {
        // ── Agent lifecycle ────────────────────────────────────────────
        WireEvent::AgentRegister {
            agent_id,
            machine_id,
            device_name,
            ip_address,
            os,
            shells,
            system_info,
        } => {
            ctx.registry.add_agent(
                Registration {
                    agent_id: agent_id.clone(),
                    machine_id,
                    device_name,
                    ip_address,
                    os,
                    shells,
                    system_info,
                },
                conn,
                tx.clone(),
            );
            broadcast_to_frontends(
                ctx,
                WireEvent::DeviceStatusChanged { agent_id, status: "online".to_string() },
            )
            .await;
        }
        WireEvent::AgentHeartbeat { agent_id } => {
            ctx.registry.heartbeat(&agent_id);
        }

        // ── Shell streams: echo to the owning operator session ─────────
        WireEvent::CommandOutput { .. }
        | WireEvent::ShellStarted { .. }
        | WireEvent::ShellStopped { .. } => {
            if let Some(agent_id) = ctx.registry.agent_for_conn(conn) {
                if let Some(frontend) = ctx.registry.frontend_for(&agent_id) {
                    let _ = frontend.send(event).await;
                }
            }
        }

        // ── Command lifecycle ──────────────────────────────────────────
        WireEvent::DeploymentCommandOutput { command_id, output } => {
            ctx.queue.append_output(&command_id, &output);
        }
        WireEvent::DeploymentCommandCompleted {
            command_id,
            success,
            output,
            error,
            snapshot_id,
        } => {
            if let Some(snapshot_id) = snapshot_id {
                ctx.executor.attach_snapshot(&command_id, snapshot_id);
            }
            ctx.executor.handle_command_completion(
                &command_id,
                success,
                &output,
                error.as_deref(),
            );
        }

        // ── Rollback results: surface to the owning operator ───────────
        WireEvent::RollbackResult { .. } | WireEvent::BatchRollbackResult { .. } => {
            if let Some(agent_id) = ctx.registry.agent_for_conn(conn) {
                if let Some(frontend) = ctx.registry.frontend_for(&agent_id) {
                    let _ = frontend.send(event).await;
                }
            }
        }

        // ── Deployment passthrough results ─────────────────────────────
        WireEvent::SoftwareInstallationStatus {
            deployment_id,
            device_id,
            status,
            message,
            error,
            ..
        } => {
            ctx.deployments.record_software_status(
                deployment_id,
                device_id,
                status,
                message,
                error,
            );
        }
        WireEvent::FileTransferResult { deployment_id, success, message, error, .. } => {
            ctx.deployments.record_file_result(deployment_id, success, message, error);
        }

        // ── Operator session management ────────────────────────────────
        WireEvent::FrontendAttach { agent_id } => {
            ctx.registry.map_agent_to_frontend(agent_id, conn, tx.clone());
        }

        // ── Operator → agent control events: forward into the room ─────
        WireEvent::StartShellRequest { .. }
        | WireEvent::StopShellRequest { .. }
        | WireEvent::CommandInput { .. }
        | WireEvent::RollbackCommand { .. }
        | WireEvent::RollbackBatch { .. } => {
            forward_to_attached_agent(conn, event, tx, ctx).await;
        }

        other => {
            let _ = tx
                .send(WireEvent::Error {
                    message: format!("unexpected event: {}", other.event_name()),
                })
                .await;
        }
    }
}

/// Forward an operator control event to the agent the session is attached
/// to; refuse if unattached or the agent is not live.
async fn forward_to_attached_agent<C: Clock>(
    conn: ConnId,
    event: WireEvent,
    tx: &mpsc::Sender<WireEvent>,
    ctx: &Arc<ListenerCtx<C>>,
) {
    let Some(agent_id) = ctx.registry.attachment_for_conn(conn) else {
        let _ = tx
            .send(WireEvent::Error {
                message: "session is not attached to an agent".to_string(),
            })
            .await;
        return;
    };
    use crate::link::AgentLink;
    if let Err(e) = ctx.registry.dispatch(&agent_id, event).await {
        let _ = tx.send(WireEvent::Error { message: e.to_string() }).await;
    }
}

/// Send an upstream notification to every attached operator session.
async fn broadcast_to_frontends<C: Clock>(ctx: &Arc<ListenerCtx<C>>, event: WireEvent) {
    for record in ctx.registry.list_agents() {
        if let Some(frontend) = ctx.registry.frontend_for(&record.agent_id) {
            let _ = frontend.send(event.clone()).await;
        }
    }
}

#[cfg(test)]
#[path = "listener_tests.rs"]
mod tests;
