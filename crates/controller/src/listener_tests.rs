// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::{run, ListenerCtx};
use crate::deploy::DeploymentDispatcher;
use crate::group::{DeviceTarget, GroupCommandExecutor};
use crate::queue::CommandQueue;
use crate::registry::ConnectionRegistry;
use dx_core::{AgentId, GroupStatus, SessionId, SystemClock};
use dx_wire::WireEvent;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct Harness {
    addr: std::net::SocketAddr,
    ctx: Arc<ListenerCtx<SystemClock>>,
    token: CancellationToken,
    _dir: tempfile::TempDir,
}

async fn harness() -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let registry = Arc::new(ConnectionRegistry::new(SystemClock));
    let queue = Arc::new(CommandQueue::open(dir.path().join("queue.json")).unwrap());
    let executor = Arc::new(GroupCommandExecutor::new(
        Arc::clone(&registry) as Arc<dyn crate::link::AgentLink>,
        Arc::clone(&queue),
        SystemClock,
    ));
    let deployments = Arc::new(DeploymentDispatcher::new(
        Arc::clone(&registry) as Arc<dyn crate::link::AgentLink>,
    ));
    let ctx = Arc::new(ListenerCtx {
        registry,
        executor,
        queue,
        deployments,
        allowed_origins: Vec::new(),
    });

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let token = CancellationToken::new();
    tokio::spawn(run(listener, Arc::clone(&ctx), token.clone()));
    Harness { addr, ctx, token, _dir: dir }
}

async fn connect(addr: std::net::SocketAddr) -> Client {
    let (ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws"))
        .await
        .expect("client connect");
    ws
}

async fn send(ws: &mut Client, event: WireEvent) {
    ws.send(Message::text(event.encode().unwrap())).await.unwrap();
}

async fn recv_event(ws: &mut Client, timeout: Duration) -> WireEvent {
    loop {
        let message = tokio::time::timeout(timeout, ws.next())
            .await
            .expect("timed out waiting for event")
            .expect("stream ended")
            .expect("websocket error");
        match message {
            Message::Text(text) => return WireEvent::decode(text.as_str()).unwrap(),
            _ => continue,
        }
    }
}

fn register_event(agent_id: &str) -> WireEvent {
    WireEvent::AgentRegister {
        agent_id: AgentId::from_string(agent_id),
        machine_id: format!("machine-{agent_id}"),
        device_name: "itest".to_string(),
        ip_address: "127.0.0.1".to_string(),
        os: "linux".to_string(),
        shells: vec!["sh".to_string()],
        system_info: serde_json::Value::Null,
    }
}

async fn wait_until(mut check: impl FnMut() -> bool, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    false
}

#[tokio::test]
async fn agent_registration_and_group_command_round_trip() {
    let harness = harness().await;
    let agent_id = AgentId::from_string("agent_t1");

    let mut agent = connect(harness.addr).await;
    send(&mut agent, register_event("agent_t1")).await;

    let registry = Arc::clone(&harness.ctx.registry);
    let id = agent_id.clone();
    assert!(
        wait_until(move || registry.is_live(&id), Duration::from_secs(5)).await,
        "agent should be live after registering"
    );

    // Fan a command out to the registered agent
    let devices = [DeviceTarget { device_id: 1, agent_id: agent_id.clone(), device_name: None }];
    let execution_id = harness
        .ctx
        .executor
        .execute_group_command(1, "itest", &devices, "uptime", "sh", "transactional")
        .await
        .unwrap();

    // The agent sees the dispatch and completes it
    let event = recv_event(&mut agent, Duration::from_secs(5)).await;
    let command_id = match event {
        WireEvent::ExecuteDeploymentCommand { command_id, command, group_execution, .. } => {
            assert_eq!(command, "uptime");
            assert!(group_execution);
            command_id
        }
        other => panic!("expected dispatch, got {other:?}"),
    };
    send(
        &mut agent,
        WireEvent::DeploymentCommandCompleted {
            command_id,
            success: true,
            output: "up 1 day\n".to_string(),
            error: None,
            snapshot_id: None,
        },
    )
    .await;

    let executor = Arc::clone(&harness.ctx.executor);
    let exec_id = execution_id.clone();
    assert!(
        wait_until(
            move || {
                executor
                    .execution(&exec_id)
                    .map(|e| e.status == GroupStatus::Completed)
                    .unwrap_or(false)
            },
            Duration::from_secs(5),
        )
        .await,
        "completion event must finish the execution"
    );

    harness.token.cancel();
}

#[tokio::test]
async fn operator_attachment_forwards_control_and_output() {
    let harness = harness().await;
    let agent_id = AgentId::from_string("agent_t2");

    let mut agent = connect(harness.addr).await;
    send(&mut agent, register_event("agent_t2")).await;

    let registry = Arc::clone(&harness.ctx.registry);
    let id = agent_id.clone();
    assert!(wait_until(move || registry.is_live(&id), Duration::from_secs(5)).await);

    let mut operator = connect(harness.addr).await;
    send(&mut operator, WireEvent::FrontendAttach { agent_id: agent_id.clone() }).await;
    let registry = Arc::clone(&harness.ctx.registry);
    let id = agent_id.clone();
    assert!(
        wait_until(move || registry.frontend_for(&id).is_some(), Duration::from_secs(5)).await
    );

    // Operator opens a shell on the attached agent
    send(
        &mut operator,
        WireEvent::StartShellRequest {
            shell: "sh".to_string(),
            session_id: SessionId::from_string("op-sess"),
        },
    )
    .await;
    match recv_event(&mut agent, Duration::from_secs(5)).await {
        WireEvent::StartShellRequest { shell, session_id } => {
            assert_eq!(shell, "sh");
            assert_eq!(session_id, SessionId::from_string("op-sess"));
        }
        other => panic!("agent expected start_shell_request, got {other:?}"),
    }

    // The agent's shell stream is echoed to the attached operator
    send(
        &mut agent,
        WireEvent::CommandOutput {
            session_id: SessionId::from_string("op-sess"),
            output: "$ ".to_string(),
        },
    )
    .await;
    match recv_event(&mut operator, Duration::from_secs(5)).await {
        WireEvent::CommandOutput { output, .. } => assert_eq!(output, "$ "),
        other => panic!("operator expected command_output, got {other:?}"),
    }

    harness.token.cancel();
}

#[tokio::test]
async fn unattached_operator_control_events_are_refused() {
    let harness = harness().await;
    let mut operator = connect(harness.addr).await;

    send(
        &mut operator,
        WireEvent::CommandInput {
            session_id: SessionId::from_string("nope"),
            command: "ls".to_string(),
        },
    )
    .await;
    match recv_event(&mut operator, Duration::from_secs(5)).await {
        WireEvent::Error { message } => assert!(message.contains("not attached")),
        other => panic!("expected error, got {other:?}"),
    }

    harness.token.cancel();
}

#[tokio::test]
async fn disconnect_surfaces_device_status_changed() {
    let harness = harness().await;
    let agent_id = AgentId::from_string("agent_t3");

    let mut agent = connect(harness.addr).await;
    send(&mut agent, register_event("agent_t3")).await;
    let registry = Arc::clone(&harness.ctx.registry);
    let id = agent_id.clone();
    assert!(wait_until(move || registry.is_live(&id), Duration::from_secs(5)).await);

    let mut operator = connect(harness.addr).await;
    send(&mut operator, WireEvent::FrontendAttach { agent_id: agent_id.clone() }).await;
    let registry = Arc::clone(&harness.ctx.registry);
    let id = agent_id.clone();
    assert!(
        wait_until(move || registry.frontend_for(&id).is_some(), Duration::from_secs(5)).await
    );

    drop(agent);

    match recv_event(&mut operator, Duration::from_secs(5)).await {
        WireEvent::DeviceStatusChanged { agent_id: changed, status } => {
            assert_eq!(changed, agent_id);
            assert_eq!(status, "offline");
        }
        other => panic!("expected device_status_changed, got {other:?}"),
    }
    assert!(!harness.ctx.registry.is_live(&agent_id));

    harness.token.cancel();
}
