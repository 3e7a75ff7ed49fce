// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::AgentHandlers;
use crate::executor::DeploymentExecutor;
use dx_core::{CommandId, SessionId};
use dx_shell::ShellSupervisor;
use dx_snapshot::SnapshotStore;
use dx_wire::WireEvent;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

struct Fixture {
    handlers: AgentHandlers,
    outgoing: mpsc::Receiver<WireEvent>,
    _snap_dir: tempfile::TempDir,
}

fn fixture(activated: bool) -> Fixture {
    let snap_dir = tempfile::tempdir().unwrap();
    let (shell_tx, mut shell_rx) = mpsc::channel(256);
    tokio::spawn(async move { while shell_rx.recv().await.is_some() {} });

    let supervisor = Arc::new(ShellSupervisor::new(shell_tx));
    let store = Arc::new(SnapshotStore::open(snap_dir.path()).unwrap());
    let executor = Arc::new(DeploymentExecutor::new(Arc::clone(&supervisor), store, false));

    let (out_tx, out_rx) = mpsc::channel(64);
    let handlers = AgentHandlers::new(supervisor, executor, out_tx, activated);
    Fixture { handlers, outgoing: out_rx, _snap_dir: snap_dir }
}

async fn next_event(rx: &mut mpsc::Receiver<WireEvent>, timeout: Duration) -> WireEvent {
    tokio::time::timeout(timeout, rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("channel closed")
}

#[tokio::test]
async fn deployment_command_is_refused_until_activated() {
    let mut fx = fixture(false);
    fx.handlers
        .handle(WireEvent::ExecuteDeploymentCommand {
            command_id: CommandId::from_string("cmd-1"),
            command: "echo hi".to_string(),
            shell: "sh".to_string(),
            execution_id: None,
            group_execution: false,
        })
        .await;

    match next_event(&mut fx.outgoing, Duration::from_secs(2)).await {
        WireEvent::Error { message } => assert!(message.contains("not activated")),
        other => panic!("expected error event, got {other:?}"),
    }
}

#[tokio::test]
async fn missing_session_id_is_a_validation_error() {
    let mut fx = fixture(true);
    fx.handlers
        .handle(WireEvent::StartShellRequest {
            shell: "sh".to_string(),
            session_id: SessionId::from_string(""),
        })
        .await;

    assert!(matches!(
        next_event(&mut fx.outgoing, Duration::from_secs(2)).await,
        WireEvent::Error { .. }
    ));
}

#[tokio::test]
#[cfg(unix)]
#[serial_test::serial]
async fn start_and_stop_shell_emit_their_events() {
    let mut fx = fixture(true);
    let sid = SessionId::from_string("hnd-1");

    fx.handlers
        .handle(WireEvent::StartShellRequest { shell: "sh".to_string(), session_id: sid.clone() })
        .await;
    match next_event(&mut fx.outgoing, Duration::from_secs(5)).await {
        WireEvent::ShellStarted { shell, session_id } => {
            assert_eq!(shell, "sh");
            assert_eq!(session_id, sid);
        }
        other => panic!("expected shell_started, got {other:?}"),
    }

    fx.handlers.handle(WireEvent::StopShellRequest { session_id: sid.clone() }).await;
    match next_event(&mut fx.outgoing, Duration::from_secs(10)).await {
        WireEvent::ShellStopped { session_id } => assert_eq!(session_id, sid),
        other => panic!("expected shell_stopped, got {other:?}"),
    }
}

#[tokio::test]
#[cfg(unix)]
#[serial_test::serial]
async fn deployment_command_ends_with_exactly_one_completion() {
    let mut fx = fixture(true);
    fx.handlers
        .handle(WireEvent::ExecuteDeploymentCommand {
            command_id: CommandId::from_string("cmd-done"),
            command: "echo handled_$((5*5))".to_string(),
            shell: "sh".to_string(),
            execution_id: None,
            group_execution: true,
        })
        .await;

    match next_event(&mut fx.outgoing, Duration::from_secs(15)).await {
        WireEvent::DeploymentCommandCompleted { command_id, success, output, .. } => {
            assert_eq!(command_id, CommandId::from_string("cmd-done"));
            assert!(success, "output: {output:?}");
            assert!(output.contains("handled_25"));
        }
        other => panic!("expected completion, got {other:?}"),
    }

    // No second terminal event for the same command
    assert!(
        tokio::time::timeout(Duration::from_millis(500), fx.outgoing.recv()).await.is_err(),
        "only one terminal event per command"
    );
}

#[tokio::test]
async fn receive_file_writes_and_reports() {
    let mut fx = fixture(true);
    let target = tempfile::tempdir().unwrap();
    let payload = base64::Engine::encode(
        &base64::engine::general_purpose::STANDARD,
        b"config-contents",
    );

    fx.handlers
        .handle(WireEvent::ReceiveFile {
            deployment_id: 11,
            file_id: 3,
            filename: "app.conf".to_string(),
            file_data_b64: payload,
            target_path: target.path().join("drop").display().to_string(),
            create_path_if_not_exists: true,
        })
        .await;

    match next_event(&mut fx.outgoing, Duration::from_secs(5)).await {
        WireEvent::FileTransferResult { success, path_created, file_path, .. } => {
            assert!(success);
            assert!(path_created);
            let written = file_path.expect("file path reported");
            assert_eq!(std::fs::read_to_string(written).unwrap(), "config-contents");
        }
        other => panic!("expected file_transfer_result, got {other:?}"),
    }
}

#[tokio::test]
async fn install_software_reports_a_terminal_status() {
    let mut fx = fixture(true);
    fx.handlers
        .handle(WireEvent::InstallSoftware {
            deployment_id: 9,
            device_id: 4,
            software_list: vec![serde_json::json!({"name": "htop"})],
        })
        .await;

    match next_event(&mut fx.outgoing, Duration::from_secs(2)).await {
        WireEvent::SoftwareInstallationStatus { deployment_id, status, error, .. } => {
            assert_eq!(deployment_id, 9);
            assert_eq!(status, "failed");
            assert!(error.is_some());
        }
        other => panic!("expected software_installation_status, got {other:?}"),
    }
}
