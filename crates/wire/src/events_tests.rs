// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::WireEvent;
use dx_core::{AgentId, CommandId, SessionId, SnapshotId};

#[test]
fn event_names_match_the_wire_protocol() {
    let event = WireEvent::ExecuteDeploymentCommand {
        command_id: CommandId::from_string("cmd-1"),
        command: "mkdir /tmp/a".to_string(),
        shell: "bash".to_string(),
        execution_id: None,
        group_execution: true,
    };
    assert_eq!(event.event_name(), "execute_deployment_command");

    let frame = event.into_frame().unwrap();
    assert_eq!(frame.event, "execute_deployment_command");
    assert_eq!(frame.data["command_id"], "cmd-1");
    assert_eq!(frame.data["group_execution"], true);
}

#[test]
fn register_frame_decodes_as_sent_by_agents() {
    let text = r#"{
        "event": "agent_register",
        "data": {
            "agent_id": "agent_ab12cd34",
            "machine_id": "4c4c4544-004d-3510",
            "device_name": "build-07",
            "ip_address": "10.0.4.17",
            "os": "Linux",
            "shells": ["bash", "sh"],
            "system_info": {"architecture": "x86_64"}
        }
    }"#;

    let event = WireEvent::decode(text).unwrap();
    match event {
        WireEvent::AgentRegister { agent_id, shells, system_info, .. } => {
            assert_eq!(agent_id, AgentId::from_string("agent_ab12cd34"));
            assert_eq!(shells, vec!["bash", "sh"]);
            assert_eq!(system_info["architecture"], "x86_64");
        }
        other => panic!("wrong event: {other:?}"),
    }
}

#[test]
fn completion_event_round_trips_optional_fields() {
    let event = WireEvent::DeploymentCommandCompleted {
        command_id: CommandId::from_string("cmd-9"),
        success: false,
        output: "rm: cannot remove '/tmp/x': Permission denied\n".to_string(),
        error: Some("Permission denied".to_string()),
        snapshot_id: Some(SnapshotId::from_string("0123456789abcdef")),
    };

    let text = event.clone().encode().unwrap();
    let back = WireEvent::decode(&text).unwrap();
    assert_eq!(back, event);
}

#[test]
fn missing_optional_fields_default() {
    let text = r#"{"event":"deployment_command_completed","data":{
        "command_id":"cmd-2","success":true,"output":"done"}}"#;
    let event = WireEvent::decode(text).unwrap();
    match event {
        WireEvent::DeploymentCommandCompleted { error, snapshot_id, .. } => {
            assert_eq!(error, None);
            assert_eq!(snapshot_id, None);
        }
        other => panic!("wrong event: {other:?}"),
    }
}

#[test]
fn control_character_input_survives_encoding() {
    let event = WireEvent::CommandInput {
        session_id: SessionId::from_string("sess1"),
        command: "\u{0003}".to_string(),
    };
    let text = event.clone().encode().unwrap();
    assert_eq!(WireEvent::decode(&text).unwrap(), event);
}

#[yare::parameterized(
    heartbeat = { r#"{"event":"agent_heartbeat","data":{"agent_id":"agent_1"}}"#, "agent_heartbeat" },
    rollback  = { r#"{"event":"rollback_command","data":{"snapshot_id":"abcd"}}"#, "rollback_command" },
    attach    = { r#"{"event":"frontend_attach","data":{"agent_id":"agent_1"}}"#, "frontend_attach" },
)]
fn decode_reports_consistent_names(text: &str, expected: &str) {
    let event = WireEvent::decode(text).unwrap();
    assert_eq!(event.event_name(), expected);
}
