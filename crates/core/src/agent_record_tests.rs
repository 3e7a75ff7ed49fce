// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::{AgentRecord, AgentStatus, LIVENESS_WINDOW_MS};
use crate::id::AgentId;

fn record(session: Option<&str>, last_seen_ms: u64) -> AgentRecord {
    AgentRecord {
        agent_id: AgentId::from_string("agent_ab12cd34"),
        machine_id: "4c4c4544-004d-3510-8052-b4c04f4e4d31".to_string(),
        device_name: "build-07".to_string(),
        ip_address: "10.0.4.17".to_string(),
        os: "Linux".to_string(),
        shells: vec!["bash".to_string(), "sh".to_string()],
        system_info: serde_json::Value::Null,
        status: AgentStatus::Online,
        last_seen_ms,
        session: session.map(String::from),
    }
}

#[yare::parameterized(
    fresh_heartbeat  = { Some("sess-1"), 1_000,                       31_000, true  },
    at_window_edge   = { Some("sess-1"), 1_000,  1_000 + LIVENESS_WINDOW_MS, true  },
    stale_heartbeat  = { Some("sess-1"), 1_000,                       40_000, false },
    no_session       = { None,           30_900,                      31_000, false },
)]
fn liveness(session: Option<&str>, last_seen_ms: u64, now_ms: u64, expected: bool) {
    assert_eq!(record(session, last_seen_ms).is_live(now_ms), expected);
}
