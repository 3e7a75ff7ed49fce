// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Machine identity: a stable machine id from OS-provided identifiers, and
//! the short agent id hashed from it.

use sha2::{Digest, Sha256};

/// A stable identifier for this machine.
///
/// Linux: `/etc/machine-id` → `/var/lib/dbus/machine-id` → DMI product UUID.
/// Elsewhere (and as the last resort): a hash of hostname, OS, and
/// architecture.
pub fn machine_id() -> String {
    #[cfg(target_os = "linux")]
    {
        for path in ["/etc/machine-id", "/var/lib/dbus/machine-id"] {
            if let Ok(contents) = std::fs::read_to_string(path) {
                let id = contents.trim();
                if id.len() >= 32 {
                    return id.to_string();
                }
            }
        }
        if let Ok(uuid) = std::fs::read_to_string("/sys/class/dmi/id/product_uuid") {
            let uuid = uuid.trim();
            if !uuid.is_empty() {
                return uuid.to_lowercase();
            }
        }
    }
    fallback_machine_id()
}

fn fallback_machine_id() -> String {
    let host = hostname();
    let seed = format!("{host}-{}-{}", std::env::consts::OS, std::env::consts::ARCH);
    let digest = Sha256::digest(seed.as_bytes());
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

/// Agent id derived from the machine id: `agent_` + first 8 hex chars of
/// SHA-256(machine id).
pub fn agent_id_for(machine_id: &str) -> String {
    let digest = Sha256::digest(machine_id.as_bytes());
    let hex: String = digest.iter().take(4).map(|b| format!("{b:02x}")).collect();
    format!("agent_{hex}")
}

pub fn hostname() -> String {
    std::fs::read_to_string("/etc/hostname")
        .map(|s| s.trim().to_string())
        .ok()
        .filter(|s| !s.is_empty())
        .or_else(|| std::env::var("HOSTNAME").ok())
        .unwrap_or_else(|| "unknown-host".to_string())
}

/// Best-effort outbound IP: the local address of a UDP socket "connected"
/// to a public resolver (no packets are sent).
pub fn local_ip() -> String {
    std::net::UdpSocket::bind("0.0.0.0:0")
        .and_then(|sock| {
            sock.connect("8.8.8.8:80")?;
            sock.local_addr()
        })
        .map(|addr| addr.ip().to_string())
        .unwrap_or_else(|_| "0.0.0.0".to_string())
}

/// System descriptors included in the registration payload.
pub fn system_info(machine_id: &str) -> serde_json::Value {
    serde_json::json!({
        "hostname": hostname(),
        "os": std::env::consts::OS,
        "architecture": std::env::consts::ARCH,
        "machine_id": machine_id,
        "ip_address": local_ip(),
    })
}

#[cfg(test)]
#[path = "machine_tests.rs"]
mod tests;
