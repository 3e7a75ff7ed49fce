// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Local activation state.
//!
//! The agent refuses to process deployment commands until activated. State
//! lives at `~/.deployx/activation.json`; the `DEPLOYX_ACTIVATION_KEY`
//! environment variable activates without a stored file (the key lifecycle
//! itself is handled server-side, outside this agent).

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub const ACTIVATION_KEY_ENV: &str = "DEPLOYX_ACTIVATION_KEY";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActivationState {
    #[serde(default)]
    pub machine_id: String,
    #[serde(default)]
    pub agent_id: String,
    #[serde(default)]
    pub activated: bool,
    #[serde(default)]
    pub expires_at: Option<String>,
    /// Masked key kept for reference only (first and last four characters).
    #[serde(default)]
    pub activation_key: Option<String>,
}

/// `~/.deployx/activation.json`
pub fn activation_path() -> Option<PathBuf> {
    Some(dirs::home_dir()?.join(".deployx").join("activation.json"))
}

pub fn load() -> ActivationState {
    let Some(path) = activation_path() else {
        return ActivationState::default();
    };
    match std::fs::read_to_string(&path) {
        Ok(text) => serde_json::from_str(&text).unwrap_or_default(),
        Err(_) => ActivationState::default(),
    }
}

pub fn save(state: &ActivationState) -> std::io::Result<()> {
    let Some(path) = activation_path() else {
        return Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "no home directory for activation state",
        ));
    };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(state)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    std::fs::write(&path, json)
}

/// Record a successful activation, masking the key.
pub fn save_activation(
    machine_id: &str,
    agent_id: &str,
    expires_at: Option<String>,
    key: &str,
) -> std::io::Result<()> {
    save(&ActivationState {
        machine_id: machine_id.to_string(),
        agent_id: agent_id.to_string(),
        activated: true,
        expires_at,
        activation_key: mask_key(key),
    })
}

fn mask_key(key: &str) -> Option<String> {
    if key.len() < 8 || !key.is_ascii() {
        return None;
    }
    Some(format!("{}****{}", &key[..4], &key[key.len() - 4..]))
}

/// Whether this agent may process deployment commands.
///
/// True when `DEPLOYX_ACTIVATION_KEY` is set, or the stored activation
/// matches this machine.
pub fn is_activated(machine_id: &str) -> bool {
    if std::env::var(ACTIVATION_KEY_ENV).map(|v| !v.is_empty()).unwrap_or(false) {
        return true;
    }
    let state = load();
    state.activated && state.machine_id == machine_id
}

#[cfg(test)]
#[path = "activation_tests.rs"]
mod tests;
