// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Centralized environment variable access for the controller.

use std::path::PathBuf;

/// Resolve state directory: DX_STATE_DIR > XDG_STATE_HOME/deployx >
/// ~/.local/state/deployx
pub fn state_dir() -> Option<PathBuf> {
    if let Ok(dir) = std::env::var("DX_STATE_DIR") {
        return Some(PathBuf::from(dir));
    }
    if let Ok(xdg) = std::env::var("XDG_STATE_HOME") {
        return Some(PathBuf::from(xdg).join("deployx"));
    }
    dirs::home_dir().map(|home| home.join(".local/state/deployx"))
}

/// Listen address for agent and operator WebSocket sessions.
pub fn bind_addr() -> String {
    std::env::var("DX_BIND").unwrap_or_else(|_| "127.0.0.1:8787".to_string())
}

/// Database connection string, consumed by the device/auth subsystems.
pub fn db_url() -> Option<String> {
    std::env::var("DB_URL").ok().filter(|s| !s.is_empty())
}

/// Browser origins accepted for operator sessions. `ENVIRONMENT=development`
/// switches to the dev frontend origin.
pub fn allowed_origins() -> Vec<String> {
    let environment =
        std::env::var("ENVIRONMENT").unwrap_or_else(|_| "production".to_string());
    if environment.eq_ignore_ascii_case("development") {
        let dev = std::env::var("DEV_FRONTEND_URL")
            .unwrap_or_else(|_| "http://localhost:5173".to_string());
        vec![dev]
    } else {
        std::env::var("FRONTEND_URL").into_iter().filter(|s| !s.is_empty()).collect()
    }
}
