// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use dx_core::SessionId;
use thiserror::Error;

/// Errors from shell session management.
#[derive(Debug, Error)]
pub enum ShellError {
    #[error("shell not detected on this host: {0}")]
    UnknownShell(String),
    #[error("session not found: {0}")]
    SessionNotFound(SessionId),
    #[error("failed to spawn {shell}: {source}")]
    SpawnFailed {
        shell: String,
        #[source]
        source: std::io::Error,
    },
    #[error("shell exited immediately with code {code:?}")]
    DiedOnStartup { code: Option<i32> },
    #[error("session stdin closed")]
    StdinClosed,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
