// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shell detection: probe a per-OS candidate list through `PATH`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[cfg(target_os = "windows")]
const CANDIDATES: &[&str] = &["cmd", "powershell", "pwsh", "bash"];
#[cfg(target_os = "macos")]
const CANDIDATES: &[&str] = &["bash", "zsh", "sh", "ksh", "tcsh", "fish"];
#[cfg(not(any(target_os = "windows", target_os = "macos")))]
const CANDIDATES: &[&str] = &["bash", "zsh", "sh", "fish", "ksh", "tcsh"];

#[cfg(target_os = "windows")]
const FALLBACK: &str = "cmd";
#[cfg(not(target_os = "windows"))]
const FALLBACK: &str = "sh";

/// Detect available shells and their executable paths.
///
/// Probes the known per-OS list through `PATH`; if none resolve, falls back
/// to the platform default so the agent always advertises at least one shell
/// when one exists.
pub fn detect_shells() -> BTreeMap<String, PathBuf> {
    let mut shells = BTreeMap::new();

    for name in CANDIDATES {
        if let Some(path) = which(name) {
            shells.insert((*name).to_string(), path);
        }
    }

    if shells.is_empty() {
        match which(FALLBACK) {
            Some(path) => {
                tracing::warn!(shell = FALLBACK, "no preferred shells found, using fallback");
                shells.insert(FALLBACK.to_string(), path);
            }
            None => tracing::error!("no shells available on this host"),
        }
    }

    shells
}

/// Resolve an executable name through `PATH`.
fn which(name: &str) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    for dir in std::env::split_paths(&path_var) {
        let candidate = dir.join(name);
        if is_executable(&candidate) {
            return Some(candidate);
        }
        #[cfg(target_os = "windows")]
        {
            let exe = dir.join(format!("{name}.exe"));
            if is_executable(&exe) {
                return Some(exe);
            }
        }
    }
    None
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata().map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0).unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

#[cfg(test)]
#[path = "detect_tests.rs"]
mod tests;
