// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Monitored-path derivation from command text.
//!
//! The working directory is always monitored. Beyond that, the command's
//! tokens decide: creation commands add the parent of each target, directory
//! changes add the target, deletions add the parent of each deletion target.

use std::path::{Path, PathBuf};

const CREATE_KEYWORDS: &[&str] = &["mkdir", "md", "touch", "new-item"];
const CHDIR_KEYWORDS: &[&str] = &["cd", "chdir", "set-location"];
const DELETE_KEYWORDS: &[&str] = &["rm", "del", "remove", "remove-item", "rmdir", "rd"];

/// Paths to monitor for a command executed in `working_dir`.
pub fn monitored_paths(working_dir: &Path, command: &str) -> Vec<PathBuf> {
    let mut paths = vec![working_dir.to_path_buf()];
    let tokens: Vec<&str> = command.split_whitespace().collect();
    let lower: Vec<String> = tokens.iter().map(|t| t.to_lowercase()).collect();

    if lower.iter().any(|t| CREATE_KEYWORDS.contains(&t.as_str())) {
        for token in tokens.iter().skip(1) {
            if token.starts_with('-') || (token.starts_with('/') && token.len() == 2) {
                continue;
            }
            // The target itself is monitored so its pre-command nonexistence
            // is captured and rollback can delete what the command created.
            let target = absolutize(working_dir, token);
            if let Some(parent) = target.parent() {
                push_unique(&mut paths, parent.to_path_buf());
            }
            push_unique(&mut paths, target);
        }
    }

    if lower.first().map(|t| CHDIR_KEYWORDS.contains(&t.as_str())).unwrap_or(false) {
        if let Some(target) = tokens.get(1) {
            push_unique(&mut paths, absolutize(working_dir, target));
        }
    }

    if lower.iter().any(|t| DELETE_KEYWORDS.contains(&t.as_str())) {
        for token in tokens.iter().skip(1) {
            if token.starts_with('-') {
                continue;
            }
            let target = absolutize(working_dir, token);
            if let Some(parent) = target.parent() {
                push_unique(&mut paths, parent.to_path_buf());
            }
        }
    }

    paths
}

fn absolutize(working_dir: &Path, token: &str) -> PathBuf {
    let trimmed = token.trim_matches(['"', '\'']);
    let path = Path::new(trimmed);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        working_dir.join(path)
    }
}

fn push_unique(paths: &mut Vec<PathBuf>, path: PathBuf) {
    if !paths.contains(&path) {
        paths.push(path);
    }
}

#[cfg(test)]
#[path = "paths_tests.rs"]
mod tests;
