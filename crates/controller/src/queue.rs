// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Persistent command queue.
//!
//! A JSON table keyed by command id, written through on every mutation.
//! Load-time validation repairs obvious inconsistencies (a record with a
//! completion time but a non-terminal status is forced to completed). The
//! table file is guarded by an exclusive lock held for the queue's lifetime.

use dx_core::{CommandId, CommandRecord, CommandStatus};
use fs2::FileExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::File;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("queue file is locked by another controller")]
    Locked,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct QueueFile {
    #[serde(default)]
    commands: Vec<CommandRecord>,
    #[serde(default)]
    last_updated: Option<String>,
}

pub struct CommandQueue {
    path: PathBuf,
    _lock: File,
    commands: Mutex<HashMap<CommandId, CommandRecord>>,
}

impl CommandQueue {
    /// Open (or create) the queue table at `path`, repairing inconsistent
    /// records.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, QueueError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let lock_path = path.with_extension("lock");
        let lock = std::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)?;
        lock.try_lock_exclusive().map_err(|_| QueueError::Locked)?;

        let mut commands = HashMap::new();
        let mut repaired = 0usize;
        if path.exists() {
            let text = std::fs::read_to_string(&path)?;
            let file: QueueFile = serde_json::from_str(&text).unwrap_or_default();
            for mut record in file.commands {
                if record.repair() {
                    repaired += 1;
                }
                commands.insert(record.id.clone(), record);
            }
        }

        let queue = Self { path, _lock: lock, commands: Mutex::new(commands) };
        if repaired > 0 {
            tracing::warn!(repaired, "repaired inconsistent command records");
            queue.save()?;
        }
        tracing::info!(count = queue.commands.lock().len(), "command queue loaded");
        Ok(queue)
    }

    fn save(&self) -> Result<(), QueueError> {
        let file = {
            let commands = self.commands.lock();
            QueueFile {
                commands: commands.values().cloned().collect(),
                last_updated: Some(chrono::Utc::now().to_rfc3339()),
            }
        };
        std::fs::write(&self.path, serde_json::to_vec_pretty(&file)?)?;
        Ok(())
    }

    /// Register a command invocation. Returns its id.
    pub fn add(&self, record: CommandRecord) -> CommandId {
        let id = record.id.clone();
        self.commands.lock().insert(id.clone(), record);
        if let Err(e) = self.save() {
            tracing::error!(%e, "failed to persist command queue");
        }
        id
    }

    /// Transition a command's status, appending output and recording errors.
    /// Returns `false` for unknown ids or refused transitions.
    pub fn update_status(
        &self,
        id: &CommandId,
        status: CommandStatus,
        output: Option<&str>,
        error: Option<&str>,
        now_ms: u64,
    ) -> bool {
        let updated = {
            let mut commands = self.commands.lock();
            let Some(record) = commands.get_mut(id.as_str()) else {
                tracing::warn!(command_id = %id, "update for unknown command");
                return false;
            };
            if let Some(output) = output {
                record.output.push_str(output);
            }
            if let Some(error) = error {
                record.error = Some(error.to_string());
            }
            record.transition(status, now_ms)
        };
        if let Err(e) = self.save() {
            tracing::error!(%e, "failed to persist command queue");
        }
        updated
    }

    /// Append streamed output without changing status.
    pub fn append_output(&self, id: &CommandId, output: &str) {
        {
            let mut commands = self.commands.lock();
            let Some(record) = commands.get_mut(id.as_str()) else { return };
            record.output.push_str(output);
        }
        if let Err(e) = self.save() {
            tracing::error!(%e, "failed to persist command queue");
        }
    }

    pub fn get(&self, id: &CommandId) -> Option<CommandRecord> {
        self.commands.lock().get(id.as_str()).cloned()
    }

    pub fn all(&self) -> Vec<CommandRecord> {
        self.commands.lock().values().cloned().collect()
    }

    pub fn by_status(&self, status: CommandStatus) -> Vec<CommandRecord> {
        self.commands.lock().values().filter(|c| c.status == status).cloned().collect()
    }

    /// Pause a running command.
    pub fn pause(&self, id: &CommandId) -> bool {
        let ok = {
            let mut commands = self.commands.lock();
            match commands.get_mut(id.as_str()) {
                Some(record) if record.status == CommandStatus::Running => {
                    record.status = CommandStatus::Paused;
                    true
                }
                _ => false,
            }
        };
        if ok {
            let _ = self.save();
        }
        ok
    }

    /// Resume a paused command back to pending.
    pub fn resume(&self, id: &CommandId) -> bool {
        let ok = {
            let mut commands = self.commands.lock();
            match commands.get_mut(id.as_str()) {
                Some(record) if record.status == CommandStatus::Paused => {
                    record.status = CommandStatus::Pending;
                    true
                }
                _ => false,
            }
        };
        if ok {
            let _ = self.save();
        }
        ok
    }

    pub fn delete(&self, id: &CommandId) -> bool {
        let removed = self.commands.lock().remove(id.as_str()).is_some();
        if removed {
            let _ = self.save();
        }
        removed
    }

    /// Drop all terminal records. Returns how many were cleared.
    pub fn clear_completed(&self) -> usize {
        let cleared = {
            let mut commands = self.commands.lock();
            let before = commands.len();
            commands.retain(|_, record| !record.status.is_terminal());
            before - commands.len()
        };
        if cleared > 0 {
            let _ = self.save();
        }
        cleared
    }

    /// Counts per status plus a total.
    pub fn stats(&self) -> HashMap<String, usize> {
        let commands = self.commands.lock();
        let mut stats: HashMap<String, usize> = HashMap::new();
        for record in commands.values() {
            let key = match record.status {
                CommandStatus::Pending => "pending",
                CommandStatus::Running => "running",
                CommandStatus::Completed => "completed",
                CommandStatus::Failed => "failed",
                CommandStatus::Paused => "paused",
            };
            *stats.entry(key.to_string()).or_default() += 1;
        }
        stats.insert("total".to_string(), commands.len());
        stats
    }
}

#[cfg(test)]
#[path = "queue_tests.rs"]
mod tests;
