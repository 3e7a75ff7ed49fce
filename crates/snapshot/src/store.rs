// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Snapshot capture, restoration, and housekeeping.
//!
//! On-disk layout under the store root:
//!
//! ```text
//! <root>/<snapshot_id>.json              metadata
//! <root>/<snapshot_id>/files/<basename>  backup bytes (numeric suffix on collision)
//! ```
//!
//! Ordering invariants: backup bytes are written before metadata, and
//! metadata is deleted before backup bytes, so persisted metadata always
//! references existing backups.

use crate::error::SnapshotError;
use crate::paths::monitored_paths;
use chrono::Utc;
use dx_core::{BatchId, SnapshotId};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Snapshots older than this are garbage-collected.
pub const DEFAULT_MAX_AGE_HOURS: u64 = 24;

/// How often the GC task runs.
pub const DEFAULT_CLEANUP_INTERVAL_HOURS: u64 = 1;

/// Captured state of one file or directory entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileSnapshot {
    pub path: PathBuf,
    pub exists: bool,
    pub is_dir: bool,
    #[serde(default)]
    pub content_hash: Option<String>,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub modified_time: Option<i64>,
    #[serde(default)]
    pub permissions: Option<u32>,
    #[serde(default)]
    pub backup_path: Option<PathBuf>,
}

/// Pre-execution capture of every monitored path for one command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub snapshot_id: SnapshotId,
    /// Unix seconds at capture time.
    pub timestamp: i64,
    /// ISO-8601 audit timestamp.
    pub created_at: chrono::DateTime<Utc>,
    pub command: String,
    #[serde(default)]
    pub command_index: Option<usize>,
    #[serde(default)]
    pub batch_id: Option<BatchId>,
    pub working_directory: PathBuf,
    pub monitored_paths: Vec<PathBuf>,
    pub file_snapshots: Vec<FileSnapshot>,
    pub environment_vars: BTreeMap<String, String>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// Parameters for [`SnapshotStore::create_snapshot`].
#[derive(Debug, Clone, Default)]
pub struct CreateSnapshot {
    pub command: String,
    pub working_dir: Option<PathBuf>,
    pub batch_id: Option<BatchId>,
    pub command_index: Option<usize>,
    /// Monitored paths override; derived from the command when `None`.
    pub monitored_paths: Option<Vec<PathBuf>>,
    pub metadata: Option<serde_json::Value>,
}

/// Outcome of a batch rollback, in restore order (reverse creation order).
#[derive(Debug, Clone)]
pub struct BatchRollbackReport {
    pub results: Vec<(SnapshotId, bool)>,
}

impl BatchRollbackReport {
    pub fn success(&self) -> bool {
        !self.results.is_empty() && self.results.iter().all(|(_, ok)| *ok)
    }
}

/// Owns snapshot backup bytes and metadata under one root directory.
///
/// All filesystem work is synchronous; callers on the agent event loop go
/// through `spawn_blocking`.
pub struct SnapshotStore {
    root: PathBuf,
    snapshots: Mutex<HashMap<SnapshotId, Snapshot>>,
    batches: Mutex<HashMap<BatchId, Vec<SnapshotId>>>,
}

impl SnapshotStore {
    /// Open a store, creating the root directory and loading any persisted
    /// snapshot metadata.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, SnapshotError> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        let store = Self {
            root,
            snapshots: Mutex::new(HashMap::new()),
            batches: Mutex::new(HashMap::new()),
        };
        store.load_snapshots();
        Ok(store)
    }

    /// Default store root: `.deployx_snapshots` under the system temp dir.
    pub fn default_root() -> PathBuf {
        std::env::temp_dir().join(".deployx_snapshots")
    }

    fn load_snapshots(&self) {
        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::error!(%e, root = %self.root.display(), "cannot read snapshot root");
                return;
            }
        };

        let mut loaded = 0usize;
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match std::fs::read_to_string(&path)
                .map_err(SnapshotError::from)
                .and_then(|text| Ok(serde_json::from_str::<Snapshot>(&text)?))
            {
                Ok(snapshot) => {
                    if let Some(batch_id) = &snapshot.batch_id {
                        self.batches
                            .lock()
                            .entry(batch_id.clone())
                            .or_default()
                            .push(snapshot.snapshot_id.clone());
                    }
                    self.snapshots.lock().insert(snapshot.snapshot_id.clone(), snapshot);
                    loaded += 1;
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), %e, "skipping unreadable snapshot");
                }
            }
        }

        // Batch indices rebuilt from load order may not match creation order;
        // creation timestamps restore it.
        for ids in self.batches.lock().values_mut() {
            let snapshots = self.snapshots.lock();
            ids.sort_by_key(|id| snapshots.get(id).map(|s| s.created_at));
        }

        if loaded > 0 {
            tracing::info!(count = loaded, "loaded snapshots from disk");
        }
    }

    /// Capture a snapshot before executing `command`. Returns the new id.
    pub fn create_snapshot(&self, params: CreateSnapshot) -> Result<SnapshotId, SnapshotError> {
        let created_at = Utc::now();
        let working_dir = match params.working_dir {
            Some(dir) => dir,
            None => std::env::current_dir()?,
        };

        let snapshot_id = derive_id(&created_at, &params.command, params.batch_id.as_ref());

        let monitored = params
            .monitored_paths
            .unwrap_or_else(|| monitored_paths(&working_dir, &params.command));

        let mut file_snapshots = Vec::new();
        for path in &monitored {
            if path.is_dir() {
                for file in collect_files(path) {
                    file_snapshots.push(self.capture_file(&file, &snapshot_id));
                }
            } else {
                file_snapshots.push(self.capture_file(path, &snapshot_id));
            }
        }

        let mut environment_vars = BTreeMap::new();
        for key in ["PATH", "HOME", "USER"] {
            environment_vars.insert(key.to_string(), std::env::var(key).unwrap_or_default());
        }
        environment_vars.insert(
            "PWD".to_string(),
            std::env::var("PWD").unwrap_or_else(|_| working_dir.display().to_string()),
        );

        let snapshot = Snapshot {
            snapshot_id: snapshot_id.clone(),
            timestamp: created_at.timestamp(),
            created_at,
            command: params.command,
            command_index: params.command_index,
            batch_id: params.batch_id.clone(),
            working_directory: working_dir,
            monitored_paths: monitored,
            file_snapshots,
            environment_vars,
            metadata: params.metadata.unwrap_or(serde_json::Value::Null),
        };

        // Backups are already on disk; metadata last.
        let metadata_path = self.metadata_path(&snapshot_id);
        std::fs::write(&metadata_path, serde_json::to_vec_pretty(&snapshot)?)?;

        if let Some(batch_id) = &params.batch_id {
            self.batches.lock().entry(batch_id.clone()).or_default().push(snapshot_id.clone());
        }
        tracing::info!(
            %snapshot_id,
            command = %snapshot.command,
            files = snapshot.file_snapshots.len(),
            "created snapshot"
        );
        self.snapshots.lock().insert(snapshot_id.clone(), snapshot);

        Ok(snapshot_id)
    }

    /// Capture one entry: existence and kind always; for existing files also
    /// the content hash, stat fields, and a backup copy.
    fn capture_file(&self, path: &Path, snapshot_id: &SnapshotId) -> FileSnapshot {
        let exists = path.exists();
        let is_dir = exists && path.is_dir();
        let mut snapshot = FileSnapshot {
            path: path.to_path_buf(),
            exists,
            is_dir,
            content_hash: None,
            size: None,
            modified_time: None,
            permissions: None,
            backup_path: None,
        };

        if exists && !is_dir {
            snapshot.content_hash = hash_file(path);
            if let Ok(meta) = path.metadata() {
                snapshot.size = Some(meta.len());
                snapshot.modified_time = meta
                    .modified()
                    .ok()
                    .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                    .map(|d| d.as_secs() as i64);
                #[cfg(unix)]
                {
                    use std::os::unix::fs::PermissionsExt;
                    snapshot.permissions = Some(meta.permissions().mode());
                }
            }
            snapshot.backup_path = self.backup_file(path, snapshot_id);
        }

        snapshot
    }

    /// Copy a file into the snapshot's backup directory, resolving basename
    /// collisions with a numeric suffix.
    fn backup_file(&self, path: &Path, snapshot_id: &SnapshotId) -> Option<PathBuf> {
        let backup_dir = self.root.join(snapshot_id.as_str()).join("files");
        if let Err(e) = std::fs::create_dir_all(&backup_dir) {
            tracing::error!(%e, "cannot create backup dir");
            return None;
        }

        let name = path.file_name()?;
        let mut backup_path = backup_dir.join(name);
        let mut counter = 1;
        while backup_path.exists() {
            let stem = Path::new(name).file_stem().unwrap_or(name).to_string_lossy();
            let suffix = Path::new(name)
                .extension()
                .map(|e| format!(".{}", e.to_string_lossy()))
                .unwrap_or_default();
            backup_path = backup_dir.join(format!("{stem}_{counter}{suffix}"));
            counter += 1;
        }

        match std::fs::copy(path, &backup_path) {
            Ok(_) => Some(backup_path),
            Err(e) => {
                tracing::error!(path = %path.display(), %e, "failed to back up file");
                None
            }
        }
    }

    /// Restore every monitored entry to its captured state.
    ///
    /// Returns `Ok(true)` when no per-file restore failed. Entries that were
    /// absent at capture time are deleted if something now sits at their path,
    /// making repeat rollbacks idempotent.
    pub fn rollback_snapshot(&self, snapshot_id: &SnapshotId) -> Result<bool, SnapshotError> {
        let snapshot = self
            .snapshots
            .lock()
            .get(snapshot_id.as_str())
            .cloned()
            .ok_or_else(|| SnapshotError::NotFound(snapshot_id.clone()))?;

        tracing::info!(%snapshot_id, command = %snapshot.command, "rolling back snapshot");
        let mut failures = 0usize;

        for file in &snapshot.file_snapshots {
            match restore_entry(file) {
                Ok(()) => {}
                Err(e) => {
                    tracing::error!(path = %file.path.display(), %e, "restore failed");
                    failures += 1;
                }
            }
        }

        tracing::info!(
            %snapshot_id,
            restored = snapshot.file_snapshots.len() - failures,
            failures,
            "rollback complete"
        );
        Ok(failures == 0)
    }

    /// Roll back every snapshot in a batch, most recent first.
    pub fn rollback_batch(&self, batch_id: &BatchId) -> Result<BatchRollbackReport, SnapshotError> {
        let ids = self
            .batches
            .lock()
            .get(batch_id.as_str())
            .cloned()
            .ok_or_else(|| SnapshotError::BatchNotFound(batch_id.clone()))?;

        tracing::info!(%batch_id, count = ids.len(), "rolling back batch");
        let mut results = Vec::with_capacity(ids.len());
        for id in ids.iter().rev() {
            let ok = self.rollback_snapshot(id).unwrap_or(false);
            if !ok {
                tracing::warn!(snapshot_id = %id, "batch member failed to roll back");
            }
            results.push((id.clone(), ok));
        }
        Ok(BatchRollbackReport { results })
    }

    /// Delete a snapshot's metadata and backup bytes, and unlink it from its
    /// batch. Metadata goes first.
    pub fn delete_snapshot(&self, snapshot_id: &SnapshotId) -> Result<bool, SnapshotError> {
        let snapshot = match self.snapshots.lock().remove(snapshot_id.as_str()) {
            Some(s) => s,
            None => return Ok(false),
        };

        let metadata_path = self.metadata_path(snapshot_id);
        if metadata_path.exists() {
            std::fs::remove_file(&metadata_path)?;
        }
        let backup_dir = self.root.join(snapshot_id.as_str());
        if backup_dir.exists() {
            std::fs::remove_dir_all(&backup_dir)?;
        }

        if let Some(batch_id) = &snapshot.batch_id {
            let mut batches = self.batches.lock();
            if let Some(ids) = batches.get_mut(batch_id.as_str()) {
                ids.retain(|id| id != snapshot_id);
                if ids.is_empty() {
                    batches.remove(batch_id.as_str());
                }
            }
        }

        tracing::info!(%snapshot_id, "deleted snapshot");
        Ok(true)
    }

    /// Delete every snapshot belonging to a batch.
    pub fn delete_batch(&self, batch_id: &BatchId) -> Result<bool, SnapshotError> {
        let ids = match self.batches.lock().get(batch_id.as_str()).cloned() {
            Some(ids) => ids,
            None => return Ok(false),
        };
        let mut all = true;
        for id in ids {
            all &= self.delete_snapshot(&id)?;
        }
        Ok(all)
    }

    /// Delete snapshots captured before `cutoff_ts`. Returns how many went.
    pub fn cleanup_older_than(&self, cutoff_ts: i64) -> usize {
        let stale: Vec<SnapshotId> = self
            .snapshots
            .lock()
            .values()
            .filter(|s| s.timestamp < cutoff_ts)
            .map(|s| s.snapshot_id.clone())
            .collect();

        let mut deleted = 0usize;
        for id in stale {
            match self.delete_snapshot(&id) {
                Ok(true) => deleted += 1,
                Ok(false) => {}
                Err(e) => tracing::warn!(snapshot_id = %id, %e, "GC delete failed"),
            }
        }
        if deleted > 0 {
            tracing::info!(deleted, "cleaned up old snapshots");
        }
        deleted
    }

    /// Background GC: every `interval`, delete snapshots older than
    /// `max_age`. Runs until the token is cancelled.
    pub fn spawn_cleanup_task(
        self: &Arc<Self>,
        interval: Duration,
        max_age: Duration,
        token: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
                let cutoff = Utc::now().timestamp() - max_age.as_secs() as i64;
                let store = Arc::clone(&store);
                let _ = tokio::task::spawn_blocking(move || store.cleanup_older_than(cutoff))
                    .await;
            }
        })
    }

    pub fn snapshot_info(&self, snapshot_id: &SnapshotId) -> Option<Snapshot> {
        self.snapshots.lock().get(snapshot_id.as_str()).cloned()
    }

    pub fn batch_snapshot_ids(&self, batch_id: &BatchId) -> Option<Vec<SnapshotId>> {
        self.batches.lock().get(batch_id.as_str()).cloned()
    }

    pub fn list_snapshots(&self) -> Vec<Snapshot> {
        self.snapshots.lock().values().cloned().collect()
    }

    pub fn list_batches(&self) -> Vec<BatchId> {
        self.batches.lock().keys().cloned().collect()
    }

    fn metadata_path(&self, snapshot_id: &SnapshotId) -> PathBuf {
        self.root.join(format!("{snapshot_id}.json"))
    }
}

/// First 16 hex chars of SHA-256 over timestamp, command, and batch id.
/// The timestamp component keeps ids unique within a batch.
fn derive_id(
    created_at: &chrono::DateTime<Utc>,
    command: &str,
    batch_id: Option<&BatchId>,
) -> SnapshotId {
    let mut hasher = Sha256::new();
    hasher.update(created_at.to_rfc3339_opts(chrono::SecondsFormat::Nanos, true));
    hasher.update("_");
    hasher.update(command);
    hasher.update("_");
    if let Some(batch) = batch_id {
        hasher.update(batch.as_str());
    }
    let digest = hasher.finalize();
    let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
    SnapshotId::from_string(&hex[..16])
}

/// Restore a single captured entry to its pre-snapshot state.
fn restore_entry(file: &FileSnapshot) -> std::io::Result<()> {
    if file.exists {
        if let Some(backup) = &file.backup_path {
            if backup.exists() {
                if let Some(parent) = file.path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::copy(backup, &file.path)?;
                #[cfg(unix)]
                if let Some(mode) = file.permissions {
                    use std::os::unix::fs::PermissionsExt;
                    let _ = std::fs::set_permissions(
                        &file.path,
                        std::fs::Permissions::from_mode(mode),
                    );
                }
            } else {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("backup missing: {}", backup.display()),
                ));
            }
        }
        // Directories and files without a backup: nothing to do
        return Ok(());
    }

    // Did not exist at capture time: remove whatever is there now
    if file.path.exists() {
        if file.path.is_dir() {
            std::fs::remove_dir_all(&file.path)?;
        } else {
            std::fs::remove_file(&file.path)?;
        }
    }
    Ok(())
}

/// SHA-256 of a file's contents, streamed in 8 KiB chunks.
fn hash_file(path: &Path) -> Option<String> {
    let mut file = std::fs::File::open(path).ok()?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 8192];
    loop {
        match file.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => hasher.update(&buf[..n]),
            Err(_) => return None,
        }
    }
    Some(hasher.finalize().iter().map(|b| format!("{b:02x}")).collect())
}

/// All files under a directory, recursively.
fn collect_files(dir: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();
    let Ok(entries) = std::fs::read_dir(dir) else {
        return files;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            files.extend(collect_files(&path));
        } else {
            files.push(path);
        }
    }
    files.sort();
    files
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
