// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use dx_core::{BatchId, SnapshotId};
use thiserror::Error;

/// Errors from snapshot creation, restoration, and housekeeping.
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("snapshot not found: {0}")]
    NotFound(SnapshotId),
    #[error("batch not found: {0}")]
    BatchNotFound(BatchId),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}
