// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Raw event frames and their JSON encoding.

use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use thiserror::Error;

/// Errors that can occur encoding or decoding protocol frames.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unknown event: {0}")]
    UnknownEvent(SmolStr),
    #[error("malformed frame: {0}")]
    Malformed(String),
}

/// An event frame before typed interpretation.
///
/// Handlers decode to a `Frame` first so an unrecognized event name can be
/// refused with an `error` event instead of tearing the connection down.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub event: SmolStr,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl Frame {
    pub fn new(event: impl Into<SmolStr>, data: serde_json::Value) -> Self {
        Self { event: event.into(), data }
    }
}

/// Encode a frame as a JSON text message.
pub fn encode(frame: &Frame) -> Result<String, ProtocolError> {
    Ok(serde_json::to_string(frame)?)
}

/// Decode a JSON text message into a frame.
pub fn decode(text: &str) -> Result<Frame, ProtocolError> {
    let value: serde_json::Value = serde_json::from_str(text)?;
    if !value.is_object() {
        return Err(ProtocolError::Malformed("frame is not a JSON object".to_string()));
    }
    Ok(serde_json::from_value(value)?)
}

#[cfg(test)]
#[path = "frame_tests.rs"]
mod tests;
