// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Agent ↔ controller event protocol.
//!
//! Wire format: one JSON object per WebSocket text frame,
//! `{"event": <name>, "data": {…}}`. The controller addresses an agent by
//! routing a frame to the per-agent channel the registry holds for it; the
//! agent joins that room implicitly by registering.

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

mod events;
mod frame;

pub use events::WireEvent;
pub use frame::{decode, encode, Frame, ProtocolError};
