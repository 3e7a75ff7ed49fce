// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Identifier newtypes.
//!
//! Controller-minted ids (commands, executions, batches, tasks) are UUIDv4
//! strings. Agent ids are machine-derived, session ids are operator-chosen,
//! and snapshot ids are content-hash-derived; those types only wrap strings
//! handed to them.

/// Define a newtype ID wrapper around a `String`.
///
/// Generates `new()` for random UUID generation, `from_string()` for parsing,
/// `as_str()`, `short()`, `Display`, `From<&str>`/`From<String>`,
/// `PartialEq<str>`, `Borrow<str>`, and `Deref` implementations.
#[macro_export]
macro_rules! define_id {
    (
        $(#[$meta:meta])*
        pub struct $name:ident;
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Mint a new random id.
            pub fn new() -> Self {
                Self(uuid::Uuid::new_v4().to_string())
            }

            /// Wrap an existing id string (for parsing/deserialization).
            pub fn from_string(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Returns the id truncated to at most `n` characters, for logs.
            pub fn short(&self, n: usize) -> &str {
                let end = std::cmp::min(n, self.0.len());
                &self.0[..end]
            }

            pub fn is_empty(&self) -> bool {
                self.0.is_empty()
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self::from_string(s)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self::from_string(s)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl PartialEq<str> for $name {
            fn eq(&self, other: &str) -> bool {
                self.0 == other
            }
        }

        impl PartialEq<&str> for $name {
            fn eq(&self, other: &&str) -> bool {
                self.0 == *other
            }
        }

        impl std::borrow::Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }

        impl std::ops::Deref for $name {
            type Target = str;

            fn deref(&self) -> &str {
                &self.0
            }
        }
    };
}

define_id! {
    /// Stable, machine-derived identifier for an endpoint agent.
    pub struct AgentId;
}

define_id! {
    /// Operator-chosen identifier for an interactive shell session,
    /// unique per agent.
    pub struct SessionId;
}

define_id! {
    /// Controller-minted identifier for a single command invocation.
    pub struct CommandId;
}

define_id! {
    /// Identifier for one fan-out of a command across a device group.
    pub struct ExecutionId;
}

define_id! {
    /// Identifier for an ordered batch of group executions.
    pub struct BatchId;
}

define_id! {
    /// Identifier for a scheduled task.
    pub struct TaskId;
}

define_id! {
    /// Content-hash-derived snapshot identifier (16 hex chars).
    ///
    /// Minted by the snapshot engine, never by `new()`; callers wrap the
    /// derived hash via `from_string`.
    pub struct SnapshotId;
}

#[cfg(test)]
#[path = "id_tests.rs"]
mod tests;
