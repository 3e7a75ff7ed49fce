// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Destructive-command classifier.
//!
//! A pure function over the command text. The regex tables are data, not
//! code, so they can be audited and extended; category order is fixed and
//! first match wins. Safe patterns are checked first and short-circuit.

use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

/// Category of a destructive operation, in match-priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Delete,
    Move,
    Format,
    Truncate,
    Registry,
    Database,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

/// Analysis record for one command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandAnalysis {
    pub is_destructive: bool,
    pub category: Option<Category>,
    pub affected_paths: Vec<String>,
    pub severity: Severity,
    pub description: String,
    pub requires_backup: bool,
}

impl CommandAnalysis {
    fn safe() -> Self {
        Self {
            is_destructive: false,
            category: None,
            affected_paths: Vec::new(),
            severity: Severity::Low,
            description: String::new(),
            requires_backup: false,
        }
    }
}

/// Patterns that indicate safe operations; matching any short-circuits the
/// destructive tables.
const SAFE_PATTERNS: &[&str] = &[
    r"\bdir\s+",
    r"\bls\s+",
    r"\bGet-ChildItem\s+",
    r"\becho\s+.*>>\s+", // append, not overwrite
    r"\bcopy\s+",
    r"\bcp\s+",
    r"\bxcopy\s+",
    r"\brobocopy\s+",
    r"\brsync\s+",
];

/// Destructive patterns per category. Path-like capture groups become
/// `affected_paths`.
const DESTRUCTIVE_PATTERNS: &[(Category, &[&str])] = &[
    (
        Category::Delete,
        &[
            // Windows
            r#"\b(?:del|erase)\s+(?:/[a-z]+\s+)*["']?([^"'>\s]+)["']?"#,
            r#"\brd\s+(?:/[a-z]+\s+)*["']?([^"'>\s]+)["']?"#,
            r#"\brmdir\s+(?:/[a-z]+\s+)*["']?([^"'>\s]+)["']?"#,
            // Unix
            r#"\brm\s+(?:-[a-z]+\s+)*["']?([^"'>\s]+)["']?"#,
            // PowerShell
            r#"\bRemove-Item\s+(?:-[a-zA-Z]+\s+)*["']?([^"'>\s]+)["']?"#,
            r#"\bri\s+(?:-[a-zA-Z]+\s+)*["']?([^"'>\s]+)["']?"#,
        ],
    ),
    (
        Category::Move,
        &[
            r#"\bmove\s+(?:/[a-z]+\s+)*["']?([^"'>\s]+)["']?\s+["']?([^"'>\s]+)["']?"#,
            r#"\bren\s+(?:/[a-z]+\s+)*["']?([^"'>\s]+)["']?"#,
            r#"\brename\s+(?:/[a-z]+\s+)*["']?([^"'>\s]+)["']?"#,
            r#"\bmv\s+(?:-[a-z]+\s+)*["']?([^"'>\s]+)["']?\s+["']?([^"'>\s]+)["']?"#,
            r#"\bMove-Item\s+(?:-[a-zA-Z]+\s+)*["']?([^"'>\s]+)["']?"#,
            r#"\bmi\s+(?:-[a-zA-Z]+\s+)*["']?([^"'>\s]+)["']?"#,
            r#"\bRename-Item\s+(?:-[a-zA-Z]+\s+)*["']?([^"'>\s]+)["']?"#,
            r#"\brni\s+(?:-[a-zA-Z]+\s+)*["']?([^"'>\s]+)["']?"#,
        ],
    ),
    (
        Category::Format,
        &[r"\bformat\s+([a-zA-Z]:)", r"\bdiskpart\b", r"\bmkfs\.", r"\bfdisk\b"],
    ),
    (
        Category::Truncate,
        &[
            r#"\becho\s+(?:""|''|\.)\s*>\s*["']?([^"'>\s]+)["']?"#,
            r#"\bClear-Content\s+(?:-[a-zA-Z]+\s+)*["']?([^"'>\s]+)["']?"#,
            r#"\bclc\s+(?:-[a-zA-Z]+\s+)*["']?([^"'>\s]+)["']?"#,
            r#"\btruncate\s+(?:-[a-z]+\s+)*["']?([^"'>\s]+)["']?"#,
            // single > overwrite (>> is append and never matches here)
            r#"(?:^|[^>])>\s*["']?([^"'>\s]+)"#,
        ],
    ),
    (Category::Registry, &[r"\breg\s+delete\b", r"\breg\s+add\b.*/f"]),
    (
        Category::Database,
        &[
            r"\bDROP\s+(?:TABLE|DATABASE|SCHEMA)\b",
            r"\bTRUNCATE\s+TABLE\b",
            r"\bDELETE\s+FROM\b",
        ],
    ),
    (
        Category::System,
        &[
            r"\bshutdown\b",
            r"\breboot\b",
            r"\binit\s+[0-6]",
            r"\bsystemctl\s+(?:stop|disable|mask)",
            r"\bsc\s+(?:stop|delete)\b",
        ],
    ),
];

/// Paths under these prefixes escalate severity to critical.
const SYSTEM_PREFIXES: &[&str] = &[
    // Windows
    r"c:\windows",
    r"c:\program files",
    r"c:\program files (x86)",
    r"c:\system",
    r"c:\boot",
    r"c:\users\all users",
    r"c:\programdata",
    // POSIX
    "/bin",
    "/sbin",
    "/usr/bin",
    "/usr/sbin",
    "/lib",
    "/etc",
    "/boot",
    "/sys",
    "/proc",
    "/root",
];

static SAFE: LazyLock<Vec<regex::Regex>> = LazyLock::new(|| compile(SAFE_PATTERNS));

static DESTRUCTIVE: LazyLock<Vec<(Category, Vec<regex::Regex>)>> = LazyLock::new(|| {
    DESTRUCTIVE_PATTERNS
        .iter()
        .map(|(category, patterns)| (*category, compile(patterns)))
        .collect()
});

fn compile(patterns: &[&str]) -> Vec<regex::Regex> {
    patterns
        .iter()
        .filter_map(|p| {
            regex::RegexBuilder::new(p).case_insensitive(true).build().ok()
        })
        .collect()
}

/// Whether a command is potentially destructive.
pub fn is_destructive(command: &str) -> bool {
    analyze(command).is_destructive
}

/// Classify a command: category, affected paths, severity, and whether a
/// pre-execution backup is warranted.
pub fn analyze(command: &str) -> CommandAnalysis {
    for pattern in SAFE.iter() {
        if pattern.is_match(command) {
            return CommandAnalysis::safe();
        }
    }

    for (category, patterns) in DESTRUCTIVE.iter() {
        for pattern in patterns {
            let Some(captures) = pattern.captures(command) else {
                continue;
            };

            let affected_paths: Vec<String> = captures
                .iter()
                .skip(1)
                .flatten()
                .map(|m| m.as_str().trim_matches(['"', '\'']).to_string())
                .filter(|p| !p.is_empty() && !p.starts_with('-'))
                .collect();

            let (severity, description, requires_backup) =
                grade(*category, command, &affected_paths);

            tracing::debug!(
                category = ?category,
                severity = ?severity,
                paths = ?affected_paths,
                "destructive command detected"
            );
            return CommandAnalysis {
                is_destructive: true,
                category: Some(*category),
                affected_paths,
                severity,
                description,
                requires_backup,
            };
        }
    }

    CommandAnalysis::safe()
}

/// Severity, description, and backup requirement for a categorized command.
fn grade(category: Category, command: &str, paths: &[String]) -> (Severity, String, bool) {
    let lower = command.to_lowercase();
    match category {
        Category::Delete => {
            let mut severity = Severity::Medium;
            let mut description = "Deletes files or directories".to_string();
            if ["/s", "-r", "-rf", "-recurse", "-force"].iter().any(|f| lower.contains(f)) {
                severity = Severity::High;
                description = "Recursively deletes files or directories".to_string();
            }
            if paths.iter().any(|p| p.contains('*') || p.contains('?')) {
                severity = Severity::High;
                description = "Deletes multiple files using wildcards".to_string();
            }
            if affects_system_paths(paths) {
                severity = Severity::Critical;
                description = "Deletes system files or directories (CRITICAL)".to_string();
            }
            (severity, description, true)
        }
        Category::Move => {
            if ["/y", "-f", "-force"].iter().any(|f| lower.contains(f)) {
                (
                    Severity::High,
                    "Forcefully moves/renames (may overwrite existing files)".to_string(),
                    true,
                )
            } else {
                (Severity::Medium, "Moves or renames files/directories".to_string(), true)
            }
        }
        Category::Format => (
            Severity::Critical,
            "Formats disk or partition (ALL DATA WILL BE LOST)".to_string(),
            false,
        ),
        Category::Truncate => {
            (Severity::Medium, "Overwrites or clears file contents".to_string(), true)
        }
        Category::Registry => (Severity::High, "Modifies Windows registry".to_string(), true),
        Category::Database => {
            (Severity::High, "Destructive database operation".to_string(), true)
        }
        Category::System => (Severity::Critical, "System-wide operation".to_string(), false),
    }
}

fn affects_system_paths(paths: &[String]) -> bool {
    paths.iter().any(|path| {
        let lower = path.to_lowercase();
        SYSTEM_PREFIXES.iter().any(|prefix| lower.starts_with(prefix))
    })
}

#[cfg(test)]
#[path = "classify_tests.rs"]
mod tests;
