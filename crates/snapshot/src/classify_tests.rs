// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::{analyze, is_destructive, Category, Severity};

#[test]
fn recursive_delete_of_system_path_is_critical() {
    let analysis = analyze("rm -rf /etc/foo");
    assert!(analysis.is_destructive);
    assert_eq!(analysis.category, Some(Category::Delete));
    assert_eq!(analysis.severity, Severity::Critical);
    assert_eq!(analysis.affected_paths, vec!["/etc/foo"]);
    assert!(analysis.requires_backup);
}

#[test]
fn listing_is_safe() {
    let analysis = analyze("ls -la");
    assert!(!analysis.is_destructive);
    assert_eq!(analysis.category, None);
    assert!(analysis.affected_paths.is_empty());
}

#[yare::parameterized(
    plain_rm        = { "rm notes.txt",                 Category::Delete,   Severity::Medium   },
    recursive_rm    = { "rm -rf build",                 Category::Delete,   Severity::High     },
    wildcard_del    = { "del *.log",                    Category::Delete,   Severity::High     },
    powershell_rm   = { "Remove-Item -Recurse out",     Category::Delete,   Severity::High     },
    plain_mv        = { "mv a.txt b.txt",               Category::Move,     Severity::Medium   },
    forced_move     = { "move /y a.txt b.txt",          Category::Move,     Severity::High     },
    mkfs            = { "mkfs.ext4 /dev/sdb1",          Category::Format,   Severity::Critical },
    format_drive    = { "format D:",                    Category::Format,   Severity::Critical },
    truncate_cmd    = { "truncate -s 0 app.log",        Category::Truncate, Severity::Medium   },
    overwrite       = { "echo x > config.ini",          Category::Truncate, Severity::Medium   },
    reg_delete      = { "reg delete HKLM\\Software\\X", Category::Registry, Severity::High     },
    drop_table      = { "DROP TABLE users",             Category::Database, Severity::High     },
    shutdown_cmd    = { "shutdown -h now",              Category::System,   Severity::Critical },
    service_stop    = { "systemctl stop nginx",         Category::System,   Severity::Critical },
)]
fn categories_and_severities(command: &str, category: Category, severity: Severity) {
    let analysis = analyze(command);
    assert!(analysis.is_destructive, "{command} should be destructive");
    assert_eq!(analysis.category, Some(category), "category for {command}");
    assert_eq!(analysis.severity, severity, "severity for {command}");
}

#[yare::parameterized(
    listing_win   = { "dir c:\\temp" },
    copy_unix     = { "cp a b" },
    copy_win      = { "copy a b" },
    append        = { "echo done >> status.log" },
    rsync_cmd     = { "rsync -av src/ dst/" },
)]
fn safe_patterns_short_circuit(command: &str) {
    assert!(!is_destructive(command), "{command} should be safe");
}

#[yare::parameterized(
    format_cat = { "mkfs.ext4 /dev/sdb1" },
    system_cat = { "reboot" },
)]
fn format_and_system_refuse_backup(command: &str) {
    let analysis = analyze(command);
    assert!(analysis.is_destructive);
    assert!(!analysis.requires_backup, "{command} cannot be backed up");
}

#[test]
fn analysis_is_deterministic() {
    let first = analyze("rm -rf /tmp/a /tmp/b");
    for _ in 0..5 {
        assert_eq!(analyze("rm -rf /tmp/a /tmp/b"), first);
    }
}

#[test]
fn quoted_paths_are_unquoted() {
    let analysis = analyze(r#"rm "notes.txt""#);
    assert_eq!(analysis.affected_paths, vec!["notes.txt"]);
}

#[test]
fn mv_matches_move_before_delete_heuristics() {
    // Overlapping regexes resolve by category order: mv is a move, never a
    // delete, and both operands are captured.
    let analysis = analyze("mv src.txt dst.txt");
    assert_eq!(analysis.category, Some(Category::Move));
    assert_eq!(analysis.affected_paths, vec!["src.txt", "dst.txt"]);
}
