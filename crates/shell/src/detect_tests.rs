// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::detect_shells;

#[test]
#[cfg(unix)]
fn detects_sh_on_unix_hosts() {
    let shells = detect_shells();
    assert!(
        shells.contains_key("sh") || shells.contains_key("bash"),
        "expected sh or bash in {:?}",
        shells.keys().collect::<Vec<_>>()
    );
}

#[test]
fn detected_paths_are_absolute_files() {
    for (name, path) in detect_shells() {
        assert!(path.is_absolute(), "{name} path not absolute: {path:?}");
        assert!(path.is_file(), "{name} path not a file: {path:?}");
    }
}
