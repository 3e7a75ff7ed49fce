// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::monitored_paths;
use std::path::{Path, PathBuf};

fn derive(command: &str) -> Vec<PathBuf> {
    monitored_paths(Path::new("/work"), command)
}

#[test]
fn working_dir_is_always_monitored() {
    assert_eq!(derive("uptime"), vec![PathBuf::from("/work")]);
}

#[test]
fn mkdir_adds_parent_and_target() {
    let paths = derive("mkdir sub/dir");
    assert!(paths.contains(&PathBuf::from("/work/sub")), "got {paths:?}");
    assert!(paths.contains(&PathBuf::from("/work/sub/dir")), "got {paths:?}");
}

#[test]
fn mkdir_absolute_target() {
    let paths = derive("mkdir /tmp/a");
    assert!(paths.contains(&PathBuf::from("/tmp")), "got {paths:?}");
    assert!(paths.contains(&PathBuf::from("/tmp/a")), "got {paths:?}");
}

#[test]
fn touch_flags_are_skipped() {
    let paths = derive("touch -a stamp.txt");
    assert!(paths.contains(&PathBuf::from("/work")), "got {paths:?}");
    assert!(!paths.iter().any(|p| p.to_string_lossy().contains("-a")));
}

#[test]
fn cd_adds_the_target_directory() {
    let paths = derive("cd ../elsewhere");
    assert!(paths.contains(&PathBuf::from("/work/../elsewhere")), "got {paths:?}");
}

#[test]
fn delete_adds_parent_of_each_target() {
    let paths = derive("rm -f logs/app.log data/cache.bin");
    assert!(paths.contains(&PathBuf::from("/work/logs")), "got {paths:?}");
    assert!(paths.contains(&PathBuf::from("/work/data")), "got {paths:?}");
}

#[test]
fn duplicates_collapse() {
    let paths = derive("rm a.txt b.txt");
    let work_count = paths.iter().filter(|p| **p == PathBuf::from("/work")).count();
    assert_eq!(work_count, 1);
}
