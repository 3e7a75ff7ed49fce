// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::{ShellOutput, ShellSession};
use crate::error::ShellError;
use dx_core::SessionId;
use std::time::Duration;
use tokio::sync::mpsc;

/// Drain the output channel until `needle` appears or the timeout elapses.
async fn wait_for_output(
    rx: &mut mpsc::Receiver<ShellOutput>,
    needle: &str,
    timeout: Duration,
) -> String {
    let mut collected = String::new();
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        match tokio::time::timeout(Duration::from_millis(200), rx.recv()).await {
            Ok(Some(out)) => {
                collected.push_str(&out.chunk);
                if collected.contains(needle) {
                    return collected;
                }
            }
            Ok(None) => break,
            Err(_) => {}
        }
    }
    collected
}

fn sh_path() -> std::path::PathBuf {
    crate::detect::detect_shells()
        .get("sh")
        .cloned()
        .expect("sh must exist on test hosts")
}

#[tokio::test]
#[cfg(unix)]
async fn spawn_streams_command_output() {
    let (tx, mut rx) = mpsc::channel(64);
    let mut session = ShellSession::spawn(
        SessionId::from_string("t-out"),
        "sh",
        &sh_path(),
        tx,
        0,
    )
    .await
    .expect("spawn sh");

    session.write_stdin("echo pumped_$((40+2))\n").await.unwrap();
    let collected = wait_for_output(&mut rx, "pumped_42", Duration::from_secs(5)).await;
    assert!(collected.contains("pumped_42"), "output was: {collected:?}");
    assert!(session.is_running());
}

#[tokio::test]
#[cfg(unix)]
async fn exit_emits_terminator_line() {
    let (tx, mut rx) = mpsc::channel(64);
    let mut session = ShellSession::spawn(
        SessionId::from_string("t-exit"),
        "sh",
        &sh_path(),
        tx,
        0,
    )
    .await
    .expect("spawn sh");

    session.write_stdin("exit 3\n").await.unwrap();
    let collected =
        wait_for_output(&mut rx, "[Process exited with code 3]", Duration::from_secs(5)).await;
    assert!(
        collected.contains("[Process exited with code 3]"),
        "output was: {collected:?}"
    );
    assert!(!session.is_running());
}

#[tokio::test]
#[cfg(unix)]
async fn stderr_is_merged_into_the_stream() {
    let (tx, mut rx) = mpsc::channel(64);
    let mut session = ShellSession::spawn(
        SessionId::from_string("t-err"),
        "sh",
        &sh_path(),
        tx,
        0,
    )
    .await
    .expect("spawn sh");

    session.write_stdin("echo to_std_$((1+1)) 1>&2\n").await.unwrap();
    let collected = wait_for_output(&mut rx, "to_std_2", Duration::from_secs(5)).await;
    assert!(collected.contains("to_std_2"), "output was: {collected:?}");
}

#[tokio::test]
#[cfg(unix)]
async fn immediate_death_fails_the_start() {
    use std::io::Write;
    use std::os::unix::fs::PermissionsExt;

    let dir = tempfile::tempdir().unwrap();
    let script = dir.path().join("dies");
    {
        let mut f = std::fs::File::create(&script).unwrap();
        writeln!(f, "#!/bin/sh\nexit 7").unwrap();
    }
    std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

    let (tx, _rx) = mpsc::channel(64);
    let err = ShellSession::spawn(SessionId::from_string("t-dead"), "dies", &script, tx, 0)
        .await
        .unwrap_err();
    assert!(matches!(err, ShellError::DiedOnStartup { code: Some(7) }), "got {err:?}");
}
