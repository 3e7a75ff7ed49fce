// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `dxa`, the DeployX endpoint agent.

use clap::Parser;
use dx_agent::connection::{AgentIdentity, Connection};
use dx_agent::executor::DeploymentExecutor;
use dx_agent::handlers::AgentHandlers;
use dx_agent::{activation, machine};
use dx_core::AgentId;
use dx_shell::ShellSupervisor;
use dx_snapshot::{SnapshotStore, DEFAULT_CLEANUP_INTERVAL_HOURS, DEFAULT_MAX_AGE_HOURS};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[command(name = "dxa", about = "DeployX endpoint agent", version)]
struct Cli {
    /// Controller WebSocket URL
    #[arg(long, default_value = "ws://127.0.0.1:8787/ws")]
    server: String,

    /// Override the machine-derived agent id
    #[arg(long)]
    agent_id: Option<String>,

    /// Advertise this agent on the local network for discovery
    #[arg(long)]
    advertise: bool,
}

fn init_tracing() -> Option<tracing_appender::non_blocking::WorkerGuard> {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let log_dir = dirs::home_dir().map(|h| h.join(".deployx").join("logs"));
    match log_dir {
        Some(dir) if std::fs::create_dir_all(&dir).is_ok() => {
            let appender = tracing_appender::rolling::daily(dir, "agent.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_ansi(false)
                .init();
            Some(guard)
        }
        _ => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
            None
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let _log_guard = init_tracing();

    let machine_id = machine::machine_id();
    let agent_id = cli
        .agent_id
        .map(AgentId::from_string)
        .unwrap_or_else(|| AgentId::from_string(machine::agent_id_for(&machine_id)));
    let activated = activation::is_activated(&machine_id);
    if !activated {
        tracing::warn!("agent is not activated; deployment commands will be refused");
    }
    if cli.advertise {
        // Discovery advertising lives in the separate discovery service;
        // the flag is accepted so launchers can pass it unconditionally.
        tracing::info!("network advertising requested");
    }

    let (output_tx, output_rx) = mpsc::channel(1024);
    let supervisor = Arc::new(ShellSupervisor::new(output_tx));

    let store = Arc::new(SnapshotStore::open(SnapshotStore::default_root())?);
    let shutdown = CancellationToken::new();
    let _gc = store.spawn_cleanup_task(
        Duration::from_secs(DEFAULT_CLEANUP_INTERVAL_HOURS * 3600),
        Duration::from_secs(DEFAULT_MAX_AGE_HOURS * 3600),
        shutdown.child_token(),
    );

    let executor = Arc::new(DeploymentExecutor::new(
        Arc::clone(&supervisor),
        Arc::clone(&store),
        true,
    ));

    let (outgoing_tx, outgoing_rx) = mpsc::channel(256);
    let handlers =
        AgentHandlers::new(Arc::clone(&supervisor), executor, outgoing_tx, activated);

    let identity = AgentIdentity {
        agent_id: agent_id.clone(),
        machine_id: machine_id.clone(),
        device_name: machine::hostname(),
        ip_address: machine::local_ip(),
        os: std::env::consts::OS.to_string(),
        shells: supervisor.shell_names(),
        system_info: machine::system_info(&machine_id),
    };
    tracing::info!(%agent_id, server = %cli.server, "starting agent");

    let connection = Connection::new(
        cli.server,
        identity,
        handlers,
        Arc::clone(&supervisor),
        outgoing_rx,
        output_rx,
    );

    let conn_shutdown = shutdown.clone();
    let conn_task = tokio::spawn(connection.run(conn_shutdown));

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");
    shutdown.cancel();
    let _ = conn_task.await;
    supervisor.stop_all().await;

    Ok(())
}
