// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `dxd`, the DeployX controller daemon.

use dx_controller::deploy::DeploymentDispatcher;
use dx_controller::listener::{self, ListenerCtx};
use dx_controller::sched::{SchedulerConfig, StaticDeviceDirectory, TaskScheduler};
use dx_controller::{env, CommandQueue, ConnectionRegistry, GroupCommandExecutor};
use dx_core::SystemClock;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

fn init_tracing(
    state_dir: &std::path::Path,
) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let log_dir = state_dir.join("logs");
    if std::fs::create_dir_all(&log_dir).is_ok() {
        let appender = tracing_appender::rolling::daily(log_dir, "controller.log");
        let (writer, guard) = tracing_appender::non_blocking(appender);
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(writer)
            .with_ansi(false)
            .init();
        Some(guard)
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
        None
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let state_dir = env::state_dir()
        .ok_or_else(|| anyhow::anyhow!("cannot resolve a state directory"))?;
    std::fs::create_dir_all(&state_dir)?;
    let _log_guard = init_tracing(&state_dir);

    if env::db_url().is_none() {
        tracing::warn!("DB_URL not set; device inventory comes from devices.json only");
    }

    let registry = Arc::new(ConnectionRegistry::new(SystemClock));
    let queue = Arc::new(CommandQueue::open(state_dir.join("command_queue.json"))?);
    let executor = Arc::new(GroupCommandExecutor::new(
        Arc::clone(&registry) as Arc<dyn dx_controller::AgentLink>,
        Arc::clone(&queue),
        SystemClock,
    ));
    let deployments = Arc::new(DeploymentDispatcher::new(
        Arc::clone(&registry) as Arc<dyn dx_controller::AgentLink>,
    ));

    let devices_path = state_dir.join("devices.json");
    let directory = if devices_path.exists() {
        StaticDeviceDirectory::from_file(&devices_path)?
    } else {
        StaticDeviceDirectory::default()
    };

    let scheduler = Arc::new(TaskScheduler::load(
        SystemClock,
        SchedulerConfig::new(state_dir.join("tasks.json")),
        Arc::clone(&executor),
        Arc::clone(&deployments),
        Arc::new(directory),
    )?);

    let bind_addr = env::bind_addr();
    let tcp = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(%bind_addr, "controller listening");

    let token = CancellationToken::new();
    let ctx = Arc::new(ListenerCtx {
        registry,
        executor,
        queue,
        deployments,
        allowed_origins: env::allowed_origins(),
    });

    let listener_task = tokio::spawn(listener::run(tcp, ctx, token.child_token()));
    let scheduler_task = tokio::spawn(Arc::clone(&scheduler).run(token.child_token()));

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");
    token.cancel();
    let _ = listener_task.await;
    let _ = scheduler_task.await;

    Ok(())
}
