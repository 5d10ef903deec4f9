//! Handover Daemon
//!
//! 后台守护进程，负责：
//! - 持有本机的切换协调器与组件注册表
//! - 在 TCP 上接受对端协调器发起的切换
//! - 通过 Unix Socket 与 CLI 通信

mod components;
mod ipc;
mod peer;
mod service;

use anyhow::Result;
use clap::Parser;
use handover_core::{HandoverCoordinator, HandoverSettings, LinkTable};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "handoverd")]
#[command(about = "Handover coordination daemon", long_about = None)]
struct Args {
    /// 配置文件路径 (默认 ~/.config/handover/settings.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let settings = match &args.config {
        Some(path) => HandoverSettings::load_from(path),
        None => HandoverSettings::load(),
    };

    // 桥接 log crate（handover-core 使用）到 tracing
    let _ = tracing_log::LogTracer::init();

    // 初始化日志
    let directive = settings.log_level.filter_directive();
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive)),
        )
        .try_init();

    tracing::info!("Handover Daemon starting...");

    let links = LinkTable::new();
    let calibrating = Arc::new(AtomicBool::new(false));
    let registry = components::registry(calibrating.clone())?;
    let coordinator = HandoverCoordinator::new(
        registry,
        Arc::new(links.clone()),
        settings.role,
        settings.coordinator_config()?,
    )
    .with_observer(Arc::new(service::LogObserver));

    let socket = settings
        .ipc_socket
        .clone()
        .unwrap_or_else(handover_core::ipc::socket_path);
    let listen_addr = settings.listen_addr.clone();
    let (service, handle) = service::Service::new(coordinator, links, settings, calibrating);

    // 启动 IPC 服务器
    let ipc_handle = tokio::spawn(ipc::run_ipc_server(socket, handle.clone()));

    // 启动对端监听
    let peer_handle = tokio::spawn(peer::run_peer_listener(listen_addr, handle));

    // 启动核心服务
    let service_handle = tokio::spawn(service.run());

    // 等待任一任务完成
    tokio::select! {
        res = ipc_handle => {
            tracing::error!("IPC server exited: {:?}", res);
        }
        res = peer_handle => {
            tracing::error!("Peer listener exited: {:?}", res);
        }
        res = service_handle => {
            tracing::error!("Core service exited: {:?}", res);
        }
    }

    Ok(())
}
