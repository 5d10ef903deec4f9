//! Handover CLI
//!
//! 命令行客户端，通过 Unix Socket 与守护进程通信

mod client;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use handover_core::ipc::{IpcRequest, IpcResponse, LinkInfo};
use handover_core::{ConnectionState, HandoverSettings, LinkClass};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "handover", version, about = "链路切换守护进程的命令行客户端")]
struct Cli {
    /// IPC socket 路径 (默认读取配置，再退回 $XDG_RUNTIME_DIR/handoverd.sock)
    #[arg(short, long, global = true)]
    socket: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 查看守护进程状态
    Status,
    /// 列出活动链路
    Links,
    /// 作为 Primary 向对端发起切换
    Handover,
    /// 管理链路表
    Link {
        #[command(subcommand)]
        action: LinkAction,
    },
    /// 开始或结束传感器校准 (校准期间切换会被否决)
    Calibrate {
        #[arg(value_enum)]
        state: Toggle,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Toggle {
    On,
    Off,
}

#[derive(Subcommand)]
enum LinkAction {
    /// 添加链路或更新其状态
    Set {
        #[arg(value_enum)]
        class: ClassArg,
        /// 设备地址 (AA:BB:CC:DD:EE:FF)
        address: String,
        /// LE 随机地址
        #[arg(short, long)]
        random: bool,
        #[arg(long, value_enum, default_value = "connected")]
        state: StateArg,
    },
    /// 移除链路
    Drop {
        #[arg(value_enum)]
        class: ClassArg,
        address: String,
        #[arg(short, long)]
        random: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum ClassArg {
    Bredr,
    Le,
}

impl From<ClassArg> for LinkClass {
    fn from(class: ClassArg) -> Self {
        match class {
            ClassArg::Bredr => LinkClass::BrEdr,
            ClassArg::Le => LinkClass::Le,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum StateArg {
    Connecting,
    Connected,
    Disconnecting,
}

impl From<StateArg> for ConnectionState {
    fn from(state: StateArg) -> Self {
        match state {
            StateArg::Connecting => ConnectionState::Connecting,
            StateArg::Connected => ConnectionState::Connected,
            StateArg::Disconnecting => ConnectionState::Disconnecting,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let socket = cli.socket.unwrap_or_else(|| {
        HandoverSettings::load()
            .ipc_socket
            .unwrap_or_else(handover_core::ipc::socket_path)
    });

    match cli.command {
        Commands::Status => {
            let resp = client::send_request(&socket, IpcRequest::Status).await?;
            if let IpcResponse::Status(status) = resp {
                println!("设备: {}", status.device_name);
                println!("角色: {}", status.role);
                println!("组件: {}", status.components.join(", "));
                println!("类型: {} (指纹 {})", status.types, status.fingerprint);
                if let Some(last) = status.last_attempt {
                    println!("上次尝试: {}", last);
                }
            }
        }
        Commands::Links => {
            let resp = client::send_request(&socket, IpcRequest::Links).await?;
            if let IpcResponse::Links { links } = resp {
                if links.is_empty() {
                    println!("   没有活动链路");
                } else {
                    for (i, link) in links.iter().enumerate() {
                        println!(
                            "   [{}] {} {}{} ({:?})",
                            i,
                            link.class,
                            link.address,
                            if link.random { " (random)" } else { "" },
                            link.state
                        );
                    }
                }
            }
        }
        Commands::Handover => {
            println!("🔀 发起切换...");
            let resp = client::send_request(&socket, IpcRequest::Handover).await?;
            if let IpcResponse::Report { report } = resp {
                println!("✅ 切换完成，本机现在是 {}", report.role);
                println!(
                    "   {} 条链路, {} 条记录, {} 帧, {} 字节, 耗时 {}ms",
                    report.links.len(),
                    report.records,
                    report.frames,
                    report.bytes,
                    report.elapsed_ms
                );
            }
        }
        Commands::Calibrate { state } => {
            let active = matches!(state, Toggle::On);
            client::send_request(&socket, IpcRequest::Calibrate { active }).await?;
        }
        Commands::Link { action } => match action {
            LinkAction::Set {
                class,
                address,
                random,
                state,
            } => {
                let link = LinkInfo {
                    class: class.into(),
                    address,
                    random,
                    state: state.into(),
                };
                client::send_request(&socket, IpcRequest::SetLink { link }).await?;
            }
            LinkAction::Drop {
                class,
                address,
                random,
            } => {
                client::send_request(
                    &socket,
                    IpcRequest::DropLink {
                        class: class.into(),
                        address,
                        random,
                    },
                )
                .await?;
            }
        },
    }

    Ok(())
}
