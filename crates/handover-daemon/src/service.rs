//! Core Service - 协调器 actor
//!
//! 协调器只能同时进行一次尝试，因此由单个任务独占。IPC 请求和对端连接
//! 都以命令的形式排队进入这里，按到达顺序处理。

use anyhow::{Result, anyhow};
use handover_core::ipc::{DaemonStatus, IpcRequest, IpcResponse, LinkInfo, link_key};
use handover_core::{
    AttemptObserver, AttemptReport, HandoverCoordinator, HandoverError, HandoverSettings,
    LinkEnumerator, LinkTable, PeerMessage, Phase, TcpTransport,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

pub enum Command {
    Ipc {
        request: IpcRequest,
        reply: oneshot::Sender<IpcResponse>,
    },
    /// 对端发来的 StartReq，连同它所在的连接
    Peer {
        request: PeerMessage,
        transport: TcpTransport,
    },
}

/// 向服务提交命令的句柄
#[derive(Clone)]
pub struct ServiceHandle {
    tx: mpsc::Sender<Command>,
}

impl ServiceHandle {
    pub async fn request(&self, request: IpcRequest) -> IpcResponse {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(Command::Ipc { request, reply }).await.is_err() {
            return IpcResponse::Error {
                message: "服务已停止".to_string(),
            };
        }
        rx.await.unwrap_or_else(|_| IpcResponse::Error {
            message: "服务未返回结果".to_string(),
        })
    }

    pub async fn peer(&self, request: PeerMessage, transport: TcpTransport) -> Result<()> {
        self.tx
            .send(Command::Peer { request, transport })
            .await
            .map_err(|_| anyhow!("服务已停止"))
    }
}

pub struct Service {
    coordinator: HandoverCoordinator,
    links: LinkTable,
    settings: HandoverSettings,
    /// 与 `SensorFusion` 共享的校准标志
    calibrating: Arc<AtomicBool>,
    last_attempt: Option<String>,
    rx: mpsc::Receiver<Command>,
}

impl Service {
    pub fn new(
        coordinator: HandoverCoordinator,
        links: LinkTable,
        settings: HandoverSettings,
        calibrating: Arc<AtomicBool>,
    ) -> (Self, ServiceHandle) {
        let (tx, rx) = mpsc::channel(16);
        let service = Self {
            coordinator,
            links,
            settings,
            calibrating,
            last_attempt: None,
            rx,
        };
        (service, ServiceHandle { tx })
    }

    /// 处理命令直到所有句柄被丢弃，或出现致命错误
    pub async fn run(mut self) -> Result<()> {
        tracing::info!(
            "核心服务已启动: {} ({})",
            self.settings.device_name,
            self.coordinator.role()
        );

        while let Some(command) = self.rx.recv().await {
            match command {
                Command::Ipc { request, reply } => {
                    tracing::debug!("收到请求: {:?}", request);
                    let (response, fatal) = self.handle_ipc(request).await;
                    let _ = reply.send(response);
                    if let Some(error) = fatal {
                        return Err(error.into());
                    }
                }
                Command::Peer {
                    request,
                    mut transport,
                } => {
                    tracing::info!("对端 {:?} 请求切换", transport.peer_addr());
                    let result = self.coordinator.respond(request, &mut transport).await;
                    if let Some(error) = self.record(result) {
                        return Err(error.into());
                    }
                }
            }
        }

        tracing::info!("核心服务退出");
        Ok(())
    }

    /// 返回响应，以及需要让守护进程停止的错误
    async fn handle_ipc(&mut self, request: IpcRequest) -> (IpcResponse, Option<HandoverError>) {
        let response = match request {
            IpcRequest::Status => IpcResponse::Status(self.status()),
            IpcRequest::Links => IpcResponse::Links {
                links: self
                    .links
                    .active_links()
                    .iter()
                    .map(LinkInfo::from)
                    .collect(),
            },
            IpcRequest::Handover => return self.handover().await,
            IpcRequest::SetLink { link } => match link.to_link() {
                Ok(link) => {
                    tracing::info!("更新链路: {} ({:?})", link.key(), link.state);
                    self.links.upsert(link);
                    IpcResponse::Ok {
                        message: "链路已更新".to_string(),
                    }
                }
                Err(e) => IpcResponse::Error {
                    message: e.to_string(),
                },
            },
            IpcRequest::DropLink {
                class,
                address,
                random,
            } => match link_key(class, &address, random) {
                Ok(key) if self.links.remove(&key) => {
                    tracing::info!("移除链路: {}", key);
                    IpcResponse::Ok {
                        message: "链路已移除".to_string(),
                    }
                }
                Ok(key) => IpcResponse::Error {
                    message: format!("No such link: {key}"),
                },
                Err(e) => IpcResponse::Error {
                    message: e.to_string(),
                },
            },
            IpcRequest::Calibrate { active } => {
                self.calibrating.store(active, Ordering::SeqCst);
                tracing::info!("传感器校准: {}", if active { "开始" } else { "结束" });
                IpcResponse::Ok {
                    message: if active { "校准中，切换将被否决" } else { "校准结束" }.to_string(),
                }
            }
        };
        (response, None)
    }

    async fn handover(&mut self) -> (IpcResponse, Option<HandoverError>) {
        let Some(endpoint) = self.settings.peer_endpoint.clone() else {
            return (
                IpcResponse::Error {
                    message: "未配置 peer_endpoint".to_string(),
                },
                None,
            );
        };

        tracing::info!("连接对端 {}", endpoint);
        let limit = self.coordinator.config().attempt_timeout;
        let result = match tokio::time::timeout(limit, TcpTransport::connect(endpoint.as_str())).await
        {
            Ok(Ok(mut transport)) => self.coordinator.initiate(&mut transport).await,
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Err(HandoverError::Timeout(limit)),
        };

        match result {
            Ok(report) => {
                self.record(Ok(report.clone()));
                (IpcResponse::Report { report }, None)
            }
            Err(error) => {
                let response = IpcResponse::Error {
                    message: error.to_string(),
                };
                (response, self.record(Err(error)))
            }
        }
    }

    /// 记录尝试结果；致命错误原样返回
    fn record(&mut self, result: Result<AttemptReport, HandoverError>) -> Option<HandoverError> {
        match result {
            Ok(report) => {
                self.last_attempt = Some(format!("{} completed as {}", report.attempt_id, report.role));
                None
            }
            Err(error) if error.is_fatal() => {
                tracing::error!("致命错误，守护进程将停止: {}", error);
                self.last_attempt = Some(format!("fatal: {error}"));
                Some(error)
            }
            Err(error) => {
                if error.is_veto() {
                    tracing::info!("切换被否决: {}", error);
                } else {
                    tracing::warn!("切换失败: {}", error);
                }
                self.last_attempt = Some(format!("aborted: {error}"));
                None
            }
        }
    }

    fn status(&self) -> DaemonStatus {
        let registry = self.coordinator.registry();
        DaemonStatus {
            device_name: self.settings.device_name.clone(),
            role: self.coordinator.role(),
            components: registry.names().into_iter().map(String::from).collect(),
            types: registry.catalog().len(),
            fingerprint: registry.catalog().fingerprint().to_string(),
            last_attempt: self.last_attempt.clone(),
        }
    }
}

/// 把尝试进度写入日志
pub struct LogObserver;

impl AttemptObserver for LogObserver {
    fn on_phase(&self, attempt: Uuid, phase: Phase) {
        tracing::debug!("[{}] -> {}", attempt, phase);
    }

    fn on_complete(&self, report: &AttemptReport) {
        tracing::info!(
            "✅ 切换完成 [{}]: {} 条链路, {} 条记录, {} 字节, 耗时 {}ms, 现在是 {}",
            report.attempt_id,
            report.links.len(),
            report.records,
            report.bytes,
            report.elapsed_ms,
            report.role
        );
    }

    fn on_abort(&self, attempt: Uuid, error: &HandoverError) {
        tracing::warn!("❌ 切换中止 [{}]: {}", attempt, error);
    }
}
