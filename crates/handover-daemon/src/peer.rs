//! Peer Listener - 接受对端协调器的连接
//!
//! 每个连接的第一条消息必须是 StartReq；之后整条连接交给服务处理。

use crate::service::ServiceHandle;
use anyhow::Result;
use handover_core::{PeerMessage, TcpTransport, Transport};
use tokio::net::{TcpListener, TcpStream};

pub async fn run_peer_listener(addr: String, service: ServiceHandle) -> Result<()> {
    let listener = TcpListener::bind(&addr).await?;
    serve(listener, service).await
}

pub async fn serve(listener: TcpListener, service: ServiceHandle) -> Result<()> {
    tracing::info!("对端监听已启动: {:?}", listener.local_addr()?);

    loop {
        match listener.accept().await {
            Ok((stream, remote)) => {
                tracing::debug!("对端连接: {}", remote);
                let service = service.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_peer(stream, service).await {
                        tracing::warn!("对端连接 {} 出错: {}", remote, e);
                    }
                });
            }
            Err(e) => {
                tracing::warn!("接受连接失败: {}", e);
            }
        }
    }
}

async fn handle_peer(stream: TcpStream, service: ServiceHandle) -> Result<()> {
    let mut transport = TcpTransport::new(stream);
    let request = transport.recv().await?;

    if !matches!(request, PeerMessage::StartReq { .. }) {
        tracing::warn!("忽略连接上的首条消息: {}", request.kind());
        return Ok(());
    }

    service.peer(request, transport).await
}
