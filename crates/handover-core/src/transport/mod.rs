//! 对端传输
//!
//! 协调器只要求一条可靠、有序的双向消息通道。
//! [`ChannelTransport`] 用于进程内和测试，[`TcpTransport`] 用于两台设备之间。

pub mod channel;
pub mod tcp;

pub use channel::ChannelTransport;
pub use tcp::TcpTransport;

use crate::link::{Link, LinkKey};
use crate::registry::CatalogFingerprint;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// StartReq 的应答状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StartStatus {
    Accepted,
    /// 对端有组件否决
    Vetoed,
    /// 两端类型目录不一致
    BuildMismatch,
    /// 对端不是 Secondary
    WrongRole,
    /// StartReq 本身不合法 (如链路重复)
    Malformed,
}

/// 两个协调器之间交换的消息
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PeerMessage {
    StartReq {
        attempt: Uuid,
        fingerprint: CatalogFingerprint,
        links: Vec<Link>,
    },
    StartCfm {
        attempt: Uuid,
        status: StartStatus,
    },
    /// 一条链路的一帧记录；`last` 表示该链路的数据到此结束
    MarshalData {
        attempt: Uuid,
        link: LinkKey,
        frame: Vec<u8>,
        last: bool,
    },
    UnmarshalCfm {
        attempt: Uuid,
        ok: bool,
    },
    CommitInd {
        attempt: Uuid,
    },
    CancelInd {
        attempt: Uuid,
        reason: String,
    },
}

impl PeerMessage {
    pub fn attempt(&self) -> Uuid {
        match self {
            PeerMessage::StartReq { attempt, .. }
            | PeerMessage::StartCfm { attempt, .. }
            | PeerMessage::MarshalData { attempt, .. }
            | PeerMessage::UnmarshalCfm { attempt, .. }
            | PeerMessage::CommitInd { attempt }
            | PeerMessage::CancelInd { attempt, .. } => *attempt,
        }
    }

    /// 用于日志的消息名
    pub fn kind(&self) -> &'static str {
        match self {
            PeerMessage::StartReq { .. } => "StartReq",
            PeerMessage::StartCfm { .. } => "StartCfm",
            PeerMessage::MarshalData { .. } => "MarshalData",
            PeerMessage::UnmarshalCfm { .. } => "UnmarshalCfm",
            PeerMessage::CommitInd { .. } => "CommitInd",
            PeerMessage::CancelInd { .. } => "CancelInd",
        }
    }
}

/// 传输错误
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Peer closed the connection")]
    Closed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// 可靠、有序的对端消息通道
#[async_trait]
pub trait Transport: Send {
    async fn send(&mut self, message: PeerMessage) -> Result<(), TransportError>;

    async fn recv(&mut self) -> Result<PeerMessage, TransportError>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Box<T> {
    async fn send(&mut self, message: PeerMessage) -> Result<(), TransportError> {
        (**self).send(message).await
    }

    async fn recv(&mut self) -> Result<PeerMessage, TransportError> {
        (**self).recv().await
    }
}
