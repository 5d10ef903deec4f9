//! TCP 传输
//!
//! 每条消息用 bincode 编码，外面再套一层 4 字节大端长度前缀。

use super::{PeerMessage, Transport, TransportError};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio_util::bytes::Bytes;
use tokio_util::codec::{Framed, LengthDelimitedCodec};

/// 单条消息上限
const MAX_MESSAGE_LEN: usize = 4 * 1024 * 1024;

pub struct TcpTransport {
    framed: Framed<TcpStream, LengthDelimitedCodec>,
    peer: Option<SocketAddr>,
}

impl TcpTransport {
    pub fn new(stream: TcpStream) -> Self {
        let peer = stream.peer_addr().ok();
        // 帧往返延迟敏感，关闭 Nagle
        if let Err(e) = stream.set_nodelay(true) {
            log::debug!("set_nodelay failed: {e}");
        }
        let codec = LengthDelimitedCodec::builder()
            .max_frame_length(MAX_MESSAGE_LEN)
            .new_codec();
        Self {
            framed: Framed::new(stream, codec),
            peer,
        }
    }

    pub async fn connect(addr: impl ToSocketAddrs) -> Result<Self, TransportError> {
        let stream = TcpStream::connect(addr).await?;
        Ok(Self::new(stream))
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }
}

impl std::fmt::Debug for TcpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpTransport")
            .field("peer", &self.peer)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn send(&mut self, message: PeerMessage) -> Result<(), TransportError> {
        let data = bincode::serialize(&message)
            .map_err(|e| TransportError::Serialization(e.to_string()))?;
        self.framed.send(Bytes::from(data)).await?;
        Ok(())
    }

    async fn recv(&mut self) -> Result<PeerMessage, TransportError> {
        match self.framed.next().await {
            Some(frame) => {
                let frame = frame?;
                bincode::deserialize(&frame)
                    .map_err(|e| TransportError::Serialization(e.to_string()))
            }
            None => Err(TransportError::Closed),
        }
    }
}
