//! 进程内传输 (tokio mpsc)

use super::{PeerMessage, Transport, TransportError};
use async_trait::async_trait;
use tokio::sync::mpsc;

/// 进程内的一端
#[derive(Debug)]
pub struct ChannelTransport {
    tx: mpsc::Sender<PeerMessage>,
    rx: mpsc::Receiver<PeerMessage>,
}

impl ChannelTransport {
    /// 创建一对互相连通的端点
    pub fn pair() -> (Self, Self) {
        Self::pair_with_capacity(64)
    }

    pub fn pair_with_capacity(capacity: usize) -> (Self, Self) {
        let (a_tx, b_rx) = mpsc::channel(capacity);
        let (b_tx, a_rx) = mpsc::channel(capacity);
        (
            Self { tx: a_tx, rx: a_rx },
            Self { tx: b_tx, rx: b_rx },
        )
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn send(&mut self, message: PeerMessage) -> Result<(), TransportError> {
        self.tx
            .send(message)
            .await
            .map_err(|_| TransportError::Closed)
    }

    async fn recv(&mut self) -> Result<PeerMessage, TransportError> {
        self.rx.recv().await.ok_or(TransportError::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_pair_is_bidirectional() {
        let (mut a, mut b) = ChannelTransport::pair();
        let attempt = Uuid::new_v4();

        a.send(PeerMessage::CommitInd { attempt }).await.unwrap();
        assert_eq!(b.recv().await.unwrap(), PeerMessage::CommitInd { attempt });

        b.send(PeerMessage::UnmarshalCfm { attempt, ok: true })
            .await
            .unwrap();
        assert_eq!(
            a.recv().await.unwrap(),
            PeerMessage::UnmarshalCfm { attempt, ok: true }
        );
    }

    #[tokio::test]
    async fn test_drop_closes_peer() {
        let (mut a, b) = ChannelTransport::pair();
        drop(b);
        assert!(matches!(a.recv().await, Err(TransportError::Closed)));
        assert!(matches!(
            a.send(PeerMessage::CommitInd {
                attempt: Uuid::nil()
            })
            .await,
            Err(TransportError::Closed)
        ));
    }
}
