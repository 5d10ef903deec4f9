//! 尝试观察者
//!
//! 协调器在阶段切换、完成和中止时回调，供守护进程记录或推送给界面。

use super::HandoverError;
use super::attempt::{AttemptReport, Phase};
use tokio::sync::mpsc;
use uuid::Uuid;

/// 尝试进度回调
pub trait AttemptObserver: Send + Sync {
    /// 进入新阶段
    fn on_phase(&self, attempt: Uuid, phase: Phase);
    /// 尝试成功提交
    fn on_complete(&self, report: &AttemptReport);
    /// 尝试中止
    fn on_abort(&self, attempt: Uuid, error: &HandoverError);
}

/// 基于 channel 的观察者
pub struct ChannelObserver {
    tx: mpsc::Sender<AttemptEvent>,
}

#[derive(Debug, Clone)]
pub enum AttemptEvent {
    Phase { attempt: Uuid, phase: Phase },
    Complete(AttemptReport),
    Aborted { attempt: Uuid, reason: String },
}

impl ChannelObserver {
    pub fn new() -> (Self, mpsc::Receiver<AttemptEvent>) {
        let (tx, rx) = mpsc::channel(64);
        (Self { tx }, rx)
    }
}

impl AttemptObserver for ChannelObserver {
    fn on_phase(&self, attempt: Uuid, phase: Phase) {
        let _ = self.tx.try_send(AttemptEvent::Phase { attempt, phase });
    }

    fn on_complete(&self, report: &AttemptReport) {
        let _ = self.tx.try_send(AttemptEvent::Complete(report.clone()));
    }

    fn on_abort(&self, attempt: Uuid, error: &HandoverError) {
        let _ = self.tx.try_send(AttemptEvent::Aborted {
            attempt,
            reason: error.to_string(),
        });
    }
}
