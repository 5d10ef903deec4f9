//! 切换协调器
//!
//! 在两端驱动一次尝试的各个阶段：
//!
//! ```text
//! Primary                                   Secondary
//!   snapshot / self-veto / veto
//!   StartReq  ───────────────────────────▶  fingerprint / role / veto
//!             ◀───────────────────────────  StartCfm
//!   marshal   ── MarshalData × N ────────▶  decode
//!                                           unmarshal
//!             ◀───────────────────────────  UnmarshalCfm
//!   veto (re-check)
//!   CommitInd ───────────────────────────▶  commit(true)
//!   commit(false)
//! ```
//!
//! 协调器独占注册表，一次只运行一个尝试。提交之前的任何失败都会中止尝试，
//! 两端保持原角色；提交本身不可取消。

pub mod attempt;
pub mod observer;
mod primary;
mod secondary;

pub use attempt::{Attempt, AttemptReport, OwnershipStats, Phase};
pub use observer::{AttemptEvent, AttemptObserver, ChannelObserver};

use crate::codec::CodecError;
use crate::link::{BdAddr, Link, LinkClass, LinkEnumerator, LinkKey};
use crate::registry::{
    Applicability, CatalogFingerprint, ComponentId, HandoverComponent, MarshalTypeId, Registry,
};
use crate::transport::{PeerMessage, StartStatus, Transport, TransportError};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// 进程级角色，只有在 Commit 送达所有组件后才生效
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    Primary,
    Secondary,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Primary => f.write_str("primary"),
            Role::Secondary => f.write_str("secondary"),
        }
    }
}

/// 协调器参数
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// 单帧上限 (字节)
    pub max_frame_size: usize,
    /// 监督定时器：整个尝试 (提交前) 的时限
    pub attempt_timeout: Duration,
    /// 中止时通知对端的宽限时间
    pub cancel_grace: Duration,
    /// 是否允许 LE 链路参与切换
    pub le_handover: bool,
    /// 对端设备的 BR/EDR 地址，这条链路不参与切换
    pub peer_address: Option<BdAddr>,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            max_frame_size: 1024,
            attempt_timeout: Duration::from_secs(3),
            cancel_grace: Duration::from_millis(200),
            le_handover: true,
            peer_address: None,
        }
    }
}

/// 切换错误
///
/// 除提交时的不变量违规 (直接 panic) 外，所有错误都会转换为一次干净的中止。
#[derive(Debug, thiserror::Error)]
pub enum HandoverError {
    #[error("Coordinator is {0}, cannot take this part in a handover")]
    WrongRole(Role),

    #[error("Vetoed by '{component}'")]
    Vetoed {
        component: &'static str,
        link: Option<LinkKey>,
    },

    #[error("LE link {0} is active but LE handover is disabled")]
    LeHandoverDisabled(LinkKey),

    #[error("Peer rejected handover: {0:?}")]
    PeerRejected(StartStatus),

    #[error("Peer catalog {theirs} does not match local catalog {ours}")]
    BuildMismatch {
        ours: CatalogFingerprint,
        theirs: CatalogFingerprint,
    },

    #[error("Codec error on {link}: {source}")]
    Codec {
        link: LinkKey,
        #[source]
        source: CodecError,
    },

    #[error("Unknown type {type_id} received on {link}")]
    UnknownType { link: LinkKey, type_id: MarshalTypeId },

    #[error("'{component}' failed to unmarshal '{type_name}' on {link}")]
    UnmarshalFailed {
        component: &'static str,
        type_name: &'static str,
        link: LinkKey,
    },

    #[error("Peer failed to unmarshal")]
    PeerUnmarshalFailed,

    #[error("Peer cancelled: {0}")]
    PeerCancelled(String),

    #[error("Protocol violation: {0}")]
    Protocol(String),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Attempt timed out after {0:?}")]
    Timeout(Duration),
}

impl HandoverError {
    /// 构建不一致或程序缺陷，宿主进程应停止
    pub fn is_fatal(&self) -> bool {
        matches!(self, HandoverError::UnknownType { .. })
    }

    /// 是否为预期内的否决 (本端或对端)
    pub fn is_veto(&self) -> bool {
        matches!(
            self,
            HandoverError::Vetoed { .. }
                | HandoverError::LeHandoverDisabled(_)
                | HandoverError::PeerRejected(StartStatus::Vetoed)
        )
    }

    /// 对端是否已知晓本次失败 (无需再发送 CancelInd)
    fn peer_informed(&self) -> bool {
        matches!(
            self,
            HandoverError::PeerCancelled(_)
                | HandoverError::PeerUnmarshalFailed
                | HandoverError::PeerRejected(_)
                | HandoverError::Transport(TransportError::Closed)
        )
    }
}

/// 切换协调器
pub struct HandoverCoordinator {
    registry: Registry,
    links: Arc<dyn LinkEnumerator>,
    role: Role,
    config: CoordinatorConfig,
    observer: Option<Arc<dyn AttemptObserver>>,
}

impl HandoverCoordinator {
    pub fn new(
        registry: Registry,
        links: Arc<dyn LinkEnumerator>,
        role: Role,
        config: CoordinatorConfig,
    ) -> Self {
        info!(
            "Handover coordinator ready as {} ({} components, catalog {})",
            role,
            registry.len(),
            registry.catalog().fingerprint()
        );
        Self {
            registry,
            links,
            role,
            config,
            observer: None,
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn AttemptObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// 当前可参与切换的链路快照 (不含到对端设备本身的链路)
    pub fn snapshot(&self) -> Vec<Link> {
        let peer = self.config.peer_address;
        self.links
            .active_links()
            .into_iter()
            .filter(|link| !(link.class == LinkClass::BrEdr && Some(*link.bd_addr()) == peer))
            .collect()
    }

    fn enter(&self, attempt: &mut Attempt, phase: Phase) {
        debug!("Attempt {} -> {}", attempt.id, phase);
        attempt.phase = phase;
        if let Some(observer) = &self.observer {
            observer.on_phase(attempt.id, phase);
        }
    }

    /// 协调器自身的否决条件
    fn self_veto(&self, links: &[Link]) -> Result<(), HandoverError> {
        if self.config.le_handover {
            return Ok(());
        }
        match links.iter().find(|l| l.class == LinkClass::Le) {
            Some(link) => Err(HandoverError::LeHandoverDisabled(link.key())),
            None => Ok(()),
        }
    }

    /// 对所有组件执行否决
    ///
    /// 与链路无关的组件调用一次 `veto(None)`；其余组件对其类别的每条链路调用一次。
    /// 按链路的否决能力对该类别的每条链路求值。任何一处否决都中止整个尝试。
    fn veto_all(&self, links: &[Link]) -> Result<(), HandoverError> {
        for (_, component) in self.registry.iterate(None) {
            let applicability = component.applicability();
            if applicability == Applicability::LinkIndependent {
                if component.veto(None) {
                    return Err(vetoed(component, None));
                }
            } else {
                for link in links.iter().filter(|l| applicability.covers(l.class)) {
                    if component.veto(Some(link)) {
                        return Err(vetoed(component, Some(link)));
                    }
                }
            }

            for link in links {
                if link_vetoed(component, link) {
                    return Err(vetoed(component, Some(link)));
                }
            }
        }
        Ok(())
    }

    /// 按注册顺序向所有组件投递 Commit
    fn commit_all(&mut self, attempt: &mut Attempt) {
        assert_eq!(
            attempt.phase,
            Phase::Commit,
            "commit outside of the commit phase"
        );
        assert!(
            attempt.inbound.is_empty(),
            "decoded objects still held at commit"
        );
        assert!(
            attempt.ownership.is_balanced(),
            "ownership stats out of balance at commit: {:?}",
            attempt.ownership
        );

        let is_primary = attempt.target == Role::Primary;
        for index in 0..self.registry.len() {
            if let Some(component) = self.registry.component_mut(ComponentId(index)) {
                component.commit(is_primary);
            }
        }
        self.role = attempt.target;
    }

    /// 完成一次成功的尝试
    fn complete(&mut self, attempt: &mut Attempt) -> AttemptReport {
        self.enter(attempt, Phase::Commit);
        self.commit_all(attempt);
        self.enter(attempt, Phase::Complete);

        let report = attempt.report(self.role);
        info!(
            "Handover {} complete: now {} ({} links, {} records, {} bytes)",
            report.attempt_id,
            report.role,
            report.links.len(),
            report.records,
            report.bytes
        );
        if let Some(observer) = &self.observer {
            observer.on_complete(&report);
        }
        report
    }

    /// 中止：只通知参与过的组件，释放未投递的对象，必要时告知对端
    async fn abort<T>(&mut self, attempt: &mut Attempt, error: &HandoverError, transport: &mut T)
    where
        T: Transport + ?Sized,
    {
        if error.is_veto() {
            info!("Handover {} vetoed: {}", attempt.id, error);
        } else {
            warn!("Handover {} aborted in {}: {}", attempt.id, attempt.phase, error);
        }

        attempt.release_inbound();
        let participants: Vec<_> = attempt.participants().collect();
        for id in participants {
            if let Some(component) = self.registry.component_mut(id) {
                debug!("Abort -> {}", component.name());
                component.abort();
            }
        }
        self.enter(attempt, Phase::Aborted);
        if let Some(observer) = &self.observer {
            observer.on_abort(attempt.id, error);
        }

        if attempt.peer_engaged && !error.peer_informed() {
            let cancel = PeerMessage::CancelInd {
                attempt: attempt.id,
                reason: error.to_string(),
            };
            match tokio::time::timeout(self.config.cancel_grace, transport.send(cancel)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => debug!("CancelInd not delivered: {e}"),
                Err(_) => debug!("CancelInd timed out"),
            }
        }
    }
}

impl fmt::Debug for HandoverCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandoverCoordinator")
            .field("role", &self.role)
            .field("registry", &self.registry)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn vetoed(component: &dyn HandoverComponent, link: Option<&Link>) -> HandoverError {
    match link {
        Some(link) => debug!("'{}' vetoed {}", component.name(), link),
        None => debug!("'{}' vetoed", component.name()),
    }
    HandoverError::Vetoed {
        component: component.name(),
        link: link.map(Link::key),
    }
}

fn link_vetoed(component: &dyn HandoverComponent, link: &Link) -> bool {
    match link.class {
        LinkClass::BrEdr => component
            .bredr_link_veto()
            .is_some_and(|v| v.veto_bredr_link(link.bd_addr())),
        LinkClass::Le => component
            .le_link_veto()
            .is_some_and(|v| v.veto_le_link(&link.addr)),
    }
}

/// 检查消息是否属于本次尝试
fn expect_attempt(attempt: &Attempt, message: &PeerMessage) -> Result<(), HandoverError> {
    if message.attempt() == attempt.id {
        Ok(())
    } else {
        Err(HandoverError::Protocol(format!(
            "{} for attempt {} during attempt {}",
            message.kind(),
            message.attempt(),
            attempt.id
        )))
    }
}

fn unexpected(message: &PeerMessage, phase: Phase) -> HandoverError {
    HandoverError::Protocol(format!("unexpected {} in {}", message.kind(), phase))
}
