//! 一次切换尝试的上下文
//!
//! 尝试在触发时创建，完成或中止后销毁，从不持久化。

use super::Role;
use crate::link::{Link, LinkClass, LinkKey};
use crate::registry::{ComponentId, DecodedObject, TypeEntry};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::time::Instant;
use uuid::Uuid;

/// 尝试所处阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    /// 取链路快照
    Setup,
    Veto,
    /// StartReq / StartCfm
    Negotiate,
    Marshal,
    Transfer,
    Unmarshal,
    /// 等待对端确认或 CommitInd
    AwaitCommit,
    Commit,
    Complete,
    Aborted,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Setup => "setup",
            Phase::Veto => "veto",
            Phase::Negotiate => "negotiate",
            Phase::Marshal => "marshal",
            Phase::Transfer => "transfer",
            Phase::Unmarshal => "unmarshal",
            Phase::AwaitCommit => "await-commit",
            Phase::Commit => "commit",
            Phase::Complete => "complete",
            Phase::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

/// 解码对象的去向统计
///
/// 任何时候都满足 `decoded == released + adopted + 仍由协调器持有的数量`，
/// 尝试结束时后者为 0。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnershipStats {
    pub decoded: usize,
    /// 由协调器释放 (Retained / Failure / 中止时未投递)
    pub released: usize,
    /// 被组件接管
    pub adopted: usize,
}

impl OwnershipStats {
    pub fn is_balanced(&self) -> bool {
        self.decoded == self.released + self.adopted
    }
}

/// 成功尝试的摘要
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptReport {
    pub attempt_id: Uuid,
    /// 提交后本端的角色
    pub role: Role,
    pub links: Vec<LinkKey>,
    pub records: usize,
    pub bytes: usize,
    pub frames: usize,
    pub ownership: OwnershipStats,
    pub elapsed_ms: u64,
}

/// 等待 Unmarshal 的解码对象
pub(crate) struct Inbound {
    pub link: usize,
    pub entry: TypeEntry,
    pub object: DecodedObject,
}

/// 尝试上下文，贯穿各个阶段
pub struct Attempt {
    pub(crate) id: Uuid,
    /// 提交后本端将成为的角色
    pub(crate) target: Role,
    pub(crate) links: Vec<Link>,
    pub(crate) phase: Phase,
    /// 执行过 Marshal 或 Unmarshal 的组件，中止时只通知它们
    pub(crate) participants: BTreeSet<ComponentId>,
    pub(crate) inbound: Vec<Inbound>,
    /// 对端已接受 StartReq，中止时需要通知
    pub(crate) peer_engaged: bool,
    pub(crate) records: usize,
    pub(crate) bytes: usize,
    pub(crate) frames: usize,
    pub(crate) ownership: OwnershipStats,
    started: Instant,
}

impl Attempt {
    pub(crate) fn new(id: Uuid, target: Role, links: Vec<Link>) -> Self {
        Self {
            id,
            target,
            links,
            phase: Phase::Setup,
            participants: BTreeSet::new(),
            inbound: Vec::new(),
            peer_engaged: false,
            records: 0,
            bytes: 0,
            frames: 0,
            ownership: OwnershipStats::default(),
            started: Instant::now(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn links(&self) -> &[Link] {
        &self.links
    }

    pub fn participants(&self) -> impl Iterator<Item = ComponentId> + '_ {
        self.participants.iter().copied()
    }

    pub fn ownership(&self) -> OwnershipStats {
        self.ownership
    }

    /// 该链路是否为快照中其类别的第一条 (GENERIC 类型只随它传输)
    pub(crate) fn is_first_of_class(&self, index: usize) -> bool {
        let class: LinkClass = self.links[index].class;
        self.links.iter().position(|l| l.class == class) == Some(index)
    }

    pub(crate) fn link_index(&self, key: &LinkKey) -> Option<usize> {
        self.links.iter().position(|l| l.key() == *key)
    }

    /// 释放所有尚未投递的解码对象
    pub(crate) fn release_inbound(&mut self) {
        self.ownership.released += self.inbound.len();
        self.inbound.clear();
    }

    pub(crate) fn report(&self, role: Role) -> AttemptReport {
        AttemptReport {
            attempt_id: self.id,
            role,
            links: self.links.iter().map(Link::key).collect(),
            records: self.records,
            bytes: self.bytes,
            frames: self.frames,
            ownership: self.ownership,
            elapsed_ms: u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX),
        }
    }
}

impl fmt::Debug for Attempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Attempt")
            .field("id", &self.id)
            .field("target", &self.target)
            .field("phase", &self.phase)
            .field("links", &self.links.len())
            .field("participants", &self.participants)
            .field("inbound", &self.inbound.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::{BdAddr, TypedBdAddr};

    #[test]
    fn test_first_of_class_per_class() {
        let links = vec![
            Link::le(TypedBdAddr::random(BdAddr::new([9; 6]))),
            Link::bredr(BdAddr::new([1; 6])),
            Link::bredr(BdAddr::new([2; 6])),
            Link::le(TypedBdAddr::public(BdAddr::new([3; 6]))),
        ];
        let attempt = Attempt::new(Uuid::nil(), Role::Secondary, links);

        let firsts: Vec<bool> = (0..4).map(|i| attempt.is_first_of_class(i)).collect();
        assert_eq!(firsts, vec![true, true, false, false]);
    }

    #[test]
    fn test_release_inbound_keeps_stats_balanced() {
        let mut attempt = Attempt::new(Uuid::nil(), Role::Primary, Vec::new());
        attempt.ownership.decoded = 3;
        attempt.ownership.adopted = 1;
        attempt.ownership.released = 2;
        attempt.release_inbound();
        assert!(attempt.ownership().is_balanced());
        assert_eq!(attempt.phase(), Phase::Setup);
    }
}
