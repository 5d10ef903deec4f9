//! 链路枚举
//!
//! 协调器只在尝试开始时读取一次快照，之后不再假设链路集合会变化。

use super::{ConnectionState, Link, LinkKey};
use std::sync::{Arc, RwLock};

/// 活动链路的提供者 (通常是连接管理器)
pub trait LinkEnumerator: Send + Sync {
    /// 按连接建立顺序返回当前所有活动链路
    fn active_links(&self) -> Vec<Link>;
}

/// 共享的内存链路表
///
/// 守护进程和测试用它代替真实的连接管理器。克隆出的句柄共享同一张表。
#[derive(Debug, Clone, Default)]
pub struct LinkTable {
    links: Arc<RwLock<Vec<Link>>>,
}

impl LinkTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_links(links: impl IntoIterator<Item = Link>) -> Self {
        let table = Self::new();
        for link in links {
            table.upsert(link);
        }
        table
    }

    /// 添加链路；若同一链路已存在则更新其状态
    pub fn upsert(&self, link: Link) {
        let mut links = self.links.write().unwrap_or_else(|e| e.into_inner());
        match links.iter_mut().find(|l| l.key() == link.key()) {
            Some(existing) => existing.state = link.state,
            None => links.push(link),
        }
    }

    /// 移除链路，返回是否存在
    pub fn remove(&self, key: &LinkKey) -> bool {
        let mut links = self.links.write().unwrap_or_else(|e| e.into_inner());
        let before = links.len();
        links.retain(|l| l.key() != *key);
        links.len() != before
    }

    pub fn set_state(&self, key: &LinkKey, state: ConnectionState) -> bool {
        let mut links = self.links.write().unwrap_or_else(|e| e.into_inner());
        match links.iter_mut().find(|l| l.key() == *key) {
            Some(link) => {
                link.state = state;
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.links.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl LinkEnumerator for LinkTable {
    fn active_links(&self) -> Vec<Link> {
        self.links.read().unwrap_or_else(|e| e.into_inner()).clone()
    }
}
