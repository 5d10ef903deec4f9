//! 测试用组件与辅助函数

#![allow(dead_code)]

use async_trait::async_trait;
use handover_core::registry::TypeEntry;
use handover_core::{
    Applicability, BdAddr, BredrLinkVeto, CoordinatorConfig, DecodedObject, HandoverComponent,
    HandoverCoordinator, LeLinkVeto, Link, LinkTable, Marshalled, PeerMessage, Registry, Role,
    Transport, TransportError, TypeDescriptor, TypedBdAddr, UnmarshalOutcome,
};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// 组件调用记录，组件移入注册表后仍可读取
#[derive(Debug, Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
    pub fn push(&self, entry: String) {
        self.0.lock().unwrap().push(entry);
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    /// 含有给定片段的记录数
    pub fn count(&self, needle: &str) -> usize {
        self.entries().iter().filter(|e| e.contains(needle)).count()
    }
}

/// 每条链路一份的会话状态
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub handle: u16,
    pub peer: String,
}

/// 解码后的处理方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    Retain,
    Adopt,
    Fail,
}

/// 可配置的记录组件
pub struct Recorder {
    name: &'static str,
    applicability: Applicability,
    journal: Journal,
    session: Option<TypeDescriptor>,
    profile: Option<(TypeDescriptor, String)>,
    /// 从第 n 次 veto 调用起否决 (从 1 计)
    veto_from: Option<usize>,
    veto_calls: AtomicUsize,
    blocked_bredr: Option<BdAddr>,
    blocked_le: Option<TypedBdAddr>,
    reply: Reply,
    adopted: Arc<Mutex<Vec<Session>>>,
}

impl Recorder {
    pub fn new(name: &'static str, applicability: Applicability, journal: &Journal) -> Self {
        Self {
            name,
            applicability,
            journal: journal.clone(),
            session: None,
            profile: None,
            veto_from: None,
            veto_calls: AtomicUsize::new(0),
            blocked_bredr: None,
            blocked_le: None,
            reply: Reply::Retain,
            adopted: Arc::default(),
        }
    }

    /// 声明一个 PER_INSTANCE 类型，Marshal 时为每条链路生成一个 [`Session`]
    pub fn with_session(mut self, type_name: &'static str) -> Self {
        self.session = Some(TypeDescriptor::per_instance::<Session>(type_name));
        self
    }

    /// 声明一个 GENERIC 类型
    pub fn with_profile(mut self, type_name: &'static str, value: &str) -> Self {
        self.profile = Some((TypeDescriptor::generic::<String>(type_name), value.to_string()));
        self
    }

    pub fn vetoing(self) -> Self {
        self.vetoing_from(1)
    }

    pub fn vetoing_from(mut self, call: usize) -> Self {
        self.veto_from = Some(call);
        self
    }

    pub fn blocking_bredr(mut self, addr: BdAddr) -> Self {
        self.blocked_bredr = Some(addr);
        self
    }

    pub fn blocking_le(mut self, addr: TypedBdAddr) -> Self {
        self.blocked_le = Some(addr);
        self
    }

    pub fn replying(mut self, reply: Reply) -> Self {
        self.reply = reply;
        self
    }

    pub fn adopted(&self) -> Arc<Mutex<Vec<Session>>> {
        self.adopted.clone()
    }

    fn log(&self, event: &str) {
        self.journal.push(format!("{}:{}", self.name, event));
    }
}

impl BredrLinkVeto for Recorder {
    fn veto_bredr_link(&self, addr: &BdAddr) -> bool {
        self.blocked_bredr.as_ref() == Some(addr)
    }
}

impl LeLinkVeto for Recorder {
    fn veto_le_link(&self, addr: &TypedBdAddr) -> bool {
        self.blocked_le.as_ref() == Some(addr)
    }
}

impl HandoverComponent for Recorder {
    fn name(&self) -> &'static str {
        self.name
    }

    fn applicability(&self) -> Applicability {
        self.applicability
    }

    fn types(&self) -> Vec<TypeDescriptor> {
        let mut types = Vec::new();
        types.extend(self.session);
        types.extend(self.profile.as_ref().map(|(d, _)| *d));
        types
    }

    fn veto(&self, _link: Option<&Link>) -> bool {
        self.log("veto");
        let call = self.veto_calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.veto_from.is_some_and(|from| call >= from)
    }

    fn bredr_link_veto(&self) -> Option<&dyn BredrLinkVeto> {
        self.blocked_bredr.map(|_| self as &dyn BredrLinkVeto)
    }

    fn le_link_veto(&self) -> Option<&dyn LeLinkVeto> {
        self.blocked_le.map(|_| self as &dyn LeLinkVeto)
    }

    fn marshal(&self, link: &Link, ty: &TypeEntry) -> Option<Marshalled<'_>> {
        self.log(&format!("marshal({})", ty.name()));
        match &self.profile {
            Some((descriptor, value)) if ty.is(descriptor) => {
                return Some(Marshalled::Borrowed(value));
            }
            _ => {}
        }
        Some(Marshalled::Owned(Box::new(Session {
            handle: u16::from(link.bd_addr().0[5]),
            peer: link.bd_addr().to_string(),
        })))
    }

    fn unmarshal(
        &mut self,
        _link: &Link,
        ty: &TypeEntry,
        object: DecodedObject,
    ) -> UnmarshalOutcome {
        self.log(&format!("unmarshal({})", ty.name()));
        match self.reply {
            Reply::Fail => UnmarshalOutcome::Failure(object),
            Reply::Retain => UnmarshalOutcome::Retained(object),
            Reply::Adopt => match object.downcast::<Session>() {
                Ok(session) => {
                    self.adopted.lock().unwrap().push(*session);
                    UnmarshalOutcome::Adopted
                }
                // 非会话类型 (如 profile) 仅复制
                Err(object) => UnmarshalOutcome::Retained(object),
            },
        }
    }

    fn commit(&mut self, is_primary: bool) {
        self.log(&format!("commit({is_primary})"));
    }

    fn abort(&mut self) {
        self.log("abort");
    }
}

pub fn registry(components: Vec<Recorder>) -> Registry {
    components
        .into_iter()
        .fold(Registry::builder(), |builder, c| builder.register(c))
        .build()
        .unwrap()
}

pub fn config() -> CoordinatorConfig {
    CoordinatorConfig {
        attempt_timeout: Duration::from_secs(2),
        cancel_grace: Duration::from_millis(100),
        ..CoordinatorConfig::default()
    }
}

pub fn bredr(last: u8) -> Link {
    Link::bredr(BdAddr::new([0x00, 0x1A, 0x7D, 0xDA, 0x71, last]))
}

pub fn le_random(last: u8) -> Link {
    Link::le(TypedBdAddr::random(BdAddr::new([0xC0, 0xFF, 0xEE, 0x00, 0x00, last])))
}

pub fn primary(
    registry: Registry,
    links: Vec<Link>,
    config: CoordinatorConfig,
) -> HandoverCoordinator {
    HandoverCoordinator::new(
        registry,
        Arc::new(LinkTable::with_links(links)),
        Role::Primary,
        config,
    )
}

pub fn secondary(registry: Registry, config: CoordinatorConfig) -> HandoverCoordinator {
    HandoverCoordinator::new(registry, Arc::new(LinkTable::new()), Role::Secondary, config)
}

/// 发送 CommitInd 前先停顿一段时间的传输，模拟写缓冲拥塞
pub struct SlowCommit<T> {
    inner: T,
    delay: Duration,
}

impl<T> SlowCommit<T> {
    pub fn new(inner: T, delay: Duration) -> Self {
        Self { inner, delay }
    }
}

#[async_trait]
impl<T: Transport> Transport for SlowCommit<T> {
    async fn send(&mut self, message: PeerMessage) -> Result<(), TransportError> {
        if matches!(message, PeerMessage::CommitInd { .. }) {
            tokio::time::sleep(self.delay).await;
        }
        self.inner.send(message).await
    }

    async fn recv(&mut self) -> Result<PeerMessage, TransportError> {
        self.inner.recv().await
    }
}
