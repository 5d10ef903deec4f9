//! 演示组件
//!
//! 守护进程没有真实的协议栈，这里的几个组件模拟连接管理、音频流、
//! GATT 会话和传感器融合，让切换流程在两台主机之间可以完整跑通。

use handover_core::{
    Applicability, BdAddr, BredrLinkVeto, DecodedObject, HandoverComponent, LeLinkVeto, Link,
    Marshalled, Registry, RegistryError, TypeDescriptor, TypeEntry, TypedBdAddr,
    UnmarshalOutcome,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// 按注册顺序构建守护进程的注册表
///
/// 两端必须以相同顺序注册，类型目录指纹才会一致。
pub fn registry(calibrating: Arc<AtomicBool>) -> Result<Registry, RegistryError> {
    Registry::builder()
        .register(ConnectionTable::new())
        .register(AudioSession::new())
        .register(GattSessions::new())
        .register(SensorFusion::new(calibrating))
        .build()
}

// ============================================================================
// 连接管理
// ============================================================================

/// 一条 ACL 连接的状态
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AclRecord {
    pub handle: u16,
    pub central: bool,
    pub encrypted: bool,
    pub sniff_interval: u16,
}

impl AclRecord {
    fn for_link(link: &Link) -> Self {
        Self {
            handle: u16::from(link.bd_addr().0[5]) | 0x0100,
            central: true,
            encrypted: true,
            sniff_interval: 0,
        }
    }
}

/// BR/EDR 连接策略，每个类别只传一次
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkPolicy {
    pub page_timeout: u16,
    pub allow_role_switch: bool,
}

impl Default for LinkPolicy {
    fn default() -> Self {
        Self {
            page_timeout: 0x2000,
            allow_role_switch: false,
        }
    }
}

/// 连接管理器
///
/// 没有记录的链路在 Marshal 时按地址生成一份默认记录。
pub struct ConnectionTable {
    acl: TypeDescriptor,
    policy_type: TypeDescriptor,
    records: HashMap<BdAddr, AclRecord>,
    policy: LinkPolicy,
    incoming: HashMap<BdAddr, AclRecord>,
    incoming_policy: Option<LinkPolicy>,
}

impl Default for ConnectionTable {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionTable {
    pub fn new() -> Self {
        Self {
            acl: TypeDescriptor::per_instance::<AclRecord>("cm.acl"),
            policy_type: TypeDescriptor::generic::<LinkPolicy>("cm.policy"),
            records: HashMap::new(),
            policy: LinkPolicy::default(),
            incoming: HashMap::new(),
            incoming_policy: None,
        }
    }
}

impl HandoverComponent for ConnectionTable {
    fn name(&self) -> &'static str {
        "connection-table"
    }

    fn applicability(&self) -> Applicability {
        Applicability::BrEdr
    }

    fn types(&self) -> Vec<TypeDescriptor> {
        vec![self.acl, self.policy_type]
    }

    /// 连接或断开中的链路不能迁移
    fn veto(&self, link: Option<&Link>) -> bool {
        link.is_some_and(|link| !link.state.is_settled())
    }

    fn marshal(&self, link: &Link, ty: &TypeEntry) -> Option<Marshalled<'_>> {
        if ty.is(&self.policy_type) {
            return Some(Marshalled::Borrowed(&self.policy));
        }
        match self.records.get(link.bd_addr()) {
            Some(record) => Some(Marshalled::Borrowed(record)),
            None => Some(Marshalled::Owned(Box::new(AclRecord::for_link(link)))),
        }
    }

    fn unmarshal(
        &mut self,
        link: &Link,
        ty: &TypeEntry,
        object: DecodedObject,
    ) -> UnmarshalOutcome {
        if ty.is(&self.policy_type) {
            return match object.downcast_ref::<LinkPolicy>() {
                Some(policy) => {
                    self.incoming_policy = Some(policy.clone());
                    UnmarshalOutcome::Retained(object)
                }
                None => UnmarshalOutcome::Failure(object),
            };
        }
        match object.downcast::<AclRecord>() {
            Ok(record) => {
                self.incoming.insert(*link.bd_addr(), *record);
                UnmarshalOutcome::Adopted
            }
            Err(object) => UnmarshalOutcome::Failure(object),
        }
    }

    fn commit(&mut self, is_primary: bool) {
        if is_primary {
            self.records.extend(self.incoming.drain());
            if let Some(policy) = self.incoming_policy.take() {
                self.policy = policy;
            }
        } else {
            // 链路已交给对端
            self.records.clear();
        }
        tracing::debug!("connection-table: {} ACL record(s) after commit", self.records.len());
    }

    fn abort(&mut self) {
        self.incoming.clear();
        self.incoming_policy = None;
    }
}

// ============================================================================
// 音频流
// ============================================================================

/// 媒体通道状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StreamState {
    Idle,
    Opening,
    Open,
    Streaming,
    Suspending,
}

impl StreamState {
    fn is_transient(self) -> bool {
        matches!(self, StreamState::Opening | StreamState::Suspending)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioStream {
    pub state: StreamState,
    pub codec: String,
    pub volume: u8,
}

/// 音频会话，只有存在媒体流的链路才会产生数据
pub struct AudioSession {
    stream_type: TypeDescriptor,
    streams: HashMap<BdAddr, AudioStream>,
    incoming: HashMap<BdAddr, AudioStream>,
}

impl Default for AudioSession {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioSession {
    pub fn new() -> Self {
        Self {
            stream_type: TypeDescriptor::per_instance::<AudioStream>("audio.stream"),
            streams: HashMap::new(),
            incoming: HashMap::new(),
        }
    }

    pub fn with_stream(mut self, addr: BdAddr, stream: AudioStream) -> Self {
        self.streams.insert(addr, stream);
        self
    }
}

impl BredrLinkVeto for AudioSession {
    fn veto_bredr_link(&self, addr: &BdAddr) -> bool {
        self.streams
            .get(addr)
            .is_some_and(|stream| stream.state.is_transient())
    }
}

impl HandoverComponent for AudioSession {
    fn name(&self) -> &'static str {
        "audio-session"
    }

    fn applicability(&self) -> Applicability {
        Applicability::BrEdr
    }

    fn types(&self) -> Vec<TypeDescriptor> {
        vec![self.stream_type]
    }

    fn veto(&self, _link: Option<&Link>) -> bool {
        false
    }

    fn bredr_link_veto(&self) -> Option<&dyn BredrLinkVeto> {
        Some(self)
    }

    fn marshal(&self, link: &Link, _ty: &TypeEntry) -> Option<Marshalled<'_>> {
        self.streams
            .get(link.bd_addr())
            .map(|stream| Marshalled::Borrowed(stream))
    }

    fn unmarshal(
        &mut self,
        link: &Link,
        _ty: &TypeEntry,
        object: DecodedObject,
    ) -> UnmarshalOutcome {
        match object.downcast::<AudioStream>() {
            Ok(stream) => {
                self.incoming.insert(*link.bd_addr(), *stream);
                UnmarshalOutcome::Adopted
            }
            Err(object) => UnmarshalOutcome::Failure(object),
        }
    }

    fn commit(&mut self, is_primary: bool) {
        if is_primary {
            self.streams.extend(self.incoming.drain());
        } else {
            self.streams.clear();
        }
    }

    fn abort(&mut self) {
        self.incoming.clear();
    }
}

// ============================================================================
// GATT 会话
// ============================================================================

/// 音频流端点 (ASE) 状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AseState {
    Idle,
    CodecConfigured,
    QosConfigured,
    Enabling,
    Streaming,
    Disabling,
    Releasing,
}

impl AseState {
    fn is_transient(self) -> bool {
        matches!(
            self,
            AseState::Enabling | AseState::Disabling | AseState::Releasing
        )
    }
}

/// 一个 GATT 客户端的服务端状态
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GattClient {
    pub mtu: u16,
    pub cccd: Vec<u16>,
    pub ases: Vec<AseState>,
}

/// 本地数据库的摘要
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GattDatabase {
    pub hash: [u8; 16],
    pub services: u16,
}

pub struct GattSessions {
    client_type: TypeDescriptor,
    database_type: TypeDescriptor,
    clients: HashMap<TypedBdAddr, GattClient>,
    database: GattDatabase,
    incoming: HashMap<TypedBdAddr, GattClient>,
}

impl Default for GattSessions {
    fn default() -> Self {
        Self::new()
    }
}

impl GattSessions {
    pub fn new() -> Self {
        Self {
            client_type: TypeDescriptor::per_instance::<GattClient>("gatt.client"),
            database_type: TypeDescriptor::generic::<GattDatabase>("gatt.database"),
            clients: HashMap::new(),
            database: GattDatabase {
                hash: [0x5A; 16],
                services: 4,
            },
            incoming: HashMap::new(),
        }
    }

    pub fn with_client(mut self, addr: TypedBdAddr, client: GattClient) -> Self {
        self.clients.insert(addr, client);
        self
    }
}

impl LeLinkVeto for GattSessions {
    /// 任一 ASE 处于过渡状态时否决
    fn veto_le_link(&self, addr: &TypedBdAddr) -> bool {
        self.clients
            .get(addr)
            .is_some_and(|client| client.ases.iter().any(|ase| ase.is_transient()))
    }
}

impl HandoverComponent for GattSessions {
    fn name(&self) -> &'static str {
        "gatt-sessions"
    }

    fn applicability(&self) -> Applicability {
        Applicability::Le
    }

    fn types(&self) -> Vec<TypeDescriptor> {
        vec![self.client_type, self.database_type]
    }

    fn veto(&self, _link: Option<&Link>) -> bool {
        false
    }

    fn le_link_veto(&self) -> Option<&dyn LeLinkVeto> {
        Some(self)
    }

    fn marshal(&self, link: &Link, ty: &TypeEntry) -> Option<Marshalled<'_>> {
        if ty.is(&self.database_type) {
            return Some(Marshalled::Borrowed(&self.database));
        }
        self.clients
            .get(&link.addr)
            .map(|client| Marshalled::Borrowed(client))
    }

    fn unmarshal(
        &mut self,
        link: &Link,
        ty: &TypeEntry,
        object: DecodedObject,
    ) -> UnmarshalOutcome {
        if ty.is(&self.database_type) {
            // 数据库不同则客户端缓存的句柄全部失效
            return match object.downcast_ref::<GattDatabase>() {
                Some(database) if *database == self.database => UnmarshalOutcome::Retained(object),
                _ => UnmarshalOutcome::Failure(object),
            };
        }
        match object.downcast::<GattClient>() {
            Ok(client) => {
                self.incoming.insert(link.addr, *client);
                UnmarshalOutcome::Adopted
            }
            Err(object) => UnmarshalOutcome::Failure(object),
        }
    }

    fn commit(&mut self, is_primary: bool) {
        if is_primary {
            self.clients.extend(self.incoming.drain());
        } else {
            self.clients.clear();
        }
    }

    fn abort(&mut self) {
        self.incoming.clear();
    }
}

// ============================================================================
// 传感器融合
// ============================================================================

/// 与链路无关的组件：校准期间否决切换
pub struct SensorFusion {
    calibrating: Arc<AtomicBool>,
    primary: bool,
}

impl SensorFusion {
    pub fn new(calibrating: Arc<AtomicBool>) -> Self {
        Self {
            calibrating,
            primary: false,
        }
    }
}

impl HandoverComponent for SensorFusion {
    fn name(&self) -> &'static str {
        "sensor-fusion"
    }

    fn applicability(&self) -> Applicability {
        Applicability::LinkIndependent
    }

    fn veto(&self, _link: Option<&Link>) -> bool {
        self.calibrating.load(Ordering::SeqCst)
    }

    fn commit(&mut self, is_primary: bool) {
        if self.primary != is_primary {
            tracing::info!(
                "sensor-fusion: {} fusion output",
                if is_primary { "taking over" } else { "handing off" }
            );
        }
        self.primary = is_primary;
    }
}
