//! Handover Core Library
//!
//! 在两台协作设备 (Primary / Secondary) 之间迁移一组活动无线链路的控制权，
//! 期间不断开链路、不丢失各功能模块的协议状态。
//!
//! # 模块
//!
//! - **link**: 链路模型与链路快照
//! - **registry**: 组件注册表与类型目录
//! - **codec**: Marshal 记录的帧格式
//! - **transport**: 两个协调器之间的消息通道
//! - **coordinator**: 驱动 Veto / Marshal / Unmarshal / Commit 各阶段
//! - **config**: 设备设置的持久化
//! - **ipc**: 守护进程与命令行之间的协议
//!
//! # 使用示例
//!
//! ```ignore
//! use handover_core::{ChannelTransport, HandoverCoordinator, LinkTable, Registry, Role};
//!
//! // 1. 启动时注册所有组件
//! let registry = Registry::builder()
//!     .register(AclManager::new())
//!     .register(GattSessions::new())
//!     .build()?;
//!
//! // 2. 协调器独占注册表
//! let links = Arc::new(LinkTable::new());
//! let mut coordinator = HandoverCoordinator::new(registry, links, Role::Primary, config);
//!
//! // 3. 向对端发起切换
//! let report = coordinator.initiate(&mut transport).await?;
//! ```

pub mod codec;
pub mod config;
pub mod coordinator;
pub mod ipc;
pub mod link;
pub mod logging;
pub mod registry;
pub mod transport;

pub use config::HandoverSettings;
pub use logging::LogLevel;

// Link re-exports
pub use link::{
    AddressType, BdAddr, ConnectionState, Link, LinkClass, LinkEnumerator, LinkKey, LinkTable,
    TypedBdAddr,
};

// Registry re-exports
pub use registry::{
    Applicability, BredrLinkVeto, DecodedObject, HandoverComponent, LeLinkVeto, MarshalTypeId,
    Marshalled, Registry, RegistryBuilder, RegistryError, TypeCategory, TypeDescriptor, TypeEntry,
    UnmarshalOutcome,
};

// Coordinator re-exports
pub use coordinator::{
    AttemptEvent, AttemptObserver, AttemptReport, ChannelObserver, CoordinatorConfig,
    HandoverCoordinator, HandoverError, OwnershipStats, Phase, Role,
};

// Transport re-exports
pub use transport::{
    ChannelTransport, PeerMessage, StartStatus, TcpTransport, Transport, TransportError,
};
