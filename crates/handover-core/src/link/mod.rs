//! 链路模块
//!
//! 描述参与切换的活动链路 (BR/EDR 或 LE)，以及在尝试开始时提供链路快照的枚举器。

pub mod table;

pub use table::{LinkEnumerator, LinkTable};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// 蓝牙设备地址 (6 字节)
///
/// 文本形式与 `AA:BB:CC:DD:EE:FF` 一致，首字节为最高位。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BdAddr(pub [u8; 6]);

impl BdAddr {
    pub const fn new(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }

    /// 低 24 位 (LAP)，日志中用于简短标识设备
    pub fn lap(&self) -> u32 {
        u32::from(self.0[3]) << 16 | u32::from(self.0[4]) << 8 | u32::from(self.0[5])
    }
}

impl fmt::Display for BdAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = &self.0;
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            b[0], b[1], b[2], b[3], b[4], b[5]
        )
    }
}

/// 地址解析错误
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid Bluetooth address: {0}")]
pub struct AddrParseError(String);

impl FromStr for BdAddr {
    type Err = AddrParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; 6];
        let mut parts = s.trim().split(':');

        for byte in &mut bytes {
            let part = parts.next().ok_or_else(|| AddrParseError(s.to_string()))?;
            if part.len() != 2 {
                return Err(AddrParseError(s.to_string()));
            }
            *byte = u8::from_str_radix(part, 16).map_err(|_| AddrParseError(s.to_string()))?;
        }

        if parts.next().is_some() {
            return Err(AddrParseError(s.to_string()));
        }
        Ok(Self(bytes))
    }
}

/// LE 地址类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AddressType {
    /// 公共地址 (已绑定设备的 RPA 解析后也是公共地址)
    Public,
    /// 随机地址 (未绑定设备)
    Random,
}

/// 带类型的地址，LE 链路使用
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TypedBdAddr {
    pub kind: AddressType,
    pub addr: BdAddr,
}

impl TypedBdAddr {
    pub const fn public(addr: BdAddr) -> Self {
        Self {
            kind: AddressType::Public,
            addr,
        }
    }

    pub const fn random(addr: BdAddr) -> Self {
        Self {
            kind: AddressType::Random,
            addr,
        }
    }
}

impl fmt::Display for TypedBdAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            AddressType::Public => write!(f, "{}", self.addr),
            AddressType::Random => write!(f, "{} (random)", self.addr),
        }
    }
}

/// 链路类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LinkClass {
    BrEdr,
    Le,
}

impl LinkClass {
    pub fn name(&self) -> &'static str {
        match self {
            LinkClass::BrEdr => "BR/EDR",
            LinkClass::Le => "LE",
        }
    }
}

impl fmt::Display for LinkClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// 连接状态 (由组件的 Veto 读取)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ConnectionState {
    Connecting,
    #[default]
    Connected,
    Disconnecting,
}

impl ConnectionState {
    /// 是否处于稳定状态
    pub fn is_settled(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

/// 链路在一次尝试中的标识 (类别 + 地址)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LinkKey {
    pub class: LinkClass,
    pub addr: TypedBdAddr,
}

impl fmt::Display for LinkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.class, self.addr)
    }
}

/// 一条活动链路
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    pub class: LinkClass,
    pub addr: TypedBdAddr,
    pub state: ConnectionState,
}

impl Link {
    /// BR/EDR 链路总是使用公共地址
    pub fn bredr(addr: BdAddr) -> Self {
        Self {
            class: LinkClass::BrEdr,
            addr: TypedBdAddr::public(addr),
            state: ConnectionState::Connected,
        }
    }

    pub fn le(addr: TypedBdAddr) -> Self {
        Self {
            class: LinkClass::Le,
            addr,
            state: ConnectionState::Connected,
        }
    }

    pub fn with_state(mut self, state: ConnectionState) -> Self {
        self.state = state;
        self
    }

    pub fn key(&self) -> LinkKey {
        LinkKey {
            class: self.class,
            addr: self.addr,
        }
    }

    /// BR/EDR 的无类型地址
    pub fn bd_addr(&self) -> &BdAddr {
        &self.addr.addr
    }
}

impl fmt::Display for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} ({:?})", self.class, self.addr, self.state)
    }
}
