//! 守护进程 IPC 协议
//!
//! Unix Domain Socket 上的换行分隔 JSON，守护进程与命令行共用这些类型。

use crate::coordinator::{AttemptReport, Role};
use crate::link::{AddrParseError, BdAddr, ConnectionState, Link, LinkClass, LinkKey, TypedBdAddr};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub fn socket_path() -> PathBuf {
    std::env::var("XDG_RUNTIME_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
        .join("handoverd.sock")
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum IpcRequest {
    #[serde(rename = "status")]
    Status,
    #[serde(rename = "links")]
    Links,
    /// 作为 Primary 向对端发起切换
    #[serde(rename = "handover")]
    Handover,
    #[serde(rename = "set_link")]
    SetLink { link: LinkInfo },
    #[serde(rename = "drop_link")]
    DropLink {
        class: LinkClass,
        address: String,
        #[serde(default)]
        random: bool,
    },
    /// 开始或结束传感器校准，校准期间切换会被否决
    #[serde(rename = "calibrate")]
    Calibrate { active: bool },
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum IpcResponse {
    #[serde(rename = "ok")]
    Ok { message: String },
    #[serde(rename = "error")]
    Error { message: String },
    #[serde(rename = "status")]
    Status(DaemonStatus),
    #[serde(rename = "links")]
    Links { links: Vec<LinkInfo> },
    #[serde(rename = "report")]
    Report { report: AttemptReport },
}

/// 守护进程状态
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct DaemonStatus {
    pub device_name: String,
    pub role: Role,
    pub components: Vec<String>,
    pub types: usize,
    pub fingerprint: String,
    /// 最近一次尝试的结果
    pub last_attempt: Option<String>,
}

/// 文本形式的链路描述
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct LinkInfo {
    pub class: LinkClass,
    pub address: String,
    #[serde(default)]
    pub random: bool,
    #[serde(default)]
    pub state: ConnectionState,
}

impl LinkInfo {
    pub fn to_link(&self) -> Result<Link, AddrParseError> {
        let key = link_key(self.class, &self.address, self.random)?;
        Ok(Link {
            class: key.class,
            addr: key.addr,
            state: self.state,
        })
    }
}

impl From<&Link> for LinkInfo {
    fn from(link: &Link) -> Self {
        Self {
            class: link.class,
            address: link.bd_addr().to_string(),
            random: link.addr.kind == crate::link::AddressType::Random,
            state: link.state,
        }
    }
}

/// 由文本地址构造链路标识；BR/EDR 总是公共地址
pub fn link_key(class: LinkClass, address: &str, random: bool) -> Result<LinkKey, AddrParseError> {
    let addr: BdAddr = address.parse()?;
    let addr = match (class, random) {
        (LinkClass::Le, true) => TypedBdAddr::random(addr),
        _ => TypedBdAddr::public(addr),
    };
    Ok(LinkKey { class, addr })
}
