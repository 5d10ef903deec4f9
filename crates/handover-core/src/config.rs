//! 设备配置和持久化
//!
//! 提供对端地址、帧大小、超时等设置的存储和读取。

use crate::coordinator::{CoordinatorConfig, Role};
use crate::link::BdAddr;
use crate::logging::LogLevel;
use log::debug;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// 默认的对端监听地址
pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:7460";

/// 设备设置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HandoverSettings {
    /// 设备名称 (日志与状态中显示)
    pub device_name: String,
    /// 启动时的角色
    pub role: Role,
    /// 对端设备的 BR/EDR 地址，到它的链路不参与切换
    pub peer_address: Option<String>,
    /// 接受对端连接的地址
    pub listen_addr: String,
    /// 对端协调器的地址 (发起切换时连接)
    pub peer_endpoint: Option<String>,
    /// IPC socket 路径，未设置时使用 `$XDG_RUNTIME_DIR/handoverd.sock`
    pub ipc_socket: Option<PathBuf>,
    /// 单帧上限 (字节)
    pub max_frame_size: usize,
    /// 尝试超时 (毫秒)
    pub attempt_timeout_ms: u64,
    /// 是否允许 LE 链路参与切换
    pub le_handover: bool,
    pub log_level: LogLevel,
}

impl Default for HandoverSettings {
    fn default() -> Self {
        let coordinator = CoordinatorConfig::default();
        Self {
            device_name: get_default_device_name(),
            role: Role::Secondary,
            peer_address: None,
            listen_addr: DEFAULT_LISTEN_ADDR.to_string(),
            peer_endpoint: None,
            ipc_socket: None,
            max_frame_size: coordinator.max_frame_size,
            attempt_timeout_ms: u64::try_from(coordinator.attempt_timeout.as_millis())
                .unwrap_or(u64::MAX),
            le_handover: coordinator.le_handover,
            log_level: LogLevel::Info,
        }
    }
}

impl HandoverSettings {
    /// 获取配置文件路径
    pub fn config_path() -> PathBuf {
        let config_dir = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("handover");
        config_dir.join("settings.toml")
    }

    /// 加载设置（如果文件不存在则使用默认值）
    pub fn load() -> Self {
        Self::load_from(&Self::config_path())
    }

    pub fn load_from(path: &Path) -> Self {
        if path.exists() {
            match fs::read_to_string(path) {
                Ok(content) => match toml::from_str(&content) {
                    Ok(settings) => {
                        debug!("Loaded settings from {:?}", path);
                        return settings;
                    }
                    Err(e) => {
                        log::warn!("Failed to parse settings: {}, using defaults", e);
                    }
                },
                Err(e) => {
                    log::warn!("Failed to read settings file: {}, using defaults", e);
                }
            }
        }
        Self::default()
    }

    /// 保存设置
    pub fn save(&self) -> anyhow::Result<()> {
        self.save_to(&Self::config_path())
    }

    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        debug!("Saved settings to {:?}", path);
        Ok(())
    }

    /// 解析对端地址
    pub fn peer_bd_addr(&self) -> anyhow::Result<Option<BdAddr>> {
        match &self.peer_address {
            Some(addr) => Ok(Some(addr.parse()?)),
            None => Ok(None),
        }
    }

    /// 转换为协调器参数
    pub fn coordinator_config(&self) -> anyhow::Result<CoordinatorConfig> {
        if self.max_frame_size < crate::codec::RECORD_HEADER_LEN {
            anyhow::bail!("max_frame_size {} is too small", self.max_frame_size);
        }
        Ok(CoordinatorConfig {
            max_frame_size: self.max_frame_size,
            attempt_timeout: Duration::from_millis(self.attempt_timeout_ms),
            le_handover: self.le_handover,
            peer_address: self.peer_bd_addr()?,
            ..CoordinatorConfig::default()
        })
    }
}

/// 获取默认设备名称（主机名）
fn get_default_device_name() -> String {
    hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "handover".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = HandoverSettings::default();
        assert_eq!(settings.role, Role::Secondary);
        assert!(settings.le_handover);

        let config = settings.coordinator_config().unwrap();
        assert_eq!(config.max_frame_size, 1024);
        assert_eq!(config.attempt_timeout, Duration::from_secs(3));
        assert_eq!(config.peer_address, None);
    }

    #[test]
    fn test_save_and_load() {
        let path = std::env::temp_dir()
            .join(format!("handover-settings-{}", uuid::Uuid::new_v4()))
            .join("settings.toml");

        let settings = HandoverSettings {
            device_name: "left".into(),
            role: Role::Primary,
            peer_address: Some("00:1A:7D:DA:71:13".into()),
            le_handover: false,
            log_level: LogLevel::Debug,
            ..Default::default()
        };
        settings.save_to(&path).unwrap();

        let loaded = HandoverSettings::load_from(&path);
        assert_eq!(loaded, settings);
        assert_eq!(
            loaded.coordinator_config().unwrap().peer_address,
            Some(BdAddr::new([0x00, 0x1A, 0x7D, 0xDA, 0x71, 0x13]))
        );

        let _ = fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let settings: HandoverSettings = toml::from_str("max_frame_size = 64\n").unwrap();
        assert_eq!(settings.max_frame_size, 64);
        assert_eq!(settings.listen_addr, DEFAULT_LISTEN_ADDR);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let bad_addr = HandoverSettings {
            peer_address: Some("nope".into()),
            ..Default::default()
        };
        assert!(bad_addr.coordinator_config().is_err());

        let tiny = HandoverSettings {
            max_frame_size: 2,
            ..Default::default()
        };
        assert!(tiny.coordinator_config().is_err());
    }
}
