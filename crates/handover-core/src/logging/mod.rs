//! 日志模块
//!
//! 库代码通过 `log` 门面输出；二进制程序据此级别构造 `EnvFilter` 指令。

use serde::{Deserialize, Serialize};
use std::fmt;

/// 本工作区内输出日志的 crate
pub const LOG_TARGETS: &[&str] = &["handover_core", "handoverd", "handover"];

/// 日志级别
///
/// 实现了 `PartialOrd` 以便过滤。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub enum LogLevel {
    Error = 0,
    Warn = 1,
    #[default]
    Info = 2,
    Debug = 3,
    Trace = 4,
}

impl LogLevel {
    /// 获取显示名称
    pub fn name(&self) -> &'static str {
        match self {
            LogLevel::Error => "ERROR",
            LogLevel::Warn => "WARN",
            LogLevel::Info => "INFO",
            LogLevel::Debug => "DEBUG",
            LogLevel::Trace => "TRACE",
        }
    }

    /// 默认过滤指令：本工作区的 crate 使用该级别，其余依赖只输出警告
    ///
    /// 例如 `warn,handover_core=debug,handoverd=debug,handover=debug`
    pub fn filter_directive(self) -> String {
        let level = self.name().to_lowercase();
        let mut directive = String::from("warn");
        for target in LOG_TARGETS {
            directive.push(',');
            directive.push_str(target);
            directive.push('=');
            directive.push_str(&level);
        }
        directive
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "ERROR" => Ok(LogLevel::Error),
            "WARN" | "WARNING" => Ok(LogLevel::Warn),
            "INFO" => Ok(LogLevel::Info),
            "DEBUG" => Ok(LogLevel::Debug),
            "TRACE" => Ok(LogLevel::Trace),
            _ => Err(format!("unknown log level '{s}'")),
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}
