//! Marshal 数据线格式
//!
//! 每条链路的数据是一串记录，打包进有上限的帧中：
//!
//! ```text
//! +-----------+-----------+-------------------+
//! | type id   | length    | payload           |
//! | u16 (BE)  | u16 (BE)  | length 字节       |
//! +-----------+-----------+-------------------+
//! ```
//!
//! 载荷由类型目录中的描述编解码 (bincode)，两端不交换 schema。

pub mod frame;

pub use frame::{FrameWriter, RawRecord, RecordReader};

use crate::registry::MarshalTypeId;

/// 记录头长度: type id + length
pub const RECORD_HEADER_LEN: usize = 4;

/// 单条记录载荷的上限 (length 字段为 u16)
pub const MAX_PAYLOAD_LEN: usize = u16::MAX as usize;

/// 编解码错误
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    #[error("Record for type {type_id} needs {size} bytes but frames hold {capacity}")]
    RecordTooLarge {
        type_id: MarshalTypeId,
        size: usize,
        capacity: usize,
    },

    #[error("Truncated record at offset {0}")]
    Truncated(usize),

    #[error("Marshalled value is not a {0}")]
    TypeMismatch(&'static str),

    #[error("Encode failed: {0}")]
    Encode(String),

    #[error("Decode failed: {0}")]
    Decode(String),
}

impl CodecError {
    /// 是否属于资源耗尽 (可以稍后重试)
    pub fn is_exhaustion(&self) -> bool {
        matches!(self, CodecError::RecordTooLarge { .. })
    }
}
