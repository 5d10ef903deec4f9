//! 帧的写入与读取

use super::{CodecError, MAX_PAYLOAD_LEN, RECORD_HEADER_LEN};
use crate::registry::MarshalTypeId;

/// 把记录依次写入有上限的帧
///
/// 当前帧写满时从新帧继续，相当于用新缓冲区恢复 marshal。
#[derive(Debug)]
pub struct FrameWriter {
    capacity: usize,
    frames: Vec<Vec<u8>>,
    current: Vec<u8>,
    records: usize,
}

impl FrameWriter {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            frames: Vec::new(),
            current: Vec::with_capacity(capacity.min(4096)),
            records: 0,
        }
    }

    pub fn push(&mut self, type_id: MarshalTypeId, payload: &[u8]) -> Result<(), CodecError> {
        let size = RECORD_HEADER_LEN + payload.len();
        if payload.len() > MAX_PAYLOAD_LEN || size > self.capacity {
            return Err(CodecError::RecordTooLarge {
                type_id,
                size,
                capacity: self.capacity,
            });
        }

        if self.current.len() + size > self.capacity {
            let full = std::mem::take(&mut self.current);
            self.frames.push(full);
        }

        // 长度已在上面检查过，不会截断
        #[allow(clippy::cast_possible_truncation)]
        let len = payload.len() as u16;
        self.current.extend_from_slice(&type_id.0.to_be_bytes());
        self.current.extend_from_slice(&len.to_be_bytes());
        self.current.extend_from_slice(payload);
        self.records += 1;
        Ok(())
    }

    pub fn records(&self) -> usize {
        self.records
    }

    /// 结束写入，至少返回一帧 (可能为空)
    pub fn finish(mut self) -> Vec<Vec<u8>> {
        if !self.current.is_empty() || self.frames.is_empty() {
            self.frames.push(self.current);
        }
        self.frames
    }
}

/// 一条未解码的记录
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawRecord<'a> {
    pub type_id: MarshalTypeId,
    pub payload: &'a [u8],
}

/// 逐条读取帧中的记录
#[derive(Debug)]
pub struct RecordReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> RecordReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }
}

impl<'a> Iterator for RecordReader<'a> {
    type Item = Result<RawRecord<'a>, CodecError>;

    fn next(&mut self) -> Option<Self::Item> {
        let rest = &self.buf[self.pos..];
        if rest.is_empty() {
            return None;
        }
        if rest.len() < RECORD_HEADER_LEN {
            let offset = self.pos;
            self.pos = self.buf.len();
            return Some(Err(CodecError::Truncated(offset)));
        }

        let type_id = u16::from_be_bytes([rest[0], rest[1]]);
        let len = usize::from(u16::from_be_bytes([rest[2], rest[3]]));
        let end = RECORD_HEADER_LEN + len;
        if rest.len() < end {
            let offset = self.pos;
            self.pos = self.buf.len();
            return Some(Err(CodecError::Truncated(offset)));
        }

        self.pos += end;
        Some(Ok(RawRecord {
            type_id: MarshalTypeId(type_id),
            payload: &rest[RECORD_HEADER_LEN..end],
        }))
    }
}
