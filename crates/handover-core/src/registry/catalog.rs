//! 类型目录
//!
//! 把全进程唯一的类型 ID 映射到结构化描述 (名称、实例类别、编解码函数)。
//! ID 在注册表构建时按注册顺序连续分配，每个组件得到一段连续区间；
//! 它只在同一构建内稳定，从不持久化。

use crate::codec::CodecError;
use serde::Serialize;
use serde::de::DeserializeOwned;
use sha2::{Digest, Sha256};
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::ops::Range;

use super::ComponentId;

/// 类型 ID (线格式中占 2 字节)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MarshalTypeId(pub u16);

impl fmt::Display for MarshalTypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// 实例类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeCategory {
    /// 每条链路一份
    PerInstance,
    /// 每个链路类别只传一次 (随该类别的第一条链路)
    Generic,
}

type EncodeFn = fn(&dyn Any) -> Result<Vec<u8>, CodecError>;
type DecodeFn = fn(&[u8]) -> Result<Box<dyn Any + Send>, CodecError>;

/// 组件声明的数据类型
#[derive(Clone, Copy)]
pub struct TypeDescriptor {
    name: &'static str,
    category: TypeCategory,
    encode: EncodeFn,
    decode: DecodeFn,
}

impl TypeDescriptor {
    /// 每链路一份的类型
    pub fn per_instance<T>(name: &'static str) -> Self
    where
        T: Serialize + DeserializeOwned + Send + 'static,
    {
        Self::new::<T>(name, TypeCategory::PerInstance)
    }

    /// 每个链路类别一份的类型
    pub fn generic<T>(name: &'static str) -> Self
    where
        T: Serialize + DeserializeOwned + Send + 'static,
    {
        Self::new::<T>(name, TypeCategory::Generic)
    }

    fn new<T>(name: &'static str, category: TypeCategory) -> Self
    where
        T: Serialize + DeserializeOwned + Send + 'static,
    {
        Self {
            name,
            category,
            encode: encode_value::<T>,
            decode: decode_value::<T>,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn category(&self) -> TypeCategory {
        self.category
    }
}

impl fmt::Debug for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeDescriptor")
            .field("name", &self.name)
            .field("category", &self.category)
            .finish_non_exhaustive()
    }
}

fn encode_value<T: Serialize + 'static>(value: &dyn Any) -> Result<Vec<u8>, CodecError> {
    let value = value
        .downcast_ref::<T>()
        .ok_or(CodecError::TypeMismatch(std::any::type_name::<T>()))?;
    bincode::serialize(value).map_err(|e| CodecError::Encode(e.to_string()))
}

fn decode_value<T: DeserializeOwned + Send + 'static>(
    bytes: &[u8],
) -> Result<Box<dyn Any + Send>, CodecError> {
    let value: T = bincode::deserialize(bytes).map_err(|e| CodecError::Decode(e.to_string()))?;
    Ok(Box::new(value))
}

/// 目录中的一项：已分配 ID 的描述
#[derive(Debug, Clone)]
pub struct TypeEntry {
    id: MarshalTypeId,
    owner: ComponentId,
    descriptor: TypeDescriptor,
}

impl TypeEntry {
    pub fn id(&self) -> MarshalTypeId {
        self.id
    }

    pub fn owner(&self) -> ComponentId {
        self.owner
    }

    pub fn name(&self) -> &'static str {
        self.descriptor.name
    }

    pub fn category(&self) -> TypeCategory {
        self.descriptor.category
    }

    /// 是否就是组件声明的某个类型，组件据此分派
    pub fn is(&self, descriptor: &TypeDescriptor) -> bool {
        self.descriptor.name == descriptor.name
    }

    /// 把组件的源数据编码为载荷
    pub fn encode(&self, value: &dyn Any) -> Result<Vec<u8>, CodecError> {
        (self.descriptor.encode)(value)
    }

    /// 从载荷解码出新对象
    pub fn decode(&self, bytes: &[u8]) -> Result<Box<dyn Any + Send>, CodecError> {
        (self.descriptor.decode)(bytes)
    }
}

/// 目录构建错误 (注册阶段致命)
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CatalogError {
    #[error("Type '{name}' claimed by both {first} and {second}")]
    DuplicateType {
        name: &'static str,
        first: ComponentId,
        second: ComponentId,
    },

    #[error("Type id space exhausted at '{0}'")]
    IdSpaceExhausted(&'static str),
}

/// 类型目录
#[derive(Debug, Clone, Default)]
pub struct TypeCatalog {
    entries: Vec<TypeEntry>,
    by_name: HashMap<&'static str, MarshalTypeId>,
    ranges: Vec<Range<usize>>,
}

impl TypeCatalog {
    /// 为下一个组件分配一段连续 ID
    ///
    /// 组件必须按 `ComponentId` 顺序依次加入。
    pub(crate) fn allocate(
        &mut self,
        owner: ComponentId,
        descriptors: Vec<TypeDescriptor>,
    ) -> Result<(), CatalogError> {
        debug_assert_eq!(owner.0, self.ranges.len());
        let start = self.entries.len();

        for descriptor in descriptors {
            if let Some(existing) = self.by_name.get(descriptor.name) {
                return Err(CatalogError::DuplicateType {
                    name: descriptor.name,
                    first: self.entries[usize::from(existing.0)].owner,
                    second: owner,
                });
            }

            let raw = u16::try_from(self.entries.len())
                .map_err(|_| CatalogError::IdSpaceExhausted(descriptor.name))?;
            let id = MarshalTypeId(raw);
            self.by_name.insert(descriptor.name, id);
            self.entries.push(TypeEntry {
                id,
                owner,
                descriptor,
            });
        }

        self.ranges.push(start..self.entries.len());
        Ok(())
    }

    /// 按 ID 查找 (ID 连续分配，直接下标访问)
    pub fn find(&self, id: MarshalTypeId) -> Option<&TypeEntry> {
        self.entries.get(usize::from(id.0))
    }

    pub fn find_by_name(&self, name: &str) -> Option<&TypeEntry> {
        self.by_name.get(name).and_then(|id| self.find(*id))
    }

    /// 某个组件声明的全部类型，保持声明顺序
    pub fn types_of(&self, owner: ComponentId) -> &[TypeEntry] {
        self.ranges
            .get(owner.0)
            .map_or(&[][..], |range| &self.entries[range.clone()])
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TypeEntry> {
        self.entries.iter()
    }

    /// 目录指纹
    ///
    /// 两端不交换 schema，只比较指纹：ID、名称、类别任一不同都视为构建不一致。
    pub fn fingerprint(&self) -> CatalogFingerprint {
        let mut hasher = Sha256::new();
        for entry in &self.entries {
            hasher.update(entry.id.0.to_be_bytes());
            hasher.update(entry.name().as_bytes());
            hasher.update([0u8]);
            hasher.update([match entry.category() {
                TypeCategory::PerInstance => 0u8,
                TypeCategory::Generic => 1u8,
            }]);
        }
        let digest = hasher.finalize();
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&digest);
        CatalogFingerprint(bytes)
    }
}

/// 目录的 SHA-256 指纹
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct CatalogFingerprint(pub [u8; 32]);

impl fmt::Display for CatalogFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0[..8] {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}
