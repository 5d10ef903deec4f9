//! 组件接口
//!
//! 每个需要随切换迁移状态的模块实现 [`HandoverComponent`]。
//! 按链路的否决是可选能力，通过 [`BredrLinkVeto`] / [`LeLinkVeto`] 单独实现，
//! 再由 `bredr_link_veto` / `le_link_veto` 暴露给协调器。

use crate::link::{BdAddr, Link, LinkClass, TypedBdAddr};
use std::any::Any;
use std::fmt;

use super::catalog::{MarshalTypeId, TypeDescriptor, TypeEntry};

/// 组件适用的链路范围
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applicability {
    /// 只参与 BR/EDR 链路
    BrEdr,
    /// 只参与 LE 链路
    Le,
    /// 与链路无关：只做一次全局否决并接收 Commit，不声明数据类型
    LinkIndependent,
}

impl Applicability {
    pub fn covers(&self, class: LinkClass) -> bool {
        matches!(
            (self, class),
            (Applicability::BrEdr, LinkClass::BrEdr) | (Applicability::Le, LinkClass::Le)
        )
    }
}

/// BR/EDR 链路否决能力
pub trait BredrLinkVeto {
    fn veto_bredr_link(&self, addr: &BdAddr) -> bool;
}

/// LE 链路否决能力
pub trait LeLinkVeto {
    fn veto_le_link(&self, addr: &TypedBdAddr) -> bool;
}

/// Marshal 的结果：指向组件源数据，或组件临时拼出的快照
pub enum Marshalled<'a> {
    Borrowed(&'a dyn Any),
    Owned(Box<dyn Any + Send>),
}

impl Marshalled<'_> {
    pub fn as_any(&self) -> &dyn Any {
        match self {
            Marshalled::Borrowed(value) => *value,
            Marshalled::Owned(value) => value.as_ref(),
        }
    }
}

impl fmt::Debug for Marshalled<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Marshalled::Borrowed(_) => f.write_str("Marshalled::Borrowed(..)"),
            Marshalled::Owned(_) => f.write_str("Marshalled::Owned(..)"),
        }
    }
}

/// 解码得到的对象
///
/// 在 Unmarshal 返回之前由协调器独占；组件通过 [`UnmarshalOutcome`] 决定归属。
pub struct DecodedObject {
    type_id: MarshalTypeId,
    value: Box<dyn Any + Send>,
}

impl DecodedObject {
    pub(crate) fn new(type_id: MarshalTypeId, value: Box<dyn Any + Send>) -> Self {
        Self { type_id, value }
    }

    pub fn marshal_type(&self) -> MarshalTypeId {
        self.type_id
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.value.downcast_ref::<T>()
    }

    /// 取出具体值，组件借此接管对象
    ///
    /// 类型不符时把对象原样退回，调用方可以继续把它交还给协调器。
    pub fn downcast<T: Any>(self) -> Result<Box<T>, Self> {
        let type_id = self.type_id;
        self.value
            .downcast::<T>()
            .map_err(|value| Self { type_id, value })
    }
}

impl fmt::Debug for DecodedObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecodedObject")
            .field("type_id", &self.type_id)
            .finish_non_exhaustive()
    }
}

/// Unmarshal 的结果，同时也是对象所有权的去向
#[derive(Debug)]
pub enum UnmarshalOutcome {
    /// 失败，对象交还协调器释放，整个尝试中止
    Failure(DecodedObject),
    /// 组件已复制所需内容，对象交还协调器释放
    Retained(DecodedObject),
    /// 组件接管了对象，协调器不再持有
    Adopted,
}

/// 切换参与者
///
/// `veto` 与 `marshal` 只读；`unmarshal`、`commit`、`abort` 由协调器以独占方式调用。
/// 协调器运行在多线程运行时的任务中，因此组件需要 `Send + Sync`。
pub trait HandoverComponent: Send + Sync {
    fn name(&self) -> &'static str;

    fn applicability(&self) -> Applicability;

    /// 组件拥有的数据类型，注册时读取一次
    fn types(&self) -> Vec<TypeDescriptor> {
        Vec::new()
    }

    /// 全局否决
    ///
    /// 链路相关组件对其类别的每条链路各调用一次 (`Some(link)`)，
    /// 与链路无关的组件只调用一次 (`None`)。返回 `true` 表示否决。
    fn veto(&self, link: Option<&Link>) -> bool;

    fn bredr_link_veto(&self) -> Option<&dyn BredrLinkVeto> {
        None
    }

    fn le_link_veto(&self) -> Option<&dyn LeLinkVeto> {
        None
    }

    /// 为 (链路, 类型) 提供要发送的数据；`None` 表示没有数据
    fn marshal(&self, _link: &Link, _ty: &TypeEntry) -> Option<Marshalled<'_>> {
        None
    }

    fn unmarshal(
        &mut self,
        _link: &Link,
        _ty: &TypeEntry,
        object: DecodedObject,
    ) -> UnmarshalOutcome {
        UnmarshalOutcome::Failure(object)
    }

    /// 采用新角色；每次成功的尝试恰好调用一次
    fn commit(&mut self, is_primary: bool);

    /// 丢弃本次尝试中预先准备的一切，只对执行过 Marshal/Unmarshal 的组件调用
    fn abort(&mut self) {}
}
