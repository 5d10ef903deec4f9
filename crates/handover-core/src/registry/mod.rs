//! 组件注册表
//!
//! 进程启动时由 [`RegistryBuilder`] 构建一次，之后交给协调器独占持有。
//! 构建时为所有组件分配类型 ID 并校验唯一性，任何冲突都是启动期致命错误。

pub mod catalog;
pub mod component;

pub use catalog::{
    CatalogError, CatalogFingerprint, MarshalTypeId, TypeCatalog, TypeCategory, TypeDescriptor,
    TypeEntry,
};
pub use component::{
    Applicability, BredrLinkVeto, DecodedObject, HandoverComponent, LeLinkVeto, Marshalled,
    UnmarshalOutcome,
};

use crate::link::LinkClass;
use log::debug;
use std::fmt;

/// 组件在注册表中的位置 (即注册顺序)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ComponentId(pub usize);

impl fmt::Display for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "component[{}]", self.0)
    }
}

/// 注册错误
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Component '{0}' registered twice")]
    DuplicateComponent(&'static str),

    #[error("Link-independent component '{0}' must not declare data types")]
    LinkIndependentTypes(&'static str),

    #[error(transparent)]
    Catalog(#[from] CatalogError),
}

/// 注册表构建器
#[derive(Default)]
pub struct RegistryBuilder {
    components: Vec<Box<dyn HandoverComponent>>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<C: HandoverComponent + 'static>(mut self, component: C) -> Self {
        self.components.push(Box::new(component));
        self
    }

    /// 分配类型 ID 并校验
    pub fn build(self) -> Result<Registry, RegistryError> {
        let mut catalog = TypeCatalog::default();

        for (index, component) in self.components.iter().enumerate() {
            let name = component.name();
            if self.components[..index].iter().any(|c| c.name() == name) {
                return Err(RegistryError::DuplicateComponent(name));
            }

            let types = component.types();
            if component.applicability() == Applicability::LinkIndependent && !types.is_empty() {
                return Err(RegistryError::LinkIndependentTypes(name));
            }

            catalog.allocate(ComponentId(index), types)?;
        }

        debug!(
            "Handover registry built: {} components, {} types, fingerprint {}",
            self.components.len(),
            catalog.len(),
            catalog.fingerprint()
        );

        Ok(Registry {
            components: self.components,
            catalog,
        })
    }
}

/// 组件注册表
pub struct Registry {
    components: Vec<Box<dyn HandoverComponent>>,
    catalog: TypeCatalog,
}

impl Registry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    pub fn catalog(&self) -> &TypeCatalog {
        &self.catalog
    }

    /// 按注册顺序遍历组件
    ///
    /// `Some(class)` 只返回适用于该链路类别的组件，`None` 返回全部。
    pub fn iterate(
        &self,
        class: Option<LinkClass>,
    ) -> impl Iterator<Item = (ComponentId, &dyn HandoverComponent)> {
        self.components
            .iter()
            .enumerate()
            .filter(move |(_, c)| class.is_none_or(|class| c.applicability().covers(class)))
            .map(|(index, c)| (ComponentId(index), c.as_ref()))
    }

    /// 查找拥有某类型的组件
    pub fn find(&self, id: MarshalTypeId) -> Option<(&TypeEntry, &dyn HandoverComponent)> {
        let entry = self.catalog.find(id)?;
        let component = self.components.get(entry.owner().0)?;
        Some((entry, component.as_ref()))
    }

    pub fn component(&self, id: ComponentId) -> Option<&dyn HandoverComponent> {
        self.components.get(id.0).map(|c| c.as_ref())
    }

    pub(crate) fn component_mut(
        &mut self,
        id: ComponentId,
    ) -> Option<&mut (dyn HandoverComponent + 'static)> {
        self.components.get_mut(id.0).map(|c| &mut **c)
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.components.iter().map(|c| c.name()).collect()
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("components", &self.names())
            .field("types", &self.catalog.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::Link;

    struct Stub {
        name: &'static str,
        applicability: Applicability,
        types: Vec<TypeDescriptor>,
    }

    impl HandoverComponent for Stub {
        fn name(&self) -> &'static str {
            self.name
        }

        fn applicability(&self) -> Applicability {
            self.applicability
        }

        fn types(&self) -> Vec<TypeDescriptor> {
            self.types.clone()
        }

        fn veto(&self, _link: Option<&Link>) -> bool {
            false
        }

        fn commit(&mut self, _is_primary: bool) {}
    }

    fn stub(name: &'static str, applicability: Applicability, types: &[&'static str]) -> Stub {
        Stub {
            name,
            applicability,
            types: types
                .iter()
                .map(|t| TypeDescriptor::per_instance::<u32>(*t))
                .collect(),
        }
    }

    #[test]
    fn test_iterate_filters_by_class_in_registration_order() {
        let registry = Registry::builder()
            .register(stub("acl", Applicability::BrEdr, &["acl.table"]))
            .register(stub("gatt", Applicability::Le, &["gatt.session"]))
            .register(stub("fusion", Applicability::LinkIndependent, &[]))
            .register(stub("hfp", Applicability::BrEdr, &["hfp.call"]))
            .build()
            .unwrap();

        let bredr: Vec<_> = registry
            .iterate(Some(LinkClass::BrEdr))
            .map(|(_, c)| c.name())
            .collect();
        assert_eq!(bredr, vec!["acl", "hfp"]);

        let all: Vec<_> = registry.iterate(None).map(|(id, _)| id.0).collect();
        assert_eq!(all, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_find_routes_to_owner() {
        let registry = Registry::builder()
            .register(stub("acl", Applicability::BrEdr, &["acl.table", "acl.policy"]))
            .register(stub("hfp", Applicability::BrEdr, &["hfp.call"]))
            .build()
            .unwrap();

        let (entry, owner) = registry.find(MarshalTypeId(2)).unwrap();
        assert_eq!(entry.name(), "hfp.call");
        assert_eq!(owner.name(), "hfp");
        assert!(registry.find(MarshalTypeId(3)).is_none());
    }

    #[test]
    fn test_build_fails_fast() {
        let dup_type = Registry::builder()
            .register(stub("a", Applicability::BrEdr, &["same"]))
            .register(stub("b", Applicability::Le, &["same"]))
            .build();
        assert!(matches!(
            dup_type,
            Err(RegistryError::Catalog(CatalogError::DuplicateType { .. }))
        ));

        let dup_name = Registry::builder()
            .register(stub("a", Applicability::BrEdr, &[]))
            .register(stub("a", Applicability::Le, &[]))
            .build();
        assert!(matches!(dup_name, Err(RegistryError::DuplicateComponent("a"))));

        let independent = Registry::builder()
            .register(stub("sensor", Applicability::LinkIndependent, &["x"]))
            .build();
        assert!(matches!(
            independent,
            Err(RegistryError::LinkIndependentTypes("sensor"))
        ));
    }
}
