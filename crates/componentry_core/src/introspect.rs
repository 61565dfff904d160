//! Introspection and activation collaborators.
//!
//! # Responsibility
//! - Define how a module's candidate exports are enumerated (`Introspector`).
//! - Define how an implementation identity becomes a constructor (`Activator`).
//! - Provide `StaticCatalog`, a build-time registration table implementing both.
//!
//! # Invariants
//! - Collaborators are pure lookups from the registry's point of view; they are
//!   always called outside the registry lock.

use crate::error::ScanError;
use crate::export::Factory;
use crate::model::{ContractKey, ImplementationId, Location, Metadata, ModuleDescriptor, ModuleId};
use std::any::Any;
use std::collections::HashMap;

/// One export a module declares, before it becomes a record.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportCandidate {
    pub contract: ContractKey,
    pub implementation: ImplementationId,
    /// Explicit location; `None` means the derived default.
    pub location: Option<Location>,
    pub display_name: Option<String>,
    pub metadata: Metadata,
}

impl ExportCandidate {
    pub fn new(contract: ContractKey, implementation: ImplementationId) -> Self {
        Self {
            contract,
            implementation,
            location: None,
            display_name: None,
            metadata: Metadata::new(),
        }
    }

    pub fn at(mut self, location: Location) -> Self {
        self.location = Some(location);
        self
    }

    pub fn named(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = Some(display_name.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// Enumerates candidate exports of a module.
pub trait Introspector: Send + Sync {
    fn scan(&self, module: &ModuleDescriptor) -> Result<Vec<ExportCandidate>, ScanError>;
}

/// Maps implementation identities to constructors.
pub trait Activator: Send + Sync {
    fn resolve(&self, implementation: &ImplementationId) -> Option<Factory>;
}

/// Static registration table of modules, their exports and constructors.
#[derive(Debug, Default)]
pub struct StaticCatalog {
    factories: HashMap<ImplementationId, Factory>,
    modules: HashMap<ModuleId, Vec<ExportCandidate>>,
}

impl StaticCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the constructor for an implementation.
    pub fn implementation(mut self, implementation: ImplementationId, factory: Factory) -> Self {
        self.factories.insert(implementation, factory);
        self
    }

    /// Registers `T::default()` as constructor for an implementation.
    pub fn default_implementation<T>(self, implementation: ImplementationId) -> Self
    where
        T: Any + Default + Send + Sync,
    {
        self.implementation(implementation, Factory::default_of::<T>())
    }

    /// Declares a module, possibly without exports.
    pub fn module(mut self, module: ModuleId) -> Self {
        self.modules.entry(module).or_default();
        self
    }

    /// Declares one export of a module, creating the module entry if needed.
    pub fn export(mut self, module: ModuleId, candidate: ExportCandidate) -> Self {
        self.modules.entry(module).or_default().push(candidate);
        self
    }
}

impl Introspector for StaticCatalog {
    fn scan(&self, module: &ModuleDescriptor) -> Result<Vec<ExportCandidate>, ScanError> {
        self.modules
            .get(module.id())
            .cloned()
            .ok_or_else(|| ScanError::new(format!("module `{}` is not declared", module.id())))
    }
}

impl Activator for StaticCatalog {
    fn resolve(&self, implementation: &ImplementationId) -> Option<Factory> {
        self.factories.get(implementation).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::{Activator, ExportCandidate, Introspector, StaticCatalog};
    use crate::model::{ContractKey, ImplementationId, ModuleDescriptor, ModuleId};

    #[derive(Default)]
    struct Circle;

    fn module(id: &str) -> ModuleId {
        ModuleId::new(id).expect("module id")
    }

    #[test]
    fn scan_returns_declared_candidates_in_order() {
        let catalog = StaticCatalog::new()
            .export(
                module("shapes"),
                ExportCandidate::new(
                    ContractKey::parse("Shape", None).expect("contract"),
                    ImplementationId::new("Circle").expect("impl"),
                ),
            )
            .export(
                module("shapes"),
                ExportCandidate::new(
                    ContractKey::parse("Shape", None).expect("contract"),
                    ImplementationId::new("Square").expect("impl"),
                )
                .named("Four sides"),
            );

        let found = catalog
            .scan(&ModuleDescriptor::new(module("shapes"), "1.0.0"))
            .expect("declared module scans");
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].implementation.as_str(), "Circle");
        assert_eq!(found[1].display_name.as_deref(), Some("Four sides"));
    }

    #[test]
    fn scan_of_undeclared_module_fails() {
        let catalog = StaticCatalog::new().module(module("empty"));
        assert!(catalog
            .scan(&ModuleDescriptor::new(module("empty"), "1"))
            .expect("declared empty module")
            .is_empty());

        let err = catalog
            .scan(&ModuleDescriptor::new(module("ghost"), "1"))
            .expect_err("undeclared module");
        assert!(err.message().contains("ghost"));
    }

    #[test]
    fn resolve_finds_registered_factories() {
        let circle = ImplementationId::new("Circle").expect("impl");
        let catalog = StaticCatalog::new().default_implementation::<Circle>(circle.clone());

        let factory = catalog.resolve(&circle).expect("factory");
        assert!(factory.build().downcast_ref::<Circle>().is_some());
        assert!(catalog
            .resolve(&ImplementationId::new("Square").expect("impl"))
            .is_none());
    }
}
