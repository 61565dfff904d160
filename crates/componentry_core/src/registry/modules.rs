//! Loaded-module bookkeeping.
//!
//! # Invariants
//! - A module id appears at most once.
//! - `loaded()` reports modules in load order.

use crate::export::ExportHandle;
use crate::index::DisplacedExport;
use crate::model::{ModuleDescriptor, ModuleId};
use std::collections::HashMap;
use std::sync::Arc;

/// State kept for one loaded module.
#[derive(Debug)]
pub struct ModuleEntry {
    descriptor: ModuleDescriptor,
    contributed: Vec<Arc<ExportHandle>>,
    /// Chains this module's `RemoveExisting` loads removed, each head first.
    displaced: Vec<Vec<DisplacedExport>>,
    scanned_outside_cache: bool,
}

impl ModuleEntry {
    pub(crate) fn new(
        descriptor: ModuleDescriptor,
        contributed: Vec<Arc<ExportHandle>>,
        displaced: Vec<Vec<DisplacedExport>>,
        scanned_outside_cache: bool,
    ) -> Self {
        Self {
            descriptor,
            contributed,
            displaced,
            scanned_outside_cache,
        }
    }

    /// Exports this module added to the index when it loaded.
    pub fn contributed(&self) -> &[Arc<ExportHandle>] {
        &self.contributed
    }

    pub(crate) fn into_displaced(self) -> Vec<Vec<DisplacedExport>> {
        self.displaced
    }
}

#[derive(Debug, Default)]
pub struct ModuleRegistry {
    order: Vec<ModuleId>,
    entries: HashMap<ModuleId, ModuleEntry>,
}

impl ModuleRegistry {
    pub fn is_loaded(&self, id: &ModuleId) -> bool {
        self.entries.contains_key(id)
    }

    /// Descriptors of loaded modules in load order.
    pub fn loaded(&self) -> Vec<ModuleDescriptor> {
        self.order
            .iter()
            .filter_map(|id| self.entries.get(id))
            .map(|entry| entry.descriptor.clone())
            .collect()
    }

    /// Descriptors whose export sets still need to be written to the cache.
    pub(crate) fn pending_flush(&self) -> Vec<ModuleDescriptor> {
        self.order
            .iter()
            .filter_map(|id| self.entries.get(id))
            .filter(|entry| entry.scanned_outside_cache)
            .map(|entry| entry.descriptor.clone())
            .collect()
    }

    /// Returns `false` when the module was already recorded.
    pub(crate) fn insert(&mut self, entry: ModuleEntry) -> bool {
        let id = entry.descriptor.id().clone();
        if self.entries.contains_key(&id) {
            return false;
        }
        self.order.push(id.clone());
        self.entries.insert(id, entry);
        true
    }

    pub(crate) fn remove(&mut self, id: &ModuleId) -> Option<ModuleEntry> {
        let entry = self.entries.remove(id)?;
        self.order.retain(|candidate| candidate != id);
        Some(entry)
    }

    /// Clears the pending-flush flag if the module is still loaded as `descriptor`.
    pub(crate) fn mark_flushed(&mut self, descriptor: &ModuleDescriptor) {
        if let Some(entry) = self.entries.get_mut(descriptor.id()) {
            if &entry.descriptor == descriptor {
                entry.scanned_outside_cache = false;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ModuleEntry, ModuleRegistry};
    use crate::model::{ModuleDescriptor, ModuleId};

    fn descriptor(id: &str) -> ModuleDescriptor {
        ModuleDescriptor::new(ModuleId::new(id).expect("module id"), "1.0.0")
    }

    #[test]
    fn loaded_keeps_load_order_and_rejects_duplicates() {
        let mut registry = ModuleRegistry::default();
        assert!(registry.insert(ModuleEntry::new(descriptor("b"), Vec::new(), Vec::new(), false)));
        assert!(registry.insert(ModuleEntry::new(descriptor("a"), Vec::new(), Vec::new(), false)));
        assert!(!registry.insert(ModuleEntry::new(descriptor("b"), Vec::new(), Vec::new(), true)));

        let ids: Vec<_> = registry
            .loaded()
            .iter()
            .map(|descriptor| descriptor.id().to_string())
            .collect();
        assert_eq!(ids, vec!["b", "a"]);
    }

    #[test]
    fn mark_flushed_clears_pending_flag() {
        let mut registry = ModuleRegistry::default();
        registry.insert(ModuleEntry::new(descriptor("a"), Vec::new(), Vec::new(), true));
        registry.insert(ModuleEntry::new(descriptor("b"), Vec::new(), Vec::new(), false));
        assert_eq!(registry.pending_flush().len(), 1);

        registry.mark_flushed(&descriptor("a"));
        assert!(registry.pending_flush().is_empty());
    }

    #[test]
    fn remove_forgets_module() {
        let mut registry = ModuleRegistry::default();
        registry.insert(ModuleEntry::new(descriptor("a"), Vec::new(), Vec::new(), false));
        let id = ModuleId::new("a").expect("module id");
        assert!(registry.remove(&id).is_some());
        assert!(!registry.is_loaded(&id));
        assert!(registry.loaded().is_empty());
    }
}
