//! Export manager: module load/unload transactions and the read API.
//!
//! # Responsibility
//! - Stage a module's exports (cache or introspection, then activation).
//! - Apply and retract whole modules atomically with respect to readers.
//! - Serve single, multi and typed export lookups.
//! - Broadcast the contract keys each transaction touched.
//!
//! # Invariants
//! - Index and module registry live behind one `RwLock`; each load, unload or
//!   registration is exactly one exclusive critical section.
//! - Collaborators, the cache and instance construction run outside the lock.
//! - Notifications fire after the lock is released.
//! - A failed load leaves no trace in the index or the module registry.
//!
//! # See also
//! - index/mod.rs for override-chain semantics.

use crate::cache::CacheManager;
use crate::config::CacheConfig;
use crate::error::{RegistryError, RegistryResult, ScanError};
use crate::export::typed::downcast;
use crate::export::{Export, ExportHandle, Instance};
use crate::index::{ExportIndex, InsertOutcome};
use crate::introspect::{Activator, ExportCandidate, Introspector, StaticCatalog};
use crate::model::{
    CapabilityId, ContractKey, ExportRecord, Location, ModuleDescriptor, ModuleId,
};
use crate::notify::{ChangeNotifier, ExportsChanged, SubscriptionId};
use crate::registry::modules::{ModuleEntry, ModuleRegistry};
use log::{debug, error, info, warn};
use parking_lot::RwLock;
use std::any::Any;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;

#[derive(Default)]
struct RegistryState {
    index: ExportIndex,
    modules: ModuleRegistry,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoadSource {
    Cache,
    Scan,
}

impl LoadSource {
    fn as_str(self) -> &'static str {
        match self {
            Self::Cache => "cache",
            Self::Scan => "scan",
        }
    }
}

/// Runtime registry of exports contributed by loaded modules.
pub struct ExportManager {
    state: RwLock<RegistryState>,
    introspector: Arc<dyn Introspector>,
    activator: Arc<dyn Activator>,
    cache: Option<CacheManager>,
    notifier: ChangeNotifier,
}

/// Wires collaborators and the optional manifest cache.
#[derive(Default)]
pub struct ExportManagerBuilder {
    introspector: Option<Arc<dyn Introspector>>,
    activator: Option<Arc<dyn Activator>>,
    cache: Option<CacheManager>,
    cache_config: Option<CacheConfig>,
}

impl ExportManagerBuilder {
    pub fn introspector(mut self, introspector: Arc<dyn Introspector>) -> Self {
        self.introspector = Some(introspector);
        self
    }

    pub fn activator(mut self, activator: Arc<dyn Activator>) -> Self {
        self.activator = Some(activator);
        self
    }

    /// Uses one object as both introspector and activator.
    pub fn catalog<C>(self, catalog: Arc<C>) -> Self
    where
        C: Introspector + Activator + 'static,
    {
        self.introspector(Arc::clone(&catalog) as Arc<dyn Introspector>)
            .activator(catalog as Arc<dyn Activator>)
    }

    pub fn cache(mut self, cache: CacheManager) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Builds the cache from configuration at `build()` time.
    pub fn cache_config(mut self, config: CacheConfig) -> Self {
        self.cache_config = Some(config);
        self
    }

    /// # Errors
    /// - `Storage` when a configured SQLite cache cannot be opened.
    pub fn build(self) -> RegistryResult<ExportManager> {
        let cache = match (self.cache, self.cache_config) {
            (Some(cache), _) => Some(cache),
            (None, Some(config)) => Some(CacheManager::from_config(&config)?),
            (None, None) => None,
        };
        let fallback = Arc::new(StaticCatalog::new());

        Ok(ExportManager {
            state: RwLock::new(RegistryState::default()),
            introspector: self
                .introspector
                .unwrap_or_else(|| Arc::clone(&fallback) as Arc<dyn Introspector>),
            activator: self
                .activator
                .unwrap_or_else(|| fallback as Arc<dyn Activator>),
            cache,
            notifier: ChangeNotifier::default(),
        })
    }
}

impl ExportManager {
    pub fn builder() -> ExportManagerBuilder {
        ExportManagerBuilder::default()
    }

    /// Loads a module and applies its exports under its duplicate policy.
    ///
    /// Returns `Ok(false)` when the module is already loaded.
    ///
    /// # Errors
    /// - `ModuleScanFailure` when introspection fails or an implementation
    ///   has no constructor. Nothing of the module is applied in that case.
    pub fn load_module(&self, descriptor: ModuleDescriptor) -> RegistryResult<bool> {
        let started_at = Instant::now();
        let id = descriptor.id().clone();

        if self.state.read().modules.is_loaded(&id) {
            debug!("event=module_load module=registry status=skipped module_id={id} reason=already_loaded");
            return Ok(false);
        }

        let (candidates, source) = match self
            .cache
            .as_ref()
            .and_then(|cache| cache.load(&descriptor, self.activator.as_ref()))
        {
            Some(candidates) => (candidates, LoadSource::Cache),
            None => match self.introspector.scan(&descriptor) {
                Ok(candidates) => (candidates, LoadSource::Scan),
                Err(source) => return Err(load_failed(id, source, started_at)),
            },
        };

        let handles = match self.stage(&id, candidates) {
            Ok(handles) => handles,
            Err(source) => return Err(load_failed(id, source, started_at)),
        };
        let scanned_outside_cache = source == LoadSource::Scan
            && self.cache.is_some()
            && descriptor.fingerprint().is_some();
        let policy = descriptor.policy();

        let mut touched = BTreeSet::new();
        let (contributed, displaced) = {
            let mut state = self.state.write();
            if state.modules.is_loaded(&id) {
                debug!("event=module_load module=registry status=skipped module_id={id} reason=already_loaded");
                return Ok(false);
            }

            let mut contributed = Vec::with_capacity(handles.len());
            let mut displaced = Vec::new();
            for handle in handles {
                match state.index.insert(Arc::clone(&handle), policy) {
                    InsertOutcome::Skipped => continue,
                    InsertOutcome::Displaced(chain) => {
                        touched.extend(chain.iter().map(|member| member.handle().contract().clone()));
                        displaced.push(chain);
                    }
                    InsertOutcome::Added | InsertOutcome::Overrode => {}
                }
                touched.insert(handle.contract().clone());
                contributed.push(handle);
            }

            let counts = (contributed.len(), displaced.iter().map(Vec::len).sum::<usize>());
            state.modules.insert(ModuleEntry::new(
                descriptor,
                contributed,
                displaced,
                scanned_outside_cache,
            ));
            counts
        };

        info!(
            "event=module_load module=registry status=ok module_id={} policy={} source={} exports={} displaced={} duration_ms={}",
            id,
            policy.as_str(),
            source.as_str(),
            contributed,
            displaced,
            started_at.elapsed().as_millis()
        );
        self.notifier.publish(touched);
        Ok(true)
    }

    /// Unloads a module and restores the chains it displaced.
    ///
    /// Restored chains keep directly registered exports and module exports
    /// whose origin is still loaded.
    ///
    /// Returns `false` when the module was not loaded.
    pub fn unload_module(&self, id: &ModuleId) -> bool {
        let started_at = Instant::now();
        let (touched, removed, restored) = {
            let mut state = self.state.write();
            let Some(entry) = state.modules.remove(id) else {
                debug!("event=module_unload module=registry status=skipped module_id={id} reason=not_loaded");
                return false;
            };
            let removed = entry.contributed().len();
            let mut touched = state.index.remove_origin(id);

            let mut restored = 0usize;
            for chain in entry.into_displaced() {
                let survivors: Vec<_> = chain
                    .into_iter()
                    .filter(|member| {
                        member.is_direct() || state.modules.is_loaded(member.handle().origin())
                    })
                    .collect();
                if state.index.restore_chain(&survivors) {
                    touched.extend(
                        survivors
                            .iter()
                            .map(|member| member.handle().contract().clone()),
                    );
                    restored += survivors.len();
                }
            }
            (touched, removed, restored)
        };

        info!(
            "event=module_unload module=registry status=ok module_id={} exports={} restored={} duration_ms={}",
            id,
            removed,
            restored,
            started_at.elapsed().as_millis()
        );
        self.notifier.publish(touched);
        true
    }

    /// Registers one export outside any module load.
    ///
    /// # Errors
    /// - `DuplicateLocation` when the location is already registered.
    pub fn register(&self, handle: Arc<ExportHandle>) -> RegistryResult<()> {
        let contract = handle.contract().clone();
        let location = handle.location().clone();
        if let Err(err) = self.state.write().index.insert_direct(handle) {
            warn!(
                "event=export_register module=registry status=error location={} error_code=duplicate_location",
                location
            );
            return Err(err);
        }

        debug!("event=export_register module=registry status=ok location={location}");
        self.notifier.publish(BTreeSet::from([contract]));
        Ok(())
    }

    /// Registers a pre-built value as a dynamic export and returns its handle.
    pub fn register_value<T>(&self, record: ExportRecord, value: T) -> RegistryResult<Arc<ExportHandle>>
    where
        T: Any + Send + Sync,
    {
        let handle = Arc::new(ExportHandle::bound_value(record, value));
        self.register(Arc::clone(&handle))?;
        Ok(handle)
    }

    /// Removes an export that was registered through `register`.
    ///
    /// Module-owned exports are left alone; unload their module instead.
    pub fn unregister(&self, handle: &Arc<ExportHandle>) -> bool {
        let removed = self.state.write().index.remove_direct(handle);
        debug!(
            "event=export_unregister module=registry status={} location={}",
            if removed { "ok" } else { "skipped" },
            handle.location()
        );
        if removed {
            self.notifier
                .publish(BTreeSet::from([handle.contract().clone()]));
        }
        removed
    }

    /// Removes whichever export heads the chain at `location`.
    pub fn unregister_location(&self, location: &Location) -> Option<Arc<ExportHandle>> {
        let removed = self.state.write().index.remove_location(location);
        debug!(
            "event=export_unregister module=registry status={} location={}",
            if removed.is_some() { "ok" } else { "skipped" },
            location
        );
        if let Some(handle) = &removed {
            self.notifier
                .publish(BTreeSet::from([handle.contract().clone()]));
        }
        removed
    }

    /// Handle resolved through the override chain at `location`.
    pub fn get_export(&self, location: &Location) -> Option<Arc<ExportHandle>> {
        self.state.read().index.resolve(location)
    }

    pub fn get_export_instance(&self, location: &Location) -> Option<Instance> {
        self.get_export(location).map(|handle| handle.instance())
    }

    /// Fresh instance of the export at `location`; `Ok(None)` if nothing is there.
    ///
    /// # Errors
    /// - `UnsupportedOperation` for dynamic exports.
    pub fn create_export_instance(&self, location: &Location) -> RegistryResult<Option<Instance>> {
        self.get_export(location)
            .map(|handle| handle.create_instance())
            .transpose()
    }

    pub fn get_first_export(&self, contract: &ContractKey) -> Option<Arc<ExportHandle>> {
        self.get_exports(contract).into_iter().next()
    }

    pub fn get_exports(&self, contract: &ContractKey) -> Vec<Arc<ExportHandle>> {
        self.state.read().index.lookup(contract)
    }

    pub fn get_export_instances(&self, contract: &ContractKey) -> Vec<Instance> {
        instances(self.get_exports(contract))
    }

    /// Exports of `capability` under any of `names`; repeated names count once.
    pub fn get_many_exports<S: AsRef<str>>(
        &self,
        capability: &CapabilityId,
        names: &[S],
    ) -> Vec<Arc<ExportHandle>> {
        self.state.read().index.lookup_many(capability, names)
    }

    pub fn get_many_export_instances<S: AsRef<str>>(
        &self,
        capability: &CapabilityId,
        names: &[S],
    ) -> Vec<Instance> {
        instances(self.get_many_exports(capability, names))
    }

    pub fn get_typed_exports<T>(&self, contract: &ContractKey) -> Vec<Export<T>>
    where
        T: Any + Send + Sync,
    {
        self.get_exports(contract)
            .into_iter()
            .map(Export::new)
            .collect()
    }

    pub fn get_typed_export<T>(&self, location: &Location) -> Option<Export<T>>
    where
        T: Any + Send + Sync,
    {
        self.get_export(location).map(Export::new)
    }

    /// Instances of every export of `contract`, downcast to `T`.
    ///
    /// # Errors
    /// - `InstanceTypeMismatch` on the first instance of another type.
    pub fn get_typed_instances<T>(&self, contract: &ContractKey) -> RegistryResult<Vec<Arc<T>>>
    where
        T: Any + Send + Sync,
    {
        self.get_exports(contract)
            .into_iter()
            .map(|handle| downcast(handle.instance(), handle.location()))
            .collect()
    }

    /// Exports currently in the index whose origin is `id`, restored ones included.
    pub fn exports_from_module(&self, id: &ModuleId) -> Vec<Arc<ExportHandle>> {
        self.state.read().index.exports_from(id)
    }

    pub fn export_records_from_module(&self, id: &ModuleId) -> Vec<Arc<ExportRecord>> {
        self.exports_from_module(id)
            .iter()
            .map(|handle| Arc::clone(handle.record()))
            .collect()
    }

    /// Descriptors of loaded modules in load order.
    pub fn loaded_modules(&self) -> Vec<ModuleDescriptor> {
        self.state.read().modules.loaded()
    }

    pub fn is_loaded(&self, id: &ModuleId) -> bool {
        self.state.read().modules.is_loaded(id)
    }

    /// Number of stored exports, shadowed ones included.
    pub fn export_count(&self) -> usize {
        self.state.read().index.len()
    }

    /// Modules scanned outside the cache and not flushed yet.
    pub fn modules_pending_flush(&self) -> Vec<ModuleId> {
        self.state
            .read()
            .modules
            .pending_flush()
            .into_iter()
            .map(|descriptor| descriptor.id().clone())
            .collect()
    }

    /// Persists export sets of modules scanned outside the cache.
    ///
    /// Returns how many modules are now cached. Cache failures are logged and
    /// leave the affected modules pending.
    pub fn flush_cache(&self) -> usize {
        let Some(cache) = &self.cache else {
            return 0;
        };

        let pending: Vec<_> = {
            let state = self.state.read();
            state
                .modules
                .pending_flush()
                .into_iter()
                .map(|descriptor| {
                    let exports = state.index.exports_from(descriptor.id());
                    (descriptor, exports)
                })
                .collect()
        };
        if pending.is_empty() {
            return 0;
        }

        let persisted = cache.flush(&pending);
        let mut state = self.state.write();
        for descriptor in &persisted {
            state.modules.mark_flushed(descriptor);
        }
        persisted.len()
    }

    /// Calls `callback` after each transaction touching `capability`.
    pub fn subscribe<F>(&self, capability: CapabilityId, callback: F) -> SubscriptionId
    where
        F: Fn(&ExportsChanged) + Send + Sync + 'static,
    {
        self.notifier.subscribe(Some(capability), callback)
    }

    /// Calls `callback` after every transaction with the full changed-key set.
    pub fn subscribe_all<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&ExportsChanged) + Send + Sync + 'static,
    {
        self.notifier.subscribe(None, callback)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.notifier.unsubscribe(id)
    }

    fn stage(
        &self,
        origin: &ModuleId,
        candidates: Vec<ExportCandidate>,
    ) -> Result<Vec<Arc<ExportHandle>>, ScanError> {
        candidates
            .into_iter()
            .map(|candidate| -> Result<Arc<ExportHandle>, ScanError> {
                let factory = self.activator.resolve(&candidate.implementation).ok_or_else(|| {
                    ScanError::new(format!(
                        "no constructor for implementation `{}`",
                        candidate.implementation
                    ))
                })?;

                let mut record =
                    ExportRecord::new(candidate.contract, candidate.implementation, origin.clone())
                        .with_metadata(candidate.metadata);
                if let Some(location) = candidate.location {
                    record = record.with_location(location);
                }
                if let Some(display_name) = candidate.display_name {
                    record = record.with_display_name(display_name);
                }
                Ok(Arc::new(ExportHandle::lazy(record, factory)))
            })
            .collect()
    }

}

fn load_failed(module: ModuleId, source: ScanError, started_at: Instant) -> RegistryError {
    error!(
        "event=module_load module=registry status=error module_id={} error_code=module_scan_failed duration_ms={} error={}",
        module,
        started_at.elapsed().as_millis(),
        source
    );
    RegistryError::ModuleScanFailure { module, source }
}

fn instances(handles: Vec<Arc<ExportHandle>>) -> Vec<Instance> {
    handles.iter().map(|handle| handle.instance()).collect()
}

#[cfg(test)]
mod tests {
    use super::ExportManager;
    use crate::export::Factory;
    use crate::introspect::{ExportCandidate, StaticCatalog};
    use crate::model::{ContractKey, ImplementationId, ModuleDescriptor, ModuleId};
    use std::sync::Arc;

    fn catalog() -> Arc<StaticCatalog> {
        Arc::new(
            StaticCatalog::new()
                .implementation(ImplementationId::new("Circle").expect("impl"), Factory::of(|| 1u8))
                .export(
                    ModuleId::new("shapes").expect("module"),
                    ExportCandidate::new(
                        ContractKey::parse("Shape", None).expect("contract"),
                        ImplementationId::new("Circle").expect("impl"),
                    ),
                ),
        )
    }

    #[test]
    fn builder_without_collaborators_supports_dynamic_registration_only() {
        let manager = ExportManager::builder().build().expect("manager");
        let err = manager
            .load_module(ModuleDescriptor::new(ModuleId::new("shapes").expect("module"), "1"))
            .expect_err("empty catalog declares nothing");
        assert!(err.to_string().contains("shapes"));
        assert_eq!(manager.export_count(), 0);
    }

    #[test]
    fn without_cache_nothing_is_pending_flush() {
        let manager = ExportManager::builder()
            .catalog(catalog())
            .build()
            .expect("manager");
        manager
            .load_module(ModuleDescriptor::new(ModuleId::new("shapes").expect("module"), "1"))
            .expect("load");
        assert!(manager.modules_pending_flush().is_empty());
        assert_eq!(manager.flush_cache(), 0);
    }

    #[test]
    fn manager_is_shareable_across_threads() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<ExportManager>();
    }
}
