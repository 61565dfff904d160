//! Lazily instantiating export handles.
//!
//! # Responsibility
//! - Wrap exactly one export record.
//! - Construct instances on demand and reuse them while they are referenced.
//!
//! # Invariants
//! - A lazy handle only keeps a weak reference to its cached instance; once all
//!   callers drop it the next `instance()` builds a fresh one.
//! - `create_instance()` never touches the cache.
//! - A bound (dynamic) handle never constructs anything.
//! - Construction runs without holding the cache lock; a racing double
//!   construction keeps whichever instance was stored first.

use crate::error::{RegistryError, RegistryResult};
use crate::model::{ContractKey, ExportRecord, Location, ModuleId};
use parking_lot::Mutex;
use std::any::Any;
use std::fmt::{Debug, Formatter};
use std::sync::{Arc, Weak};

/// Type-erased export instance.
pub type Instance = Arc<dyn Any + Send + Sync>;

type Constructor = dyn Fn() -> Instance + Send + Sync;

/// Constructor of instances for one implementation.
#[derive(Clone)]
pub struct Factory(Arc<Constructor>);

impl Factory {
    pub fn new<F>(constructor: F) -> Self
    where
        F: Fn() -> Instance + Send + Sync + 'static,
    {
        Self(Arc::new(constructor))
    }

    /// Wraps a constructor of a concrete value type.
    pub fn of<T, F>(constructor: F) -> Self
    where
        T: Any + Send + Sync,
        F: Fn() -> T + Send + Sync + 'static,
    {
        Self::new(move || Arc::new(constructor()) as Instance)
    }

    /// Builds `T::default()` on every call.
    pub fn default_of<T>() -> Self
    where
        T: Any + Default + Send + Sync,
    {
        Self::of(T::default)
    }

    pub fn build(&self) -> Instance {
        (self.0)()
    }
}

impl Debug for Factory {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str("Factory(..)")
    }
}

enum Binding {
    Lazy {
        factory: Factory,
        cached: Mutex<Option<Weak<dyn Any + Send + Sync>>>,
    },
    Bound(Instance),
}

/// Reusable wrapper around one export record.
pub struct ExportHandle {
    record: Arc<ExportRecord>,
    binding: Binding,
}

impl ExportHandle {
    /// Handle that constructs instances through `factory`.
    pub fn lazy(record: ExportRecord, factory: Factory) -> Self {
        Self {
            record: Arc::new(record),
            binding: Binding::Lazy {
                factory,
                cached: Mutex::new(None),
            },
        }
    }

    /// Dynamic handle bound to a pre-built instance.
    pub fn bound(record: ExportRecord, instance: Instance) -> Self {
        Self {
            record: Arc::new(record),
            binding: Binding::Bound(instance),
        }
    }

    /// Dynamic handle bound to a concrete value.
    pub fn bound_value<T>(record: ExportRecord, value: T) -> Self
    where
        T: Any + Send + Sync,
    {
        Self::bound(record, Arc::new(value))
    }

    pub fn record(&self) -> &Arc<ExportRecord> {
        &self.record
    }

    pub fn contract(&self) -> &ContractKey {
        self.record.contract()
    }

    pub fn location(&self) -> &Location {
        self.record.location()
    }

    pub fn origin(&self) -> &ModuleId {
        self.record.origin()
    }

    pub fn is_dynamic(&self) -> bool {
        matches!(self.binding, Binding::Bound(_))
    }

    /// Returns the live cached instance, constructing one if none is alive.
    pub fn instance(&self) -> Instance {
        match &self.binding {
            Binding::Bound(instance) => Arc::clone(instance),
            Binding::Lazy { factory, cached } => {
                if let Some(instance) = upgrade(&cached.lock()) {
                    return instance;
                }

                let built = factory.build();
                let mut slot = cached.lock();
                if let Some(existing) = upgrade(&slot) {
                    return existing;
                }
                *slot = Some(Arc::downgrade(&built));
                built
            }
        }
    }

    /// Returns the cached instance without constructing one.
    pub fn cached_instance(&self) -> Option<Instance> {
        match &self.binding {
            Binding::Bound(instance) => Some(Arc::clone(instance)),
            Binding::Lazy { cached, .. } => upgrade(&cached.lock()),
        }
    }

    /// Always constructs a fresh, uncached instance.
    ///
    /// # Errors
    /// - `UnsupportedOperation` for dynamic handles.
    pub fn create_instance(&self) -> RegistryResult<Instance> {
        match &self.binding {
            Binding::Lazy { factory, .. } => Ok(factory.build()),
            Binding::Bound(_) => Err(RegistryError::UnsupportedOperation(format!(
                "cannot create a new instance of dynamic export {}",
                self.record.location()
            ))),
        }
    }
}

fn upgrade(slot: &Option<Weak<dyn Any + Send + Sync>>) -> Option<Instance> {
    slot.as_ref().and_then(Weak::upgrade)
}

impl Debug for ExportHandle {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExportHandle")
            .field("location", self.record.location())
            .field("origin", self.record.origin())
            .field("dynamic", &self.is_dynamic())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::{ExportHandle, Factory, Instance};
    use crate::error::RegistryError;
    use crate::model::{ContractKey, ExportRecord, ImplementationId, ModuleId};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Debug, Default)]
    struct Circle;

    fn record() -> ExportRecord {
        ExportRecord::new(
            ContractKey::parse("Shape", None).expect("contract"),
            ImplementationId::new("Circle").expect("implementation"),
            ModuleId::new("plugins.shapes").expect("module"),
        )
    }

    fn counting_factory(counter: Arc<AtomicUsize>) -> Factory {
        Factory::of(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Circle
        })
    }

    #[test]
    fn instance_is_reused_while_referenced() {
        let built = Arc::new(AtomicUsize::new(0));
        let handle = ExportHandle::lazy(record(), counting_factory(Arc::clone(&built)));

        let first = handle.instance();
        let second = handle.instance();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(built.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn instance_is_rebuilt_after_reclamation() {
        struct Serial(usize);

        let built = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&built);
        let handle = ExportHandle::lazy(
            record(),
            Factory::of(move || Serial(counter.fetch_add(1, Ordering::SeqCst) + 1)),
        );

        let first = handle.instance();
        assert_eq!(first.downcast_ref::<Serial>().expect("serial").0, 1);
        drop(first);
        assert!(handle.cached_instance().is_none());

        let second = handle.instance();
        assert_eq!(second.downcast_ref::<Serial>().expect("serial").0, 2);
        assert_eq!(built.load(Ordering::SeqCst), 2);
        assert!(handle.cached_instance().is_some());
    }

    #[test]
    fn create_instance_is_always_fresh() {
        let handle = ExportHandle::lazy(record(), Factory::default_of::<Circle>());
        let cached = handle.instance();
        let fresh = handle.create_instance().expect("lazy handle constructs");
        assert!(!Arc::ptr_eq(&cached, &fresh));
        assert!(Arc::ptr_eq(&cached, &handle.instance()));
    }

    #[test]
    fn bound_handle_returns_fixed_instance() {
        let handle = ExportHandle::bound_value(record(), Circle);
        assert!(handle.is_dynamic());
        assert!(Arc::ptr_eq(&handle.instance(), &handle.instance()));
    }

    #[test]
    fn bound_handle_rejects_create_instance() {
        let handle = ExportHandle::bound_value(record(), Circle);
        let err = handle
            .create_instance()
            .expect_err("dynamic handles cannot construct");
        assert!(matches!(err, RegistryError::UnsupportedOperation(_)));
    }

    #[test]
    fn concurrent_instance_calls_settle_on_one_cached_value() {
        let handle = Arc::new(ExportHandle::lazy(record(), Factory::default_of::<Circle>()));
        let held: Vec<Instance> = std::thread::scope(|scope| {
            let workers: Vec<_> = (0..8)
                .map(|_| {
                    let handle = Arc::clone(&handle);
                    scope.spawn(move || handle.instance())
                })
                .collect();
            workers
                .into_iter()
                .map(|worker| worker.join().expect("worker"))
                .collect()
        });

        let cached = handle.cached_instance().expect("cached while held");
        assert!(held.iter().any(|instance| Arc::ptr_eq(instance, &cached)));
    }
}
