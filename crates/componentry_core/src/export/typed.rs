//! Typed view over erased export handles.

use crate::error::{RegistryError, RegistryResult};
use crate::export::handle::{ExportHandle, Instance};
use crate::model::{ExportRecord, Location};
use std::any::{type_name, Any};
use std::fmt::{Debug, Formatter};
use std::marker::PhantomData;
use std::sync::Arc;

/// Export handle whose instances are expected to be `T`.
///
/// Capabilities expressed as traits are exported as a sized wrapper such as
/// `Box<dyn Shape + Send + Sync>`.
pub struct Export<T> {
    handle: Arc<ExportHandle>,
    _instance: PhantomData<fn() -> T>,
}

impl<T> Export<T>
where
    T: Any + Send + Sync,
{
    pub fn new(handle: Arc<ExportHandle>) -> Self {
        Self {
            handle,
            _instance: PhantomData,
        }
    }

    pub fn handle(&self) -> &Arc<ExportHandle> {
        &self.handle
    }

    pub fn record(&self) -> &ExportRecord {
        self.handle.record()
    }

    /// Cached-or-new instance, downcast to `T`.
    pub fn instance(&self) -> RegistryResult<Arc<T>> {
        downcast(self.handle.instance(), self.handle.location())
    }

    /// Fresh instance, downcast to `T`.
    pub fn create_instance(&self) -> RegistryResult<Arc<T>> {
        downcast(self.handle.create_instance()?, self.handle.location())
    }
}

impl<T> Clone for Export<T> {
    fn clone(&self) -> Self {
        Self {
            handle: Arc::clone(&self.handle),
            _instance: PhantomData,
        }
    }
}

impl<T> Debug for Export<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Export")
            .field("type", &type_name::<T>())
            .field("handle", &self.handle)
            .finish()
    }
}

pub(crate) fn downcast<T>(instance: Instance, location: &Location) -> RegistryResult<Arc<T>>
where
    T: Any + Send + Sync,
{
    instance
        .downcast::<T>()
        .map_err(|_| RegistryError::InstanceTypeMismatch {
            location: location.clone(),
            expected: type_name::<T>(),
        })
}

#[cfg(test)]
mod tests {
    use super::Export;
    use crate::error::RegistryError;
    use crate::export::{ExportHandle, Factory};
    use crate::model::{ContractKey, ExportRecord, ImplementationId, ModuleId};
    use std::sync::Arc;

    trait Shape: Send + Sync {
        fn sides(&self) -> u32;
    }

    struct Square;

    impl Shape for Square {
        fn sides(&self) -> u32 {
            4
        }
    }

    type DynShape = Box<dyn Shape>;

    fn handle() -> Arc<ExportHandle> {
        let record = ExportRecord::new(
            ContractKey::parse("Shape", None).expect("contract"),
            ImplementationId::new("Square").expect("implementation"),
            ModuleId::new("plugins.shapes").expect("module"),
        );
        Arc::new(ExportHandle::lazy(
            record,
            Factory::of(|| Box::new(Square) as DynShape),
        ))
    }

    #[test]
    fn downcasts_trait_object_wrapper() {
        let export = Export::<DynShape>::new(handle());
        let shape = export.instance().expect("typed instance");
        assert_eq!(shape.sides(), 4);
        assert!(Arc::ptr_eq(&shape, &export.instance().expect("cached")));
    }

    #[test]
    fn reports_type_mismatch() {
        let export = Export::<String>::new(handle());
        let err = export.instance().expect_err("wrong type must fail");
        assert!(matches!(err, RegistryError::InstanceTypeMismatch { .. }));
    }

    #[test]
    fn typed_create_instance_is_fresh() {
        let export = Export::<DynShape>::new(handle());
        let cached = export.instance().expect("cached");
        let fresh = export.create_instance().expect("fresh");
        assert!(!Arc::ptr_eq(&cached, &fresh));
    }
}
