//! Core of the componentry runtime component registry.
//! Modules contribute exports of named capabilities; consumers resolve them by
//! contract key or location while modules load and unload at runtime.

pub mod cache;
pub mod config;
pub mod db;
pub mod error;
pub mod export;
pub mod index;
pub mod introspect;
pub mod logging;
pub mod model;
pub mod notify;
pub mod registry;

pub use cache::{CacheCodec, CacheManager, JsonFileCodec, SqliteCacheCodec};
pub use config::{CacheBackend, CacheConfig};
pub use error::{CacheError, RegistryError, RegistryResult, ScanError};
pub use export::{Export, ExportHandle, Factory, Instance};
pub use index::{DisplacedExport, ExportIndex, InsertOutcome};
pub use introspect::{Activator, ExportCandidate, Introspector, StaticCatalog};
pub use logging::{default_log_level, init_logging, logging_status};
pub use model::{
    ArtifactInfo, CapabilityId, ContractKey, DuplicatePolicy, ExportRecord, ImplementationId,
    Location, Metadata, ModuleDescriptor, ModuleFingerprint, ModuleId,
};
pub use notify::{ExportsChanged, SubscriptionId};
pub use registry::{ExportManager, ExportManagerBuilder};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
