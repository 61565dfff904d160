//! Registry domain model.
//!
//! # Responsibility
//! - Define identities (capability, contract, implementation, module, location).
//! - Define the immutable export record and module descriptors.
//!
//! # Invariants
//! - Every identity type rejects empty values at construction.

pub mod contract;
pub mod module;
pub mod record;

pub use contract::{CapabilityId, ContractKey};
pub use module::{ArtifactInfo, DuplicatePolicy, ModuleDescriptor, ModuleFingerprint, ModuleId};
pub use record::{ExportRecord, ImplementationId, Location, Metadata, LOCATION_SCHEME};
