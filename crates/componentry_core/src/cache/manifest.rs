//! Persisted manifest shapes.

use crate::error::CacheError;
use crate::export::ExportHandle;
use crate::introspect::ExportCandidate;
use crate::model::{ContractKey, ImplementationId, Location, Metadata, ModuleFingerprint};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

pub(crate) const FORMAT_VERSION: u32 = 1;

/// Export list of one module, keyed by its fingerprint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct ModuleManifest {
    pub format_version: u32,
    pub fingerprint: ModuleFingerprint,
    pub exports: Vec<ExportDeclaration>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct ExportDeclaration {
    pub capability: String,
    #[serde(default)]
    pub name: String,
    pub implementation: String,
    /// Only written when it differs from the derived location.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: Metadata,
}

/// Manifest-of-manifests: module name to the fingerprint last written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct CacheIndex {
    pub format_version: u32,
    #[serde(default)]
    pub modules: BTreeMap<String, ModuleFingerprint>,
}

impl Default for CacheIndex {
    fn default() -> Self {
        Self {
            format_version: FORMAT_VERSION,
            modules: BTreeMap::new(),
        }
    }
}

impl ModuleManifest {
    pub(crate) fn capture(fingerprint: ModuleFingerprint, exports: &[Arc<ExportHandle>]) -> Self {
        Self {
            format_version: FORMAT_VERSION,
            fingerprint,
            exports: exports.iter().map(|handle| ExportDeclaration::capture(handle)).collect(),
        }
    }

    pub(crate) fn into_candidates(self) -> Result<Vec<ExportCandidate>, CacheError> {
        self.exports
            .into_iter()
            .map(ExportDeclaration::into_candidate)
            .collect()
    }
}

impl ExportDeclaration {
    fn capture(handle: &ExportHandle) -> Self {
        let record = handle.record();
        Self {
            capability: record.contract().capability().as_str().to_string(),
            name: record.contract().name().to_string(),
            implementation: record.implementation().as_str().to_string(),
            location: record
                .has_explicit_location()
                .then(|| record.location().as_str().to_string()),
            display_name: record.display_name().map(str::to_string),
            metadata: record.metadata().clone(),
        }
    }

    fn into_candidate(self) -> Result<ExportCandidate, CacheError> {
        let shape = |err: crate::error::RegistryError| CacheError::Shape(err.to_string());
        let contract = ContractKey::parse(&self.capability, Some(self.name.as_str())).map_err(shape)?;
        let implementation = ImplementationId::new(&self.implementation).map_err(shape)?;
        let location = self.location.map(Location::parse).transpose().map_err(shape)?;

        Ok(ExportCandidate {
            contract,
            implementation,
            location,
            display_name: self.display_name,
            metadata: self.metadata,
        })
    }
}
