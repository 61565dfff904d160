//! Module identity, duplicate policy and fingerprints.
//!
//! # Invariants
//! - Module ids are non-empty and limited to `[A-Za-z0-9._-]`, starting with
//!   an alphanumeric character, so they are safe inside cache file names.
//! - A fingerprint exists only for modules backed by an artifact.

use crate::error::{RegistryError, RegistryResult};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::path::Path;
use std::sync::Arc;
use std::time::UNIX_EPOCH;

/// Identity of a loadable module.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ModuleId(Arc<str>);

impl ModuleId {
    pub fn new(value: impl AsRef<str>) -> RegistryResult<Self> {
        let value = value.as_ref().trim();
        if value.is_empty() {
            return Err(RegistryError::invalid_argument("module id must not be empty"));
        }
        if !is_valid_module_id(value) {
            return Err(RegistryError::invalid_argument(format!(
                "module id is invalid: {value}"
            )));
        }
        Ok(Self(Arc::from(value)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for ModuleId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

fn is_valid_module_id(value: &str) -> bool {
    let mut chars = value.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphanumeric() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-')
}

/// How a module's exports treat an already registered location.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicatePolicy {
    /// Keep the existing export, drop the new one.
    #[default]
    SkipCurrent,
    /// Shadow the existing export; it comes back when this module unloads.
    OverrideExisting,
    /// Remove the existing chain; restored on unload if its origin is loaded.
    RemoveExisting,
}

impl DuplicatePolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SkipCurrent => "skip_current",
            Self::OverrideExisting => "override_existing",
            Self::RemoveExisting => "remove_existing",
        }
    }
}

/// Size and modification time of a module's backing artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArtifactInfo {
    pub size: u64,
    /// Unix epoch milliseconds.
    pub modified_ms: i64,
}

impl ArtifactInfo {
    pub fn new(size: u64, modified_ms: i64) -> Self {
        Self { size, modified_ms }
    }

    /// Reads size and mtime from a file on disk.
    pub fn from_path(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let metadata = std::fs::metadata(path)?;
        let modified_ms = metadata
            .modified()?
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX))
            .unwrap_or(0);
        Ok(Self::new(metadata.len(), modified_ms))
    }
}

/// Cache validity key of a module artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleFingerprint {
    pub name: String,
    pub version: String,
    pub size: u64,
    pub modified_ms: i64,
}

/// Everything the registry needs to know about a module to load it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleDescriptor {
    id: ModuleId,
    version: String,
    artifact: Option<ArtifactInfo>,
    policy: DuplicatePolicy,
}

impl ModuleDescriptor {
    pub fn new(id: ModuleId, version: impl Into<String>) -> Self {
        Self {
            id,
            version: version.into(),
            artifact: None,
            policy: DuplicatePolicy::default(),
        }
    }

    pub fn with_artifact(mut self, artifact: ArtifactInfo) -> Self {
        self.artifact = Some(artifact);
        self
    }

    pub fn with_policy(mut self, policy: DuplicatePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn id(&self) -> &ModuleId {
        &self.id
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn artifact(&self) -> Option<ArtifactInfo> {
        self.artifact
    }

    pub fn policy(&self) -> DuplicatePolicy {
        self.policy
    }

    /// Returns `None` for modules without a backing artifact; those are never cached.
    pub fn fingerprint(&self) -> Option<ModuleFingerprint> {
        self.artifact.map(|artifact| ModuleFingerprint {
            name: self.id.to_string(),
            version: self.version.clone(),
            size: artifact.size,
            modified_ms: artifact.modified_ms,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{ArtifactInfo, DuplicatePolicy, ModuleDescriptor, ModuleId};
    use std::io::Write;

    #[test]
    fn module_id_accepts_dotted_names() {
        let id = ModuleId::new(" Plugins.Shapes-2 ").expect("valid id");
        assert_eq!(id.as_str(), "Plugins.Shapes-2");
    }

    #[test]
    fn module_id_rejects_path_like_values() {
        assert!(ModuleId::new("../escape").is_err());
        assert!(ModuleId::new("a/b").is_err());
        assert!(ModuleId::new("").is_err());
    }

    #[test]
    fn default_policy_is_skip_current() {
        let descriptor = ModuleDescriptor::new(ModuleId::new("m").expect("id"), "1.0.0");
        assert_eq!(descriptor.policy(), DuplicatePolicy::SkipCurrent);
    }

    #[test]
    fn fingerprint_requires_artifact() {
        let descriptor = ModuleDescriptor::new(ModuleId::new("m").expect("id"), "1.0.0");
        assert!(descriptor.fingerprint().is_none());

        let descriptor = descriptor.with_artifact(ArtifactInfo::new(42, 1_700_000_000_000));
        let fingerprint = descriptor.fingerprint().expect("fingerprint");
        assert_eq!(fingerprint.name, "m");
        assert_eq!(fingerprint.version, "1.0.0");
        assert_eq!(fingerprint.size, 42);
    }

    #[test]
    fn artifact_info_reads_file_size() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        file.write_all(b"module bytes").expect("write");
        let info = ArtifactInfo::from_path(file.path()).expect("artifact info");
        assert_eq!(info.size, 12);
        assert!(info.modified_ms > 0);
    }

    #[test]
    fn policy_serializes_as_snake_case() {
        let value = serde_json::to_value(DuplicatePolicy::OverrideExisting).expect("serialize");
        assert_eq!(value, serde_json::json!("override_existing"));
    }
}
