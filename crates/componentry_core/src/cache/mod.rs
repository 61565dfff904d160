//! Manifest cache of module export lists.
//!
//! # Responsibility
//! - Restore a module's export candidates from a previous scan.
//! - Persist export sets of modules scanned outside the cache.
//!
//! # Invariants
//! - Manifests are keyed by module fingerprint; a mismatch is a miss.
//! - Every cache failure degrades to a miss or a skipped write. Nothing here
//!   returns an error to registry callers.
//! - Modules without artifact info are never read from or written to the cache.
//!
//! # See also
//! - cache/manifest.rs for the persisted shapes.

pub mod codec;
mod manifest;
pub mod sqlite;

use crate::config::{CacheBackend, CacheConfig};
use crate::error::{CacheError, RegistryResult};
use crate::export::ExportHandle;
use crate::introspect::{Activator, ExportCandidate};
use crate::model::{ModuleDescriptor, ModuleFingerprint};
use log::{debug, info, warn};
use manifest::{CacheIndex, ModuleManifest, FORMAT_VERSION};
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

pub use codec::{CacheCodec, JsonFileCodec};
pub use sqlite::{SqliteCacheCodec, SQLITE_STORE_FILE};

/// File name of the manifest-of-manifests.
pub const CACHE_INDEX_FILE: &str = "cache-index.json";

static UNSAFE_FILE_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^A-Za-z0-9._-]+").expect("valid file name regex"));

pub struct CacheManager {
    directory: PathBuf,
    codec: Box<dyn CacheCodec>,
}

impl CacheManager {
    pub fn new(directory: impl Into<PathBuf>, codec: impl CacheCodec + 'static) -> Self {
        Self {
            directory: directory.into(),
            codec: Box::new(codec),
        }
    }

    /// Builds the manager and its codec from configuration.
    ///
    /// # Errors
    /// - `Storage` when the SQLite store cannot be opened.
    pub fn from_config(config: &CacheConfig) -> RegistryResult<Self> {
        let directory = config.directory().to_path_buf();
        let manager = match config.backend() {
            CacheBackend::Json => Self::new(directory, JsonFileCodec),
            CacheBackend::Sqlite => {
                std::fs::create_dir_all(&directory).map_err(|err| {
                    crate::error::RegistryError::invalid_argument(format!(
                        "failed to create cache directory `{}`: {err}",
                        directory.display()
                    ))
                })?;
                let codec = SqliteCacheCodec::open(directory.join(SQLITE_STORE_FILE))?;
                Self::new(directory, codec)
            }
        };
        info!(
            "event=cache_open module=cache status=ok backend={} dir={}",
            config.backend().as_str(),
            manager.directory.display()
        );
        Ok(manager)
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// `{safe-name}-{safe-version}-{size:x}-{mtime:x}.manifest.json`
    pub fn manifest_path(&self, fingerprint: &ModuleFingerprint) -> PathBuf {
        self.directory.join(format!(
            "{}-{}-{:x}-{:x}.manifest.json",
            safe_segment(&fingerprint.name),
            safe_segment(&fingerprint.version),
            fingerprint.size,
            fingerprint.modified_ms
        ))
    }

    pub fn index_path(&self) -> PathBuf {
        self.directory.join(CACHE_INDEX_FILE)
    }

    /// Returns cached candidates, or `None` on any kind of miss.
    ///
    /// Candidates naming an implementation `activator` cannot resolve make
    /// the whole manifest a miss.
    pub fn load(
        &self,
        descriptor: &ModuleDescriptor,
        activator: &dyn Activator,
    ) -> Option<Vec<ExportCandidate>> {
        let fingerprint = descriptor.fingerprint()?;
        let started_at = Instant::now();

        match self.read_manifest(&fingerprint, activator) {
            Ok(candidates) => {
                debug!(
                    "event=cache_load module=cache status=hit module_id={} exports={} duration_ms={}",
                    descriptor.id(),
                    candidates.len(),
                    started_at.elapsed().as_millis()
                );
                Some(candidates)
            }
            Err(CacheError::Miss) => {
                debug!(
                    "event=cache_load module=cache status=miss module_id={} error_code=cache_miss",
                    descriptor.id()
                );
                None
            }
            Err(err) => {
                warn!(
                    "event=cache_load module=cache status=miss module_id={} error_code={} error={}",
                    descriptor.id(),
                    err.code(),
                    err
                );
                None
            }
        }
    }

    fn read_manifest(
        &self,
        fingerprint: &ModuleFingerprint,
        activator: &dyn Activator,
    ) -> Result<Vec<ExportCandidate>, CacheError> {
        let value = self.codec.decode(&self.manifest_path(fingerprint))?;
        let manifest: ModuleManifest =
            serde_json::from_value(value).map_err(|err| CacheError::Shape(err.to_string()))?;
        if manifest.format_version != FORMAT_VERSION || &manifest.fingerprint != fingerprint {
            return Err(CacheError::Stale);
        }

        let candidates = manifest.into_candidates()?;
        if let Some(unknown) = candidates
            .iter()
            .find(|candidate| activator.resolve(&candidate.implementation).is_none())
        {
            return Err(CacheError::Unresolved(unknown.implementation.to_string()));
        }
        Ok(candidates)
    }

    /// Writes manifests for the given modules and refreshes the cache index.
    ///
    /// Returns the descriptors whose manifests are now persisted, including
    /// those already present for the same fingerprint.
    pub fn flush(&self, modules: &[(ModuleDescriptor, Vec<Arc<ExportHandle>>)]) -> Vec<ModuleDescriptor> {
        let started_at = Instant::now();
        let mut index = self.read_index();
        let previous = index.clone();
        let mut persisted = Vec::with_capacity(modules.len());
        let mut written = 0usize;

        for (descriptor, exports) in modules {
            let Some(fingerprint) = descriptor.fingerprint() else {
                continue;
            };
            let path = self.manifest_path(&fingerprint);
            let present = index.modules.get(&fingerprint.name) == Some(&fingerprint)
                && self.codec.exists(&path);

            if !present {
                if let Err(err) = self.write_manifest(&path, &fingerprint, exports) {
                    warn!(
                        "event=cache_flush module=cache status=error module_id={} error_code={} error={}",
                        descriptor.id(),
                        err.code(),
                        err
                    );
                    continue;
                }
                written += 1;
            }

            index.modules.insert(fingerprint.name.clone(), fingerprint);
            persisted.push(descriptor.clone());
        }

        let index_changed = index != previous;
        if index_changed {
            if let Err(err) = self.write_index(&index) {
                warn!(
                    "event=cache_flush module=cache status=error target=index error_code={} error={}",
                    err.code(),
                    err
                );
            }
        }

        info!(
            "event=cache_flush module=cache status=ok modules={} written={} index_changed={} duration_ms={}",
            persisted.len(),
            written,
            index_changed,
            started_at.elapsed().as_millis()
        );
        persisted
    }

    fn write_manifest(
        &self,
        path: &Path,
        fingerprint: &ModuleFingerprint,
        exports: &[Arc<ExportHandle>],
    ) -> Result<(), CacheError> {
        let manifest = ModuleManifest::capture(fingerprint.clone(), exports);
        let value =
            serde_json::to_value(&manifest).map_err(|err| CacheError::Shape(err.to_string()))?;
        self.codec.encode(path, &value)
    }

    fn read_index(&self) -> CacheIndex {
        let decoded = self.codec.decode(&self.index_path()).and_then(|value| {
            serde_json::from_value::<CacheIndex>(value).map_err(|err| CacheError::Shape(err.to_string()))
        });
        match decoded {
            Ok(index) if index.format_version == FORMAT_VERSION => index,
            Ok(_) => CacheIndex::default(),
            Err(CacheError::Miss) => CacheIndex::default(),
            Err(err) => {
                warn!(
                    "event=cache_index_read module=cache status=error error_code={} error={}",
                    err.code(),
                    err
                );
                CacheIndex::default()
            }
        }
    }

    fn write_index(&self, index: &CacheIndex) -> Result<(), CacheError> {
        let value = serde_json::to_value(index).map_err(|err| CacheError::Shape(err.to_string()))?;
        self.codec.encode(&self.index_path(), &value)
    }
}

fn safe_segment(value: &str) -> String {
    let replaced = UNSAFE_FILE_CHARS.replace_all(value.trim(), "_");
    if replaced.is_empty() {
        "_".to_string()
    } else {
        replaced.into_owned()
    }
}
