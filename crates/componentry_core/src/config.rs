//! Manifest cache configuration.
//!
//! # Invariants
//! - The cache directory is absolute and non-empty once a config exists.

use crate::error::{RegistryError, RegistryResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Storage backend for cached manifests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheBackend {
    /// One pretty-printed JSON file per document.
    #[default]
    Json,
    /// Documents stored in `cache.sqlite3` inside the cache directory.
    Sqlite,
}

impl CacheBackend {
    pub fn parse(value: &str) -> RegistryResult<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "sqlite" => Ok(Self::Sqlite),
            other => Err(RegistryError::invalid_argument(format!(
                "unsupported cache backend `{other}`; expected json|sqlite"
            ))),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Sqlite => "sqlite",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    directory: PathBuf,
    backend: CacheBackend,
}

impl CacheConfig {
    /// # Errors
    /// - `InvalidArgument` when `directory` is empty or relative.
    pub fn new(directory: &str, backend: CacheBackend) -> RegistryResult<Self> {
        Ok(Self {
            directory: normalize_cache_dir(directory)?,
            backend,
        })
    }

    pub fn json(directory: &str) -> RegistryResult<Self> {
        Self::new(directory, CacheBackend::Json)
    }

    pub fn sqlite(directory: &str) -> RegistryResult<Self> {
        Self::new(directory, CacheBackend::Sqlite)
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn backend(&self) -> CacheBackend {
        self.backend
    }
}

fn normalize_cache_dir(directory: &str) -> RegistryResult<PathBuf> {
    let trimmed = directory.trim();
    if trimmed.is_empty() {
        return Err(RegistryError::invalid_argument("cache directory cannot be empty"));
    }
    let path = Path::new(trimmed);
    if !path.is_absolute() {
        return Err(RegistryError::invalid_argument(format!(
            "cache directory must be an absolute path, got `{trimmed}`"
        )));
    }
    Ok(path.to_path_buf())
}
