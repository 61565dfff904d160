//! Cache document codecs.
//!
//! # Responsibility
//! - Persist and load JSON-shaped documents addressed by path.
//!
//! # Invariants
//! - A missing document decodes as `CacheError::Miss`, never as an IO error.
//! - `JsonFileCodec` never leaves a half-written document at the target path.

use crate::error::CacheError;
use serde_json::Value;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Persists JSON-shaped cache documents.
pub trait CacheCodec: Send + Sync {
    fn decode(&self, path: &Path) -> Result<Value, CacheError>;
    fn encode(&self, path: &Path, value: &Value) -> Result<(), CacheError>;
    fn exists(&self, path: &Path) -> bool;
}

/// Pretty-printed JSON files on disk.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonFileCodec;

impl CacheCodec for JsonFileCodec {
    fn decode(&self, path: &Path) -> Result<Value, CacheError> {
        let bytes = std::fs::read(path).map_err(|err| match err.kind() {
            ErrorKind::NotFound => CacheError::Miss,
            _ => CacheError::Io(format!("read `{}`: {err}", path.display())),
        })?;
        serde_json::from_slice(&bytes).map_err(|err| CacheError::Decode(err.to_string()))
    }

    fn encode(&self, path: &Path, value: &Value) -> Result<(), CacheError> {
        let io = |err: std::io::Error| CacheError::Io(format!("write `{}`: {err}", path.display()));
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(io)?;
        }

        let bytes =
            serde_json::to_vec_pretty(value).map_err(|err| CacheError::Decode(err.to_string()))?;
        let staging = staging_path(path);
        std::fs::write(&staging, bytes).map_err(io)?;
        std::fs::rename(&staging, path).map_err(|err| {
            let _ = std::fs::remove_file(&staging);
            io(err)
        })
    }

    fn exists(&self, path: &Path) -> bool {
        path.is_file()
    }
}

fn staging_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(format!(".{}.tmp", std::process::id()));
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::{CacheCodec, JsonFileCodec};
    use crate::error::CacheError;
    use serde_json::json;

    #[test]
    fn missing_file_is_a_miss() {
        let dir = tempfile::tempdir().expect("temp dir");
        let err = JsonFileCodec
            .decode(&dir.path().join("absent.json"))
            .expect_err("absent document");
        assert!(matches!(err, CacheError::Miss));
    }

    #[test]
    fn garbage_is_a_decode_error() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("broken.json");
        std::fs::write(&path, b"{ not json").expect("write");
        let err = JsonFileCodec.decode(&path).expect_err("broken document");
        assert!(matches!(err, CacheError::Decode(_)));
    }

    #[test]
    fn encode_creates_directories_and_leaves_no_staging_file() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("nested").join("doc.json");
        let value = json!({ "format_version": 1 });

        JsonFileCodec.encode(&path, &value).expect("encode");
        assert!(JsonFileCodec.exists(&path));
        assert_eq!(JsonFileCodec.decode(&path).expect("decode"), value);

        let leftovers: Vec<_> = std::fs::read_dir(path.parent().expect("parent"))
            .expect("read dir")
            .filter_map(Result::ok)
            .filter(|entry| entry.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }
}
