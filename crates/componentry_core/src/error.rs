//! Registry error taxonomy.
//!
//! # Responsibility
//! - Define caller-facing errors for registry operations.
//! - Define cache codec failures; the cache layer absorbs them so they never
//!   reach registry callers.
//!
//! # Invariants
//! - Correctness errors (bad arguments, duplicate registration) surface to the
//!   immediate caller.
//! - Scan failures surface only after the failed load has been unwound.

use crate::db::StoreError;
use crate::model::{Location, ModuleId};
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type RegistryResult<T> = Result<T, RegistryError>;

/// Caller-facing registry error.
#[derive(Debug)]
pub enum RegistryError {
    /// A required identity was empty or otherwise unusable.
    InvalidArgument(String),
    /// Direct registration collided with an already registered location.
    DuplicateLocation(Location),
    /// The operation is not supported by this handle kind.
    UnsupportedOperation(String),
    /// The introspector (or activator) failed while a module was loading.
    ModuleScanFailure { module: ModuleId, source: ScanError },
    /// An instance did not have the type requested by a typed accessor.
    InstanceTypeMismatch {
        location: Location,
        expected: &'static str,
    },
    /// The SQLite cache store could not be opened.
    Storage(StoreError),
}

impl RegistryError {
    pub(crate) fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }
}

impl Display for RegistryError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidArgument(message) => write!(f, "invalid argument: {message}"),
            Self::DuplicateLocation(location) => {
                write!(f, "export with the same location is already registered: {location}")
            }
            Self::UnsupportedOperation(message) => write!(f, "unsupported operation: {message}"),
            Self::ModuleScanFailure { module, source } => {
                write!(f, "failed to scan module `{module}`: {source}")
            }
            Self::InstanceTypeMismatch { location, expected } => {
                write!(f, "instance at {location} is not a `{expected}`")
            }
            Self::Storage(err) => write!(f, "cache storage failed: {err}"),
        }
    }
}

impl From<StoreError> for RegistryError {
    fn from(value: StoreError) -> Self {
        Self::Storage(value)
    }
}

impl Error for RegistryError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::ModuleScanFailure { source, .. } => Some(source),
            Self::Storage(err) => Some(err),
            Self::InvalidArgument(_)
            | Self::DuplicateLocation(_)
            | Self::UnsupportedOperation(_)
            | Self::InstanceTypeMismatch { .. } => None,
        }
    }
}

/// Error raised by an introspector while enumerating module exports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanError {
    message: String,
}

impl ScanError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl Display for ScanError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl Error for ScanError {}

/// Manifest cache failures.
///
/// Always absorbed by the cache layer and degraded to live introspection.
#[derive(Debug)]
pub enum CacheError {
    Miss,
    Stale,
    Decode(String),
    Shape(String),
    Unresolved(String),
    Io(String),
}

impl CacheError {
    /// Stable short code used in log events.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Miss => "cache_miss",
            Self::Stale => "cache_stale",
            Self::Decode(_) => "cache_decode_failed",
            Self::Shape(_) => "cache_shape_mismatch",
            Self::Unresolved(_) => "cache_unresolved_implementation",
            Self::Io(_) => "cache_io_failed",
        }
    }
}

impl Display for CacheError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Miss => write!(f, "no manifest for module"),
            Self::Stale => write!(f, "manifest fingerprint does not match module"),
            Self::Decode(message) => write!(f, "failed to decode manifest: {message}"),
            Self::Shape(message) => write!(f, "manifest has unexpected shape: {message}"),
            Self::Unresolved(implementation) => {
                write!(f, "manifest names unknown implementation: {implementation}")
            }
            Self::Io(message) => write!(f, "cache io failed: {message}"),
        }
    }
}

impl Error for CacheError {}
