//! Export records and location derivation.
//!
//! # Responsibility
//! - Describe one exported implementation immutably.
//! - Derive the deterministic location identifier of an export.
//!
//! # Invariants
//! - The default location depends only on capability, contract name and
//!   implementation identity, never on the declaring module.
//! - Records are shared as `Arc<ExportRecord>` and never mutated afterwards.

use crate::error::{RegistryError, RegistryResult};
use crate::model::contract::ContractKey;
use crate::model::module::ModuleId;
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

/// Scheme prefix of derived locations.
pub const LOCATION_SCHEME: &str = "export:";

/// Read-only export metadata.
pub type Metadata = BTreeMap<String, serde_json::Value>;

/// Opaque identity of a concrete implementation.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ImplementationId(Arc<str>);

impl ImplementationId {
    pub fn new(value: impl AsRef<str>) -> RegistryResult<Self> {
        let value = value.as_ref();
        if value.trim().is_empty() {
            return Err(RegistryError::invalid_argument(
                "implementation identity must not be empty",
            ));
        }
        Ok(Self(Arc::from(value)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for ImplementationId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Unique location of an export.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Location(Arc<str>);

impl Location {
    /// Accepts an explicit location string (e.g. from a manifest).
    pub fn parse(value: impl AsRef<str>) -> RegistryResult<Self> {
        let value = value.as_ref().trim();
        if value.is_empty() {
            return Err(RegistryError::invalid_argument("location must not be empty"));
        }
        Ok(Self(Arc::from(value)))
    }

    /// Derives the default location for a contract/implementation pair.
    ///
    /// Format: `export:{capability}[/{name}]/{implementation}` with every
    /// segment percent-escaped, so `/` only ever separates segments.
    pub fn derive(contract: &ContractKey, implementation: &ImplementationId) -> Self {
        let capability = urlencoding::encode(contract.capability().as_str());
        let implementation = urlencoding::encode(implementation.as_str());
        let mut value = String::with_capacity(
            LOCATION_SCHEME.len() + capability.len() + implementation.len() + 16,
        );
        value.push_str(LOCATION_SCHEME);
        value.push_str(&capability);
        if !contract.is_unnamed() {
            value.push('/');
            value.push_str(&urlencoding::encode(contract.name()));
        }
        value.push('/');
        value.push_str(&implementation);
        Self(Arc::from(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for Location {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Immutable description of one exported implementation.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportRecord {
    contract: ContractKey,
    implementation: ImplementationId,
    origin: ModuleId,
    location: Location,
    display_name: Option<String>,
    metadata: Metadata,
}

impl ExportRecord {
    /// Creates a record with the derived default location.
    pub fn new(contract: ContractKey, implementation: ImplementationId, origin: ModuleId) -> Self {
        let location = Location::derive(&contract, &implementation);
        Self {
            contract,
            implementation,
            origin,
            location,
            display_name: None,
            metadata: Metadata::new(),
        }
    }

    /// Overrides the derived location, e.g. to target another export's chain.
    pub fn with_location(mut self, location: Location) -> Self {
        self.location = location;
        self
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        self.display_name = (!name.trim().is_empty()).then_some(name);
        self
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn contract(&self) -> &ContractKey {
        &self.contract
    }

    pub fn implementation(&self) -> &ImplementationId {
        &self.implementation
    }

    pub fn origin(&self) -> &ModuleId {
        &self.origin
    }

    pub fn location(&self) -> &Location {
        &self.location
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// Whether the location differs from the derived default.
    pub fn has_explicit_location(&self) -> bool {
        self.location != Location::derive(&self.contract, &self.implementation)
    }

    /// Friendly name; falls back to the implementation identity.
    pub fn name(&self) -> &str {
        self.display_name
            .as_deref()
            .unwrap_or_else(|| self.implementation.as_str())
    }

    pub(crate) fn display_name(&self) -> Option<&str> {
        self.display_name.as_deref()
    }

    /// `name - origin`, or `name - implementation - origin` for renamed exports.
    pub fn full_name(&self) -> String {
        match self.display_name.as_deref() {
            Some(name) if name != self.implementation.as_str() => {
                format!("{name} - {} - {}", self.implementation, self.origin)
            }
            _ => format!("{} - {}", self.implementation, self.origin),
        }
    }
}

impl Display for ExportRecord {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::{ExportRecord, ImplementationId, Location};
    use crate::model::{ContractKey, ModuleId};

    fn record(capability: &str, name: Option<&str>, implementation: &str, origin: &str) -> ExportRecord {
        ExportRecord::new(
            ContractKey::parse(capability, name).expect("contract"),
            ImplementationId::new(implementation).expect("implementation"),
            ModuleId::new(origin).expect("module"),
        )
    }

    #[test]
    fn derived_location_is_independent_of_origin() {
        let a = record("Shape", None, "Circle", "plugins.a");
        let b = record("Shape", None, "Circle", "plugins.b");
        assert_eq!(a.location(), b.location());
        assert_eq!(a.location().as_str(), "export:Shape/Circle");
    }

    #[test]
    fn derived_location_includes_escaped_name() {
        let named = record("app::Shape", Some("big round"), "Circle", "plugins.a");
        assert_eq!(
            named.location().as_str(),
            "export:app%3A%3AShape/big%20round/Circle"
        );
    }

    #[test]
    fn derived_location_escapes_implementation_separators() {
        let named = record("Shape", Some("a"), "b", "plugins.a");
        let nested = record("Shape", None, "a/b", "plugins.a");
        assert_ne!(named.location(), nested.location());
        assert_eq!(nested.location().as_str(), "export:Shape/a%2Fb");

        let qualified = record("Shape", None, "shapes::Circle", "plugins.a");
        assert_eq!(qualified.location().as_str(), "export:Shape/shapes%3A%3ACircle");
    }

    #[test]
    fn explicit_location_is_detected() {
        let target = Location::parse("export:Shape/Circle").expect("location");
        let record = record("Shape", None, "Square", "plugins.b").with_location(target.clone());
        assert_eq!(record.location(), &target);
        assert!(record.has_explicit_location());
    }

    #[test]
    fn full_name_uses_display_name_when_set() {
        let plain = record("Shape", None, "Circle", "plugins.a");
        assert_eq!(plain.name(), "Circle");
        assert_eq!(plain.full_name(), "Circle - plugins.a");

        let named = plain.with_display_name("Round thing");
        assert_eq!(named.name(), "Round thing");
        assert_eq!(named.full_name(), "Round thing - Circle - plugins.a");
    }

    #[test]
    fn rejects_blank_location() {
        assert!(Location::parse("   ").is_err());
    }
}
