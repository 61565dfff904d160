//! Contract identity.
//!
//! # Invariants
//! - A capability identity is never empty.
//! - An absent contract name is stored as the empty string, so `None` and
//!   `Some("")` describe the same contract.

use crate::error::{RegistryError, RegistryResult};
use std::fmt::{Display, Formatter};
use std::sync::Arc;

/// Opaque, stable identity of a capability (the "contract type").
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CapabilityId(Arc<str>);

impl CapabilityId {
    /// Creates a capability identity; rejects empty or blank values.
    pub fn new(value: impl AsRef<str>) -> RegistryResult<Self> {
        let value = value.as_ref();
        if value.trim().is_empty() {
            return Err(RegistryError::invalid_argument(
                "capability identity must not be empty",
            ));
        }
        Ok(Self(Arc::from(value)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for CapabilityId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// `(capability, name)` pair that exports are indexed by.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ContractKey {
    capability: CapabilityId,
    name: String,
}

impl ContractKey {
    pub fn new(capability: CapabilityId, name: Option<&str>) -> Self {
        Self {
            capability,
            name: name.unwrap_or_default().to_string(),
        }
    }

    /// Contract with the empty (default) name.
    pub fn unnamed(capability: CapabilityId) -> Self {
        Self::new(capability, None)
    }

    /// Parses both parts at once; the capability must be non-empty.
    pub fn parse(capability: &str, name: Option<&str>) -> RegistryResult<Self> {
        Ok(Self::new(CapabilityId::new(capability)?, name))
    }

    pub fn capability(&self) -> &CapabilityId {
        &self.capability
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_unnamed(&self) -> bool {
        self.name.is_empty()
    }
}

impl Display for ContractKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.name.is_empty() {
            write!(f, "{}", self.capability)
        } else {
            write!(f, "{}[{}]", self.capability, self.name)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{CapabilityId, ContractKey};
    use crate::error::RegistryError;

    #[test]
    fn absent_and_empty_name_are_equal() {
        let shape = CapabilityId::new("Shape").expect("capability");
        assert_eq!(
            ContractKey::new(shape.clone(), None),
            ContractKey::new(shape, Some(""))
        );
    }

    #[test]
    fn keys_differ_by_either_part() {
        let a = ContractKey::parse("Shape", Some("x")).expect("key");
        let b = ContractKey::parse("Shape", Some("y")).expect("key");
        let c = ContractKey::parse("Widget", Some("x")).expect("key");
        assert_ne!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn rejects_blank_capability() {
        let err = CapabilityId::new("  ").expect_err("blank capability must fail");
        assert!(matches!(err, RegistryError::InvalidArgument(_)));
    }

    #[test]
    fn display_includes_name_only_when_present() {
        assert_eq!(
            ContractKey::parse("Shape", None).expect("key").to_string(),
            "Shape"
        );
        assert_eq!(
            ContractKey::parse("Shape", Some("round"))
                .expect("key")
                .to_string(),
            "Shape[round]"
        );
    }
}
