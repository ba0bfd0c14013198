//! Value types and host type descriptions.
//!
//! A host type is the application-side type an entity type maps to. The
//! builder only needs its shape: scalar members for properties, reference and
//! collection members for navigations, and an optional base host type.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Scalar value types a property can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScalarType {
    /// Boolean value.
    Bool,
    /// 32-bit signed integer.
    Int32,
    /// 64-bit signed integer.
    Int64,
    /// 32-bit floating point.
    Float32,
    /// 64-bit floating point.
    Float64,
    /// Fixed-precision decimal.
    Decimal {
        /// Total number of digits.
        precision: u8,
        /// Number of digits after decimal point.
        scale: u8,
    },
    /// UTF-8 string.
    String,
    /// Binary data.
    Bytes,
    /// Timestamp (microseconds since Unix epoch).
    Timestamp,
    /// UUID (128-bit identifier).
    Uuid,
}

impl ScalarType {
    /// Check if this type is numeric.
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            ScalarType::Int32
                | ScalarType::Int64
                | ScalarType::Float32
                | ScalarType::Float64
                | ScalarType::Decimal { .. }
        )
    }

    /// Whether values of this type can be null without an explicit
    /// nullable wrapper on the host side.
    pub fn is_reference_like(&self) -> bool {
        matches!(self, ScalarType::String | ScalarType::Bytes)
    }
}

/// Whether two optional value types can be matched column for column.
/// An unknown type matches anything.
pub(crate) fn types_compatible(a: Option<ScalarType>, b: Option<ScalarType>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => a == b,
        _ => true,
    }
}

/// Shape of a host type member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum HostMember {
    /// A scalar value.
    Scalar {
        /// Value type.
        value_type: ScalarType,
        /// Whether the member accepts null.
        nullable: bool,
    },
    /// A reference to a single instance of another host type.
    Reference {
        /// Target host type name.
        target: String,
    },
    /// A collection of instances of another host type.
    Collection {
        /// Element host type name.
        element: String,
    },
}

/// Description of an application-side type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostType {
    /// Type name.
    pub name: String,
    /// Base host type name.
    pub base: Option<String>,
    /// Declared members by name.
    pub members: BTreeMap<String, HostMember>,
}

impl HostType {
    /// Create a host type without members.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            base: None,
            members: BTreeMap::new(),
        }
    }

    /// Set the base host type.
    pub fn with_base(mut self, base: impl Into<String>) -> Self {
        self.base = Some(base.into());
        self
    }

    /// Add a required scalar member.
    pub fn with_scalar(mut self, name: impl Into<String>, value_type: ScalarType) -> Self {
        let nullable = value_type.is_reference_like();
        self.members.insert(
            name.into(),
            HostMember::Scalar {
                value_type,
                nullable,
            },
        );
        self
    }

    /// Add a nullable scalar member.
    pub fn with_optional_scalar(mut self, name: impl Into<String>, value_type: ScalarType) -> Self {
        self.members.insert(
            name.into(),
            HostMember::Scalar {
                value_type,
                nullable: true,
            },
        );
        self
    }

    /// Add a reference navigation member.
    pub fn with_reference(mut self, name: impl Into<String>, target: impl Into<String>) -> Self {
        self.members.insert(
            name.into(),
            HostMember::Reference {
                target: target.into(),
            },
        );
        self
    }

    /// Add a collection navigation member.
    pub fn with_collection(mut self, name: impl Into<String>, element: impl Into<String>) -> Self {
        self.members.insert(
            name.into(),
            HostMember::Collection {
                element: element.into(),
            },
        );
        self
    }
}

/// Outcome of checking a member against an expected navigation shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberCompatibility {
    /// The member exists and has the expected shape.
    Compatible,
    /// The member is missing or has the wrong shape or target.
    Incompatible,
    /// The shape cannot be determined (no host type to inspect).
    Ambiguous,
}

impl MemberCompatibility {
    /// Whether the shape is still possible.
    pub fn is_possible(self) -> bool {
        self != MemberCompatibility::Incompatible
    }
}

/// Registry of host types known to the model.
#[derive(Debug, Clone, Default)]
pub struct HostTypeRegistry {
    types: BTreeMap<String, HostType>,
}

impl HostTypeRegistry {
    /// Register or replace a host type.
    pub fn register(&mut self, host_type: HostType) {
        self.types.insert(host_type.name.clone(), host_type);
    }

    /// Look up a host type.
    pub fn get(&self, name: &str) -> Option<&HostType> {
        self.types.get(name)
    }

    /// Iterate a host type and its bases, nearest first.
    pub fn ancestry<'a>(&'a self, name: &str) -> impl Iterator<Item = &'a HostType> + 'a {
        let mut next = self.types.get(name);
        let mut steps = 0usize;
        std::iter::from_fn(move || {
            let current = next?;
            steps += 1;
            // A malformed registry could describe a cycle.
            next = if steps > self.types.len() {
                None
            } else {
                current.base.as_deref().and_then(|b| self.types.get(b))
            };
            Some(current)
        })
    }

    /// Find a member declared on the type or any of its bases.
    pub fn find_member(&self, type_name: &str, member: &str) -> Option<&HostMember> {
        self.ancestry(type_name).find_map(|t| t.members.get(member))
    }

    /// Whether `derived` is `base` or inherits from it.
    pub fn is_assignable(&self, base: &str, derived: &str) -> bool {
        base == derived || self.ancestry(derived).any(|t| t.name == base)
    }

    /// Check whether `member` on `declaring` can serve as a navigation to
    /// `target`, with the given collection-ness.
    pub fn navigation_compatibility(
        &self,
        declaring: Option<&str>,
        member: &str,
        target: Option<&str>,
        collection: bool,
    ) -> MemberCompatibility {
        let Some(declaring) = declaring else {
            return MemberCompatibility::Ambiguous;
        };
        let Some(found) = self.find_member(declaring, member) else {
            return MemberCompatibility::Incompatible;
        };
        let pointed = match (found, collection) {
            (HostMember::Reference { target }, false) => target,
            (HostMember::Collection { element }, true) => element,
            _ => return MemberCompatibility::Incompatible,
        };
        match target {
            None => MemberCompatibility::Ambiguous,
            Some(target) if self.is_assignable(pointed, target) => MemberCompatibility::Compatible,
            Some(_) => MemberCompatibility::Incompatible,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> HostTypeRegistry {
        let mut registry = HostTypeRegistry::default();
        registry.register(
            HostType::new("Customer")
                .with_scalar("Id", ScalarType::Int32)
                .with_collection("Orders", "Order"),
        );
        registry.register(
            HostType::new("Order")
                .with_scalar("Id", ScalarType::Int32)
                .with_reference("Customer", "Customer"),
        );
        registry.register(HostType::new("SpecialOrder").with_base("Order"));
        registry
    }

    #[test]
    fn test_scalar_type_checks() {
        assert!(ScalarType::Int32.is_numeric());
        assert!(ScalarType::Decimal {
            precision: 10,
            scale: 2
        }
        .is_numeric());
        assert!(!ScalarType::String.is_numeric());
        assert!(ScalarType::String.is_reference_like());
        assert!(!ScalarType::Uuid.is_reference_like());
        assert!(types_compatible(None, Some(ScalarType::Int64)));
        assert!(!types_compatible(
            Some(ScalarType::Int32),
            Some(ScalarType::String)
        ));
    }

    #[test]
    fn test_member_lookup_walks_bases() {
        let registry = registry();
        assert!(registry.find_member("SpecialOrder", "Customer").is_some());
        assert!(registry.is_assignable("Order", "SpecialOrder"));
        assert!(!registry.is_assignable("SpecialOrder", "Order"));
    }

    #[test]
    fn test_ancestry_outlives_the_looked_up_name() {
        let registry = registry();
        let names: Vec<&str> = {
            let name = String::from("SpecialOrder");
            registry.ancestry(&name).map(|t| t.name.as_str()).collect()
        };
        assert_eq!(names, vec!["SpecialOrder", "Order"]);

        let member = {
            let name = String::from("SpecialOrder");
            registry.find_member(&name, "Id")
        };
        assert!(matches!(member, Some(HostMember::Scalar { .. })));
    }

    #[test]
    fn test_navigation_compatibility() {
        let registry = registry();
        assert_eq!(
            registry.navigation_compatibility(Some("Order"), "Customer", Some("Customer"), false),
            MemberCompatibility::Compatible
        );
        assert_eq!(
            registry.navigation_compatibility(Some("Order"), "Customer", Some("Customer"), true),
            MemberCompatibility::Incompatible
        );
        assert_eq!(
            registry.navigation_compatibility(
                Some("Customer"),
                "Orders",
                Some("SpecialOrder"),
                true
            ),
            MemberCompatibility::Compatible
        );
        assert_eq!(
            registry.navigation_compatibility(None, "Anything", Some("Order"), false),
            MemberCompatibility::Ambiguous
        );
    }
}
