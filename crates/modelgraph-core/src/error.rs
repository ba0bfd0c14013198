//! Core error types.
//!
//! Builder operations distinguish two outcomes that are not success:
//! a *rejected* mutation (`Ok(None)`), which is ordinary control flow for
//! conventions probing speculative changes, and an *invalid configuration*
//! (`Err`), which is fatal and aborts the configuration phase.

use crate::metadata::ScalarType;
use thiserror::Error;

/// Result of a builder operation: `Ok(Some(_))` when applied, `Ok(None)` when
/// rejected by precedence or shape, `Err` for an invalid configuration.
pub type BuildResult<T> = Result<Option<T>, ModelError>;

/// Structurally impossible configuration requests.
#[derive(Debug, Error)]
pub enum ModelError {
    /// A handle does not resolve to a live element.
    #[error("{kind} handle is no longer part of the model")]
    StaleHandle {
        /// Element kind.
        kind: &'static str,
    },

    /// Entity type lookup failed.
    #[error("entity type not found: {0}")]
    EntityTypeNotFound(String),

    /// An entity type is bound to a different host type.
    #[error("entity type {entity} is bound to host type {existing}, not {requested}")]
    HostTypeMismatch {
        /// Entity type name.
        entity: String,
        /// Host type already bound.
        existing: String,
        /// Host type requested.
        requested: String,
    },

    /// Entity type still referenced by foreign keys or derived types.
    #[error("entity type {entity} cannot be removed: {reason}")]
    EntityTypeInUse {
        /// Entity type name.
        entity: String,
        /// What still references it.
        reason: String,
    },

    /// Setting the base type would create an inheritance cycle.
    #[error("setting {base} as base type of {entity} would create an inheritance cycle")]
    InheritanceCycle {
        /// Derived entity type.
        entity: String,
        /// Requested base type.
        base: String,
    },

    /// A property with the same name has different value types across a hierarchy.
    #[error(
        "property {entity}.{property} has type {existing:?} but {requested:?} was requested"
    )]
    PropertyTypeMismatch {
        /// Entity type name.
        entity: String,
        /// Property name.
        property: String,
        /// Type already in the model or on the host member.
        existing: ScalarType,
        /// Conflicting type.
        requested: ScalarType,
    },

    /// A non-shadow property was requested but the host type has no such member.
    #[error("host type of {entity} has no scalar member {property}")]
    MissingHostMember {
        /// Entity type name.
        entity: String,
        /// Member name.
        property: String,
    },

    /// A name refers to a navigation member where a scalar was expected.
    #[error("{entity}.{member} is a navigation member and cannot be mapped as a property")]
    NavigationMemberAsProperty {
        /// Entity type name.
        entity: String,
        /// Member name.
        member: String,
    },

    /// Key or index properties come from outside the entity's hierarchy.
    #[error("{element} on {entity} uses property {property} from another entity type")]
    ForeignProperty {
        /// Element kind (key, index, foreign key).
        element: &'static str,
        /// Entity type name.
        entity: String,
        /// Offending property.
        property: String,
    },

    /// Keys may only be declared on the root of a hierarchy.
    #[error("a key cannot be configured on {entity} because it is a derived type")]
    KeyOnDerivedType {
        /// Entity type name.
        entity: String,
    },

    /// Key, index, or foreign key without properties.
    #[error("{element} on {entity} must have at least one property")]
    EmptyPropertyList {
        /// Element kind.
        element: &'static str,
        /// Entity type name.
        entity: String,
    },

    /// Key properties cannot be optional.
    #[error("property {entity}.{property} is part of a key and cannot be optional")]
    OptionalKeyProperty {
        /// Entity type name.
        entity: String,
        /// Property name.
        property: String,
    },

    /// Error raised by the validator.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Error raised by a convention handler.
    #[error("convention {convention} failed: {message}")]
    Convention {
        /// Convention name.
        convention: String,
        /// Failure description.
        message: String,
    },
}

/// Fatal problems found by the model validator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// Entity type without a host type.
    #[error("entity type {entity} is a shadow entity type and has no host type")]
    ShadowEntityType {
        /// Entity type name.
        entity: String,
    },

    /// Entity type without a primary key.
    #[error("entity type {entity} requires a primary key")]
    MissingPrimaryKey {
        /// Entity type name.
        entity: String,
    },

    /// Host inheritance does not match model inheritance.
    #[error(
        "entity type {entity} has host base type mapped to {expected:?} but model base type {actual:?}"
    )]
    InheritanceMismatch {
        /// Entity type name.
        entity: String,
        /// Entity mapped to the nearest host base type.
        expected: Option<String>,
        /// Base type in the model.
        actual: Option<String>,
    },

    /// A warning escalated by `warnings_as_errors`.
    #[error("{0}")]
    Escalated(ValidationWarning),
}

/// Non-fatal problems found by the model validator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationWarning {
    /// A key contains shadow properties.
    ShadowKeyProperties {
        /// Entity type name.
        entity: String,
        /// Shadow properties in the key.
        properties: Vec<String>,
    },
}

impl std::fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationWarning::ShadowKeyProperties { entity, properties } => write!(
                f,
                "key on {entity} contains shadow properties: {}",
                properties.join(", ")
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ModelError::PropertyTypeMismatch {
            entity: "B".to_string(),
            property: "X".to_string(),
            existing: ScalarType::Int32,
            requested: ScalarType::String,
        };
        assert!(err.to_string().contains("B.X"));

        let err: ModelError = ValidationError::MissingPrimaryKey {
            entity: "Blog".to_string(),
        }
        .into();
        assert_eq!(err.to_string(), "entity type Blog requires a primary key");
    }

    #[test]
    fn test_warning_display() {
        let warning = ValidationWarning::ShadowKeyProperties {
            entity: "Order".to_string(),
            properties: vec!["TenantId".to_string(), "Code".to_string()],
        };
        assert_eq!(
            warning.to_string(),
            "key on Order contains shadow properties: TenantId, Code"
        );
    }
}
