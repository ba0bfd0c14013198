//! Property definitions.

use super::ids::EntityTypeId;
use super::types::ScalarType;
use crate::source::ConfigurationSource;

/// A scalar property declared on an entity type.
#[derive(Debug, Clone, PartialEq)]
pub struct Property {
    pub(crate) name: String,
    pub(crate) declaring_entity: EntityTypeId,
    pub(crate) value_type: Option<ScalarType>,
    pub(crate) value_type_source: Option<ConfigurationSource>,
    pub(crate) shadow: bool,
    pub(crate) shadow_source: Option<ConfigurationSource>,
    pub(crate) nullable: bool,
    pub(crate) nullability_source: Option<ConfigurationSource>,
    pub(crate) source: ConfigurationSource,
}

impl Property {
    /// Property name, unique within the declaring hierarchy.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Entity type that declares this property.
    pub fn declaring_entity(&self) -> EntityTypeId {
        self.declaring_entity
    }

    /// Value type, if known.
    pub fn value_type(&self) -> Option<ScalarType> {
        self.value_type
    }

    /// Whether the property has no backing host member.
    pub fn is_shadow(&self) -> bool {
        self.shadow
    }

    /// Whether the property accepts null.
    pub fn is_nullable(&self) -> bool {
        self.nullable
    }

    /// How the property itself was established.
    pub fn configuration_source(&self) -> ConfigurationSource {
        self.source
    }

    /// How the value type was established, if configured.
    pub fn value_type_source(&self) -> Option<ConfigurationSource> {
        self.value_type_source
    }

    /// How the nullability was established, if configured.
    pub fn nullability_source(&self) -> Option<ConfigurationSource> {
        self.nullability_source
    }

    /// How the shadow flag was established, if configured.
    pub fn shadow_source(&self) -> Option<ConfigurationSource> {
        self.shadow_source
    }
}
