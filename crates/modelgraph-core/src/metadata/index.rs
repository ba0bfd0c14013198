//! Index definitions.

use super::ids::{EntityTypeId, PropertyId};
use crate::source::ConfigurationSource;

/// An index over an ordered set of properties.
#[derive(Debug, Clone, PartialEq)]
pub struct Index {
    pub(crate) declaring_entity: EntityTypeId,
    pub(crate) properties: Vec<PropertyId>,
    pub(crate) unique: bool,
    pub(crate) unique_source: Option<ConfigurationSource>,
    pub(crate) source: ConfigurationSource,
}

impl Index {
    /// Entity type that declares this index.
    pub fn declaring_entity(&self) -> EntityTypeId {
        self.declaring_entity
    }

    /// Ordered indexed properties.
    pub fn properties(&self) -> &[PropertyId] {
        &self.properties
    }

    /// Whether the index enforces uniqueness.
    pub fn is_unique(&self) -> bool {
        self.unique
    }

    /// How uniqueness was established, if configured.
    pub fn unique_source(&self) -> Option<ConfigurationSource> {
        self.unique_source
    }

    /// How the index was established.
    pub fn configuration_source(&self) -> ConfigurationSource {
        self.source
    }
}
