//! Key definitions.

use super::ids::{EntityTypeId, ForeignKeyId, PropertyId};
use crate::source::ConfigurationSource;
use std::collections::BTreeSet;

/// A unique combination of properties on a hierarchy root.
#[derive(Debug, Clone, PartialEq)]
pub struct Key {
    pub(crate) declaring_entity: EntityTypeId,
    pub(crate) properties: Vec<PropertyId>,
    pub(crate) referencing_foreign_keys: BTreeSet<ForeignKeyId>,
    pub(crate) source: ConfigurationSource,
}

impl Key {
    /// Entity type that declares this key.
    pub fn declaring_entity(&self) -> EntityTypeId {
        self.declaring_entity
    }

    /// Ordered key properties.
    pub fn properties(&self) -> &[PropertyId] {
        &self.properties
    }

    /// Foreign keys that target this key.
    pub fn referencing_foreign_keys(&self) -> impl Iterator<Item = ForeignKeyId> + '_ {
        self.referencing_foreign_keys.iter().copied()
    }

    /// Whether any foreign key targets this key.
    pub fn is_referenced(&self) -> bool {
        !self.referencing_foreign_keys.is_empty()
    }

    /// How the key was established.
    pub fn configuration_source(&self) -> ConfigurationSource {
        self.source
    }
}
