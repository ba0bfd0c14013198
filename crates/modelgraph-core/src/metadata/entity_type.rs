//! Entity type definitions.

use super::ids::{EntityTypeId, ForeignKeyId, IndexId, KeyId, PropertyId};
use crate::source::ConfigurationSource;
use std::collections::{BTreeMap, BTreeSet};

/// An entity type and the elements it declares.
///
/// Inherited elements live on the base types; the read side of
/// [`Model`](super::Model) walks the hierarchy when resolving them.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityType {
    pub(crate) name: String,
    pub(crate) host_type: Option<String>,
    pub(crate) source: ConfigurationSource,
    pub(crate) base_type: Option<EntityTypeId>,
    pub(crate) base_type_source: Option<ConfigurationSource>,
    pub(crate) derived_types: BTreeSet<EntityTypeId>,
    pub(crate) properties: BTreeMap<String, PropertyId>,
    pub(crate) keys: Vec<KeyId>,
    pub(crate) primary_key: Option<KeyId>,
    pub(crate) primary_key_source: Option<ConfigurationSource>,
    pub(crate) indexes: Vec<IndexId>,
    pub(crate) foreign_keys: Vec<ForeignKeyId>,
    pub(crate) referencing_foreign_keys: BTreeSet<ForeignKeyId>,
    pub(crate) ignored_members: BTreeMap<String, ConfigurationSource>,
}

impl EntityType {
    pub(crate) fn new(
        name: String,
        host_type: Option<String>,
        source: ConfigurationSource,
    ) -> Self {
        Self {
            name,
            host_type,
            source,
            base_type: None,
            base_type_source: None,
            derived_types: BTreeSet::new(),
            properties: BTreeMap::new(),
            keys: Vec::new(),
            primary_key: None,
            primary_key_source: None,
            indexes: Vec::new(),
            foreign_keys: Vec::new(),
            referencing_foreign_keys: BTreeSet::new(),
            ignored_members: BTreeMap::new(),
        }
    }

    /// Entity type name, unique within the model.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Host type the entity maps to; `None` for a shadow entity type.
    pub fn host_type(&self) -> Option<&str> {
        self.host_type.as_deref()
    }

    /// Whether the entity has no host type.
    pub fn is_shadow(&self) -> bool {
        self.host_type.is_none()
    }

    /// How the entity type was established.
    pub fn configuration_source(&self) -> ConfigurationSource {
        self.source
    }

    /// Direct base type.
    pub fn base_type(&self) -> Option<EntityTypeId> {
        self.base_type
    }

    /// How the base type link was established.
    pub fn base_type_source(&self) -> Option<ConfigurationSource> {
        self.base_type_source
    }

    /// Direct derived types.
    pub fn derived_types(&self) -> impl Iterator<Item = EntityTypeId> + '_ {
        self.derived_types.iter().copied()
    }

    /// Properties declared on this entity type, sorted by name.
    pub fn declared_properties(&self) -> impl Iterator<Item = PropertyId> + '_ {
        self.properties.values().copied()
    }

    /// Keys declared on this entity type.
    pub fn declared_keys(&self) -> &[KeyId] {
        &self.keys
    }

    /// Declared primary key (only set on hierarchy roots).
    pub fn declared_primary_key(&self) -> Option<KeyId> {
        self.primary_key
    }

    /// How the primary key was chosen.
    pub fn primary_key_source(&self) -> Option<ConfigurationSource> {
        self.primary_key_source
    }

    /// Indexes declared on this entity type.
    pub fn declared_indexes(&self) -> &[IndexId] {
        &self.indexes
    }

    /// Foreign keys declared on this entity type (as dependent).
    pub fn declared_foreign_keys(&self) -> &[ForeignKeyId] {
        &self.foreign_keys
    }

    /// Foreign keys whose principal is this entity type.
    pub fn referencing_foreign_keys(&self) -> impl Iterator<Item = ForeignKeyId> + '_ {
        self.referencing_foreign_keys.iter().copied()
    }

    /// Source of an ignore mark on a member name.
    pub fn ignored_member_source(&self, name: &str) -> Option<ConfigurationSource> {
        self.ignored_members.get(name).copied()
    }
}
