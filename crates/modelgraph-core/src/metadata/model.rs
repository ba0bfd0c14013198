//! The model registry: arena of every metadata element plus hierarchy-aware
//! lookups.

use super::entity_type::EntityType;
use super::foreign_key::ForeignKey;
use super::ids::{Arena, EntityTypeId, ForeignKeyId, IndexId, KeyId, PropertyId};
use super::index::Index;
use super::key::Key;
use super::property::Property;
use super::types::HostTypeRegistry;
use crate::error::ModelError;
use crate::source::ConfigurationSource;
use std::collections::BTreeMap;

/// Where a navigation name was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NavigationRef {
    /// Foreign key backing the navigation.
    pub foreign_key: ForeignKeyId,
    /// True when the navigation points from dependent to principal.
    pub points_to_principal: bool,
}

/// The entity-type graph.
///
/// Every element is owned here and referenced by handle; back-references from
/// properties, keys, indexes and foreign keys to their entity types are plain
/// handles used for lookup only.
#[derive(Debug, Clone, Default)]
pub struct Model {
    pub(crate) entity_types: Arena<EntityTypeId, EntityType>,
    pub(crate) properties: Arena<PropertyId, Property>,
    pub(crate) keys: Arena<KeyId, Key>,
    pub(crate) foreign_keys: Arena<ForeignKeyId, ForeignKey>,
    pub(crate) indexes: Arena<IndexId, Index>,
    pub(crate) names: BTreeMap<String, EntityTypeId>,
    pub(crate) ignored: BTreeMap<String, ConfigurationSource>,
    pub(crate) host_types: HostTypeRegistry,
}

impl Model {
    /// Create an empty model.
    pub fn new() -> Self {
        Self::default()
    }

    // ---- element lookup ----

    /// Look up an entity type.
    pub fn entity_type(&self, id: EntityTypeId) -> Option<&EntityType> {
        self.entity_types.get(id)
    }

    /// Find an entity type by name.
    pub fn find_entity_type(&self, name: &str) -> Option<EntityTypeId> {
        self.names.get(name).copied()
    }

    /// All entity types ordered by name.
    pub fn entity_types(&self) -> impl Iterator<Item = (EntityTypeId, &EntityType)> {
        self.names
            .values()
            .filter_map(|id| self.entity_types.get(*id).map(|e| (*id, e)))
    }

    /// Number of entity types.
    pub fn entity_type_count(&self) -> usize {
        self.names.len()
    }

    /// Look up a property.
    pub fn property(&self, id: PropertyId) -> Option<&Property> {
        self.properties.get(id)
    }

    /// Look up a key.
    pub fn key(&self, id: KeyId) -> Option<&Key> {
        self.keys.get(id)
    }

    /// Look up a foreign key.
    pub fn foreign_key(&self, id: ForeignKeyId) -> Option<&ForeignKey> {
        self.foreign_keys.get(id)
    }

    /// Look up an index.
    pub fn index(&self, id: IndexId) -> Option<&Index> {
        self.indexes.get(id)
    }

    /// Source of an ignore mark on an entity type name.
    pub fn ignored_source(&self, name: &str) -> Option<ConfigurationSource> {
        self.ignored.get(name).copied()
    }

    /// Host types known to the model.
    pub fn host_types(&self) -> &HostTypeRegistry {
        &self.host_types
    }

    pub(crate) fn try_entity(&self, id: EntityTypeId) -> Result<&EntityType, ModelError> {
        self.entity_types
            .get(id)
            .ok_or(ModelError::StaleHandle { kind: "entity type" })
    }

    pub(crate) fn try_entity_mut(
        &mut self,
        id: EntityTypeId,
    ) -> Result<&mut EntityType, ModelError> {
        self.entity_types
            .get_mut(id)
            .ok_or(ModelError::StaleHandle { kind: "entity type" })
    }

    pub(crate) fn try_property(&self, id: PropertyId) -> Result<&Property, ModelError> {
        self.properties
            .get(id)
            .ok_or(ModelError::StaleHandle { kind: "property" })
    }

    pub(crate) fn try_property_mut(&mut self, id: PropertyId) -> Result<&mut Property, ModelError> {
        self.properties
            .get_mut(id)
            .ok_or(ModelError::StaleHandle { kind: "property" })
    }

    pub(crate) fn try_key(&self, id: KeyId) -> Result<&Key, ModelError> {
        self.keys.get(id).ok_or(ModelError::StaleHandle { kind: "key" })
    }

    pub(crate) fn try_foreign_key(&self, id: ForeignKeyId) -> Result<&ForeignKey, ModelError> {
        self.foreign_keys
            .get(id)
            .ok_or(ModelError::StaleHandle { kind: "foreign key" })
    }

    pub(crate) fn try_foreign_key_mut(
        &mut self,
        id: ForeignKeyId,
    ) -> Result<&mut ForeignKey, ModelError> {
        self.foreign_keys
            .get_mut(id)
            .ok_or(ModelError::StaleHandle { kind: "foreign key" })
    }

    pub(crate) fn try_index(&self, id: IndexId) -> Result<&Index, ModelError> {
        self.indexes
            .get(id)
            .ok_or(ModelError::StaleHandle { kind: "index" })
    }

    /// Name of an entity type, or an empty string for a stale handle.
    pub fn entity_name(&self, id: EntityTypeId) -> &str {
        self.entity_types.get(id).map_or("", |e| e.name.as_str())
    }

    /// Names of the given properties, skipping stale handles.
    pub fn property_names(&self, properties: &[PropertyId]) -> Vec<String> {
        properties
            .iter()
            .filter_map(|p| self.properties.get(*p))
            .map(|p| p.name.clone())
            .collect()
    }

    // ---- hierarchy ----

    /// The entity type followed by its base types, nearest first.
    pub fn ancestry(&self, id: EntityTypeId) -> Vec<EntityTypeId> {
        let mut chain = Vec::new();
        let mut next = Some(id);
        while let Some(current) = next {
            if chain.contains(&current) {
                break;
            }
            chain.push(current);
            next = self.entity_types.get(current).and_then(|e| e.base_type);
        }
        chain
    }

    /// Root of the entity type's hierarchy.
    pub fn root(&self, id: EntityTypeId) -> EntityTypeId {
        self.ancestry(id).last().copied().unwrap_or(id)
    }

    /// Every type deriving from the entity type, directly or not.
    pub fn all_derived(&self, id: EntityTypeId) -> Vec<EntityTypeId> {
        let mut result = Vec::new();
        let mut stack: Vec<EntityTypeId> = self
            .entity_types
            .get(id)
            .map(|e| e.derived_types.iter().copied().collect())
            .unwrap_or_default();
        while let Some(current) = stack.pop() {
            if current == id || result.contains(&current) {
                continue;
            }
            result.push(current);
            if let Some(entity) = self.entity_types.get(current) {
                stack.extend(entity.derived_types.iter().copied());
            }
        }
        result
    }

    /// Whether `derived` is `base` or inherits from it.
    pub fn is_same_or_derived(&self, base: EntityTypeId, derived: EntityTypeId) -> bool {
        self.ancestry(derived).contains(&base)
    }

    /// Whether two entity types share a hierarchy root.
    pub fn in_same_hierarchy(&self, a: EntityTypeId, b: EntityTypeId) -> bool {
        self.root(a) == self.root(b)
    }

    // ---- properties ----

    /// Find a property declared on the entity type or inherited.
    pub fn find_property(&self, entity: EntityTypeId, name: &str) -> Option<PropertyId> {
        self.ancestry(entity).into_iter().find_map(|id| {
            self.entity_types
                .get(id)
                .and_then(|e| e.properties.get(name).copied())
        })
    }

    /// Find a property declared on the entity type itself.
    pub fn find_declared_property(&self, entity: EntityTypeId, name: &str) -> Option<PropertyId> {
        self.entity_types
            .get(entity)
            .and_then(|e| e.properties.get(name).copied())
    }

    /// Properties with the given name declared on derived types.
    pub fn find_derived_properties(&self, entity: EntityTypeId, name: &str) -> Vec<PropertyId> {
        self.all_derived(entity)
            .into_iter()
            .filter_map(|id| self.find_declared_property(id, name))
            .collect()
    }

    /// All properties visible on the entity type, inherited ones first.
    pub fn properties(&self, entity: EntityTypeId) -> Vec<PropertyId> {
        self.ancestry(entity)
            .into_iter()
            .rev()
            .filter_map(|id| self.entity_types.get(id))
            .flat_map(|e| e.properties.values().copied())
            .collect()
    }

    /// Keys containing the property.
    pub fn keys_containing(&self, property: PropertyId) -> Vec<KeyId> {
        self.keys
            .iter()
            .filter(|(_, k)| k.properties.contains(&property))
            .map(|(id, _)| id)
            .collect()
    }

    /// Foreign keys using the property as a dependent property.
    pub fn foreign_keys_containing(&self, property: PropertyId) -> Vec<ForeignKeyId> {
        self.foreign_keys
            .iter()
            .filter(|(_, fk)| fk.properties.contains(&property))
            .map(|(id, _)| id)
            .collect()
    }

    /// Indexes containing the property.
    pub fn indexes_containing(&self, property: PropertyId) -> Vec<IndexId> {
        self.indexes
            .iter()
            .filter(|(_, ix)| ix.properties.contains(&property))
            .map(|(id, _)| id)
            .collect()
    }

    /// Whether the property participates in any key.
    pub fn is_key_property(&self, property: PropertyId) -> bool {
        self.keys
            .iter()
            .any(|(_, k)| k.properties.contains(&property))
    }

    /// Whether the property participates in any key, index or foreign key.
    pub fn is_property_in_use(&self, property: PropertyId) -> bool {
        self.is_key_property(property)
            || !self.foreign_keys_containing(property).is_empty()
            || !self.indexes_containing(property).is_empty()
    }

    // ---- keys ----

    /// Primary key of the entity type's hierarchy.
    pub fn primary_key(&self, entity: EntityTypeId) -> Option<KeyId> {
        self.entity_types
            .get(self.root(entity))
            .and_then(|e| e.primary_key)
    }

    /// Keys declared on the entity type or inherited.
    pub fn keys(&self, entity: EntityTypeId) -> Vec<KeyId> {
        self.ancestry(entity)
            .into_iter()
            .filter_map(|id| self.entity_types.get(id))
            .flat_map(|e| e.keys.iter().copied())
            .collect()
    }

    /// Find a key over exactly these properties, in order.
    pub fn find_key(&self, entity: EntityTypeId, properties: &[PropertyId]) -> Option<KeyId> {
        self.keys(entity)
            .into_iter()
            .find(|k| self.keys.get(*k).is_some_and(|k| k.properties == properties))
    }

    /// Find a key by property names, in order.
    pub fn find_key_by_names(&self, entity: EntityTypeId, names: &[String]) -> Option<KeyId> {
        self.keys(entity).into_iter().find(|k| {
            self.keys
                .get(*k)
                .is_some_and(|k| self.property_names(&k.properties) == names)
        })
    }

    // ---- foreign keys ----

    /// Foreign keys declared on the entity type or inherited.
    pub fn foreign_keys(&self, entity: EntityTypeId) -> Vec<ForeignKeyId> {
        self.ancestry(entity)
            .into_iter()
            .filter_map(|id| self.entity_types.get(id))
            .flat_map(|e| e.foreign_keys.iter().copied())
            .collect()
    }

    /// Foreign keys whose principal is the entity type or one of its bases.
    pub fn referencing_foreign_keys(&self, entity: EntityTypeId) -> Vec<ForeignKeyId> {
        self.ancestry(entity)
            .into_iter()
            .filter_map(|id| self.entity_types.get(id))
            .flat_map(|e| e.referencing_foreign_keys.iter().copied())
            .collect()
    }

    /// Find a foreign key with exactly these dependent properties towards
    /// the principal entity type.
    pub fn find_foreign_key(
        &self,
        entity: EntityTypeId,
        properties: &[PropertyId],
        principal: EntityTypeId,
    ) -> Option<ForeignKeyId> {
        self.foreign_keys(entity).into_iter().find(|id| {
            self.foreign_keys
                .get(*id)
                .is_some_and(|fk| fk.properties == properties && fk.principal_entity == principal)
        })
    }

    /// Foreign keys declared on derived types with matching dependent
    /// property names towards the principal entity type.
    pub fn find_derived_foreign_keys(
        &self,
        entity: EntityTypeId,
        names: &[String],
        principal: EntityTypeId,
    ) -> Vec<ForeignKeyId> {
        self.all_derived(entity)
            .into_iter()
            .filter_map(|id| self.entity_types.get(id))
            .flat_map(|e| e.foreign_keys.iter().copied())
            .filter(|id| {
                self.foreign_keys.get(*id).is_some_and(|fk| {
                    fk.principal_entity == principal && self.property_names(&fk.properties) == names
                })
            })
            .collect()
    }

    // ---- indexes ----

    /// Indexes declared on the entity type or inherited.
    pub fn indexes(&self, entity: EntityTypeId) -> Vec<IndexId> {
        self.ancestry(entity)
            .into_iter()
            .filter_map(|id| self.entity_types.get(id))
            .flat_map(|e| e.indexes.iter().copied())
            .collect()
    }

    /// Find an index over exactly these properties, in order.
    pub fn find_index(&self, entity: EntityTypeId, properties: &[PropertyId]) -> Option<IndexId> {
        self.indexes(entity).into_iter().find(|id| {
            self.indexes
                .get(*id)
                .is_some_and(|ix| ix.properties == properties)
        })
    }

    // ---- navigations ----

    /// Find a navigation by name on the entity type or its bases.
    pub fn find_navigation(&self, entity: EntityTypeId, name: &str) -> Option<NavigationRef> {
        let to_principal = self.foreign_keys(entity).into_iter().find(|id| {
            self.foreign_keys
                .get(*id)
                .and_then(|fk| fk.to_principal.as_ref())
                .is_some_and(|n| n.name == name)
        });
        if let Some(foreign_key) = to_principal {
            return Some(NavigationRef {
                foreign_key,
                points_to_principal: true,
            });
        }
        self.referencing_foreign_keys(entity)
            .into_iter()
            .find(|id| {
                self.foreign_keys
                    .get(*id)
                    .and_then(|fk| fk.to_dependent.as_ref())
                    .is_some_and(|n| n.name == name)
            })
            .map(|foreign_key| NavigationRef {
                foreign_key,
                points_to_principal: false,
            })
    }

    /// Navigations declared on derived types with the given name.
    pub fn find_derived_navigations(&self, entity: EntityTypeId, name: &str) -> Vec<NavigationRef> {
        self.all_derived(entity)
            .into_iter()
            .filter_map(|id| {
                let own = self.entity_types.get(id)?;
                let to_principal = own.foreign_keys.iter().find(|fk| {
                    self.foreign_keys
                        .get(**fk)
                        .and_then(|fk| fk.to_principal.as_ref())
                        .is_some_and(|n| n.name == name)
                });
                if let Some(fk) = to_principal {
                    return Some(NavigationRef {
                        foreign_key: *fk,
                        points_to_principal: true,
                    });
                }
                own.referencing_foreign_keys
                    .iter()
                    .find(|fk| {
                        self.foreign_keys
                            .get(**fk)
                            .and_then(|fk| fk.to_dependent.as_ref())
                            .is_some_and(|n| n.name == name)
                    })
                    .map(|fk| NavigationRef {
                        foreign_key: *fk,
                        points_to_principal: false,
                    })
            })
            .collect()
    }

    /// Whether a member name is ignored on the entity type or a base.
    pub fn ignored_member_source(
        &self,
        entity: EntityTypeId,
        name: &str,
    ) -> Option<ConfigurationSource> {
        self.ancestry(entity)
            .into_iter()
            .filter_map(|id| self.entity_types.get(id))
            .filter_map(|e| e.ignored_members.get(name).copied())
            .max()
    }

    // ---- raw linking; callers keep the graph consistent ----

    pub(crate) fn link_entity(&mut self, entity: EntityType) -> EntityTypeId {
        let name = entity.name.clone();
        let id = self.entity_types.insert(entity);
        self.names.insert(name, id);
        id
    }

    pub(crate) fn unlink_entity(&mut self, id: EntityTypeId) -> Option<EntityType> {
        let entity = self.entity_types.remove(id)?;
        self.names.remove(&entity.name);
        if let Some(base) = entity.base_type.and_then(|b| self.entity_types.get_mut(b)) {
            base.derived_types.remove(&id);
        }
        Some(entity)
    }

    pub(crate) fn link_property(&mut self, property: Property) -> PropertyId {
        let entity = property.declaring_entity;
        let name = property.name.clone();
        let id = self.properties.insert(property);
        if let Some(owner) = self.entity_types.get_mut(entity) {
            owner.properties.insert(name, id);
        }
        id
    }

    pub(crate) fn unlink_property(&mut self, id: PropertyId) -> Option<Property> {
        let property = self.properties.remove(id)?;
        if let Some(owner) = self.entity_types.get_mut(property.declaring_entity) {
            owner.properties.remove(&property.name);
        }
        Some(property)
    }

    pub(crate) fn link_key(&mut self, key: Key) -> KeyId {
        let entity = key.declaring_entity;
        let id = self.keys.insert(key);
        if let Some(owner) = self.entity_types.get_mut(entity) {
            owner.keys.push(id);
        }
        id
    }

    pub(crate) fn unlink_key(&mut self, id: KeyId) -> Option<Key> {
        let key = self.keys.remove(id)?;
        if let Some(owner) = self.entity_types.get_mut(key.declaring_entity) {
            owner.keys.retain(|k| *k != id);
            if owner.primary_key == Some(id) {
                owner.primary_key = None;
                owner.primary_key_source = None;
            }
        }
        Some(key)
    }

    pub(crate) fn link_foreign_key(&mut self, foreign_key: ForeignKey) -> ForeignKeyId {
        let dependent = foreign_key.declaring_entity;
        let principal = foreign_key.principal_entity;
        let key = foreign_key.principal_key;
        let id = self.foreign_keys.insert(foreign_key);
        if let Some(owner) = self.entity_types.get_mut(dependent) {
            owner.foreign_keys.push(id);
        }
        if let Some(target) = self.entity_types.get_mut(principal) {
            target.referencing_foreign_keys.insert(id);
        }
        if let Some(key) = self.keys.get_mut(key) {
            key.referencing_foreign_keys.insert(id);
        }
        id
    }

    pub(crate) fn unlink_foreign_key(&mut self, id: ForeignKeyId) -> Option<ForeignKey> {
        let foreign_key = self.foreign_keys.remove(id)?;
        if let Some(owner) = self.entity_types.get_mut(foreign_key.declaring_entity) {
            owner.foreign_keys.retain(|f| *f != id);
        }
        if let Some(target) = self.entity_types.get_mut(foreign_key.principal_entity) {
            target.referencing_foreign_keys.remove(&id);
        }
        if let Some(key) = self.keys.get_mut(foreign_key.principal_key) {
            key.referencing_foreign_keys.remove(&id);
        }
        Some(foreign_key)
    }

    pub(crate) fn link_index(&mut self, index: Index) -> IndexId {
        let entity = index.declaring_entity;
        let id = self.indexes.insert(index);
        if let Some(owner) = self.entity_types.get_mut(entity) {
            owner.indexes.push(id);
        }
        id
    }

    pub(crate) fn unlink_index(&mut self, id: IndexId) -> Option<Index> {
        let index = self.indexes.remove(id)?;
        if let Some(owner) = self.entity_types.get_mut(index.declaring_entity) {
            owner.indexes.retain(|i| *i != id);
        }
        Some(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::ScalarType;

    fn property(entity: EntityTypeId, name: &str) -> Property {
        Property {
            name: name.to_string(),
            declaring_entity: entity,
            value_type: Some(ScalarType::Int32),
            value_type_source: None,
            shadow: true,
            shadow_source: None,
            nullable: false,
            nullability_source: None,
            source: ConfigurationSource::Convention,
        }
    }

    fn entity(model: &mut Model, name: &str) -> EntityTypeId {
        model.link_entity(EntityType::new(
            name.to_string(),
            None,
            ConfigurationSource::Explicit,
        ))
    }

    #[test]
    fn test_hierarchy_lookups() {
        let mut model = Model::new();
        let base = entity(&mut model, "Order");
        let derived = entity(&mut model, "SpecialOrder");
        model.entity_types.get_mut(derived).unwrap().base_type = Some(base);
        model
            .entity_types
            .get_mut(base)
            .unwrap()
            .derived_types
            .insert(derived);

        let id = model.link_property(property(base, "Id"));
        let extra = model.link_property(property(derived, "Extra"));

        assert_eq!(model.ancestry(derived), vec![derived, base]);
        assert_eq!(model.root(derived), base);
        assert_eq!(model.all_derived(base), vec![derived]);
        assert_eq!(model.find_property(derived, "Id"), Some(id));
        assert_eq!(model.find_property(base, "Extra"), None);
        assert_eq!(model.find_derived_properties(base, "Extra"), vec![extra]);
        assert_eq!(model.properties(derived), vec![id, extra]);
    }

    #[test]
    fn test_unlinking_clears_back_references() {
        let mut model = Model::new();
        let blog = entity(&mut model, "Blog");
        let url = model.link_property(property(blog, "Url"));
        let key = model.link_key(Key {
            declaring_entity: blog,
            properties: vec![url],
            referencing_foreign_keys: Default::default(),
            source: ConfigurationSource::Convention,
        });
        model.entity_types.get_mut(blog).unwrap().primary_key = Some(key);

        assert_eq!(model.primary_key(blog), Some(key));
        assert!(model.is_key_property(url));

        model.unlink_key(key);
        assert_eq!(model.primary_key(blog), None);
        assert!(model.entity_type(blog).unwrap().declared_keys().is_empty());

        model.unlink_property(url);
        assert!(model.find_property(blog, "Url").is_none());
        assert!(model.unlink_entity(blog).is_some());
        assert!(model.find_entity_type("Blog").is_none());
    }
}
