//! Detach/reattach records.
//!
//! Composite mutations first remove the structure that would conflict with
//! the change, then apply the change, then replay what they removed. The
//! records below refer to entity types and properties by name, so replay
//! re-resolves everything against the model as it is at that point. Indexes
//! are always replayed before relationships.

use super::{rejected, ModelBuilder};
use crate::error::{BuildResult, ModelError};
use crate::metadata::{
    DeleteBehavior, EntityTypeId, ForeignKeyId, HostMember, IndexId, KeyId, Navigation, Property,
    PropertyId, ScalarType,
};
use crate::source::ConfigurationSource;
use tracing::debug;

/// Enough of a property to recreate it.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertySnapshot {
    /// Property name.
    pub name: String,
    /// Value type.
    pub value_type: Option<ScalarType>,
    /// Value type stamp.
    pub value_type_source: Option<ConfigurationSource>,
    /// Whether the property had no host member.
    pub shadow: bool,
    /// Nullability.
    pub nullable: bool,
    /// Nullability stamp.
    pub nullability_source: Option<ConfigurationSource>,
    /// Property source.
    pub source: ConfigurationSource,
}

impl PropertySnapshot {
    pub(crate) fn capture(property: &Property) -> Self {
        Self {
            name: property.name.clone(),
            value_type: property.value_type,
            value_type_source: property.value_type_source,
            shadow: property.shadow,
            nullable: property.nullable,
            nullability_source: property.nullability_source,
            source: property.source,
        }
    }
}

/// A removed index.
#[derive(Debug, Clone, PartialEq)]
pub struct DetachedIndex {
    /// Declaring entity type name.
    pub entity: String,
    /// Indexed properties.
    pub properties: Vec<PropertySnapshot>,
    /// Uniqueness.
    pub unique: bool,
    /// Uniqueness stamp.
    pub unique_source: Option<ConfigurationSource>,
    /// Index source.
    pub source: ConfigurationSource,
}

/// A removed foreign key with its navigations and facets.
#[derive(Debug, Clone, PartialEq)]
pub struct DetachedRelationship {
    /// Dependent entity type name.
    pub dependent: String,
    /// Principal entity type name.
    pub principal: String,
    /// Dependent properties.
    pub properties: Vec<PropertySnapshot>,
    /// Properties of the principal key.
    pub principal_properties: Vec<PropertySnapshot>,
    /// Set when the principal key was named explicitly.
    pub principal_key_source: Option<ConfigurationSource>,
    /// Navigation from dependent to principal.
    pub to_principal: Option<Navigation>,
    /// Navigation from principal to dependent.
    pub to_dependent: Option<Navigation>,
    /// Uniqueness.
    pub unique: bool,
    /// Uniqueness stamp.
    pub unique_source: Option<ConfigurationSource>,
    /// Required-ness.
    pub required: bool,
    /// Required-ness stamp.
    pub required_source: Option<ConfigurationSource>,
    /// Configured delete behavior.
    pub delete_behavior: Option<DeleteBehavior>,
    /// Delete behavior stamp.
    pub delete_behavior_source: Option<ConfigurationSource>,
    /// Foreign key source.
    pub source: ConfigurationSource,
}

/// Removed properties together with the indexes and relationships that
/// had to go with them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DetachedProperties {
    /// The removed properties.
    pub properties: Vec<PropertySnapshot>,
    /// Indexes that used them.
    pub indexes: Vec<DetachedIndex>,
    /// Relationships that used them.
    pub relationships: Vec<DetachedRelationship>,
}

/// One entry of a detach log.
#[derive(Debug, Clone, PartialEq)]
pub enum DetachedElement {
    /// Properties and their fallout.
    Properties(DetachedProperties),
    /// An index.
    Index(DetachedIndex),
    /// A relationship.
    Relationship(DetachedRelationship),
}

impl ModelBuilder {
    fn capture_properties(&self, properties: &[PropertyId]) -> Result<Vec<PropertySnapshot>, ModelError> {
        properties
            .iter()
            .map(|p| self.model.try_property(*p).map(PropertySnapshot::capture))
            .collect()
    }

    pub(crate) fn capture_relationship(
        &self,
        foreign_key: ForeignKeyId,
    ) -> Result<DetachedRelationship, ModelError> {
        let fk = self.model.try_foreign_key(foreign_key)?;
        let key = self.model.try_key(fk.principal_key)?;
        Ok(DetachedRelationship {
            dependent: self.model.entity_name(fk.declaring_entity).to_string(),
            principal: self.model.entity_name(fk.principal_entity).to_string(),
            properties: self.capture_properties(&fk.properties)?,
            principal_properties: self.capture_properties(&key.properties)?,
            principal_key_source: fk.principal_key_source,
            to_principal: fk.to_principal.clone(),
            to_dependent: fk.to_dependent.clone(),
            unique: fk.unique,
            unique_source: fk.unique_source,
            required: fk.required,
            required_source: fk.required_source,
            delete_behavior: fk.delete_behavior,
            delete_behavior_source: fk.delete_behavior_source,
            source: fk.source,
        })
    }

    /// Snapshot and remove a foreign key.
    pub(crate) fn detach_relationship(
        &mut self,
        foreign_key: ForeignKeyId,
    ) -> Result<DetachedRelationship, ModelError> {
        let snapshot = self.capture_relationship(foreign_key)?;
        self.remove_foreign_key_unchecked(foreign_key)?;
        debug!(
            dependent = %snapshot.dependent,
            principal = %snapshot.principal,
            "Relationship detached"
        );
        Ok(snapshot)
    }

    /// Snapshot and remove an index. Its properties are left in place.
    pub(crate) fn detach_index(&mut self, index: IndexId) -> Result<DetachedIndex, ModelError> {
        let ix = self.model.try_index(index)?;
        let snapshot = DetachedIndex {
            entity: self.model.entity_name(ix.declaring_entity).to_string(),
            properties: self.capture_properties(&ix.properties)?,
            unique: ix.unique,
            unique_source: ix.unique_source,
            source: ix.source,
        };
        self.model.unlink_index(index);
        debug!(entity = %snapshot.entity, "Index detached");
        Ok(snapshot)
    }

    /// Snapshot and remove properties along with every key, index and foreign
    /// key using them.
    pub(crate) fn detach_properties(
        &mut self,
        properties: &[PropertyId],
    ) -> Result<DetachedProperties, ModelError> {
        let mut detached = DetachedProperties::default();
        for property in properties {
            let Some(snapshot) = self.model.property(*property).map(PropertySnapshot::capture)
            else {
                continue;
            };

            for fk in self.model.foreign_keys_containing(*property) {
                if self.model.foreign_key(fk).is_some() {
                    detached.relationships.push(self.detach_relationship(fk)?);
                }
            }
            for key in self.model.keys_containing(*property) {
                let Some(referencing) = self
                    .model
                    .key(key)
                    .map(|k| k.referencing_foreign_keys.iter().copied().collect::<Vec<_>>())
                else {
                    continue;
                };
                for fk in referencing {
                    if self.model.foreign_key(fk).is_some() {
                        detached.relationships.push(self.detach_relationship(fk)?);
                    }
                }
                if self.model.key(key).is_some() {
                    self.remove_key_unchecked(key)?;
                }
            }
            for index in self.model.indexes_containing(*property) {
                if self.model.index(index).is_some() {
                    detached.indexes.push(self.detach_index(index)?);
                }
            }

            self.model.unlink_property(*property);
            debug!(property = %snapshot.name, "Property detached");
            detached.properties.push(snapshot);
        }
        Ok(detached)
    }

    /// Replay a detach log: every index first, then every relationship.
    pub(crate) fn reattach(&mut self, log: Vec<DetachedElement>) -> BuildResult<()> {
        let mut indexes = Vec::new();
        let mut relationships = Vec::new();
        for element in log {
            match element {
                DetachedElement::Properties(properties) => {
                    indexes.extend(properties.indexes);
                    relationships.extend(properties.relationships);
                }
                DetachedElement::Index(index) => indexes.push(index),
                DetachedElement::Relationship(relationship) => relationships.push(relationship),
            }
        }

        for index in &indexes {
            if self.attach_index(index, None)?.is_none() {
                return rejected("reattach", format!("index on {} could not be restored", index.entity));
            }
        }
        for relationship in &relationships {
            if self.attach_relationship(relationship, None)?.is_none() {
                return rejected(
                    "reattach",
                    format!(
                        "relationship {} -> {} could not be restored",
                        relationship.dependent, relationship.principal
                    ),
                );
            }
        }
        Ok(Some(()))
    }

    /// Resolve each snapshot by name on the entity type, recreating missing
    /// properties from their descriptors.
    pub(crate) fn restore_properties(
        &mut self,
        entity: EntityTypeId,
        snapshots: &[PropertySnapshot],
    ) -> BuildResult<Vec<PropertyId>> {
        let mut resolved = Vec::with_capacity(snapshots.len());
        for snapshot in snapshots {
            if let Some(existing) = self.model.find_property(entity, &snapshot.name) {
                resolved.push(existing);
                continue;
            }

            let host_backed = matches!(
                self.host_member(entity, &snapshot.name),
                Some(HostMember::Scalar { .. })
            );
            let shadow = snapshot.shadow || !host_backed;
            let Some(property) = self.property_core(
                entity,
                &snapshot.name,
                snapshot.value_type,
                Some(shadow),
                snapshot.source,
            )?
            else {
                return Ok(None);
            };

            let restored = self.model.try_property_mut(property)?;
            restored.value_type_source = snapshot.value_type_source;
            if shadow || snapshot.nullability_source.is_some() {
                restored.nullable = snapshot.nullable;
                restored.nullability_source = snapshot.nullability_source;
            }
            resolved.push(property);
        }
        Ok(Some(resolved))
    }

    /// Recreate an index, on `target` if given, else on the entity type it
    /// was detached from.
    pub(crate) fn attach_index(
        &mut self,
        detached: &DetachedIndex,
        target: Option<EntityTypeId>,
    ) -> BuildResult<IndexId> {
        let Some(entity) = target.or_else(|| self.model.find_entity_type(&detached.entity)) else {
            return rejected("attach_index", format!("{} no longer exists", detached.entity));
        };
        let Some(properties) = self.restore_properties(entity, &detached.properties)? else {
            return Ok(None);
        };
        let Some(index) = self.has_index_core(entity, &properties, detached.source)? else {
            return Ok(None);
        };

        if let Some(stamp) = detached.unique_source {
            let ix = self
                .model
                .indexes
                .get_mut(index)
                .ok_or(ModelError::StaleHandle { kind: "index" })?;
            if stamp.can_update(ix.unique_source) {
                ix.unique = detached.unique;
                ix.unique_source = Some(stamp);
            }
        }
        Ok(Some(index))
    }

    fn resolve_detached_principal_key(
        &mut self,
        principal: EntityTypeId,
        detached: &DetachedRelationship,
        dependent_properties: &[PropertyId],
    ) -> BuildResult<KeyId> {
        if detached.principal_key_source.is_none() {
            if let Some(primary) = self.model.primary_key(principal) {
                if self.is_compatible_key(dependent_properties, primary) {
                    return Ok(Some(primary));
                }
            }
        }

        let names: Vec<String> = detached
            .principal_properties
            .iter()
            .map(|p| p.name.clone())
            .collect();
        if let Some(key) = self.model.find_key_by_names(principal, &names) {
            return Ok(Some(key));
        }

        let root = self.model.root(principal);
        let Some(properties) = self.restore_properties(root, &detached.principal_properties)? else {
            return Ok(None);
        };
        let source = detached.principal_key_source.unwrap_or(detached.source);
        self.has_key_core(root, &properties, source)
    }

    /// Recreate a relationship, with `target` as the dependent if given.
    pub(crate) fn attach_relationship(
        &mut self,
        detached: &DetachedRelationship,
        target: Option<EntityTypeId>,
    ) -> BuildResult<ForeignKeyId> {
        let Some(dependent) = target.or_else(|| self.model.find_entity_type(&detached.dependent))
        else {
            return rejected("attach_relationship", format!("{} no longer exists", detached.dependent));
        };
        let Some(principal) = self.model.find_entity_type(&detached.principal) else {
            return rejected("attach_relationship", format!("{} no longer exists", detached.principal));
        };
        let Some(properties) = self.restore_properties(dependent, &detached.properties)? else {
            return Ok(None);
        };
        let Some(principal_key) =
            self.resolve_detached_principal_key(principal, detached, &properties)?
        else {
            return Ok(None);
        };

        let foreign_key = match self.model.find_foreign_key(dependent, &properties, principal) {
            Some(existing) if self.model.try_foreign_key(existing)?.principal_key == principal_key => {
                let fk = self.model.try_foreign_key_mut(existing)?;
                fk.source = fk.source.max(detached.source);
                existing
            }
            _ => {
                let created = self.add_foreign_key(
                    dependent,
                    principal,
                    principal_key,
                    detached.principal_key_source,
                    properties,
                    detached.source,
                )?;
                let fk = self.model.try_foreign_key_mut(created)?;
                fk.unique = detached.unique;
                fk.unique_source = detached.unique_source;
                fk.required = detached.required;
                fk.required_source = detached.required_source;
                fk.delete_behavior = detached.delete_behavior;
                fk.delete_behavior_source = detached.delete_behavior_source;
                if detached.unique {
                    self.sync_index_uniqueness(created)?;
                }
                created
            }
        };

        for (navigation, to_principal) in [
            (&detached.to_principal, true),
            (&detached.to_dependent, false),
        ] {
            let Some(navigation) = navigation else {
                continue;
            };
            if self
                .bind_navigation(foreign_key, &navigation.name, to_principal, navigation.source)?
                .is_none()
            {
                if navigation.source != ConfigurationSource::Convention {
                    return Ok(None);
                }
                debug!(navigation = %navigation.name, "Dropped conflicting convention navigation");
            }
        }

        debug!(
            dependent = %detached.dependent,
            principal = %detached.principal,
            "Relationship reattached"
        );
        Ok(Some(foreign_key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::HostType;
    use ConfigurationSource::*;

    fn builder() -> (ModelBuilder, EntityTypeId, EntityTypeId) {
        let mut builder = ModelBuilder::new();
        builder.register_host_type(
            HostType::new("Customer")
                .with_scalar("Id", ScalarType::Int32)
                .with_collection("Orders", "Order"),
        );
        builder.register_host_type(
            HostType::new("Order")
                .with_scalar("Id", ScalarType::Int32)
                .with_reference("Customer", "Customer"),
        );
        let customer = builder.entity("Customer", Explicit).unwrap().unwrap();
        let order = builder.entity("Order", Explicit).unwrap().unwrap();
        builder.primary_key(customer, &["Id"], Explicit).unwrap().unwrap();
        builder.primary_key(order, &["Id"], Explicit).unwrap().unwrap();
        (builder, customer, order)
    }

    #[test]
    fn test_detached_relationship_recreates_shadow_properties() {
        let (mut builder, customer, order) = builder();
        let fk = builder
            .relationship(order, customer, Some("Customer"), Some("Orders"), DataAnnotation)
            .unwrap()
            .unwrap();
        let customer_id = builder.model().find_property(order, "CustomerId").unwrap();

        let detached = builder.remove_foreign_key(fk, Explicit).unwrap().unwrap();
        assert!(builder.model().property(customer_id).is_none());
        assert_eq!(detached.properties[0].name, "CustomerId");
        assert_eq!(detached.to_dependent.as_ref().unwrap().name(), "Orders");

        let restored = builder
            .atomically(|b| b.attach_relationship(&detached, None))
            .unwrap()
            .unwrap();
        let fk = builder.model().foreign_key(restored).unwrap();
        let property = builder.model().property(fk.properties()[0]).unwrap();
        assert_eq!(property.name(), "CustomerId");
        assert!(property.is_shadow());
        assert_eq!(fk.navigation_to_principal().unwrap().name(), "Customer");
        assert_eq!(fk.navigation_to_dependent().unwrap().name(), "Orders");
        assert!(builder.model().find_index(order, fk.properties()).is_some());
    }

    #[test]
    fn test_detached_index_keeps_uniqueness() {
        let (mut builder, _, order) = builder();
        let index = builder.has_index(order, &["Id"], Explicit).unwrap().unwrap();
        builder.index_unique(index, true, Explicit).unwrap().unwrap();

        let detached = builder.atomically(|b| b.detach_index(index).map(Some)).unwrap().unwrap();
        assert!(builder.model().index(index).is_none());

        let restored = builder
            .atomically(|b| b.attach_index(&detached, None))
            .unwrap()
            .unwrap();
        let ix = builder.model().index(restored).unwrap();
        assert!(ix.is_unique());
        assert_eq!(ix.unique_source(), Some(Explicit));
    }
}
