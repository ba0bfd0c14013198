//! Base-type changes.
//!
//! Re-parenting an entity type changes which properties and keys it sees.
//! Anything built on members that stop being visible, or that collides with
//! members becoming visible, is detached first and reattached by name once
//! the new base pointer is in place.

use super::snapshot::DetachedElement;
use super::{rejected, ModelBuilder};
use crate::convention::ModelEvent;
use crate::error::{BuildResult, ModelError};
use crate::metadata::{EntityTypeId, ForeignKeyId, IndexId, KeyId, PropertyId};
use crate::source::ConfigurationSource;
use std::collections::BTreeSet;
use tracing::{debug, instrument};

impl ModelBuilder {
    /// Set or clear the base type of an entity type.
    pub fn has_base_type(
        &mut self,
        entity: EntityTypeId,
        base: Option<EntityTypeId>,
        source: ConfigurationSource,
    ) -> BuildResult<EntityTypeId> {
        self.atomically(|b| b.has_base_type_core(entity, base, source))
    }

    #[instrument(level = "debug", skip(self))]
    pub(crate) fn has_base_type_core(
        &mut self,
        entity: EntityTypeId,
        base: Option<EntityTypeId>,
        source: ConfigurationSource,
    ) -> BuildResult<EntityTypeId> {
        let target = self.model.try_entity(entity)?;
        let previous = target.base_type;
        if previous == base {
            let stamp = Some(source.max_opt(target.base_type_source));
            self.model.try_entity_mut(entity)?.base_type_source = stamp;
            return Ok(Some(entity));
        }
        if !source.can_update(target.base_type_source) {
            return rejected(
                "has_base_type",
                format!("base type of {} is {:?}", target.name, target.base_type_source),
            );
        }
        if let Some(base) = base {
            let base_name = self.model.try_entity(base)?.name.clone();
            if self.model.is_same_or_derived(entity, base) {
                return Err(ModelError::InheritanceCycle {
                    entity: self.model.entity_name(entity).to_string(),
                    base: base_name,
                });
            }
        }

        let mut log = Vec::new();
        if previous.is_some() {
            log.extend(self.detach_inherited_dependents(entity)?);
        }
        if let Some(base) = base {
            match self.prepare_new_base(entity, base, source)? {
                Some(detached) => log.extend(detached),
                None => return Ok(None),
            }
        }

        self.set_base_pointer(entity, base, source)?;
        debug!(
            entity = %self.model.entity_name(entity),
            base = ?base.map(|b| self.model.entity_name(b).to_string()),
            "Base type changed"
        );
        if self.reattach(log)?.is_none() {
            return Ok(None);
        }
        self.notify(ModelEvent::BaseTypeSet {
            entity_type: entity,
            previous,
        });
        Ok(Some(entity))
    }

    fn set_base_pointer(
        &mut self,
        entity: EntityTypeId,
        base: Option<EntityTypeId>,
        source: ConfigurationSource,
    ) -> Result<(), ModelError> {
        let previous = self.model.try_entity(entity)?.base_type;
        if let Some(old) = previous.and_then(|p| self.model.entity_types.get_mut(p)) {
            old.derived_types.remove(&entity);
        }
        if let Some(new) = base {
            self.model.try_entity_mut(new)?.derived_types.insert(entity);
        }
        let target = self.model.try_entity_mut(entity)?;
        target.base_type = base;
        target.base_type_source = Some(source);
        Ok(())
    }

    /// Detach everything in the entity's subtree that relies on members
    /// inherited from its current bases.
    fn detach_inherited_dependents(
        &mut self,
        entity: EntityTypeId,
    ) -> Result<Vec<DetachedElement>, ModelError> {
        let ancestors: Vec<EntityTypeId> = self.model.ancestry(entity).into_iter().skip(1).collect();
        let mut inherited_properties = BTreeSet::new();
        let mut inherited_keys = BTreeSet::new();
        for ancestor in &ancestors {
            let declaring = self.model.try_entity(*ancestor)?;
            inherited_properties.extend(declaring.properties.values().copied());
            inherited_keys.extend(declaring.keys.iter().copied());
        }

        let uses_inherited = |properties: &[PropertyId]| {
            properties.iter().any(|p| inherited_properties.contains(p))
        };
        let mut foreign_keys: Vec<ForeignKeyId> = Vec::new();
        let mut indexes: Vec<IndexId> = Vec::new();
        let mut subtree = vec![entity];
        subtree.extend(self.model.all_derived(entity));
        for member in &subtree {
            let declaring = self.model.try_entity(*member)?;
            for fk in &declaring.foreign_keys {
                if self.model.foreign_key(*fk).is_some_and(|f| uses_inherited(&f.properties)) {
                    foreign_keys.push(*fk);
                }
            }
            for fk in &declaring.referencing_foreign_keys {
                if self
                    .model
                    .foreign_key(*fk)
                    .is_some_and(|f| inherited_keys.contains(&f.principal_key))
                {
                    foreign_keys.push(*fk);
                }
            }
            for index in &declaring.indexes {
                if self.model.index(*index).is_some_and(|ix| uses_inherited(&ix.properties)) {
                    indexes.push(*index);
                }
            }
        }
        foreign_keys.sort();
        foreign_keys.dedup();

        let mut log = self.detach_relationships(foreign_keys)?;
        for index in indexes {
            if self.model.index(index).is_some() {
                log.push(DetachedElement::Index(self.detach_index(index)?));
            }
        }
        Ok(log)
    }

    /// Resolve every conflict between the entity's subtree and the new base
    /// hierarchy, returning the detach log to replay after the pointer swap.
    fn prepare_new_base(
        &mut self,
        entity: EntityTypeId,
        base: EntityTypeId,
        source: ConfigurationSource,
    ) -> BuildResult<Vec<DetachedElement>> {
        let target = self.model.try_entity(entity)?;
        let entity_name = target.name.clone();
        let own_keys: Vec<KeyId> = target.keys.clone();
        let own_foreign_keys: Vec<ForeignKeyId> = target.foreign_keys.clone();
        if !source.outranks_opt(target.primary_key_source) {
            return rejected("has_base_type", format!("primary key of {entity_name} is pinned"));
        }
        for key in &own_keys {
            let key_source = self.model.try_key(*key)?.source;
            if !source.outranks(key_source) {
                return rejected("has_base_type", format!("a key of {entity_name} is {key_source}"));
            }
        }

        // Properties redeclared on the new base hierarchy.
        let mut subtree = vec![entity];
        subtree.extend(self.model.all_derived(entity));
        let mut duplicates = Vec::new();
        for member in &subtree {
            let declaring = self.model.try_entity(*member)?;
            for (name, property) in &declaring.properties {
                let Some(inherited) = self.model.find_property(base, name) else {
                    continue;
                };
                let own_type = self.model.try_property(*property)?.value_type;
                let base_type = self.model.try_property(inherited)?.value_type;
                if let (Some(existing), Some(requested)) = (base_type, own_type) {
                    if existing != requested {
                        return Err(ModelError::PropertyTypeMismatch {
                            entity: declaring.name.clone(),
                            property: name.clone(),
                            existing,
                            requested,
                        });
                    }
                }
                duplicates.push(*property);
            }
        }

        // Relationships duplicated between the entity and the new base.
        let base_foreign_keys = self.model.foreign_keys(base);
        let mut conflicts = Vec::new();
        for own in &own_foreign_keys {
            let own_fk = self.model.try_foreign_key(*own)?;
            let own_names = self.model.property_names(&own_fk.properties);
            for theirs in &base_foreign_keys {
                let base_fk = self.model.try_foreign_key(*theirs)?;
                if base_fk.principal_entity != own_fk.principal_entity {
                    continue;
                }
                let same_properties = self.model.property_names(&base_fk.properties) == own_names;
                let same_navigation = match (&own_fk.to_principal, &base_fk.to_principal) {
                    (Some(a), Some(b)) => a.name == b.name,
                    _ => false,
                };
                if !same_properties && !same_navigation {
                    continue;
                }
                if source.outranks(own_fk.source) {
                    conflicts.push(*own);
                } else if source.outranks(base_fk.source) {
                    conflicts.push(*theirs);
                } else {
                    return rejected(
                        "has_base_type",
                        format!("relationship of {entity_name} conflicts with its new base"),
                    );
                }
            }
        }

        // Relationships whose dependent properties overlap an inherited key.
        let base_root = self.model.root(base);
        let mut key_names = BTreeSet::new();
        for key in self.model.keys(base_root) {
            key_names.extend(self.model.property_names(self.model.try_key(key)?.properties()));
        }
        let mut overlapping = Vec::new();
        for member in &subtree {
            for fk in self.model.try_entity(*member)?.foreign_keys.iter() {
                let names = self.model.property_names(self.model.try_foreign_key(*fk)?.properties());
                if names.iter().any(|n| key_names.contains(n)) && !conflicts.contains(fk) {
                    overlapping.push(*fk);
                }
            }
        }

        conflicts.sort();
        conflicts.dedup();
        for fk in conflicts {
            if self.model.foreign_key(fk).is_some() {
                debug!(entity = %entity_name, "Removing conflicting relationship");
                self.remove_foreign_key_unchecked(fk)?;
            }
        }
        let mut log = self.detach_relationships(overlapping)?;
        for key in own_keys {
            let Some(referencing) = self
                .model
                .key(key)
                .map(|k| k.referencing_foreign_keys().collect::<Vec<_>>())
            else {
                continue;
            };
            log.extend(self.detach_relationships(referencing)?);
            if self.model.key(key).is_some() {
                self.remove_key_unchecked(key)?;
            }
        }
        if let Some(target) = self.model.entity_types.get_mut(entity) {
            target.primary_key_source = None;
        }
        let detached = self.detach_properties(&duplicates)?;
        log.push(DetachedElement::Properties(detached));
        Ok(Some(log))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::ScalarType;
    use ConfigurationSource::*;

    fn hierarchy() -> (ModelBuilder, EntityTypeId, EntityTypeId) {
        let mut builder = ModelBuilder::new();
        let order = builder.entity("Order", Explicit).unwrap().unwrap();
        let special = builder.entity("SpecialOrder", Explicit).unwrap().unwrap();
        builder
            .property(order, "Id", Some(ScalarType::Int32), None, Explicit)
            .unwrap()
            .unwrap();
        builder.primary_key(order, &["Id"], Explicit).unwrap().unwrap();
        builder
            .property(order, "Number", Some(ScalarType::Int64), None, Explicit)
            .unwrap()
            .unwrap();
        (builder, order, special)
    }

    #[test]
    fn test_base_type_round_trip_keeps_index() {
        let (mut builder, order, special) = hierarchy();
        builder.has_base_type(special, Some(order), Explicit).unwrap().unwrap();
        builder.has_index(special, &["Number"], Explicit).unwrap().unwrap();

        builder.has_base_type(special, None, Explicit).unwrap().unwrap();

        let model = builder.model();
        assert_eq!(model.entity_type(special).unwrap().base_type(), None);
        assert!(model.entity_type(order).unwrap().derived_types().next().is_none());
        let number = model.find_declared_property(special, "Number").unwrap();
        assert_eq!(model.property(number).unwrap().value_type(), Some(ScalarType::Int64));
        let indexes = model.indexes(special);
        assert_eq!(indexes.len(), 1);
        assert_eq!(model.index(indexes[0]).unwrap().properties(), &[number]);
        assert!(model.find_declared_property(order, "Number").is_some());
    }

    #[test]
    fn test_base_type_round_trip_keeps_sources() {
        let (mut builder, order, special) = hierarchy();
        let customer = builder.entity("Customer", Explicit).unwrap().unwrap();
        let line = builder.entity("OrderLine", Explicit).unwrap().unwrap();
        let customer_pk = builder.primary_key(customer, &["Id"], DataAnnotation).unwrap().unwrap();
        let order_pk = builder.model().primary_key(order).unwrap();
        builder.has_base_type(special, Some(order), Explicit).unwrap().unwrap();

        let index = builder.has_index(special, &["Number"], DataAnnotation).unwrap().unwrap();
        builder.index_unique(index, true, Explicit).unwrap().unwrap();
        let own_fk = builder
            .has_foreign_key(special, customer, &["CustomerId"], DataAnnotation)
            .unwrap()
            .unwrap();
        builder.navigations(own_fk, Some("Customer"), None, DataAnnotation).unwrap().unwrap();
        builder
            .has_foreign_key(line, special, &["SpecialOrderId"], Convention)
            .unwrap()
            .unwrap();

        builder.has_base_type(special, None, Explicit).unwrap().unwrap();
        {
            let model = builder.model();
            let keys = model.entity_type(special).unwrap().declared_keys().to_vec();
            assert_eq!(keys.len(), 1);
            assert_eq!(model.key(keys[0]).unwrap().configuration_source(), Convention);
            let fk = model.foreign_key(model.foreign_keys(line)[0]).unwrap();
            assert_eq!(fk.principal_key(), keys[0]);
        }

        builder.has_base_type(special, Some(order), Explicit).unwrap().unwrap();

        let model = builder.model();
        let entity = model.entity_type(special).unwrap();
        assert_eq!(entity.base_type(), Some(order));
        assert!(entity.declared_keys().is_empty());
        assert_eq!(model.primary_key(order), Some(order_pk));
        assert_eq!(model.key(order_pk).unwrap().configuration_source(), Explicit);

        let number = model.find_declared_property(order, "Number").unwrap();
        let indexes = entity.declared_indexes().to_vec();
        assert_eq!(indexes.len(), 1);
        let restored = model.index(indexes[0]).unwrap();
        assert_eq!(restored.properties(), &[number]);
        assert_eq!(restored.configuration_source(), DataAnnotation);
        assert!(restored.is_unique());
        assert_eq!(restored.unique_source(), Some(Explicit));

        let fk = model.foreign_key(own_fk).unwrap();
        assert_eq!(fk.configuration_source(), DataAnnotation);
        assert_eq!(fk.principal_key(), customer_pk);
        let navigation = fk.navigation_to_principal().unwrap();
        assert_eq!(navigation.name(), "Customer");
        assert_eq!(navigation.configuration_source(), DataAnnotation);

        let line_fks = model.foreign_keys(line);
        assert_eq!(line_fks.len(), 1);
        let line_fk = model.foreign_key(line_fks[0]).unwrap();
        assert_eq!(line_fk.principal_entity(), special);
        assert_eq!(line_fk.principal_key(), order_pk);
        assert_eq!(line_fk.configuration_source(), Convention);
    }

    #[test]
    fn test_inheritance_cycle_is_an_error() {
        let (mut builder, order, special) = hierarchy();
        builder.has_base_type(special, Some(order), Explicit).unwrap().unwrap();

        let err = builder.has_base_type(order, Some(special), Explicit).unwrap_err();
        assert!(matches!(err, ModelError::InheritanceCycle { .. }));
        assert!(builder.has_base_type(order, Some(order), Explicit).is_err());
        assert_eq!(builder.model().entity_type(order).unwrap().base_type(), None);
    }

    #[test]
    fn test_base_type_precedence() {
        let (mut builder, order, special) = hierarchy();
        builder.has_base_type(special, Some(order), Explicit).unwrap().unwrap();

        assert!(builder.has_base_type(special, None, DataAnnotation).unwrap().is_none());
        assert_eq!(builder.model().entity_type(special).unwrap().base_type(), Some(order));
    }

    #[test]
    fn test_duplicate_property_is_merged_into_base() {
        let (mut builder, order, special) = hierarchy();
        builder
            .property(special, "Number", Some(ScalarType::Int64), None, Convention)
            .unwrap()
            .unwrap();
        builder.has_index(special, &["Number"], DataAnnotation).unwrap().unwrap();

        builder.has_base_type(special, Some(order), Explicit).unwrap().unwrap();

        let model = builder.model();
        assert!(model.find_declared_property(special, "Number").is_none());
        let inherited = model.find_declared_property(order, "Number").unwrap();
        let indexes = model.entity_type(special).unwrap().declared_indexes().to_vec();
        assert_eq!(indexes.len(), 1);
        let index = model.index(indexes[0]).unwrap();
        assert_eq!(index.properties(), &[inherited]);
        assert_eq!(index.configuration_source(), DataAnnotation);
    }

    #[test]
    fn test_conflicting_property_type_is_an_error() {
        let (mut builder, order, special) = hierarchy();
        builder
            .property(special, "Number", Some(ScalarType::String), None, Explicit)
            .unwrap()
            .unwrap();

        let err = builder.has_base_type(special, Some(order), Explicit).unwrap_err();
        assert!(matches!(err, ModelError::PropertyTypeMismatch { .. }));
        assert_eq!(builder.model().entity_type(special).unwrap().base_type(), None);
        assert!(builder.model().find_declared_property(special, "Number").is_some());
    }

    #[test]
    fn test_own_key_replaced_by_inherited_primary_key() {
        let (mut builder, order, special) = hierarchy();
        let line = builder.entity("OrderLine", Explicit).unwrap().unwrap();
        builder
            .property(special, "Id", Some(ScalarType::Int32), None, Explicit)
            .unwrap()
            .unwrap();
        builder.primary_key(special, &["Id"], DataAnnotation).unwrap().unwrap();
        builder
            .has_foreign_key(line, special, &["SpecialOrderId"], Explicit)
            .unwrap()
            .unwrap();

        assert!(builder.has_base_type(special, Some(order), DataAnnotation).unwrap().is_none());
        builder.has_base_type(special, Some(order), Explicit).unwrap().unwrap();

        let model = builder.model();
        assert!(model.entity_type(special).unwrap().declared_keys().is_empty());
        let foreign_keys = model.foreign_keys(line);
        assert_eq!(foreign_keys.len(), 1);
        let fk = model.foreign_key(foreign_keys[0]).unwrap();
        assert_eq!(fk.principal_entity(), special);
        assert_eq!(Some(fk.principal_key()), model.primary_key(order));
    }

    #[test]
    fn test_conflicting_relationship_keeps_base_side() {
        let (mut builder, order, special) = hierarchy();
        let customer = builder.entity("Customer", Explicit).unwrap().unwrap();
        builder
            .property(customer, "Id", Some(ScalarType::Int32), None, Explicit)
            .unwrap()
            .unwrap();
        builder.primary_key(customer, &["Id"], Explicit).unwrap().unwrap();
        let inherited = builder
            .create_foreign_key(order, customer, None, None, Some("Customer"), None, Explicit)
            .unwrap()
            .unwrap();
        builder
            .create_foreign_key(special, customer, None, None, Some("Customer"), None, Convention)
            .unwrap()
            .unwrap();

        builder.has_base_type(special, Some(order), Explicit).unwrap().unwrap();

        let model = builder.model();
        assert!(model.entity_type(special).unwrap().declared_foreign_keys().is_empty());
        assert!(model.find_declared_property(special, "CustomerId").is_none());
        assert!(model.foreign_key(inherited).is_some());
        assert_eq!(model.referencing_foreign_keys(customer), vec![inherited]);
    }
}
