//! Key and primary key operations.

use super::snapshot::{DetachedElement, DetachedRelationship};
use super::{rejected, ModelBuilder};
use crate::convention::ModelEvent;
use crate::error::{BuildResult, ModelError};
use crate::metadata::{EntityTypeId, ForeignKeyId, HostMember, Key, KeyId, PropertyId};
use crate::source::ConfigurationSource;
use tracing::{debug, instrument};

impl ModelBuilder {
    /// Get or create a key over the named properties, creating missing
    /// properties.
    pub fn has_key(
        &mut self,
        entity: EntityTypeId,
        properties: &[&str],
        source: ConfigurationSource,
    ) -> BuildResult<KeyId> {
        self.atomically(|b| {
            let Some(properties) = b.resolve_properties(entity, properties, source)? else {
                return Ok(None);
            };
            b.has_key_core(entity, &properties, source)
        })
    }

    pub(crate) fn has_key_core(
        &mut self,
        entity: EntityTypeId,
        properties: &[PropertyId],
        source: ConfigurationSource,
    ) -> BuildResult<KeyId> {
        let owner = self.model.try_entity(entity)?;
        let entity_name = owner.name.clone();
        if properties.is_empty() {
            return Err(ModelError::EmptyPropertyList {
                element: "key",
                entity: entity_name,
            });
        }
        if owner.base_type.is_some() {
            return Err(ModelError::KeyOnDerivedType { entity: entity_name });
        }
        for property in properties {
            let found = self.model.try_property(*property)?;
            if found.declaring_entity != entity {
                return Err(ModelError::ForeignProperty {
                    element: "key",
                    entity: entity_name,
                    property: found.name.clone(),
                });
            }
        }

        if let Some(existing) = self.model.find_key(entity, properties) {
            let key = self
                .model
                .keys
                .get_mut(existing)
                .ok_or(ModelError::StaleHandle { kind: "key" })?;
            key.source = key.source.max(source);
            return Ok(Some(existing));
        }

        for property in properties {
            for fk in self.model.foreign_keys_containing(*property) {
                if self.model.try_foreign_key(fk)?.declaring_entity != entity {
                    return rejected(
                        "has_key",
                        format!("properties of {entity_name} are used by a foreign key on a derived type"),
                    );
                }
            }
            let found = self.model.try_property(*property)?;
            if found.nullable && !source.can_update(found.nullability_source) {
                return rejected("has_key", format!("{}.{} must stay optional", entity_name, found.name));
            }
        }

        for property in properties {
            let found = self.model.try_property_mut(*property)?;
            if found.nullable {
                found.nullable = false;
                found.nullability_source = Some(source);
            }
        }

        let key = self.model.link_key(Key {
            declaring_entity: entity,
            properties: properties.to_vec(),
            referencing_foreign_keys: Default::default(),
            source,
        });
        debug!(
            entity = %entity_name,
            properties = ?self.model.property_names(properties),
            %source,
            "Key added"
        );
        self.notify(ModelEvent::KeyAdded { key });
        Ok(Some(key))
    }

    /// Make the named properties the primary key.
    ///
    /// Foreign keys referencing the previous primary key are detached and
    /// reattached; those that did not name their principal key follow the
    /// new primary key when it fits them.
    pub fn primary_key(
        &mut self,
        entity: EntityTypeId,
        properties: &[&str],
        source: ConfigurationSource,
    ) -> BuildResult<KeyId> {
        self.atomically(|b| {
            let Some(properties) = b.resolve_properties(entity, properties, source)? else {
                return Ok(None);
            };
            b.primary_key_core(entity, &properties, source)
        })
    }

    #[instrument(level = "debug", skip(self, properties))]
    pub(crate) fn primary_key_core(
        &mut self,
        entity: EntityTypeId,
        properties: &[PropertyId],
        source: ConfigurationSource,
    ) -> BuildResult<KeyId> {
        let owner = self.model.try_entity(entity)?;
        if properties.is_empty() {
            return Err(ModelError::EmptyPropertyList {
                element: "primary key",
                entity: owner.name.clone(),
            });
        }
        if owner.base_type.is_some() {
            return Err(ModelError::KeyOnDerivedType {
                entity: owner.name.clone(),
            });
        }

        let previous = owner.primary_key;
        let previous_source = owner.primary_key_source;
        if let Some(current) = previous {
            if self.model.try_key(current)?.properties == properties {
                let owner = self.model.try_entity_mut(entity)?;
                owner.primary_key_source = Some(source.max_opt(previous_source));
                if let Some(key) = self.model.keys.get_mut(current) {
                    key.source = key.source.max(source);
                }
                return Ok(Some(current));
            }
            if !source.outranks_opt(previous_source) {
                return rejected("primary_key", format!("primary key is {previous_source:?}"));
            }
        }

        let referencing: Vec<ForeignKeyId> = previous
            .and_then(|k| self.model.key(k))
            .map(|k| k.referencing_foreign_keys.iter().copied().collect())
            .unwrap_or_default();
        let mut detached = Vec::with_capacity(referencing.len());
        for fk in referencing {
            detached.push(DetachedElement::Relationship(self.detach_relationship(fk)?));
        }

        let Some(key) = self.has_key_core(entity, properties, source)? else {
            return Ok(None);
        };
        let owner = self.model.try_entity_mut(entity)?;
        owner.primary_key = Some(key);
        owner.primary_key_source = Some(source);
        debug!(entity = %owner.name, "Primary key set");

        if self.reattach(detached)?.is_none() {
            return Ok(None);
        }
        self.notify(ModelEvent::PrimaryKeySet {
            entity_type: entity,
            previous,
        });

        if let Some(old) = previous.filter(|old| *old != key) {
            let prunable = self
                .model
                .key(old)
                .is_some_and(|k| !k.is_referenced() && source.outranks(k.source));
            if prunable {
                self.remove_key_unchecked(old)?;
            }
        }
        Ok(Some(key))
    }

    /// Remove a key. Foreign keys referencing it are detached and returned.
    pub fn remove_key(
        &mut self,
        key: KeyId,
        source: ConfigurationSource,
    ) -> BuildResult<Vec<DetachedRelationship>> {
        self.atomically(|b| b.remove_key_core(key, source))
    }

    pub(crate) fn remove_key_core(
        &mut self,
        key: KeyId,
        source: ConfigurationSource,
    ) -> BuildResult<Vec<DetachedRelationship>> {
        let existing = self.model.try_key(key)?;
        if !source.outranks(existing.source) {
            return rejected("remove_key", format!("key is {}", existing.source));
        }
        let referencing: Vec<ForeignKeyId> =
            existing.referencing_foreign_keys.iter().copied().collect();
        for fk in &referencing {
            let fk_source = self.model.try_foreign_key(*fk)?.source;
            if !source.outranks(fk_source) {
                return rejected("remove_key", format!("key is referenced by a foreign key at {fk_source}"));
            }
        }

        let mut detached = Vec::with_capacity(referencing.len());
        for fk in referencing {
            detached.push(self.detach_relationship(fk)?);
        }
        if self.model.key(key).is_some() {
            self.remove_key_unchecked(key)?;
        }
        Ok(Some(detached))
    }

    /// Delete a key that nothing references, reset properties it made
    /// required and prune shadow properties it kept alive.
    pub(crate) fn remove_key_unchecked(&mut self, key: KeyId) -> Result<(), ModelError> {
        let Some(removed) = self.model.unlink_key(key) else {
            return Ok(());
        };
        let names = self.model.property_names(&removed.properties);
        debug!(
            entity = %self.model.entity_name(removed.declaring_entity),
            properties = ?names,
            "Key removed"
        );
        self.notify(ModelEvent::KeyRemoved {
            entity_type: removed.declaring_entity,
            properties: names,
        });

        for property in &removed.properties {
            if self.model.is_key_property(*property) {
                continue;
            }
            let required_by_fk = self
                .model
                .foreign_keys_containing(*property)
                .into_iter()
                .any(|fk| self.model.foreign_key(fk).is_some_and(|fk| fk.required));
            if required_by_fk {
                continue;
            }
            let Some(found) = self.model.property(*property) else {
                continue;
            };
            let can_be_null = found.shadow
                || matches!(
                    self.host_member(found.declaring_entity, &found.name),
                    Some(HostMember::Scalar { nullable: true, .. })
                );
            if can_be_null && removed.source.can_update(found.nullability_source) {
                let found = self.model.try_property_mut(*property)?;
                found.nullable = true;
                found.nullability_source = None;
            }
        }
        self.remove_unused_shadow_properties(&removed.properties);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{HostType, ScalarType};
    use ConfigurationSource::*;

    fn builder() -> (ModelBuilder, EntityTypeId) {
        let mut builder = ModelBuilder::new();
        builder.register_host_type(
            HostType::new("Customer")
                .with_scalar("Id", ScalarType::Int32)
                .with_scalar("Code", ScalarType::String),
        );
        let customer = builder.entity("Customer", Explicit).unwrap().unwrap();
        (builder, customer)
    }

    #[test]
    fn test_has_key_is_idempotent() {
        let (mut builder, customer) = builder();
        let key = builder.has_key(customer, &["Code"], Convention).unwrap().unwrap();
        let again = builder.has_key(customer, &["Code"], Explicit).unwrap().unwrap();

        assert_eq!(key, again);
        assert_eq!(builder.model().keys(customer).len(), 1);
        assert_eq!(builder.model().key(key).unwrap().configuration_source(), Explicit);
    }

    #[test]
    fn test_key_makes_properties_required() {
        let (mut builder, customer) = builder();
        let key = builder.has_key(customer, &["Code"], Convention).unwrap().unwrap();
        let code = builder.model().key(key).unwrap().properties()[0];
        assert!(!builder.model().property(code).unwrap().is_nullable());

        builder.remove_key(key, Explicit).unwrap().unwrap();
        assert!(builder.model().property(code).unwrap().is_nullable());
    }

    #[test]
    fn test_key_rejected_when_optional_is_pinned() {
        let (mut builder, customer) = builder();
        let code = builder.property(customer, "Code", None, None, Explicit).unwrap().unwrap();
        builder.is_required(code, false, Explicit).unwrap().unwrap();

        assert!(builder.has_key(customer, &["Code"], DataAnnotation).unwrap().is_none());
        assert!(builder.model().keys(customer).is_empty());
    }

    #[test]
    fn test_key_on_derived_type_is_invalid() {
        let (mut builder, customer) = builder();
        let vip = builder.entity("VipCustomer", Explicit).unwrap().unwrap();
        builder.has_base_type(vip, Some(customer), Explicit).unwrap().unwrap();

        assert!(matches!(
            builder.has_key(vip, &["Level"], Explicit),
            Err(ModelError::KeyOnDerivedType { .. })
        ));
        assert!(builder.model().find_property(vip, "Level").is_none());
    }

    #[test]
    fn test_empty_key_is_invalid() {
        let (mut builder, customer) = builder();
        assert!(matches!(
            builder.has_key(customer, &[], Explicit),
            Err(ModelError::EmptyPropertyList { .. })
        ));
    }

    #[test]
    fn test_explicit_primary_key_is_not_replaced_at_explicit() {
        let (mut builder, customer) = builder();
        let pk = builder.primary_key(customer, &["Id"], Explicit).unwrap().unwrap();

        assert!(builder.primary_key(customer, &["Code"], Explicit).unwrap().is_none());
        assert!(builder.remove_key(pk, Explicit).unwrap().is_none());
        assert_eq!(builder.model().primary_key(customer), Some(pk));
        assert_eq!(builder.model().keys(customer).len(), 1);
    }

    #[test]
    fn test_primary_key_replacement_prunes_old_key() {
        let (mut builder, customer) = builder();
        let first = builder.primary_key(customer, &["Id"], Convention).unwrap().unwrap();
        let second = builder.primary_key(customer, &["Code"], Explicit).unwrap().unwrap();

        assert_ne!(first, second);
        assert!(builder.model().key(first).is_none());
        assert_eq!(builder.model().primary_key(customer), Some(second));
        assert!(builder.primary_key(customer, &["Id"], DataAnnotation).unwrap().is_none());
    }

    #[test]
    fn test_remove_key_returns_detached_relationships() {
        let (mut builder, customer) = builder();
        let order = builder.entity("Order", Explicit).unwrap().unwrap();
        let pk = builder.primary_key(customer, &["Id"], DataAnnotation).unwrap().unwrap();
        builder
            .create_foreign_key(order, customer, None, None, None, None, Convention)
            .unwrap()
            .unwrap();

        assert!(builder.remove_key(pk, DataAnnotation).unwrap().is_none());
        let detached = builder.remove_key(pk, Explicit).unwrap().unwrap();
        assert_eq!(detached.len(), 1);
        assert_eq!(detached[0].dependent, "Order");
        assert_eq!(detached[0].properties[0].name, "CustomerId");
        assert!(builder.model().foreign_keys(order).is_empty());
        assert!(builder.model().find_property(order, "CustomerId").is_none());
    }
}
