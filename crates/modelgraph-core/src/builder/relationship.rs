//! Foreign key, navigation and relationship operations.

use super::snapshot::{DetachedElement, DetachedRelationship};
use super::{rejected, ModelBuilder};
use crate::convention::ModelEvent;
use crate::error::{BuildResult, ModelError};
use crate::metadata::{
    types_compatible, DeleteBehavior, EntityTypeId, ForeignKey, ForeignKeyId, KeyId,
    MemberCompatibility, Navigation, NavigationRef, Property, PropertyId,
};
use crate::source::ConfigurationSource;
use tracing::{debug, instrument};

/// Multiplicity chosen for a relationship between two entity types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationshipShape {
    /// The calling entity type is the dependent of a one-to-many relationship.
    ManyToOne,
    /// The calling entity type is the principal of a one-to-many relationship.
    OneToMany,
    /// One-to-one with the calling entity type as dependent.
    OneToOne,
}

impl RelationshipShape {
    /// Pick a shape from the compatibility of each navigation with a
    /// reference and with a collection member. `None` means the navigation
    /// was not given.
    pub fn infer(
        to_target: (Option<MemberCompatibility>, Option<MemberCompatibility>),
        inverse: (Option<MemberCompatibility>, Option<MemberCompatibility>),
    ) -> Option<RelationshipShape> {
        let possible = |c: Option<MemberCompatibility>| c.map_or(true, MemberCompatibility::is_possible);
        let (to_reference, to_collection) = to_target;
        let (inverse_reference, inverse_collection) = inverse;

        let many_to_one = possible(to_reference) && possible(inverse_collection);
        let one_to_many = possible(to_collection) && possible(inverse_reference);
        let one_to_one = possible(to_reference) && possible(inverse_reference);

        match (many_to_one, one_to_many, one_to_one) {
            (false, false, false) => None,
            (true, false, false) => Some(RelationshipShape::ManyToOne),
            (false, true, false) => Some(RelationshipShape::OneToMany),
            (false, false, true) => Some(RelationshipShape::OneToOne),
            _ => {
                // With a single navigation, the end without one is the "many" end.
                let has_target = to_reference.is_some();
                let has_inverse = inverse_reference.is_some();
                if has_target && !has_inverse && many_to_one {
                    Some(RelationshipShape::ManyToOne)
                } else if has_inverse && !has_target && one_to_many {
                    Some(RelationshipShape::OneToMany)
                } else if one_to_one {
                    Some(RelationshipShape::OneToOne)
                } else if many_to_one {
                    Some(RelationshipShape::ManyToOne)
                } else {
                    Some(RelationshipShape::OneToMany)
                }
            }
        }
    }
}

impl ModelBuilder {
    /// Whether dependent properties can reference the key column for column.
    pub(crate) fn is_compatible_key(&self, properties: &[PropertyId], key: KeyId) -> bool {
        let Some(key) = self.model.key(key) else {
            return false;
        };
        properties.len() == key.properties.len()
            && properties.iter().zip(&key.properties).all(|(d, p)| {
                match (self.model.property(*d), self.model.property(*p)) {
                    (Some(d), Some(p)) => types_compatible(d.value_type, p.value_type),
                    _ => false,
                }
            })
    }

    /// Whether a member name is already used on the entity type, its bases,
    /// its derived types or its host type.
    fn member_name_taken(&self, entity: EntityTypeId, name: &str) -> bool {
        self.model.find_property(entity, name).is_some()
            || !self.model.find_derived_properties(entity, name).is_empty()
            || self.model.find_navigation(entity, name).is_some()
            || !self.model.find_derived_navigations(entity, name).is_empty()
            || self.model.ignored_member_source(entity, name).is_some()
            || self.host_member(entity, name).is_some()
    }

    /// Whether a navigation name can be bound on the entity type, ignoring
    /// the end of `foreign_key` being bound.
    fn navigation_name_available(
        &self,
        entity: EntityTypeId,
        name: &str,
        foreign_key: ForeignKeyId,
        to_principal: bool,
        source: ConfigurationSource,
    ) -> bool {
        if self.model.ignored_member_source(entity, name).is_some()
            && source != ConfigurationSource::Explicit
        {
            return false;
        }
        if self.model.find_property(entity, name).is_some()
            || !self.model.find_derived_properties(entity, name).is_empty()
        {
            return false;
        }
        let clash = |nav: &NavigationRef| {
            nav.foreign_key != foreign_key || nav.points_to_principal != to_principal
        };
        !self.model.find_navigation(entity, name).iter().any(clash)
            && !self.model.find_derived_navigations(entity, name).iter().any(clash)
    }

    /// Link a foreign key without navigations and ensure an index over its
    /// dependent properties.
    pub(crate) fn add_foreign_key(
        &mut self,
        dependent: EntityTypeId,
        principal: EntityTypeId,
        principal_key: KeyId,
        principal_key_source: Option<ConfigurationSource>,
        properties: Vec<PropertyId>,
        source: ConfigurationSource,
    ) -> Result<ForeignKeyId, ModelError> {
        // Dependent properties of unknown type take the principal key's types.
        let key_properties = self.model.try_key(principal_key)?.properties.clone();
        for (dependent_property, key_property) in properties.iter().zip(&key_properties) {
            let key_type = self.model.try_property(*key_property)?.value_type;
            let found = self.model.try_property_mut(*dependent_property)?;
            if found.value_type.is_none() {
                found.value_type = key_type;
            }
        }

        let required = properties
            .iter()
            .all(|p| self.model.property(*p).is_some_and(|p| !p.nullable));
        let names = self.model.property_names(&properties);
        let foreign_key = self.model.link_foreign_key(ForeignKey {
            declaring_entity: dependent,
            principal_entity: principal,
            principal_key,
            principal_key_source,
            properties: properties.clone(),
            to_principal: None,
            to_dependent: None,
            unique: false,
            unique_source: None,
            required,
            required_source: None,
            delete_behavior: None,
            delete_behavior_source: None,
            source,
        });
        debug!(
            dependent = %self.model.entity_name(dependent),
            principal = %self.model.entity_name(principal),
            properties = ?names,
            %source,
            "Foreign key added"
        );
        self.notify(ModelEvent::ForeignKeyAdded { foreign_key });

        if self.model.find_index(dependent, &properties).is_none()
            && self
                .has_index_core(dependent, &properties, ConfigurationSource::Convention)?
                .is_none()
        {
            debug!(dependent = %self.model.entity_name(dependent), "Foreign key index was not created");
        }
        Ok(foreign_key)
    }

    /// Create shadow dependent properties mirroring the principal key.
    fn synthesize_dependent_properties(
        &mut self,
        dependent: EntityTypeId,
        prefix: &str,
        key: KeyId,
        required: bool,
    ) -> Result<Vec<PropertyId>, ModelError> {
        let key_properties = self.model.try_key(key)?.properties.clone();
        let mut created = Vec::with_capacity(key_properties.len());
        for key_property in key_properties {
            let key_property = self.model.try_property(key_property)?;
            let value_type = key_property.value_type;
            let base = format!("{prefix}{}", key_property.name);
            let mut name = base.clone();
            let mut suffix = 1;
            while self.member_name_taken(dependent, &name) {
                name = format!("{base}{suffix}");
                suffix += 1;
            }

            let property = self.model.link_property(Property {
                name: name.clone(),
                declaring_entity: dependent,
                value_type,
                value_type_source: None,
                shadow: true,
                shadow_source: None,
                nullable: !required,
                nullability_source: None,
                source: ConfigurationSource::Convention,
            });
            debug!(entity = %self.model.entity_name(dependent), property = %name, "Foreign key property created");
            self.notify(ModelEvent::PropertyAdded { property });
            created.push(property);
        }
        Ok(created)
    }

    /// Create a convention key on the principal's root over shadow
    /// properties shaped like the dependent properties.
    fn synthetic_principal_key(
        &mut self,
        principal: EntityTypeId,
        dependent_properties: &[PropertyId],
    ) -> BuildResult<KeyId> {
        let root = self.model.root(principal);
        let mut properties = Vec::with_capacity(dependent_properties.len());
        for dependent_property in dependent_properties {
            let template = self.model.try_property(*dependent_property)?.clone();
            let existing = self.model.find_declared_property(root, &template.name);
            let reusable = existing.and_then(|id| self.model.property(id).map(|p| (id, p))).filter(|(_, p)| {
                p.shadow && types_compatible(p.value_type, template.value_type)
            });
            let property = match reusable {
                Some((id, _)) => id,
                None => {
                    let mut name = template.name.clone();
                    let mut suffix = 1;
                    while self.member_name_taken(root, &name) {
                        name = format!("{}{suffix}", template.name);
                        suffix += 1;
                    }
                    let property = self.model.link_property(Property {
                        name,
                        declaring_entity: root,
                        value_type: template.value_type,
                        value_type_source: None,
                        shadow: true,
                        shadow_source: None,
                        nullable: false,
                        nullability_source: None,
                        source: ConfigurationSource::Convention,
                    });
                    self.notify(ModelEvent::PropertyAdded { property });
                    property
                }
            };
            properties.push(property);
        }
        self.has_key_core(root, &properties, ConfigurationSource::Convention)
    }

    /// Get or create a foreign key over the named dependent properties
    /// towards the principal's primary key.
    pub fn has_foreign_key(
        &mut self,
        entity: EntityTypeId,
        principal: EntityTypeId,
        properties: &[&str],
        source: ConfigurationSource,
    ) -> BuildResult<ForeignKeyId> {
        self.atomically(|b| {
            let Some(properties) = b.resolve_properties(entity, properties, source)? else {
                return Ok(None);
            };
            b.has_foreign_key_core(entity, principal, properties, source)
        })
    }

    pub(crate) fn has_foreign_key_core(
        &mut self,
        entity: EntityTypeId,
        principal: EntityTypeId,
        properties: Vec<PropertyId>,
        source: ConfigurationSource,
    ) -> BuildResult<ForeignKeyId> {
        if let Some(existing) = self.model.find_foreign_key(entity, &properties, principal) {
            let fk = self.model.try_foreign_key_mut(existing)?;
            fk.source = fk.source.max(source);
            return Ok(Some(existing));
        }

        let names = self.model.property_names(&properties);
        let derived = self.model.find_derived_foreign_keys(entity, &names, principal);
        if !derived.is_empty() {
            debug!(entity = %self.model.entity_name(entity), "Moving foreign key up from derived types");
            let mut detached = Vec::with_capacity(derived.len());
            for fk in derived {
                if self.model.foreign_key(fk).is_some() {
                    detached.push(self.detach_relationship(fk)?);
                }
            }
            let mut moved = None;
            for relationship in &detached {
                let Some(fk) = self.attach_relationship(relationship, Some(entity))? else {
                    return Ok(None);
                };
                moved = Some(fk);
            }
            if let Some(fk) = moved {
                let fk = self.model.try_foreign_key_mut(fk)?;
                fk.source = fk.source.max(source);
            }
            return Ok(moved);
        }

        self.create_foreign_key_core(entity, principal, Some(properties), None, None, None, source)
    }

    /// Create a foreign key.
    ///
    /// Without dependent properties, shadow properties named after the
    /// navigation (or the principal) and the key properties are created.
    /// Without principal properties, the primary key is targeted.
    #[allow(clippy::too_many_arguments)]
    pub fn create_foreign_key(
        &mut self,
        dependent: EntityTypeId,
        principal: EntityTypeId,
        dependent_properties: Option<&[&str]>,
        principal_properties: Option<&[&str]>,
        navigation_to_principal: Option<&str>,
        required: Option<bool>,
        source: ConfigurationSource,
    ) -> BuildResult<ForeignKeyId> {
        self.atomically(|b| {
            let dependent_properties = match dependent_properties {
                Some(names) => match b.resolve_properties(dependent, names, source)? {
                    Some(resolved) => Some(resolved),
                    None => return Ok(None),
                },
                None => None,
            };
            let principal_properties = match principal_properties {
                Some(names) => {
                    let root = b.model.root(principal);
                    match b.resolve_properties(root, names, source)? {
                        Some(resolved) => Some(resolved),
                        None => return Ok(None),
                    }
                }
                None => None,
            };
            b.create_foreign_key_core(
                dependent,
                principal,
                dependent_properties,
                principal_properties,
                navigation_to_principal,
                required,
                source,
            )
        })
    }

    #[allow(clippy::too_many_arguments)]
    pub(crate) fn create_foreign_key_core(
        &mut self,
        dependent: EntityTypeId,
        principal: EntityTypeId,
        dependent_properties: Option<Vec<PropertyId>>,
        principal_properties: Option<Vec<PropertyId>>,
        navigation_to_principal: Option<&str>,
        required: Option<bool>,
        source: ConfigurationSource,
    ) -> BuildResult<ForeignKeyId> {
        let dependent_name = self.model.try_entity(dependent)?.name.clone();
        let principal_name = self.model.try_entity(principal)?.name.clone();

        let (mut principal_key, principal_key_source) = match principal_properties {
            Some(properties) => {
                let key = match self.model.find_key(principal, &properties) {
                    Some(key) => key,
                    None => {
                        let root = self.model.root(principal);
                        match self.has_key_core(root, &properties, source)? {
                            Some(key) => key,
                            None => return Ok(None),
                        }
                    }
                };
                (key, Some(source))
            }
            None => match self.model.primary_key(principal) {
                Some(key) => (key, None),
                None => {
                    return rejected(
                        "create_foreign_key",
                        format!("{principal_name} has no primary key"),
                    )
                }
            },
        };

        let properties = match dependent_properties {
            None => {
                let prefix = navigation_to_principal.unwrap_or(principal_name.as_str()).to_string();
                self.synthesize_dependent_properties(
                    dependent,
                    &prefix,
                    principal_key,
                    required.unwrap_or(false),
                )?
            }
            Some(properties) => {
                if properties.is_empty() {
                    return Err(ModelError::EmptyPropertyList {
                        element: "foreign key",
                        entity: dependent_name,
                    });
                }
                let ancestry = self.model.ancestry(dependent);
                for property in &properties {
                    let found = self.model.try_property(*property)?;
                    if !ancestry.contains(&found.declaring_entity) {
                        return Err(ModelError::ForeignProperty {
                            element: "foreign key",
                            entity: dependent_name,
                            property: found.name.clone(),
                        });
                    }
                }
                if !self.is_compatible_key(&properties, principal_key) {
                    if principal_key_source.is_some() {
                        return rejected(
                            "create_foreign_key",
                            format!("dependent properties of {dependent_name} do not match the principal key"),
                        );
                    }
                    principal_key = match self.synthetic_principal_key(principal, &properties)? {
                        Some(key) => key,
                        None => return Ok(None),
                    };
                }
                properties
            }
        };

        let foreign_key = self.add_foreign_key(
            dependent,
            principal,
            principal_key,
            principal_key_source,
            properties,
            source,
        )?;

        if let Some(required) = required {
            if self
                .foreign_key_required_core(foreign_key, required, source)?
                .is_none()
            {
                return Ok(None);
            }
        }
        if let Some(navigation) = navigation_to_principal {
            if self
                .bind_navigation(foreign_key, navigation, true, source)?
                .is_none()
            {
                return Ok(None);
            }
        }
        Ok(Some(foreign_key))
    }

    /// Bind a navigation name to one end of a foreign key.
    pub(crate) fn bind_navigation(
        &mut self,
        foreign_key: ForeignKeyId,
        name: &str,
        to_principal: bool,
        source: ConfigurationSource,
    ) -> BuildResult<()> {
        let fk = self.model.try_foreign_key(foreign_key)?.clone();
        let (declaring, target) = if to_principal {
            (fk.declaring_entity, fk.principal_entity)
        } else {
            (fk.principal_entity, fk.declaring_entity)
        };
        let current = if to_principal {
            fk.to_principal.clone()
        } else {
            fk.to_dependent.clone()
        };
        if let Some(current) = &current {
            if current.name == name {
                let stamp = current.source.max(source);
                let fk = self.model.try_foreign_key_mut(foreign_key)?;
                let slot = if to_principal {
                    &mut fk.to_principal
                } else {
                    &mut fk.to_dependent
                };
                if let Some(navigation) = slot {
                    navigation.source = stamp;
                }
                return Ok(Some(()));
            }
            if !source.outranks(current.source) {
                return rejected("navigation", format!("{} is bound at {}", current.name, current.source));
            }
        }
        if !self.navigation_name_available(declaring, name, foreign_key, to_principal, source) {
            return rejected(
                "navigation",
                format!("{}.{name} is already used", self.model.entity_name(declaring)),
            );
        }

        let declaring_host = self.model.try_entity(declaring)?.host_type.clone();
        let target_host = self.model.try_entity(target)?.host_type.clone();
        let registry = &self.model.host_types;
        let collection = !to_principal && !fk.unique;
        let expected = registry.navigation_compatibility(
            declaring_host.as_deref(),
            name,
            target_host.as_deref(),
            collection,
        );
        let mut flip_unique = false;
        if expected == MemberCompatibility::Incompatible {
            let other = registry.navigation_compatibility(
                declaring_host.as_deref(),
                name,
                target_host.as_deref(),
                !collection,
            );
            if !to_principal && other.is_possible() && source.can_update(fk.unique_source) {
                flip_unique = true;
            } else {
                return rejected(
                    "navigation",
                    format!("host member {name} does not fit the relationship"),
                );
            }
        }

        if let Some(ignored) = self.model.entity_types.get_mut(declaring) {
            ignored.ignored_members.remove(name);
        }
        let updated = self.model.try_foreign_key_mut(foreign_key)?;
        if flip_unique {
            updated.unique = collection;
            updated.unique_source = Some(source);
        }
        let navigation = Navigation {
            name: name.to_string(),
            source,
        };
        if to_principal {
            updated.to_principal = Some(navigation);
        } else {
            updated.to_dependent = Some(navigation);
        }
        if flip_unique {
            self.sync_index_uniqueness(foreign_key)?;
        }

        if let Some(previous) = current {
            self.notify(ModelEvent::NavigationRemoved {
                entity_type: declaring,
                target,
                name: previous.name,
                points_to_principal: to_principal,
            });
        }
        debug!(
            entity = %self.model.entity_name(declaring),
            navigation = name,
            to_principal,
            "Navigation added"
        );
        self.notify(ModelEvent::NavigationAdded {
            foreign_key,
            name: name.to_string(),
            points_to_principal: to_principal,
        });
        Ok(Some(()))
    }

    /// Bind navigation names to a foreign key.
    pub fn navigations(
        &mut self,
        foreign_key: ForeignKeyId,
        to_principal: Option<&str>,
        to_dependent: Option<&str>,
        source: ConfigurationSource,
    ) -> BuildResult<ForeignKeyId> {
        self.atomically(|b| {
            for (name, points_to_principal) in [(to_principal, true), (to_dependent, false)] {
                let Some(name) = name else {
                    continue;
                };
                if b.bind_navigation(foreign_key, name, points_to_principal, source)?.is_none() {
                    return Ok(None);
                }
            }
            Ok(Some(foreign_key))
        })
    }

    /// Configure a relationship between two entity types from navigation
    /// names, inferring which side is the principal from the host members.
    pub fn relationship(
        &mut self,
        entity: EntityTypeId,
        target: EntityTypeId,
        navigation_to_target: Option<&str>,
        inverse_navigation: Option<&str>,
        source: ConfigurationSource,
    ) -> BuildResult<ForeignKeyId> {
        self.atomically(|b| {
            b.relationship_core(entity, target, navigation_to_target, inverse_navigation, source)
        })
    }

    #[instrument(level = "debug", skip(self))]
    fn relationship_core(
        &mut self,
        entity: EntityTypeId,
        target: EntityTypeId,
        navigation_to_target: Option<&str>,
        inverse_navigation: Option<&str>,
        source: ConfigurationSource,
    ) -> BuildResult<ForeignKeyId> {
        self.model.try_entity(entity)?;
        self.model.try_entity(target)?;

        // Reuse a relationship already bound to one of the navigations.
        for (owner, other, name, other_name) in [
            (entity, target, navigation_to_target, inverse_navigation),
            (target, entity, inverse_navigation, navigation_to_target),
        ] {
            let Some(name) = name else {
                continue;
            };
            let Some(found) = self.model.find_navigation(owner, name) else {
                continue;
            };
            let fk = self.model.try_foreign_key(found.foreign_key)?;
            let far_end = if found.points_to_principal {
                fk.principal_entity
            } else {
                fk.declaring_entity
            };
            if self.model.is_same_or_derived(far_end, other) {
                if let Some(other_name) = other_name {
                    if self
                        .bind_navigation(found.foreign_key, other_name, !found.points_to_principal, source)?
                        .is_none()
                    {
                        return Ok(None);
                    }
                }
                let fk = self.model.try_foreign_key_mut(found.foreign_key)?;
                fk.source = fk.source.max(source);
                return Ok(Some(found.foreign_key));
            }
            if self.remove_navigation_core(found, source)?.is_none() {
                return Ok(None);
            }
        }

        let entity_host = self.model.try_entity(entity)?.host_type.clone();
        let target_host = self.model.try_entity(target)?.host_type.clone();
        let registry = &self.model.host_types;
        let check = |declaring: &Option<String>, member: Option<&str>, to: &Option<String>, collection| {
            member.map(|m| {
                registry.navigation_compatibility(declaring.as_deref(), m, to.as_deref(), collection)
            })
        };
        let to_target = (
            check(&entity_host, navigation_to_target, &target_host, false),
            check(&entity_host, navigation_to_target, &target_host, true),
        );
        let inverse = (
            check(&target_host, inverse_navigation, &entity_host, false),
            check(&target_host, inverse_navigation, &entity_host, true),
        );

        let Some(shape) = RelationshipShape::infer(to_target, inverse) else {
            let possible = |c: Option<MemberCompatibility>| c.map_or(true, MemberCompatibility::is_possible);
            if possible(to_target.1) && possible(inverse.1) {
                return rejected("relationship", "many-to-many relationships are not supported");
            }
            return rejected("relationship", "navigations do not fit any relationship shape");
        };
        debug!(?shape, "Relationship shape inferred");

        let (dependent, principal, to_principal, to_dependent, unique) = match shape {
            RelationshipShape::ManyToOne => {
                (entity, target, navigation_to_target, inverse_navigation, false)
            }
            RelationshipShape::OneToMany => {
                (target, entity, inverse_navigation, navigation_to_target, false)
            }
            RelationshipShape::OneToOne => {
                (entity, target, navigation_to_target, inverse_navigation, true)
            }
        };

        let Some(foreign_key) =
            self.create_foreign_key_core(dependent, principal, None, None, to_principal, None, source)?
        else {
            return Ok(None);
        };
        if unique {
            let fk = self.model.try_foreign_key_mut(foreign_key)?;
            fk.unique = true;
            fk.unique_source = Some(source);
            self.sync_index_uniqueness(foreign_key)?;
        }
        if let Some(name) = to_dependent {
            if self.bind_navigation(foreign_key, name, false, source)?.is_none() {
                return Ok(None);
            }
        }
        Ok(Some(foreign_key))
    }

    /// Align a convention index over the dependent properties with the
    /// foreign key's uniqueness.
    pub(crate) fn sync_index_uniqueness(&mut self, foreign_key: ForeignKeyId) -> Result<(), ModelError> {
        let fk = self.model.try_foreign_key(foreign_key)?;
        let unique = fk.unique;
        if let Some(index) = self.model.find_index(fk.declaring_entity, &fk.properties) {
            if let Some(ix) = self.model.indexes.get_mut(index) {
                if ConfigurationSource::Convention.can_update(ix.unique_source) {
                    ix.unique = unique;
                    ix.unique_source = Some(ConfigurationSource::Convention);
                }
            }
        }
        Ok(())
    }

    /// Remove a foreign key and return a snapshot that can recreate it.
    pub fn remove_foreign_key(
        &mut self,
        foreign_key: ForeignKeyId,
        source: ConfigurationSource,
    ) -> BuildResult<DetachedRelationship> {
        self.atomically(|b| {
            let existing = b.model.try_foreign_key(foreign_key)?;
            if !source.outranks(existing.source) {
                return rejected("remove_foreign_key", format!("foreign key is {}", existing.source));
            }
            b.detach_relationship(foreign_key).map(Some)
        })
    }

    /// Unlink a foreign key, then drop its convention index, a synthetic
    /// principal key nothing else uses, and orphaned shadow properties.
    pub(crate) fn remove_foreign_key_unchecked(
        &mut self,
        foreign_key: ForeignKeyId,
    ) -> Result<(), ModelError> {
        let Some(removed) = self.model.unlink_foreign_key(foreign_key) else {
            return Ok(());
        };
        for (navigation, to_principal) in [(&removed.to_principal, true), (&removed.to_dependent, false)] {
            let Some(navigation) = navigation else {
                continue;
            };
            let (entity_type, target) = if to_principal {
                (removed.declaring_entity, removed.principal_entity)
            } else {
                (removed.principal_entity, removed.declaring_entity)
            };
            self.notify(ModelEvent::NavigationRemoved {
                entity_type,
                target,
                name: navigation.name.clone(),
                points_to_principal: to_principal,
            });
        }
        let names = self.model.property_names(&removed.properties);
        debug!(
            dependent = %self.model.entity_name(removed.declaring_entity),
            principal = %self.model.entity_name(removed.principal_entity),
            properties = ?names,
            "Foreign key removed"
        );
        self.notify(ModelEvent::ForeignKeyRemoved {
            entity_type: removed.declaring_entity,
            principal: removed.principal_entity,
            properties: names,
        });

        if let Some(index) = self.model.find_index(removed.declaring_entity, &removed.properties) {
            let still_needed = self
                .model
                .foreign_keys
                .iter()
                .any(|(_, fk)| fk.properties == removed.properties);
            let is_convention = self
                .model
                .index(index)
                .is_some_and(|ix| ix.source == ConfigurationSource::Convention);
            if is_convention && !still_needed {
                self.model.unlink_index(index);
            }
        }

        let synthetic = self.model.key(removed.principal_key).is_some_and(|key| {
            key.source == ConfigurationSource::Convention
                && !key.is_referenced()
                && self
                    .model
                    .entity_type(key.declaring_entity)
                    .is_some_and(|e| e.primary_key != Some(removed.principal_key))
        });
        if synthetic {
            self.remove_key_unchecked(removed.principal_key)?;
        }

        self.remove_unused_shadow_properties(&removed.properties);
        Ok(())
    }

    /// Remove one navigation. A convention relationship left without any
    /// navigation is removed entirely.
    pub(crate) fn remove_navigation_core(
        &mut self,
        navigation: NavigationRef,
        source: ConfigurationSource,
    ) -> BuildResult<()> {
        // Removing an earlier navigation may already have removed the relationship.
        let Some(fk) = self.model.foreign_key(navigation.foreign_key) else {
            return Ok(Some(()));
        };
        let (bound, other) = if navigation.points_to_principal {
            (&fk.to_principal, &fk.to_dependent)
        } else {
            (&fk.to_dependent, &fk.to_principal)
        };
        let Some(bound) = bound.clone() else {
            return Ok(Some(()));
        };
        if !source.outranks(bound.source) {
            return rejected("remove_navigation", format!("{} is {}", bound.name, bound.source));
        }
        if other.is_none() && fk.source == ConfigurationSource::Convention {
            self.remove_foreign_key_unchecked(navigation.foreign_key)?;
            return Ok(Some(()));
        }

        let (entity_type, target) = if navigation.points_to_principal {
            (fk.declaring_entity, fk.principal_entity)
        } else {
            (fk.principal_entity, fk.declaring_entity)
        };
        let fk = self.model.try_foreign_key_mut(navigation.foreign_key)?;
        if navigation.points_to_principal {
            fk.to_principal = None;
        } else {
            fk.to_dependent = None;
        }
        self.notify(ModelEvent::NavigationRemoved {
            entity_type,
            target,
            name: bound.name,
            points_to_principal: navigation.points_to_principal,
        });
        Ok(Some(()))
    }

    /// Set whether at most one dependent exists per principal.
    pub fn foreign_key_unique(
        &mut self,
        foreign_key: ForeignKeyId,
        unique: bool,
        source: ConfigurationSource,
    ) -> BuildResult<ForeignKeyId> {
        self.atomically(|b| {
            let fk = b.model.try_foreign_key_mut(foreign_key)?;
            if fk.unique == unique {
                fk.unique_source = Some(source.max_opt(fk.unique_source));
                return Ok(Some(foreign_key));
            }
            if !source.can_update(fk.unique_source) {
                return rejected("foreign_key_unique", format!("uniqueness is {:?}", fk.unique_source));
            }
            fk.unique = unique;
            fk.unique_source = Some(source);
            b.sync_index_uniqueness(foreign_key)?;
            Ok(Some(foreign_key))
        })
    }

    /// Set whether a dependent must have a principal. Dependent properties
    /// follow the new required-ness.
    pub fn foreign_key_required(
        &mut self,
        foreign_key: ForeignKeyId,
        required: bool,
        source: ConfigurationSource,
    ) -> BuildResult<ForeignKeyId> {
        self.atomically(|b| b.foreign_key_required_core(foreign_key, required, source))
    }

    pub(crate) fn foreign_key_required_core(
        &mut self,
        foreign_key: ForeignKeyId,
        required: bool,
        source: ConfigurationSource,
    ) -> BuildResult<ForeignKeyId> {
        let fk = self.model.try_foreign_key(foreign_key)?;
        if fk.required == required {
            let stamp = Some(source.max_opt(fk.required_source));
            self.model.try_foreign_key_mut(foreign_key)?.required_source = stamp;
            return Ok(Some(foreign_key));
        }
        if !source.can_update(fk.required_source) {
            return rejected("foreign_key_required", format!("required-ness is {:?}", fk.required_source));
        }

        let properties = fk.properties.clone();
        for property in properties {
            let found = self.model.try_property(property)?;
            if found.nullable != required {
                continue;
            }
            if !required && self.model.is_key_property(property) {
                continue;
            }
            if self.is_required_core(property, required, source)?.is_none() {
                return Ok(None);
            }
        }

        let fk = self.model.try_foreign_key_mut(foreign_key)?;
        fk.required = required;
        fk.required_source = Some(source);
        Ok(Some(foreign_key))
    }

    /// Set the delete behavior.
    pub fn delete_behavior(
        &mut self,
        foreign_key: ForeignKeyId,
        behavior: DeleteBehavior,
        source: ConfigurationSource,
    ) -> BuildResult<ForeignKeyId> {
        self.atomically(|b| {
            let fk = b.model.try_foreign_key_mut(foreign_key)?;
            if fk.delete_behavior == Some(behavior) {
                fk.delete_behavior_source = Some(source.max_opt(fk.delete_behavior_source));
                return Ok(Some(foreign_key));
            }
            if !source.can_update(fk.delete_behavior_source) {
                return rejected("delete_behavior", format!("delete behavior is {:?}", fk.delete_behavior_source));
            }
            fk.delete_behavior = Some(behavior);
            fk.delete_behavior_source = Some(source);
            Ok(Some(foreign_key))
        })
    }

    /// Snapshot every relationship in `foreign_keys` that still exists.
    pub(crate) fn detach_relationships(
        &mut self,
        foreign_keys: impl IntoIterator<Item = ForeignKeyId>,
    ) -> Result<Vec<DetachedElement>, ModelError> {
        let mut detached = Vec::new();
        for fk in foreign_keys {
            if self.model.foreign_key(fk).is_some() {
                detached.push(DetachedElement::Relationship(self.detach_relationship(fk)?));
            }
        }
        Ok(detached)
    }
}
