//! Property operations.

use super::snapshot::DetachedElement;
use super::{rejected, ModelBuilder};
use crate::convention::ModelEvent;
use crate::error::{BuildResult, ModelError};
use crate::metadata::{EntityTypeId, HostMember, Property, PropertyId, ScalarType};
use crate::source::ConfigurationSource;
use tracing::debug;

impl ModelBuilder {
    /// Member of the entity's host type (or its host bases) with this name.
    pub(crate) fn host_member(&self, entity: EntityTypeId, name: &str) -> Option<HostMember> {
        let host_type = self.model.entity_type(entity)?.host_type.as_deref()?;
        self.model.host_types.find_member(host_type, name).cloned()
    }

    /// Resolve property names on the entity type, creating missing ones.
    pub(crate) fn resolve_properties(
        &mut self,
        entity: EntityTypeId,
        names: &[&str],
        source: ConfigurationSource,
    ) -> BuildResult<Vec<PropertyId>> {
        let mut resolved = Vec::with_capacity(names.len());
        for name in names {
            let property = match self.model.find_property(entity, name) {
                Some(existing) => existing,
                None => match self.property_core(entity, name, None, None, source)? {
                    Some(created) => created,
                    None => return Ok(None),
                },
            };
            resolved.push(property);
        }
        Ok(Some(resolved))
    }

    /// Get, update or create a property.
    ///
    /// `value_type` and `shadow` are only asserted when given. A property of
    /// the same name on derived types is moved up to this entity type.
    pub fn property(
        &mut self,
        entity: EntityTypeId,
        name: &str,
        value_type: Option<ScalarType>,
        shadow: Option<bool>,
        source: ConfigurationSource,
    ) -> BuildResult<PropertyId> {
        self.atomically(|b| b.property_core(entity, name, value_type, shadow, source))
    }

    pub(crate) fn property_core(
        &mut self,
        entity: EntityTypeId,
        name: &str,
        value_type: Option<ScalarType>,
        shadow: Option<bool>,
        source: ConfigurationSource,
    ) -> BuildResult<PropertyId> {
        let entity_name = self.model.try_entity(entity)?.name.clone();

        if let Some(ignored) = self.model.ignored_member_source(entity, name) {
            if source != ConfigurationSource::Explicit {
                return rejected("property", format!("{entity_name}.{name} is ignored at {ignored}"));
            }
            for id in self.model.ancestry(entity) {
                if let Some(owner) = self.model.entity_types.get_mut(id) {
                    owner.ignored_members.remove(name);
                }
            }
        }

        let member = self.host_member(entity, name);
        if matches!(
            member,
            Some(HostMember::Reference { .. } | HostMember::Collection { .. })
        ) {
            return Err(ModelError::NavigationMemberAsProperty {
                entity: entity_name,
                member: name.to_string(),
            });
        }

        if let Some(existing) = self.model.find_property(entity, name) {
            return self.update_property(existing, value_type, shadow, source);
        }

        if self.model.find_navigation(entity, name).is_some()
            || !self.model.find_derived_navigations(entity, name).is_empty()
        {
            return rejected("property", format!("{entity_name}.{name} is a navigation"));
        }

        let (member_type, member_nullable) = match member {
            Some(HostMember::Scalar {
                value_type,
                nullable,
            }) => (Some(value_type), nullable),
            _ => (None, true),
        };
        let is_shadow = match shadow {
            Some(false) if member_type.is_none() => {
                return Err(ModelError::MissingHostMember {
                    entity: entity_name,
                    property: name.to_string(),
                })
            }
            Some(flag) => flag,
            None => member_type.is_none(),
        };
        if let (Some(existing), Some(requested), false) = (member_type, value_type, is_shadow) {
            if existing != requested {
                return Err(ModelError::PropertyTypeMismatch {
                    entity: entity_name,
                    property: name.to_string(),
                    existing,
                    requested,
                });
            }
        }

        let requested_type = value_type.or(member_type);
        let derived = self.model.find_derived_properties(entity, name);
        let mut inherited_type = None;
        let mut merged_source = source;
        for property in &derived {
            let existing = self.model.try_property(*property)?;
            if let (Some(requested), Some(found)) = (requested_type.or(inherited_type), existing.value_type) {
                if requested != found && !source.outranks_opt(existing.value_type_source) {
                    return rejected(
                        "property",
                        format!("{name} is {found:?} on a derived type of {entity_name}"),
                    );
                }
            }
            inherited_type = inherited_type.or(existing.value_type);
            merged_source = merged_source.max(existing.source);
        }
        let detached = if derived.is_empty() {
            None
        } else {
            debug!(entity = %entity_name, property = name, "Moving property up from derived types");
            Some(self.detach_properties(&derived)?)
        };

        let nullable = if is_shadow { true } else { member_nullable };
        let id = self.model.link_property(Property {
            name: name.to_string(),
            declaring_entity: entity,
            value_type: requested_type.or(inherited_type),
            value_type_source: value_type.map(|_| source),
            shadow: is_shadow,
            shadow_source: shadow.map(|_| source),
            nullable,
            nullability_source: None,
            source: merged_source,
        });
        debug!(entity = %entity_name, property = name, shadow = is_shadow, %source, "Property added");
        self.notify(ModelEvent::PropertyAdded { property: id });

        if let Some(detached) = detached {
            if let Some(strongest) = detached
                .properties
                .iter()
                .filter(|p| p.nullability_source.is_some())
                .max_by_key(|p| p.nullability_source)
            {
                let pulled_up = self.model.try_property_mut(id)?;
                pulled_up.nullable = strongest.nullable;
                pulled_up.nullability_source = strongest.nullability_source;
            }
            if self
                .reattach(vec![DetachedElement::Properties(detached)])?
                .is_none()
            {
                return Ok(None);
            }
        }
        Ok(Some(id))
    }

    fn update_property(
        &mut self,
        id: PropertyId,
        value_type: Option<ScalarType>,
        shadow: Option<bool>,
        source: ConfigurationSource,
    ) -> BuildResult<PropertyId> {
        let existing = self.model.try_property(id)?.clone();
        let entity_name = self.model.entity_name(existing.declaring_entity).to_string();

        if let Some(requested) = value_type {
            if existing.value_type != Some(requested) {
                if let (Some(found), false) = (existing.value_type, existing.shadow) {
                    return Err(ModelError::PropertyTypeMismatch {
                        entity: entity_name,
                        property: existing.name,
                        existing: found,
                        requested,
                    });
                }
                if !source.outranks_opt(existing.value_type_source) {
                    return rejected(
                        "property",
                        format!("{entity_name}.{} has a pinned value type", existing.name),
                    );
                }
            }
        }

        if let Some(flag) = shadow {
            if flag != existing.shadow {
                if !flag
                    && !matches!(
                        self.host_member(existing.declaring_entity, &existing.name),
                        Some(HostMember::Scalar { .. })
                    )
                {
                    return Err(ModelError::MissingHostMember {
                        entity: entity_name,
                        property: existing.name,
                    });
                }
                if !source.outranks_opt(existing.shadow_source) {
                    return rejected(
                        "property",
                        format!("{entity_name}.{} has a pinned shadow flag", existing.name),
                    );
                }
            }
        }

        let property = self.model.try_property_mut(id)?;
        if let Some(requested) = value_type {
            if property.value_type == Some(requested) {
                property.value_type_source = Some(source.max_opt(property.value_type_source));
            } else {
                property.value_type = Some(requested);
                property.value_type_source = Some(source);
            }
        }
        if let Some(flag) = shadow {
            if property.shadow == flag {
                property.shadow_source = Some(source.max_opt(property.shadow_source));
            } else {
                property.shadow = flag;
                property.shadow_source = Some(source);
            }
        }
        property.source = property.source.max(source);
        Ok(Some(id))
    }

    /// Set whether a property is required.
    pub fn is_required(
        &mut self,
        property: PropertyId,
        required: bool,
        source: ConfigurationSource,
    ) -> BuildResult<PropertyId> {
        self.atomically(|b| b.is_required_core(property, required, source))
    }

    pub(crate) fn is_required_core(
        &mut self,
        property: PropertyId,
        required: bool,
        source: ConfigurationSource,
    ) -> BuildResult<PropertyId> {
        let existing = self.model.try_property(property)?;
        if existing.nullable != required {
            let stamp = Some(source.max_opt(existing.nullability_source));
            self.model.try_property_mut(property)?.nullability_source = stamp;
            return Ok(Some(property));
        }
        if !source.can_update(existing.nullability_source) {
            return rejected("is_required", format!("{} nullability is pinned", existing.name));
        }

        if !required {
            let entity_name = self.model.entity_name(existing.declaring_entity).to_string();
            if self.model.is_key_property(property) {
                if source == ConfigurationSource::Explicit {
                    return Err(ModelError::OptionalKeyProperty {
                        entity: entity_name,
                        property: existing.name.clone(),
                    });
                }
                return rejected("is_required", format!("{} is a key property", existing.name));
            }
            let member = self.host_member(existing.declaring_entity, &existing.name);
            if !existing.shadow
                && matches!(member, Some(HostMember::Scalar { nullable: false, .. }))
            {
                return rejected("is_required", format!("host member {} is not nullable", existing.name));
            }
        }

        let updated = self.model.try_property_mut(property)?;
        updated.nullable = !required;
        updated.nullability_source = Some(source);
        Ok(Some(property))
    }

    /// Exclude a member name from the entity type, removing any property or
    /// navigation of that name on it or its derived types.
    pub fn ignore(
        &mut self,
        entity: EntityTypeId,
        name: &str,
        source: ConfigurationSource,
    ) -> BuildResult<()> {
        self.atomically(|b| b.ignore_core(entity, name, source))
    }

    fn ignore_core(
        &mut self,
        entity: EntityTypeId,
        name: &str,
        source: ConfigurationSource,
    ) -> BuildResult<()> {
        let owner = self.model.try_entity_mut(entity)?;
        let mark = source.max_opt(owner.ignored_members.get(name).copied());
        owner.ignored_members.insert(name.to_string(), mark);

        if let Some(property) = self.model.find_property(entity, name) {
            if self.model.try_property(property)?.declaring_entity != entity {
                return rejected("ignore", format!("{name} is inherited"));
            }
            if self.remove_property_core(property, source)?.is_none() {
                return Ok(None);
            }
        }
        for property in self.model.find_derived_properties(entity, name) {
            if self.remove_property_core(property, source)?.is_none() {
                return Ok(None);
            }
        }

        if let Some(navigation) = self.model.find_navigation(entity, name) {
            let fk = self.model.try_foreign_key(navigation.foreign_key)?;
            let declaring = if navigation.points_to_principal {
                fk.declaring_entity
            } else {
                fk.principal_entity
            };
            if declaring != entity {
                return rejected("ignore", format!("navigation {name} is inherited"));
            }
            if self.remove_navigation_core(navigation, source)?.is_none() {
                return Ok(None);
            }
        }
        for navigation in self.model.find_derived_navigations(entity, name) {
            if self.remove_navigation_core(navigation, source)?.is_none() {
                return Ok(None);
            }
        }

        debug!(entity = %self.model.entity_name(entity), member = name, %source, "Member ignored");
        Ok(Some(()))
    }

    /// Remove a property together with the keys, foreign keys and indexes
    /// that use it.
    pub fn remove_property(
        &mut self,
        property: PropertyId,
        source: ConfigurationSource,
    ) -> BuildResult<()> {
        self.atomically(|b| b.remove_property_core(property, source))
    }

    pub(crate) fn remove_property_core(
        &mut self,
        property: PropertyId,
        source: ConfigurationSource,
    ) -> BuildResult<()> {
        let existing = self.model.try_property(property)?;
        if !source.outranks(existing.source) {
            return rejected("remove_property", format!("{} is {}", existing.name, existing.source));
        }

        let foreign_keys = self.model.foreign_keys_containing(property);
        let keys = self.model.keys_containing(property);
        let indexes = self.model.indexes_containing(property);

        for fk in &foreign_keys {
            let fk_source = self.model.try_foreign_key(*fk)?.source;
            if !source.outranks(fk_source) {
                return rejected("remove_property", format!("used by a foreign key at {fk_source}"));
            }
        }
        for key in &keys {
            let key = self.model.try_key(*key)?;
            if !source.outranks(key.source) {
                return rejected("remove_property", format!("used by a key at {}", key.source));
            }
            for fk in &key.referencing_foreign_keys {
                let fk_source = self.model.try_foreign_key(*fk)?.source;
                if !source.outranks(fk_source) {
                    return rejected("remove_property", format!("key referenced at {fk_source}"));
                }
            }
        }
        for index in &indexes {
            let index_source = self.model.try_index(*index)?.source;
            if !source.outranks(index_source) {
                return rejected("remove_property", format!("used by an index at {index_source}"));
            }
        }

        for fk in foreign_keys {
            if self.model.foreign_key(fk).is_some() {
                self.remove_foreign_key_unchecked(fk)?;
            }
        }
        for key in keys {
            let Some(referencing) = self
                .model
                .key(key)
                .map(|k| k.referencing_foreign_keys.iter().copied().collect::<Vec<_>>())
            else {
                continue;
            };
            for fk in referencing {
                if self.model.foreign_key(fk).is_some() {
                    self.remove_foreign_key_unchecked(fk)?;
                }
            }
            if self.model.key(key).is_some() {
                self.remove_key_unchecked(key)?;
            }
        }
        let mut index_properties = Vec::new();
        for index in indexes {
            if let Some(removed) = self.model.unlink_index(index) {
                index_properties.extend(removed.properties);
            }
        }

        if let Some(removed) = self.model.unlink_property(property) {
            debug!(
                entity = %self.model.entity_name(removed.declaring_entity),
                property = %removed.name,
                "Property removed"
            );
        }
        self.remove_unused_shadow_properties(&index_properties);
        Ok(Some(()))
    }

    /// Delete convention-created shadow properties that no key, index or
    /// foreign key uses any more.
    pub(crate) fn remove_unused_shadow_properties(&mut self, properties: &[PropertyId]) {
        for property in properties {
            let removable = self.model.property(*property).is_some_and(|p| {
                p.shadow && p.source == ConfigurationSource::Convention
            }) && !self.model.is_property_in_use(*property);
            if removable {
                if let Some(removed) = self.model.unlink_property(*property) {
                    debug!(property = %removed.name, "Pruned unused shadow property");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::HostType;
    use ConfigurationSource::*;

    fn blog_builder() -> (ModelBuilder, EntityTypeId) {
        let mut builder = ModelBuilder::new();
        builder.register_host_type(
            HostType::new("Blog")
                .with_scalar("Id", ScalarType::Int32)
                .with_scalar("Url", ScalarType::String)
                .with_collection("Posts", "Post"),
        );
        let blog = builder.entity("Blog", Explicit).unwrap().unwrap();
        (builder, blog)
    }

    #[test]
    fn test_host_backed_property() {
        let (mut builder, blog) = blog_builder();
        let url = builder.property(blog, "Url", None, None, Convention).unwrap().unwrap();

        let property = builder.model().property(url).unwrap();
        assert!(!property.is_shadow());
        assert_eq!(property.value_type(), Some(ScalarType::String));
        assert!(property.is_nullable());

        let again = builder
            .property(blog, "Url", Some(ScalarType::String), None, Explicit)
            .unwrap()
            .unwrap();
        assert_eq!(url, again);
        assert_eq!(builder.model().property(url).unwrap().configuration_source(), Explicit);
    }

    #[test]
    fn test_host_type_mismatch_is_invalid() {
        let (mut builder, blog) = blog_builder();
        let result = builder.property(blog, "Url", Some(ScalarType::Int32), None, Explicit);
        assert!(matches!(result, Err(ModelError::PropertyTypeMismatch { .. })));
    }

    #[test]
    fn test_navigation_member_is_invalid() {
        let (mut builder, blog) = blog_builder();
        let result = builder.property(blog, "Posts", None, None, Explicit);
        assert!(matches!(result, Err(ModelError::NavigationMemberAsProperty { .. })));

        let result = builder.property(blog, "Rating", None, Some(false), Explicit);
        assert!(matches!(result, Err(ModelError::MissingHostMember { .. })));
    }

    #[test]
    fn test_shadow_type_pinned_by_precedence() {
        let (mut builder, blog) = blog_builder();
        let rating = builder
            .property(blog, "Rating", Some(ScalarType::Int32), None, DataAnnotation)
            .unwrap()
            .unwrap();
        assert!(builder.model().property(rating).unwrap().is_shadow());

        assert!(builder
            .property(blog, "Rating", Some(ScalarType::Int64), None, Convention)
            .unwrap()
            .is_none());
        assert!(builder
            .property(blog, "Rating", Some(ScalarType::Int64), None, DataAnnotation)
            .unwrap()
            .is_none());
        builder
            .property(blog, "Rating", Some(ScalarType::Int64), None, Explicit)
            .unwrap()
            .unwrap();
        assert_eq!(
            builder.model().property(rating).unwrap().value_type(),
            Some(ScalarType::Int64)
        );
    }

    #[test]
    fn test_ignored_member_blocks_non_explicit_property() {
        let (mut builder, blog) = blog_builder();
        builder.ignore(blog, "Url", DataAnnotation).unwrap().unwrap();

        assert!(builder.property(blog, "Url", None, None, DataAnnotation).unwrap().is_none());
        builder.property(blog, "Url", None, None, Explicit).unwrap().unwrap();
        assert!(builder
            .model()
            .entity_type(blog)
            .unwrap()
            .ignored_member_source("Url")
            .is_none());
    }

    #[test]
    fn test_ignore_rolls_back_when_property_is_stronger() {
        let (mut builder, blog) = blog_builder();
        builder.property(blog, "Url", None, None, Explicit).unwrap().unwrap();

        assert!(builder.ignore(blog, "Url", DataAnnotation).unwrap().is_none());
        assert!(builder.model().find_property(blog, "Url").is_some());
        assert!(builder
            .model()
            .entity_type(blog)
            .unwrap()
            .ignored_member_source("Url")
            .is_none());
    }

    #[test]
    fn test_property_pulled_up_from_derived_type() {
        let mut builder = ModelBuilder::new();
        let order = builder.entity("Order", Explicit).unwrap().unwrap();
        let special = builder.entity("SpecialOrder", Explicit).unwrap().unwrap();
        builder.has_base_type(special, Some(order), Explicit).unwrap().unwrap();

        let code = builder
            .property(special, "Code", Some(ScalarType::String), None, Explicit)
            .unwrap()
            .unwrap();
        builder.has_index(special, &["Code"], Explicit).unwrap().unwrap();

        let pulled = builder
            .property(order, "Code", None, None, Convention)
            .unwrap()
            .unwrap();
        assert!(builder.model().property(code).is_none());
        assert_eq!(builder.model().find_property(special, "Code"), Some(pulled));

        let pulled_up = builder.model().property(pulled).unwrap();
        assert_eq!(pulled_up.declaring_entity(), order);
        assert_eq!(pulled_up.value_type(), Some(ScalarType::String));
        assert_eq!(pulled_up.configuration_source(), Explicit);

        let index = builder.model().find_index(special, &[pulled]).unwrap();
        assert_eq!(builder.model().index(index).unwrap().declaring_entity(), special);
    }

    #[test]
    fn test_is_required_respects_keys() {
        let (mut builder, blog) = blog_builder();
        let key = builder.primary_key(blog, &["Url"], Explicit).unwrap().unwrap();
        let url = builder.model().key(key).unwrap().properties()[0];
        assert!(!builder.model().property(url).unwrap().is_nullable());

        assert!(matches!(
            builder.is_required(url, false, Explicit),
            Err(ModelError::OptionalKeyProperty { .. })
        ));
        assert!(builder.is_required(url, false, Convention).unwrap().is_none());
    }

    #[test]
    fn test_remove_property_cascades_to_weaker_structure() {
        let (mut builder, blog) = blog_builder();
        builder.has_index(blog, &["Url"], Convention).unwrap().unwrap();
        let url = builder.model().find_property(blog, "Url").unwrap();

        assert!(builder.remove_property(url, Convention).unwrap().is_none());
        builder.remove_property(url, Explicit).unwrap().unwrap();
        assert!(builder.model().find_property(blog, "Url").is_none());
        assert!(builder.model().indexes(blog).is_empty());
    }

    #[test]
    fn test_remove_property_prunes_shadow_columns_of_dropped_index() {
        let (mut builder, blog) = blog_builder();
        builder.has_index(blog, &["Url", "Extra"], Convention).unwrap().unwrap();
        let url = builder.model().find_property(blog, "Url").unwrap();
        assert!(builder.model().find_property(blog, "Extra").is_some());

        builder.remove_property(url, Explicit).unwrap().unwrap();
        assert!(builder.model().indexes(blog).is_empty());
        assert!(builder.model().find_property(blog, "Extra").is_none());
    }
}
