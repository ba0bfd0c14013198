//! Convention notification contract.
//!
//! Conventions are external rules reacting to structural events. Each one
//! implements the handlers it cares about; the builder calls them in
//! registration order through an explicit loop. Handlers receive the builder
//! and may mutate the model; events raised by those mutations are queued
//! behind the event being dispatched.

use crate::builder::ModelBuilder;
use crate::error::ModelError;
use crate::metadata::{EntityTypeId, ForeignKeyId, IndexId, KeyId, Model, PropertyId};
use tracing::trace;

/// A committed structural change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelEvent {
    /// An entity type was created.
    EntityTypeAdded {
        /// New entity type.
        entity_type: EntityTypeId,
    },
    /// An entity type was removed.
    EntityTypeRemoved {
        /// Name of the removed entity type.
        name: String,
    },
    /// A property was created.
    PropertyAdded {
        /// New property.
        property: PropertyId,
    },
    /// A key was created.
    KeyAdded {
        /// New key.
        key: KeyId,
    },
    /// A key was removed.
    KeyRemoved {
        /// Entity type that declared the key.
        entity_type: EntityTypeId,
        /// Names of the key properties.
        properties: Vec<String>,
    },
    /// The primary key of an entity type changed.
    PrimaryKeySet {
        /// Entity type whose primary key changed.
        entity_type: EntityTypeId,
        /// Previous primary key, which may no longer exist.
        previous: Option<KeyId>,
    },
    /// A foreign key was created.
    ForeignKeyAdded {
        /// New foreign key.
        foreign_key: ForeignKeyId,
    },
    /// A foreign key was removed.
    ForeignKeyRemoved {
        /// Dependent entity type.
        entity_type: EntityTypeId,
        /// Principal entity type.
        principal: EntityTypeId,
        /// Names of the dependent properties.
        properties: Vec<String>,
    },
    /// A navigation was bound.
    NavigationAdded {
        /// Foreign key backing the navigation.
        foreign_key: ForeignKeyId,
        /// Navigation name.
        name: String,
        /// True for dependent-to-principal navigations.
        points_to_principal: bool,
    },
    /// A navigation was removed.
    NavigationRemoved {
        /// Entity type that declared the navigation.
        entity_type: EntityTypeId,
        /// Entity type the navigation pointed to.
        target: EntityTypeId,
        /// Navigation name.
        name: String,
        /// True for dependent-to-principal navigations.
        points_to_principal: bool,
    },
    /// An index was created.
    IndexAdded {
        /// New index.
        index: IndexId,
    },
    /// The base type of an entity type changed.
    BaseTypeSet {
        /// Entity type that was re-parented.
        entity_type: EntityTypeId,
        /// Previous base type.
        previous: Option<EntityTypeId>,
    },
}

impl ModelEvent {
    /// Short event name for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            ModelEvent::EntityTypeAdded { .. } => "entity_type_added",
            ModelEvent::EntityTypeRemoved { .. } => "entity_type_removed",
            ModelEvent::PropertyAdded { .. } => "property_added",
            ModelEvent::KeyAdded { .. } => "key_added",
            ModelEvent::KeyRemoved { .. } => "key_removed",
            ModelEvent::PrimaryKeySet { .. } => "primary_key_set",
            ModelEvent::ForeignKeyAdded { .. } => "foreign_key_added",
            ModelEvent::ForeignKeyRemoved { .. } => "foreign_key_removed",
            ModelEvent::NavigationAdded { .. } => "navigation_added",
            ModelEvent::NavigationRemoved { .. } => "navigation_removed",
            ModelEvent::IndexAdded { .. } => "index_added",
            ModelEvent::BaseTypeSet { .. } => "base_type_set",
        }
    }

    /// Whether the elements named by the event still exist.
    pub(crate) fn is_live(&self, model: &Model) -> bool {
        match self {
            ModelEvent::EntityTypeAdded { entity_type }
            | ModelEvent::KeyRemoved { entity_type, .. }
            | ModelEvent::PrimaryKeySet { entity_type, .. }
            | ModelEvent::ForeignKeyRemoved { entity_type, .. }
            | ModelEvent::NavigationRemoved { entity_type, .. }
            | ModelEvent::BaseTypeSet { entity_type, .. } => {
                model.entity_type(*entity_type).is_some()
            }
            ModelEvent::EntityTypeRemoved { .. } => true,
            ModelEvent::PropertyAdded { property } => model.property(*property).is_some(),
            ModelEvent::KeyAdded { key } => model.key(*key).is_some(),
            ModelEvent::ForeignKeyAdded { foreign_key } => {
                model.foreign_key(*foreign_key).is_some()
            }
            ModelEvent::NavigationAdded {
                foreign_key,
                name,
                points_to_principal,
            } => model.foreign_key(*foreign_key).is_some_and(|fk| {
                let navigation = if *points_to_principal {
                    fk.navigation_to_principal()
                } else {
                    fk.navigation_to_dependent()
                };
                navigation.is_some_and(|n| n.name() == name)
            }),
            ModelEvent::IndexAdded { index } => model.index(*index).is_some(),
        }
    }
}

/// A rule reacting to structural events.
///
/// Every handler defaults to doing nothing.
#[allow(unused_variables)]
pub trait Convention {
    /// Name used in logs and errors.
    fn name(&self) -> &str;

    /// An entity type was created.
    fn entity_type_added(
        &mut self,
        builder: &mut ModelBuilder,
        entity_type: EntityTypeId,
    ) -> Result<(), ModelError> {
        Ok(())
    }

    /// An entity type was removed.
    fn entity_type_removed(
        &mut self,
        builder: &mut ModelBuilder,
        name: &str,
    ) -> Result<(), ModelError> {
        Ok(())
    }

    /// A property was created.
    fn property_added(
        &mut self,
        builder: &mut ModelBuilder,
        property: PropertyId,
    ) -> Result<(), ModelError> {
        Ok(())
    }

    /// A key was created.
    fn key_added(&mut self, builder: &mut ModelBuilder, key: KeyId) -> Result<(), ModelError> {
        Ok(())
    }

    /// A key was removed.
    fn key_removed(
        &mut self,
        builder: &mut ModelBuilder,
        entity_type: EntityTypeId,
        properties: &[String],
    ) -> Result<(), ModelError> {
        Ok(())
    }

    /// The primary key changed.
    fn primary_key_set(
        &mut self,
        builder: &mut ModelBuilder,
        entity_type: EntityTypeId,
        previous: Option<KeyId>,
    ) -> Result<(), ModelError> {
        Ok(())
    }

    /// A foreign key was created.
    fn foreign_key_added(
        &mut self,
        builder: &mut ModelBuilder,
        foreign_key: ForeignKeyId,
    ) -> Result<(), ModelError> {
        Ok(())
    }

    /// A foreign key was removed.
    fn foreign_key_removed(
        &mut self,
        builder: &mut ModelBuilder,
        entity_type: EntityTypeId,
        principal: EntityTypeId,
        properties: &[String],
    ) -> Result<(), ModelError> {
        Ok(())
    }

    /// A navigation was bound.
    fn navigation_added(
        &mut self,
        builder: &mut ModelBuilder,
        foreign_key: ForeignKeyId,
        name: &str,
        points_to_principal: bool,
    ) -> Result<(), ModelError> {
        Ok(())
    }

    /// A navigation was removed.
    fn navigation_removed(
        &mut self,
        builder: &mut ModelBuilder,
        entity_type: EntityTypeId,
        target: EntityTypeId,
        name: &str,
        points_to_principal: bool,
    ) -> Result<(), ModelError> {
        Ok(())
    }

    /// An index was created.
    fn index_added(&mut self, builder: &mut ModelBuilder, index: IndexId) -> Result<(), ModelError> {
        Ok(())
    }

    /// The base type changed.
    fn base_type_set(
        &mut self,
        builder: &mut ModelBuilder,
        entity_type: EntityTypeId,
        previous: Option<EntityTypeId>,
    ) -> Result<(), ModelError> {
        Ok(())
    }
}

/// Ordered list of conventions.
#[derive(Default)]
pub struct ConventionSet {
    conventions: Vec<Box<dyn Convention>>,
}

impl std::fmt::Debug for ConventionSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.conventions.iter().map(|c| c.name().to_string()))
            .finish()
    }
}

impl ConventionSet {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a convention; it runs after those already registered.
    pub fn with(mut self, convention: impl Convention + 'static) -> Self {
        self.push(convention);
        self
    }

    /// Append a convention.
    pub fn push(&mut self, convention: impl Convention + 'static) {
        self.conventions.push(Box::new(convention));
    }

    /// Number of registered conventions.
    pub fn len(&self) -> usize {
        self.conventions.len()
    }

    /// Whether no conventions are registered.
    pub fn is_empty(&self) -> bool {
        self.conventions.is_empty()
    }

    /// Call every convention's handler for the event, in order.
    pub(crate) fn dispatch(
        &mut self,
        builder: &mut ModelBuilder,
        event: &ModelEvent,
    ) -> Result<(), ModelError> {
        for convention in self.conventions.iter_mut() {
            // An earlier convention may have removed the element.
            if !event.is_live(builder.model()) {
                trace!(event = event.kind(), "Skipping event for removed element");
                break;
            }
            let convention = convention.as_mut();
            match event {
                ModelEvent::EntityTypeAdded { entity_type } => {
                    convention.entity_type_added(builder, *entity_type)?
                }
                ModelEvent::EntityTypeRemoved { name } => {
                    convention.entity_type_removed(builder, name)?
                }
                ModelEvent::PropertyAdded { property } => {
                    convention.property_added(builder, *property)?
                }
                ModelEvent::KeyAdded { key } => convention.key_added(builder, *key)?,
                ModelEvent::KeyRemoved {
                    entity_type,
                    properties,
                } => convention.key_removed(builder, *entity_type, properties)?,
                ModelEvent::PrimaryKeySet {
                    entity_type,
                    previous,
                } => convention.primary_key_set(builder, *entity_type, *previous)?,
                ModelEvent::ForeignKeyAdded { foreign_key } => {
                    convention.foreign_key_added(builder, *foreign_key)?
                }
                ModelEvent::ForeignKeyRemoved {
                    entity_type,
                    principal,
                    properties,
                } => convention.foreign_key_removed(builder, *entity_type, *principal, properties)?,
                ModelEvent::NavigationAdded {
                    foreign_key,
                    name,
                    points_to_principal,
                } => {
                    convention.navigation_added(builder, *foreign_key, name, *points_to_principal)?
                }
                ModelEvent::NavigationRemoved {
                    entity_type,
                    target,
                    name,
                    points_to_principal,
                } => convention.navigation_removed(
                    builder,
                    *entity_type,
                    *target,
                    name,
                    *points_to_principal,
                )?,
                ModelEvent::IndexAdded { index } => convention.index_added(builder, *index)?,
                ModelEvent::BaseTypeSet {
                    entity_type,
                    previous,
                } => convention.base_type_set(builder, *entity_type, *previous)?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::ConfigurationSource::{DataAnnotation, Explicit};

    struct Named(&'static str);

    impl Convention for Named {
        fn name(&self) -> &str {
            self.0
        }
    }

    #[test]
    fn test_convention_set_keeps_registration_order() {
        let set = ConventionSet::new().with(Named("keys")).with(Named("indexes"));
        assert_eq!(set.len(), 2);
        assert!(!set.is_empty());
        assert_eq!(format!("{set:?}"), r#"["keys", "indexes"]"#);
    }

    #[test]
    fn test_events_for_removed_elements_are_not_live() {
        let mut builder = ModelBuilder::new();
        let blog = builder.entity("Blog", DataAnnotation).unwrap().unwrap();
        let id = builder
            .property(blog, "Id", None, Some(true), Explicit)
            .unwrap()
            .unwrap();

        let added = ModelEvent::PropertyAdded { property: id };
        let created = ModelEvent::EntityTypeAdded { entity_type: blog };
        assert!(added.is_live(builder.model()));
        assert!(created.is_live(builder.model()));

        builder.remove_entity(blog, Explicit).unwrap().unwrap();
        assert!(!added.is_live(builder.model()));
        assert!(!created.is_live(builder.model()));

        let removed = ModelEvent::EntityTypeRemoved {
            name: "Blog".to_string(),
        };
        assert!(removed.is_live(builder.model()));
        assert_eq!(removed.kind(), "entity_type_removed");
    }
}
