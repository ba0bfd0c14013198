//! Index operations.

use super::snapshot::DetachedElement;
use super::{rejected, ModelBuilder};
use crate::convention::ModelEvent;
use crate::error::{BuildResult, ModelError};
use crate::metadata::{EntityTypeId, Index, IndexId, PropertyId};
use crate::source::ConfigurationSource;
use tracing::debug;

impl ModelBuilder {
    /// Get or create an index over the named properties, creating missing
    /// properties.
    pub fn has_index(
        &mut self,
        entity: EntityTypeId,
        properties: &[&str],
        source: ConfigurationSource,
    ) -> BuildResult<IndexId> {
        self.atomically(|b| {
            let Some(properties) = b.resolve_properties(entity, properties, source)? else {
                return Ok(None);
            };
            b.has_index_core(entity, &properties, source)
        })
    }

    pub(crate) fn has_index_core(
        &mut self,
        entity: EntityTypeId,
        properties: &[PropertyId],
        source: ConfigurationSource,
    ) -> BuildResult<IndexId> {
        let entity_name = self.model.try_entity(entity)?.name.clone();
        if properties.is_empty() {
            return Err(ModelError::EmptyPropertyList {
                element: "index",
                entity: entity_name,
            });
        }
        let ancestry = self.model.ancestry(entity);
        for property in properties {
            let found = self.model.try_property(*property)?;
            if !ancestry.contains(&found.declaring_entity) {
                return Err(ModelError::ForeignProperty {
                    element: "index",
                    entity: entity_name,
                    property: found.name.clone(),
                });
            }
        }

        if let Some(existing) = self.model.find_index(entity, properties) {
            let index = self
                .model
                .indexes
                .get_mut(existing)
                .ok_or(ModelError::StaleHandle { kind: "index" })?;
            index.source = index.source.max(source);
            return Ok(Some(existing));
        }

        // The same index declared on derived types moves up here.
        let duplicates: Vec<IndexId> = self
            .model
            .all_derived(entity)
            .into_iter()
            .filter_map(|id| self.model.entity_type(id))
            .flat_map(|e| e.indexes.iter().copied())
            .filter(|ix| {
                self.model
                    .index(*ix)
                    .is_some_and(|ix| ix.properties == properties)
            })
            .collect();
        let mut detached = Vec::with_capacity(duplicates.len());
        for index in duplicates {
            detached.push(DetachedElement::Index(self.detach_index(index)?));
        }

        let index = self.model.link_index(Index {
            declaring_entity: entity,
            properties: properties.to_vec(),
            unique: false,
            unique_source: None,
            source,
        });
        debug!(
            entity = %entity_name,
            properties = ?self.model.property_names(properties),
            %source,
            "Index added"
        );
        self.notify(ModelEvent::IndexAdded { index });

        if self.reattach(detached)?.is_none() {
            return Ok(None);
        }
        Ok(Some(index))
    }

    /// Remove an index and prune shadow properties it kept alive.
    pub fn remove_index(&mut self, index: IndexId, source: ConfigurationSource) -> BuildResult<()> {
        self.atomically(|b| {
            let existing = b.model.try_index(index)?;
            if !source.outranks(existing.source) {
                return rejected("remove_index", format!("index is {}", existing.source));
            }
            if let Some(removed) = b.model.unlink_index(index) {
                debug!(entity = %b.model.entity_name(removed.declaring_entity), "Index removed");
                b.remove_unused_shadow_properties(&removed.properties);
            }
            Ok(Some(()))
        })
    }

    /// Set whether an index is unique.
    pub fn index_unique(
        &mut self,
        index: IndexId,
        unique: bool,
        source: ConfigurationSource,
    ) -> BuildResult<IndexId> {
        self.atomically(|b| b.index_unique_core(index, unique, source))
    }

    pub(crate) fn index_unique_core(
        &mut self,
        index: IndexId,
        unique: bool,
        source: ConfigurationSource,
    ) -> BuildResult<IndexId> {
        let existing = self
            .model
            .indexes
            .get_mut(index)
            .ok_or(ModelError::StaleHandle { kind: "index" })?;
        if existing.unique == unique {
            existing.unique_source = Some(source.max_opt(existing.unique_source));
            return Ok(Some(index));
        }
        if !source.can_update(existing.unique_source) {
            return rejected("index_unique", format!("uniqueness is {:?}", existing.unique_source));
        }
        existing.unique = unique;
        existing.unique_source = Some(source);
        Ok(Some(index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::ScalarType;
    use ConfigurationSource::*;

    #[test]
    fn test_has_index_reuses_inherited_index() {
        let mut builder = ModelBuilder::new();
        let order = builder.entity("Order", Explicit).unwrap().unwrap();
        let special = builder.entity("SpecialOrder", Explicit).unwrap().unwrap();
        builder.has_base_type(special, Some(order), Explicit).unwrap().unwrap();

        let index = builder.has_index(order, &["Number"], Convention).unwrap().unwrap();
        let again = builder.has_index(special, &["Number"], Explicit).unwrap().unwrap();

        assert_eq!(index, again);
        assert_eq!(builder.model().index(index).unwrap().configuration_source(), Explicit);
    }

    #[test]
    fn test_index_pulled_up_from_derived_type() {
        let mut builder = ModelBuilder::new();
        let order = builder.entity("Order", Explicit).unwrap().unwrap();
        let special = builder.entity("SpecialOrder", Explicit).unwrap().unwrap();
        builder.has_base_type(special, Some(order), Explicit).unwrap().unwrap();
        builder
            .property(order, "Number", Some(ScalarType::Int64), None, Explicit)
            .unwrap()
            .unwrap();

        let derived = builder.has_index(special, &["Number"], Explicit).unwrap().unwrap();
        builder.index_unique(derived, true, Explicit).unwrap().unwrap();

        let base = builder.has_index(order, &["Number"], Convention).unwrap().unwrap();
        assert!(builder.model().index(derived).is_none());
        let pulled = builder.model().index(base).unwrap();
        assert_eq!(pulled.declaring_entity(), order);
        assert!(pulled.is_unique());
        assert_eq!(pulled.configuration_source(), Explicit);
    }

    #[test]
    fn test_index_uniqueness_precedence() {
        let mut builder = ModelBuilder::new();
        let blog = builder.entity("Blog", Explicit).unwrap().unwrap();
        let index = builder.has_index(blog, &["Url"], Convention).unwrap().unwrap();

        builder.index_unique(index, true, DataAnnotation).unwrap().unwrap();
        assert!(builder.index_unique(index, false, Convention).unwrap().is_none());
        builder.index_unique(index, false, Explicit).unwrap().unwrap();
        assert!(!builder.model().index(index).unwrap().is_unique());
    }

    #[test]
    fn test_remove_index_prunes_convention_shadow_properties() {
        let mut builder = ModelBuilder::new();
        let blog = builder.entity("Blog", Explicit).unwrap().unwrap();
        let index = builder.has_index(blog, &["Slug"], Convention).unwrap().unwrap();
        assert!(builder.model().find_property(blog, "Slug").is_some());

        builder.remove_index(index, Explicit).unwrap().unwrap();
        assert!(builder.model().find_property(blog, "Slug").is_none());
    }
}
