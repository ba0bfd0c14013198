//! The model builder: the mutation surface of the entity-type graph.
//!
//! Every public operation runs atomically. It either commits completely and
//! then dispatches the events it raised to the registered conventions, or it
//! leaves the model exactly as it was and discards its queued events.
//!
//! Operations return [`BuildResult`]: `Ok(None)` is a rejection caused by
//! configuration-source precedence or an incompatible shape, and is expected
//! during normal operation; `Err` is an invalid configuration.

mod base_type;
mod index;
mod key;
mod property;
mod relationship;
mod snapshot;

pub use relationship::RelationshipShape;
pub use snapshot::{
    DetachedElement, DetachedIndex, DetachedProperties, DetachedRelationship, PropertySnapshot,
};

use crate::config::ModelOptions;
use crate::convention::{ConventionSet, ModelEvent};
use crate::error::{BuildResult, ModelError, ValidationError};
use crate::frozen::FrozenModel;
use crate::metadata::{EntityType, EntityTypeId, HostType, Model};
use crate::source::ConfigurationSource;
use crate::validation::{ModelValidator, ValidationReport};
use std::collections::VecDeque;
use tracing::{debug, trace};

/// Log a rejected mutation and return the rejection.
pub(crate) fn rejected<T>(operation: &'static str, reason: impl std::fmt::Display) -> BuildResult<T> {
    debug!(operation, reason = %reason, "Mutation rejected");
    Ok(None)
}

/// Incrementally builds a [`Model`] from explicit configuration, annotations
/// and conventions.
#[derive(Debug)]
pub struct ModelBuilder {
    model: Model,
    conventions: ConventionSet,
    options: ModelOptions,
    pending: VecDeque<ModelEvent>,
    batch_depth: usize,
    dispatching: bool,
}

impl Default for ModelBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ModelBuilder {
    /// Create a builder without conventions.
    pub fn new() -> Self {
        Self::with_conventions(ConventionSet::new())
    }

    /// Create a builder that notifies the given conventions.
    pub fn with_conventions(conventions: ConventionSet) -> Self {
        Self {
            model: Model::new(),
            conventions,
            options: ModelOptions::default(),
            pending: VecDeque::new(),
            batch_depth: 0,
            dispatching: false,
        }
    }

    /// Set the validation options.
    pub fn with_options(mut self, options: ModelOptions) -> Self {
        self.options = options;
        self
    }

    /// The model under construction.
    pub fn model(&self) -> &Model {
        &self.model
    }

    /// Validation options.
    pub fn options(&self) -> &ModelOptions {
        &self.options
    }

    /// Describe a host type. A shadow entity type with the same name is bound
    /// to it.
    pub fn register_host_type(&mut self, host_type: HostType) {
        let name = host_type.name.clone();
        self.model.host_types.register(host_type);
        if let Some(entity) = self
            .model
            .find_entity_type(&name)
            .and_then(|id| self.model.entity_types.get_mut(id))
        {
            if entity.host_type.is_none() {
                entity.host_type = Some(name);
            }
        }
    }

    // ---- transaction and dispatch machinery ----

    /// Queue an event for dispatch after the outermost operation commits.
    pub(crate) fn notify(&mut self, event: ModelEvent) {
        trace!(event = event.kind(), "Event queued");
        self.pending.push_back(event);
    }

    /// Run `operation` so that a rejection or error restores the model and
    /// drops the events it queued.
    pub(crate) fn atomically<T>(
        &mut self,
        operation: impl FnOnce(&mut Self) -> BuildResult<T>,
    ) -> BuildResult<T> {
        let saved = self.model.clone();
        let queued = self.pending.len();
        self.batch_depth += 1;
        let result = operation(self);
        self.batch_depth -= 1;

        match result {
            Ok(Some(value)) => {
                self.flush()?;
                Ok(Some(value))
            }
            other => {
                self.model = saved;
                self.pending.truncate(queued);
                other
            }
        }
    }

    /// Dispatch queued events unless an operation or a dispatch loop is
    /// already in progress; the outer one will pick them up.
    fn flush(&mut self) -> Result<(), ModelError> {
        if self.batch_depth > 0 || self.dispatching {
            return Ok(());
        }
        self.dispatching = true;
        let result = self.drain_events();
        self.dispatching = false;
        if result.is_err() {
            self.pending.clear();
        }
        result
    }

    fn drain_events(&mut self) -> Result<(), ModelError> {
        while let Some(event) = self.pending.pop_front() {
            if !event.is_live(&self.model) {
                trace!(event = event.kind(), "Skipping event for removed element");
                continue;
            }
            let mut conventions = std::mem::take(&mut self.conventions);
            let result = conventions.dispatch(self, &event);
            self.conventions = conventions;
            result?;
        }
        Ok(())
    }

    // ---- entity types ----

    /// Get or create an entity type.
    pub fn entity(&mut self, name: &str, source: ConfigurationSource) -> BuildResult<EntityTypeId> {
        self.atomically(|b| b.entity_core(name, source))
    }

    pub(crate) fn entity_core(
        &mut self,
        name: &str,
        source: ConfigurationSource,
    ) -> BuildResult<EntityTypeId> {
        if let Some(id) = self.model.find_entity_type(name) {
            let entity = self.model.try_entity_mut(id)?;
            entity.source = entity.source.max(source);
            return Ok(Some(id));
        }

        if self.model.ignored_source(name).is_some() {
            if source != ConfigurationSource::Explicit {
                return rejected("entity", format!("{name} is ignored"));
            }
            self.model.ignored.remove(name);
        }

        let host_type = self.model.host_types.get(name).map(|h| h.name.clone());
        let id = self
            .model
            .link_entity(EntityType::new(name.to_string(), host_type, source));
        debug!(entity = name, %source, "Entity type added");
        self.notify(ModelEvent::EntityTypeAdded { entity_type: id });
        Ok(Some(id))
    }

    /// Remove an entity type. Fails while it has derived types or is the
    /// principal of any foreign key.
    pub fn remove_entity(
        &mut self,
        entity: EntityTypeId,
        source: ConfigurationSource,
    ) -> BuildResult<()> {
        self.atomically(|b| b.remove_entity_core(entity, source))
    }

    pub(crate) fn remove_entity_core(
        &mut self,
        entity: EntityTypeId,
        source: ConfigurationSource,
    ) -> BuildResult<()> {
        let target = self.model.try_entity(entity)?;
        if !source.outranks(target.source) {
            return rejected("remove_entity", format!("{} is {}", target.name, target.source));
        }
        if !target.derived_types.is_empty() {
            return Err(ModelError::EntityTypeInUse {
                entity: target.name.clone(),
                reason: "it has derived types".to_string(),
            });
        }
        if let Some(fk) = target.referencing_foreign_keys.iter().next() {
            let dependent = self
                .model
                .foreign_key(*fk)
                .map(|fk| self.model.entity_name(fk.declaring_entity).to_string())
                .unwrap_or_default();
            return Err(ModelError::EntityTypeInUse {
                entity: target.name.clone(),
                reason: format!("it is referenced by a foreign key on {dependent}"),
            });
        }

        let foreign_keys = target.foreign_keys.clone();
        let indexes = target.indexes.clone();
        let keys = target.keys.clone();
        let properties: Vec<_> = target.properties.values().copied().collect();

        for fk in foreign_keys {
            self.remove_foreign_key_unchecked(fk)?;
        }
        for index in indexes {
            self.model.unlink_index(index);
        }
        for key in keys {
            if self.model.key(key).is_some() {
                self.remove_key_unchecked(key)?;
            }
        }
        for property in properties {
            self.model.unlink_property(property);
        }

        if let Some(removed) = self.model.unlink_entity(entity) {
            debug!(entity = %removed.name, "Entity type removed");
            self.notify(ModelEvent::EntityTypeRemoved { name: removed.name });
        }
        Ok(Some(()))
    }

    /// Exclude an entity type name from the model, removing an existing
    /// entity type of that name when allowed at `source`.
    pub fn ignore_entity(&mut self, name: &str, source: ConfigurationSource) -> BuildResult<()> {
        self.atomically(|b| b.ignore_entity_core(name, source))
    }

    fn ignore_entity_core(&mut self, name: &str, source: ConfigurationSource) -> BuildResult<()> {
        let mark = source.max_opt(self.model.ignored_source(name));
        self.model.ignored.insert(name.to_string(), mark);

        let Some(entity) = self.model.find_entity_type(name) else {
            return Ok(Some(()));
        };
        let target = self.model.try_entity(entity)?;
        if !target.derived_types.is_empty() {
            return rejected("ignore_entity", format!("{name} has derived types"));
        }
        let referencing: Vec<_> = target.referencing_foreign_keys.iter().copied().collect();
        for fk in referencing {
            let fk_source = self.model.try_foreign_key(fk)?.source;
            if !source.outranks(fk_source) {
                return rejected("ignore_entity", format!("{name} is referenced at {fk_source}"));
            }
            self.remove_foreign_key_unchecked(fk)?;
        }
        self.remove_entity_core(entity, source)
    }

    // ---- validation ----

    /// Run the validator over the current model.
    pub fn validate(&self) -> Result<ValidationReport, ValidationError> {
        ModelValidator::new(&self.options).validate(&self.model)
    }

    /// Validate and freeze the model into its read-only form.
    pub fn finalize(self) -> Result<FrozenModel, ModelError> {
        let report = self.validate()?;
        Ok(FrozenModel::new(self.model, report))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::ScalarType;
    use ConfigurationSource::*;

    #[test]
    fn test_entity_is_idempotent_and_bumps_source() {
        let mut builder = ModelBuilder::new();
        let blog = builder.entity("Blog", Convention).unwrap().unwrap();
        let again = builder.entity("Blog", Explicit).unwrap().unwrap();

        assert_eq!(blog, again);
        assert_eq!(builder.model().entity_type_count(), 1);
        assert_eq!(
            builder.model().entity_type(blog).unwrap().configuration_source(),
            Explicit
        );
    }

    #[test]
    fn test_ignored_entity_blocks_non_explicit_creation() {
        let mut builder = ModelBuilder::new();
        builder.ignore_entity("Audit", DataAnnotation).unwrap().unwrap();

        assert!(builder.entity("Audit", Convention).unwrap().is_none());
        assert!(builder.entity("Audit", DataAnnotation).unwrap().is_none());
        assert!(builder.entity("Audit", Explicit).unwrap().is_some());
        assert!(builder.model().ignored_source("Audit").is_none());
    }

    #[test]
    fn test_ignore_entity_removes_weaker_entity() {
        let mut builder = ModelBuilder::new();
        builder.entity("Audit", Convention).unwrap().unwrap();
        builder.ignore_entity("Audit", DataAnnotation).unwrap().unwrap();
        assert!(builder.model().find_entity_type("Audit").is_none());

        builder.entity("Log", Explicit).unwrap().unwrap();
        assert!(builder.ignore_entity("Log", Convention).unwrap().is_none());
        assert!(builder.model().find_entity_type("Log").is_some());
        assert!(builder.model().ignored_source("Log").is_none());
    }

    #[test]
    fn test_register_host_type_binds_shadow_entity() {
        let mut builder = ModelBuilder::new();
        let blog = builder.entity("Blog", Explicit).unwrap().unwrap();
        assert!(builder.model().entity_type(blog).unwrap().is_shadow());

        builder.register_host_type(HostType::new("Blog").with_scalar("Id", ScalarType::Int32));
        assert_eq!(
            builder.model().entity_type(blog).unwrap().host_type(),
            Some("Blog")
        );
    }

    #[test]
    fn test_remove_entity_rejected_at_weaker_source() {
        let mut builder = ModelBuilder::new();
        let blog = builder.entity("Blog", DataAnnotation).unwrap().unwrap();
        builder
            .property(blog, "Url", Some(ScalarType::String), None, Explicit)
            .unwrap()
            .unwrap();

        assert!(builder.remove_entity(blog, DataAnnotation).unwrap().is_none());
        builder.remove_entity(blog, Explicit).unwrap().unwrap();
        assert_eq!(builder.model().entity_type_count(), 0);
        assert!(builder.model().properties.iter().next().is_none());
    }
}
