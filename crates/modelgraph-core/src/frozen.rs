//! Read-only model produced by finalization.

use crate::metadata::{DeleteBehavior, EntityType, KeyId, Model, ScalarType};
use crate::source::ConfigurationSource;
use crate::validation::ValidationReport;
use serde::Serialize;
use std::ops::Deref;
use std::sync::Arc;
use tracing::info;

/// A validated model that can no longer change.
///
/// Cloning is cheap and clones share the same model, so it can be handed to
/// other threads.
#[derive(Debug, Clone)]
pub struct FrozenModel {
    model: Arc<Model>,
    report: Arc<ValidationReport>,
}

impl FrozenModel {
    pub(crate) fn new(model: Model, report: ValidationReport) -> Self {
        info!(
            entity_types = model.entity_type_count(),
            warnings = report.warnings.len(),
            "Model finalized"
        );
        Self {
            model: Arc::new(model),
            report: Arc::new(report),
        }
    }

    /// The underlying model.
    pub fn model(&self) -> &Model {
        &self.model
    }

    /// Warnings found during finalization.
    pub fn report(&self) -> &ValidationReport {
        &self.report
    }

    /// Build a serializable listing of every element.
    pub fn describe(&self) -> ModelDescription {
        let model = self.model.as_ref();
        let mut entity_types: Vec<EntityTypeDescription> = model
            .entity_types()
            .map(|(_, entity)| describe_entity(model, entity))
            .collect();
        entity_types.sort_by(|a, b| a.name.cmp(&b.name));
        ModelDescription { entity_types }
    }

    /// Render the model description as pretty-printed JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&self.describe())
    }
}

impl Deref for FrozenModel {
    type Target = Model;

    fn deref(&self) -> &Model {
        &self.model
    }
}

/// Diagnostic listing of a model.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelDescription {
    /// Entity types sorted by name.
    pub entity_types: Vec<EntityTypeDescription>,
}

impl ModelDescription {
    /// Find an entity type by name.
    pub fn entity_type(&self, name: &str) -> Option<&EntityTypeDescription> {
        self.entity_types.iter().find(|e| e.name == name)
    }
}

/// Description of one entity type and the elements it declares.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityTypeDescription {
    pub name: String,
    pub host_type: Option<String>,
    pub base_type: Option<String>,
    pub source: ConfigurationSource,
    pub properties: Vec<PropertyDescription>,
    /// Property names of the primary key, on hierarchy roots.
    pub primary_key: Option<Vec<String>>,
    pub keys: Vec<Vec<String>>,
    pub foreign_keys: Vec<ForeignKeyDescription>,
    pub indexes: Vec<IndexDescription>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PropertyDescription {
    pub name: String,
    pub value_type: Option<ScalarType>,
    pub nullable: bool,
    pub shadow: bool,
    pub source: ConfigurationSource,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ForeignKeyDescription {
    pub properties: Vec<String>,
    pub principal: String,
    pub principal_key: Vec<String>,
    pub navigation_to_principal: Option<String>,
    pub navigation_to_dependent: Option<String>,
    pub unique: bool,
    pub required: bool,
    pub delete_behavior: DeleteBehavior,
    pub source: ConfigurationSource,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexDescription {
    pub properties: Vec<String>,
    pub unique: bool,
    pub source: ConfigurationSource,
}

fn describe_entity(model: &Model, entity: &EntityType) -> EntityTypeDescription {
    let key_names = |key: KeyId| {
        model
            .key(key)
            .map(|k| model.property_names(k.properties()))
            .unwrap_or_default()
    };

    EntityTypeDescription {
        name: entity.name().to_string(),
        host_type: entity.host_type().map(str::to_string),
        base_type: entity.base_type().map(|b| model.entity_name(b).to_string()),
        source: entity.configuration_source(),
        properties: entity
            .declared_properties()
            .filter_map(|p| model.property(p))
            .map(|p| PropertyDescription {
                name: p.name().to_string(),
                value_type: p.value_type(),
                nullable: p.is_nullable(),
                shadow: p.is_shadow(),
                source: p.configuration_source(),
            })
            .collect(),
        primary_key: entity.declared_primary_key().map(key_names),
        keys: entity.declared_keys().iter().map(|k| key_names(*k)).collect(),
        foreign_keys: entity
            .declared_foreign_keys()
            .iter()
            .filter_map(|fk| model.foreign_key(*fk))
            .map(|fk| ForeignKeyDescription {
                properties: model.property_names(fk.properties()),
                principal: model.entity_name(fk.principal_entity()).to_string(),
                principal_key: key_names(fk.principal_key()),
                navigation_to_principal: fk.navigation_to_principal().map(|n| n.name().to_string()),
                navigation_to_dependent: fk.navigation_to_dependent().map(|n| n.name().to_string()),
                unique: fk.is_unique(),
                required: fk.is_required(),
                delete_behavior: fk.delete_behavior(),
                source: fk.configuration_source(),
            })
            .collect(),
        indexes: entity
            .declared_indexes()
            .iter()
            .filter_map(|ix| model.index(*ix))
            .map(|ix| IndexDescription {
                properties: model.property_names(ix.properties()),
                unique: ix.is_unique(),
                source: ix.configuration_source(),
            })
            .collect(),
    }
}
