//! Model validation.
//!
//! The validator runs a fixed pipeline over a finished model:
//! - entity types must be bound to a host type
//! - hierarchy roots must have a primary key
//! - keys over shadow properties are reported as warnings
//! - model inheritance must follow host inheritance
//!
//! Fatal findings stop the pipeline. Warnings are logged and collected in
//! the report, or escalated when `warnings_as_errors` is set.

use crate::config::ModelOptions;
use crate::error::{ValidationError, ValidationWarning};
use crate::metadata::{EntityTypeId, Model};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, instrument, warn};

/// Non-fatal findings of a successful validation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    /// Warnings in the order they were found.
    pub warnings: Vec<ValidationWarning>,
}

impl ValidationReport {
    /// Warnings in the order they were found.
    pub fn warnings(&self) -> &[ValidationWarning] {
        &self.warnings
    }

    /// Whether validation found nothing to report.
    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty()
    }
}

/// Validates a model against the configured options.
pub struct ModelValidator<'a> {
    options: &'a ModelOptions,
}

impl<'a> ModelValidator<'a> {
    /// Create a validator.
    pub fn new(options: &'a ModelOptions) -> Self {
        Self { options }
    }

    /// Run the whole pipeline.
    #[instrument(level = "debug", skip_all, fields(entity_types = model.entity_type_count()))]
    pub fn validate(&self, model: &Model) -> Result<ValidationReport, ValidationError> {
        self.check_shadow_entities(model)?;
        self.check_primary_keys(model)?;

        let mut report = ValidationReport::default();
        if self.options.shadow_key_warnings {
            for warning in self.shadow_key_warnings(model) {
                warn!(%warning, "Model validation warning");
                if self.options.warnings_as_errors {
                    return Err(ValidationError::Escalated(warning));
                }
                report.warnings.push(warning);
            }
        }

        if self.options.validate_inheritance {
            self.check_inheritance(model)?;
        }
        debug!(warnings = report.warnings.len(), "Model validated");
        Ok(report)
    }

    fn check_shadow_entities(&self, model: &Model) -> Result<(), ValidationError> {
        match model.entity_types().find(|(_, e)| e.is_shadow()) {
            Some((_, entity)) => Err(ValidationError::ShadowEntityType {
                entity: entity.name().to_string(),
            }),
            None => Ok(()),
        }
    }

    fn check_primary_keys(&self, model: &Model) -> Result<(), ValidationError> {
        for (id, entity) in model.entity_types() {
            if entity.base_type().is_none() && model.primary_key(id).is_none() {
                return Err(ValidationError::MissingPrimaryKey {
                    entity: entity.name().to_string(),
                });
            }
        }
        Ok(())
    }

    fn shadow_key_warnings(&self, model: &Model) -> Vec<ValidationWarning> {
        let mut warnings = Vec::new();
        for (_, entity) in model.entity_types() {
            for key in entity.declared_keys() {
                let Some(key) = model.key(*key) else {
                    continue;
                };
                let shadow: Vec<String> = key
                    .properties()
                    .iter()
                    .filter_map(|p| model.property(*p))
                    .filter(|p| p.is_shadow())
                    .map(|p| p.name().to_string())
                    .collect();
                if !shadow.is_empty() {
                    warnings.push(ValidationWarning::ShadowKeyProperties {
                        entity: entity.name().to_string(),
                        properties: shadow,
                    });
                }
            }
        }
        warnings
    }

    fn check_inheritance(&self, model: &Model) -> Result<(), ValidationError> {
        let mapped: BTreeMap<&str, EntityTypeId> = model
            .entity_types()
            .filter_map(|(id, e)| e.host_type().map(|h| (h, id)))
            .collect();
        let mut validated = BTreeSet::new();
        for (id, _) in model.entity_types() {
            self.check_entity_inheritance(model, &mapped, id, &mut validated)?;
        }
        Ok(())
    }

    /// Check an entity type after its model base, skipping entity types
    /// already checked.
    fn check_entity_inheritance(
        &self,
        model: &Model,
        mapped: &BTreeMap<&str, EntityTypeId>,
        id: EntityTypeId,
        validated: &mut BTreeSet<EntityTypeId>,
    ) -> Result<(), ValidationError> {
        if !validated.insert(id) {
            return Ok(());
        }
        let Some(entity) = model.entity_type(id) else {
            return Ok(());
        };
        if let Some(base) = entity.base_type() {
            self.check_entity_inheritance(model, mapped, base, validated)?;
        }
        let Some(host) = entity.host_type() else {
            return Ok(());
        };

        // Nearest host ancestor that is mapped to an entity type.
        let expected = model
            .host_types()
            .ancestry(host)
            .skip(1)
            .find_map(|h| mapped.get(h.name.as_str()).copied());
        if expected != entity.base_type() {
            return Err(ValidationError::InheritanceMismatch {
                entity: entity.name().to_string(),
                expected: expected.map(|e| model.entity_name(e).to_string()),
                actual: entity.base_type().map(|b| model.entity_name(b).to_string()),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::ModelBuilder;
    use crate::metadata::{HostType, ScalarType};
    use crate::source::ConfigurationSource::*;

    fn mapped_builder() -> ModelBuilder {
        let mut builder = ModelBuilder::new();
        builder.register_host_type(HostType::new("Blog").with_scalar("Id", ScalarType::Int32));
        builder
    }

    #[test]
    fn test_shadow_entity_is_fatal() {
        let mut builder = mapped_builder();
        let blog = builder.entity("Blog", Explicit).unwrap().unwrap();
        builder.primary_key(blog, &["Id"], Explicit).unwrap().unwrap();
        builder.entity("Tag", Explicit).unwrap().unwrap();

        assert_eq!(
            builder.validate(),
            Err(ValidationError::ShadowEntityType {
                entity: "Tag".to_string()
            })
        );
    }

    #[test]
    fn test_missing_primary_key_is_fatal() {
        let mut builder = mapped_builder();
        builder.entity("Blog", Explicit).unwrap().unwrap();

        assert_eq!(
            builder.validate(),
            Err(ValidationError::MissingPrimaryKey {
                entity: "Blog".to_string()
            })
        );
    }

    #[test]
    fn test_shadow_key_property_warning() {
        let mut builder = mapped_builder();
        let blog = builder.entity("Blog", Explicit).unwrap().unwrap();
        builder.primary_key(blog, &["Id"], Explicit).unwrap().unwrap();
        builder.has_key(blog, &["TenantId"], Explicit).unwrap().unwrap();

        let report = builder.validate().unwrap();
        assert_eq!(
            report.warnings(),
            &[ValidationWarning::ShadowKeyProperties {
                entity: "Blog".to_string(),
                properties: vec!["TenantId".to_string()],
            }]
        );

        let strict = ModelOptions::new().warnings_as_errors(true);
        assert!(matches!(
            ModelValidator::new(&strict).validate(builder.model()),
            Err(ValidationError::Escalated(_))
        ));

        let quiet = ModelOptions::new().shadow_key_warnings(false);
        assert!(ModelValidator::new(&quiet).validate(builder.model()).unwrap().is_clean());
    }

    #[test]
    fn test_inheritance_must_follow_host_types() {
        let mut builder = ModelBuilder::new();
        builder.register_host_type(HostType::new("Order").with_scalar("Id", ScalarType::Int32));
        builder.register_host_type(HostType::new("SpecialOrder").with_base("Order"));
        let order = builder.entity("Order", Explicit).unwrap().unwrap();
        let special = builder.entity("SpecialOrder", Explicit).unwrap().unwrap();
        builder.primary_key(order, &["Id"], Explicit).unwrap().unwrap();
        builder.primary_key(special, &["Id"], DataAnnotation).unwrap().unwrap();

        assert_eq!(
            builder.validate(),
            Err(ValidationError::InheritanceMismatch {
                entity: "SpecialOrder".to_string(),
                expected: Some("Order".to_string()),
                actual: None,
            })
        );

        let lenient = ModelOptions::new().validate_inheritance(false);
        assert!(ModelValidator::new(&lenient).validate(builder.model()).is_ok());

        builder.has_base_type(special, Some(order), Explicit).unwrap().unwrap();
        assert!(builder.validate().unwrap().is_clean());
    }
}
