//! Foreign key (relationship) definitions.

use super::ids::{EntityTypeId, KeyId, PropertyId};
use crate::source::ConfigurationSource;
use serde::{Deserialize, Serialize};

/// Behavior when a principal is deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeleteBehavior {
    /// Delete dependents.
    Cascade,
    /// Prevent deletion while dependents exist.
    Restrict,
    /// Set the foreign key to null.
    SetNull,
}

/// A named navigation on one end of a relationship.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Navigation {
    pub(crate) name: String,
    pub(crate) source: ConfigurationSource,
}

impl Navigation {
    /// Navigation name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// How the navigation was established.
    pub fn configuration_source(&self) -> ConfigurationSource {
        self.source
    }
}

/// A foreign key from a dependent entity type to a principal key.
#[derive(Debug, Clone, PartialEq)]
pub struct ForeignKey {
    pub(crate) declaring_entity: EntityTypeId,
    pub(crate) principal_entity: EntityTypeId,
    pub(crate) principal_key: KeyId,
    pub(crate) principal_key_source: Option<ConfigurationSource>,
    pub(crate) properties: Vec<PropertyId>,
    pub(crate) to_principal: Option<Navigation>,
    pub(crate) to_dependent: Option<Navigation>,
    pub(crate) unique: bool,
    pub(crate) unique_source: Option<ConfigurationSource>,
    pub(crate) required: bool,
    pub(crate) required_source: Option<ConfigurationSource>,
    pub(crate) delete_behavior: Option<DeleteBehavior>,
    pub(crate) delete_behavior_source: Option<ConfigurationSource>,
    pub(crate) source: ConfigurationSource,
}

impl ForeignKey {
    /// Dependent entity type declaring the foreign key.
    pub fn declaring_entity(&self) -> EntityTypeId {
        self.declaring_entity
    }

    /// Principal entity type.
    pub fn principal_entity(&self) -> EntityTypeId {
        self.principal_entity
    }

    /// Referenced key.
    pub fn principal_key(&self) -> KeyId {
        self.principal_key
    }

    /// Set when the principal key was chosen by naming its properties.
    pub fn principal_key_source(&self) -> Option<ConfigurationSource> {
        self.principal_key_source
    }

    /// Ordered dependent properties.
    pub fn properties(&self) -> &[PropertyId] {
        &self.properties
    }

    /// Navigation from dependent to principal.
    pub fn navigation_to_principal(&self) -> Option<&Navigation> {
        self.to_principal.as_ref()
    }

    /// Navigation from principal to dependent(s).
    pub fn navigation_to_dependent(&self) -> Option<&Navigation> {
        self.to_dependent.as_ref()
    }

    /// Whether at most one dependent exists per principal.
    pub fn is_unique(&self) -> bool {
        self.unique
    }

    /// Whether a dependent must have a principal.
    pub fn is_required(&self) -> bool {
        self.required
    }

    /// Configured delete behavior, or the default for the required-ness.
    pub fn delete_behavior(&self) -> DeleteBehavior {
        self.delete_behavior.unwrap_or(if self.required {
            DeleteBehavior::Cascade
        } else {
            DeleteBehavior::SetNull
        })
    }

    /// How the foreign key was established.
    pub fn configuration_source(&self) -> ConfigurationSource {
        self.source
    }

    /// Whether this is a self-reference.
    pub fn is_self_referencing(&self) -> bool {
        self.declaring_entity == self.principal_entity
    }
}
