//! modelgraph core - incremental entity model builder.
//!
//! This crate builds an in-memory entity-type graph from explicit
//! configuration, annotations and conventions, resolving conflicts between
//! them by configuration-source precedence.

pub mod builder;
pub mod config;
pub mod convention;
pub mod error;
pub mod frozen;
pub mod metadata;
pub mod source;
pub mod validation;

pub use builder::{
    DetachedElement, DetachedIndex, DetachedProperties, DetachedRelationship, ModelBuilder,
    PropertySnapshot, RelationshipShape,
};
pub use config::ModelOptions;
pub use convention::{Convention, ConventionSet, ModelEvent};
pub use error::{BuildResult, ModelError, ValidationError, ValidationWarning};
pub use frozen::{
    EntityTypeDescription, ForeignKeyDescription, FrozenModel, IndexDescription,
    ModelDescription, PropertyDescription,
};
pub use metadata::{
    DeleteBehavior, EntityType, EntityTypeId, ForeignKey, ForeignKeyId, HostMember, HostType,
    HostTypeRegistry, Index, IndexId, Key, KeyId, MemberCompatibility, Model, Navigation,
    NavigationRef, Property, PropertyId, ScalarType,
};
pub use source::ConfigurationSource;
pub use validation::{ModelValidator, ValidationReport};
