//! Metadata elements of the entity-type graph.
//!
//! The model stores entity types, properties, keys, foreign keys and indexes
//! in one arena and links them by handle.

mod entity_type;
mod foreign_key;
mod ids;
mod index;
mod key;
mod model;
mod property;
mod types;

pub use entity_type::EntityType;
pub use foreign_key::{DeleteBehavior, ForeignKey, Navigation};
pub use ids::{ArenaId, EntityTypeId, ForeignKeyId, IndexId, KeyId, PropertyId};
pub use index::Index;
pub use key::Key;
pub use model::{Model, NavigationRef};
pub use property::Property;
pub use types::{HostMember, HostType, HostTypeRegistry, MemberCompatibility, ScalarType};

pub(crate) use types::types_compatible;
