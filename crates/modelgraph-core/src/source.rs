//! Configuration source precedence.

use serde::{Deserialize, Serialize};

/// How authoritatively a fact in the model was established.
///
/// Variants are declared weakest first so the derived ordering is the
/// precedence order: `Convention < DataAnnotation < Explicit`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ConfigurationSource {
    /// Inferred by a convention.
    Convention,
    /// Declared through an annotation on the host type.
    DataAnnotation,
    /// Configured explicitly by the user.
    Explicit,
}

impl ConfigurationSource {
    /// Whether a mutation at this source may replace or remove a fact
    /// stamped `existing`. Requires strict precedence.
    pub fn outranks(self, existing: ConfigurationSource) -> bool {
        self > existing
    }

    /// Like [`outranks`](Self::outranks) for facets that may be unset.
    pub fn outranks_opt(self, existing: Option<ConfigurationSource>) -> bool {
        existing.map_or(true, |existing| self.outranks(existing))
    }

    /// Whether a facet stamped `existing` may be updated in place.
    pub fn can_update(self, existing: Option<ConfigurationSource>) -> bool {
        existing.map_or(true, |existing| self >= existing)
    }

    /// The stronger of two sources.
    pub fn max(self, other: ConfigurationSource) -> ConfigurationSource {
        std::cmp::max(self, other)
    }

    /// The stronger of this source and an optional stamp.
    pub fn max_opt(self, other: Option<ConfigurationSource>) -> ConfigurationSource {
        other.map_or(self, |other| self.max(other))
    }
}

impl std::fmt::Display for ConfigurationSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigurationSource::Convention => write!(f, "convention"),
            ConfigurationSource::DataAnnotation => write!(f, "data annotation"),
            ConfigurationSource::Explicit => write!(f, "explicit"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::ConfigurationSource::*;

    #[test]
    fn test_precedence_ordering() {
        assert!(Convention < DataAnnotation);
        assert!(DataAnnotation < Explicit);
        assert_eq!(Convention.max(Explicit), Explicit);
        assert_eq!(DataAnnotation.max_opt(None), DataAnnotation);
    }

    #[test]
    fn test_outranks_never_allows_equal() {
        assert!(!Explicit.outranks(Explicit));
        assert!(!DataAnnotation.outranks(DataAnnotation));
        assert!(Explicit.outranks(DataAnnotation));
        assert!(DataAnnotation.outranks(Convention));
        assert!(!DataAnnotation.outranks(Explicit));
        assert!(!Convention.outranks(Convention));
        assert!(Convention.outranks_opt(None));
        assert!(!Explicit.outranks_opt(Some(Explicit)));
    }

    #[test]
    fn test_can_update_in_place() {
        assert!(Convention.can_update(Some(Convention)));
        assert!(!Convention.can_update(Some(DataAnnotation)));
        assert!(Explicit.can_update(None));
    }
}
