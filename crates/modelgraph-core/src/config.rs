//! Builder and validator configuration.

use serde::Deserialize;

/// Options controlling model validation.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ModelOptions {
    /// Treat validation warnings as fatal errors.
    pub warnings_as_errors: bool,

    /// Check that host inheritance matches model inheritance.
    pub validate_inheritance: bool,

    /// Report keys that contain shadow properties.
    pub shadow_key_warnings: bool,
}

impl Default for ModelOptions {
    fn default() -> Self {
        Self {
            warnings_as_errors: false,
            validate_inheritance: true,
            shadow_key_warnings: true,
        }
    }
}

impl ModelOptions {
    /// Create the default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load options from a JSON document; missing fields keep their defaults.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Set whether warnings are fatal.
    pub fn warnings_as_errors(mut self, enabled: bool) -> Self {
        self.warnings_as_errors = enabled;
        self
    }

    /// Set whether host inheritance is validated.
    pub fn validate_inheritance(mut self, enabled: bool) -> Self {
        self.validate_inheritance = enabled;
        self
    }

    /// Set whether shadow key properties are reported.
    pub fn shadow_key_warnings(mut self, enabled: bool) -> Self {
        self.shadow_key_warnings = enabled;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = ModelOptions::default();
        assert!(!options.warnings_as_errors);
        assert!(options.validate_inheritance);
        assert!(options.shadow_key_warnings);
    }

    #[test]
    fn test_builder_setters() {
        let options = ModelOptions::new()
            .warnings_as_errors(true)
            .shadow_key_warnings(false);
        assert!(options.warnings_as_errors);
        assert!(!options.shadow_key_warnings);
    }

    #[test]
    fn test_partial_json() {
        let options = ModelOptions::from_json(r#"{ "warnings_as_errors": true }"#).unwrap();
        assert!(options.warnings_as_errors);
        assert!(options.validate_inheritance);

        assert!(ModelOptions::from_json("{ \"warnings_as_errors\": 3 }").is_err());
    }
}
