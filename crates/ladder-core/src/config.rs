//! # Loader Configuration
//!
//! Knobs that change how units are driven, not what the levels mean.

use serde::{Deserialize, Serialize};

/// Domain-wide loader settings.
///
/// Deserializes from the `[loader]` table of a manifest; missing keys take
/// their defaults, unknown keys are rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoaderConfig {
    /// Force-load every type of a unit during activation.
    pub expand_modules_on_load: bool,

    /// Make [`crate::LoadDomain::require_activated`] fail instead of warn.
    pub strict_activation_checks: bool,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            expand_modules_on_load: false,
            strict_activation_checks: cfg!(debug_assertions),
        }
    }
}

impl LoaderConfig {
    #[must_use]
    pub fn with_strict_activation_checks(mut self, strict: bool) -> Self {
        self.strict_activation_checks = strict;
        self
    }

    #[must_use]
    pub fn with_expand_modules_on_load(mut self, expand: bool) -> Self {
        self.expand_modules_on_load = expand;
        self
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_does_not_expand() {
        let config = LoaderConfig::default();
        assert!(!config.expand_modules_on_load);
        assert_eq!(config.strict_activation_checks, cfg!(debug_assertions));
    }

    #[test]
    fn builders_override() {
        let config = LoaderConfig::default()
            .with_strict_activation_checks(true)
            .with_expand_modules_on_load(true);
        assert!(config.strict_activation_checks);
        assert!(config.expand_modules_on_load);
    }

    #[test]
    fn json_missing_fields_take_defaults() {
        let config: LoaderConfig =
            serde_json::from_str(r#"{"expand_modules_on_load": true}"#).expect("parse");
        assert!(config.expand_modules_on_load);
        assert_eq!(config.strict_activation_checks, cfg!(debug_assertions));
    }

    #[test]
    fn json_unknown_field_rejected() {
        let result: Result<LoaderConfig, _> = serde_json::from_str(r#"{"verbose": true}"#);
        assert!(result.is_err());
    }
}
