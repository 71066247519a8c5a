//! Namespace descriptors.

use serde_yaml::Value;
use std::collections::BTreeMap;

/// Per-institution configuration. A namespace supplies free-form
/// configuration plus package-type-specific overrides layered on top of it
/// by the resolver.
///
/// Namespaces are immutable after registration; the registry hands out
/// shared references.
#[derive(Debug, Clone, Default)]
pub struct Namespace {
    pub identifier: String,
    pub description: String,
    /// Free key/value configuration for this institution.
    pub config: BTreeMap<String, Value>,
    /// Key/value maps keyed by package-type identifier, consulted before
    /// `config` when that package type is being ingested.
    pub packagetype_overrides: BTreeMap<String, BTreeMap<String, Value>>,
}

impl Namespace {
    pub fn new(identifier: &str, description: &str) -> Self {
        Self {
            identifier: identifier.to_owned(),
            description: description.to_owned(),
            ..Self::default()
        }
    }

    /// Set a namespace-level configuration value.
    pub fn with_config(mut self, key: &str, value: Value) -> Self {
        self.config.insert(key.to_owned(), value);
        self
    }

    /// Set a value that applies only when ingesting `packagetype`.
    pub fn with_packagetype_override(
        mut self,
        packagetype: &str,
        key: &str,
        value: Value,
    ) -> Self {
        self.packagetype_overrides
            .entry(packagetype.to_owned())
            .or_default()
            .insert(key.to_owned(), value);
        self
    }

    /// Namespace-layer lookup for `key` when ingesting `packagetype`:
    /// the package-type override map first, then the namespace config.
    pub fn get(&self, packagetype: &str, key: &str) -> Option<&Value> {
        self.packagetype_overrides
            .get(packagetype)
            .and_then(|m| m.get(key))
            .or_else(|| self.config.get(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packagetype_override_shadows_namespace_config() {
        let ns = Namespace::new("mdp", "University of Michigan")
            .with_config("artist", Value::from("University of Michigan"))
            .with_packagetype_override("google", "artist", Value::from("Google"));

        assert_eq!(
            ns.get("google", "artist").and_then(Value::as_str),
            Some("Google")
        );
        assert_eq!(
            ns.get("simple", "artist").and_then(Value::as_str),
            Some("University of Michigan")
        );
        assert!(ns.get("simple", "missing").is_none());
    }
}
