//! Layered configuration lookup.
//!
//! For any key, the first layer that defines it wins:
//!
//! 1. the namespace's override map for the package type being ingested,
//! 2. the namespace's own config,
//! 3. the package type's config,
//! 4. the global configuration document, under the same dotted key path.
//!
//! Validator parameters merge instead of shadowing: a higher layer can
//! override one parameter without dropping its siblings.

use serde_yaml::Value;
use std::collections::BTreeMap;

use feed_config::Config;
use feed_error::{IngestError, Result};

use crate::namespace::Namespace;
use crate::packagetype::PackageType;

/// Resolve `key` through the four layers. Fails with `UnknownKey` when no
/// layer defines it.
pub fn get(
    config: &Config,
    namespace: &Namespace,
    packagetype: &PackageType,
    key: &str,
) -> Result<Value> {
    if let Some(value) = namespace.get(&packagetype.identifier, key) {
        return Ok(value.clone());
    }
    if let Some(value) = packagetype.config.get(key) {
        return Ok(value.clone());
    }
    if let Some(value) = config.lookup(key) {
        return Ok(value.clone());
    }
    Err(IngestError::UnknownKey {
        key: key.to_owned(),
    })
}

/// Merge the `validation[validator_id]` sub-maps of the three descriptor
/// layers, lowest priority first: package type, then namespace config,
/// then the namespace's package-type override map.
pub fn validation_overrides(
    namespace: &Namespace,
    packagetype: &PackageType,
    validator_id: &str,
) -> BTreeMap<String, Value> {
    let mut merged: BTreeMap<String, Value> = packagetype
        .validation
        .get(validator_id)
        .cloned()
        .unwrap_or_default();

    for layer in [
        namespace.config.get("validation"),
        namespace
            .packagetype_overrides
            .get(&packagetype.identifier)
            .and_then(|m| m.get("validation")),
    ] {
        let Some(sub) = layer
            .and_then(Value::as_mapping)
            .and_then(|m| {
                m.iter()
                    .find(|(k, _)| k.as_str() == Some(validator_id))
                    .map(|(_, v)| v)
            })
            .and_then(Value::as_mapping)
        else {
            continue;
        };
        for (k, v) in sub {
            if let Some(key) = k.as_str() {
                merged.insert(key.to_owned(), v.clone());
            }
        }
    }

    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino::Utf8PathBuf;
    use serde_yaml::Mapping;

    fn fixture() -> (tempfile::TempDir, Config, Namespace, PackageType) {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        let config = Config::test_fixture(&root);

        let mut packagetype = PackageType::new("google", "Google-digitized package");
        packagetype
            .config
            .insert("artist".to_owned(), Value::from("Google"));
        packagetype.validation.insert(
            "JPEG2000".to_owned(),
            BTreeMap::from([
                ("decomposition_levels".to_owned(), Value::from("3,32")),
                ("layers".to_owned(), Value::from(8)),
            ]),
        );

        let mut validation = Mapping::new();
        let mut jpeg = Mapping::new();
        jpeg.insert(Value::from("decomposition_levels"), Value::from("3,8"));
        validation.insert(Value::from("JPEG2000"), Value::Mapping(jpeg));
        let namespace = Namespace::new("foo", "Test institution")
            .with_config("validation", Value::Mapping(validation))
            .with_packagetype_override("google", "artist", Value::from("Google for foo"));

        (dir, config, namespace, packagetype)
    }

    #[test]
    fn highest_defined_layer_wins() {
        let (_dir, config, ns, pt) = fixture();
        // Layer 1: the namespace's packagetype override.
        assert_eq!(
            get(&config, &ns, &pt, "artist").unwrap().as_str(),
            Some("Google for foo")
        );
        // Layer 3: package-type config, when the namespace is silent.
        let other_ns = Namespace::new("bar", "Other institution");
        assert_eq!(
            get(&config, &other_ns, &pt, "artist").unwrap().as_str(),
            Some("Google")
        );
    }

    #[test]
    fn global_document_is_the_last_layer() {
        let (_dir, config, ns, pt) = fixture();
        let err = get(&config, &ns, &pt, "no.such.key").unwrap_err();
        assert_eq!(err.kind(), "UnknownKey");
    }

    #[test]
    fn validator_overrides_merge_instead_of_shadowing() {
        let (_dir, _config, ns, pt) = fixture();
        let merged = validation_overrides(&ns, &pt, "JPEG2000");
        // Namespace narrows the bound...
        assert_eq!(
            merged.get("decomposition_levels").and_then(Value::as_str),
            Some("3,8")
        );
        // ...without dropping the sibling parameter from the package type.
        assert_eq!(merged.get("layers").and_then(Value::as_u64), Some(8));
    }

    #[test]
    fn unknown_validator_yields_empty_map() {
        let (_dir, _config, ns, pt) = fixture();
        assert!(validation_overrides(&ns, &pt, "TIFF").is_empty());
    }
}
