//! PREMIS event catalog entries.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Recipe for one PREMIS event code: how the METS assembler renders an
/// event of this kind. Package types and namespaces may override
/// individual fields through their `premis_overrides` maps.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EventConfig {
    /// Controlled-vocabulary PREMIS event type, e.g. `ingestion`.
    #[serde(rename = "type")]
    pub event_type: String,
    /// Human-readable event detail.
    pub detail: String,
    /// Linking agent of role Executor. The sentinel `VOLUME_ARTIST` is
    /// substituted with the volume's artist at assembly time.
    pub executor: String,
    /// Identifier type of the executor agent, e.g. `MARC21 Code`.
    #[serde(default)]
    pub executor_type: Option<String>,
    /// Software agents linked with role `software`.
    #[serde(default)]
    pub tools: Vec<String>,
    /// Fixed METS event identifier value, overriding the stored UUID.
    #[serde(default)]
    pub eventid_override: Option<String>,
}

impl EventConfig {
    /// Overlay the non-empty fields of `other` onto this entry.
    pub fn overlaid(&self, other: &EventConfig) -> EventConfig {
        EventConfig {
            event_type: pick(&self.event_type, &other.event_type),
            detail: pick(&self.detail, &other.detail),
            executor: pick(&self.executor, &other.executor),
            executor_type: other.executor_type.clone().or_else(|| self.executor_type.clone()),
            tools: if other.tools.is_empty() {
                self.tools.clone()
            } else {
                other.tools.clone()
            },
            eventid_override: other
                .eventid_override
                .clone()
                .or_else(|| self.eventid_override.clone()),
        }
    }
}

fn pick(base: &str, over: &str) -> String {
    if over.is_empty() {
        base.to_owned()
    } else {
        over.to_owned()
    }
}

/// The builtin event catalog. A deployment's configuration document layers
/// its own entries over these.
pub fn default_premis_catalog() -> BTreeMap<String, EventConfig> {
    let mut catalog = BTreeMap::new();
    let mut insert = |code: &str, event_type: &str, detail: &str, tools: &[&str]| {
        catalog.insert(
            code.to_owned(),
            EventConfig {
                event_type: event_type.to_owned(),
                detail: detail.to_owned(),
                executor: "DLPS".to_owned(),
                executor_type: Some("MARC21 Code".to_owned()),
                tools: tools.iter().map(|t| (*t).to_owned()).collect(),
                eventid_override: None,
            },
        );
    };

    insert(
        "capture",
        "capture",
        "Photocopy of volume or creation of digital images",
        &[],
    );
    insert(
        "image_compression",
        "compression",
        "Page images converted to lossy compression formats",
        &[],
    );
    insert(
        "source_mets_creation",
        "source METS creation",
        "Source METS document created from submitted metadata",
        &["FEED"],
    );
    insert(
        "package_inspection",
        "package inspection",
        "Submission package contents inspected against the package manifest",
        &["FEED"],
    );
    insert(
        "package_validation",
        "validation",
        "Submission package content files validated",
        &["FEED", "JHOVE"],
    );
    insert(
        "preingest",
        "preingest transformation",
        "Submission package normalized before ingest",
        &["FEED"],
    );
    insert(
        "zip_compression",
        "compression",
        "Content files compressed into the archival zip",
        &["FEED"],
    );
    insert(
        "zip_md5_create",
        "message digest calculation",
        "MD5 checksum calculated for the archival zip",
        &["FEED"],
    );
    insert(
        "handle_assignment",
        "identifier assignment",
        "Persistent handle registered for the object",
        &["FEED"],
    );
    insert(
        "ingestion",
        "ingestion",
        "Submission package ingested into the repository",
        &["FEED"],
    );

    catalog
}
