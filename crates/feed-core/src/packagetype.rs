//! Package-type descriptors.
//!
//! One descriptor per content-provider SIP format. Descriptors are plain
//! data: the stage map wires the state machine, the filegroup specs drive
//! partitioning and METS assembly, and the PREMIS lists pick which
//! provenance is migrated and which is generated. Behavioral differences
//! between providers are expressed here, not in code.

use feed_config::EventConfig;
use regex::Regex;
use serde_yaml::Value;
use std::collections::{BTreeMap, BTreeSet};

use feed_error::{IngestError, Result};

use crate::registry::Registry;
use crate::types::Status;

/// Declarative description of one logical file group inside a SIP.
#[derive(Debug, Clone)]
pub struct FileGroupSpec {
    /// Logical name: `image`, `ocr`, `hocr`, `pdf`, ...
    pub name: String,
    /// File-ID prefix used in the METS fileSec, e.g. `IMG`.
    pub prefix: String,
    /// Value of the fileGrp USE attribute.
    pub mets_use: String,
    /// Which directory files belong to this group.
    pub file_pattern: Regex,
    /// Whether a SIP without this group is malformed.
    pub required: bool,
    /// Whether the group's files are content (packed into the AIP zip).
    pub content: bool,
    /// Whether the group's files are characterized by the format tool.
    pub jhove: bool,
    /// Whether the group's files must be valid UTF-8.
    pub utf8: bool,
    /// Whether the group participates in the page-level struct map.
    pub structmap: bool,
}

impl FileGroupSpec {
    pub fn new(name: &str, prefix: &str, mets_use: &str, file_pattern: &str) -> Self {
        Self {
            name: name.to_owned(),
            prefix: prefix.to_owned(),
            mets_use: mets_use.to_owned(),
            file_pattern: Regex::new(file_pattern).expect("filegroup pattern must compile"),
            required: true,
            content: true,
            jhove: false,
            utf8: false,
            structmap: true,
        }
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    pub fn jhove(mut self) -> Self {
        self.jhove = true;
        self
    }

    pub fn utf8(mut self) -> Self {
        self.utf8 = true;
        self
    }

    pub fn not_in_structmap(mut self) -> Self {
        self.structmap = false;
        self
    }
}

/// Immutable descriptor for one SIP format and its ingest recipe.
#[derive(Debug, Clone)]
pub struct PackageType {
    pub identifier: String,
    pub description: String,
    /// Every filename in the SIP must match this.
    pub valid_file_pattern: Regex,
    /// Logical groups in declaration order; order is preserved into the
    /// METS fileSec.
    pub filegroups: Vec<FileGroupSpec>,
    /// Identifies the source METS inside the SIP. Exactly one file must
    /// match.
    pub source_mets_file: Regex,
    /// Identifies the checksum manifest, when the provider ships one.
    pub checksum_file: Option<Regex>,
    /// status -> stage identifier. Drives the per-volume state machine.
    pub stage_map: BTreeMap<Status, String>,
    /// Package-type configuration layer for the resolver.
    pub config: BTreeMap<String, Value>,
    /// validator identifier -> parameter map.
    pub validation: BTreeMap<String, BTreeMap<String, Value>>,
    /// Event codes generated during this ingest, in emission order.
    pub premis_events: Vec<String>,
    /// Event types migrated from the source METS, in emission order.
    pub source_premis_events: Vec<String>,
    /// Event types extracted from the source METS for inspection.
    pub source_premis_events_extract: Vec<String>,
    /// Per-event-code overrides layered on the global catalog.
    pub premis_overrides: BTreeMap<String, EventConfig>,
    /// printf-style template for the SIP filename; `%s` is the objid.
    pub sip_filename_pattern: String,
    /// Extensions stored uncompressed in the AIP zip.
    pub uncompressed_extensions: Vec<String>,
    /// Whether missing page sequence numbers are tolerated.
    pub allow_sequence_gaps: bool,
    /// Whether the package is normalized in a preingest directory first.
    pub use_preingest: bool,
    /// Whether the SIP is downloaded to disk-backed staging.
    pub download_to_disk: bool,
}

impl PackageType {
    /// A descriptor with an empty recipe; builtin descriptors start here
    /// and fill in their specifics.
    pub fn new(identifier: &str, description: &str) -> Self {
        Self {
            identifier: identifier.to_owned(),
            description: description.to_owned(),
            valid_file_pattern: Regex::new(r"\.(xml|jp2|tif|txt|html|pdf|epub)$")
                .expect("default file pattern must compile"),
            filegroups: Vec::new(),
            source_mets_file: Regex::new(r"^\w+\.xml$").expect("default METS pattern must compile"),
            checksum_file: None,
            stage_map: BTreeMap::new(),
            config: BTreeMap::new(),
            validation: BTreeMap::new(),
            premis_events: Vec::new(),
            source_premis_events: Vec::new(),
            source_premis_events_extract: Vec::new(),
            premis_overrides: BTreeMap::new(),
            sip_filename_pattern: "%s.zip".to_owned(),
            uncompressed_extensions: vec!["jp2".to_owned(), "tif".to_owned()],
            allow_sequence_gaps: false,
            use_preingest: false,
            download_to_disk: false,
        }
    }

    /// The SIP filename for an object identifier.
    pub fn sip_filename(&self, objid: &str) -> String {
        self.sip_filename_pattern.replace("%s", objid)
    }

    /// The filegroup spec with the given logical name.
    pub fn filegroup(&self, name: &str) -> Option<&FileGroupSpec> {
        self.filegroups.iter().find(|g| g.name == name)
    }

    /// The stage identifier registered for `status`, when one exists.
    pub fn stage_for(&self, status: &Status) -> Option<&str> {
        self.stage_map.get(status).map(String::as_str)
    }

    /// Startup validation: every stage identifier resolves, filegroup
    /// names are unique, and every referenced event code exists in the
    /// catalog (or in this descriptor's overrides).
    pub fn validate(
        &self,
        registry: &Registry,
        catalog: &BTreeMap<String, EventConfig>,
    ) -> Result<()> {
        for stage_id in self.stage_map.values() {
            registry.stage(stage_id)?;
        }

        let mut seen = BTreeSet::new();
        for group in &self.filegroups {
            if !seen.insert(group.name.as_str()) {
                return Err(IngestError::Config(format!(
                    "package type {}: duplicate filegroup {}",
                    self.identifier, group.name
                )));
            }
        }

        for code in &self.premis_events {
            if !catalog.contains_key(code) && !self.premis_overrides.contains_key(code) {
                return Err(IngestError::Config(format!(
                    "package type {}: unknown PREMIS event code {code}",
                    self.identifier
                )));
            }
        }
        Ok(())
    }
}
