//! Global configuration for the feed ingest pipeline.
//!
//! One YAML document, loaded once at startup from the path in the
//! `HTFEED_CONFIG` environment variable, supplies everything the engine
//! needs that is not part of a namespace or package-type descriptor:
//! staging roots, the repository layout, daemon release states, the worker
//! pool size, the PREMIS event catalog, and the invocation lines for
//! external tools.
//!
//! The typed model below covers the keys the core reads. The raw document
//! is kept alongside it so the config resolver can fall back to arbitrary
//! dotted key paths (`Config::lookup`).

mod premis;

pub use premis::{default_premis_catalog, EventConfig};

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;

use feed_error::{IngestError, Result};

/// Environment variable naming the configuration file path.
pub const CONFIG_ENV: &str = "HTFEED_CONFIG";

/// Staging directory roots used while a volume is in flight.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StagingConfig {
    /// Working directory for unpacked volumes being ingested.
    pub ingest: Utf8PathBuf,
    /// Working directory for package types that preprocess before ingest.
    pub preingest: Utf8PathBuf,
    /// Where inbound SIP archives are picked up.
    pub download: Utf8PathBuf,
    /// Scratch space for remote fetches.
    pub fetch: Utf8PathBuf,
    /// Where assembled AIP zips are staged before collation.
    pub zipfile: Utf8PathBuf,
    /// Optional disk-backed roots mirrored into RAM staging via symlink.
    #[serde(default)]
    pub disk: Option<DiskStagingConfig>,
}

/// Disk-backed staging roots for large volumes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiskStagingConfig {
    pub ingest: Utf8PathBuf,
    pub preingest: Utf8PathBuf,
}

/// Object store layout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryConfig {
    /// Canonical pairtree root.
    pub obj_dir: Utf8PathBuf,
    /// Symlink tree root. Equal to `obj_dir` when no link layer is wanted.
    pub link_dir: Utf8PathBuf,
}

impl RepositoryConfig {
    /// Whether a separate symlink layer is configured.
    pub fn has_link_layer(&self) -> bool {
        self.link_dir != self.obj_dir
    }
}

/// Scheduler-facing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Terminal statuses from which a volume is never re-dispatched.
    #[serde(default = "default_release_states")]
    pub release_states: Vec<String>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            release_states: default_release_states(),
        }
    }
}

fn default_release_states() -> Vec<String> {
    vec!["collated".to_owned(), "punted".to_owned()]
}

/// Worker pool settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetConfig {
    #[serde(default = "default_threads")]
    pub threads: usize,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            threads: default_threads(),
        }
    }
}

fn default_threads() -> usize {
    1
}

/// Handle service administration identifiers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandleConfig {
    /// Naming-authority prefix handles are minted under.
    pub root_admin: String,
    /// Local administrator handle recorded on each minted handle.
    pub local_admin: String,
    /// Spool file consumed by the external handle-service emitter.
    pub spool: Utf8PathBuf,
    #[serde(default)]
    pub database: Option<HandleDatabaseConfig>,
}

/// Connection details for the external handle-service emitter. The core
/// never connects; these ride along for the emitter's benefit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandleDatabaseConfig {
    pub datasource: String,
    pub username: String,
    pub password: String,
}

/// The typed view of the global configuration document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub staging: StagingConfig,
    pub repository: RepositoryConfig,
    #[serde(default)]
    pub daemon: DaemonConfig,
    #[serde(default)]
    pub dataset: DatasetConfig,
    /// PREMIS event catalog: event code -> recipe for the METS assembler.
    /// Document entries are layered over the builtin catalog.
    #[serde(default)]
    pub premis: BTreeMap<String, EventConfig>,
    /// Invocation line for the external XML schema validator.
    #[serde(default)]
    pub xerces: Option<String>,
    /// Invocation line for the external format characterization tool.
    #[serde(default)]
    pub jhove: Option<String>,
    #[serde(default)]
    pub handle: Option<HandleConfig>,
    /// Public URL base for ingested objects, recorded with minted handles.
    #[serde(default)]
    pub repo_url_base: Option<String>,
    /// Root directory of the PREMIS event store.
    #[serde(default)]
    pub premis_store: Option<Utf8PathBuf>,
    /// Append-only error journal. Failures are only logged when unset.
    #[serde(default)]
    pub errors_journal: Option<Utf8PathBuf>,

    /// The raw document, retained for dotted-path fallback lookups.
    #[serde(skip, default = "null_value")]
    raw: serde_yaml::Value,
}

fn null_value() -> serde_yaml::Value {
    serde_yaml::Value::Null
}

impl Config {
    /// Load the configuration from the path named by `HTFEED_CONFIG`.
    pub fn from_env() -> Result<Self> {
        let path = std::env::var(CONFIG_ENV)
            .map_err(|_| IngestError::Config(format!("{CONFIG_ENV} is not set")))?;
        Self::from_path(Utf8Path::new(&path))
    }

    /// Load the configuration from an explicit file path.
    pub fn from_path(path: &Utf8Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| {
            IngestError::Config(format!("cannot read configuration at {path}: {e}"))
        })?;
        Self::from_str(&text)
    }

    /// Parse a configuration document.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(text: &str) -> Result<Self> {
        let raw: serde_yaml::Value = serde_yaml::from_str(text)
            .map_err(|e| IngestError::Config(format!("malformed configuration: {e}")))?;
        let mut config: Config = serde_yaml::from_value(raw.clone())
            .map_err(|e| IngestError::Config(format!("invalid configuration: {e}")))?;
        config.raw = raw;
        let mut catalog = default_premis_catalog();
        catalog.append(&mut config.premis);
        config.premis = catalog;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.dataset.threads == 0 {
            return Err(IngestError::Config(
                "dataset.threads must be at least 1".to_owned(),
            ));
        }
        if self.daemon.release_states.is_empty() {
            return Err(IngestError::Config(
                "daemon.release_states must not be empty".to_owned(),
            ));
        }
        Ok(())
    }

    /// Look up an arbitrary dotted key path in the raw document, e.g.
    /// `"staging.ingest"` or `"premis.ingestion.type"`.
    pub fn lookup(&self, dotted_key: &str) -> Option<&serde_yaml::Value> {
        let mut node = &self.raw;
        for part in dotted_key.split('.') {
            node = node.get(part)?;
        }
        Some(node)
    }

    /// Whether `status` is a release state.
    pub fn is_release_state(&self, status: &str) -> bool {
        self.daemon.release_states.iter().any(|s| s == status)
    }

    /// The catalog entry for an event code.
    pub fn premis_event(&self, code: &str) -> Option<&EventConfig> {
        self.premis.get(code)
    }
}

#[cfg(any(test, feature = "test-utils"))]
impl Config {
    /// Build a configuration rooted in a scratch directory, with the
    /// builtin PREMIS catalog and all staging/repository paths created.
    pub fn test_fixture(root: &Utf8Path) -> Self {
        let sub = |name: &str| -> Utf8PathBuf {
            let dir = root.join(name);
            std::fs::create_dir_all(&dir).expect("create fixture directory");
            dir
        };
        let obj_dir = sub("obj");
        Config {
            staging: StagingConfig {
                ingest: sub("ingest"),
                preingest: sub("preingest"),
                download: sub("download"),
                fetch: sub("fetch"),
                zipfile: sub("zipfile"),
                disk: None,
            },
            repository: RepositoryConfig {
                link_dir: obj_dir.clone(),
                obj_dir,
            },
            daemon: DaemonConfig::default(),
            dataset: DatasetConfig::default(),
            premis: default_premis_catalog(),
            xerces: None,
            jhove: None,
            handle: Some(HandleConfig {
                root_admin: "2027".to_owned(),
                local_admin: "2027/admin".to_owned(),
                spool: root.join("handle.spool"),
                database: None,
            }),
            repo_url_base: Some("https://repo.example.edu/cgi/pt".to_owned()),
            premis_store: Some(sub("premis")),
            errors_journal: None,
            raw: serde_yaml::Value::Null,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
staging:
  ingest: /tmp/feed/ingest
  preingest: /tmp/feed/preingest
  download: /tmp/feed/download
  fetch: /tmp/feed/fetch
  zipfile: /tmp/feed/zipfile
repository:
  obj_dir: /repo/obj
  link_dir: /repo/link
l4:
  nested:
    key: 17
"#;

    #[test]
    fn minimal_document_parses_with_defaults() {
        let config = Config::from_str(MINIMAL).unwrap();
        assert_eq!(config.staging.ingest.as_str(), "/tmp/feed/ingest");
        assert_eq!(config.daemon.release_states, vec!["collated", "punted"]);
        assert_eq!(config.dataset.threads, 1);
        assert!(config.repository.has_link_layer());
        // The builtin catalog is present even when the document has no
        // premis section.
        assert!(config.premis_event("ingestion").is_some());
    }

    #[test]
    fn dotted_lookup_reaches_untyped_keys() {
        let config = Config::from_str(MINIMAL).unwrap();
        let v = config.lookup("l4.nested.key").unwrap();
        assert_eq!(v.as_u64(), Some(17));
        assert!(config.lookup("l4.nested.missing").is_none());
    }

    #[test]
    fn zero_threads_is_rejected() {
        let doc = format!("{MINIMAL}\ndataset:\n  threads: 0\n");
        let err = Config::from_str(&doc).unwrap_err();
        assert!(err.to_string().contains("threads"));
    }

    #[test]
    fn release_state_membership() {
        let config = Config::from_str(MINIMAL).unwrap();
        assert!(config.is_release_state("collated"));
        assert!(config.is_release_state("punted"));
        assert!(!config.is_release_state("ready"));
    }

    #[test]
    fn catalog_overrides_merge_from_document() {
        let doc = format!(
            "{MINIMAL}\npremis:\n  ingestion:\n    type: ingestion\n    detail: Custom detail\n    executor: XyZ\n"
        );
        let config = Config::from_str(&doc).unwrap();
        let event = config.premis_event("ingestion").unwrap();
        assert_eq!(event.detail, "Custom detail");
        // Codes the document does not mention keep their builtin recipes.
        assert!(config.premis_event("zip_compression").is_some());
    }
}
