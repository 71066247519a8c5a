//! The runtime object for one item being ingested.
//!
//! A `Volume` ties an identifier to its namespace and package-type
//! descriptors and the engine context, and carries the lazy caches every
//! stage shares: the staging directory listing, the filegroup partition,
//! the parsed source and repository METS contexts, and the checksum
//! manifest. Each cache is populated at most once per volume.
//!
//! Volumes are cheap to clone (the state is behind an `Arc`); a clone
//! observes the same caches. One worker drives one volume at a time, so
//! interior state needs no finer locking than the caches provide.

use camino::{Utf8Path, Utf8PathBuf};
use chrono::Utc;
use once_cell::sync::OnceCell;
use regex::Regex;
use serde_yaml::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::sync::Arc;

use feed_config::EventConfig;
use feed_error::{IngestError, Result};
use feed_xml::Document;

use crate::engine::Engine;
use crate::events::{self, EventParams, PremisRecord};
use crate::namespace::Namespace;
use crate::packagetype::{FileGroupSpec, PackageType};
use crate::resolver;
use crate::types::{Identifier, Status};

static SEQUENCE_RE: once_cell::sync::Lazy<Regex> =
    once_cell::sync::Lazy::new(|| Regex::new(r"(\d+)\.[^.]+$").expect("sequence pattern"));

/// A logical filegroup materialized against one volume's directory.
#[derive(Debug, Clone)]
pub struct FileGroup {
    pub spec: FileGroupSpec,
    pub files: Vec<String>,
}

/// Page labels extracted from the source METS struct map.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageInfo {
    pub orderlabel: Option<String>,
    pub label: Option<String>,
}

#[derive(Clone)]
pub struct Volume {
    inner: Arc<VolumeInner>,
}

struct VolumeInner {
    engine: Arc<Engine>,
    namespace: Arc<Namespace>,
    packagetype: Arc<PackageType>,
    identifier: Identifier,
    dir_files: OnceCell<Vec<String>>,
    file_groups: OnceCell<BTreeMap<String, FileGroup>>,
    checksums: OnceCell<BTreeMap<String, String>>,
    source_mets: OnceCell<Arc<Document>>,
    repos_mets: OnceCell<Option<Arc<Document>>>,
}

impl Volume {
    pub(crate) fn new(
        engine: Arc<Engine>,
        namespace: Arc<Namespace>,
        packagetype: Arc<PackageType>,
        identifier: Identifier,
    ) -> Self {
        Self {
            inner: Arc::new(VolumeInner {
                engine,
                namespace,
                packagetype,
                identifier,
                dir_files: OnceCell::new(),
                file_groups: OnceCell::new(),
                checksums: OnceCell::new(),
                source_mets: OnceCell::new(),
                repos_mets: OnceCell::new(),
            }),
        }
    }

    // ------------------------------------------------------------------
    // Identity
    // ------------------------------------------------------------------

    /// The full identifier, `namespace.objid`.
    pub fn identifier(&self) -> String {
        self.inner.identifier.full()
    }

    pub fn id(&self) -> &Identifier {
        &self.inner.identifier
    }

    pub fn namespace(&self) -> &str {
        self.inner.identifier.namespace()
    }

    pub fn objid(&self) -> &str {
        self.inner.identifier.objid()
    }

    pub fn pt_objid(&self) -> String {
        self.inner.identifier.pt_objid()
    }

    pub fn packagetype(&self) -> &Arc<PackageType> {
        &self.inner.packagetype
    }

    pub fn namespace_descriptor(&self) -> &Arc<Namespace> {
        &self.inner.namespace
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.inner.engine
    }

    /// Layered configuration lookup for this volume's namespace and
    /// package type.
    pub fn resolve(&self, key: &str) -> Result<Value> {
        resolver::get(
            self.inner.engine.config(),
            &self.inner.namespace,
            &self.inner.packagetype,
            key,
        )
    }

    /// Merged validator parameters for this volume.
    pub fn validation_overrides(&self, validator_id: &str) -> BTreeMap<String, Value> {
        resolver::validation_overrides(&self.inner.namespace, &self.inner.packagetype, validator_id)
    }

    /// The agent responsible for creating this volume's images. Resolves
    /// the `artist` key, falling back to the namespace description.
    pub fn artist(&self) -> String {
        self.resolve("artist")
            .ok()
            .and_then(|v| v.as_str().map(str::to_owned))
            .unwrap_or_else(|| self.inner.namespace.description.clone())
    }

    // ------------------------------------------------------------------
    // Derived paths
    // ------------------------------------------------------------------

    pub fn staging_directory(&self) -> Utf8PathBuf {
        self.inner
            .engine
            .config()
            .staging
            .ingest
            .join(self.pt_objid())
    }

    pub fn preingest_directory(&self) -> Utf8PathBuf {
        self.inner
            .engine
            .config()
            .staging
            .preingest
            .join(self.pt_objid())
    }

    pub fn download_directory(&self) -> Utf8PathBuf {
        self.inner.engine.config().staging.download.clone()
    }

    /// The SIP filename for this volume.
    pub fn sip_filename(&self) -> String {
        self.inner.packagetype.sip_filename(self.objid())
    }

    /// Where the inbound SIP is expected.
    pub fn sip_path(&self) -> Utf8PathBuf {
        self.download_directory().join(self.sip_filename())
    }

    /// Where this run's METS is staged before collation.
    pub fn mets_path(&self) -> Utf8PathBuf {
        self.inner
            .engine
            .config()
            .staging
            .zipfile
            .join(format!("{}.mets.xml", self.pt_objid()))
    }

    /// Where this run's AIP zip is staged before collation.
    pub fn zip_path(&self) -> Utf8PathBuf {
        self.inner
            .engine
            .config()
            .staging
            .zipfile
            .join(format!("{}.zip", self.pt_objid()))
    }

    /// Create the staging directory. When disk-backed staging is
    /// configured the directory is created on disk and symlinked into the
    /// staging root, so large volumes do not exhaust RAM staging.
    pub fn mk_staging_directory(&self) -> Result<Utf8PathBuf> {
        let staging = self.staging_directory();
        if let Some(disk) = &self.inner.engine.config().staging.disk {
            let backing = disk.ingest.join(self.pt_objid());
            fs::create_dir_all(&backing).map_err(|e| {
                IngestError::operation_failed("create staging", Some(backing.as_str()), e)
            })?;
            if !staging.exists() {
                symlink_dir(&backing, &staging)?;
            }
            return Ok(staging);
        }
        fs::create_dir_all(&staging).map_err(|e| {
            IngestError::operation_failed("create staging", Some(staging.as_str()), e)
        })?;
        Ok(staging)
    }

    // ------------------------------------------------------------------
    // Repository lookups (reingest detection)
    // ------------------------------------------------------------------

    fn repository_path_under(&self, root: &Utf8Path) -> Utf8PathBuf {
        root.join(self.namespace())
            .join(feed_pairtree::id2ppath(self.objid()))
            .join(self.pt_objid())
    }

    /// The canonical object directory, whether reached directly or
    /// through the link layer. `None` when the object is not in the
    /// repository.
    pub fn repository_object_dir(&self) -> Option<Utf8PathBuf> {
        let repository = &self.inner.engine.config().repository;
        let canonical = self.repository_path_under(&repository.obj_dir);
        if canonical.is_dir() {
            return Some(canonical);
        }
        if repository.has_link_layer() {
            let link = self.repository_path_under(&repository.link_dir);
            if link.is_dir() {
                return Some(link);
            }
        }
        None
    }

    /// The link-layer symlink for this object, when it resolves.
    pub fn repository_symlink(&self) -> Option<Utf8PathBuf> {
        let repository = &self.inner.engine.config().repository;
        if !repository.has_link_layer() {
            return None;
        }
        let link = self.repository_path_under(&repository.link_dir);
        link.is_dir().then_some(link)
    }

    pub fn repository_mets_path(&self) -> Option<Utf8PathBuf> {
        let path = self
            .repository_object_dir()?
            .join(format!("{}.mets.xml", self.pt_objid()));
        path.is_file().then_some(path)
    }

    pub fn repository_zip_path(&self) -> Option<Utf8PathBuf> {
        let path = self
            .repository_object_dir()?
            .join(format!("{}.zip", self.pt_objid()));
        path.is_file().then_some(path)
    }

    // ------------------------------------------------------------------
    // Directory contents
    // ------------------------------------------------------------------

    /// Sorted list of the SIP's current files in the staging directory.
    pub fn all_directory_files(&self) -> Result<&[String]> {
        let files = self.inner.dir_files.get_or_try_init(|| {
            let dir = self.staging_directory();
            let mut files = Vec::new();
            let entries = fs::read_dir(&dir).map_err(|e| {
                IngestError::operation_failed("list staging", Some(dir.as_str()), e)
            })?;
            for entry in entries {
                let entry = entry.map_err(|e| {
                    IngestError::operation_failed("list staging", Some(dir.as_str()), e)
                })?;
                if entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
                    files.push(entry.file_name().to_string_lossy().into_owned());
                }
            }
            files.sort();
            Ok::<_, IngestError>(files)
        })?;
        Ok(files.as_slice())
    }

    /// Partition the directory files into the package type's logical
    /// groups. Groups keep their files sorted; partitioning happens at
    /// first call and is cached.
    pub fn file_groups(&self) -> Result<&BTreeMap<String, FileGroup>> {
        self.inner.file_groups.get_or_try_init(|| {
            let files = self.all_directory_files()?;
            let mut groups = BTreeMap::new();
            for spec in &self.inner.packagetype.filegroups {
                let members: Vec<String> = files
                    .iter()
                    .filter(|f| spec.file_pattern.is_match(f))
                    .cloned()
                    .collect();
                groups.insert(
                    spec.name.clone(),
                    FileGroup {
                        spec: spec.clone(),
                        files: members,
                    },
                );
            }
            Ok(groups)
        })
    }

    fn files_where(&self, pick: impl Fn(&FileGroupSpec) -> bool) -> Result<Vec<String>> {
        let mut out = BTreeSet::new();
        for group in self.file_groups()?.values() {
            if pick(&group.spec) {
                out.extend(group.files.iter().cloned());
            }
        }
        Ok(out.into_iter().collect())
    }

    /// Files that will be packed into the AIP zip.
    pub fn all_content_files(&self) -> Result<Vec<String>> {
        self.files_where(|s| s.content)
    }

    pub fn jhove_files(&self) -> Result<Vec<String>> {
        self.files_where(|s| s.jhove)
    }

    pub fn utf8_files(&self) -> Result<Vec<String>> {
        self.files_where(|s| s.utf8)
    }

    pub fn file_count(&self) -> Result<usize> {
        Ok(self.all_content_files()?.len())
    }

    /// Number of pages, taken from the image filegroup.
    pub fn page_count(&self) -> Result<usize> {
        let groups = self.file_groups()?;
        let image = groups.get("image").ok_or_else(|| {
            IngestError::MissingImageGroup {
                file: self.identifier(),
            }
        })?;
        Ok(image.files.len())
    }

    /// Group files by page sequence number. Every grouped file must end
    /// with a numeric sequence before its extension.
    pub fn file_groups_by_page(
        &self,
    ) -> Result<BTreeMap<u32, BTreeMap<String, Vec<String>>>> {
        let mut pages: BTreeMap<u32, BTreeMap<String, Vec<String>>> = BTreeMap::new();
        for group in self.file_groups()?.values() {
            if !group.spec.structmap {
                continue;
            }
            for file in &group.files {
                let captures = SEQUENCE_RE.captures(file).ok_or_else(|| {
                    IngestError::bad_field("sequence_number", file.clone())
                })?;
                let seq: u32 = captures[1].parse().map_err(|_| {
                    IngestError::bad_field("sequence_number", file.clone())
                })?;
                pages
                    .entry(seq)
                    .or_default()
                    .entry(group.spec.name.clone())
                    .or_default()
                    .push(file.clone());
            }
        }
        Ok(pages)
    }

    // ------------------------------------------------------------------
    // METS contexts
    // ------------------------------------------------------------------

    /// Locate the source METS in the staging directory. Exactly one file
    /// must match the package type's pattern.
    pub fn source_mets_file(&self) -> Result<Utf8PathBuf> {
        let pattern = &self.inner.packagetype.source_mets_file;
        let matches: Vec<&String> = self
            .all_directory_files()?
            .iter()
            .filter(|f| pattern.is_match(f))
            .collect();
        match matches.as_slice() {
            [one] => Ok(self.staging_directory().join(one.as_str())),
            [] => Err(IngestError::missing_field("source METS", self.identifier())),
            many => Err(IngestError::BadField {
                field: "source_mets_file".to_owned(),
                file: self.identifier(),
                actual: Some(format!("{} matches", many.len())),
            }),
        }
    }

    /// The parsed source METS, cached after the first call.
    pub fn source_mets_xpc(&self) -> Result<&Arc<Document>> {
        self.inner.source_mets.get_or_try_init(|| {
            let path = self.source_mets_file()?;
            let text = fs::read_to_string(&path).map_err(|e| {
                IngestError::operation_failed("read source METS", Some(path.as_str()), e)
            })?;
            let doc = Document::parse(&text).map_err(|e| {
                IngestError::operation_failed("parse source METS", Some(path.as_str()), e)
            })?;
            Ok(Arc::new(doc))
        })
    }

    /// The parsed repository METS, when this object is a reingest.
    /// `Ok(None)` when the object is not in the repository yet.
    pub fn repos_mets_xpc(&self) -> Result<&Option<Arc<Document>>> {
        self.inner.repos_mets.get_or_try_init(|| {
            let Some(path) = self.repository_mets_path() else {
                return Ok(None);
            };
            let text = fs::read_to_string(&path).map_err(|e| {
                IngestError::operation_failed("read repository METS", Some(path.as_str()), e)
            })?;
            let doc = Document::parse(&text).map_err(|e| {
                IngestError::InvalidRepositoryPremis {
                    detail: format!("repository METS at {path} is not well-formed: {e}"),
                }
            })?;
            Ok(Some(Arc::new(doc)))
        })
    }

    /// The MARC record from the source METS: the first element child of
    /// `dmdSec/mdWrap[@MDTYPE="MARC"]/xmlData`. Whitespace and other
    /// non-element nodes are skipped.
    pub fn marc_xml(&self) -> Result<feed_xml::Element> {
        let doc = self.source_mets_xpc()?;
        for dmdsec in doc.root().descendants("dmdSec") {
            for mdwrap in dmdsec.descendants("mdWrap") {
                if mdwrap.attr("MDTYPE") != Some("MARC") {
                    continue;
                }
                if let Some(xmldata) = mdwrap.child("xmlData") {
                    if let Some(record) = xmldata.elements().next() {
                        return Ok(record.clone());
                    }
                }
            }
        }
        Err(IngestError::MissingMarc)
    }

    /// Expected MD5 checksums by filename: from the checksum manifest if
    /// the package ships one, else from the source METS fileSec.
    pub fn checksums(&self) -> Result<&BTreeMap<String, String>> {
        self.inner.checksums.get_or_try_init(|| {
            if let Some(pattern) = &self.inner.packagetype.checksum_file {
                let manifest = self
                    .all_directory_files()?
                    .iter()
                    .find(|f| pattern.is_match(f))
                    .cloned();
                if let Some(manifest) = manifest {
                    return self.parse_checksum_manifest(&manifest);
                }
            }
            self.checksums_from_source_mets()
        })
    }

    fn parse_checksum_manifest(&self, manifest: &str) -> Result<BTreeMap<String, String>> {
        let path = self.staging_directory().join(manifest);
        let text = fs::read_to_string(&path).map_err(|e| {
            IngestError::operation_failed("read checksum manifest", Some(path.as_str()), e)
        })?;
        let mut sums = BTreeMap::new();
        for line in text.lines() {
            let mut parts = line.split_whitespace();
            let (Some(hash), Some(name)) = (parts.next(), parts.next()) else {
                continue;
            };
            let name = name.trim_start_matches('*');
            let name = name.rsplit('/').next().unwrap_or(name);
            sums.insert(name.to_owned(), hash.to_ascii_lowercase());
        }
        Ok(sums)
    }

    fn checksums_from_source_mets(&self) -> Result<BTreeMap<String, String>> {
        let doc = self.source_mets_xpc()?;
        let mut sums = BTreeMap::new();
        for file in doc.root().descendants("file") {
            let Some(checksum) = file.attr("CHECKSUM") else {
                continue;
            };
            let Some(href) = file.child("FLocat").and_then(|l| l.attr("href")) else {
                continue;
            };
            let name = href.rsplit('/').next().unwrap_or(href);
            sums.insert(name.to_owned(), checksum.to_ascii_lowercase());
        }
        Ok(sums)
    }

    /// Per-page labels from the source METS physical struct map, for the
    /// struct-map div that references `file`.
    pub fn page_data(&self, file: &str) -> Option<PageInfo> {
        let doc = self.source_mets_xpc().ok()?;
        let root = doc.root();
        let fileid = root.descendants("file").into_iter().find_map(|f| {
            let href = f.child("FLocat")?.attr("href")?;
            let name = href.rsplit('/').next().unwrap_or(href);
            if name == file {
                f.attr("ID").map(str::to_owned)
            } else {
                None
            }
        })?;

        for div in root.descendants("div") {
            let references_file = div
                .elements()
                .any(|e| e.local == "fptr" && e.attr("FILEID") == Some(fileid.as_str()));
            if references_file {
                let info = PageInfo {
                    orderlabel: div.attr("ORDERLABEL").map(str::to_owned),
                    label: div.attr("LABEL").map(str::to_owned),
                };
                if info.orderlabel.is_some() || info.label.is_some() {
                    return Some(info);
                }
                return None;
            }
        }
        None
    }

    // ------------------------------------------------------------------
    // Stage map
    // ------------------------------------------------------------------

    /// Walk the package type's stage map from `start`, chasing each
    /// stage's declared success state, and return the stage identifiers
    /// visited in order.
    pub fn stages(&self, start: &Status) -> Result<Vec<String>> {
        let mut order = Vec::new();
        let mut seen = BTreeSet::new();
        let mut status = start.clone();
        while let Some(stage_id) = self.inner.packagetype.stage_for(&status) {
            if !seen.insert(status.clone()) {
                return Err(IngestError::Config(format!(
                    "stage map for {} cycles at status {status}",
                    self.inner.packagetype.identifier
                )));
            }
            let factory = self.inner.engine.registry().stage(stage_id)?;
            order.push(stage_id.to_owned());
            status = factory.stage_info().success_state;
        }
        Ok(order)
    }

    // ------------------------------------------------------------------
    // PREMIS events
    // ------------------------------------------------------------------

    /// The merged event recipe for an event code: the global catalog
    /// overlaid with the package type's override, then the namespace's.
    pub fn get_event_configuration(&self, code: &str) -> Result<EventConfig> {
        let base = self.inner.engine.config().premis_event(code).cloned();
        let pkg = self.inner.packagetype.premis_overrides.get(code);
        if base.is_none() && pkg.is_none() {
            return Err(IngestError::Config(format!(
                "unknown PREMIS event code: {code}"
            )));
        }
        let mut merged = base.unwrap_or_default();
        if let Some(over) = pkg {
            merged = merged.overlaid(over);
        }
        if let Some(value) = self
            .inner
            .namespace
            .get(&self.inner.packagetype.identifier, "premis_overrides")
        {
            if let Some(over) = value
                .get(code)
                .and_then(|v| serde_yaml::from_value::<EventConfig>(v.clone()).ok())
            {
                merged = merged.overlaid(&over);
            }
        }
        Ok(merged)
    }

    /// Record a PREMIS event for this volume. Idempotent: recording the
    /// same event type again replaces the stored row, and identical
    /// arguments mint the identical UUID.
    pub fn record_premis_event(&self, code: &str, params: EventParams) -> Result<()> {
        let config = self.get_event_configuration(code)?;
        let eventtype = if config.event_type.is_empty() {
            code.to_owned()
        } else {
            config.event_type
        };
        let date = events::truncate_date(params.date.unwrap_or_else(Utc::now));
        let eventid = events::make_premis_uuid(self.namespace(), self.objid(), &eventtype, &date);
        self.inner.engine.events().replace(
            self.namespace(),
            self.objid(),
            PremisRecord {
                eventid,
                eventtype,
                date,
                outcome: params.outcome,
            },
        )
    }

    /// The stored event row for an event code, when one exists.
    pub fn get_event_info(&self, code: &str) -> Result<Option<PremisRecord>> {
        let config = self.get_event_configuration(code)?;
        let eventtype = if config.event_type.is_empty() {
            code
        } else {
            config.event_type.as_str()
        };
        self.inner
            .engine
            .events()
            .get(self.namespace(), self.objid(), eventtype)
    }

    /// The deterministic UUIDv5 this volume would mint for an event of
    /// `eventtype` at `date`.
    pub fn make_premis_uuid(&self, eventtype: &str, date: &chrono::DateTime<Utc>) -> uuid::Uuid {
        events::make_premis_uuid(self.namespace(), self.objid(), eventtype, date)
    }

    /// Drop every stored event for this volume.
    pub fn clear_premis_events(&self) -> Result<()> {
        self.inner
            .engine
            .events()
            .clear(self.namespace(), self.objid())
    }

    // ------------------------------------------------------------------
    // Cleanup
    // ------------------------------------------------------------------

    /// Remove the staging directory, including a disk-backed one behind a
    /// symlink.
    pub fn clean_staging(&self) -> Result<()> {
        let staging = self.staging_directory();
        if let Some(disk) = &self.inner.engine.config().staging.disk {
            let backing = disk.ingest.join(self.pt_objid());
            remove_dir_if_present(&backing)?;
            remove_symlink_if_present(&staging)?;
            return Ok(());
        }
        remove_dir_if_present(&staging)
    }

    pub fn clean_preingest(&self) -> Result<()> {
        remove_dir_if_present(&self.preingest_directory())
    }

    /// Remove the staged METS and zip.
    pub fn clean_mets_zip(&self) -> Result<()> {
        remove_file_if_present(&self.mets_path())?;
        remove_file_if_present(&self.zip_path())
    }

    /// Remove the downloaded SIP.
    pub fn clean_download(&self) -> Result<()> {
        remove_file_if_present(&self.sip_path())
    }

    /// Remove everything this volume staged: the staging directory, the
    /// METS, and the zip.
    pub fn clean_all(&self) -> Result<()> {
        self.clean_staging()?;
        self.clean_mets_zip()
    }
}

impl std::fmt::Debug for Volume {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Volume")
            .field("identifier", &self.inner.identifier)
            .field("packagetype", &self.inner.packagetype.identifier)
            .finish_non_exhaustive()
    }
}

fn remove_dir_if_present(dir: &Utf8Path) -> Result<()> {
    if dir.is_dir() {
        fs::remove_dir_all(dir).map_err(|e| {
            IngestError::operation_failed("remove directory", Some(dir.as_str()), e)
        })?;
    }
    Ok(())
}

fn remove_file_if_present(path: &Utf8Path) -> Result<()> {
    if path.is_file() {
        fs::remove_file(path).map_err(|e| {
            IngestError::operation_failed("remove file", Some(path.as_str()), e)
        })?;
    }
    Ok(())
}

fn remove_symlink_if_present(path: &Utf8Path) -> Result<()> {
    if path.symlink_metadata().is_ok() {
        fs::remove_file(path.as_std_path()).map_err(|e| {
            IngestError::operation_failed("remove symlink", Some(path.as_str()), e)
        })?;
    }
    Ok(())
}

#[cfg(unix)]
fn symlink_dir(target: &Utf8Path, link: &Utf8Path) -> Result<()> {
    std::os::unix::fs::symlink(target, link).map_err(|e| {
        IngestError::operation_failed("create staging symlink", Some(link.as_str()), e)
    })
}

#[cfg(not(unix))]
fn symlink_dir(target: &Utf8Path, link: &Utf8Path) -> Result<()> {
    let _ = target;
    fs::create_dir_all(link)
        .map_err(|e| IngestError::operation_failed("create staging", Some(link.as_str()), e))
}
