//! Collate: install the AIP into the pairtree object store.
//!
//! Copies the staged METS and zip into
//! `obj_dir/<namespace>/<pairtree(objid)>/<pt_objid>/`, linking from the
//! link tree when one is configured. Installation is atomic per file
//! (copy to a temporary name in the target directory, then rename). A
//! pre-existing target directory marks the run as a reingest; the stage
//! still succeeds.

use camino::{Utf8Path, Utf8PathBuf};
use std::fs;

use feed_core::{Stage, StageFactory, StageInfo, Volume};
use feed_error::{IngestError, Result};
use tracing::info;

pub struct Collate {
    volume: Volume,
    is_repeat: bool,
}

impl Collate {
    pub fn new(volume: Volume) -> Self {
        Self {
            volume,
            is_repeat: false,
        }
    }

    fn object_dir(&self) -> Utf8PathBuf {
        let repository = &self.volume.engine().config().repository;
        repository
            .obj_dir
            .join(self.volume.namespace())
            .join(feed_pairtree::id2ppath(self.volume.objid()))
            .join(self.volume.pt_objid())
    }

    fn link_path(&self) -> Option<Utf8PathBuf> {
        let repository = &self.volume.engine().config().repository;
        if !repository.has_link_layer() {
            return None;
        }
        Some(
            repository
                .link_dir
                .join(self.volume.namespace())
                .join(feed_pairtree::id2ppath(self.volume.objid()))
                .join(self.volume.pt_objid()),
        )
    }

    fn install(&self, source: &Utf8Path, target_dir: &Utf8Path) -> Result<()> {
        let name = source.file_name().ok_or_else(|| {
            IngestError::operation_failed("collate", Some(source.as_str()), "no file name")
        })?;
        let staged = target_dir.join(format!("{name}.tmp"));
        let target = target_dir.join(name);
        fs::copy(source, &staged).map_err(|e| {
            IngestError::operation_failed("copy into repository", Some(source.as_str()), e)
        })?;
        fs::rename(&staged, &target).map_err(|e| {
            IngestError::operation_failed("rename into repository", Some(target.as_str()), e)
        })?;
        Ok(())
    }
}

impl Stage for Collate {
    fn identifier(&self) -> &'static str {
        "collate"
    }

    fn stage_info(&self) -> StageInfo {
        StageInfo::new("collated", "punted")
    }

    fn run(&mut self) -> Result<()> {
        let mets = self.volume.mets_path();
        let zip = self.volume.zip_path();
        let missing: Vec<String> = [&mets, &zip]
            .iter()
            .filter(|p| !p.is_file())
            .map(|p| p.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(IngestError::operation_failed(
                "collate",
                None,
                format!("missing before copy: {}", missing.join(", ")),
            ));
        }

        let object_dir = self.object_dir();
        let link_path = self.link_path();
        self.is_repeat = object_dir.exists()
            || link_path
                .as_ref()
                .map(|l| l.symlink_metadata().is_ok())
                .unwrap_or(false);

        fs::create_dir_all(&object_dir).map_err(|e| {
            IngestError::operation_failed(
                "create repository directory",
                Some(object_dir.as_str()),
                e,
            )
        })?;

        self.install(&mets, &object_dir)?;
        self.install(&zip, &object_dir)?;

        if let Some(link) = link_path {
            if link.symlink_metadata().is_err() {
                if let Some(parent) = link.parent() {
                    fs::create_dir_all(parent).map_err(|e| {
                        IngestError::operation_failed(
                            "create link directory",
                            Some(parent.as_str()),
                            e,
                        )
                    })?;
                }
                symlink_dir(&object_dir, &link)?;
            }
        }

        info!(
            namespace = %self.volume.namespace(),
            objid = %self.volume.objid(),
            repeat = self.is_repeat,
            "ingest succeeded",
        );
        Ok(())
    }

    fn clean_always(&mut self) -> Result<()> {
        self.volume.clean_mets_zip()
    }

    fn clean_success(&mut self) -> Result<()> {
        self.volume.clean_staging()?;
        self.volume.clean_download()?;
        self.volume.clear_premis_events()
    }
}

#[cfg(unix)]
fn symlink_dir(target: &Utf8Path, link: &Utf8Path) -> Result<()> {
    std::os::unix::fs::symlink(target, link).map_err(|e| {
        IngestError::operation_failed("create repository link", Some(link.as_str()), e)
    })
}

#[cfg(not(unix))]
fn symlink_dir(_target: &Utf8Path, _link: &Utf8Path) -> Result<()> {
    Ok(())
}

pub struct CollateFactory;

impl StageFactory for CollateFactory {
    fn identifier(&self) -> &'static str {
        "collate"
    }

    fn description(&self) -> &'static str {
        "Install the AIP into the object store"
    }

    fn stage_info(&self) -> StageInfo {
        StageInfo::new("collated", "punted")
    }

    fn make(&self, volume: Volume) -> Box<dyn Stage> {
        Box::new(Collate::new(volume))
    }
}
