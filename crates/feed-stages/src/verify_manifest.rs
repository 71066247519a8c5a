//! VerifyManifest: reconcile the unpacked SIP against its manifest.
//!
//! Every file must be accounted for by a filegroup, the source METS, or
//! the checksum manifest; every accounted file must match its expected
//! MD5; every required filegroup must be populated.

use md5::{Digest, Md5};
use std::fs;
use std::io::Read;

use feed_core::{Stage, StageFactory, StageInfo, Volume};
use feed_error::{IngestError, Result};
use tracing::debug;

pub struct VerifyManifest {
    volume: Volume,
}

impl VerifyManifest {
    pub fn new(volume: Volume) -> Self {
        Self { volume }
    }

    fn is_accounted_for(&self, file: &str) -> bool {
        let packagetype = self.volume.packagetype();
        if packagetype
            .filegroups
            .iter()
            .any(|g| g.file_pattern.is_match(file))
        {
            return true;
        }
        if packagetype.source_mets_file.is_match(file) {
            return true;
        }
        if let Some(checksum_file) = &packagetype.checksum_file {
            if checksum_file.is_match(file) {
                return true;
            }
        }
        false
    }
}

impl Stage for VerifyManifest {
    fn identifier(&self) -> &'static str {
        "verify_manifest"
    }

    fn stage_info(&self) -> StageInfo {
        StageInfo::new("manifest_verified", "punted")
    }

    fn run(&mut self) -> Result<()> {
        let files: Vec<String> = self.volume.all_directory_files()?.to_vec();
        let packagetype = self.volume.packagetype().clone();

        for file in &files {
            if !packagetype.valid_file_pattern.is_match(file) {
                return Err(IngestError::BadField {
                    field: "filename".to_owned(),
                    file: file.clone(),
                    actual: None,
                });
            }
            if !self.is_accounted_for(file) {
                return Err(IngestError::BadField {
                    field: "extra_file".to_owned(),
                    file: file.clone(),
                    actual: None,
                });
            }
        }

        for group in self.volume.file_groups()?.values() {
            if group.spec.required && group.files.is_empty() {
                return Err(IngestError::missing_field(
                    format!("{} filegroup", group.spec.name),
                    self.volume.identifier(),
                ));
            }
        }

        let checksums = self.volume.checksums()?.clone();
        let staging = self.volume.staging_directory();
        for file in self.volume.all_content_files()? {
            let expected = checksums.get(&file).ok_or_else(|| {
                IngestError::missing_field("checksum", file.clone())
            })?;
            let actual = md5_of(&staging.join(&file))?;
            if &actual != expected {
                return Err(IngestError::BadField {
                    field: "checksum".to_owned(),
                    file,
                    actual: Some(actual),
                });
            }
        }

        debug!(volume = %self.volume.identifier(), files = files.len(), "manifest verified");
        Ok(())
    }
}

pub(crate) fn md5_of(path: &camino::Utf8Path) -> Result<String> {
    let mut file = fs::File::open(path)
        .map_err(|e| IngestError::operation_failed("checksum file", Some(path.as_str()), e))?;
    let mut hasher = Md5::new();
    let mut buffer = [0u8; 64 * 1024];
    loop {
        let read = file
            .read(&mut buffer)
            .map_err(|e| IngestError::operation_failed("checksum file", Some(path.as_str()), e))?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

pub struct VerifyManifestFactory;

impl StageFactory for VerifyManifestFactory {
    fn identifier(&self) -> &'static str {
        "verify_manifest"
    }

    fn description(&self) -> &'static str {
        "Reconcile unpacked files against the package manifest"
    }

    fn stage_info(&self) -> StageInfo {
        StageInfo::new("manifest_verified", "punted")
    }

    fn make(&self, volume: Volume) -> Box<dyn Stage> {
        Box::new(VerifyManifest::new(volume))
    }
}
