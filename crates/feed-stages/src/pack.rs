//! Pack: build the archival zip.
//!
//! Content files plus the source METS go into the zip. Extensions the
//! package type lists as already-compressed are stored; everything else
//! is deflated. Records the compression and digest events the METS
//! assembler will emit.

use std::fs;
use std::io::Write;

use chrono::Utc;
use feed_core::{EventParams, Stage, StageFactory, StageInfo, Volume};
use feed_error::{IngestError, Result};
use tracing::debug;
use zip::write::SimpleFileOptions;
use zip::CompressionMethod;

use crate::verify_manifest::md5_of;

pub struct Pack {
    volume: Volume,
}

impl Pack {
    pub fn new(volume: Volume) -> Self {
        Self { volume }
    }

    fn options_for(&self, filename: &str) -> SimpleFileOptions {
        let extension = filename.rsplit('.').next().unwrap_or_default();
        let stored = self
            .volume
            .packagetype()
            .uncompressed_extensions
            .iter()
            .any(|e| e == extension);
        if stored {
            SimpleFileOptions::default().compression_method(CompressionMethod::Stored)
        } else {
            SimpleFileOptions::default().compression_method(CompressionMethod::Deflated)
        }
    }
}

impl Stage for Pack {
    fn identifier(&self) -> &'static str {
        "pack"
    }

    fn stage_info(&self) -> StageInfo {
        StageInfo::new("packed", "punted")
    }

    fn run(&mut self) -> Result<()> {
        let staging = self.volume.staging_directory();
        let zip_path = self.volume.zip_path();

        let mut members = self.volume.all_content_files()?;
        let source_mets = self.volume.source_mets_file()?;
        if let Some(name) = source_mets.file_name() {
            let name = name.to_owned();
            if !members.contains(&name) {
                members.push(name);
            }
        }

        let file = fs::File::create(&zip_path).map_err(|e| {
            IngestError::operation_failed("create zip", Some(zip_path.as_str()), e)
        })?;
        let mut writer = zip::ZipWriter::new(file);
        for member in &members {
            let path = staging.join(member);
            let bytes = fs::read(&path).map_err(|e| {
                IngestError::operation_failed("read file", Some(path.as_str()), e)
            })?;
            writer
                .start_file(member.as_str(), self.options_for(member))
                .map_err(|e| {
                    IngestError::operation_failed("write zip", Some(zip_path.as_str()), e)
                })?;
            writer.write_all(&bytes).map_err(|e| {
                IngestError::operation_failed("write zip", Some(zip_path.as_str()), e)
            })?;
        }
        writer.finish().map_err(|e| {
            IngestError::operation_failed("finish zip", Some(zip_path.as_str()), e)
        })?;

        self.volume.record_premis_event(
            "zip_compression",
            EventParams {
                date: Some(Utc::now()),
                outcome: None,
            },
        )?;

        let digest = md5_of(&zip_path)?;
        self.volume.record_premis_event(
            "zip_md5_create",
            EventParams {
                date: Some(Utc::now()),
                outcome: Some(format!("<eventOutcome>{digest}</eventOutcome>")),
            },
        )?;

        debug!(
            volume = %self.volume.identifier(),
            members = members.len(),
            zip = %zip_path,
            "AIP zip packed",
        );
        Ok(())
    }

    fn clean_failure(&mut self) -> Result<()> {
        let zip_path = self.volume.zip_path();
        if zip_path.is_file() {
            fs::remove_file(&zip_path).map_err(|e| {
                IngestError::operation_failed("remove zip", Some(zip_path.as_str()), e)
            })?;
        }
        Ok(())
    }
}

pub struct PackFactory;

impl StageFactory for PackFactory {
    fn identifier(&self) -> &'static str {
        "pack"
    }

    fn description(&self) -> &'static str {
        "Compress content files into the archival zip"
    }

    fn stage_info(&self) -> StageInfo {
        StageInfo::new("packed", "punted")
    }

    fn make(&self, volume: Volume) -> Box<dyn Stage> {
        Box::new(Pack::new(volume))
    }
}
