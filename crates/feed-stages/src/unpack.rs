//! Unpack: extract the SIP archive into the staging directory.

use std::fs;

use feed_core::{Stage, StageFactory, StageInfo, Volume};
use feed_error::{IngestError, Result};
use tracing::debug;

pub struct Unpack {
    volume: Volume,
}

impl Unpack {
    pub fn new(volume: Volume) -> Self {
        Self { volume }
    }

    /// Providers often zip a wrapping directory. When extraction leaves a
    /// single directory and nothing else, its contents are hoisted into
    /// the staging root.
    fn flatten_single_directory(&self) -> Result<()> {
        let staging = self.volume.staging_directory();
        let mut dirs = Vec::new();
        let mut files = 0usize;
        for entry in fs::read_dir(&staging).map_err(|e| {
            IngestError::operation_failed("list staging", Some(staging.as_str()), e)
        })? {
            let entry = entry.map_err(|e| {
                IngestError::operation_failed("list staging", Some(staging.as_str()), e)
            })?;
            if entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                dirs.push(entry.path());
            } else {
                files += 1;
            }
        }
        if files > 0 || dirs.len() != 1 {
            return Ok(());
        }

        let wrapper = dirs.remove(0);
        for entry in fs::read_dir(&wrapper).map_err(|e| {
            IngestError::operation_failed("list staging", Some(staging.as_str()), e)
        })? {
            let entry = entry.map_err(|e| {
                IngestError::operation_failed("list staging", Some(staging.as_str()), e)
            })?;
            let target = staging.as_std_path().join(entry.file_name());
            fs::rename(entry.path(), &target).map_err(|e| {
                let source = entry.path().to_string_lossy().into_owned();
                IngestError::operation_failed("flatten staging", Some(&source), e)
            })?;
        }
        fs::remove_dir(&wrapper).map_err(|e| {
            let wrapper = wrapper.to_string_lossy().into_owned();
            IngestError::operation_failed("flatten staging", Some(&wrapper), e)
        })?;
        Ok(())
    }
}

impl Stage for Unpack {
    fn identifier(&self) -> &'static str {
        "unpack"
    }

    fn stage_info(&self) -> StageInfo {
        StageInfo::new("unpacked", "punted")
    }

    fn run(&mut self) -> Result<()> {
        let sip = self.volume.sip_path();
        if !sip.is_file() {
            return Err(IngestError::missing_field("SIP", sip.to_string()));
        }

        let staging = self.volume.mk_staging_directory()?;
        let file = fs::File::open(&sip)
            .map_err(|e| IngestError::operation_failed("open SIP", Some(sip.as_str()), e))?;
        let mut archive = zip::ZipArchive::new(file)
            .map_err(|e| IngestError::operation_failed("read SIP", Some(sip.as_str()), e))?;
        archive
            .extract(staging.as_std_path())
            .map_err(|e| IngestError::operation_failed("unzip SIP", Some(sip.as_str()), e))?;
        self.flatten_single_directory()?;

        debug!(volume = %self.volume.identifier(), files = archive.len(), "SIP unpacked");
        Ok(())
    }

    fn clean_failure(&mut self) -> Result<()> {
        self.volume.clean_staging()
    }
}

pub struct UnpackFactory;

impl StageFactory for UnpackFactory {
    fn identifier(&self) -> &'static str {
        "unpack"
    }

    fn description(&self) -> &'static str {
        "Extract the submitted package into staging"
    }

    fn stage_info(&self) -> StageInfo {
        StageInfo::new("unpacked", "punted")
    }

    fn make(&self, volume: Volume) -> Box<dyn Stage> {
        Box::new(Unpack::new(volume))
    }
}
