//! SourceMets: locate and check the provider's METS document.

use feed_core::{Stage, StageFactory, StageInfo, Volume};
use feed_error::Result;
use feed_mets::validate_xml;
use tracing::debug;

pub struct SourceMets {
    volume: Volume,
}

impl SourceMets {
    pub fn new(volume: Volume) -> Self {
        Self { volume }
    }
}

impl Stage for SourceMets {
    fn identifier(&self) -> &'static str {
        "source_mets"
    }

    fn stage_info(&self) -> StageInfo {
        StageInfo::new("src_metsed", "punted")
    }

    fn run(&mut self) -> Result<()> {
        // Exactly one file may match the package type's pattern.
        let path = self.volume.source_mets_file()?;

        // Parse (and cache) the document; a malformed METS fails here
        // rather than surprising a later stage.
        self.volume.source_mets_xpc()?;

        // Schema validation through the external validator, when one is
        // configured.
        validate_xml(self.volume.engine().config(), &path)?;

        debug!(volume = %self.volume.identifier(), path = %path, "source METS accepted");
        Ok(())
    }
}

pub struct SourceMetsFactory;

impl StageFactory for SourceMetsFactory {
    fn identifier(&self) -> &'static str {
        "source_mets"
    }

    fn description(&self) -> &'static str {
        "Locate and check the provider METS document"
    }

    fn stage_info(&self) -> StageInfo {
        StageInfo::new("src_metsed", "punted")
    }

    fn make(&self, volume: Volume) -> Box<dyn Stage> {
        Box::new(SourceMets::new(volume))
    }
}
