//! Mets: assemble the AIP METS document.

use feed_core::{Stage, StageFactory, StageInfo, Volume};
use feed_error::Result;
use feed_mets::MetsAssembler;
use tracing::debug;

pub struct Mets {
    volume: Volume,
}

impl Mets {
    pub fn new(volume: Volume) -> Self {
        Self { volume }
    }
}

impl Stage for Mets {
    fn identifier(&self) -> &'static str {
        "mets"
    }

    fn stage_info(&self) -> StageInfo {
        StageInfo::new("metsed", "punted")
    }

    fn run(&mut self) -> Result<()> {
        let path = MetsAssembler::new(self.volume.clone()).assemble()?;
        debug!(volume = %self.volume.identifier(), path = %path, "METS written");
        Ok(())
    }
}

pub struct MetsFactory;

impl StageFactory for MetsFactory {
    fn identifier(&self) -> &'static str {
        "mets"
    }

    fn description(&self) -> &'static str {
        "Assemble and validate the archival METS"
    }

    fn stage_info(&self) -> StageInfo {
        StageInfo::new("metsed", "punted")
    }

    fn make(&self, volume: Volume) -> Box<dyn Stage> {
        Box::new(Mets::new(volume))
    }
}
