//! The stage contract.
//!
//! A stage is one unit of pipeline work over a volume. Its success and
//! failure transitions are declared statically on the factory, which is
//! what makes the pipeline a declarative state machine: the runner never
//! computes a next status, it only picks between the two declared ones.
//!
//! Stages report failure by returning `Err`; the runner journals the
//! error, applies the declared failure state, and runs the cleanup hooks.
//! Nothing unwinds across the runner boundary.

use crate::types::Status;
use crate::volume::Volume;
use feed_error::Result;

/// Static transition declaration for a stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageInfo {
    pub success_state: Status,
    pub failure_state: Status,
}

impl StageInfo {
    pub fn new(success_state: &str, failure_state: &str) -> Self {
        Self {
            success_state: Status::new(success_state),
            failure_state: Status::new(failure_state),
        }
    }
}

/// One unit of work over a volume.
pub trait Stage: Send {
    /// The registered identifier of this stage.
    fn identifier(&self) -> &'static str;

    /// Declared transitions. Pure: no I/O, no mutation.
    fn stage_info(&self) -> StageInfo;

    /// Perform the work. `Err` means the stage failed and the runner will
    /// take the declared failure state.
    fn run(&mut self) -> Result<()>;

    /// Cleanup run after every attempt, success or failure.
    fn clean_always(&mut self) -> Result<()> {
        Ok(())
    }

    /// Cleanup run only after a successful attempt.
    fn clean_success(&mut self) -> Result<()> {
        Ok(())
    }

    /// Cleanup run only after a failed attempt.
    fn clean_failure(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Builds stage instances and carries the static metadata the registry
/// and the stage-map walker need without instantiating anything.
pub trait StageFactory: Send + Sync {
    fn identifier(&self) -> &'static str;

    fn description(&self) -> &'static str;

    /// Same declaration the built stage will report.
    fn stage_info(&self) -> StageInfo;

    fn make(&self, volume: Volume) -> Box<dyn Stage>;
}
