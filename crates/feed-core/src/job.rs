//! Single-shot jobs.
//!
//! A job wraps one volume at one status. Running it looks up the stage
//! registered for that status, executes it, and reports the outcome
//! through the callback. The job's own status never mutates: continuation
//! is always a new job at the new status, which is what gives the
//! scheduler its natural retry and punt semantics.

use std::sync::Arc;

use feed_error::{IngestError, Result};
use tracing::{info, warn};

use crate::engine::Engine;
use crate::journal::ErrorEntry;
use crate::stage::StageFactory;
use crate::types::Status;
use crate::volume::Volume;

/// Construction parameters for one job.
#[derive(Debug, Clone)]
pub struct JobParams {
    pub namespace: String,
    pub packagetype: String,
    pub objid: String,
    pub status: Status,
    pub failure_count: u32,
}

impl JobParams {
    /// A fresh job at the `ready` status.
    pub fn new(namespace: &str, packagetype: &str, objid: &str) -> Self {
        Self {
            namespace: namespace.to_owned(),
            packagetype: packagetype.to_owned(),
            objid: objid.to_owned(),
            status: Status::ready(),
            failure_count: 0,
        }
    }

    /// The same job continued at a new status.
    pub fn advanced(&self, update: &JobUpdate) -> Self {
        Self {
            status: update.status.clone(),
            failure_count: update.failure_count,
            ..self.clone()
        }
    }
}

/// What a completed stage reports to the scheduler.
#[derive(Debug, Clone)]
pub struct JobUpdate {
    pub namespace: String,
    pub objid: String,
    pub status: Status,
    /// Whether the new status is terminal.
    pub release: bool,
    pub failed: bool,
    pub failure_count: u32,
}

/// Invoked exactly once per completed stage, before any subsequent stage
/// runs. The embedding scheduler checkpoints the volume here.
pub type UpdateCallback = Arc<dyn Fn(&JobUpdate) + Send + Sync>;

pub struct Job {
    engine: Arc<Engine>,
    params: JobParams,
    callback: UpdateCallback,
}

impl Job {
    pub fn new(engine: Arc<Engine>, params: JobParams, callback: UpdateCallback) -> Self {
        Self {
            engine,
            params,
            callback,
        }
    }

    pub fn status(&self) -> &Status {
        &self.params.status
    }

    /// Build the volume for this job.
    pub fn volume(&self) -> Result<Volume> {
        self.engine.volume(
            &self.params.namespace,
            &self.params.packagetype,
            &self.params.objid,
        )
    }

    fn stage_factory(&self) -> Result<Option<Arc<dyn StageFactory>>> {
        let packagetype = self.engine.registry().packagetype(&self.params.packagetype)?;
        match packagetype.stage_for(&self.params.status) {
            Some(stage_id) => Ok(Some(self.engine.registry().stage(stage_id)?)),
            None => Ok(None),
        }
    }

    /// Whether the stage map has a stage for this job's status.
    pub fn runnable(&self) -> bool {
        matches!(self.stage_factory(), Ok(Some(_)))
    }

    /// Execute the stage for this status and report the result. Consumes
    /// the job: a continuation is a new job built from the update.
    pub fn run(self) -> Result<JobUpdate> {
        let factory = self.stage_factory()?.ok_or_else(|| {
            IngestError::Config(format!(
                "no stage mapped for status {} in package type {}",
                self.params.status, self.params.packagetype
            ))
        })?;

        let volume = self.volume()?;
        let mut stage = factory.make(volume.clone());
        let stage_id = factory.identifier();

        info!(
            namespace = %self.params.namespace,
            objid = %self.params.objid,
            stage = stage_id,
            status = %self.params.status,
            "running stage",
        );

        let outcome = stage.run();
        let failed = outcome.is_err();
        if let Err(error) = &outcome {
            warn!(
                namespace = %self.params.namespace,
                objid = %self.params.objid,
                stage = stage_id,
                error = %error,
                "stage failed",
            );
            let entry = ErrorEntry::from_error(
                &self.params.namespace,
                &self.params.objid,
                stage_id,
                error,
            );
            if let Err(journal_error) = self.engine.journal().record(&entry) {
                warn!(error = %journal_error, "error journal write failed");
            }
        }

        // Cleanup failures are logged, never escalated: the transition is
        // already decided by the stage outcome.
        if let Err(e) = stage.clean_always() {
            warn!(stage = stage_id, error = %e, "clean_always failed");
        }
        let clean = if failed {
            stage.clean_failure()
        } else {
            stage.clean_success()
        };
        if let Err(e) = clean {
            warn!(stage = stage_id, error = %e, "stage cleanup failed");
        }

        let stage_info = stage.stage_info();
        let status = if failed {
            stage_info.failure_state
        } else {
            stage_info.success_state
        };
        let update = JobUpdate {
            namespace: self.params.namespace.clone(),
            objid: self.params.objid.clone(),
            release: self.engine.config().is_release_state(status.as_str()),
            failed,
            failure_count: self.params.failure_count + u32::from(failed),
            status,
        };
        (self.callback)(&update);
        Ok(update)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::namespace::Namespace;
    use crate::packagetype::PackageType;
    use crate::registry::Registry;
    use crate::stage::{Stage, StageInfo};
    use camino::Utf8PathBuf;
    use feed_config::Config;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    struct ScriptedStage {
        info: StageInfo,
        fail: bool,
    }

    impl Stage for ScriptedStage {
        fn identifier(&self) -> &'static str {
            "scripted"
        }

        fn stage_info(&self) -> StageInfo {
            self.info.clone()
        }

        fn run(&mut self) -> Result<()> {
            if self.fail {
                Err(IngestError::bad_field("manifest", "extra.jp2"))
            } else {
                Ok(())
            }
        }
    }

    struct ScriptedFactory {
        id: &'static str,
        info: StageInfo,
        fail: bool,
    }

    impl StageFactory for ScriptedFactory {
        fn identifier(&self) -> &'static str {
            self.id
        }

        fn description(&self) -> &'static str {
            "scripted test stage"
        }

        fn stage_info(&self) -> StageInfo {
            self.info.clone()
        }

        fn make(&self, _volume: Volume) -> Box<dyn Stage> {
            Box::new(ScriptedStage {
                info: self.info.clone(),
                fail: self.fail,
            })
        }
    }

    fn engine_with_stage(fail: bool) -> (tempfile::TempDir, Arc<Engine>) {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        let config = Config::test_fixture(&root);

        let mut registry = Registry::new();
        registry
            .register_namespace(Namespace::new("test", "Test institution"))
            .unwrap();
        let mut pt = PackageType::new("simple", "Generic single-item SIP");
        pt.stage_map = BTreeMap::from([(Status::ready(), "scripted".to_owned())]);
        registry.register_packagetype(pt).unwrap();
        registry
            .register_stage(Arc::new(ScriptedFactory {
                id: "scripted",
                info: StageInfo::new("collated", "punted"),
                fail,
            }))
            .unwrap();

        (dir, Engine::in_memory(config, registry))
    }

    fn collecting_callback() -> (UpdateCallback, Arc<Mutex<Vec<JobUpdate>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let callback: UpdateCallback = Arc::new(move |update: &JobUpdate| {
            sink.lock().unwrap().push(update.clone());
        });
        (callback, seen)
    }

    #[test]
    fn success_takes_the_declared_success_state() {
        let (_dir, engine) = engine_with_stage(false);
        let (callback, seen) = collecting_callback();
        let job = Job::new(engine, JobParams::new("test", "simple", "39002"), callback);
        assert!(job.runnable());

        let update = job.run().unwrap();
        assert_eq!(update.status, Status::collated());
        assert!(update.release);
        assert!(!update.failed);
        assert_eq!(update.failure_count, 0);
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn failure_takes_the_declared_failure_state_and_counts() {
        let (_dir, engine) = engine_with_stage(true);
        let (callback, seen) = collecting_callback();
        let job = Job::new(engine, JobParams::new("test", "simple", "39002"), callback);

        let update = job.run().unwrap();
        assert_eq!(update.status, Status::punted());
        assert!(update.release);
        assert!(update.failed);
        assert_eq!(update.failure_count, 1);

        let callbacks = seen.lock().unwrap();
        assert_eq!(callbacks.len(), 1);
        assert!(callbacks[0].failed);
    }

    #[test]
    fn job_without_mapped_stage_is_not_runnable() {
        let (_dir, engine) = engine_with_stage(false);
        let (callback, _) = collecting_callback();
        let mut params = JobParams::new("test", "simple", "39002");
        params.status = Status::new("no_such_status");
        let job = Job::new(engine, params, callback);
        assert!(!job.runnable());
    }

    #[test]
    fn advanced_params_carry_status_and_failure_count() {
        let params = JobParams::new("test", "simple", "39002");
        let update = JobUpdate {
            namespace: "test".into(),
            objid: "39002".into(),
            status: Status::new("unpacked"),
            release: false,
            failed: true,
            failure_count: 2,
        };
        let next = params.advanced(&update);
        assert_eq!(next.status, Status::new("unpacked"));
        assert_eq!(next.failure_count, 2);
        assert_eq!(next.packagetype, "simple");
    }
}
