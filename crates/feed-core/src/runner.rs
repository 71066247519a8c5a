//! The runner: drives volumes to a release state.
//!
//! Within one volume, stages run serially: each job executes one stage,
//! reports through the callback, and the runner continues with a new job
//! at the reported status until a release state is reached. Across
//! volumes, a rayon pool sized by `dataset.threads` provides the
//! process-level parallelism; workers share nothing but the event store
//! and the journal.

use std::sync::Arc;

use feed_error::{IngestError, Result};
use rayon::prelude::*;
use tracing::info;

use crate::engine::Engine;
use crate::job::{Job, JobParams, JobUpdate, UpdateCallback};

pub struct Runner {
    engine: Arc<Engine>,
    callback: UpdateCallback,
}

impl Runner {
    /// A runner whose callback only logs. The embedding scheduler usually
    /// wants [`Runner::with_callback`] to checkpoint statuses.
    pub fn new(engine: Arc<Engine>) -> Self {
        Self::with_callback(
            engine,
            Arc::new(|update: &JobUpdate| {
                info!(
                    namespace = %update.namespace,
                    objid = %update.objid,
                    status = %update.status,
                    release = update.release,
                    failed = update.failed,
                    "status update",
                );
            }),
        )
    }

    pub fn with_callback(engine: Arc<Engine>, callback: UpdateCallback) -> Self {
        Self { engine, callback }
    }

    /// Run one volume from its current status to a release state. The
    /// callback fires once per completed stage, before the next stage
    /// starts.
    pub fn run_to_release(&self, mut params: JobParams) -> Result<JobUpdate> {
        // Generous upper bound: no stage map legitimately revisits a
        // status, so this only trips on a miswired descriptor.
        let max_steps = self
            .engine
            .registry()
            .packagetype(&params.packagetype)?
            .stage_map
            .len()
            + 2;

        for _ in 0..max_steps {
            let job = Job::new(
                Arc::clone(&self.engine),
                params.clone(),
                Arc::clone(&self.callback),
            );
            if !job.runnable() {
                return Err(IngestError::Config(format!(
                    "volume {}.{} stalled: no stage for status {}",
                    params.namespace, params.objid, params.status
                )));
            }
            let update = job.run()?;
            if update.release {
                return Ok(update);
            }
            params = params.advanced(&update);
        }
        Err(IngestError::Config(format!(
            "volume {}.{} did not release after {max_steps} stages; stage map cycles?",
            params.namespace, params.objid
        )))
    }

    /// Run a batch of volumes concurrently on a pool of
    /// `dataset.threads` workers. Each volume is driven serially by one
    /// worker; results come back in input order.
    pub fn run_batch(&self, batch: Vec<JobParams>) -> Result<Vec<Result<JobUpdate>>> {
        let threads = self.engine.config().dataset.threads;
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build()
            .map_err(|e| IngestError::Config(format!("cannot build worker pool: {e}")))?;

        Ok(pool.install(|| {
            batch
                .into_par_iter()
                .map(|params| self.run_to_release(params))
                .collect()
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::namespace::Namespace;
    use crate::packagetype::PackageType;
    use crate::registry::Registry;
    use crate::stage::{Stage, StageFactory, StageInfo};
    use crate::types::Status;
    use crate::volume::Volume;
    use camino::Utf8PathBuf;
    use feed_config::Config;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    struct NoopStage {
        id: &'static str,
        info: StageInfo,
    }

    impl Stage for NoopStage {
        fn identifier(&self) -> &'static str {
            self.id
        }

        fn stage_info(&self) -> StageInfo {
            self.info.clone()
        }

        fn run(&mut self) -> feed_error::Result<()> {
            Ok(())
        }
    }

    struct NoopFactory {
        id: &'static str,
        info: StageInfo,
    }

    impl StageFactory for NoopFactory {
        fn identifier(&self) -> &'static str {
            self.id
        }

        fn description(&self) -> &'static str {
            "no-op"
        }

        fn stage_info(&self) -> StageInfo {
            self.info.clone()
        }

        fn make(&self, _volume: Volume) -> Box<dyn Stage> {
            Box::new(NoopStage {
                id: self.id,
                info: self.info.clone(),
            })
        }
    }

    fn three_stage_engine() -> (tempfile::TempDir, Arc<Engine>) {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        let config = Config::test_fixture(&root);

        let mut registry = Registry::new();
        registry
            .register_namespace(Namespace::new("test", "Test institution"))
            .unwrap();
        let mut pt = PackageType::new("simple", "Generic single-item SIP");
        pt.stage_map = BTreeMap::from([
            (Status::ready(), "one".to_owned()),
            (Status::new("a"), "two".to_owned()),
            (Status::new("b"), "three".to_owned()),
        ]);
        registry.register_packagetype(pt).unwrap();
        for (id, next) in [("one", "a"), ("two", "b"), ("three", "collated")] {
            registry
                .register_stage(Arc::new(NoopFactory {
                    id,
                    info: StageInfo::new(next, "punted"),
                }))
                .unwrap();
        }

        (dir, Engine::in_memory(config, registry))
    }

    #[test]
    fn volume_advances_through_every_stage_to_release() {
        let (_dir, engine) = three_stage_engine();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let runner = Runner::with_callback(
            engine,
            Arc::new(move |update: &JobUpdate| {
                sink.lock().unwrap().push(update.status.clone());
            }),
        );

        let update = runner
            .run_to_release(JobParams::new("test", "simple", "39002"))
            .unwrap();
        assert_eq!(update.status, Status::collated());
        assert!(update.release);

        let statuses = seen.lock().unwrap();
        assert_eq!(
            statuses.as_slice(),
            [Status::new("a"), Status::new("b"), Status::collated()]
        );
    }

    #[test]
    fn batch_runs_every_volume_to_release() {
        let (_dir, engine) = three_stage_engine();
        let runner = Runner::new(engine);
        let batch = vec![
            JobParams::new("test", "simple", "39001"),
            JobParams::new("test", "simple", "39002"),
            JobParams::new("test", "simple", "39003"),
        ];
        let results = runner.run_batch(batch).unwrap();
        assert_eq!(results.len(), 3);
        for result in results {
            assert_eq!(result.unwrap().status, Status::collated());
        }
    }

    #[test]
    fn stalled_volume_is_an_error() {
        let (_dir, engine) = three_stage_engine();
        let runner = Runner::new(engine);
        let mut params = JobParams::new("test", "simple", "39002");
        params.status = Status::new("dead_end");
        assert!(runner.run_to_release(params).is_err());
    }
}
