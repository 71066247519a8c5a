//! Handle: spool a persistent-identifier registration.
//!
//! The handle service itself is an external collaborator; this stage
//! appends one registration record to its spool. A deployment without a
//! handle configuration skips minting.

use serde_yaml::Value;
use std::fs::OpenOptions;
use std::io::Write;

use chrono::Utc;
use feed_core::{Stage, StageFactory, StageInfo, Volume};
use feed_error::{IngestError, Result};
use tracing::{debug, info};

pub struct Handle {
    volume: Volume,
}

impl Handle {
    pub fn new(volume: Volume) -> Self {
        Self { volume }
    }
}

impl Stage for Handle {
    fn identifier(&self) -> &'static str {
        "handle"
    }

    fn stage_info(&self) -> StageInfo {
        StageInfo::new("handled", "punted")
    }

    fn run(&mut self) -> Result<()> {
        let config = self.volume.engine().config();
        let Some(handle_config) = &config.handle else {
            debug!(volume = %self.volume.identifier(), "handle service not configured; skipping");
            return Ok(());
        };

        let handle = format!("{}/{}", handle_config.root_admin, self.volume.identifier());
        let url = self
            .volume
            .resolve("repo_url_base")
            .ok()
            .and_then(|v: Value| v.as_str().map(str::to_owned))
            .or_else(|| config.repo_url_base.clone())
            .map(|base| format!("{base}?id={}", self.volume.identifier()));

        let record = serde_yaml::to_string(&serde_yaml::Value::Mapping(
            [
                ("handle", Value::from(handle.as_str())),
                ("local_admin", Value::from(handle_config.local_admin.as_str())),
                ("url", Value::from(url.as_deref().unwrap_or_default())),
                ("created", Value::from(Utc::now().to_rfc3339())),
            ]
            .into_iter()
            .map(|(k, v)| (Value::from(k), v))
            .collect::<serde_yaml::Mapping>(),
        ))
        .map_err(|e| IngestError::operation_failed("serialize handle record", None, e))?;

        let spool = &handle_config.spool;
        if let Some(parent) = spool.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                IngestError::operation_failed("create handle spool", Some(parent.as_str()), e)
            })?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(spool)
            .map_err(|e| {
                IngestError::operation_failed("open handle spool", Some(spool.as_str()), e)
            })?;
        writeln!(file, "---\n{}", record.trim_end()).map_err(|e| {
            IngestError::operation_failed("append handle spool", Some(spool.as_str()), e)
        })?;

        info!(volume = %self.volume.identifier(), handle = %handle, "handle spooled");
        Ok(())
    }
}

pub struct HandleFactory;

impl StageFactory for HandleFactory {
    fn identifier(&self) -> &'static str {
        "handle"
    }

    fn description(&self) -> &'static str {
        "Spool a persistent handle registration"
    }

    fn stage_info(&self) -> StageInfo {
        StageInfo::new("handled", "punted")
    }

    fn make(&self, volume: Volume) -> Box<dyn Stage> {
        Box::new(Handle::new(volume))
    }
}
