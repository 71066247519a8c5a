//! The engine context.
//!
//! Everything that used to be process-global in this kind of system —
//! configuration, the descriptor registry, the event store, the error
//! journal — is carried explicitly by an [`Engine`] handed to jobs and
//! volumes. Tests substitute fixtures by building their own.

use std::sync::Arc;

use feed_config::Config;
use feed_error::{IngestError, Result};

use crate::events::{EventStore, FileEventStore, MemoryEventStore};
use crate::journal::{ErrorJournal, FileErrorJournal, LogErrorJournal};
use crate::registry::Registry;
use crate::types::Identifier;
use crate::volume::Volume;

pub struct Engine {
    config: Config,
    registry: Registry,
    events: Arc<dyn EventStore>,
    journal: Arc<dyn ErrorJournal>,
}

impl Engine {
    /// Build an engine with explicit collaborators.
    pub fn new(
        config: Config,
        registry: Registry,
        events: Arc<dyn EventStore>,
        journal: Arc<dyn ErrorJournal>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            registry,
            events,
            journal,
        })
    }

    /// Build an engine with the standard stores: a file-backed event
    /// store under `premis_store` and a JSONL error journal next to it.
    pub fn with_default_stores(config: Config, registry: Registry) -> Result<Arc<Self>> {
        let store_root = config
            .premis_store
            .clone()
            .ok_or_else(|| IngestError::Config("premis_store is not configured".to_owned()))?;
        let journal: Arc<dyn ErrorJournal> = match &config.errors_journal {
            Some(path) => Arc::new(FileErrorJournal::new(path.clone())),
            None => Arc::new(LogErrorJournal),
        };
        Ok(Self::new(
            config,
            registry,
            Arc::new(FileEventStore::new(store_root)),
            journal,
        ))
    }

    /// Build an engine over in-memory stores.
    pub fn in_memory(config: Config, registry: Registry) -> Arc<Self> {
        Self::new(
            config,
            registry,
            Arc::new(MemoryEventStore::new()),
            Arc::new(LogErrorJournal),
        )
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn events(&self) -> &Arc<dyn EventStore> {
        &self.events
    }

    pub fn journal(&self) -> &Arc<dyn ErrorJournal> {
        &self.journal
    }

    /// Materialize the volume for one item. Fails when the namespace or
    /// package type is not registered.
    pub fn volume(
        self: &Arc<Self>,
        namespace: &str,
        packagetype: &str,
        objid: &str,
    ) -> Result<Volume> {
        let ns = self.registry.namespace(namespace)?;
        let pt = self.registry.packagetype(packagetype)?;
        Ok(Volume::new(
            Arc::clone(self),
            ns,
            pt,
            Identifier::new(namespace, objid),
        ))
    }

    /// Validate every registered package type against the registry and
    /// the event catalog. Run once after all install hooks.
    pub fn check_descriptors(&self) -> Result<()> {
        for packagetype in self.registry.packagetypes() {
            packagetype.validate(&self.registry, &self.config.premis)?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}
