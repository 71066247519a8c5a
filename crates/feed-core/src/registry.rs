//! The descriptor registry.
//!
//! Namespaces, package types and stage factories are indexed by string
//! identifier. Registration happens once at startup from each plugin
//! module's install hook; duplicates are a fatal configuration error and
//! lookups of unknown identifiers fail with `UnknownSubclass`.

use std::collections::BTreeMap;
use std::sync::Arc;

use feed_error::{IngestError, Result};

use crate::namespace::Namespace;
use crate::packagetype::PackageType;
use crate::stage::StageFactory;

#[derive(Default)]
pub struct Registry {
    namespaces: BTreeMap<String, Arc<Namespace>>,
    packagetypes: BTreeMap<String, Arc<PackageType>>,
    stages: BTreeMap<String, Arc<dyn StageFactory>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_namespace(&mut self, namespace: Namespace) -> Result<()> {
        let id = namespace.identifier.clone();
        if self.namespaces.insert(id.clone(), Arc::new(namespace)).is_some() {
            return Err(IngestError::Config(format!("duplicate namespace: {id}")));
        }
        Ok(())
    }

    pub fn register_packagetype(&mut self, packagetype: PackageType) -> Result<()> {
        let id = packagetype.identifier.clone();
        if self
            .packagetypes
            .insert(id.clone(), Arc::new(packagetype))
            .is_some()
        {
            return Err(IngestError::Config(format!("duplicate package type: {id}")));
        }
        Ok(())
    }

    pub fn register_stage(&mut self, factory: Arc<dyn StageFactory>) -> Result<()> {
        let id = factory.identifier().to_owned();
        if self.stages.insert(id.clone(), factory).is_some() {
            return Err(IngestError::Config(format!("duplicate stage: {id}")));
        }
        Ok(())
    }

    pub fn namespace(&self, identifier: &str) -> Result<Arc<Namespace>> {
        self.namespaces.get(identifier).cloned().ok_or_else(|| {
            IngestError::UnknownSubclass {
                kind: "namespace".to_owned(),
                identifier: identifier.to_owned(),
            }
        })
    }

    pub fn packagetype(&self, identifier: &str) -> Result<Arc<PackageType>> {
        self.packagetypes.get(identifier).cloned().ok_or_else(|| {
            IngestError::UnknownSubclass {
                kind: "packagetype".to_owned(),
                identifier: identifier.to_owned(),
            }
        })
    }

    pub fn stage(&self, identifier: &str) -> Result<Arc<dyn StageFactory>> {
        self.stages.get(identifier).cloned().ok_or_else(|| {
            IngestError::UnknownSubclass {
                kind: "stage".to_owned(),
                identifier: identifier.to_owned(),
            }
        })
    }

    /// Registered namespaces in identifier order.
    pub fn namespaces(&self) -> impl Iterator<Item = &Arc<Namespace>> {
        self.namespaces.values()
    }

    /// Registered package types in identifier order.
    pub fn packagetypes(&self) -> impl Iterator<Item = &Arc<PackageType>> {
        self.packagetypes.values()
    }

    /// Registered stage factories in identifier order.
    pub fn stages(&self) -> impl Iterator<Item = &Arc<dyn StageFactory>> {
        self.stages.values()
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("namespaces", &self.namespaces.keys().collect::<Vec<_>>())
            .field("packagetypes", &self.packagetypes.keys().collect::<Vec<_>>())
            .field("stages", &self.stages.keys().collect::<Vec<_>>())
            .finish()
    }
}
