//! Core of the feed ingest engine.
//!
//! This crate holds the pieces every ingest shares, independent of any
//! particular content provider: the descriptor registry, the layered
//! configuration resolver, the [`Volume`] runtime object, the [`Stage`]
//! contract, the single-shot [`Job`] and the worker-pool [`Runner`], plus
//! PREMIS event persistence and the error journal.
//!
//! Concrete stages and the builtin namespace/package-type descriptors live
//! in `feed-stages`; METS assembly lives in `feed-mets`.

pub mod engine;
pub mod events;
pub mod job;
pub mod journal;
pub mod namespace;
pub mod packagetype;
pub mod registry;
pub mod resolver;
pub mod runner;
pub mod stage;
pub mod types;
pub mod volume;

pub use engine::Engine;
pub use events::{make_premis_uuid, EventParams, EventStore, FileEventStore, MemoryEventStore, PremisRecord, HT_NAMESPACE};
pub use job::{Job, JobParams, JobUpdate, UpdateCallback};
pub use journal::{ErrorEntry, ErrorJournal, FileErrorJournal, LogErrorJournal, MemoryErrorJournal};
pub use namespace::Namespace;
pub use packagetype::{FileGroupSpec, PackageType};
pub use registry::Registry;
pub use runner::Runner;
pub use stage::{Stage, StageFactory, StageInfo};
pub use types::{Identifier, Status};
pub use volume::{FileGroup, PageInfo, Volume};
