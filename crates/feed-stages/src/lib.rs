//! Concrete ingest stages and builtin descriptors.
//!
//! One module per stage, in pipeline order. [`builtin::install`] wires
//! all of them plus the shipped namespace and package-type descriptors
//! into a registry; it is the startup hook that replaces runtime plugin
//! scanning.

pub mod builtin;
pub mod collate;
pub mod handle;
pub mod mets;
pub mod pack;
pub mod source_mets;
pub mod unpack;
pub mod validate;
pub mod verify_manifest;

pub use builtin::install;
