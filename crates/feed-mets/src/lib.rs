//! METS assembly for archival packages.
//!
//! The assembler produces the canonical AIP METS for a volume, merging
//! provenance from three places without duplication: events already in
//! the repository copy (a reingest), events carried by the source METS,
//! and events generated during this run. See [`assembler::MetsAssembler`]
//! for the full recipe.

pub mod assembler;
pub mod premis;
pub mod validate;

pub use assembler::MetsAssembler;
pub use validate::validate_xml;
