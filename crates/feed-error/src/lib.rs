//! Error taxonomy for the feed ingest pipeline.
//!
//! Every stage boundary in the pipeline speaks [`IngestError`]. A stage that
//! hits one records it, reports failure to the runner, and never unwinds
//! across the runner boundary. The variants mirror the failure classes the
//! pipeline distinguishes when journaling and reporting:
//!
//! | Variant | Meaning |
//! |---------|---------|
//! | `OperationFailed` | A filesystem or subprocess operation failed |
//! | `BadField` | A structural expectation on the SIP did not hold |
//! | `MissingField` | A required SIP artifact is absent |
//! | `UnknownSubclass` | A registry lookup missed |
//! | `UnknownKey` | A configuration key is undefined in every layer |
//! | `InvalidRepositoryPremis` | The repository METS carries unusable provenance |
//! | `InvalidSourcePremis` | The source METS carries unusable provenance |
//! | `InvalidMets` | The assembled METS failed schema validation |
//! | `MissingMarc` | The source METS has no MARC descriptive section |

use std::fmt;
use thiserror::Error;

/// Result alias used across the ingest pipeline.
pub type Result<T, E = IngestError> = std::result::Result<T, E>;

/// Library-level error type carried across every stage boundary.
#[derive(Error, Debug)]
pub enum IngestError {
    /// A filesystem or subprocess operation failed.
    #[error("operation {operation} failed{}: {detail}", fmt_file(.file))]
    OperationFailed {
        operation: String,
        file: Option<String>,
        detail: String,
    },

    /// A structural expectation on the SIP failed.
    #[error("bad field {field} in {file}{}", fmt_actual(.actual))]
    BadField {
        field: String,
        file: String,
        actual: Option<String>,
    },

    /// A required SIP artifact (MARC, METS, checksum file, ...) is absent.
    #[error("missing {field} for {file}")]
    MissingField { field: String, file: String },

    /// A factory lookup missed.
    #[error("unknown {kind} subclass: {identifier}")]
    UnknownSubclass { kind: String, identifier: String },

    /// A configuration key is not defined in any lookup layer.
    #[error("unknown configuration key: {key}")]
    UnknownKey { key: String },

    /// An event in the repository METS is missing its type or identifier.
    #[error("invalid PREMIS in repository METS: {detail}")]
    InvalidRepositoryPremis { detail: String },

    /// An event in the source METS has an unexpected shape.
    #[error("invalid PREMIS in source METS: {detail}")]
    InvalidSourcePremis { detail: String },

    /// The assembled METS did not validate.
    #[error("invalid METS at {path}: {detail}")]
    InvalidMets { path: String, detail: String },

    /// The source METS has no MARC descriptive metadata section.
    #[error("no MARC metadata found in source METS")]
    MissingMarc,

    /// The package type declares no image filegroup, so the volume has no
    /// page count.
    #[error("no image filegroup present for {file}")]
    MissingImageGroup { file: String },

    /// The global configuration file is unusable.
    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl IngestError {
    /// Shorthand for the most common variant.
    pub fn operation_failed(
        operation: impl Into<String>,
        file: Option<&str>,
        detail: impl fmt::Display,
    ) -> Self {
        Self::OperationFailed {
            operation: operation.into(),
            file: file.map(str::to_owned),
            detail: detail.to_string(),
        }
    }

    pub fn bad_field(field: impl Into<String>, file: impl Into<String>) -> Self {
        Self::BadField {
            field: field.into(),
            file: file.into(),
            actual: None,
        }
    }

    pub fn missing_field(field: impl Into<String>, file: impl Into<String>) -> Self {
        Self::MissingField {
            field: field.into(),
            file: file.into(),
        }
    }

    /// Short machine-readable kind tag, used by the error journal.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::OperationFailed { .. } => "OperationFailed",
            Self::BadField { .. } => "BadField",
            Self::MissingField { .. } => "MissingField",
            Self::UnknownSubclass { .. } => "UnknownSubclass",
            Self::UnknownKey { .. } => "UnknownKey",
            Self::InvalidRepositoryPremis { .. } => "InvalidRepositoryPREMIS",
            Self::InvalidSourcePremis { .. } => "InvalidSourcePREMIS",
            Self::InvalidMets { .. } => "InvalidMETS",
            Self::MissingMarc => "MissingMARC",
            Self::MissingImageGroup { .. } => "MissingImageGroup",
            Self::Config(_) => "Config",
            Self::Io(_) => "IO",
        }
    }

    /// The file the error is about, when one is known.
    pub fn file(&self) -> Option<&str> {
        match self {
            Self::OperationFailed { file, .. } => file.as_deref(),
            Self::BadField { file, .. } | Self::MissingField { file, .. } => Some(file),
            Self::InvalidMets { path, .. } => Some(path),
            _ => None,
        }
    }
}

fn fmt_file(file: &Option<String>) -> String {
    match file {
        Some(f) => format!(" on {f}"),
        None => String::new(),
    }
}

fn fmt_actual(actual: &Option<String>) -> String {
    match actual {
        Some(a) => format!(" (got {a})"),
        None => String::new(),
    }
}
