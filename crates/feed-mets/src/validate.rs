//! External XML schema validation.
//!
//! The validator is a subprocess named by the `xerces` configuration key:
//! exit 0 means the document validates, anything else fails the METS with
//! the tool's output as detail. When no validator is configured the check
//! is skipped with a warning; the assembler has already re-parsed the
//! document, so well-formedness is still guaranteed.

use camino::Utf8Path;
use std::process::Command;

use feed_config::Config;
use feed_error::{IngestError, Result};
use tracing::{debug, warn};

/// Validate `path` with the configured external validator.
pub fn validate_xml(config: &Config, path: &Utf8Path) -> Result<()> {
    let Some(invocation) = &config.xerces else {
        warn!(path = %path, "no XML validator configured; skipping schema validation");
        return Ok(());
    };

    let mut words = invocation.split_whitespace();
    let program = words.next().ok_or_else(|| {
        IngestError::Config("xerces invocation line is empty".to_owned())
    })?;
    let program = which::which(program).map_err(|e| {
        IngestError::operation_failed("resolve XML validator", Some(program), e)
    })?;

    let output = Command::new(&program)
        .args(words)
        .arg(path.as_str())
        .output()
        .map_err(|e| {
            let program = program.to_string_lossy();
            IngestError::operation_failed("run XML validator", Some(program.as_ref()), e)
        })?;

    if output.status.success() {
        debug!(path = %path, "METS validated");
        return Ok(());
    }

    let mut detail = String::from_utf8_lossy(&output.stderr).trim().to_owned();
    if detail.is_empty() {
        detail = String::from_utf8_lossy(&output.stdout).trim().to_owned();
    }
    Err(IngestError::InvalidMets {
        path: path.to_string(),
        detail: format!("validator exited {}: {detail}", output.status),
    })
}
