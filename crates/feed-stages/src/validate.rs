//! VolumeValidator: content-level checks before packing.
//!
//! UTF-8 flags, page sequence continuity, and per-format validation. The
//! format validators are pluggable black boxes: when a characterization
//! tool is configured it is invoked as a subprocess with the usual exit-0
//! contract, otherwise a signature check stands in. Validator parameters
//! come through the merged three-layer override map, so a namespace can
//! tighten a bound the package type leaves loose.

use serde_yaml::Value;
use std::collections::BTreeMap;
use std::fs;
use std::process::Command;

use chrono::Utc;
use feed_core::{EventParams, Stage, StageFactory, StageInfo, Volume};
use feed_error::{IngestError, Result};
use tracing::{debug, warn};

/// JP2 signature box.
const JP2_MAGIC: &[u8] = &[0x00, 0x00, 0x00, 0x0c, 0x6a, 0x50, 0x20, 0x20, 0x0d, 0x0a, 0x87, 0x0a];

pub struct VolumeValidator {
    volume: Volume,
}

impl VolumeValidator {
    pub fn new(volume: Volume) -> Self {
        Self { volume }
    }

    fn check_utf8(&self) -> Result<()> {
        let staging = self.volume.staging_directory();
        for file in self.volume.utf8_files()? {
            let bytes = fs::read(staging.join(&file)).map_err(|e| {
                IngestError::operation_failed("read file", Some(&file), e)
            })?;
            if std::str::from_utf8(&bytes).is_err() {
                return Err(IngestError::BadField {
                    field: "utf8".to_owned(),
                    file,
                    actual: None,
                });
            }
        }
        Ok(())
    }

    fn check_sequence(&self) -> Result<()> {
        let pages = self.volume.file_groups_by_page()?;
        if self.volume.packagetype().allow_sequence_gaps {
            return Ok(());
        }
        let mut expected = 1u32;
        for seq in pages.keys() {
            if *seq != expected {
                return Err(IngestError::BadField {
                    field: "sequence".to_owned(),
                    file: self.volume.identifier(),
                    actual: Some(format!("expected {expected}, found {seq}")),
                });
            }
            expected += 1;
        }
        Ok(())
    }

    fn check_formats(&self) -> Result<()> {
        let staging = self.volume.staging_directory();
        for file in self.volume.jhove_files()? {
            let validator_id = match file.rsplit('.').next() {
                Some("jp2") => "JPEG2000",
                Some("tif") | Some("tiff") => "TIFF",
                _ => continue,
            };
            let params = self.volume.validation_overrides(validator_id);
            validate_format(
                self.volume.engine().config().jhove.as_deref(),
                validator_id,
                &staging.join(&file),
                &params,
            )?;
        }
        Ok(())
    }
}

impl Stage for VolumeValidator {
    fn identifier(&self) -> &'static str {
        "validate"
    }

    fn stage_info(&self) -> StageInfo {
        StageInfo::new("validated", "punted")
    }

    fn run(&mut self) -> Result<()> {
        self.check_utf8()?;
        self.check_sequence()?;
        self.check_formats()?;

        self.volume.record_premis_event(
            "package_validation",
            EventParams {
                date: Some(Utc::now()),
                outcome: Some("<eventOutcome>pass</eventOutcome>".to_owned()),
            },
        )?;
        debug!(volume = %self.volume.identifier(), "volume validated");
        Ok(())
    }
}

/// Validate one file. With a characterization tool configured, the tool
/// decides; without one, a format signature check stands in. Parameters
/// are forwarded to the tool as `key=value` arguments.
fn validate_format(
    tool: Option<&str>,
    validator_id: &str,
    path: &camino::Utf8Path,
    params: &BTreeMap<String, Value>,
) -> Result<()> {
    if let Some(invocation) = tool {
        let mut words = invocation.split_whitespace();
        let program = words.next().ok_or_else(|| {
            IngestError::Config("jhove invocation line is empty".to_owned())
        })?;
        let mut command = Command::new(program);
        command.args(words);
        for (key, value) in params {
            if let Some(rendered) = render_param(value) {
                command.arg(format!("{key}={rendered}"));
            }
        }
        let output = command.arg(path.as_str()).output().map_err(|e| {
            IngestError::operation_failed("run format validator", Some(program), e)
        })?;
        if !output.status.success() {
            return Err(IngestError::BadField {
                field: validator_id.to_owned(),
                file: path.to_string(),
                actual: Some(String::from_utf8_lossy(&output.stderr).trim().to_owned()),
            });
        }
        return Ok(());
    }

    let bytes = fs::read(path)
        .map_err(|e| IngestError::operation_failed("read file", Some(path.as_str()), e))?;
    let signature_ok = match validator_id {
        "JPEG2000" => bytes.starts_with(JP2_MAGIC),
        "TIFF" => bytes.starts_with(b"II*\0") || bytes.starts_with(b"MM\0*"),
        other => {
            warn!(validator = other, "no builtin signature check; accepting");
            true
        }
    };
    if !signature_ok {
        return Err(IngestError::BadField {
            field: validator_id.to_owned(),
            file: path.to_string(),
            actual: Some("format signature mismatch".to_owned()),
        });
    }
    Ok(())
}

fn render_param(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

pub struct VolumeValidatorFactory;

impl StageFactory for VolumeValidatorFactory {
    fn identifier(&self) -> &'static str {
        "validate"
    }

    fn description(&self) -> &'static str {
        "Validate content files and page sequences"
    }

    fn stage_info(&self) -> StageInfo {
        StageInfo::new("validated", "punted")
    }

    fn make(&self, volume: Volume) -> Box<dyn Stage> {
        Box::new(VolumeValidator::new(volume))
    }
}
