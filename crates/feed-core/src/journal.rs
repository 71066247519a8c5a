//! The error journal.
//!
//! Every stage failure lands here as a structured row in addition to the
//! log record and the failure status reported through the job callback.
//! The file implementation appends one JSON object per line.

use camino::Utf8PathBuf;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::sync::Mutex;

use feed_error::{IngestError, Result};

/// One journaled failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEntry {
    pub namespace: String,
    pub objid: String,
    pub stage: String,
    pub date: DateTime<Utc>,
    /// Error kind tag from the taxonomy, e.g. `OperationFailed`.
    pub operation: String,
    pub file: Option<String>,
    pub detail: String,
}

impl ErrorEntry {
    pub fn from_error(namespace: &str, objid: &str, stage: &str, error: &IngestError) -> Self {
        Self {
            namespace: namespace.to_owned(),
            objid: objid.to_owned(),
            stage: stage.to_owned(),
            date: Utc::now(),
            operation: error.kind().to_owned(),
            file: error.file().map(str::to_owned),
            detail: error.to_string(),
        }
    }
}

pub trait ErrorJournal: Send + Sync {
    fn record(&self, entry: &ErrorEntry) -> Result<()>;
}

/// Appends JSONL rows to a journal file.
pub struct FileErrorJournal {
    path: Utf8PathBuf,
    write_lock: Mutex<()>,
}

impl FileErrorJournal {
    pub fn new(path: Utf8PathBuf) -> Self {
        Self {
            path,
            write_lock: Mutex::new(()),
        }
    }
}

impl ErrorJournal for FileErrorJournal {
    fn record(&self, entry: &ErrorEntry) -> Result<()> {
        let line = serde_json::to_string(entry).map_err(|e| {
            IngestError::operation_failed("serialize error entry", Some(self.path.as_str()), e)
        })?;
        let _guard = self.write_lock.lock().expect("journal lock");
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| {
                IngestError::operation_failed("open error journal", Some(self.path.as_str()), e)
            })?;
        writeln!(file, "{line}").map_err(|e| {
            IngestError::operation_failed("append error journal", Some(self.path.as_str()), e)
        })?;
        Ok(())
    }
}

/// Journal used when no journal file is configured: failures still reach
/// the log, nothing is persisted.
#[derive(Debug, Default)]
pub struct LogErrorJournal;

impl ErrorJournal for LogErrorJournal {
    fn record(&self, entry: &ErrorEntry) -> Result<()> {
        tracing::warn!(
            namespace = %entry.namespace,
            objid = %entry.objid,
            stage = %entry.stage,
            kind = %entry.operation,
            detail = %entry.detail,
            "stage failure",
        );
        Ok(())
    }
}

/// Collecting journal for tests.
#[derive(Default)]
pub struct MemoryErrorJournal {
    entries: Mutex<Vec<ErrorEntry>>,
}

impl MemoryErrorJournal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<ErrorEntry> {
        self.entries.lock().expect("journal lock").clone()
    }
}

impl ErrorJournal for MemoryErrorJournal {
    fn record(&self, entry: &ErrorEntry) -> Result<()> {
        self.entries.lock().expect("journal lock").push(entry.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_journal_appends_one_line_per_entry() {
        let dir = tempfile::tempdir().unwrap();
        let path =
            Utf8PathBuf::from_path_buf(dir.path().join("errors.jsonl")).unwrap();
        let journal = FileErrorJournal::new(path.clone());

        let error = IngestError::missing_field("checksum", "checksum.md5");
        let entry = ErrorEntry::from_error("mdp", "39015", "verify_manifest", &error);
        journal.record(&entry).unwrap();
        journal.record(&entry).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.lines().count(), 2);
        let parsed: ErrorEntry = serde_json::from_str(text.lines().next().unwrap()).unwrap();
        assert_eq!(parsed.operation, "MissingField");
        assert_eq!(parsed.file.as_deref(), Some("checksum.md5"));
    }
}
