//! PREMIS event persistence.
//!
//! Events are keyed by `(namespace, objid, eventtype)` with REPLACE
//! semantics: recording an event of a type an object already has
//! overwrites the stored row. Event identifiers are UUIDv5 over the
//! namespace, object, event type and wall-clock date, so a reingest that
//! records the same event at the same time mints the identical identifier.

use camino::Utf8PathBuf;
use chrono::{DateTime, SecondsFormat, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::sync::Mutex;
use uuid::Uuid;

use feed_error::{IngestError, Result};

/// Namespace UUID for deterministic PREMIS event identifiers.
pub const HT_NAMESPACE: Uuid = uuid::uuid!("09a5dad6-3484-11e0-9d45-077bd5215a96");

/// Render a datetime the way it participates in identifier derivation and
/// in the METS: RFC 3339 at second precision, UTC.
pub fn format_premis_date(date: &DateTime<Utc>) -> String {
    date.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Deterministic UUIDv5 for an event: two calls with identical arguments
/// yield identical UUIDs.
pub fn make_premis_uuid(
    namespace: &str,
    objid: &str,
    eventtype: &str,
    date: &DateTime<Utc>,
) -> Uuid {
    let name = format!(
        "{namespace}-{objid}-{eventtype}-{}",
        format_premis_date(date)
    );
    Uuid::new_v5(&HT_NAMESPACE, name.as_bytes())
}

/// Truncate to the second precision used everywhere events are compared.
pub fn truncate_date(date: DateTime<Utc>) -> DateTime<Utc> {
    date.with_nanosecond(0).unwrap_or(date)
}

/// Optional parameters for recording an event.
#[derive(Debug, Clone, Default)]
pub struct EventParams {
    /// Event time; defaults to now.
    pub date: Option<DateTime<Utc>>,
    /// Pre-rendered eventOutcomeInformation XML.
    pub outcome: Option<String>,
}

/// One stored event row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PremisRecord {
    pub eventid: Uuid,
    pub eventtype: String,
    pub date: DateTime<Utc>,
    pub outcome: Option<String>,
}

/// The one piece of shared mutable state in the pipeline. Implementations
/// must be safe for concurrent use from the worker pool; writes for a
/// single object come from a single worker.
pub trait EventStore: Send + Sync {
    /// Insert or overwrite the row for `(namespace, objid, eventtype)`.
    fn replace(&self, namespace: &str, objid: &str, record: PremisRecord) -> Result<()>;

    fn get(&self, namespace: &str, objid: &str, eventtype: &str)
        -> Result<Option<PremisRecord>>;

    /// All rows for an object, in event-type order.
    fn list(&self, namespace: &str, objid: &str) -> Result<Vec<PremisRecord>>;

    /// Remove every row for an object.
    fn clear(&self, namespace: &str, objid: &str) -> Result<()>;
}

/// File-backed store: one JSON document per object, written atomically
/// (tempfile then rename) so readers never observe a torn write.
pub struct FileEventStore {
    root: Utf8PathBuf,
}

impl FileEventStore {
    pub fn new(root: Utf8PathBuf) -> Self {
        Self { root }
    }

    fn object_path(&self, namespace: &str, objid: &str) -> Utf8PathBuf {
        self.root
            .join(namespace)
            .join(format!("{}.json", feed_pairtree::s2ppchars(objid)))
    }

    fn load(&self, namespace: &str, objid: &str) -> Result<BTreeMap<String, PremisRecord>> {
        let path = self.object_path(namespace, objid);
        if !path.exists() {
            return Ok(BTreeMap::new());
        }
        let text = fs::read_to_string(&path).map_err(|e| {
            IngestError::operation_failed("read premis store", Some(path.as_str()), e)
        })?;
        serde_json::from_str(&text).map_err(|e| {
            IngestError::operation_failed("parse premis store", Some(path.as_str()), e)
        })
    }

    fn save(
        &self,
        namespace: &str,
        objid: &str,
        rows: &BTreeMap<String, PremisRecord>,
    ) -> Result<()> {
        let path = self.object_path(namespace, objid);
        let parent = path.parent().unwrap_or(&self.root);
        fs::create_dir_all(parent).map_err(|e| {
            IngestError::operation_failed("create premis store", Some(parent.as_str()), e)
        })?;
        let mut temp = tempfile::NamedTempFile::new_in(parent).map_err(|e| {
            IngestError::operation_failed("stage premis store", Some(parent.as_str()), e)
        })?;
        let text = serde_json::to_string_pretty(rows).map_err(|e| {
            IngestError::operation_failed("serialize premis store", Some(path.as_str()), e)
        })?;
        temp.write_all(text.as_bytes()).map_err(|e| {
            IngestError::operation_failed("write premis store", Some(path.as_str()), e)
        })?;
        temp.persist(&path).map_err(|e| {
            IngestError::operation_failed("replace premis store", Some(path.as_str()), e)
        })?;
        Ok(())
    }
}

impl EventStore for FileEventStore {
    fn replace(&self, namespace: &str, objid: &str, record: PremisRecord) -> Result<()> {
        let mut rows = self.load(namespace, objid)?;
        rows.insert(record.eventtype.clone(), record);
        self.save(namespace, objid, &rows)
    }

    fn get(
        &self,
        namespace: &str,
        objid: &str,
        eventtype: &str,
    ) -> Result<Option<PremisRecord>> {
        Ok(self.load(namespace, objid)?.remove(eventtype))
    }

    fn list(&self, namespace: &str, objid: &str) -> Result<Vec<PremisRecord>> {
        Ok(self.load(namespace, objid)?.into_values().collect())
    }

    fn clear(&self, namespace: &str, objid: &str) -> Result<()> {
        let path = self.object_path(namespace, objid);
        if path.exists() {
            fs::remove_file(&path).map_err(|e| {
                IngestError::operation_failed("clear premis store", Some(path.as_str()), e)
            })?;
        }
        Ok(())
    }
}

/// In-memory store for tests.
#[derive(Default)]
pub struct MemoryEventStore {
    rows: Mutex<BTreeMap<(String, String), BTreeMap<String, PremisRecord>>>,
}

impl MemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl EventStore for MemoryEventStore {
    fn replace(&self, namespace: &str, objid: &str, record: PremisRecord) -> Result<()> {
        let mut rows = self.rows.lock().expect("event store lock");
        rows.entry((namespace.to_owned(), objid.to_owned()))
            .or_default()
            .insert(record.eventtype.clone(), record);
        Ok(())
    }

    fn get(
        &self,
        namespace: &str,
        objid: &str,
        eventtype: &str,
    ) -> Result<Option<PremisRecord>> {
        let rows = self.rows.lock().expect("event store lock");
        Ok(rows
            .get(&(namespace.to_owned(), objid.to_owned()))
            .and_then(|m| m.get(eventtype))
            .cloned())
    }

    fn list(&self, namespace: &str, objid: &str) -> Result<Vec<PremisRecord>> {
        let rows = self.rows.lock().expect("event store lock");
        Ok(rows
            .get(&(namespace.to_owned(), objid.to_owned()))
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default())
    }

    fn clear(&self, namespace: &str, objid: &str) -> Result<()> {
        let mut rows = self.rows.lock().expect("event store lock");
        rows.remove(&(namespace.to_owned(), objid.to_owned()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_date() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn uuids_are_deterministic_and_argument_sensitive() {
        let date = sample_date();
        let a = make_premis_uuid("mdp", "39015", "ingestion", &date);
        let b = make_premis_uuid("mdp", "39015", "ingestion", &date);
        assert_eq!(a, b);

        assert_ne!(a, make_premis_uuid("yale", "39015", "ingestion", &date));
        assert_ne!(a, make_premis_uuid("mdp", "39016", "ingestion", &date));
        assert_ne!(a, make_premis_uuid("mdp", "39015", "validation", &date));
        let later = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 1).unwrap();
        assert_ne!(a, make_premis_uuid("mdp", "39015", "ingestion", &later));
    }

    #[test]
    fn replace_semantics_keep_one_row_per_type() {
        let store = MemoryEventStore::new();
        let date = sample_date();
        let record = |outcome: &str| PremisRecord {
            eventid: make_premis_uuid("mdp", "39015", "ingestion", &date),
            eventtype: "ingestion".to_owned(),
            date,
            outcome: Some(outcome.to_owned()),
        };
        store.replace("mdp", "39015", record("first")).unwrap();
        store.replace("mdp", "39015", record("second")).unwrap();

        let rows = store.list("mdp", "39015").unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].outcome.as_deref(), Some("second"));
    }

    #[test]
    fn file_store_round_trips_and_clears() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        let store = FileEventStore::new(root);
        let date = sample_date();
        let record = PremisRecord {
            eventid: make_premis_uuid("mdp", "39015", "ingestion", &date),
            eventtype: "ingestion".to_owned(),
            date,
            outcome: None,
        };
        store.replace("mdp", "39015", record.clone()).unwrap();
        assert_eq!(
            store.get("mdp", "39015", "ingestion").unwrap(),
            Some(record)
        );
        store.clear("mdp", "39015").unwrap();
        assert!(store.get("mdp", "39015", "ingestion").unwrap().is_none());
    }

    #[test]
    fn premis_dates_render_at_second_precision() {
        let date = Utc.with_ymd_and_hms(2024, 6, 30, 12, 5, 9).unwrap();
        assert_eq!(format_premis_date(&date), "2024-06-30T12:05:09Z");
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn uuid_derivation_is_a_pure_function(
                namespace in "[a-z]{1,8}",
                objid in "[A-Za-z0-9.:/]{1,20}",
                eventtype in "[a-z ]{1,20}",
                secs in 0i64..4_000_000_000,
            ) {
                let date = Utc.timestamp_opt(secs, 0).single().unwrap();
                prop_assert_eq!(
                    make_premis_uuid(&namespace, &objid, &eventtype, &date),
                    make_premis_uuid(&namespace, &objid, &eventtype, &date),
                );
            }

            #[test]
            fn distinct_objects_never_share_uuids(
                namespace in "[a-z]{1,8}",
                objid in "[A-Za-z0-9]{1,20}",
                suffix in "[A-Za-z0-9]{1,4}",
                secs in 0i64..4_000_000_000,
            ) {
                let date = Utc.timestamp_opt(secs, 0).single().unwrap();
                let other = format!("{objid}{suffix}");
                prop_assert_ne!(
                    make_premis_uuid(&namespace, &objid, "ingestion", &date),
                    make_premis_uuid(&namespace, &other, "ingestion", &date),
                );
            }
        }
    }
}
