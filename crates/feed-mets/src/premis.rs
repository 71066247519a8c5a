//! PREMIS provenance extraction and event construction.
//!
//! Old events come out of the repository METS of a prior ingest; source
//! events come out of the provider's METS. Both are adopted into the new
//! document under the `PREMIS` prefix. Duplicate suppression works on
//! `(event type, datetime)`: an incoming event is only emitted when no
//! already-stored event of that type is at least as recent.

use chrono::{DateTime, NaiveDateTime, Utc};
use std::collections::BTreeMap;

use feed_config::EventConfig;
use feed_core::PremisRecord;
use feed_error::{IngestError, Result};
use feed_xml::{Document, Element};

/// Provenance lifted from the repository METS of a prior ingest.
#[derive(Debug, Default)]
pub struct OldPremis {
    /// Event subtrees to re-emit, in document order.
    pub events: Vec<Element>,
    /// Event datetimes grouped by event type, for duplicate suppression.
    pub dates_by_type: BTreeMap<String, Vec<DateTime<Utc>>>,
    /// Per-identifier-prefix high-water marks parsed from old event
    /// identifiers of the form `prefix` + numeric suffix.
    pub eventids: BTreeMap<String, u32>,
}

impl OldPremis {
    /// Whether an event of type `eventtype` at `datetime` still needs to
    /// be added: true unless a stored event of that type is at least as
    /// recent.
    pub fn need_to_update_event(&self, eventtype: &str, datetime: &DateTime<Utc>) -> bool {
        match self.dates_by_type.get(eventtype) {
            Some(dates) => dates.iter().all(|stored| stored < datetime),
            None => true,
        }
    }

    /// The next deterministic identifier for migrated events of a type:
    /// `type{n}` continuing past the highest stored suffix.
    pub fn next_eventid(&mut self, eventtype: &str) -> String {
        let counter = self.eventids.entry(eventtype.to_owned()).or_insert(0);
        *counter += 1;
        format!("{eventtype}{counter}")
    }
}

/// Extract provenance from the repository METS. Every event must carry a
/// non-empty type and identifier value.
pub fn extract_old_premis(doc: &Document) -> Result<OldPremis> {
    let mut old = OldPremis::default();
    for event in doc.root().descendants("event") {
        let eventtype = event
            .child("eventType")
            .map(|e| e.text().trim().to_owned())
            .unwrap_or_default();
        let eventid = event
            .child("eventIdentifier")
            .and_then(|id| id.child("eventIdentifierValue"))
            .map(|e| e.text().trim().to_owned())
            .unwrap_or_default();
        if eventtype.is_empty() || eventid.is_empty() {
            return Err(IngestError::InvalidRepositoryPremis {
                detail: format!(
                    "event with missing type or identifier: {}",
                    event.to_xml_with_prefix("PREMIS")
                ),
            });
        }

        if let Some((prefix, suffix)) = split_numeric_suffix(&eventid) {
            let mark = old.eventids.entry(prefix.to_owned()).or_insert(0);
            *mark = (*mark).max(suffix);
        }

        if let Some(date) = event
            .child("eventDateTime")
            .and_then(|e| parse_premis_datetime(e.text().trim()))
        {
            old.dates_by_type
                .entry(eventtype.clone())
                .or_default()
                .push(date);
        }

        old.events.push(event.reprefixed("PREMIS"));
    }
    Ok(old)
}

/// Extract source-METS events, grouped by event type in document order.
pub fn extract_source_premis(doc: &Document) -> BTreeMap<String, Vec<Element>> {
    let mut by_type: BTreeMap<String, Vec<Element>> = BTreeMap::new();
    for event in doc.root().descendants("event") {
        let Some(eventtype) = event.child("eventType").map(|e| e.text().trim().to_owned())
        else {
            continue;
        };
        if eventtype.is_empty() {
            continue;
        }
        by_type.entry(eventtype).or_default().push(event.clone());
    }
    by_type
}

/// The datetime carried by an event subtree, when parseable.
pub fn event_datetime(event: &Element) -> Option<DateTime<Utc>> {
    event
        .child("eventDateTime")
        .and_then(|e| parse_premis_datetime(e.text().trim()))
}

/// Rewrite a source event's identifier for adoption: identifier type
/// becomes `UM` and the value becomes the next deterministic `type{n}`.
/// Exactly one identifier node with one type and one value is expected.
pub fn migrate_source_event(
    event: &Element,
    eventtype: &str,
    old: &mut OldPremis,
) -> Result<Element> {
    let mut adopted = event.reprefixed("PREMIS");

    let identifier_count = adopted
        .elements()
        .filter(|e| e.local == "eventIdentifier")
        .count();
    if identifier_count != 1 {
        return Err(IngestError::InvalidSourcePremis {
            detail: format!(
                "expected one eventIdentifier for {eventtype} event, found {identifier_count}"
            ),
        });
    }

    let next_id = old.next_eventid(eventtype);
    let identifier = adopted
        .child_mut("eventIdentifier")
        .expect("identifier presence just checked");

    for child_local in ["eventIdentifierType", "eventIdentifierValue"] {
        let found = identifier
            .elements()
            .filter(|e| e.local == child_local)
            .count();
        if found != 1 {
            return Err(IngestError::InvalidSourcePremis {
                detail: format!(
                    "expected one {child_local} for {eventtype} event, found {found}"
                ),
            });
        }
    }

    if let Some(id_type) = identifier.child_mut("eventIdentifierType") {
        id_type.set_text("UM");
    }
    if let Some(id_value) = identifier.child_mut("eventIdentifierValue") {
        id_value.set_text(&next_id);
    }
    Ok(adopted)
}

/// Build a generated event from a stored record and its merged recipe.
pub fn build_event(
    record: &PremisRecord,
    config: &EventConfig,
    eventid: &str,
    eventid_type: &str,
    executor: &str,
) -> Element {
    let mut event = Element::new("PREMIS:event");

    let mut identifier = Element::new("PREMIS:eventIdentifier");
    identifier.push_child(text_element("PREMIS:eventIdentifierType", eventid_type));
    identifier.push_child(text_element("PREMIS:eventIdentifierValue", eventid));
    event.push_child(identifier);

    event.push_child(text_element("PREMIS:eventType", &config.event_type));
    event.push_child(text_element(
        "PREMIS:eventDateTime",
        &feed_core::events::format_premis_date(&record.date),
    ));
    event.push_child(text_element("PREMIS:eventDetail", &config.detail));

    if let Some(outcome) = &record.outcome {
        event.push_child(outcome_element(outcome));
    }

    event.push_child(linking_agent(
        config.executor_type.as_deref().unwrap_or("MARC21 Code"),
        executor,
        "Executor",
    ));
    for tool in &config.tools {
        event.push_child(linking_agent("tool", tool, "software"));
    }

    event
}

/// Wrap a stored outcome in `eventOutcomeInformation`. Outcomes recorded
/// as XML are adopted structurally; plain text becomes an `eventOutcome`.
fn outcome_element(outcome: &str) -> Element {
    if let Ok(doc) = Document::parse(outcome) {
        let adopted = doc.root().reprefixed("PREMIS");
        if adopted.local == "eventOutcomeInformation" {
            return adopted;
        }
        let mut info = Element::new("PREMIS:eventOutcomeInformation");
        info.push_child(adopted);
        return info;
    }
    let mut info = Element::new("PREMIS:eventOutcomeInformation");
    info.push_child(text_element("PREMIS:eventOutcome", outcome));
    info
}

fn linking_agent(id_type: &str, value: &str, role: &str) -> Element {
    let mut agent = Element::new("PREMIS:linkingAgentIdentifier");
    agent.push_child(text_element("PREMIS:linkingAgentIdentifierType", id_type));
    agent.push_child(text_element("PREMIS:linkingAgentIdentifierValue", value));
    agent.push_child(text_element("PREMIS:linkingAgentRole", role));
    agent
}

pub(crate) fn text_element(name: &str, text: &str) -> Element {
    let mut element = Element::new(name);
    element.set_text(text);
    element
}

fn split_numeric_suffix(id: &str) -> Option<(&str, u32)> {
    let digits_start = id
        .char_indices()
        .rev()
        .take_while(|(_, c)| c.is_ascii_digit())
        .last()
        .map(|(i, _)| i)?;
    let (prefix, digits) = id.split_at(digits_start);
    if prefix.is_empty() {
        return None;
    }
    digits.parse::<u32>().ok().map(|n| (prefix, n))
}

/// Parse the datetime shapes seen in the wild: RFC 3339, ISO 8601
/// without zone, and `YYYY-MM-DD HH:MM:SS`. Zoneless values are taken as
/// UTC.
pub fn parse_premis_datetime(text: &str) -> Option<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
        return Some(parsed.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
            return Some(naive.and_utc());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const REPO_METS: &str = r#"<mets xmlns:PREMIS="info:lc/xmlns/premis-v2">
<PREMIS:premis>
  <PREMIS:event>
    <PREMIS:eventIdentifier>
      <PREMIS:eventIdentifierType>UM</PREMIS:eventIdentifierType>
      <PREMIS:eventIdentifierValue>capture3</PREMIS:eventIdentifierValue>
    </PREMIS:eventIdentifier>
    <PREMIS:eventType>capture</PREMIS:eventType>
    <PREMIS:eventDateTime>2020-05-01T10:00:00</PREMIS:eventDateTime>
  </PREMIS:event>
  <PREMIS:event>
    <PREMIS:eventIdentifier>
      <PREMIS:eventIdentifierType>UUID</PREMIS:eventIdentifierType>
      <PREMIS:eventIdentifierValue>8b0c7f14-2c3f-5f7e-9d8a-1b2c3d4e5f60</PREMIS:eventIdentifierValue>
    </PREMIS:eventIdentifier>
    <PREMIS:eventType>ingestion</PREMIS:eventType>
    <PREMIS:eventDateTime>2020-05-02 11:30:00</PREMIS:eventDateTime>
  </PREMIS:event>
</PREMIS:premis>
</mets>"#;

    #[test]
    fn old_premis_collects_events_dates_and_highwater_marks() {
        let doc = Document::parse(REPO_METS).unwrap();
        let old = extract_old_premis(&doc).unwrap();
        assert_eq!(old.events.len(), 2);
        assert_eq!(old.eventids.get("capture"), Some(&3));
        assert_eq!(old.dates_by_type["capture"].len(), 1);
        assert_eq!(old.dates_by_type["ingestion"].len(), 1);
    }

    #[test]
    fn events_missing_type_or_identifier_are_rejected() {
        let doc = Document::parse(
            r#"<mets xmlns:P="info:lc/xmlns/premis-v2">
<P:event><P:eventType>capture</P:eventType></P:event>
</mets>"#,
        )
        .unwrap();
        let err = extract_old_premis(&doc).unwrap_err();
        assert_eq!(err.kind(), "InvalidRepositoryPREMIS");
    }

    #[test]
    fn duplicate_suppression_compares_datetimes() {
        let doc = Document::parse(REPO_METS).unwrap();
        let old = extract_old_premis(&doc).unwrap();
        let stored = Utc.with_ymd_and_hms(2020, 5, 1, 10, 0, 0).unwrap();

        // Same time or older: already covered.
        assert!(!old.need_to_update_event("capture", &stored));
        let older = Utc.with_ymd_and_hms(2019, 1, 1, 0, 0, 0).unwrap();
        assert!(!old.need_to_update_event("capture", &older));

        // Newer than anything stored, or an unseen type: emit.
        let newer = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        assert!(old.need_to_update_event("capture", &newer));
        assert!(old.need_to_update_event("validation", &stored));
    }

    #[test]
    fn next_eventid_continues_past_the_high_water_mark() {
        let doc = Document::parse(REPO_METS).unwrap();
        let mut old = extract_old_premis(&doc).unwrap();
        assert_eq!(old.next_eventid("capture"), "capture4");
        assert_eq!(old.next_eventid("capture"), "capture5");
        assert_eq!(old.next_eventid("source METS creation"), "source METS creation1");
    }

    #[test]
    fn migration_rewrites_the_identifier_triple() {
        let doc = Document::parse(REPO_METS).unwrap();
        let source = extract_source_premis(&doc);
        let mut old = OldPremis::default();
        let migrated =
            migrate_source_event(&source["capture"][0], "capture", &mut old).unwrap();
        let identifier = migrated.child("eventIdentifier").unwrap();
        assert_eq!(identifier.child("eventIdentifierType").unwrap().text(), "UM");
        assert_eq!(
            identifier.child("eventIdentifierValue").unwrap().text(),
            "capture1"
        );
    }

    #[test]
    fn migration_rejects_multiple_identifiers() {
        let doc = Document::parse(
            r#"<m xmlns:P="x">
<P:event>
  <P:eventIdentifier><P:eventIdentifierType>UM</P:eventIdentifierType><P:eventIdentifierValue>a1</P:eventIdentifierValue></P:eventIdentifier>
  <P:eventIdentifier><P:eventIdentifierType>UM</P:eventIdentifierType><P:eventIdentifierValue>a2</P:eventIdentifierValue></P:eventIdentifier>
  <P:eventType>capture</P:eventType>
</P:event>
</m>"#,
        )
        .unwrap();
        let events = extract_source_premis(&doc);
        let mut old = OldPremis::default();
        let err = migrate_source_event(&events["capture"][0], "capture", &mut old).unwrap_err();
        assert_eq!(err.kind(), "InvalidSourcePREMIS");
    }

    #[test]
    fn built_events_carry_agents_and_outcome() {
        let date = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let record = PremisRecord {
            eventid: feed_core::make_premis_uuid("mdp", "39015", "ingestion", &date),
            eventtype: "ingestion".to_owned(),
            date,
            outcome: Some("<eventOutcome>pass</eventOutcome>".to_owned()),
        };
        let config = EventConfig {
            event_type: "ingestion".to_owned(),
            detail: "Submission package ingested".to_owned(),
            executor: "DLPS".to_owned(),
            executor_type: Some("MARC21 Code".to_owned()),
            tools: vec!["FEED".to_owned(), "ZIP".to_owned()],
            eventid_override: None,
        };
        let event = build_event(
            &record,
            &config,
            &record.eventid.to_string(),
            "UUID",
            "DLPS",
        );

        assert_eq!(event.child("eventType").unwrap().text(), "ingestion");
        assert_eq!(
            event.child("eventDateTime").unwrap().text(),
            "2024-01-01T00:00:00Z"
        );
        let agents: Vec<_> = event
            .elements()
            .filter(|e| e.local == "linkingAgentIdentifier")
            .collect();
        assert_eq!(agents.len(), 3);
        assert_eq!(agents[0].child("linkingAgentRole").unwrap().text(), "Executor");
        assert_eq!(agents[1].child("linkingAgentRole").unwrap().text(), "software");
        let outcome = event.child("eventOutcomeInformation").unwrap();
        assert_eq!(outcome.child("eventOutcome").unwrap().text(), "pass");
    }

    #[test]
    fn datetime_parsing_accepts_common_shapes() {
        for text in [
            "2020-05-01T10:00:00Z",
            "2020-05-01T10:00:00",
            "2020-05-01 10:00:00",
            "2020-05-01T10:00:00+00:00",
        ] {
            let parsed = parse_premis_datetime(text).unwrap();
            assert_eq!(
                parsed,
                Utc.with_ymd_and_hms(2020, 5, 1, 10, 0, 0).unwrap()
            );
        }
        assert!(parse_premis_datetime("yesterday").is_none());
    }
}
