//! The METS assembler.
//!
//! Builds the canonical AIP METS for a volume:
//!
//! 1. a header identifying the creating organization,
//! 2. two MARC dmdSecs (a reference and the remediated record itself),
//! 3. one PREMIS section merging repository provenance, migrated source
//!    provenance and the events generated during this run,
//! 4. a fileSec covering the archival zip and every logical filegroup,
//! 5. a physical struct map ordered by page sequence number.
//!
//! The merge is reingest-stable: an event type already stored at the same
//! or a newer datetime is not emitted again, and generated events carry
//! deterministic UUIDv5 identifiers, so assembling the same volume twice
//! yields the same provenance.

use camino::Utf8PathBuf;
use chrono::Utc;
use md5::{Digest, Md5};
use std::collections::BTreeMap;
use std::fs;
use std::io::Read;
use tracing::debug;

use feed_core::events::format_premis_date;
use feed_core::{EventParams, Volume};
use feed_error::{IngestError, Result};
use feed_xml::{Document, Element};

use crate::premis::{
    build_event, event_datetime, extract_old_premis, extract_source_premis,
    migrate_source_event, text_element, OldPremis,
};
use crate::validate::validate_xml;

const METS_NS: &str = "http://www.loc.gov/METS/";
const PREMIS_NS: &str = "http://www.loc.gov/standards/premis";
const MARC_NS: &str = "http://www.loc.gov/MARC21/slim";
const XLINK_NS: &str = "http://www.w3.org/1999/xlink";
const XSI_NS: &str = "http://www.w3.org/2001/XMLSchema-instance";
const PREMIS_XSD: &str = "http://www.loc.gov/standards/premis/premis.xsd";
const MARC_XSD: &str = "http://www.loc.gov/standards/marcxml/schema/MARC21slim.xsd";
const METS_XSD: &str = "http://www.loc.gov/standards/mets/mets.xsd";

pub struct MetsAssembler {
    volume: Volume,
    old: OldPremis,
    source_events: BTreeMap<String, Vec<Element>>,
    /// filename -> fileSec ID, filled by the fileSec builder and consumed
    /// by the struct map builder.
    file_ids: BTreeMap<String, String>,
}

impl MetsAssembler {
    pub fn new(volume: Volume) -> Self {
        Self {
            volume,
            old: OldPremis::default(),
            source_events: BTreeMap::new(),
            file_ids: BTreeMap::new(),
        }
    }

    /// Assemble, write and validate the METS. Returns the written path.
    pub fn assemble(&mut self) -> Result<Utf8PathBuf> {
        self.extract_provenance()?;

        // Recorded before events are emitted so this run's ingestion lands
        // in the same document.
        self.volume
            .record_premis_event("ingestion", EventParams::default())?;

        let mut root = self.open_root();
        root.push_child(self.header());
        let (dmd_ref, dmd_record) = self.dmd_secs()?;
        root.push_child(dmd_ref);
        root.push_child(dmd_record);
        root.push_child(self.amd_sec()?);
        root.push_child(self.file_sec()?);
        root.push_child(self.struct_map()?);

        self.write_and_validate(&root)
    }

    fn extract_provenance(&mut self) -> Result<()> {
        if let Some(doc) = self.volume.repos_mets_xpc()? {
            self.old = extract_old_premis(doc)?;
            debug!(
                volume = %self.volume.identifier(),
                old_events = self.old.events.len(),
                "reingest: merged repository provenance",
            );
        }
        self.source_events = extract_source_premis(self.volume.source_mets_xpc()?);
        Ok(())
    }

    fn open_root(&self) -> Element {
        let mut root = Element::new("METS:mets");
        root.set_attr("xmlns:METS", METS_NS);
        root.set_attr("xmlns:PREMIS", PREMIS_NS);
        root.set_attr("xmlns:marc", MARC_NS);
        root.set_attr("xmlns:xlink", XLINK_NS);
        root.set_attr("xmlns:xsi", XSI_NS);
        root.set_attr("OBJID", &self.volume.identifier());
        root.set_attr(
            "xsi:schemaLocation",
            &format!(
                "{METS_NS} {METS_XSD} {PREMIS_NS} {PREMIS_XSD} {MARC_NS} {MARC_XSD}"
            ),
        );
        root
    }

    fn header(&self) -> Element {
        let mut header = Element::new("METS:metsHdr");
        header.set_attr("CREATEDATE", &format_premis_date(&Utc::now()));
        header.set_attr("RECORDSTATUS", "NEW");
        let mut agent = Element::new("METS:agent");
        agent.set_attr("ROLE", "CREATOR");
        agent.set_attr("TYPE", "ORGANIZATION");
        agent.push_child(text_element("METS:name", "DLPS"));
        header.push_child(agent);
        header
    }

    fn dmd_secs(&self) -> Result<(Element, Element)> {
        let mut dmd_ref = Element::new("METS:dmdSec");
        dmd_ref.set_attr("ID", "DMD1");
        let mut mdref = Element::new("METS:mdRef");
        mdref.set_attr("LOCTYPE", "OTHER");
        mdref.set_attr(
            "OTHERLOCTYPE",
            "Item ID stored as second call number in item record",
        );
        mdref.set_attr("MDTYPE", "MARC");
        mdref.set_attr("xlink:href", &self.volume.identifier());
        dmd_ref.push_child(mdref);

        let mut dmd_record = Element::new("METS:dmdSec");
        dmd_record.set_attr("ID", "DMD2");
        let mut mdwrap = Element::new("METS:mdWrap");
        mdwrap.set_attr("MDTYPE", "MARC");
        mdwrap.set_attr("LABEL", "MARC record");
        let mut xmldata = Element::new("METS:xmlData");
        xmldata.push_child(self.remediated_marc()?);
        mdwrap.push_child(xmldata);
        dmd_record.push_child(mdwrap);

        Ok((dmd_ref, dmd_record))
    }

    /// The source MARC record, adopted without its source prefix and with
    /// the leader normalized to its fixed 24-character length.
    fn remediated_marc(&self) -> Result<Element> {
        let mut record = self.volume.marc_xml()?.reprefixed("");
        record.set_attr("xmlns", MARC_NS);
        if let Some(leader) = record.child_mut("leader") {
            let text = leader.text();
            let mut fixed = text.trim_end_matches('\n').to_owned();
            if fixed.len() > 24 {
                fixed.truncate(24);
            } else {
                while fixed.len() < 24 {
                    fixed.push(' ');
                }
            }
            if fixed != text {
                leader.set_text(&fixed);
            }
        }
        Ok(record)
    }

    fn amd_sec(&mut self) -> Result<Element> {
        let mut premis = Element::new("PREMIS:premis");
        premis.set_attr("version", "2.1");

        premis.push_child(self.premis_object()?);

        // Repository events are re-emitted verbatim.
        for event in &self.old.events {
            premis.push_child(event.clone());
        }

        // Source events are migrated under renumbered UM identifiers,
        // newest-wins against the repository copy.
        for eventtype in self.volume.packagetype().source_premis_events.clone() {
            let Some(events) = self.source_events.get(&eventtype).cloned() else {
                continue;
            };
            for event in events {
                let needed = match event_datetime(&event) {
                    Some(date) => self.old.need_to_update_event(&eventtype, &date),
                    None => true,
                };
                if !needed {
                    continue;
                }
                premis.push_child(migrate_source_event(&event, &eventtype, &mut self.old)?);
            }
        }

        // Events generated during this run.
        for code in self.volume.packagetype().premis_events.clone() {
            if let Some(event) = self.generated_event(&code)? {
                premis.push_child(event);
            }
        }

        let mut xmldata = Element::new("METS:xmlData");
        xmldata.push_child(premis);
        let mut mdwrap = Element::new("METS:mdWrap");
        mdwrap.set_attr("MDTYPE", "PREMIS");
        mdwrap.push_child(xmldata);
        let mut digiprov = Element::new("METS:digiprovMD");
        digiprov.set_attr("ID", "PREMIS1");
        digiprov.push_child(mdwrap);
        let mut amdsec = Element::new("METS:amdSec");
        amdsec.set_attr("ID", "AMD1");
        amdsec.push_child(digiprov);
        Ok(amdsec)
    }

    fn generated_event(&mut self, code: &str) -> Result<Option<Element>> {
        let record = self.volume.get_event_info(code)?.ok_or_else(|| {
            IngestError::missing_field(
                format!("premis event {code}"),
                self.volume.identifier(),
            )
        })?;

        let config = self.volume.get_event_configuration(code)?;
        for (field, value) in [
            ("type", &config.event_type),
            ("detail", &config.detail),
            ("executor", &config.executor),
        ] {
            if value.is_empty() {
                return Err(IngestError::Config(format!(
                    "premis event {code} has no {field} configured"
                )));
            }
        }

        if !self.old.need_to_update_event(&config.event_type, &record.date) {
            return Ok(None);
        }

        let executor = if config.executor == "VOLUME_ARTIST" {
            self.volume.artist()
        } else {
            config.executor.clone()
        };

        let (eventid, eventid_type) = match &config.eventid_override {
            Some(fixed) => (fixed.clone(), "UM"),
            None => (record.eventid.to_string(), "UUID"),
        };

        Ok(Some(build_event(
            &record,
            &config,
            &eventid,
            eventid_type,
            &executor,
        )))
    }

    fn premis_object(&self) -> Result<Element> {
        let mut object = Element::new("PREMIS:object");
        object.set_attr("xsi:type", "PREMIS:representation");

        let mut identifier = Element::new("PREMIS:objectIdentifier");
        identifier.push_child(text_element("PREMIS:objectIdentifierType", "DLPS"));
        identifier.push_child(text_element(
            "PREMIS:objectIdentifierValue",
            &self.volume.identifier(),
        ));
        object.push_child(identifier);

        let mut level = Element::new("PREMIS:preservationLevel");
        level.push_child(text_element("PREMIS:preservationLevelValue", "1"));
        object.push_child(level);

        let file_count = self.volume.file_count()?;
        let page_count = self.volume.page_count()?;
        for (name, value) in [("file count", file_count), ("page count", page_count)] {
            let mut property = Element::new("PREMIS:significantProperties");
            property.push_child(text_element("PREMIS:significantPropertiesType", name));
            property.push_child(text_element(
                "PREMIS:significantPropertiesValue",
                &value.to_string(),
            ));
            object.push_child(property);
        }
        Ok(object)
    }

    fn file_sec(&mut self) -> Result<Element> {
        let mut filesec = Element::new("METS:fileSec");

        let zip_path = self.volume.zip_path();
        if !zip_path.is_file() {
            return Err(IngestError::missing_field(
                "archival zip",
                zip_path.to_string(),
            ));
        }
        let mut zipgrp = Element::new("METS:fileGrp");
        zipgrp.set_attr("USE", "zip archive");
        let mut zipfile = Element::new("METS:file");
        zipfile.set_attr("ID", "ZIP00000001");
        zipfile.set_attr("MIMETYPE", "application/zip");
        let metadata = fs::metadata(&zip_path).map_err(|e| {
            IngestError::operation_failed("stat zip", Some(zip_path.as_str()), e)
        })?;
        zipfile.set_attr("SIZE", &metadata.len().to_string());
        zipfile.set_attr("CHECKSUM", &md5_file(&zip_path)?);
        zipfile.set_attr("CHECKSUMTYPE", "MD5");
        let mut flocat = Element::new("METS:FLocat");
        flocat.set_attr("LOCTYPE", "OTHER");
        flocat.set_attr("OTHERLOCTYPE", "SYSTEM");
        flocat.set_attr(
            "xlink:href",
            zip_path.file_name().unwrap_or("volume.zip"),
        );
        zipfile.push_child(flocat);
        zipgrp.push_child(zipfile);
        filesec.push_child(zipgrp);

        let staging = self.volume.staging_directory();
        let checksums = self.volume.checksums()?.clone();
        let groups = self.volume.file_groups()?.clone();
        let filegroups = self.volume.packagetype().filegroups.clone();
        for spec in &filegroups {
            let Some(group) = groups.get(&spec.name) else {
                continue;
            };
            if group.files.is_empty() {
                continue;
            }
            let mut filegrp = Element::new("METS:fileGrp");
            filegrp.set_attr("USE", &spec.mets_use);
            for (index, name) in group.files.iter().enumerate() {
                let id = format!("{}{:08}", spec.prefix, index + 1);
                let path = staging.join(name);
                let mut file = Element::new("METS:file");
                file.set_attr("ID", &id);
                file.set_attr("MIMETYPE", mimetype_for(name));
                if let Ok(metadata) = fs::metadata(&path) {
                    file.set_attr("SIZE", &metadata.len().to_string());
                }
                let checksum = match checksums.get(name) {
                    Some(sum) => sum.clone(),
                    None => md5_file(&path)?,
                };
                file.set_attr("CHECKSUM", &checksum);
                file.set_attr("CHECKSUMTYPE", "MD5");
                let mut flocat = Element::new("METS:FLocat");
                flocat.set_attr("LOCTYPE", "OTHER");
                flocat.set_attr("OTHERLOCTYPE", "SYSTEM");
                flocat.set_attr("xlink:href", name);
                file.push_child(flocat);
                filegrp.push_child(file);
                self.file_ids.insert(name.clone(), id);
            }
            filesec.push_child(filegrp);
        }
        Ok(filesec)
    }

    fn struct_map(&self) -> Result<Element> {
        let mut structmap = Element::new("METS:structMap");
        structmap.set_attr("ID", "SM1");
        structmap.set_attr("TYPE", "physical");
        let mut volume_div = Element::new("METS:div");
        volume_div.set_attr("TYPE", "volume");

        let pages = self.volume.file_groups_by_page()?;
        for (order, (_seq, page_groups)) in pages.iter().enumerate() {
            let mut page_div = Element::new("METS:div");
            page_div.set_attr("TYPE", "page");
            page_div.set_attr("ORDER", &(order + 1).to_string());

            // First file that yields labels wins.
            let page_info = page_groups
                .values()
                .flatten()
                .find_map(|file| self.volume.page_data(file));
            if let Some(info) = page_info {
                if let Some(orderlabel) = info.orderlabel {
                    page_div.set_attr("ORDERLABEL", &orderlabel);
                }
                if let Some(label) = info.label {
                    page_div.set_attr("LABEL", &label);
                }
            }

            // Files appear in filegroup declaration order within a page.
            for spec in &self.volume.packagetype().filegroups {
                let Some(files) = page_groups.get(&spec.name) else {
                    continue;
                };
                for file in files {
                    let Some(id) = self.file_ids.get(file) else {
                        continue;
                    };
                    let mut fptr = Element::new("METS:fptr");
                    fptr.set_attr("FILEID", id);
                    page_div.push_child(fptr);
                }
            }
            volume_div.push_child(page_div);
        }

        structmap.push_child(volume_div);
        Ok(structmap)
    }

    fn write_and_validate(&self, root: &Element) -> Result<Utf8PathBuf> {
        let path = self.volume.mets_path();
        let xml = feed_xml::document_string(&root.to_xml());

        // Round-trip through the parser before anything touches disk.
        Document::parse(&xml).map_err(|e| IngestError::InvalidMets {
            path: path.to_string(),
            detail: format!("assembled document is not well-formed: {e}"),
        })?;

        fs::write(&path, &xml).map_err(|e| {
            IngestError::operation_failed("write METS", Some(path.as_str()), e)
        })?;
        validate_xml(self.volume.engine().config(), &path)?;
        debug!(path = %path, "METS assembled");
        Ok(path)
    }
}

fn mimetype_for(filename: &str) -> &'static str {
    match filename.rsplit('.').next().unwrap_or_default() {
        "jp2" => "image/jp2",
        "tif" | "tiff" => "image/tiff",
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "txt" => "text/plain",
        "html" | "htm" => "text/html",
        "xml" => "text/xml",
        "pdf" => "application/pdf",
        "epub" => "application/epub+zip",
        _ => "application/octet-stream",
    }
}

pub(crate) fn md5_file(path: &camino::Utf8Path) -> Result<String> {
    let mut file = fs::File::open(path)
        .map_err(|e| IngestError::operation_failed("checksum file", Some(path.as_str()), e))?;
    let mut hasher = Md5::new();
    let mut buffer = [0u8; 64 * 1024];
    loop {
        let read = file
            .read(&mut buffer)
            .map_err(|e| IngestError::operation_failed("checksum file", Some(path.as_str()), e))?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}
