//! End-to-end pipeline scenarios: a SIP goes in, an AIP comes out.

use camino::Utf8PathBuf;
use md5::{Digest, Md5};
use std::fs;
use std::io::Write;
use std::sync::{Arc, Mutex};

use feed_config::Config;
use feed_core::{Engine, JobParams, JobUpdate, Registry, Runner, Status, UpdateCallback};
use feed_xml::Document;

/// JP2 signature box; content files must look like real images to pass
/// format validation.
const JP2_MAGIC: &[u8] = &[
    0x00, 0x00, 0x00, 0x0c, 0x6a, 0x50, 0x20, 0x20, 0x0d, 0x0a, 0x87, 0x0a,
];

fn md5_hex(bytes: &[u8]) -> String {
    let mut hasher = Md5::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

struct Fixture {
    _dir: tempfile::TempDir,
    engine: Arc<Engine>,
}

fn fixture() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
    let config = Config::test_fixture(&root);
    let mut registry = Registry::new();
    feed_stages::install(&mut registry).unwrap();
    let engine = Engine::in_memory(config, registry);
    engine.check_descriptors().unwrap();
    Fixture { _dir: dir, engine }
}

fn yale_source_mets(objid: &str, image: &[u8], ocr: &[u8], hocr: &[u8], with_marc: bool) -> String {
    let marc = if with_marc {
        r#"<METS:dmdSec ID="DMD1">
    <METS:mdWrap MDTYPE="MARC">
      <METS:xmlData>
        <record xmlns="http://www.loc.gov/MARC21/slim"><leader>01142cam</leader></record>
      </METS:xmlData>
    </METS:mdWrap>
  </METS:dmdSec>"#
    } else {
        ""
    };
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<METS:mets xmlns:METS="http://www.loc.gov/METS/" xmlns:xlink="http://www.w3.org/1999/xlink" xmlns:PREMIS="info:lc/xmlns/premis-v2" OBJID="{objid}">
  {marc}
  <METS:amdSec ID="AMD1">
    <METS:digiprovMD ID="P1">
      <METS:mdWrap MDTYPE="PREMIS">
        <METS:xmlData>
          <PREMIS:premis>
            <PREMIS:event>
              <PREMIS:eventIdentifier>
                <PREMIS:eventIdentifierType>YALE</PREMIS:eventIdentifierType>
                <PREMIS:eventIdentifierValue>cap-1</PREMIS:eventIdentifierValue>
              </PREMIS:eventIdentifier>
              <PREMIS:eventType>capture</PREMIS:eventType>
              <PREMIS:eventDateTime>2019-03-01T08:00:00</PREMIS:eventDateTime>
            </PREMIS:event>
          </PREMIS:premis>
        </METS:xmlData>
      </METS:mdWrap>
    </METS:digiprovMD>
  </METS:amdSec>
  <METS:fileSec>
    <METS:fileGrp USE="image">
      <METS:file ID="IMG1" CHECKSUM="{image_md5}" CHECKSUMTYPE="MD5">
        <METS:FLocat LOCTYPE="OTHER" xlink:href="{objid}_000001.jp2"/>
      </METS:file>
    </METS:fileGrp>
    <METS:fileGrp USE="ocr">
      <METS:file ID="OCR1" CHECKSUM="{ocr_md5}" CHECKSUMTYPE="MD5">
        <METS:FLocat LOCTYPE="OTHER" xlink:href="{objid}_000001.txt"/>
      </METS:file>
    </METS:fileGrp>
    <METS:fileGrp USE="coordOCR">
      <METS:file ID="HTML1" CHECKSUM="{hocr_md5}" CHECKSUMTYPE="MD5">
        <METS:FLocat LOCTYPE="OTHER" xlink:href="{objid}_000001.xml"/>
      </METS:file>
    </METS:fileGrp>
  </METS:fileSec>
  <METS:structMap TYPE="physical">
    <METS:div TYPE="volume">
      <METS:div TYPE="page" ORDER="1" ORDERLABEL="i" LABEL="TITLE">
        <METS:fptr FILEID="IMG1"/>
        <METS:fptr FILEID="OCR1"/>
        <METS:fptr FILEID="HTML1"/>
      </METS:div>
    </METS:div>
  </METS:structMap>
</METS:mets>"#,
        objid = objid,
        marc = marc,
        image_md5 = md5_hex(image),
        ocr_md5 = md5_hex(ocr),
        hocr_md5 = md5_hex(hocr),
    )
}

/// Build a Yale SIP zip in the download directory.
fn build_yale_sip(engine: &Arc<Engine>, objid: &str, with_marc: bool, extra_file: Option<&str>) {
    let mut image = JP2_MAGIC.to_vec();
    image.extend_from_slice(b"image payload");
    let ocr = b"page one text".to_vec();
    let hocr = b"<html xmlns=\"http://www.w3.org/1999/xhtml\"><body/></html>".to_vec();
    let mets = yale_source_mets(objid, &image, &ocr, &hocr, with_marc);

    let sip_path = engine
        .config()
        .staging
        .download
        .join(format!("{objid}.zip"));
    let file = fs::File::create(sip_path.as_std_path()).unwrap();
    let mut zip = zip::ZipWriter::new(file);
    let options = zip::write::SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated);

    let mut add = |name: String, bytes: &[u8]| {
        zip.start_file(name, options).unwrap();
        zip.write_all(bytes).unwrap();
    };
    add(format!("Yale_{objid}.xml"), mets.as_bytes());
    add(format!("{objid}_000001.jp2"), &image);
    add(format!("{objid}_000001.txt"), &ocr);
    add(format!("{objid}_000001.xml"), &hocr);
    if let Some(extra) = extra_file {
        add(extra.to_owned(), b"unexpected");
    }
    zip.finish().unwrap();
}

fn collecting_runner(engine: Arc<Engine>) -> (Runner, Arc<Mutex<Vec<JobUpdate>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let callback: UpdateCallback = Arc::new(move |update: &JobUpdate| {
        sink.lock().unwrap().push(update.clone());
    });
    (Runner::with_callback(engine, callback), seen)
}

fn aip_dir(engine: &Arc<Engine>, namespace: &str, objid: &str) -> Utf8PathBuf {
    engine
        .config()
        .repository
        .obj_dir
        .join(namespace)
        .join(feed_pairtree::id2ppath(objid))
        .join(feed_pairtree::s2ppchars(objid))
}

fn read_aip_mets(engine: &Arc<Engine>, objid: &str) -> Document {
    let path = aip_dir(engine, "yale", objid).join(format!("{objid}.mets.xml"));
    Document::parse(&fs::read_to_string(path.as_std_path()).unwrap()).unwrap()
}

fn events_of_type(doc: &Document, eventtype: &str) -> usize {
    doc.root()
        .descendants("event")
        .into_iter()
        .filter(|e| {
            e.child("eventType")
                .map(|t| t.text() == eventtype)
                .unwrap_or(false)
        })
        .count()
}

#[test]
fn yale_happy_path_collates_an_aip() {
    let fixture = fixture();
    build_yale_sip(&fixture.engine, "39002X", true, None);
    let (runner, updates) = collecting_runner(Arc::clone(&fixture.engine));

    let update = runner
        .run_to_release(JobParams::new("yale", "yale", "39002X"))
        .unwrap();
    assert_eq!(update.status, Status::collated());
    assert!(update.release);
    assert!(!update.failed);

    // The callback saw every transition, ending in collated.
    let statuses: Vec<String> = updates
        .lock()
        .unwrap()
        .iter()
        .map(|u| u.status.to_string())
        .collect();
    assert_eq!(
        statuses,
        [
            "unpacked",
            "manifest_verified",
            "src_metsed",
            "validated",
            "packed",
            "metsed",
            "handled",
            "collated",
        ]
    );

    // AIP files at the pairtree path.
    let aip = aip_dir(&fixture.engine, "yale", "39002X");
    assert!(aip.join("39002X.mets.xml").is_file());
    assert!(aip.join("39002X.zip").is_file());

    // The struct map has one page with image, ocr and hocr pointers.
    let doc = read_aip_mets(&fixture.engine, "39002X");
    let pages: Vec<_> = doc
        .root()
        .descendants("div")
        .into_iter()
        .filter(|d| d.attr("TYPE") == Some("page"))
        .collect();
    assert_eq!(pages.len(), 1);
    assert_eq!(pages[0].attr("ORDER"), Some("1"));
    let fptrs = pages[0].elements().filter(|e| e.local == "fptr").count();
    assert_eq!(fptrs, 3);

    // The full provenance recipe is present.
    for eventtype in [
        "ingestion",
        "compression",
        "message digest calculation",
        "validation",
        "capture",
    ] {
        assert_eq!(events_of_type(&doc, eventtype), 1, "missing {eventtype}");
    }

    // Staged files were cleaned after collation.
    assert!(!fixture
        .engine
        .config()
        .staging
        .download
        .join("39002X.zip")
        .exists());

    // The handle was spooled.
    let spool = &fixture.engine.config().handle.as_ref().unwrap().spool;
    let spooled = fs::read_to_string(spool.as_std_path()).unwrap();
    assert!(spooled.contains("2027/yale.39002X"));
}

#[test]
fn reingest_is_a_repeat_and_keeps_source_provenance_single() {
    let fixture = fixture();
    build_yale_sip(&fixture.engine, "39002X", true, None);
    let runner = Runner::new(Arc::clone(&fixture.engine));
    runner
        .run_to_release(JobParams::new("yale", "yale", "39002X"))
        .unwrap();

    // Identical SIP again.
    build_yale_sip(&fixture.engine, "39002X", true, None);
    let update = runner
        .run_to_release(JobParams::new("yale", "yale", "39002X"))
        .unwrap();
    assert_eq!(update.status, Status::collated());

    let doc = read_aip_mets(&fixture.engine, "39002X");
    // The migrated capture event was not duplicated by the reingest.
    assert_eq!(events_of_type(&doc, "capture"), 1);
}

#[test]
fn missing_marc_punts_at_the_mets_stage() {
    let fixture = fixture();
    build_yale_sip(&fixture.engine, "39002Y", false, None);
    let (runner, updates) = collecting_runner(Arc::clone(&fixture.engine));

    let update = runner
        .run_to_release(JobParams::new("yale", "yale", "39002Y"))
        .unwrap();
    assert_eq!(update.status, Status::punted());
    assert!(update.release);
    assert!(update.failed);
    assert_eq!(update.failure_count, 1);

    // The failing transition was reported with failed = true.
    let last = updates.lock().unwrap().last().cloned().unwrap();
    assert!(last.failed);
    assert!(last.release);

    // Nothing landed in the object store.
    assert!(!aip_dir(&fixture.engine, "yale", "39002Y").exists());
}

#[test]
fn extra_file_fails_verify_manifest() {
    let fixture = fixture();
    build_yale_sip(&fixture.engine, "39002Z", true, Some("EXTRA_badname.tiff"));
    let (runner, updates) = collecting_runner(Arc::clone(&fixture.engine));

    let update = runner
        .run_to_release(JobParams::new("yale", "yale", "39002Z"))
        .unwrap();
    assert_eq!(update.status, Status::punted());
    assert!(update.failed);
    assert_eq!(update.failure_count, 1);

    // Unpack succeeded, VerifyManifest failed, nothing ran after it.
    let statuses: Vec<String> = updates
        .lock()
        .unwrap()
        .iter()
        .map(|u| u.status.to_string())
        .collect();
    assert_eq!(statuses, ["unpacked", "punted"]);
}

#[test]
fn collate_twice_is_idempotent() {
    let fixture = fixture();
    build_yale_sip(&fixture.engine, "39002X", true, None);
    let runner = Runner::new(Arc::clone(&fixture.engine));
    runner
        .run_to_release(JobParams::new("yale", "yale", "39002X"))
        .unwrap();

    let aip = aip_dir(&fixture.engine, "yale", "39002X");
    let first_mets = fs::read_to_string(aip.join("39002X.mets.xml").as_std_path()).unwrap();

    build_yale_sip(&fixture.engine, "39002X", true, None);
    runner
        .run_to_release(JobParams::new("yale", "yale", "39002X"))
        .unwrap();

    // Still exactly one METS and one zip at the target.
    let entries: Vec<_> = fs::read_dir(aip.as_std_path())
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    let mut sorted = entries.clone();
    sorted.sort();
    assert_eq!(sorted, ["39002X.mets.xml", "39002X.zip"]);

    // And it is the reingest's document, not a stale copy.
    let second_mets = fs::read_to_string(aip.join("39002X.mets.xml").as_std_path()).unwrap();
    assert!(second_mets.contains("capture"));
    let _ = first_mets;
}

/// Checks that the stage walk used for diagnostics agrees with what the
/// runner actually executes.
#[test]
fn stage_walk_matches_executed_order() {
    let fixture = fixture();
    let volume = fixture.engine.volume("yale", "yale", "39002X").unwrap();
    let planned = volume.stages(&Status::ready()).unwrap();

    build_yale_sip(&fixture.engine, "39002X", true, None);
    let (runner, updates) = collecting_runner(Arc::clone(&fixture.engine));
    runner
        .run_to_release(JobParams::new("yale", "yale", "39002X"))
        .unwrap();

    assert_eq!(planned.len(), updates.lock().unwrap().len());
}
