//! Builtin descriptors and the startup install hook.
//!
//! Descriptor registration is explicit: `install` is called once at
//! program start (or per-test) and populates the registry with every
//! shipped stage, namespace and package type. Descriptors for new content
//! providers slot in alongside these.

use regex::Regex;
use serde_yaml::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

use feed_core::{FileGroupSpec, Namespace, PackageType, Registry, Status};
use feed_error::Result;

use crate::collate::CollateFactory;
use crate::handle::HandleFactory;
use crate::mets::MetsFactory;
use crate::pack::PackFactory;
use crate::source_mets::SourceMetsFactory;
use crate::unpack::UnpackFactory;
use crate::validate::VolumeValidatorFactory;
use crate::verify_manifest::VerifyManifestFactory;

/// Register every builtin stage, namespace and package type.
pub fn install(registry: &mut Registry) -> Result<()> {
    registry.register_stage(Arc::new(UnpackFactory))?;
    registry.register_stage(Arc::new(VerifyManifestFactory))?;
    registry.register_stage(Arc::new(SourceMetsFactory))?;
    registry.register_stage(Arc::new(VolumeValidatorFactory))?;
    registry.register_stage(Arc::new(PackFactory))?;
    registry.register_stage(Arc::new(MetsFactory))?;
    registry.register_stage(Arc::new(HandleFactory))?;
    registry.register_stage(Arc::new(CollateFactory))?;

    registry.register_namespace(
        Namespace::new("mdp", "University of Michigan")
            .with_config("artist", Value::from("University of Michigan"))
            .with_packagetype_override("google", "artist", Value::from("Google")),
    )?;
    registry.register_namespace(
        Namespace::new("yale", "Yale University")
            .with_config("artist", Value::from("Yale University Library")),
    )?;
    registry.register_namespace(Namespace::new("test", "Test institution"))?;

    registry.register_packagetype(simple())?;
    registry.register_packagetype(google())?;
    registry.register_packagetype(yale())?;

    Ok(())
}

/// The full ingest path every shipped package type follows.
fn standard_stage_map() -> BTreeMap<Status, String> {
    [
        ("ready", "unpack"),
        ("unpacked", "verify_manifest"),
        ("manifest_verified", "source_mets"),
        ("src_metsed", "validate"),
        ("validated", "pack"),
        ("packed", "mets"),
        ("metsed", "handle"),
        ("handled", "collate"),
    ]
    .into_iter()
    .map(|(status, stage)| (Status::new(status), stage.to_owned()))
    .collect()
}

fn standard_premis_events() -> Vec<String> {
    [
        "package_validation",
        "zip_compression",
        "zip_md5_create",
        "ingestion",
    ]
    .into_iter()
    .map(str::to_owned)
    .collect()
}

/// Generic single-item SIP: one zip, checksums in a manifest file.
fn simple() -> PackageType {
    let mut pt = PackageType::new("simple", "Generic single-item SIP");
    pt.valid_file_pattern =
        Regex::new(r"^(checksum\.md5|\w+\.xml|\w+_\d{6,8}\.(jp2|tif|txt|html|xml))$")
            .expect("simple file pattern");
    pt.filegroups = vec![
        FileGroupSpec::new("image", "IMG", "image", r"_\d{6,8}\.(jp2|tif)$").jhove(),
        FileGroupSpec::new("ocr", "OCR", "ocr", r"_\d{6,8}\.txt$")
            .utf8()
            .optional(),
    ];
    pt.source_mets_file = Regex::new(r"^\w+?_?mets\.xml$|^[A-Z]\w*_\w+\.xml$")
        .expect("simple METS pattern");
    pt.checksum_file = Some(Regex::new(r"^checksum\.md5$").expect("simple checksum pattern"));
    pt.stage_map = standard_stage_map();
    pt.premis_events = standard_premis_events();
    pt
}

/// Google-digitized package: checksums in a manifest, capture and image
/// compression provenance migrated from the source METS.
fn google() -> PackageType {
    let mut pt = PackageType::new("google", "Google-digitized package");
    pt.valid_file_pattern =
        Regex::new(r"^(checksum\.md5|UOM_\w+\.xml|\d{8}\.(jp2|tif|txt|html))$")
            .expect("google file pattern");
    pt.filegroups = vec![
        FileGroupSpec::new("image", "IMG", "image", r"^\d{8}\.(jp2|tif)$").jhove(),
        FileGroupSpec::new("ocr", "OCR", "ocr", r"^\d{8}\.txt$").utf8(),
        FileGroupSpec::new("hocr", "HTML", "coordOCR", r"^\d{8}\.html$")
            .utf8()
            .optional(),
    ];
    pt.source_mets_file = Regex::new(r"^UOM_\w+\.xml$").expect("google METS pattern");
    pt.checksum_file = Some(Regex::new(r"^checksum\.md5$").expect("google checksum pattern"));
    pt.stage_map = standard_stage_map();
    pt.premis_events = standard_premis_events();
    pt.source_premis_events = vec!["capture".to_owned(), "image compression".to_owned()];
    pt.source_premis_events_extract =
        vec!["capture".to_owned(), "image compression".to_owned()];
    pt.config
        .insert("artist".to_owned(), Value::from("Google"));
    pt.download_to_disk = true;
    pt
}

/// Yale-digitized package: checksums ride in the source METS, capture
/// provenance is migrated.
fn yale() -> PackageType {
    let mut pt = PackageType::new("yale", "Yale-digitized package");
    pt.valid_file_pattern = Regex::new(r"^(Yale_\w+\.xml|\w+_\d{6}\.(jp2|txt|xml))$")
        .expect("yale file pattern");
    pt.filegroups = vec![
        FileGroupSpec::new("image", "IMG", "image", r"_\d{6}\.jp2$").jhove(),
        FileGroupSpec::new("ocr", "OCR", "ocr", r"_\d{6}\.txt$").utf8(),
        FileGroupSpec::new("hocr", "HTML", "coordOCR", r"_\d{6}\.xml$")
            .utf8()
            .optional(),
    ];
    pt.source_mets_file = Regex::new(r"^Yale_\w+\.xml$").expect("yale METS pattern");
    pt.stage_map = standard_stage_map();
    pt.premis_events = standard_premis_events();
    pt.source_premis_events = vec!["capture".to_owned()];
    pt.source_premis_events_extract = vec!["capture".to_owned()];
    pt.config
        .insert("artist".to_owned(), Value::from("Yale University Library"));
    pt
}
