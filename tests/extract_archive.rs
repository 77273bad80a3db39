//! Extraction of result archives into an article's markup folder.

mod common;

use common::zip_bytes;
use markup_gateway::pipeline::extract::{extract, DEFAULT_ALLOW_LIST};
use markup_gateway::{ExtractWarning, MarkupError};
use std::path::Path;

fn write_zip(dir: &Path, entries: &[(&str, &[u8])]) -> std::path::PathBuf {
    let path = dir.join("document.zip");
    std::fs::write(&path, zip_bytes(entries)).unwrap();
    path
}

#[test]
fn epub_is_extracted_when_present() {
    let dir = tempfile::tempdir().unwrap();
    let zip = write_zip(
        dir.path(),
        &[("document.xml", b"<article/>"), ("document.epub", b"PK epub")],
    );
    let dest = dir.path().join("markup");

    let result = extract(&zip, &dest, DEFAULT_ALLOW_LIST).unwrap();
    assert!(result.contains(&dest, "document.epub"));
    assert!(dest.join("document.epub").is_file());
    assert!(result.warnings.is_empty());
}

#[test]
fn missing_epub_is_not_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let zip = write_zip(dir.path(), &[("document.xml", b"<article/>")]);
    let dest = dir.path().join("markup");

    let result = extract(&zip, &dest, DEFAULT_ALLOW_LIST).unwrap();
    assert_eq!(result.files, vec![dest.join("document.xml")]);
    assert!(!dest.join("document.epub").exists());
}

#[test]
fn narrower_allow_list_keeps_images() {
    let dir = tempfile::tempdir().unwrap();
    let zip = write_zip(
        dir.path(),
        &[
            ("document.xml", b"<article/>"),
            ("document.html", b"<html/>"),
            ("media/fig2.jpg", b"jpg"),
        ],
    );
    let dest = dir.path().join("markup");

    let result = extract(&zip, &dest, &["document.xml"]).unwrap();
    assert!(dest.join("document.xml").is_file());
    assert!(!dest.join("document.html").exists());
    assert!(dest.join("media/fig2.jpg").is_file());
    assert_eq!(result.files.len(), 2);
}

#[test]
fn nested_html_bundle_is_unpacked_and_removed() {
    let dir = tempfile::tempdir().unwrap();
    let bundle = zip_bytes(&[("index.html", b"<html/>"), ("style/site.css", b"body{}")]);
    let zip = write_zip(
        dir.path(),
        &[("document.xml", b"<article/>"), ("html.zip", &bundle)],
    );
    let dest = dir.path().join("markup");
    std::fs::create_dir_all(dest.join("html")).unwrap();
    std::fs::write(dest.join("html/old.html"), b"old").unwrap();

    let result = extract(&zip, &dest, DEFAULT_ALLOW_LIST).unwrap();
    assert!(dest.join("html/index.html").is_file());
    assert!(dest.join("html/style/site.css").is_file());
    assert!(!dest.join("html/old.html").exists());
    assert!(!dest.join("html.zip").exists());
    assert!(!result.files.contains(&dest.join("html.zip")));
}

#[test]
fn broken_nested_bundle_is_kept_with_a_warning() {
    let dir = tempfile::tempdir().unwrap();
    let zip = write_zip(
        dir.path(),
        &[("document.xml", b"<article/>"), ("html.zip", b"not a zip")],
    );
    let dest = dir.path().join("markup");

    let result = extract(&zip, &dest, DEFAULT_ALLOW_LIST).unwrap();
    assert!(dest.join("html.zip").is_file());
    assert!(matches!(
        result.warnings.as_slice(),
        [ExtractWarning::NestedArchive { .. }]
    ));
}

#[test]
fn traversal_entries_are_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let zip = write_zip(
        dir.path(),
        &[("../escape.png", b"png"), ("document.xml", b"<article/>")],
    );
    let dest = dir.path().join("markup");

    let result = extract(&zip, &dest, DEFAULT_ALLOW_LIST).unwrap();
    assert!(!dir.path().join("escape.png").exists());
    assert!(matches!(
        result.warnings.as_slice(),
        [ExtractWarning::UnsafeEntry { name }] if name == "../escape.png"
    ));
}

#[test]
fn garbage_archive_leaves_destination_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let zip = dir.path().join("document.zip");
    std::fs::write(&zip, b"definitely not a zip file").unwrap();
    let dest = dir.path().join("markup");
    std::fs::create_dir_all(&dest).unwrap();
    std::fs::write(dest.join("document.html"), b"previous").unwrap();

    let err = extract(&zip, &dest, DEFAULT_ALLOW_LIST).unwrap_err();
    assert!(matches!(err, MarkupError::CorruptArchive { .. }));
    assert_eq!(std::fs::read(dest.join("document.html")).unwrap(), b"previous");
}
