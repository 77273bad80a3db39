//! Selective, all-or-nothing extraction of a conversion result archive.
//!
//! ## Why stage before committing?
//!
//! The markup folder is served live by the gateway. Writing entries straight
//! into it would expose a half-written `document.html` next to last run's
//! images if the archive turned out to be truncated. Every selected entry is
//! therefore decompressed (which verifies its CRC) into a temporary
//! directory *inside* the destination, and only moved into place once all
//! of them succeeded. Same filesystem, so the moves are plain renames.
//! Files a move would replace are set aside first; if any move fails, the
//! ones already made are undone and the set-aside files restored.
//!
//! ## What gets extracted
//!
//! The allow-list names that actually occur in the archive, plus every
//! `png`/`jpg` entry. Names on the allow-list but absent from the archive
//! are simply not requested. A nested `html.zip` is then unpacked whole into
//! `html/` and removed; if that fails, the outer files stay and the failure
//! is returned as an [`ExtractWarning`].
//!
//! Entries are written under the name the gateway resolves requests to:
//! every path segment cleaned and lower-cased, so `Figure1.PNG` lands as
//! `figure1.png`.

use crate::error::{ExtractWarning, MarkupError};
use crate::gateway::clean_file_name;
use serde::Serialize;
use std::fs::{self, File};
use std::io::{self, BufReader, Read, Seek};
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info, warn};
use zip::ZipArchive;

/// Names extracted from a conversion archive when present.
pub const DEFAULT_ALLOW_LIST: &[&str] = &[
    "manifest.xml",
    "document.xml",
    "document.pdf",
    "document-new.pdf",
    "document-review.pdf",
    "document.html",
    "document.epub",
    NESTED_HTML_ARCHIVE,
];

/// Extensions always extracted, wherever they sit in the archive.
pub const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg"];

pub const NESTED_HTML_ARCHIVE: &str = "html.zip";

/// Folder the nested html bundle is unpacked into.
pub const NESTED_HTML_DIR: &str = "html";

/// Outcome of a successful extraction.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Extraction {
    /// Every file now in place under the destination.
    pub files: Vec<PathBuf>,
    pub warnings: Vec<ExtractWarning>,
}

impl Extraction {
    pub fn contains(&self, dest: &Path, relative: &str) -> bool {
        let wanted = dest.join(relative);
        self.files.iter().any(|f| *f == wanted)
    }
}

/// Run [`extract`] on the blocking pool.
pub async fn extract_blocking(
    zip_path: PathBuf,
    dest: PathBuf,
    allow_list: Vec<String>,
) -> Result<Extraction, MarkupError> {
    tokio::task::spawn_blocking(move || extract(&zip_path, &dest, &allow_list))
        .await
        .map_err(|e| MarkupError::Internal(format!("extraction task panicked: {e}")))?
}

/// Extract the selected entries of `zip_path` into `dest`.
pub fn extract<S: AsRef<str>>(
    zip_path: &Path,
    dest: &Path,
    allow_list: &[S],
) -> Result<Extraction, MarkupError> {
    let mut archive = open_archive(zip_path)?;
    fs::create_dir_all(dest).map_err(|e| MarkupError::io(dest, e))?;

    let mut result = Extraction::default();
    let selected = |name: &str| {
        allow_list.iter().any(|a| a.as_ref() == name) || is_image(name)
    };

    let staging = tempfile::Builder::new()
        .prefix(".extract-")
        .tempdir_in(dest)
        .map_err(|e| MarkupError::io(dest, e))?;
    let staged = stage_entries(
        &mut archive,
        zip_path,
        staging.path(),
        selected,
        &mut result.warnings,
    )?;

    result.files = commit_all(staging.path(), dest, &staged)?;
    drop(staging);
    info!(
        "Extracted {} entries from {} into {}",
        result.files.len(),
        zip_path.display(),
        dest.display()
    );

    let nested = dest.join(NESTED_HTML_ARCHIVE);
    if nested.is_file() {
        match extract_nested(&nested, &dest.join(NESTED_HTML_DIR)) {
            Ok(files) => {
                fs::remove_file(&nested).map_err(|e| MarkupError::io(&nested, e))?;
                result.files.retain(|f| *f != nested);
                result.files.extend(files);
            }
            Err(e) => {
                warn!("Nested {} left in place: {}", NESTED_HTML_ARCHIVE, e);
                result.warnings.push(ExtractWarning::NestedArchive {
                    name: NESTED_HTML_ARCHIVE.to_string(),
                    detail: e.to_string(),
                });
            }
        }
    }

    Ok(result)
}

/// Unpack every entry of a nested archive into `target`, replacing it.
fn extract_nested(zip_path: &Path, target: &Path) -> Result<Vec<PathBuf>, MarkupError> {
    let mut archive = open_archive(zip_path)?;
    let parent = target
        .parent()
        .ok_or_else(|| MarkupError::Internal(format!("{} has no parent", target.display())))?;
    let staging = tempfile::Builder::new()
        .prefix(".extract-html-")
        .tempdir_in(parent)
        .map_err(|e| MarkupError::io(parent, e))?;
    let mut warnings = Vec::new();
    let staged = stage_entries(&mut archive, zip_path, staging.path(), |_| true, &mut warnings)?;
    for w in &warnings {
        warn!("{}", w);
    }

    let previous = tempfile::Builder::new()
        .prefix(".previous-html-")
        .tempdir_in(parent)
        .map_err(|e| MarkupError::io(parent, e))?;
    let saved = previous.path().join(NESTED_HTML_DIR);
    let had_previous = target.exists();
    if had_previous {
        fs::rename(target, &saved).map_err(|e| MarkupError::io(target, e))?;
    }

    let committed = fs::create_dir_all(target)
        .map_err(|e| MarkupError::io(target, e))
        .and_then(|()| commit_all(staging.path(), target, &staged));
    match committed {
        Ok(files) => {
            debug!("Unpacked {} html bundle entries", files.len());
            Ok(files)
        }
        Err(e) => {
            if let Err(cleanup) = fs::remove_dir_all(target) {
                warn!("Could not remove partial {}: {}", target.display(), cleanup);
            }
            if had_previous {
                restore(&saved, target);
            }
            Err(e)
        }
    }
}

fn open_archive(zip_path: &Path) -> Result<ZipArchive<BufReader<File>>, MarkupError> {
    let file = File::open(zip_path).map_err(|e| MarkupError::io(zip_path, e))?;
    ZipArchive::new(BufReader::new(file)).map_err(|e| MarkupError::CorruptArchive {
        path: zip_path.to_path_buf(),
        detail: e.to_string(),
    })
}

/// Decompress every selected file entry under `staging`.
///
/// Returns the relative paths written. Reading an entry to its end checks
/// its CRC, so any corruption surfaces here, before anything is committed.
fn stage_entries<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    zip_path: &Path,
    staging: &Path,
    select: impl Fn(&str) -> bool,
    warnings: &mut Vec<ExtractWarning>,
) -> Result<Vec<PathBuf>, MarkupError> {
    let corrupt = |detail: String| MarkupError::CorruptArchive {
        path: zip_path.to_path_buf(),
        detail,
    };

    let mut staged = Vec::new();
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i).map_err(|e| corrupt(e.to_string()))?;
        if entry.is_dir() || !select(entry.name()) {
            continue;
        }
        let Some(relative) = entry.enclosed_name().as_deref().and_then(served_path) else {
            warn!("Skipping unsafe archive entry {}", entry.name());
            warnings.push(ExtractWarning::UnsafeEntry {
                name: entry.name().to_string(),
            });
            continue;
        };

        let out_path = staging.join(&relative);
        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent).map_err(|e| MarkupError::io(parent, e))?;
        }
        let mut out = File::create(&out_path).map_err(|e| MarkupError::io(&out_path, e))?;
        io::copy(&mut entry, &mut out)
            .map_err(|e| corrupt(format!("entry '{}': {e}", entry.name())))?;
        staged.push(relative);
    }
    Ok(staged)
}

/// The path the gateway serves an entry under, or `None` if a segment is unusable.
fn served_path(relative: &Path) -> Option<PathBuf> {
    relative
        .components()
        .map(|c| match c {
            Component::Normal(segment) => segment.to_str().and_then(clean_file_name),
            _ => None,
        })
        .collect()
}

/// Move every staged file into `dest`. On failure the moves already made
/// are undone before the error is returned.
fn commit_all(
    staging: &Path,
    dest: &Path,
    staged: &[PathBuf],
) -> Result<Vec<PathBuf>, MarkupError> {
    let previous = tempfile::Builder::new()
        .prefix(".previous-")
        .tempdir_in(dest)
        .map_err(|e| MarkupError::io(dest, e))?;

    let mut done: Vec<(PathBuf, Option<PathBuf>)> = Vec::with_capacity(staged.len());
    for relative in staged {
        let target = dest.join(relative);
        let backup = previous.path().join(relative);
        match commit(&staging.join(relative), &target, &backup) {
            Ok(saved) => done.push((target, saved)),
            Err(e) => {
                warn!("Commit into {} failed, rolling back: {}", dest.display(), e);
                for (target, saved) in done.iter().rev() {
                    match saved {
                        Some(saved) => restore(saved, target),
                        None => {
                            if let Err(e) = fs::remove_file(target) {
                                warn!("Could not remove {}: {}", target.display(), e);
                            }
                        }
                    }
                }
                return Err(e);
            }
        }
    }
    Ok(done.into_iter().map(|(target, _)| target).collect())
}

/// Rename `staged` onto `target`, first moving whatever is there to `backup`.
fn commit(staged: &Path, target: &Path, backup: &Path) -> Result<Option<PathBuf>, MarkupError> {
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent).map_err(|e| MarkupError::io(parent, e))?;
    }
    let saved = if target.exists() {
        if let Some(parent) = backup.parent() {
            fs::create_dir_all(parent).map_err(|e| MarkupError::io(parent, e))?;
        }
        fs::rename(target, backup).map_err(|e| MarkupError::io(target, e))?;
        Some(backup.to_path_buf())
    } else {
        None
    };
    if let Err(e) = fs::rename(staged, target) {
        if let Some(saved) = &saved {
            restore(saved, target);
        }
        return Err(MarkupError::io(target, e));
    }
    Ok(saved)
}

fn restore(saved: &Path, target: &Path) {
    if let Err(e) = fs::rename(saved, target) {
        warn!("Could not restore {}: {}", target.display(), e);
    }
}

fn is_image(name: &str) -> bool {
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| {
            IMAGE_EXTENSIONS
                .iter()
                .any(|i| ext.eq_ignore_ascii_case(i))
        })
}
