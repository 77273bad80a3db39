//! Publication of extracted files as galleys, and cleanup of unlinked media.
//!
//! ## Override vs append
//!
//! Re-running a conversion produces the same set of formats again. With
//! `override_existing` on, a galley whose label already exists is re-pointed
//! at the freshly registered file, so readers never see two "PDF" links.
//! With it off, every run appends, which some journals use to keep earlier
//! renditions visible.

use crate::error::MarkupError;
use crate::model::{ArticleId, ArtifactId, GalleyFormat};
use crate::store::GalleyStore;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tracing::{debug, info, warn};

/// Bytes read from the head of a file for content sniffing.
const SNIFF_LEN: usize = 8192;

/// MIME type from the file's leading bytes, falling back to its extension.
pub fn sniff_mime(file_name: &str, head: &[u8]) -> String {
    if let Some(kind) = infer::get(head) {
        return kind.mime_type().to_string();
    }
    mime_from_extension(file_name).to_string()
}

pub async fn detect_mime(path: &Path) -> String {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let mut head = vec![0u8; SNIFF_LEN];
    let read = match tokio::fs::File::open(path).await {
        Ok(mut f) => f.read(&mut head).await.unwrap_or(0),
        Err(_) => 0,
    };
    sniff_mime(&name, &head[..read])
}

pub fn mime_from_extension(file_name: &str) -> &'static str {
    let ext = Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("html" | "htm") => "text/html",
        Some("xml") => "application/xml",
        Some("css") => "text/css",
        Some("js") => "application/javascript",
        Some("pdf") => "application/pdf",
        Some("epub") => "application/epub+zip",
        Some("zip") => "application/zip",
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("svg") => "image/svg+xml",
        Some("doc") => "application/msword",
        Some("docx") => {
            "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
        }
        Some("odt") => "application/vnd.oasis.opendocument.text",
        Some("txt") => "text/plain",
        _ => "application/octet-stream",
    }
}

/// Maps extracted files onto the host's galley records.
#[derive(Clone)]
pub struct ArtifactPublisher {
    galleys: Arc<dyn GalleyStore>,
}

impl ArtifactPublisher {
    pub fn new(galleys: Arc<dyn GalleyStore>) -> Self {
        Self { galleys }
    }

    /// Register `extracted` and link it under `label`.
    pub async fn publish(
        &self,
        article: ArticleId,
        extracted: &Path,
        label: &str,
        override_existing: bool,
    ) -> Result<ArtifactId, MarkupError> {
        let mime = detect_mime(extracted).await;
        let file = self.galleys.register_file(article, extracted, &mime).await?;

        if override_existing {
            let existing = self
                .galleys
                .galleys(article)
                .await?
                .into_iter()
                .find(|g| g.label.eq_ignore_ascii_case(label));
            if let Some(galley) = existing {
                self.galleys.update_galley_file(galley.id, file.file_id).await?;
                debug!("Article {}: {} galley {} updated", article, label, galley.id);
                return Ok(galley.id);
            }
        }

        let id = self.galleys.insert_galley(article, label, file.file_id).await?;
        info!("Article {}: {} galley {} created ({})", article, label, id, mime);
        Ok(id)
    }

    /// Publish each wanted format found in `markup_folder`.
    ///
    /// Formats the server did not produce are skipped with a warning.
    pub async fn publish_formats(
        &self,
        article: ArticleId,
        markup_folder: &Path,
        formats: &[GalleyFormat],
        override_existing: bool,
    ) -> Result<Vec<(GalleyFormat, ArtifactId)>, MarkupError> {
        let mut published = Vec::with_capacity(formats.len());
        for &format in formats {
            let path = markup_folder.join(format.file_name());
            if !path.is_file() {
                warn!(
                    "Article {}: no {} in conversion result, {} galley skipped",
                    article,
                    format.file_name(),
                    format
                );
                continue;
            }
            let id = self
                .publish(article, &path, format.label(), override_existing)
                .await?;
            published.push((format, id));
        }
        Ok(published)
    }

    /// Delete markup files whose format no remaining galley links to.
    ///
    /// `removing` is a format whose galley is about to go away and must not
    /// count as linked. When no family is linked at all, the whole markup
    /// folder is emptied. Returns the deleted paths.
    pub async fn clean_unlinked_media(
        &self,
        article: ArticleId,
        markup_folder: &Path,
        removing: Option<GalleyFormat>,
    ) -> Result<Vec<PathBuf>, MarkupError> {
        let linked: BTreeSet<GalleyFormat> = self
            .galleys
            .galleys(article)
            .await?
            .iter()
            .filter_map(|g| GalleyFormat::from_label(&g.label))
            .filter(|f| Some(*f) != removing)
            .collect();

        let doomed: Vec<PathBuf> = if linked.is_empty() {
            match std::fs::read_dir(markup_folder) {
                Ok(entries) => entries.filter_map(|e| e.ok()).map(|e| e.path()).collect(),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
                Err(e) => return Err(MarkupError::io(markup_folder, e)),
            }
        } else {
            GalleyFormat::ALL
                .into_iter()
                .filter(|f| !linked.contains(f))
                .flat_map(|f| f.family_files().iter())
                .map(|name| markup_folder.join(name))
                .collect()
        };

        let mut deleted = Vec::new();
        for path in doomed {
            let res = if path.is_dir() {
                tokio::fs::remove_dir_all(&path).await
            } else {
                tokio::fs::remove_file(&path).await
            };
            match res {
                Ok(()) => deleted.push(path),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(MarkupError::io(&path, e)),
            }
        }
        if !deleted.is_empty() {
            info!(
                "Article {}: removed {} unlinked markup files",
                article,
                deleted.len()
            );
        }
        Ok(deleted)
    }
}
