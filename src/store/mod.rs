//! Host persistence seams.
//!
//! The journal application owns articles, supplementary files and galleys.
//! This crate reaches them only through the two traits below, so it can be
//! embedded in any host that can answer them. [`MemoryStore`] is a complete
//! in-process implementation used by the CLI and the tests.

pub mod memory;

pub use memory::MemoryStore;

use crate::error::MarkupError;
use crate::model::{
    ArticleId, ArtifactId, FileId, JobId, PublishedArtifact, StoredFile, SupplementaryArchive,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::Path;

/// Access to each article's "Document Markup Files" record.
#[async_trait]
pub trait ArchiveStore: Send + Sync {
    async fn find_archive(
        &self,
        article: ArticleId,
    ) -> Result<Option<SupplementaryArchive>, MarkupError>;

    /// Return the archive record, creating an empty one on first use.
    async fn ensure_archive(&self, article: ArticleId)
        -> Result<SupplementaryArchive, MarkupError>;

    /// Record (or clear, with `None`) the outstanding server job.
    async fn set_pending_job(
        &self,
        article: ArticleId,
        job: Option<(JobId, DateTime<Utc>)>,
    ) -> Result<(), MarkupError>;

    /// Copy `source` in as the archive's backing file.
    ///
    /// The first call creates the host file; later calls overwrite it in
    /// place and keep its [`FileId`].
    async fn attach_file(
        &self,
        article: ArticleId,
        source: &Path,
        file_name: &str,
        mime_type: &str,
    ) -> Result<StoredFile, MarkupError>;
}

/// Access to an article's galleys and the files they link to.
#[async_trait]
pub trait GalleyStore: Send + Sync {
    async fn galleys(&self, article: ArticleId) -> Result<Vec<PublishedArtifact>, MarkupError>;

    /// Register a file that already sits in the article's folders.
    async fn register_file(
        &self,
        article: ArticleId,
        path: &Path,
        mime_type: &str,
    ) -> Result<StoredFile, MarkupError>;

    async fn insert_galley(
        &self,
        article: ArticleId,
        label: &str,
        file: FileId,
    ) -> Result<ArtifactId, MarkupError>;

    async fn update_galley_file(&self, galley: ArtifactId, file: FileId)
        -> Result<(), MarkupError>;
}
