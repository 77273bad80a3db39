//! In-memory host store backed by a real files directory.
//!
//! Records live in a mutex-guarded map; files are copied to the same
//! [`FileLayout`] a real host uses, so extraction, publishing and the
//! gateway see genuine paths.

use super::{ArchiveStore, GalleyStore};
use crate::config::FileLayout;
use crate::error::MarkupError;
use crate::model::{
    ArticleId, ArtifactId, FileId, JobId, PublishedArtifact, StoredFile, SupplementaryArchive,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

#[derive(Debug, Default)]
struct Tables {
    archives: HashMap<ArticleId, SupplementaryArchive>,
    files: HashMap<FileId, StoredFile>,
    galleys: Vec<PublishedArtifact>,
    next_file: u64,
    next_galley: u64,
}

impl Tables {
    fn next_file_id(&mut self) -> FileId {
        self.next_file += 1;
        FileId(self.next_file)
    }
}

#[derive(Debug)]
pub struct MemoryStore {
    layout: FileLayout,
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new(layout: FileLayout) -> Self {
        Self {
            layout,
            tables: Mutex::new(Tables::default()),
        }
    }

    pub fn layout(&self) -> &FileLayout {
        &self.layout
    }

    fn lock(&self) -> Result<MutexGuard<'_, Tables>, MarkupError> {
        self.tables
            .lock()
            .map_err(|_| MarkupError::Store("store lock poisoned".into()))
    }

    /// Copy an uploaded document in as the article's archive file.
    ///
    /// This is what the host does when an author uploads a new version.
    pub async fn upload_source(
        &self,
        article: ArticleId,
        source: &Path,
    ) -> Result<StoredFile, MarkupError> {
        self.ensure_archive(article).await?;
        let name = source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| MarkupError::Store(format!("{} has no file name", source.display())))?;
        let mime = crate::pipeline::publish::detect_mime(source).await;
        self.attach_file(article, source, &name, &mime).await
    }

    /// Look up a registered file.
    pub fn file(&self, id: FileId) -> Result<Option<StoredFile>, MarkupError> {
        Ok(self.lock()?.files.get(&id).cloned())
    }
}

#[async_trait]
impl ArchiveStore for MemoryStore {
    async fn find_archive(
        &self,
        article: ArticleId,
    ) -> Result<Option<SupplementaryArchive>, MarkupError> {
        Ok(self.lock()?.archives.get(&article).cloned())
    }

    async fn ensure_archive(
        &self,
        article: ArticleId,
    ) -> Result<SupplementaryArchive, MarkupError> {
        let mut t = self.lock()?;
        Ok(t.archives
            .entry(article)
            .or_insert_with(|| SupplementaryArchive::new(article))
            .clone())
    }

    async fn set_pending_job(
        &self,
        article: ArticleId,
        job: Option<(JobId, DateTime<Utc>)>,
    ) -> Result<(), MarkupError> {
        let mut t = self.lock()?;
        let archive = t
            .archives
            .get_mut(&article)
            .ok_or_else(|| MarkupError::Store(format!("article {article} has no archive")))?;
        let (job, since) = job.map_or((None, None), |(j, s)| (Some(j), Some(s)));
        archive.pending_job = job;
        archive.pending_since = since;
        Ok(())
    }

    async fn attach_file(
        &self,
        article: ArticleId,
        source: &Path,
        file_name: &str,
        mime_type: &str,
    ) -> Result<StoredFile, MarkupError> {
        let folder = self.layout.supp_folder(article);
        tokio::fs::create_dir_all(&folder)
            .await
            .map_err(|e| MarkupError::io(&folder, e))?;
        let target = folder.join(file_name);

        let previous = self
            .lock()?
            .archives
            .get(&article)
            .and_then(|a| a.file.clone());

        tokio::fs::copy(source, &target)
            .await
            .map_err(|e| MarkupError::io(source, e))?;
        if let Some(prev) = &previous {
            if prev.path != target {
                if let Err(e) = tokio::fs::remove_file(&prev.path).await {
                    warn!(
                        "Article {}: could not remove replaced file {}: {}",
                        article,
                        prev.path.display(),
                        e
                    );
                }
            }
        }

        let mut t = self.lock()?;
        let file_id = match &previous {
            Some(prev) => prev.file_id,
            None => t.next_file_id(),
        };
        let stored = StoredFile {
            file_id,
            file_name: file_name.to_string(),
            path: target,
            mime_type: mime_type.to_string(),
        };
        t.files.insert(file_id, stored.clone());
        let archive = t
            .archives
            .entry(article)
            .or_insert_with(|| SupplementaryArchive::new(article));
        archive.file = Some(stored.clone());
        debug!("Article {} archive file is now {}", article, file_name);
        Ok(stored)
    }
}

#[async_trait]
impl GalleyStore for MemoryStore {
    async fn galleys(&self, article: ArticleId) -> Result<Vec<PublishedArtifact>, MarkupError> {
        Ok(self
            .lock()?
            .galleys
            .iter()
            .filter(|g| g.article_id == article)
            .cloned()
            .collect())
    }

    async fn register_file(
        &self,
        article: ArticleId,
        path: &Path,
        mime_type: &str,
    ) -> Result<StoredFile, MarkupError> {
        if !path.starts_with(self.layout.supp_folder(article)) {
            return Err(MarkupError::Store(format!(
                "{} is outside article {article}'s folder",
                path.display()
            )));
        }
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let mut t = self.lock()?;
        let file_id = t.next_file_id();
        let stored = StoredFile {
            file_id,
            file_name,
            path: path.to_path_buf(),
            mime_type: mime_type.to_string(),
        };
        t.files.insert(file_id, stored.clone());
        Ok(stored)
    }

    async fn insert_galley(
        &self,
        article: ArticleId,
        label: &str,
        file: FileId,
    ) -> Result<ArtifactId, MarkupError> {
        let mut t = self.lock()?;
        t.next_galley += 1;
        let id = ArtifactId(t.next_galley);
        t.galleys.push(PublishedArtifact {
            id,
            article_id: article,
            label: label.to_string(),
            file_id: file,
        });
        Ok(id)
    }

    async fn update_galley_file(
        &self,
        galley: ArtifactId,
        file: FileId,
    ) -> Result<(), MarkupError> {
        let mut t = self.lock()?;
        let g = t
            .galleys
            .iter_mut()
            .find(|g| g.id == galley)
            .ok_or_else(|| MarkupError::Store(format!("no galley {galley}")))?;
        g.file_id = file;
        Ok(())
    }
}
