//! Conversion job orchestration.
//!
//! [`JobOrchestrator::run`] drives one article through the whole lifecycle:
//!
//! ```text
//! ensure archive ─▶ submit ─▶ poll … poll ─▶ retrieve ─▶ extract ─▶ publish
//!      │              │           │              │           (or clean media)
//!      ▼              ▼           ▼              ▼
//!   no file /      Failed    Failed/TimedOut   Failed
//!   already zip
//! ```
//!
//! ## Why fold errors into a report?
//!
//! A job runs detached from whatever request triggered it, so there is no
//! caller left to hand an `Err` to. Every outcome, good or bad, ends up in a
//! [`JobReport`] carrying the terminal state and the message to show the
//! user; the observer sees the same thing as it happens.
//!
//! ## One job per article
//!
//! Two layers keep an article from being converted twice at once.
//! [`JobDispatcher`] holds an in-process set of running articles, and the
//! archive's `pending_job` field survives restarts: a fresh pending job
//! refuses new submissions, a stale one is ignored so a crash can never
//! block an article forever. The running job refreshes the timestamp after
//! every status check, so a slow server never makes a live job look stale.

use crate::client::ConversionClient;
use crate::config::{FileLayout, JournalConfig};
use crate::error::{ExtractWarning, MarkupError};
use crate::model::{
    ArticleId, ArticleRecord, ArtifactId, ArtifactKind, ConversionJob, GalleyFormat, IssueRecord,
    JobId, JobState, JobStatus, JournalRecord, StoredFile, SupplementaryArchive,
};
use crate::pipeline::extract::{extract_blocking, DEFAULT_ALLOW_LIST};
use crate::pipeline::metadata::build_metadata;
use crate::pipeline::publish::ArtifactPublisher;
use crate::progress::{NoopJobProgress, ProgressCallback};
use crate::store::{ArchiveStore, GalleyStore};
use chrono::Utc;
use dashmap::DashSet;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Name the converted archive is stored under.
pub const ARCHIVE_FILE_NAME: &str = "document.zip";

/// Everything needed to convert one article.
#[derive(Debug, Clone)]
pub struct JobRequest {
    pub article: ArticleRecord,
    pub journal: JournalRecord,
    pub issue: Option<IssueRecord>,
    /// Create galleys from the result (the `refreshgalley` path).
    pub want_galley: bool,
}

impl JobRequest {
    pub fn article_id(&self) -> ArticleId {
        self.article.id
    }
}

/// Terminal outcome of one orchestration.
#[derive(Debug, Clone, Serialize)]
pub struct JobReport {
    pub article: ArticleId,
    pub job: Option<ConversionJob>,
    pub state: JobState,
    /// User-facing message. Error messages are passed through verbatim.
    pub message: String,
    /// Whether the message should be pushed to the user.
    pub notify: bool,
    pub galleys: Vec<(GalleyFormat, ArtifactId)>,
    pub extracted: Vec<PathBuf>,
    pub deleted: Vec<PathBuf>,
    pub warnings: Vec<ExtractWarning>,
}

impl JobReport {
    fn new(article: ArticleId) -> Self {
        Self {
            article,
            job: None,
            state: JobState::Idle,
            message: String::new(),
            notify: false,
            galleys: Vec::new(),
            extracted: Vec::new(),
            deleted: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn job_id(&self) -> Option<&JobId> {
        self.job.as_ref().and_then(|j| j.job_id.as_ref())
    }

    pub fn succeeded(&self) -> bool {
        self.state == JobState::Succeeded
    }
}

/// How a run ended when nothing went wrong.
enum Finish {
    AlreadyConverted,
    InFlight(JobId),
    Converted,
}

/// Validates transitions and reports them to the observer.
struct Tracker<'a> {
    report: JobReport,
    observer: &'a ProgressCallback,
}

impl Tracker<'_> {
    fn advance(&mut self, to: JobState) -> Result<(), MarkupError> {
        let from = self.report.state;
        if !from.can_transition_to(to) {
            return Err(MarkupError::Internal(format!(
                "invalid job transition {from} -> {to}"
            )));
        }
        debug!("Article {}: {} -> {}", self.report.article, from, to);
        self.report.state = to;
        self.observer.on_state_change(self.report.article, from, to);
        Ok(())
    }

    fn set_status(&mut self, status: JobStatus) {
        if let Some(job) = self.report.job.as_mut() {
            job.status = status;
        }
    }
}

/// Drives conversion jobs for one journal.
pub struct JobOrchestrator {
    client: Arc<dyn ConversionClient>,
    archives: Arc<dyn ArchiveStore>,
    publisher: ArtifactPublisher,
    config: JournalConfig,
    layout: FileLayout,
    observer: ProgressCallback,
}

impl JobOrchestrator {
    pub fn new(
        client: Arc<dyn ConversionClient>,
        archives: Arc<dyn ArchiveStore>,
        galleys: Arc<dyn GalleyStore>,
        config: JournalConfig,
        layout: FileLayout,
    ) -> Self {
        Self {
            client,
            archives,
            publisher: ArtifactPublisher::new(galleys),
            config,
            layout,
            observer: Arc::new(NoopJobProgress),
        }
    }

    pub fn with_observer(mut self, observer: ProgressCallback) -> Self {
        self.observer = observer;
        self
    }

    pub fn config(&self) -> &JournalConfig {
        &self.config
    }

    pub fn layout(&self) -> &FileLayout {
        &self.layout
    }

    pub fn publisher(&self) -> &ArtifactPublisher {
        &self.publisher
    }

    /// Convert the article's uploaded document and ingest the result.
    pub async fn run(&self, request: JobRequest) -> JobReport {
        let article = request.article_id();
        info!("Article {}: conversion requested (galleys: {})", article, request.want_galley);
        let mut tracker = Tracker {
            report: JobReport::new(article),
            observer: &self.observer,
        };
        let outcome = self.drive(&request, &mut tracker).await;
        self.conclude(tracker, outcome)
    }

    /// Continue a job whose id was recorded on the archive, without resubmitting.
    pub async fn resume(&self, request: JobRequest) -> JobReport {
        let article = request.article_id();
        let mut tracker = Tracker {
            report: JobReport::new(article),
            observer: &self.observer,
        };
        let outcome = self.drive_resume(&request, &mut tracker).await;
        self.conclude(tracker, outcome)
    }

    async fn drive(
        &self,
        request: &JobRequest,
        tracker: &mut Tracker<'_>,
    ) -> Result<Finish, MarkupError> {
        let article = request.article_id();
        let archive = self.archives.ensure_archive(article).await?;
        let source = archive
            .file
            .clone()
            .ok_or(MarkupError::NoSourceFile { article: article.0 })?;

        if source.is_archive() {
            tracker.advance(JobState::Succeeded)?;
            return Ok(Finish::AlreadyConverted);
        }
        if let Some(job) = self.fresh_pending_job(&archive) {
            return Ok(Finish::InFlight(job));
        }

        let metadata = build_metadata(
            &request.article,
            &request.journal,
            request.issue.as_ref(),
            &self.config,
            &self.layout.css_folder(request.journal.id),
        );

        tracker.report.job = Some(ConversionJob {
            article_id: article,
            job_id: None,
            source_file_path: source.path.clone(),
            status: JobStatus::Pending,
            requested_galley_link: request.want_galley,
            submitted_at: Utc::now(),
        });
        tracker.advance(JobState::Submitted)?;
        let job = self.client.submit(&source.path, &metadata).await?;

        if let Some(j) = tracker.report.job.as_mut() {
            j.job_id = Some(job.clone());
        }
        self.archives
            .set_pending_job(article, Some((job.clone(), Utc::now())))
            .await?;
        self.observer.on_notify(
            article,
            &format!("Document markup conversion in progress for article {article} (Job {job})"),
            true,
        );
        tracker.advance(JobState::Polling)?;

        self.finish_job(request, &job, tracker).await
    }

    async fn drive_resume(
        &self,
        request: &JobRequest,
        tracker: &mut Tracker<'_>,
    ) -> Result<Finish, MarkupError> {
        let article = request.article_id();
        let archive = self.archives.ensure_archive(article).await?;
        let job = archive.pending_job.clone().ok_or_else(|| {
            MarkupError::Store(format!("article {article} has no pending conversion job"))
        })?;
        info!("Article {}: resuming job {}", article, job);

        tracker.report.job = Some(ConversionJob {
            article_id: article,
            job_id: Some(job.clone()),
            source_file_path: archive.file.map(|f| f.path).unwrap_or_default(),
            status: JobStatus::Pending,
            requested_galley_link: request.want_galley,
            submitted_at: archive.pending_since.unwrap_or_else(Utc::now),
        });
        tracker.advance(JobState::Polling)?;

        self.finish_job(request, &job, tracker).await
    }

    /// Poll, retrieve, then extract and publish. Always clears the pending job.
    async fn finish_job(
        &self,
        request: &JobRequest,
        job: &JobId,
        tracker: &mut Tracker<'_>,
    ) -> Result<Finish, MarkupError> {
        let article = request.article_id();
        let retrieved = match self.poll_until_complete(article, job, tracker).await {
            Ok(()) => self.retrieve(article, job).await,
            Err(e) => Err(e),
        };
        if let Err(e) = self.archives.set_pending_job(article, None).await {
            warn!("Article {}: could not clear pending job {}: {}", article, job, e);
        }
        let stored = retrieved?;

        self.ingest(request, &stored, tracker).await?;
        tracker.advance(JobState::Succeeded)?;
        Ok(Finish::Converted)
    }

    async fn poll_until_complete(
        &self,
        article: ArticleId,
        job: &JobId,
        tracker: &mut Tracker<'_>,
    ) -> Result<(), MarkupError> {
        let max = self.config.max_polls;
        for attempt in 1..=max {
            let status = self.client.poll_status(job).await?;
            self.touch_pending(article, job).await;
            tracker.set_status(status);
            self.observer.on_poll(article, job, attempt, max, status);
            match status {
                JobStatus::Complete => {
                    debug!("Job {} complete after {} status checks", job, attempt);
                    return Ok(());
                }
                JobStatus::Failed(code) => {
                    return Err(MarkupError::Server {
                        code: Some(code),
                        message: format!("conversion job {job} failed"),
                    });
                }
                JobStatus::Pending | JobStatus::Processing => {
                    if attempt < max {
                        sleep(self.config.poll_interval()).await;
                    }
                }
            }
        }
        Err(MarkupError::PollTimeout {
            job_id: job.to_string(),
            attempts: max,
        })
    }

    /// Download the result archive and make it the article's archive file.
    async fn retrieve(&self, article: ArticleId, job: &JobId) -> Result<StoredFile, MarkupError> {
        let url = self
            .client
            .resolve_artifact_url(job, &ArtifactKind::FullArchive)
            .await?;

        let tmp = tempfile::Builder::new()
            .prefix("markup-")
            .tempdir()
            .map_err(|e| MarkupError::Internal(format!("temp dir: {e}")))?;
        let path = tmp.path().join(ARCHIVE_FILE_NAME);
        let bytes = self.client.download(&url, &path).await?;
        ensure_zip(&path).await?;
        debug!("Job {}: archive is {} bytes", job, bytes);

        let stored = self
            .archives
            .attach_file(article, &path, ARCHIVE_FILE_NAME, "application/zip")
            .await?;
        info!("Article {}: archive replaced with result of job {}", article, job);
        Ok(stored)
    }

    async fn ingest(
        &self,
        request: &JobRequest,
        archive: &StoredFile,
        tracker: &mut Tracker<'_>,
    ) -> Result<(), MarkupError> {
        let article = request.article_id();
        let markup = self.layout.markup_folder(article);

        if request.want_galley && self.config.galleys_on_refresh {
            let allow: Vec<String> = DEFAULT_ALLOW_LIST.iter().map(|s| s.to_string()).collect();
            let extraction = extract_blocking(archive.path.clone(), markup.clone(), allow).await?;
            for w in &extraction.warnings {
                warn!("Article {}: {}", article, w);
                self.observer.on_notify(article, &w.to_string(), false);
            }
            tracker.report.extracted = extraction.files;
            tracker.report.warnings = extraction.warnings;
            tracker.report.galleys = self
                .publisher
                .publish_formats(
                    article,
                    &markup,
                    &self.config.wanted_formats,
                    self.config.override_galleys,
                )
                .await?;
        } else {
            if request.want_galley {
                info!("Article {}: galley creation on refresh is disabled", article);
            }
            tracker.report.deleted = self
                .publisher
                .clean_unlinked_media(article, &markup, None)
                .await?;
        }
        Ok(())
    }

    /// Refresh the pending job's timestamp so other runs keep seeing it as live.
    async fn touch_pending(&self, article: ArticleId, job: &JobId) {
        if let Err(e) = self
            .archives
            .set_pending_job(article, Some((job.clone(), Utc::now())))
            .await
        {
            warn!("Article {}: could not refresh pending job {}: {}", article, job, e);
        }
    }

    fn fresh_pending_job(&self, archive: &SupplementaryArchive) -> Option<JobId> {
        let job = archive.pending_job.clone()?;
        let since = archive.pending_since?;
        let age = Utc::now().signed_duration_since(since).to_std().unwrap_or_default();
        if age < self.config.pending_staleness() {
            Some(job)
        } else {
            debug!("Ignoring stale pending job {} ({:?} old)", job, age);
            None
        }
    }

    fn conclude(&self, mut tracker: Tracker<'_>, outcome: Result<Finish, MarkupError>) -> JobReport {
        let article = tracker.report.article;
        match outcome {
            Ok(Finish::AlreadyConverted) => {
                tracker.report.message =
                    format!("The markup archive for article {article} is already converted.");
                tracker.report.notify = false;
            }
            Ok(Finish::InFlight(job)) => {
                tracker.report.message = format!(
                    "A conversion is already in progress for article {article} (Job {job})."
                );
                tracker.report.notify = false;
            }
            Ok(Finish::Converted) => {
                let job = tracker
                    .report
                    .job_id()
                    .map(ToString::to_string)
                    .unwrap_or_default();
                tracker.report.message =
                    format!("Document markup conversion completed {article} (Job {job})");
                tracker.report.notify = true;
            }
            Err(e) => {
                let to = match &e {
                    MarkupError::PollTimeout { .. } => JobState::TimedOut,
                    _ => JobState::Failed,
                };
                if let Err(bad) = tracker.advance(to) {
                    warn!("Article {}: {}", article, bad);
                    tracker.report.state = to;
                }
                warn!("Article {}: conversion {}: {}", article, to, e);
                tracker.report.message = e.to_string();
                tracker.report.notify = true;
            }
        }

        if tracker.report.notify {
            self.observer
                .on_notify(article, &tracker.report.message, tracker.report.succeeded());
        }
        self.observer.on_complete(article, tracker.report.state);
        tracker.report
    }
}

/// Reject downloads that are not zip archives before they replace anything.
async fn ensure_zip(path: &Path) -> Result<(), MarkupError> {
    let mut head = [0u8; 4];
    let mut file = tokio::fs::File::open(path)
        .await
        .map_err(|e| MarkupError::io(path, e))?;
    let n = tokio::io::AsyncReadExt::read(&mut file, &mut head)
        .await
        .map_err(|e| MarkupError::io(path, e))?;
    if infer::archive::is_zip(&head[..n]) {
        Ok(())
    } else {
        Err(MarkupError::CorruptArchive {
            path: path.to_path_buf(),
            detail: "downloaded result is not a zip archive".into(),
        })
    }
}

// ── Dispatch ─────────────────────────────────────────────────────────────

/// Result of asking the dispatcher to start a job.
#[derive(Debug)]
pub enum Dispatch {
    /// The job runs in the background; await the handle for its report.
    Started(JoinHandle<JobReport>),
    /// The article already has a job running in this process.
    AlreadyRunning,
}

/// Starts orchestrations in the background, at most one per article.
#[derive(Debug, Clone, Default)]
pub struct JobDispatcher {
    in_flight: Arc<DashSet<ArticleId>>,
}

struct InFlightGuard {
    set: Arc<DashSet<ArticleId>>,
    article: ArticleId,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.set.remove(&self.article);
    }
}

impl JobDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_running(&self, article: ArticleId) -> bool {
        self.in_flight.contains(&article)
    }

    /// Spawn [`JobOrchestrator::run`] and return immediately.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn trigger(&self, orchestrator: Arc<JobOrchestrator>, request: JobRequest) -> Dispatch {
        self.spawn(request.article_id(), async move {
            orchestrator.run(request).await
        })
    }

    /// Spawn [`JobOrchestrator::resume`] and return immediately.
    pub fn trigger_resume(
        &self,
        orchestrator: Arc<JobOrchestrator>,
        request: JobRequest,
    ) -> Dispatch {
        self.spawn(request.article_id(), async move {
            orchestrator.resume(request).await
        })
    }

    fn spawn<F>(&self, article: ArticleId, job: F) -> Dispatch
    where
        F: std::future::Future<Output = JobReport> + Send + 'static,
    {
        if !self.in_flight.insert(article) {
            info!("Article {}: conversion already running, trigger ignored", article);
            return Dispatch::AlreadyRunning;
        }
        let guard = InFlightGuard {
            set: Arc::clone(&self.in_flight),
            article,
        };
        Dispatch::Started(tokio::spawn(async move {
            let _guard = guard;
            job.await
        }))
    }
}
