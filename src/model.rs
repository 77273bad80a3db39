//! Domain types shared by the client, orchestrator, publisher and gate.
//!
//! Identifiers coming from the host application are opaque newtypes so an
//! article id can never be passed where a file id is expected.

use crate::error::MarkupError;
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use std::path::PathBuf;

/// Title of the supplementary file record that stands in for an article's
/// markup bundle. Matched verbatim to find the record again, so it is never
/// localised.
pub const SUPPLEMENTARY_TITLE: &str = "Document Markup Files";

/// Author-redacted PDF variant served to reviewers under the review-version setting.
pub const REVIEW_VARIANT: &str = "document-review.pdf";

/// Conversion stage the REST API uses for the full result archive.
pub const FULL_ARCHIVE_STAGE: u32 = 10;

/// Maximum length of a server-assigned job id.
pub const MAX_JOB_ID_LEN: usize = 40;

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_type!(
    /// Host article identifier.
    ArticleId
);
id_type!(
    /// Host journal (tenant) identifier.
    JournalId
);
id_type!(
    /// Host user identifier.
    UserId
);
id_type!(
    /// Host-managed file reference.
    FileId
);
id_type!(
    /// Galley (published artifact) identifier.
    ArtifactId
);
id_type!(
    /// Issue identifier.
    IssueId
);

// ── Job id ───────────────────────────────────────────────────────────────

static NON_ALNUM: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^A-Za-z0-9]+").expect("static regex"));

/// A validated server job token: 1–40 ASCII alphanumerics.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct JobId(String);

impl JobId {
    /// Validate a raw id from the server.
    ///
    /// Non-alphanumerics are stripped first; what remains must be between 1
    /// and [`MAX_JOB_ID_LEN`] characters.
    pub fn parse(raw: &str) -> Result<Self, MarkupError> {
        let cleaned = NON_ALNUM.replace_all(raw, "");
        if cleaned.is_empty() {
            return Err(MarkupError::Protocol {
                detail: format!("job id {raw:?} is empty after cleaning"),
            });
        }
        if cleaned.len() > MAX_JOB_ID_LEN {
            return Err(MarkupError::Protocol {
                detail: format!(
                    "job id is {} characters long (max {MAX_JOB_ID_LEN})",
                    cleaned.len()
                ),
            });
        }
        Ok(JobId(cleaned.into_owned()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for JobId {
    type Error = MarkupError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        JobId::parse(&value)
    }
}

impl From<JobId> for String {
    fn from(id: JobId) -> Self {
        id.0
    }
}

// ── Job status ───────────────────────────────────────────────────────────

/// Server-side status of a conversion job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    Pending,
    Processing,
    Complete,
    /// Any status code other than 0, 1 or 2.
    Failed(i64),
}

impl JobStatus {
    pub fn from_code(code: i64) -> Self {
        match code {
            0 => JobStatus::Pending,
            1 => JobStatus::Processing,
            2 => JobStatus::Complete,
            other => JobStatus::Failed(other),
        }
    }

    /// Pending and Processing mean "keep waiting".
    pub fn is_waiting(self) -> bool {
        matches!(self, JobStatus::Pending | JobStatus::Processing)
    }
}

/// Orchestration state of one conversion job.
///
/// ```text
/// Idle ──► Submitted ──► Polling ──► Succeeded
///   │          │            ├──────► Failed
///   └──────────┴──► Failed  └──────► TimedOut
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobState {
    Idle,
    Submitted,
    Polling,
    Succeeded,
    Failed,
    TimedOut,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobState::Succeeded | JobState::Failed | JobState::TimedOut
        )
    }

    /// Whether the orchestrator may move from `self` to `next`.
    pub fn can_transition_to(self, next: JobState) -> bool {
        use JobState::*;
        matches!(
            (self, next),
            (Idle, Submitted)
                | (Idle, Polling)
                | (Idle, Succeeded)
                | (Idle, Failed)
                | (Submitted, Polling)
                | (Submitted, Failed)
                | (Polling, Succeeded)
                | (Polling, Failed)
                | (Polling, TimedOut)
        )
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobState::Idle => "idle",
            JobState::Submitted => "submitted",
            JobState::Polling => "polling",
            JobState::Succeeded => "succeeded",
            JobState::Failed => "failed",
            JobState::TimedOut => "timed out",
        };
        f.write_str(s)
    }
}

/// Which converted artifact to resolve a URL for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtifactKind {
    /// The complete `document.zip` result.
    FullArchive,
    /// A single named resource inside the job folder.
    Named(String),
}

/// One conversion request/response cycle with the markup server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversionJob {
    pub article_id: ArticleId,
    pub job_id: Option<JobId>,
    pub source_file_path: PathBuf,
    pub status: JobStatus,
    pub requested_galley_link: bool,
    pub submitted_at: DateTime<Utc>,
}

// ── Rendered formats ─────────────────────────────────────────────────────

/// A rendered publication format the server produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum GalleyFormat {
    Html,
    Pdf,
    Xml,
    Epub,
}

impl GalleyFormat {
    pub const ALL: [GalleyFormat; 4] = [
        GalleyFormat::Html,
        GalleyFormat::Pdf,
        GalleyFormat::Xml,
        GalleyFormat::Epub,
    ];

    /// Galley label as the host stores it.
    pub fn label(self) -> &'static str {
        match self {
            GalleyFormat::Html => "HTML",
            GalleyFormat::Pdf => "PDF",
            GalleyFormat::Xml => "XML",
            GalleyFormat::Epub => "EPUB",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        GalleyFormat::ALL
            .into_iter()
            .find(|f| f.label().eq_ignore_ascii_case(label))
    }

    /// The extracted file a galley of this format links to.
    pub fn file_name(self) -> &'static str {
        match self {
            GalleyFormat::Html => "document.html",
            GalleyFormat::Pdf => "document-new.pdf",
            GalleyFormat::Xml => "document.xml",
            GalleyFormat::Epub => "document.epub",
        }
    }

    /// Every markup-folder entry belonging to this format family.
    pub fn family_files(self) -> &'static [&'static str] {
        match self {
            GalleyFormat::Html => &["document.html", "html"],
            GalleyFormat::Pdf => &["document-new.pdf", "document-review.pdf"],
            GalleyFormat::Xml => &["document.xml"],
            GalleyFormat::Epub => &["document.epub"],
        }
    }
}

impl fmt::Display for GalleyFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

// ── Host records ─────────────────────────────────────────────────────────

/// A host-managed file on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredFile {
    pub file_id: FileId,
    pub file_name: String,
    pub path: PathBuf,
    pub mime_type: String,
}

impl StoredFile {
    /// Whether this file is already a finished conversion archive.
    pub fn is_archive(&self) -> bool {
        self.file_name.to_ascii_lowercase().ends_with(".zip")
    }
}

/// The host's "Document Markup Files" record for one article.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupplementaryArchive {
    pub article_id: ArticleId,
    pub title: String,
    /// `None` exactly when no file has ever been attached.
    pub file: Option<StoredFile>,
    /// Outstanding server job, if one is in flight.
    pub pending_job: Option<JobId>,
    pub pending_since: Option<DateTime<Utc>>,
}

impl SupplementaryArchive {
    pub fn new(article_id: ArticleId) -> Self {
        Self {
            article_id,
            title: SUPPLEMENTARY_TITLE.to_string(),
            file: None,
            pending_job: None,
            pending_since: None,
        }
    }
}

/// A galley: one rendered format linked to an article.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishedArtifact {
    pub id: ArtifactId,
    pub article_id: ArticleId,
    pub label: String,
    pub file_id: FileId,
}

// ── Submission metadata ──────────────────────────────────────────────────

/// Author as the host stores it, including fields the server must not see.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HostAuthor {
    pub first_name: String,
    pub middle_name: Option<String>,
    pub last_name: String,
    pub email: Option<String>,
    pub country: Option<String>,
    pub url: Option<String>,
    pub affiliation: Option<String>,
    pub primary_contact: bool,
    pub sequence: u32,
    pub biography: Option<String>,
}

/// Author as sent to the server: no sequencing, no biography.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionAuthor {
    pub first_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub middle_name: Option<String>,
    pub last_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub affiliation: Option<String>,
    pub primary_contact: bool,
}

impl From<&HostAuthor> for SubmissionAuthor {
    fn from(a: &HostAuthor) -> Self {
        Self {
            first_name: a.first_name.clone(),
            middle_name: a.middle_name.clone(),
            last_name: a.last_name.clone(),
            email: a.email.clone(),
            country: a.country.clone(),
            url: a.url.clone(),
            affiliation: a.affiliation.clone(),
            primary_contact: a.primary_contact,
        }
    }
}

/// Article fields the metadata builder reads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArticleRecord {
    pub id: ArticleId,
    pub journal_id: JournalId,
    pub title: String,
    pub authors: Vec<HostAuthor>,
    pub doi: Option<String>,
}

impl ArticleRecord {
    pub fn new(id: ArticleId, journal_id: JournalId, title: impl Into<String>) -> Self {
        Self {
            id,
            journal_id,
            title: title.into(),
            authors: Vec::new(),
            doi: None,
        }
    }
}

/// Journal fields the metadata builder reads. Free-text notices may carry HTML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JournalRecord {
    pub id: JournalId,
    pub title: String,
    pub copyright_notice: String,
    pub publisher_note: String,
    pub open_access_policy: String,
    pub online_issn: Option<String>,
    pub print_issn: Option<String>,
}

/// Issue an article is assigned to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssueRecord {
    pub id: IssueId,
    pub number: Option<String>,
    pub volume: Option<u32>,
    pub year: Option<i32>,
    pub date_published: Option<DateTime<Utc>>,
    pub published: bool,
}

/// The structured payload sent alongside the source document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionMetadata {
    pub title: String,
    pub authors: Vec<SubmissionAuthor>,
    pub journal_id: JournalId,
    pub article_id: ArticleId,
    pub publication_name: String,
    pub copyright: String,
    pub publisher: String,
    pub rights: String,
    #[serde(rename = "eISSN", skip_serializing_if = "Option::is_none")]
    pub eissn: Option<String>,
    #[serde(rename = "ISSN", skip_serializing_if = "Option::is_none")]
    pub issn: Option<String>,
    #[serde(rename = "DOI", skip_serializing_if = "Option::is_none")]
    pub doi: Option<String>,
    pub csl_style: String,
    #[serde(rename = "cssHeaderImageURL", skip_serializing_if = "Option::is_none")]
    pub css_header_image_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub year: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub publication_date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub review_version: bool,
}

/// Who is making a gateway request, from where, and when.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestContext {
    pub requester: Option<UserId>,
    pub journal: JournalId,
    pub remote_addr: Option<IpAddr>,
    pub now: DateTime<Utc>,
}

impl RequestContext {
    pub fn anonymous(journal: JournalId) -> Self {
        Self {
            requester: None,
            journal,
            remote_addr: None,
            now: Utc::now(),
        }
    }

    pub fn user(journal: JournalId, user: UserId) -> Self {
        Self {
            requester: Some(user),
            ..Self::anonymous(journal)
        }
    }
}
