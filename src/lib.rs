//! # markup-gateway
//!
//! Send journal articles to a Document Markup Server and turn the converted
//! archive into published galleys.
//!
//! ## Why this crate?
//!
//! A markup server takes a word-processor or PDF manuscript and returns a zip
//! of typeset renditions (JATS XML, HTML, PDF, EPUB). Talking to it is the
//! easy part. The work is in everything around the call: building the
//! submission metadata from the journal's records, polling a job that may take
//! minutes, keeping one job per article even across restarts, unpacking only
//! the expected entries, and deciding who may download what afterwards.
//!
//! ## Pipeline Overview
//!
//! ```text
//! article
//!  │
//!  ├─ 1. Archive   find the "Document Markup Files" supplementary file
//!  ├─ 2. Metadata  journal, issue and author records → JSON payload
//!  ├─ 3. Submit    multipart upload (REST or legacy API) → job id
//!  ├─ 4. Poll      fixed interval, bounded attempts
//!  ├─ 5. Retrieve  stream document.zip, replace the source file
//!  └─ 6. Ingest    extract + register galleys, or clean unlinked media
//! ```
//!
//! Downloads of converted files go through [`Gateway`], which applies the
//! journal's subscription and role rules via [`AccessGate`].
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use markup_gateway::store::MemoryStore;
//! use markup_gateway::{
//!     client_for, ArticleId, ArticleRecord, FileLayout, JobOrchestrator, JobRequest,
//!     JournalConfig, JournalId, JournalRecord,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = JournalConfig::builder()
//!         .host_url("https://markup.example.org/")
//!         .credentials("editor@example.org", "secret")
//!         .build()?;
//!     let layout = FileLayout::new("/var/journal/files", "/var/journal/css");
//!     let store = Arc::new(MemoryStore::new(layout.clone()));
//!     store.upload_source(ArticleId(7), "manuscript.docx".as_ref()).await?;
//!
//!     let orchestrator =
//!         JobOrchestrator::new(client_for(&config)?, store.clone(), store, config, layout);
//!     let report = orchestrator
//!         .run(JobRequest {
//!             article: ArticleRecord::new(ArticleId(7), JournalId(1), "On Markup"),
//!             journal: JournalRecord::default(),
//!             issue: None,
//!             want_galley: true,
//!         })
//!         .await;
//!     println!("{}: {}", report.state, report.message);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `markupctl` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when embedding the library:
//! ```toml
//! markup-gateway = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod access;
pub mod client;
pub mod config;
pub mod error;
pub mod gateway;
pub mod model;
pub mod orchestrator;
pub mod pipeline;
pub mod progress;
pub mod store;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use access::{AccessDecision, AccessGate, AccessPolicy, ArticleAccess, Requester, Role};
pub use client::legacy::LegacyClient;
pub use client::rest::RestClient;
pub use client::{client_for, fire_and_forget, ConversionClient};
pub use config::{FileLayout, JournalConfig, JournalConfigBuilder, ServerApi};
pub use error::{ExtractWarning, MarkupError};
pub use gateway::{Gateway, GatewayRequest, GatewayResponse, HostDirectory, Refusal};
pub use model::{
    ArticleId, ArticleRecord, ArtifactId, ArtifactKind, ConversionJob, FileId, GalleyFormat,
    HostAuthor, IssueId, IssueRecord, JobId, JobState, JobStatus, JournalId, JournalRecord,
    PublishedArtifact, RequestContext, StoredFile, SubmissionMetadata, SupplementaryArchive,
    UserId,
};
pub use orchestrator::{Dispatch, JobDispatcher, JobOrchestrator, JobReport, JobRequest};
pub use progress::{JobProgressCallback, NoopJobProgress, ProgressCallback};
