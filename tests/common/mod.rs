//! Shared fixtures for the integration tests: a mock markup server, a
//! temporary host file tree and result archives built in memory.

#![allow(dead_code)]

use markup_gateway::store::MemoryStore;
use markup_gateway::{
    client_for, ArticleId, ArticleRecord, FileLayout, JobOrchestrator, JobRequest, JournalConfig,
    JournalConfigBuilder, JournalId, JournalRecord, StoredFile,
};
use serde_json::json;
use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

pub const USER: &str = "editor@example.org";
pub const PASS: &str = "secret";
pub const JOB: &str = "job1";
pub const ARCHIVE_PATH: &str = "/files/job1/document.zip";

// ── Archives ─────────────────────────────────────────────────────────────────

pub fn zip_bytes(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut w = ZipWriter::new(std::io::Cursor::new(Vec::new()));
    for (name, data) in entries {
        w.start_file(*name, SimpleFileOptions::default()).unwrap();
        w.write_all(data).unwrap();
    }
    w.finish().unwrap().into_inner()
}

/// What a typical conversion returns.
pub fn result_archive() -> Vec<u8> {
    zip_bytes(&[
        ("manifest.xml", b"<manifest/>"),
        ("document.xml", b"<article/>"),
        ("document.html", b"<html><body>converted</body></html>"),
        ("document-new.pdf", b"%PDF-1.4 new"),
        ("document-review.pdf", b"%PDF-1.4 review"),
        ("fig1.png", b"\x89PNG\r\n\x1a\n"),
        ("notes.txt", b"server scratch"),
    ])
}

// ── Mock server ──────────────────────────────────────────────────────────────

/// Answers status checks with the next code of a script, repeating the last.
pub struct StatusScript {
    codes: Vec<i64>,
    calls: AtomicUsize,
    delay: Duration,
}

impl StatusScript {
    pub fn new(codes: &[i64]) -> Self {
        Self {
            codes: codes.to_vec(),
            calls: AtomicUsize::new(0),
            delay: Duration::ZERO,
        }
    }

    /// Make every status answer take `delay`.
    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

impl Respond for StatusScript {
    fn respond(&self, _: &Request) -> ResponseTemplate {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        let code = self
            .codes
            .get(n)
            .or(self.codes.last())
            .copied()
            .unwrap_or(0);
        ResponseTemplate::new(200)
            .set_body_json(json!({ "status": "success", "jobStatus": code }))
            .set_delay(self.delay)
    }
}

pub async fn mount_submit_ok(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/api/job/submit"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "status": "success", "id": JOB })))
        .mount(server)
        .await;
}

pub async fn mount_status(server: &MockServer, codes: &[i64]) {
    Mock::given(method("GET"))
        .and(path("/api/job/status"))
        .and(query_param("id", JOB))
        .respond_with(StatusScript::new(codes))
        .mount(server)
        .await;
}

pub async fn mount_retrieve(server: &MockServer, archive: Vec<u8>) {
    Mock::given(method("GET"))
        .and(path("/api/job/retrieve"))
        .and(query_param("id", JOB))
        .and(query_param("conversionStage", "10"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "url": ARCHIVE_PATH })))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path(ARCHIVE_PATH))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "application/zip")
                .set_body_bytes(archive),
        )
        .mount(server)
        .await;
}

/// Submit, poll with `codes`, then serve `archive`.
pub async fn mount_rest_job(server: &MockServer, codes: &[i64], archive: Vec<u8>) {
    mount_submit_ok(server).await;
    mount_status(server, codes).await;
    mount_retrieve(server, archive).await;
}

pub async fn count_requests(server: &MockServer, wanted: &str) -> usize {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|r| r.url.path() == wanted)
        .count()
}

// ── Host side ────────────────────────────────────────────────────────────────

pub struct Harness {
    pub server: MockServer,
    pub dir: TempDir,
    pub layout: FileLayout,
    pub store: Arc<MemoryStore>,
}

impl Harness {
    pub async fn start() -> Self {
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().unwrap();
        let layout = FileLayout::new(dir.path().join("files"), dir.path().join("css"));
        let store = Arc::new(MemoryStore::new(layout.clone()));
        Self {
            server,
            dir,
            layout,
            store,
        }
    }

    /// Config pointing at the mock server with a fast poll loop.
    pub fn config(&self) -> JournalConfigBuilder {
        JournalConfig::builder()
            .host_url(self.server.uri())
            .credentials(USER, PASS)
            .poll_interval_ms(10)
            .max_polls(10)
    }

    /// Upload a manuscript as the article's archive file.
    pub async fn upload(&self, article: ArticleId) -> StoredFile {
        let source = self.dir.path().join("manuscript.docx");
        std::fs::write(&source, b"manuscript body").unwrap();
        self.store.upload_source(article, &source).await.unwrap()
    }

    pub fn orchestrator(&self, config: JournalConfig) -> JobOrchestrator {
        let client = client_for(&config).unwrap();
        JobOrchestrator::new(
            client,
            self.store.clone(),
            self.store.clone(),
            config,
            self.layout.clone(),
        )
    }
}

pub fn request(article: ArticleId, want_galley: bool) -> JobRequest {
    JobRequest {
        article: ArticleRecord::new(article, JournalId(1), "On Markup"),
        journal: JournalRecord {
            id: JournalId(1),
            title: "Journal of Tests".into(),
            ..JournalRecord::default()
        },
        issue: None,
        want_galley,
    }
}
