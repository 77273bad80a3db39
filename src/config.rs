//! Per-journal configuration and on-disk layout.
//!
//! Every knob that changes how a journal talks to its markup server lives in
//! [`JournalConfig`], built via [`JournalConfigBuilder`]. One value per
//! tenant, cheap to clone into spawned jobs.
//!
//! # Design choice: builder over constructor
//! The config has a dozen fields, most of which keep their defaults. The
//! builder lets callers set the server and credentials and leave the rest.

use crate::error::MarkupError;
use crate::model::{ArticleId, GalleyFormat, JournalId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Markup server used when a journal has not configured one.
pub const DEFAULT_SERVER_URL: &str = "http://pkp-udev.lib.sfu.ca/";

/// Citation style file sent when none is configured.
pub const DEFAULT_CSL_STYLE: &str = "chicago-author-date.csl";

/// Human name of [`DEFAULT_CSL_STYLE`].
pub const DEFAULT_CSL_STYLE_NAME: &str = "Chicago Manual of Style (author-date)";

/// Which wire protocol the markup server speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerApi {
    /// `api/job/submit`, `api/job/status`, `api/job/retrieve`.
    #[default]
    Rest,
    /// Single `process.php` endpoint answering synchronously.
    Legacy,
}

/// Configuration for one journal's markup server integration.
///
/// # Example
/// ```rust
/// use markup_gateway::JournalConfig;
///
/// let config = JournalConfig::builder()
///     .host_url("https://markup.example.org")
///     .credentials("editor", "secret")
///     .max_polls(10)
///     .build()
///     .unwrap();
/// assert_eq!(config.host_url, "https://markup.example.org/");
/// ```
#[derive(Clone, Serialize, Deserialize)]
pub struct JournalConfig {
    /// Base URL of the markup server. Always ends with `/`.
    pub host_url: String,

    /// Account on the markup server.
    pub host_user: String,

    pub host_pass: String,

    /// Wire protocol. Default: [`ServerApi::Rest`].
    pub api: ServerApi,

    /// Citation style file name. Default: [`DEFAULT_CSL_STYLE`].
    pub csl_style: String,

    pub csl_style_name: String,

    /// Ask the server for an author-redacted `document-review.pdf`, and limit
    /// reviewers to that file. Default: false.
    pub review_version: bool,

    /// Formats that become galleys when galley links are requested.
    /// Default: HTML, PDF, XML.
    pub wanted_formats: Vec<GalleyFormat>,

    /// Update an existing same-label galley instead of appending. Default: true.
    pub override_galleys: bool,

    /// Create galleys when a refresh asks for them. When off, a
    /// `refreshgalley` request only refreshes the archive. Default: true.
    pub galleys_on_refresh: bool,

    /// Delay between two status checks. Range: 10 ms – 10 min. Default: 5000.
    pub poll_interval_ms: u64,

    /// Status checks before the job is declared timed out. Default: 60.
    ///
    /// Together with `poll_interval_ms` this is also the age after which a
    /// pending job id recorded on an archive stops blocking new submissions.
    pub max_polls: u32,

    /// Timeout for every HTTP request to the markup server. Default: 120.
    pub request_timeout_secs: u64,

    /// Timeout for the one-shot trigger notification. Default: 1000.
    pub trigger_timeout_ms: u64,

    /// Public URL the server can fetch journal stylesheets from.
    pub css_base_url: Option<String>,
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self {
            host_url: DEFAULT_SERVER_URL.to_string(),
            host_user: String::new(),
            host_pass: String::new(),
            api: ServerApi::default(),
            csl_style: DEFAULT_CSL_STYLE.to_string(),
            csl_style_name: DEFAULT_CSL_STYLE_NAME.to_string(),
            review_version: false,
            wanted_formats: vec![GalleyFormat::Html, GalleyFormat::Pdf, GalleyFormat::Xml],
            override_galleys: true,
            galleys_on_refresh: true,
            poll_interval_ms: 5000,
            max_polls: 60,
            request_timeout_secs: 120,
            trigger_timeout_ms: 1000,
            css_base_url: None,
        }
    }
}

impl fmt::Debug for JournalConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JournalConfig")
            .field("host_url", &self.host_url)
            .field("host_user", &self.host_user)
            .field("host_pass", &if self.host_pass.is_empty() { "" } else { "****" })
            .field("api", &self.api)
            .field("csl_style", &self.csl_style)
            .field("review_version", &self.review_version)
            .field("wanted_formats", &self.wanted_formats)
            .field("override_galleys", &self.override_galleys)
            .field("galleys_on_refresh", &self.galleys_on_refresh)
            .field("poll_interval_ms", &self.poll_interval_ms)
            .field("max_polls", &self.max_polls)
            .finish()
    }
}

impl JournalConfig {
    pub fn builder() -> JournalConfigBuilder {
        JournalConfigBuilder {
            config: Self::default(),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn trigger_timeout(&self) -> Duration {
        Duration::from_millis(self.trigger_timeout_ms)
    }

    /// Age after which a recorded pending job no longer counts as in flight.
    ///
    /// A live job refreshes its timestamp after every status check, so the
    /// longest silence is one wait plus a status request, or the resolve and
    /// download that follow completion.
    pub fn pending_staleness(&self) -> Duration {
        self.poll_interval() + self.request_timeout() * 2
    }

    pub fn has_credentials(&self) -> bool {
        !self.host_user.is_empty()
    }
}

/// Builder for [`JournalConfig`].
#[derive(Debug)]
pub struct JournalConfigBuilder {
    config: JournalConfig,
}

impl JournalConfigBuilder {
    pub fn host_url(mut self, url: impl Into<String>) -> Self {
        self.config.host_url = url.into().trim().to_string();
        self
    }

    pub fn credentials(mut self, user: impl Into<String>, pass: impl Into<String>) -> Self {
        self.config.host_user = user.into();
        self.config.host_pass = pass.into();
        self
    }

    pub fn api(mut self, api: ServerApi) -> Self {
        self.config.api = api;
        self
    }

    pub fn csl_style(mut self, file: impl Into<String>, name: impl Into<String>) -> Self {
        self.config.csl_style = file.into();
        self.config.csl_style_name = name.into();
        self
    }

    pub fn review_version(mut self, v: bool) -> Self {
        self.config.review_version = v;
        self
    }

    pub fn wanted_formats(mut self, formats: impl IntoIterator<Item = GalleyFormat>) -> Self {
        let mut formats: Vec<GalleyFormat> = formats.into_iter().collect();
        formats.sort_unstable();
        formats.dedup();
        self.config.wanted_formats = formats;
        self
    }

    pub fn override_galleys(mut self, v: bool) -> Self {
        self.config.override_galleys = v;
        self
    }

    pub fn galleys_on_refresh(mut self, v: bool) -> Self {
        self.config.galleys_on_refresh = v;
        self
    }

    pub fn poll_interval_ms(mut self, ms: u64) -> Self {
        self.config.poll_interval_ms = ms.clamp(10, 600_000);
        self
    }

    pub fn max_polls(mut self, n: u32) -> Self {
        self.config.max_polls = n;
        self
    }

    pub fn request_timeout_secs(mut self, secs: u64) -> Self {
        self.config.request_timeout_secs = secs.max(1);
        self
    }

    pub fn trigger_timeout_ms(mut self, ms: u64) -> Self {
        self.config.trigger_timeout_ms = ms.max(1);
        self
    }

    pub fn css_base_url(mut self, url: impl Into<String>) -> Self {
        self.config.css_base_url = Some(url.into());
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(mut self) -> Result<JournalConfig, MarkupError> {
        let c = &mut self.config;
        if c.host_url.is_empty() {
            return Err(MarkupError::InvalidConfig("host URL is empty".into()));
        }
        if !c.host_url.ends_with('/') {
            c.host_url.push('/');
        }
        reqwest::Url::parse(&c.host_url).map_err(|e| {
            MarkupError::InvalidConfig(format!("host URL '{}' is invalid: {e}", c.host_url))
        })?;
        if c.max_polls == 0 {
            return Err(MarkupError::InvalidConfig("max_polls must be ≥ 1".into()));
        }
        Ok(self.config)
    }
}

// ── File layout ──────────────────────────────────────────────────────────

/// Where the host keeps article files and journal stylesheets.
///
/// ```text
/// {files_dir}/articles/{id}/supp/           archive + supplementary files
/// {files_dir}/articles/{id}/supp/markup/    extracted conversion output
/// {files_dir}/journals/{id}/css/            journal stylesheets
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileLayout {
    pub files_dir: PathBuf,
    /// Bundled stylesheets served when a journal has none of its own.
    pub default_css_dir: PathBuf,
}

impl FileLayout {
    pub fn new(files_dir: impl Into<PathBuf>, default_css_dir: impl Into<PathBuf>) -> Self {
        Self {
            files_dir: files_dir.into(),
            default_css_dir: default_css_dir.into(),
        }
    }

    pub fn supp_folder(&self, article: ArticleId) -> PathBuf {
        self.files_dir
            .join("articles")
            .join(article.to_string())
            .join("supp")
    }

    pub fn markup_folder(&self, article: ArticleId) -> PathBuf {
        self.supp_folder(article).join("markup")
    }

    pub fn css_folder(&self, journal: JournalId) -> PathBuf {
        self.files_dir
            .join("journals")
            .join(journal.to_string())
            .join("css")
    }

    /// Resolve a stylesheet, preferring the journal's own copy.
    pub fn stylesheet(&self, journal: JournalId, file_name: &str) -> Option<PathBuf> {
        [self.css_folder(journal), self.default_css_dir.clone()]
            .into_iter()
            .map(|dir| dir.join(file_name))
            .find(|p| p.is_file())
    }

    pub fn is_inside(&self, path: &Path) -> bool {
        path.starts_with(&self.files_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let c = JournalConfig::default();
        assert_eq!(c.host_url, DEFAULT_SERVER_URL);
        assert_eq!(c.csl_style, "chicago-author-date.csl");
        assert_eq!(c.poll_interval_ms, 5000);
        assert_eq!(c.max_polls, 60);
        assert_eq!(c.request_timeout_secs, 120);
        assert_eq!(c.trigger_timeout_ms, 1000);
        assert!(c.override_galleys);
        assert!(c.galleys_on_refresh);
        assert_eq!(
            c.wanted_formats,
            vec![GalleyFormat::Html, GalleyFormat::Pdf, GalleyFormat::Xml]
        );
    }

    #[test]
    fn builder_normalises_trailing_slash() {
        let c = JournalConfig::builder()
            .host_url("http://localhost:8080/markup")
            .build()
            .unwrap();
        assert_eq!(c.host_url, "http://localhost:8080/markup/");
    }

    #[test]
    fn builder_rejects_bad_url() {
        assert!(JournalConfig::builder().host_url("").build().is_err());
        assert!(JournalConfig::builder().host_url("not a url").build().is_err());
    }

    #[test]
    fn builder_rejects_zero_polls() {
        let err = JournalConfig::builder().max_polls(0).build().unwrap_err();
        assert!(matches!(err, MarkupError::InvalidConfig(_)));
    }

    #[test]
    fn poll_interval_is_clamped() {
        let c = JournalConfig::builder().poll_interval_ms(0).build().unwrap();
        assert_eq!(c.poll_interval_ms, 10);
    }

    #[test]
    fn staleness_window() {
        let c = JournalConfig::builder()
            .poll_interval_ms(100)
            .max_polls(5)
            .request_timeout_secs(3)
            .build()
            .unwrap();
        assert_eq!(c.pending_staleness(), Duration::from_millis(6100));
    }

    #[test]
    fn debug_masks_password() {
        let c = JournalConfig::builder()
            .credentials("ed", "hunter2")
            .build()
            .unwrap();
        let dbg = format!("{c:?}");
        assert!(!dbg.contains("hunter2"));
        assert!(dbg.contains("****"));
    }

    #[test]
    fn layout_paths() {
        let l = FileLayout::new("/srv/files", "/srv/plugin/css");
        assert_eq!(
            l.markup_folder(ArticleId(7)),
            PathBuf::from("/srv/files/articles/7/supp/markup")
        );
        assert_eq!(
            l.css_folder(JournalId(2)),
            PathBuf::from("/srv/files/journals/2/css")
        );
    }

    #[test]
    fn stylesheet_falls_back_to_default_dir() {
        let files = tempfile::tempdir().unwrap();
        let bundled = tempfile::tempdir().unwrap();
        std::fs::write(bundled.path().join("article.css"), "body{}").unwrap();
        let l = FileLayout::new(files.path(), bundled.path());

        let found = l.stylesheet(JournalId(1), "article.css").unwrap();
        assert!(found.starts_with(bundled.path()));

        let own = l.css_folder(JournalId(1));
        std::fs::create_dir_all(&own).unwrap();
        std::fs::write(own.join("article.css"), "h1{}").unwrap();
        let found = l.stylesheet(JournalId(1), "article.css").unwrap();
        assert!(found.starts_with(files.path()));

        assert!(l.stylesheet(JournalId(1), "missing.css").is_none());
    }
}
