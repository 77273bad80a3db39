//! Request surface for converted files and refresh triggers.
//!
//! The host web layer hands over the path segments that follow the plugin's
//! mount point and renders whatever [`GatewayResponse`] comes back:
//!
//! ```text
//! css/<file>                    journal stylesheet (public)
//! <article>/refresh             convert, then clean unlinked media
//! <article>/refreshgalley       convert, then extract and create galleys
//! <article>/0/<file...>         converted file, behind the access gate
//! ```
//!
//! Refusals are short user-facing messages. Internal failures are logged and
//! replaced by a generic message so no paths or identifiers leak.

use crate::access::{AccessGate, AccessPolicy, ArticleAccess, Requester};
use crate::error::MarkupError;
use crate::model::{ArticleId, JournalId, RequestContext};
use crate::orchestrator::{Dispatch, JobDispatcher, JobOrchestrator, JobRequest};
use crate::pipeline::publish::detect_mime;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, warn};

static UNSAFE_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^A-Za-z0-9._-]").expect("static regex"));

/// Revision segment of download paths. Only revision 0 exists.
pub const REVISION: &str = "0";

/// Strip everything but `[A-Za-z0-9._-]` and lower-case.
///
/// Returns `None` when nothing usable is left or the result is `.`/`..`.
pub fn clean_file_name(segment: &str) -> Option<String> {
    let cleaned = UNSAFE_CHARS.replace_all(segment, "").to_lowercase();
    match cleaned.as_str() {
        "" | "." | ".." => None,
        _ => Some(cleaned),
    }
}

/// URL the markup server (or a galley link) uses to reach a converted file.
pub fn download_url(base: &str, article: ArticleId, file: &str) -> String {
    format!("{}/{}/{}/{}", base.trim_end_matches('/'), article, REVISION, file)
}

/// URL that triggers a refresh of an article's archive.
pub fn refresh_url(base: &str, article: ArticleId, galley: bool) -> String {
    let verb = if galley { "refreshgalley" } else { "refresh" };
    format!("{}/{}/{}", base.trim_end_matches('/'), article, verb)
}

/// A parsed gateway path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayRequest {
    Stylesheet { file: String },
    Refresh { article: ArticleId, galley: bool },
    Download { article: ArticleId, file: PathBuf },
}

/// Why a request was turned away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Refusal {
    BadPath,
    BadArticleId,
    BadFileName,
    NoSuchArticle,
    NoSuchFile,
    LoginRequired,
    NoAccess,
    Unavailable,
}

impl Refusal {
    pub fn message(self) -> &'static str {
        match self {
            Refusal::BadPath => "Unrecognised request.",
            Refusal::BadArticleId => "Article Id parameter is invalid or missing.",
            Refusal::BadFileName => "The requested file name is invalid.",
            Refusal::NoSuchArticle => "No such article.",
            Refusal::NoSuchFile => "That file does not exist.",
            Refusal::LoginRequired => "You need to login to view this file.",
            Refusal::NoAccess => "You do not have access to this file.",
            Refusal::Unavailable => "The request could not be completed. Please try again later.",
        }
    }
}

/// Parse the path segments after the mount point.
pub fn parse_gateway_path(segments: &[&str]) -> Result<GatewayRequest, Refusal> {
    let Some((first, rest)) = segments.split_first() else {
        return Err(Refusal::BadPath);
    };

    if first.eq_ignore_ascii_case("css") {
        return match rest {
            [file] => clean_file_name(file)
                .map(|file| GatewayRequest::Stylesheet { file })
                .ok_or(Refusal::BadFileName),
            _ => Err(Refusal::BadPath),
        };
    }

    let article = match first.parse::<u64>() {
        Ok(id) if id > 0 => ArticleId(id),
        _ => return Err(Refusal::BadArticleId),
    };

    match rest {
        [verb] if verb.eq_ignore_ascii_case("refresh") => Ok(GatewayRequest::Refresh {
            article,
            galley: false,
        }),
        [verb] if verb.eq_ignore_ascii_case("refreshgalley") => Ok(GatewayRequest::Refresh {
            article,
            galley: true,
        }),
        [revision, file @ ..] if *revision == REVISION && !file.is_empty() => {
            let mut path = PathBuf::new();
            for segment in file {
                path.push(clean_file_name(segment).ok_or(Refusal::BadFileName)?);
            }
            Ok(GatewayRequest::Download {
                article,
                file: path,
            })
        }
        _ => Err(Refusal::BadPath),
    }
}

/// What the gateway needs to know about the host's articles and users.
#[async_trait]
pub trait HostDirectory: Send + Sync {
    /// Access facts for an article of `journal`, `None` if it does not exist.
    async fn article_access(
        &self,
        article: ArticleId,
        journal: JournalId,
    ) -> Result<Option<ArticleAccess>, MarkupError>;

    /// Roles and entitlements of the requester relative to `article`.
    async fn requester(
        &self,
        ctx: &RequestContext,
        article: ArticleId,
    ) -> Result<Requester, MarkupError>;

    async fn access_policy(&self, journal: JournalId) -> Result<AccessPolicy, MarkupError>;

    /// Records needed to convert `article`, `None` if it does not exist.
    async fn job_request(
        &self,
        article: ArticleId,
        want_galley: bool,
    ) -> Result<Option<JobRequest>, MarkupError>;
}

/// What to send back to the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum GatewayResponse {
    /// Stream this file with this content type.
    File { path: PathBuf, mime: String },
    /// Show a message; `notify` asks the host to push it as a notification.
    Status { message: String, notify: bool },
    /// A conversion was started in the background.
    Triggered { article: ArticleId },
}

impl GatewayResponse {
    fn refused(r: Refusal) -> Self {
        GatewayResponse::Status {
            message: r.message().to_string(),
            notify: false,
        }
    }
}

pub struct Gateway {
    orchestrator: Arc<JobOrchestrator>,
    dispatcher: JobDispatcher,
    directory: Arc<dyn HostDirectory>,
}

impl Gateway {
    pub fn new(
        orchestrator: Arc<JobOrchestrator>,
        dispatcher: JobDispatcher,
        directory: Arc<dyn HostDirectory>,
    ) -> Self {
        Self {
            orchestrator,
            dispatcher,
            directory,
        }
    }

    pub fn dispatcher(&self) -> &JobDispatcher {
        &self.dispatcher
    }

    pub async fn handle(&self, ctx: &RequestContext, segments: &[&str]) -> GatewayResponse {
        let request = match parse_gateway_path(segments) {
            Ok(r) => r,
            Err(refusal) => {
                debug!("Gateway refused {:?}: {:?}", segments, refusal);
                return GatewayResponse::refused(refusal);
            }
        };

        let outcome = match request {
            GatewayRequest::Stylesheet { file } => Ok(self.stylesheet(ctx, &file).await),
            GatewayRequest::Refresh { article, galley } => self.refresh(article, galley).await,
            GatewayRequest::Download { article, file } => self.download(ctx, article, file).await,
        };

        outcome.unwrap_or_else(|e| {
            warn!("Gateway request {:?} failed: {}", segments, e);
            GatewayResponse::refused(Refusal::Unavailable)
        })
    }

    async fn stylesheet(&self, ctx: &RequestContext, file: &str) -> GatewayResponse {
        match self.orchestrator.layout().stylesheet(ctx.journal, file) {
            Some(path) => {
                let mime = detect_mime(&path).await;
                GatewayResponse::File { path, mime }
            }
            None => GatewayResponse::refused(Refusal::NoSuchFile),
        }
    }

    async fn refresh(
        &self,
        article: ArticleId,
        galley: bool,
    ) -> Result<GatewayResponse, MarkupError> {
        let Some(request) = self.directory.job_request(article, galley).await? else {
            return Ok(GatewayResponse::refused(Refusal::NoSuchArticle));
        };
        Ok(
            match self.dispatcher.trigger(Arc::clone(&self.orchestrator), request) {
                Dispatch::Started(_) => GatewayResponse::Triggered { article },
                Dispatch::AlreadyRunning => GatewayResponse::Status {
                    message: format!("A conversion is already in progress for article {article}."),
                    notify: false,
                },
            },
        )
    }

    async fn download(
        &self,
        ctx: &RequestContext,
        article: ArticleId,
        file: PathBuf,
    ) -> Result<GatewayResponse, MarkupError> {
        let Some(access) = self.directory.article_access(article, ctx.journal).await? else {
            return Ok(GatewayResponse::refused(Refusal::NoSuchArticle));
        };

        let path = self.orchestrator.layout().markup_folder(article).join(&file);
        if !path.is_file() {
            return Ok(GatewayResponse::refused(Refusal::NoSuchFile));
        }

        let requester = self.directory.requester(ctx, article).await?;
        let policy = self.directory.access_policy(ctx.journal).await?;
        let file_name = file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let decision = AccessGate::can_download(&requester, &access, &policy, &file_name, ctx.now);
        debug!("Article {} file {}: {:?}", article, file.display(), decision);
        if decision.is_allowed() {
            let mime = detect_mime(&path).await;
            return Ok(GatewayResponse::File { path, mime });
        }
        Ok(GatewayResponse::refused(if requester.is_logged_in() {
            Refusal::NoAccess
        } else {
            Refusal::LoginRequired
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cleans_file_names() {
        assert_eq!(clean_file_name("Document.HTML").as_deref(), Some("document.html"));
        assert_eq!(clean_file_name("fig 1?.png").as_deref(), Some("fig1.png"));
        assert_eq!(clean_file_name("../etc"), Some("..etc".to_string()));
        assert_eq!(clean_file_name(".."), None);
        assert_eq!(clean_file_name("."), None);
        assert_eq!(clean_file_name("/?"), None);
    }

    #[test]
    fn parses_stylesheet() {
        assert_eq!(
            parse_gateway_path(&["css", "Article.css"]),
            Ok(GatewayRequest::Stylesheet {
                file: "article.css".into()
            })
        );
        assert_eq!(parse_gateway_path(&["css"]), Err(Refusal::BadPath));
    }

    #[test]
    fn parses_refresh_verbs() {
        assert_eq!(
            parse_gateway_path(&["12", "refresh"]),
            Ok(GatewayRequest::Refresh {
                article: ArticleId(12),
                galley: false
            })
        );
        assert_eq!(
            parse_gateway_path(&["12", "refreshGalley"]),
            Ok(GatewayRequest::Refresh {
                article: ArticleId(12),
                galley: true
            })
        );
    }

    #[test]
    fn parses_downloads() {
        assert_eq!(
            parse_gateway_path(&["5", "0", "html", "Index.html"]),
            Ok(GatewayRequest::Download {
                article: ArticleId(5),
                file: PathBuf::from("html/index.html")
            })
        );
        assert_eq!(
            parse_gateway_path(&["5", "0", ".."]),
            Err(Refusal::BadFileName)
        );
        assert_eq!(parse_gateway_path(&["5", "0"]), Err(Refusal::BadPath));
        assert_eq!(parse_gateway_path(&["5", "1", "a.pdf"]), Err(Refusal::BadPath));
    }

    #[test]
    fn bad_article_ids() {
        assert_eq!(parse_gateway_path(&["abc", "refresh"]), Err(Refusal::BadArticleId));
        assert_eq!(parse_gateway_path(&["0", "refresh"]), Err(Refusal::BadArticleId));
        assert_eq!(parse_gateway_path(&[]), Err(Refusal::BadPath));
    }

    #[test]
    fn urls() {
        assert_eq!(
            download_url("https://j.org/markup/", ArticleId(3), "document.html"),
            "https://j.org/markup/3/0/document.html"
        );
        assert_eq!(
            refresh_url("https://j.org/markup", ArticleId(3), true),
            "https://j.org/markup/3/refreshgalley"
        );
    }

    #[test]
    fn refusal_messages_are_short() {
        for r in [
            Refusal::BadPath,
            Refusal::NoSuchFile,
            Refusal::LoginRequired,
            Refusal::Unavailable,
        ] {
            assert!(r.message().len() < 80);
        }
        assert_eq!(Refusal::NoSuchFile.message(), "That file does not exist.");
    }
}
