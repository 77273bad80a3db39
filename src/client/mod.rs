//! HTTP clients for the Document Markup Server.
//!
//! ## Why a trait?
//!
//! Two generations of the server are deployed in the wild: the REST API
//! (`api/job/*`) and the older single-endpoint `process.php`. The
//! orchestrator only ever talks to [`ConversionClient`], so it neither knows
//! nor cares which one a journal points at. Tests swap in a `wiremock`
//! server behind the same trait.
//!
//! Clients are stateless: every call carries the credentials it needs and
//! nothing is cached between calls, so one client can serve many jobs.

pub mod legacy;
pub mod rest;

pub use legacy::LegacyClient;
pub use rest::RestClient;

use crate::config::{JournalConfig, ServerApi};
use crate::error::MarkupError;
use crate::model::{ArtifactKind, JobId, JobStatus, SubmissionMetadata};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::multipart::Part;
use reqwest::{RequestBuilder, Response, Url};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

/// The four operations a markup server offers.
#[async_trait]
pub trait ConversionClient: Send + Sync {
    /// Upload a source document with its metadata and return the job id.
    async fn submit(
        &self,
        source: &Path,
        metadata: &SubmissionMetadata,
    ) -> Result<JobId, MarkupError>;

    /// Ask the server how far a job has got.
    async fn poll_status(&self, job: &JobId) -> Result<JobStatus, MarkupError>;

    /// Absolute URL of a finished artifact. Never carries credentials.
    async fn resolve_artifact_url(
        &self,
        job: &JobId,
        kind: &ArtifactKind,
    ) -> Result<Url, MarkupError>;

    /// Stream `url` into `dest`, returning the number of bytes written.
    async fn download(&self, url: &Url, dest: &Path) -> Result<u64, MarkupError>;
}

/// Build the client matching the journal's configured API flavour.
pub fn client_for(config: &JournalConfig) -> Result<Arc<dyn ConversionClient>, MarkupError> {
    let client: Arc<dyn ConversionClient> = match config.api {
        ServerApi::Rest => Arc::new(RestClient::new(config)?),
        ServerApi::Legacy => Arc::new(LegacyClient::new(config)?),
    };
    Ok(client)
}

/// Hit `url` once and forget about it.
///
/// Used to kick off work in a separate request. The timeout is expected to
/// fire: the remote side keeps working after we hang up.
pub async fn fire_and_forget(url: &str, timeout: Duration) -> Result<(), MarkupError> {
    let client = reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| transport(url, e))?;

    match client.get(url).send().await {
        Ok(resp) => {
            debug!("Trigger {} answered {}", url, resp.status());
            Ok(())
        }
        Err(e) if e.is_timeout() => {
            debug!("Trigger {} detached after {:?}", url, timeout);
            Ok(())
        }
        Err(e) => Err(transport(url, e)),
    }
}

// ── Shared plumbing ──────────────────────────────────────────────────────

pub(crate) fn http_client(
    timeout: Duration,
    follow_redirects: bool,
) -> Result<reqwest::Client, MarkupError> {
    let mut builder = reqwest::Client::builder().timeout(timeout);
    if !follow_redirects {
        builder = builder.redirect(reqwest::redirect::Policy::none());
    }
    builder
        .build()
        .map_err(|e| MarkupError::Internal(format!("HTTP client setup failed: {e}")))
}

pub(crate) fn transport(url: impl Into<String>, e: reqwest::Error) -> MarkupError {
    let reason = if e.is_timeout() {
        "request timed out".to_string()
    } else {
        e.to_string()
    };
    MarkupError::Transport {
        url: url.into(),
        reason,
    }
}

/// Send a request, mapping network failures and non-2xx answers.
pub(crate) async fn send(request: RequestBuilder, url: &Url) -> Result<Response, MarkupError> {
    let response = request.send().await.map_err(|e| transport(url.as_str(), e))?;
    ensure_success(response).await
}

pub(crate) async fn ensure_success(response: Response) -> Result<Response, MarkupError> {
    let status = response.status();
    if status.is_success() || status.is_redirection() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let snippet: String = body.chars().take(200).collect();
    Err(MarkupError::Server {
        code: Some(i64::from(status.as_u16())),
        message: if snippet.trim().is_empty() {
            format!("HTTP {status}")
        } else {
            format!("HTTP {status}: {}", snippet.trim())
        },
    })
}

/// Decode a JSON body into `T`, reporting shape mismatches as protocol errors.
pub(crate) async fn read_json<T: serde::de::DeserializeOwned>(
    response: Response,
) -> Result<T, MarkupError> {
    let url = response.url().to_string();
    let text = response.text().await.map_err(|e| transport(&url, e))?;
    serde_json::from_str(&text).map_err(|e| MarkupError::Protocol {
        detail: format!("could not decode response from {url}: {e}"),
    })
}

/// Multipart part carrying a local file.
pub(crate) async fn file_part(path: &Path) -> Result<(Part, String), MarkupError> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| MarkupError::io(path, e))?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "document".to_string());
    let mime = crate::pipeline::publish::sniff_mime(&name, &bytes);
    let part = Part::bytes(bytes)
        .file_name(name.clone())
        .mime_str(&mime)
        .map_err(|e| MarkupError::Internal(format!("bad MIME type '{mime}': {e}")))?;
    Ok((part, name))
}

/// Job ids come back as either strings or numbers.
pub(crate) fn job_id_from_value(value: Option<&serde_json::Value>) -> Result<JobId, MarkupError> {
    match value {
        Some(serde_json::Value::String(s)) => JobId::parse(s),
        Some(serde_json::Value::Number(n)) => JobId::parse(&n.to_string()),
        other => Err(MarkupError::Protocol {
            detail: format!("response carries no usable job id: {other:?}"),
        }),
    }
}

/// Stream a GET response body into `dest`.
pub(crate) async fn stream_to_file(
    request: RequestBuilder,
    url: &Url,
    dest: &Path,
) -> Result<u64, MarkupError> {
    info!("Downloading {}", url);
    let response = send(request, url).await?;
    if response.status().is_redirection() {
        return Err(MarkupError::Protocol {
            detail: format!("download of {url} was redirected ({})", response.status()),
        });
    }

    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| MarkupError::io(parent, e))?;
    }
    let mut file = tokio::fs::File::create(dest)
        .await
        .map_err(|e| MarkupError::io(dest, e))?;

    let mut written: u64 = 0;
    let mut body = response.bytes_stream();
    while let Some(chunk) = body.next().await {
        let chunk = chunk.map_err(|e| transport(url.as_str(), e))?;
        file.write_all(&chunk)
            .await
            .map_err(|e| MarkupError::io(dest, e))?;
        written += chunk.len() as u64;
    }
    file.flush().await.map_err(|e| MarkupError::io(dest, e))?;

    debug!("Wrote {} bytes to {}", written, dest.display());
    Ok(written)
}

/// Drop any userinfo so resolved URLs can be logged and stored safely.
pub(crate) fn strip_credentials(mut url: Url) -> Url {
    let _ = url.set_username("");
    let _ = url.set_password(None);
    url
}
