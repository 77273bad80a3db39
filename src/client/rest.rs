//! Client for the REST flavour of the markup server.
//!
//! ```text
//! POST {base}api/job/submit      multipart: file, fileName, citationStyleHash, metadata
//! GET  {base}api/job/status?id=
//! GET  {base}api/job/retrieve?id=&conversionStage=10    → 3xx Location or {"url": ...}
//! ```
//!
//! Every request authenticates with HTTP basic auth.

use super::{
    ensure_success, file_part, http_client, job_id_from_value, read_json, send, stream_to_file,
    strip_credentials, transport, ConversionClient,
};
use crate::config::JournalConfig;
use crate::error::MarkupError;
use crate::model::{ArtifactKind, JobId, JobStatus, SubmissionMetadata, FULL_ARCHIVE_STAGE};
use async_trait::async_trait;
use reqwest::header::{CONTENT_TYPE, LOCATION};
use reqwest::multipart::Form;
use reqwest::{RequestBuilder, Url};
use serde::Deserialize;
use std::path::Path;
use tracing::{debug, info};

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    status: String,
    #[serde(default)]
    id: Option<serde_json::Value>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatusResponse {
    status: String,
    #[serde(default)]
    job_status: Option<i64>,
    #[serde(default)]
    error: Option<String>,
}

/// The retrieve endpoint may omit `status` on success.
#[derive(Debug, Deserialize)]
struct RetrieveResponse {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// REST client bound to one journal's server and credentials.
#[derive(Debug, Clone)]
pub struct RestClient {
    base: Url,
    user: String,
    pass: String,
    citation_style: String,
    http: reqwest::Client,
    /// Same settings, but 3xx answers are returned instead of followed.
    no_redirect: reqwest::Client,
}

impl RestClient {
    pub fn new(config: &JournalConfig) -> Result<Self, MarkupError> {
        let base = Url::parse(&config.host_url).map_err(|e| {
            MarkupError::InvalidConfig(format!("host URL '{}': {e}", config.host_url))
        })?;
        Ok(Self {
            base,
            user: config.host_user.clone(),
            pass: config.host_pass.clone(),
            citation_style: config.csl_style.clone(),
            http: http_client(config.request_timeout(), true)?,
            no_redirect: http_client(config.request_timeout(), false)?,
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, MarkupError> {
        self.base
            .join(path)
            .map_err(|e| MarkupError::Internal(format!("cannot build URL for {path}: {e}")))
    }

    fn authed(&self, request: RequestBuilder) -> RequestBuilder {
        if self.user.is_empty() {
            request
        } else {
            request.basic_auth(&self.user, Some(&self.pass))
        }
    }
}

fn server_error(status: &str, error: Option<String>) -> MarkupError {
    MarkupError::Server {
        code: None,
        message: error.unwrap_or_else(|| format!("server answered status '{status}'")),
    }
}

#[async_trait]
impl ConversionClient for RestClient {
    async fn submit(
        &self,
        source: &Path,
        metadata: &SubmissionMetadata,
    ) -> Result<JobId, MarkupError> {
        let url = self.endpoint("api/job/submit")?;
        let (part, file_name) = file_part(source).await?;
        let metadata_json = serde_json::to_string(metadata)
            .map_err(|e| MarkupError::Internal(format!("metadata encoding failed: {e}")))?;
        debug!("Submitting {} with metadata {}", file_name, metadata_json);

        let form = Form::new()
            .part("file", part)
            .text("fileName", file_name)
            .text("citationStyleHash", self.citation_style.clone())
            .text("metadata", metadata_json);

        let response = send(self.authed(self.http.post(url.clone())).multipart(form), &url).await?;
        let body: SubmitResponse = read_json(response).await?;
        if body.status != "success" {
            return Err(server_error(&body.status, body.error));
        }
        let job = job_id_from_value(body.id.as_ref())?;
        info!("Markup server accepted job {}", job);
        Ok(job)
    }

    async fn poll_status(&self, job: &JobId) -> Result<JobStatus, MarkupError> {
        let mut url = self.endpoint("api/job/status")?;
        url.query_pairs_mut().append_pair("id", job.as_str());

        let response = send(self.authed(self.http.get(url.clone())), &url).await?;
        let body: StatusResponse = read_json(response).await?;
        if body.status != "success" {
            return Err(server_error(&body.status, body.error));
        }
        let code = body.job_status.ok_or_else(|| MarkupError::Protocol {
            detail: "status response has no jobStatus".into(),
        })?;
        Ok(JobStatus::from_code(code))
    }

    async fn resolve_artifact_url(
        &self,
        job: &JobId,
        kind: &ArtifactKind,
    ) -> Result<Url, MarkupError> {
        let mut url = self.endpoint("api/job/retrieve")?;
        {
            let mut q = url.query_pairs_mut();
            q.append_pair("id", job.as_str());
            match kind {
                ArtifactKind::FullArchive => {
                    q.append_pair("conversionStage", &FULL_ARCHIVE_STAGE.to_string());
                }
                ArtifactKind::Named(name) => {
                    q.append_pair("fileName", name);
                }
            }
        }

        let response = self
            .authed(self.no_redirect.get(url.clone()))
            .send()
            .await
            .map_err(|e| transport(url.as_str(), e))?;
        let response = ensure_success(response).await?;

        if response.status().is_redirection() {
            let location = response
                .headers()
                .get(LOCATION)
                .and_then(|v| v.to_str().ok())
                .ok_or_else(|| MarkupError::Protocol {
                    detail: format!("{} redirect without Location", response.status()),
                })?;
            let target = url.join(location).map_err(|e| MarkupError::Protocol {
                detail: format!("bad Location '{location}': {e}"),
            })?;
            return Ok(strip_credentials(target));
        }

        let is_json = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.contains("json"));
        if !is_json {
            // The endpoint serves the artifact itself.
            return Ok(strip_credentials(url));
        }

        let body: RetrieveResponse = read_json(response).await?;
        let artifact = match (body.status.as_deref(), body.url) {
            (Some(status), _) if status != "success" => {
                return Err(server_error(status, body.error));
            }
            (_, Some(artifact)) => artifact,
            (_, None) if body.error.is_some() => return Err(server_error("error", body.error)),
            (_, None) => {
                return Err(MarkupError::Protocol {
                    detail: "retrieve response carries no url".into(),
                });
            }
        };
        let target = self.base.join(&artifact).map_err(|e| MarkupError::Protocol {
            detail: format!("bad artifact URL '{artifact}': {e}"),
        })?;
        Ok(strip_credentials(target))
    }

    async fn download(&self, url: &Url, dest: &Path) -> Result<u64, MarkupError> {
        stream_to_file(self.authed(self.http.get(url.clone())), url, dest).await
    }
}
