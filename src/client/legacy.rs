//! Client for the older single-endpoint markup server.
//!
//! Everything goes through `POST {base}process.php` with an event envelope:
//!
//! ```json
//! {"jit_events":[{"type":"PDFX.fileUpload","data":{"user":"…","pass":"…", …}}]}
//! ```
//!
//! The server converts synchronously and answers with the job folder name,
//! so once a job id exists the job is complete. Results are public at
//! `{base}job/{jobId}/…`.

use super::{file_part, http_client, job_id_from_value, read_json, send, stream_to_file, ConversionClient};
use crate::config::JournalConfig;
use crate::error::MarkupError;
use crate::model::{ArtifactKind, JobId, JobStatus, SubmissionMetadata};
use async_trait::async_trait;
use reqwest::multipart::Form;
use reqwest::Url;
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::Path;
use tracing::{debug, info};

pub const UPLOAD_EVENT: &str = "PDFX.fileUpload";

#[derive(Debug, Deserialize)]
struct Envelope {
    jit_events: Vec<EventResponse>,
}

#[derive(Debug, Deserialize)]
struct EventResponse {
    #[serde(default)]
    error: i64,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    data: Option<EventData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventData {
    #[serde(default)]
    job_id: Option<Value>,
}

#[derive(Debug, Clone)]
pub struct LegacyClient {
    base: Url,
    user: String,
    pass: String,
    http: reqwest::Client,
}

impl LegacyClient {
    pub fn new(config: &JournalConfig) -> Result<Self, MarkupError> {
        let base = Url::parse(&config.host_url).map_err(|e| {
            MarkupError::InvalidConfig(format!("host URL '{}': {e}", config.host_url))
        })?;
        Ok(Self {
            base,
            user: config.host_user.clone(),
            pass: config.host_pass.clone(),
            http: http_client(config.request_timeout(), true)?,
        })
    }

    /// Build the upload event. Credentials travel inside the payload.
    fn envelope(&self, metadata: &SubmissionMetadata) -> Result<Value, MarkupError> {
        let mut data = serde_json::to_value(metadata)
            .map_err(|e| MarkupError::Internal(format!("metadata encoding failed: {e}")))?;
        if let Value::Object(map) = &mut data {
            map.insert("user".into(), Value::String(self.user.clone()));
            map.insert("pass".into(), Value::String(self.pass.clone()));
            map.insert("cssURL".into(), Value::String(String::new()));
        }
        Ok(json!({ "jit_events": [{ "type": UPLOAD_EVENT, "data": data }] }))
    }

    fn job_url(&self, job: &JobId, file: &str) -> Result<Url, MarkupError> {
        self.base
            .join(&format!("job/{}/{}", job, file))
            .map_err(|e| MarkupError::Internal(format!("cannot build job URL: {e}")))
    }
}

fn parse_upload_response(envelope: Envelope) -> Result<JobId, MarkupError> {
    let event = envelope
        .jit_events
        .into_iter()
        .next()
        .ok_or_else(|| MarkupError::Protocol {
            detail: "empty jit_events response".into(),
        })?;
    if event.error != 0 {
        return Err(MarkupError::Server {
            code: Some(event.error),
            message: event
                .message
                .unwrap_or_else(|| "conversion rejected".to_string()),
        });
    }
    let job_id = event.data.and_then(|d| d.job_id);
    job_id_from_value(job_id.as_ref())
}

#[async_trait]
impl ConversionClient for LegacyClient {
    async fn submit(
        &self,
        source: &Path,
        metadata: &SubmissionMetadata,
    ) -> Result<JobId, MarkupError> {
        let url = self
            .base
            .join("process.php")
            .map_err(|e| MarkupError::Internal(format!("cannot build URL: {e}")))?;
        let envelope = self.envelope(metadata)?;
        debug!("Legacy upload event for article {}", metadata.article_id);

        let (part, _) = file_part(source).await?;
        let form = Form::new()
            .text("jit_events", envelope.to_string())
            .part("userfile", part);

        let response = send(self.http.post(url.clone()).multipart(form), &url).await?;
        let job = parse_upload_response(read_json(response).await?)?;
        info!("Legacy markup server produced job {}", job);
        Ok(job)
    }

    async fn poll_status(&self, _job: &JobId) -> Result<JobStatus, MarkupError> {
        Ok(JobStatus::Complete)
    }

    async fn resolve_artifact_url(
        &self,
        job: &JobId,
        kind: &ArtifactKind,
    ) -> Result<Url, MarkupError> {
        match kind {
            ArtifactKind::FullArchive => self.job_url(job, "document.zip"),
            ArtifactKind::Named(name) => self.job_url(job, name),
        }
    }

    async fn download(&self, url: &Url, dest: &Path) -> Result<u64, MarkupError> {
        stream_to_file(self.http.get(url.clone()), url, dest).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ArticleId, JournalId};

    fn client() -> LegacyClient {
        let config = JournalConfig::builder()
            .host_url("http://markup.local/")
            .credentials("u", "p")
            .build()
            .unwrap();
        LegacyClient::new(&config).unwrap()
    }

    fn metadata() -> SubmissionMetadata {
        SubmissionMetadata {
            title: "On Things".into(),
            authors: vec![],
            journal_id: JournalId(1),
            article_id: ArticleId(42),
            publication_name: "J".into(),
            copyright: String::new(),
            publisher: String::new(),
            rights: String::new(),
            eissn: None,
            issn: None,
            doi: None,
            csl_style: "chicago-author-date.csl".into(),
            css_header_image_url: None,
            number: None,
            volume: None,
            year: None,
            publication_date: None,
            review_version: false,
        }
    }

    #[test]
    fn envelope_shape() {
        let env = client().envelope(&metadata()).unwrap();
        let event = &env["jit_events"][0];
        assert_eq!(event["type"], "PDFX.fileUpload");
        assert_eq!(event["data"]["user"], "u");
        assert_eq!(event["data"]["pass"], "p");
        assert_eq!(event["data"]["cssURL"], "");
        assert_eq!(event["data"]["articleId"], 42);
        assert_eq!(event["data"]["cslStyle"], "chicago-author-date.csl");
    }

    #[test]
    fn upload_response_with_job() {
        let env: Envelope =
            serde_json::from_str(r#"{"jit_events":[{"error":0,"data":{"jobId":"x9y8"}}]}"#)
                .unwrap();
        assert_eq!(parse_upload_response(env).unwrap().as_str(), "x9y8");
    }

    #[test]
    fn upload_response_with_error() {
        let env: Envelope = serde_json::from_str(
            r#"{"jit_events":[{"error":3,"message":"Unsupported file"}]}"#,
        )
        .unwrap();
        match parse_upload_response(env) {
            Err(MarkupError::Server { code, message }) => {
                assert_eq!(code, Some(3));
                assert_eq!(message, "Unsupported file");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn upload_response_without_events() {
        let env: Envelope = serde_json::from_str(r#"{"jit_events":[]}"#).unwrap();
        assert!(matches!(
            parse_upload_response(env),
            Err(MarkupError::Protocol { .. })
        ));
    }

    #[tokio::test]
    async fn archive_url_layout() {
        let c = client();
        let job = JobId::parse("abc123").unwrap();
        let url = c
            .resolve_artifact_url(&job, &ArtifactKind::FullArchive)
            .await
            .unwrap();
        assert_eq!(url.as_str(), "http://markup.local/job/abc123/document.zip");
        assert_eq!(c.poll_status(&job).await.unwrap(), JobStatus::Complete);
    }
}
