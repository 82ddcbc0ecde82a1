//! HTTP client for the review backend
//!
//! Endpoints:
//! - `GET  {api}/files?status_folder={queue}`
//! - `POST {api}/approve?object_name=..&approver=..`
//! - `POST {api}/reject?object_name=..&rejector=..&feedback=..`
//! - `POST {api}/upload` (multipart: `file`, `proj_id`, `uploader`)
//! - `GET  {events_url}` as `text/event-stream` for invalidation signals
//!
//! Mutating calls carry the bearer token when one is configured.

use std::path::Path;

use async_trait::async_trait;
use dqr_common::config::ClientConfig;
use dqr_common::sse::{SseDecoder, SseItem};
use dqr_common::{FileRecord, QueueName};
use futures::StreamExt;
use reqwest::header::ACCEPT;
use reqwest::{RequestBuilder, Response};
use serde::Deserialize;

use crate::error::{Error, Result};
use crate::remote::{ChangeFeed, ChangeSignal, ChangeStream, RemoteAuthority};

const USER_AGENT: &str = concat!("dqr-sync/", env!("CARGO_PKG_VERSION"));

/// `/files` answers with a bare list; some deployments wrap it
#[derive(Deserialize)]
#[serde(untagged)]
enum FilesResponse {
    List(Vec<FileRecord>),
    Wrapped { files: Vec<FileRecord> },
}

impl FilesResponse {
    fn into_records(self) -> Vec<FileRecord> {
        match self {
            FilesResponse::List(records) | FilesResponse::Wrapped { files: records } => records,
        }
    }
}

/// Review backend reached over HTTP
pub struct HttpAuthority {
    http_client: reqwest::Client,
    /// No overall timeout: the push channel stays open indefinitely
    stream_client: reqwest::Client,
    api_url: String,
    events_url: String,
    token: Option<String>,
}

impl HttpAuthority {
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(config.request_timeout)
            .build()?;

        let stream_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(config.request_timeout)
            .build()?;

        Ok(Self {
            http_client,
            stream_client,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            events_url: config.events_url.clone(),
            token: config.token.clone(),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.api_url, path)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// Upload a file into the pending queue
    ///
    /// Returns the backend's JSON reply (`Null` when the body is empty).
    pub async fn upload(
        &self,
        path: &Path,
        project_id: &str,
        uploader: &str,
    ) -> Result<serde_json::Value> {
        let bytes = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| Error::Validation(format!("not a file path: {}", path.display())))?;

        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name(file_name.clone())
            .mime_str("text/csv")?;
        let form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("proj_id", project_id.to_string())
            .text("uploader", uploader.to_string());

        tracing::debug!(file = %file_name, project = %project_id, "Uploading file");

        let response = self
            .authorized(self.http_client.post(self.endpoint("upload")))
            .multipart(form)
            .send()
            .await?;
        let body = check_status(response).await?.text().await?;

        tracing::info!(file = %file_name, project = %project_id, "Upload accepted");

        if body.trim().is_empty() {
            return Ok(serde_json::Value::Null);
        }
        serde_json::from_str(&body).map_err(|e| Error::Remote(format!("invalid upload reply: {}", e)))
    }
}

async fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(Error::Remote(format!(
        "HTTP {} {}: {}",
        status.as_u16(),
        status.canonical_reason().unwrap_or("error"),
        body.trim()
    )))
}

#[async_trait]
impl RemoteAuthority for HttpAuthority {
    async fn fetch_queue(&self, queue: QueueName) -> Result<Vec<FileRecord>> {
        let response = self
            .http_client
            .get(self.endpoint("files"))
            .query(&[("status_folder", queue.as_str())])
            .send()
            .await?;

        let files: FilesResponse = check_status(response)
            .await?
            .json()
            .await
            .map_err(|e| Error::Remote(format!("invalid {} listing: {}", queue, e)))?;

        // The folder a record was listed under is its status
        let records = files
            .into_records()
            .into_iter()
            .map(|mut record| {
                record.status = queue.status();
                record
            })
            .collect::<Vec<_>>();

        tracing::debug!(queue = %queue, count = records.len(), "Fetched queue");
        Ok(records)
    }

    async fn approve(&self, object_id: &str, approver: &str) -> Result<()> {
        let request = self
            .http_client
            .post(self.endpoint("approve"))
            .query(&[("object_name", object_id), ("approver", approver)]);

        check_status(self.authorized(request).send().await?).await?;
        Ok(())
    }

    async fn reject(&self, object_id: &str, rejector: &str, feedback: &str) -> Result<()> {
        let request = self.http_client.post(self.endpoint("reject")).query(&[
            ("object_name", object_id),
            ("rejector", rejector),
            ("feedback", feedback),
        ]);

        check_status(self.authorized(request).send().await?).await?;
        Ok(())
    }
}

#[async_trait]
impl ChangeFeed for HttpAuthority {
    async fn connect(&self) -> Result<ChangeStream> {
        let request = self
            .stream_client
            .get(&self.events_url)
            .header(ACCEPT, "text/event-stream");
        let response = check_status(self.authorized(request).send().await?).await?;

        tracing::info!(url = %self.events_url, "Push channel connected");

        let mut bytes = Box::pin(response.bytes_stream());
        let stream = async_stream::stream! {
            let mut decoder = SseDecoder::new();
            while let Some(chunk) = bytes.next().await {
                match chunk {
                    Ok(chunk) => {
                        for item in decoder.push(&chunk) {
                            yield Ok(match item {
                                SseItem::Event(_) => ChangeSignal::Changed,
                                SseItem::Comment(_) => ChangeSignal::KeepAlive,
                            });
                        }
                    }
                    Err(e) => {
                        yield Err(Error::Remote(format!("push channel read failed: {}", e)));
                        break;
                    }
                }
            }
        };

        Ok(Box::pin(stream))
    }
}
