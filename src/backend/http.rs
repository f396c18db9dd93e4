use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, USER_AGENT};
use reqwest::StatusCode;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use url::Url;

use crate::backend::{BackendError, EventByteStream, StatusBackend};
use crate::core::model::{DownloadRequest, FormatInfo, TaskStatus, VideoInfo};

pub struct HttpBackend {
    client: reqwest::Client,
    base: Url,
    user_agent: String,
    request_timeout: Duration,
}

/// Format ids come back as bare numbers from some service versions and as
/// strings from others.
#[derive(Deserialize)]
#[serde(untagged)]
enum FormatId {
    Num(i64),
    Str(String),
}

impl From<FormatId> for String {
    fn from(id: FormatId) -> Self {
        match id {
            FormatId::Num(n) => n.to_string(),
            FormatId::Str(s) => s,
        }
    }
}

#[derive(Deserialize)]
struct FormatPayload {
    quality: String,
    #[serde(default)]
    filesize: Option<f64>,
    video_format_id: FormatId,
    #[serde(default)]
    audio_format_id: Option<FormatId>,
}

#[derive(Deserialize)]
struct FormatsResponse {
    url: String,
    title: String,
    #[serde(default)]
    preview_url: Option<String>,
    formats: Vec<FormatPayload>,
}

#[derive(Deserialize)]
struct StartResponse {
    task_id: String,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    detail: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

impl ErrorBody {
    fn message(self) -> Option<String> {
        self.detail.or(self.description).or(self.error)
    }
}

impl HttpBackend {
    pub fn new(base: &str, user_agent: &str, request_timeout: Duration) -> Result<Self, BackendError> {
        // Url::join treats a path without a trailing slash as a file.
        let normalized = if base.ends_with('/') {
            base.to_string()
        } else {
            format!("{}/", base)
        };
        let base = Url::parse(&normalized)?;

        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::limited(10))
            .connect_timeout(request_timeout)
            .build()?;

        Ok(Self {
            client,
            base,
            user_agent: user_agent.to_string(),
            request_timeout,
        })
    }

    fn headers(&self) -> Result<HeaderMap, BackendError> {
        let mut h = HeaderMap::new();
        h.insert(
            USER_AGENT,
            HeaderValue::from_str(&self.user_agent)
                .unwrap_or_else(|_| HeaderValue::from_static("vidtrack")),
        );
        Ok(h)
    }

    fn endpoint(&self, path: &str) -> Result<Url, BackendError> {
        Ok(self.base.join(path)?)
    }

    /// Pulls a human-readable message out of a non-success response.
    async fn rejection(resp: reqwest::Response) -> BackendError {
        let status = resp.status();
        match resp.json::<ErrorBody>().await.ok().and_then(ErrorBody::message) {
            Some(message) => BackendError::Rejected(message),
            None => BackendError::Status(status),
        }
    }

    pub async fn video_formats(&self, url: &str) -> Result<VideoInfo, BackendError> {
        let endpoint = self.endpoint("formats")?;
        let resp = self
            .client
            .get(endpoint)
            .headers(self.headers()?)
            .query(&[("url", url)])
            .timeout(self.request_timeout)
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(Self::rejection(resp).await);
        }

        let payload: FormatsResponse = resp.json().await?;
        Ok(VideoInfo {
            url: payload.url,
            title: payload.title,
            preview_url: payload.preview_url,
            formats: payload
                .formats
                .into_iter()
                .map(|f| FormatInfo {
                    quality: f.quality,
                    filesize: f.filesize,
                    video_format_id: f.video_format_id.into(),
                    audio_format_id: f.audio_format_id.map(Into::into),
                })
                .collect(),
        })
    }

    pub async fn start_download(&self, req: &DownloadRequest) -> Result<String, BackendError> {
        let endpoint = self.endpoint("start-download")?;
        let body = serde_json::json!({
            "url": req.url,
            "video_format_id": req.video_format_id,
            "audio_format_id": req.audio_format_id,
        });
        let resp = self
            .client
            .post(endpoint)
            .headers(self.headers()?)
            .json(&body)
            .timeout(self.request_timeout)
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(Self::rejection(resp).await);
        }

        let payload: StartResponse = resp.json().await?;
        Ok(payload.task_id)
    }

    /// Streams a completed task's file to `dest`. No per-request timeout here;
    /// the body can legitimately take minutes.
    pub async fn fetch_video(&self, task_id: &str, dest: &Path) -> Result<u64, BackendError> {
        let endpoint = self.endpoint(&format!("download/{}", task_id))?;
        let resp = self
            .client
            .get(endpoint)
            .headers(self.headers()?)
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(Self::rejection(resp).await);
        }

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut file = tokio::fs::File::create(dest).await?;
        let mut stream = resp.bytes_stream();
        let mut written = 0u64;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;
        Ok(written)
    }
}

#[async_trait]
impl StatusBackend for HttpBackend {
    async fn task_status(&self, task_id: &str) -> Result<TaskStatus, BackendError> {
        let endpoint = self.endpoint(&format!("status/{}", task_id))?;
        let resp = self
            .client
            .get(endpoint)
            .headers(self.headers()?)
            .timeout(self.request_timeout)
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(Self::rejection(resp).await);
        }

        Ok(resp.json::<TaskStatus>().await?)
    }

    async fn open_event_stream(&self, task_id: &str) -> Result<EventByteStream, BackendError> {
        let endpoint = self.endpoint(&format!("events/{}", task_id))?;
        let mut headers = self.headers()?;
        headers.insert(ACCEPT, HeaderValue::from_static("text/event-stream"));

        // No per-request timeout: it would cover the body too and cut the
        // stream off mid-session. The client's connect timeout still bounds
        // the handshake.
        let resp = self
            .client
            .get(endpoint)
            .headers(headers)
            .send()
            .await?;

        if resp.status() != StatusCode::OK {
            return Err(Self::rejection(resp).await);
        }

        Ok(resp.bytes_stream().map(|c| c.map_err(BackendError::from)).boxed())
    }

    async fn cancel_task(&self, task_id: &str) -> Result<(), BackendError> {
        let endpoint = self.endpoint(&format!("cancel/{}", task_id))?;
        let resp = self
            .client
            .post(endpoint)
            .headers(self.headers()?)
            .timeout(self.request_timeout)
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(Self::rejection(resp).await);
        }
        Ok(())
    }
}
