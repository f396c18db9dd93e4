pub mod http;

use crate::core::model::TaskStatus;
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;

#[derive(thiserror::Error, Debug)]
pub enum BackendError {
    #[error("http status error: {0}")]
    Status(reqwest::StatusCode),

    /// The backend answered with an explicit refusal (e.g. a cancel that was
    /// rejected, or a file that is not ready yet).
    #[error("backend rejected request: {0}")]
    Rejected(String),

    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("malformed payload: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type EventByteStream = BoxStream<'static, Result<Bytes, BackendError>>;

/// The task API surface the tracker and its transports rely on. One HTTP
/// implementation in production; tests script their own.
#[async_trait]
pub trait StatusBackend: Send + Sync {
    async fn task_status(&self, task_id: &str) -> Result<TaskStatus, BackendError>;

    /// Opens the persistent per-task event stream. Each SSE event's data is a
    /// `TaskStatus` JSON document, same shape as polling.
    async fn open_event_stream(&self, task_id: &str) -> Result<EventByteStream, BackendError>;

    async fn cancel_task(&self, task_id: &str) -> Result<(), BackendError>;
}
