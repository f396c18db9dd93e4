use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::mpsc;

use crate::core::model::TaskStatus;
use crate::transport::registry::{
    StatusTransport, TransportContext, TransportKind, TransportOutcome,
};

/// Tracks a task over the backend's persistent per-task event stream.
///
/// Any transport-level problem (connect failure, dropped stream, malformed
/// frame) ends the run with a failure outcome; the tracker then swaps in the
/// polling transport, so none of it is ever surfaced as a task error.
pub struct EventStreamTransport;

impl EventStreamTransport {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl StatusTransport for EventStreamTransport {
    fn name(&self) -> &'static str {
        "event-stream"
    }

    fn kind(&self) -> TransportKind {
        TransportKind::EventStream
    }

    fn suitability(&self, ctx: &TransportContext) -> u8 {
        if ctx.event_stream_enabled {
            2
        } else {
            0
        }
    }

    async fn run(
        &self,
        task_id: &str,
        ctx: &TransportContext,
        updates: mpsc::Sender<TaskStatus>,
    ) -> TransportOutcome {
        // Snapshot first so the observer hears something before the first
        // natural event arrives.
        match ctx.backend.task_status(task_id).await {
            Ok(status) => {
                if updates.send(status).await.is_err() {
                    return TransportOutcome::Finished;
                }
            }
            Err(e) => return TransportOutcome::Failed(format!("initial status fetch: {e}")),
        }

        let mut stream = match ctx.backend.open_event_stream(task_id).await {
            Ok(s) => s,
            Err(e) => return TransportOutcome::Failed(format!("connect: {e}")),
        };

        let mut frames = SseFrameBuffer::new();
        while let Some(next) = stream.next().await {
            let chunk = match next {
                Ok(c) => c,
                Err(e) => return TransportOutcome::Failed(format!("stream: {e}")),
            };
            for payload in frames.push(&chunk) {
                let status: TaskStatus = match serde_json::from_str(&payload) {
                    Ok(s) => s,
                    Err(e) => return TransportOutcome::Failed(format!("payload: {e}")),
                };
                if updates.send(status).await.is_err() {
                    return TransportOutcome::Finished;
                }
            }
        }

        // Server hung up without a terminal status; let the poller take over.
        TransportOutcome::Failed("event stream closed".to_string())
    }
}

/// Reassembles SSE events from arbitrarily split byte chunks. Only `data:`
/// fields matter for this protocol; `event:`/`id:`/`retry:` and comment lines
/// are skipped.
pub struct SseFrameBuffer {
    pending_line: Vec<u8>,
    data_lines: Vec<String>,
}

impl SseFrameBuffer {
    pub fn new() -> Self {
        Self {
            pending_line: Vec::new(),
            data_lines: Vec::new(),
        }
    }

    /// Feeds one chunk; returns every complete event payload it finished.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut completed = Vec::new();
        for &byte in chunk {
            if byte != b'\n' {
                self.pending_line.push(byte);
                continue;
            }

            let mut line = String::from_utf8_lossy(&self.pending_line).into_owned();
            self.pending_line.clear();
            if line.ends_with('\r') {
                line.pop();
            }

            if line.is_empty() {
                // Blank line terminates the event.
                if !self.data_lines.is_empty() {
                    completed.push(self.data_lines.join("\n"));
                    self.data_lines.clear();
                }
            } else if let Some(rest) = line.strip_prefix("data:") {
                self.data_lines
                    .push(rest.strip_prefix(' ').unwrap_or(rest).to_string());
            }
            // Comments (leading ':') and other fields are ignored.
        }
        completed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::testing::FakeBackend;
    use crate::backend::StatusBackend;
    use crate::core::model::TaskState;
    use bytes::Bytes;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn frame_buffer_parses_single_event() {
        let mut buf = SseFrameBuffer::new();
        let events = buf.push(b"data: {\"x\":1}\n\n");
        assert_eq!(events, vec!["{\"x\":1}".to_string()]);
    }

    #[test]
    fn frame_buffer_handles_chunk_boundaries_anywhere() {
        let mut buf = SseFrameBuffer::new();
        assert!(buf.push(b"da").is_empty());
        assert!(buf.push(b"ta: {\"per").is_empty());
        assert!(buf.push(b"cent\":42}\r\n").is_empty());
        let events = buf.push(b"\n");
        assert_eq!(events, vec!["{\"percent\":42}".to_string()]);
    }

    #[test]
    fn frame_buffer_skips_comments_and_other_fields() {
        let mut buf = SseFrameBuffer::new();
        let events = buf.push(b": keep-alive\nevent: status\nid: 7\ndata: {}\n\n");
        assert_eq!(events, vec!["{}".to_string()]);
    }

    #[test]
    fn frame_buffer_joins_multi_line_data() {
        let mut buf = SseFrameBuffer::new();
        let events = buf.push(b"data: {\ndata: }\n\n");
        assert_eq!(events, vec!["{\n}".to_string()]);
    }

    #[test]
    fn frame_buffer_yields_multiple_events_from_one_chunk() {
        let mut buf = SseFrameBuffer::new();
        let events = buf.push(b"data: 1\n\ndata: 2\n\n");
        assert_eq!(events, vec!["1".to_string(), "2".to_string()]);
    }

    fn ctx(backend: Arc<FakeBackend>) -> TransportContext {
        TransportContext {
            backend,
            poll_interval: Duration::from_millis(10),
            retries: 0,
            retry_backoff_ms: 1,
            event_stream_enabled: true,
        }
    }

    #[tokio::test]
    async fn run_delivers_snapshot_then_stream_events() {
        let backend = Arc::new(FakeBackend::new());
        backend.push_status(TaskStatus::new("t1", TaskState::Pending, 0.0));
        backend.set_event_chunks(vec![
            Ok(Bytes::from_static(
                b"data: {\"task_id\":\"t1\",\"status\":\"downloading\",\"percent\":42}\n\n",
            )),
            Ok(Bytes::from_static(
                b"data: {\"task_id\":\"t1\",\"status\":\"processing\",\"percent\":97}\n\n",
            )),
        ]);

        let (tx, mut rx) = tokio::sync::mpsc::channel(16);
        let transport = EventStreamTransport::new();
        let outcome = transport.run("t1", &ctx(backend), tx).await;

        // Stream end without a terminal status reads as a failure so the
        // tracker can fall back to polling.
        assert!(matches!(outcome, TransportOutcome::Failed(_)));

        let first = rx.recv().await.unwrap();
        assert_eq!(first.state, TaskState::Pending);
        let second = rx.recv().await.unwrap();
        assert_eq!(second.state, TaskState::Downloading);
        assert_eq!(second.percent, 42.0);
        let third = rx.recv().await.unwrap();
        assert_eq!(third.state, TaskState::Processing);
    }

    #[tokio::test]
    async fn run_fails_on_malformed_payload() {
        let backend = Arc::new(FakeBackend::new());
        backend.push_status(TaskStatus::new("t1", TaskState::Pending, 0.0));
        backend.set_event_chunks(vec![Ok(Bytes::from_static(b"data: not-json\n\n"))]);

        let (tx, _rx) = tokio::sync::mpsc::channel(16);
        let transport = EventStreamTransport::new();
        let outcome = transport.run("t1", &ctx(backend), tx).await;
        assert!(matches!(outcome, TransportOutcome::Failed(m) if m.starts_with("payload")));
    }

    #[tokio::test]
    async fn run_finishes_quietly_when_receiver_is_gone() {
        let backend = Arc::new(FakeBackend::new());
        backend.push_status(TaskStatus::new("t1", TaskState::Pending, 0.0));

        let (tx, rx) = tokio::sync::mpsc::channel(16);
        drop(rx);
        let transport = EventStreamTransport::new();
        let outcome = transport.run("t1", &ctx(backend), tx).await;
        assert!(matches!(outcome, TransportOutcome::Finished));
    }

    #[tokio::test]
    async fn backend_trait_is_exercised_by_fake() {
        // Guards the fake against drifting from the trait contract.
        let backend = FakeBackend::new();
        let status = backend.task_status("t9").await.unwrap();
        assert_eq!(status.task_id, "t9");
    }
}
