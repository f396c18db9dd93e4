use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::backend::StatusBackend;
use crate::core::model::TaskStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    EventStream,
    Polling,
}

impl TransportKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::EventStream => "event-stream",
            Self::Polling => "polling",
        }
    }
}

#[derive(Clone)]
pub struct TransportContext {
    pub backend: Arc<dyn StatusBackend>,
    pub poll_interval: Duration,
    pub retries: u32,
    pub retry_backoff_ms: u64,
    pub event_stream_enabled: bool,
}

#[derive(Debug)]
pub enum TransportOutcome {
    /// The tracker closed the update channel; nothing left to deliver.
    Finished,
    /// The transport can no longer deliver updates for this task.
    Failed(String),
}

/// One way of observing a task's status updates. A transport runs until the
/// tracker drops the receiving side of `updates` or the transport itself
/// fails; it never decides task lifecycle on its own.
#[async_trait]
pub trait StatusTransport: Send + Sync {
    fn name(&self) -> &'static str;

    fn kind(&self) -> TransportKind;

    /// Capability score. 0 means unavailable; the registry picks the maximum.
    fn suitability(&self, ctx: &TransportContext) -> u8;

    async fn run(
        &self,
        task_id: &str,
        ctx: &TransportContext,
        updates: mpsc::Sender<TaskStatus>,
    ) -> TransportOutcome;
}

pub struct TransportRegistry {
    transports: Vec<Arc<dyn StatusTransport>>,
}

impl TransportRegistry {
    pub fn new() -> Self {
        Self { transports: vec![] }
    }

    pub fn with_defaults() -> Self {
        let mut reg = Self::new();
        reg.register(Arc::new(crate::transport::event_stream::EventStreamTransport::new()));
        reg.register(Arc::new(crate::transport::polling::PollingTransport::new()));
        reg
    }

    pub fn register(&mut self, transport: Arc<dyn StatusTransport>) {
        self.transports.push(transport);
    }

    pub fn select(&self, ctx: &TransportContext) -> Option<Arc<dyn StatusTransport>> {
        self.transports
            .iter()
            .map(|t| (t.suitability(ctx), t))
            .max_by_key(|(score, _)| *score)
            .and_then(|(score, t)| if score == 0 { None } else { Some(t.clone()) })
    }

    /// Best available transport of a different kind than the one that failed.
    pub fn select_fallback(
        &self,
        failed: TransportKind,
        ctx: &TransportContext,
    ) -> Option<Arc<dyn StatusTransport>> {
        self.transports
            .iter()
            .filter(|t| t.kind() != failed)
            .map(|t| (t.suitability(ctx), t))
            .max_by_key(|(score, _)| *score)
            .and_then(|(score, t)| if score == 0 { None } else { Some(t.clone()) })
    }
}
