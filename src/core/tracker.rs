use anyhow::Context;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Duration;

use crate::backend::{BackendError, StatusBackend};
use crate::core::events::TrackerEvent;
use crate::core::model::{TaskState, TaskStatus};
use crate::core::store::TaskStore;
use crate::transport::registry::{
    StatusTransport, TransportContext, TransportKind, TransportOutcome, TransportRegistry,
};

#[derive(Debug, Clone)]
pub struct TrackerConfig {
    pub poll_interval: Duration,
    pub retries: u32,
    pub retry_backoff_ms: u64,
    pub event_stream_enabled: bool,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(1000),
            retries: 2,
            retry_backoff_ms: 400,
            event_stream_enabled: true,
        }
    }
}

/// The one task being tracked right now. Dropping the session drops the
/// runner handle; explicit teardown aborts it first.
struct Session {
    task_id: String,
    /// Identifies the transport activation that is allowed to deliver
    /// updates. Bumped on every restart and on fallback, so stragglers from
    /// superseded transports are rejected by a simple compare.
    activation: u64,
    kind: TransportKind,
    runner: JoinHandle<()>,
    /// Display only; correctness decisions never read this.
    last_status: Option<TaskStatus>,
}

impl Session {
    fn shutdown(self) {
        self.runner.abort();
    }
}

/// Tracks one download task's lifecycle: picks a transport, normalizes its
/// updates into broadcast events, closes exactly once on a terminal state,
/// and falls back from the event stream to polling when the stream dies.
#[derive(Clone)]
pub struct Tracker {
    backend: Arc<dyn StatusBackend>,
    registry: Arc<TransportRegistry>,
    store: TaskStore,
    config: TrackerConfig,
    event_tx: broadcast::Sender<TrackerEvent>,
    session: Arc<Mutex<Option<Session>>>,
    activations: Arc<AtomicU64>,
}

impl Tracker {
    pub fn new(
        backend: Arc<dyn StatusBackend>,
        registry: TransportRegistry,
        store: TaskStore,
        config: TrackerConfig,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(256);
        Self {
            backend,
            registry: Arc::new(registry),
            store,
            config,
            event_tx,
            session: Arc::new(Mutex::new(None)),
            activations: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TrackerEvent> {
        self.event_tx.subscribe()
    }

    pub async fn is_tracking(&self) -> bool {
        self.session.lock().await.is_some()
    }

    pub async fn current_status(&self) -> Option<TaskStatus> {
        self.session
            .lock()
            .await
            .as_ref()
            .and_then(|s| s.last_status.clone())
    }

    fn transport_ctx(&self) -> TransportContext {
        TransportContext {
            backend: self.backend.clone(),
            poll_interval: self.config.poll_interval,
            retries: self.config.retries,
            retry_backoff_ms: self.config.retry_backoff_ms,
            event_stream_enabled: self.config.event_stream_enabled,
        }
    }

    /// Starts tracking `task_id`, superseding any session in progress. The
    /// selected transport delivers one observation immediately and then every
    /// subsequent update; nothing here waits on the network.
    pub async fn start_tracking(&self, task_id: &str) -> anyhow::Result<()> {
        anyhow::ensure!(!task_id.trim().is_empty(), "task id must not be empty");

        let ctx = self.transport_ctx();
        let transport = self
            .registry
            .select(&ctx)
            .context("no status transport available")?;
        let kind = transport.kind();

        let mut guard = self.session.lock().await;
        if let Some(old) = guard.take() {
            old.shutdown();
        }
        let activation = self.activations.fetch_add(1, Ordering::Relaxed) + 1;
        let runner = self.spawn_transport(activation, transport, task_id.to_string(), ctx);
        *guard = Some(Session {
            task_id: task_id.to_string(),
            activation,
            kind,
            runner,
            last_status: None,
        });
        // Emitted under the session lock so the transport's first delivery
        // cannot be announced before the start itself.
        let _ = self.event_tx.send(TrackerEvent::TrackingStarted {
            task_id: task_id.to_string(),
            transport: kind,
        });
        Ok(())
    }

    /// Tears the active transport down. Calling with no session is a no-op.
    pub async fn stop_tracking(&self) {
        let mut guard = self.session.lock().await;
        if let Some(session) = guard.take() {
            session.shutdown();
        }
    }

    /// Asks the backend to cancel `task_id`. When it matches the active
    /// session, one synthesized `canceled` status is reported and the session
    /// closes; any other id is a standalone request that leaves the active
    /// session alone. A backend refusal is returned to the caller and changes
    /// nothing.
    pub async fn cancel(&self, task_id: &str) -> Result<(), BackendError> {
        self.backend.cancel_task(task_id).await?;

        let mut guard = self.session.lock().await;
        let is_active = guard
            .as_ref()
            .map(|s| s.task_id == task_id)
            .unwrap_or(false);
        if !is_active {
            return Ok(());
        }

        let session = match guard.take() {
            Some(s) => s,
            None => return Ok(()),
        };
        let percent = session
            .last_status
            .as_ref()
            .map(|s| s.clamped_percent())
            .unwrap_or(0.0);
        session.shutdown();

        // Both events go out under the session lock: any in-flight update
        // serializes behind this and then sees the session gone.
        let status = TaskStatus::new(task_id, TaskState::Canceled, percent);
        let _ = self.event_tx.send(TrackerEvent::Status {
            status: status.clone(),
        });
        let _ = self.event_tx.send(TrackerEvent::Canceled {
            task_id: task_id.to_string(),
        });
        drop(guard);

        self.store.record_status(&status).await.ok();
        Ok(())
    }

    fn spawn_transport(
        &self,
        activation: u64,
        transport: Arc<dyn StatusTransport>,
        task_id: String,
        ctx: TransportContext,
    ) -> JoinHandle<()> {
        let (tx, mut rx) = mpsc::channel::<TaskStatus>(16);

        let consumer = self.clone();
        tokio::spawn(async move {
            while let Some(status) = rx.recv().await {
                if !consumer.apply_update(activation, status).await {
                    break;
                }
            }
        });

        let tracker = self.clone();
        let kind = transport.kind();
        tokio::spawn(async move {
            let outcome = transport.run(&task_id, &ctx, tx).await;
            tracker.on_transport_exit(activation, kind, outcome).await;
        })
    }

    /// Applies one delivered observation. Returns false once this delivery's
    /// transport is no longer the live one (superseded, stopped, or just hit
    /// a terminal state), so its consumer loop stops draining.
    async fn apply_update(&self, activation: u64, status: TaskStatus) -> bool {
        let mut guard = self.session.lock().await;
        let live = matches!(
            guard.as_ref(),
            Some(s) if s.activation == activation
        );
        if !live {
            return false;
        }

        let mut status = status;
        {
            let session = match guard.as_mut() {
                Some(s) => s,
                None => return false,
            };
            if status.task_id != session.task_id {
                // Mis-addressed payload; drop it but keep the transport.
                return true;
            }
            status.percent = status.clamped_percent();
            session.last_status = Some(status.clone());
        }

        if !status.state.is_terminal() {
            let _ = self.event_tx.send(TrackerEvent::Status {
                status: status.clone(),
            });
            drop(guard);
            self.store.record_status(&status).await.ok();
            return true;
        }

        // Terminal: close the transport and emit both events while still
        // holding the lock, so nothing can slip in after the terminal event.
        if let Some(session) = guard.take() {
            session.shutdown();
        }
        let task_id = status.task_id.clone();
        let terminal = match status.state {
            TaskState::Completed => TrackerEvent::Completed { task_id },
            TaskState::Canceled => TrackerEvent::Canceled { task_id },
            _ => TrackerEvent::Failed {
                task_id,
                message: status.description.clone().unwrap_or_default(),
            },
        };
        let _ = self.event_tx.send(TrackerEvent::Status {
            status: status.clone(),
        });
        let _ = self.event_tx.send(terminal);
        drop(guard);

        self.store.record_status(&status).await.ok();
        false
    }

    /// Runs on the transport's own task after `run` returns. A failed event
    /// stream falls back to polling for the same task; a failed poller ends
    /// the session with a request-failure event.
    async fn on_transport_exit(
        &self,
        activation: u64,
        kind: TransportKind,
        outcome: TransportOutcome,
    ) {
        let message = match outcome {
            TransportOutcome::Finished => return,
            TransportOutcome::Failed(m) => m,
        };

        let mut guard = self.session.lock().await;
        let live = matches!(
            guard.as_ref(),
            Some(s) if s.activation == activation
        );
        if !live {
            return;
        }

        let fallback = match kind {
            TransportKind::EventStream => {
                let ctx = self.transport_ctx();
                self.registry.select_fallback(kind, &ctx).map(|t| (t, ctx))
            }
            TransportKind::Polling => None,
        };

        match fallback {
            Some((transport, ctx)) => {
                let session = match guard.as_mut() {
                    Some(s) => s,
                    None => return,
                };
                let from = session.kind;
                let to = transport.kind();
                let task_id = session.task_id.clone();
                let new_activation = self.activations.fetch_add(1, Ordering::Relaxed) + 1;
                // The failed transport's run has already returned; nothing
                // more can arrive from it. Swapping the handle is enough.
                let runner = self.spawn_transport(new_activation, transport, task_id.clone(), ctx);
                session.activation = new_activation;
                session.kind = to;
                let _finished = std::mem::replace(&mut session.runner, runner);
                let _ = self
                    .event_tx
                    .send(TrackerEvent::TransportChanged { task_id, from, to });
            }
            None => {
                let task_id = match guard.take() {
                    Some(s) => s.task_id,
                    None => return,
                };
                let _ = self
                    .event_tx
                    .send(TrackerEvent::RequestFailed { task_id, message });
            }
        }
    }
}
