use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::{interval, sleep, Duration, MissedTickBehavior};

use crate::backend::BackendError;
use crate::core::model::TaskStatus;
use crate::transport::registry::{
    StatusTransport, TransportContext, TransportKind, TransportOutcome,
};

/// Fixed-interval polling of `GET /status/{id}`. The first tick fires
/// immediately, so the observer gets an update as soon as tracking starts.
pub struct PollingTransport;

impl PollingTransport {
    pub fn new() -> Self {
        Self
    }

    async fn fetch_with_retry(
        &self,
        task_id: &str,
        ctx: &TransportContext,
    ) -> Result<TaskStatus, BackendError> {
        let mut last_err: Option<BackendError> = None;
        for attempt in 0..=ctx.retries {
            if attempt > 0 {
                Self::sleep_backoff(ctx, attempt - 1).await;
            }
            match ctx.backend.task_status(task_id).await {
                Ok(status) => return Ok(status),
                Err(e) => last_err = Some(e),
            }
        }
        Err(last_err.unwrap_or_else(|| BackendError::Rejected("no poll attempt made".to_string())))
    }

    async fn sleep_backoff(ctx: &TransportContext, attempt: u32) {
        let base = ctx.retry_backoff_ms.max(1);
        let shift = attempt.min(16);
        let mul = 1u64 << shift;
        let ms = base.saturating_mul(mul).min(30_000);
        sleep(Duration::from_millis(ms)).await;
    }
}

#[async_trait]
impl StatusTransport for PollingTransport {
    fn name(&self) -> &'static str {
        "polling"
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Polling
    }

    fn suitability(&self, _ctx: &TransportContext) -> u8 {
        // Always available; the event stream outranks it when enabled.
        1
    }

    async fn run(
        &self,
        task_id: &str,
        ctx: &TransportContext,
        updates: mpsc::Sender<TaskStatus>,
    ) -> TransportOutcome {
        let mut ticker = interval(ctx.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            match self.fetch_with_retry(task_id, ctx).await {
                Ok(status) => {
                    if updates.send(status).await.is_err() {
                        return TransportOutcome::Finished;
                    }
                }
                // Retry budget exhausted: stop rather than loop on errors.
                Err(e) => return TransportOutcome::Failed(e.to_string()),
            }
        }
    }
}
