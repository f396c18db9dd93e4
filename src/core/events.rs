use crate::core::model::TaskStatus;
use crate::transport::registry::TransportKind;

/// Everything observers can learn about the active session. Status events
/// carry the raw observation; terminal events fire exactly once per session.
#[derive(Debug, Clone)]
pub enum TrackerEvent {
    TrackingStarted { task_id: String, transport: TransportKind },
    Status { status: TaskStatus },
    /// The event stream dropped and polling took over. Informational only;
    /// never surfaced as a task error.
    TransportChanged { task_id: String, from: TransportKind, to: TransportKind },
    Completed { task_id: String },
    Failed { task_id: String, message: String },
    Canceled { task_id: String },
    /// A poll request kept failing past the retry budget. Tracking stopped;
    /// the task itself may still be running on the backend.
    RequestFailed { task_id: String, message: String },
}
