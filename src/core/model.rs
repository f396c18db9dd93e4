use crate::i18n::Messages;
use serde::de::{Deserialize, Deserializer};
use serde::ser::{Serialize, Serializer};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Pending,
    Downloading,
    Processing,
    Completed,
    Error,
    Canceled,
    /// Anything the backend sends that we do not recognize. Tracked, not fatal.
    Unknown,
}

impl TaskState {
    /// The backend is not consistent about case (`"Error"` has been observed
    /// alongside `"completed"`), so parse case-insensitively.
    pub fn parse(raw: &str) -> Self {
        match raw.to_ascii_lowercase().as_str() {
            "pending" => Self::Pending,
            "downloading" => Self::Downloading,
            "processing" => Self::Processing,
            "completed" => Self::Completed,
            "error" | "failed" => Self::Error,
            "canceled" | "cancelled" => Self::Canceled,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Downloading => "downloading",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Error => "error",
            Self::Canceled => "canceled",
            Self::Unknown => "unknown",
        }
    }

    /// No further updates follow a terminal state.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Error | Self::Canceled)
    }
}

impl Serialize for TaskState {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for TaskState {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::parse(&raw))
    }
}

/// One status observation for a task, as reported by the backend.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct TaskStatus {
    pub task_id: String,
    #[serde(rename = "status")]
    pub state: TaskState,
    #[serde(default)]
    pub percent: f64,
    #[serde(default)]
    pub description: Option<String>,
}

impl TaskStatus {
    pub fn new(task_id: impl Into<String>, state: TaskState, percent: f64) -> Self {
        Self {
            task_id: task_id.into(),
            state,
            percent,
            description: None,
        }
    }

    /// Progress is only trusted inside [0, 100]; the backend occasionally
    /// reports regressions and overshoots mid-merge.
    pub fn clamped_percent(&self) -> f64 {
        if self.percent.is_finite() {
            self.percent.clamp(0.0, 100.0)
        } else {
            0.0
        }
    }

    /// Display message precedence: explicit non-empty description, then the
    /// per-state table, then the generic in-progress message.
    pub fn display_message<'a>(&'a self, msgs: &'a Messages) -> &'a str {
        match self.description.as_deref() {
            Some(d) if !d.trim().is_empty() => d,
            _ => msgs.status_message(self.state),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FormatInfo {
    pub quality: String,
    pub filesize: Option<f64>,
    pub video_format_id: String,
    pub audio_format_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct VideoInfo {
    pub url: String,
    pub title: String,
    pub preview_url: Option<String>,
    pub formats: Vec<FormatInfo>,
}

#[derive(Debug, Clone)]
pub struct DownloadRequest {
    pub url: String,
    pub video_format_id: String,
    pub audio_format_id: Option<String>,
}
