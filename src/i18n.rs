/// Simple localization support for vidtrack.
/// Locale can be selected via the `--locale` CLI flag (e.g. `--locale ru`).
use crate::core::model::TaskState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Locale {
    #[default]
    En,
    Ru,
}

impl Locale {
    pub fn from_str(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "ru" | "ru-ru" | "ru_ru" => Self::Ru,
            _ => Self::En,
        }
    }
}

pub struct Messages {
    pub status_pending: &'static str,
    pub status_downloading: &'static str,
    pub status_processing: &'static str,
    pub status_completed: &'static str,
    pub status_error: &'static str,
    pub status_canceled: &'static str,
    pub status_unknown: &'static str,
    pub tracking_started: &'static str,
    pub transport_fallback: &'static str,
    pub ready_hint: &'static str,
    pub canceled_notice: &'static str,
    pub request_failed: &'static str,
    pub cancel_sent: &'static str,
    pub history_header: &'static str,
    pub history_empty: &'static str,
    pub nothing_to_resume: &'static str,
    pub saved_to: &'static str,
    pub error_prefix: &'static str,
    pub info_prefix: &'static str,
}

impl Messages {
    pub fn status_message(&self, state: TaskState) -> &'static str {
        match state {
            TaskState::Pending => self.status_pending,
            TaskState::Downloading => self.status_downloading,
            TaskState::Processing => self.status_processing,
            TaskState::Completed => self.status_completed,
            TaskState::Error => self.status_error,
            TaskState::Canceled => self.status_canceled,
            TaskState::Unknown => self.status_unknown,
        }
    }
}

pub static EN: Messages = Messages {
    status_pending: "preparing",
    status_downloading: "downloading",
    status_processing: "processing",
    status_completed: "done",
    status_error: "error occurred",
    status_canceled: "canceled by user",
    status_unknown: "in progress",
    tracking_started: "tracking started",
    transport_fallback: "event stream unavailable, polling instead",
    ready_hint: "file is ready, run `vidtrack fetch` to save it",
    canceled_notice: "task canceled",
    request_failed: "status request failed, tracking stopped",
    cancel_sent: "cancel request sent",
    history_header: "Recent tasks",
    history_empty: "no tasks recorded yet",
    nothing_to_resume: "no unfinished task to resume",
    saved_to: "saved to",
    error_prefix: "ERR",
    info_prefix: "INFO",
};

pub static RU: Messages = Messages {
    status_pending: "Подготовка к скачиванию...",
    status_downloading: "Скачивание видео...",
    status_processing: "Обработка файла...",
    status_completed: "Скачивание завершено!",
    status_error: "Произошла ошибка",
    status_canceled: "Отменено пользователем",
    status_unknown: "Выполняется...",
    tracking_started: "отслеживание запущено",
    transport_fallback: "поток событий недоступен, включён опрос",
    ready_hint: "файл готов, выполните `vidtrack fetch` для сохранения",
    canceled_notice: "задача отменена",
    request_failed: "ошибка при проверке статуса, отслеживание остановлено",
    cancel_sent: "запрос на отмену отправлен",
    history_header: "Последние задачи",
    history_empty: "история пуста",
    nothing_to_resume: "нет незавершённых задач",
    saved_to: "сохранено в",
    error_prefix: "ОШИБКА",
    info_prefix: "ИНФО",
};

pub fn get_messages(locale: Locale) -> &'static Messages {
    match locale {
        Locale::En => &EN,
        Locale::Ru => &RU,
    }
}
