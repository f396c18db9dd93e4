mod backend;
mod core;
mod i18n;
mod transport;

use anyhow::Context;
use clap::{Arg, ArgAction, ArgMatches, Command};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

use crate::backend::http::HttpBackend;
use crate::backend::StatusBackend;
use crate::core::events::TrackerEvent;
use crate::core::model::DownloadRequest;
use crate::core::store::TaskStore;
use crate::core::tracker::{Tracker, TrackerConfig};
use crate::i18n::{get_messages, Locale, Messages};
use crate::transport::registry::TransportRegistry;

fn build_cli() -> Command {
    Command::new("vidtrack")
        .about("Track video download tasks (event stream + polling fallback)")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("base_url")
                .long("base-url")
                .help("Backend API base URL")
                .default_value("http://127.0.0.1:8000/api")
                .global(true)
                .num_args(1),
        )
        .arg(
            Arg::new("locale")
                .long("locale")
                .help("Message locale (en, ru)")
                .default_value("en")
                .global(true)
                .num_args(1),
        )
        .arg(
            Arg::new("db")
                .long("db")
                .help("Task history database path")
                .default_value("./.vidtrack.sqlite")
                .global(true)
                .num_args(1),
        )
        .arg(
            Arg::new("poll_ms")
                .long("poll-ms")
                .help("Polling interval in milliseconds")
                .default_value("1000")
                .global(true)
                .num_args(1),
        )
        .arg(
            Arg::new("timeout_secs")
                .long("timeout-secs")
                .help("Per-request timeout in seconds")
                .default_value("10")
                .global(true)
                .num_args(1),
        )
        .arg(
            Arg::new("retries")
                .long("retries")
                .help("Retries per failed status request")
                .default_value("2")
                .global(true)
                .num_args(1),
        )
        .arg(
            Arg::new("no_events")
                .long("no-events")
                .help("Disable the event-stream transport and poll only")
                .action(ArgAction::SetTrue)
                .global(true),
        )
        .subcommand(
            Command::new("formats")
                .about("List available formats for a video URL")
                .arg(Arg::new("url").help("Video page URL").required(true).num_args(1)),
        )
        .subcommand(
            Command::new("start")
                .about("Start a download task and track it to completion")
                .arg(Arg::new("url").help("Video page URL").required(true).num_args(1))
                .arg(
                    Arg::new("format")
                        .long("format")
                        .help("Video format id (see `formats`)")
                        .required(true)
                        .num_args(1),
                )
                .arg(
                    Arg::new("audio_format")
                        .long("audio-format")
                        .help("Audio format id to merge in")
                        .num_args(1),
                ),
        )
        .subcommand(
            Command::new("track")
                .about("Track an existing task by id")
                .arg(Arg::new("task_id").required(true).num_args(1)),
        )
        .subcommand(Command::new("resume").about("Re-track the most recent unfinished task"))
        .subcommand(
            Command::new("cancel")
                .about("Cancel a task")
                .arg(Arg::new("task_id").required(true).num_args(1)),
        )
        .subcommand(
            Command::new("fetch")
                .about("Save a completed task's file")
                .arg(Arg::new("task_id").required(true).num_args(1))
                .arg(
                    Arg::new("out_dir")
                        .long("out-dir")
                        .help("Output directory")
                        .default_value("./downloads")
                        .num_args(1),
                ),
        )
        .subcommand(
            Command::new("history")
                .about("Show recent tasks")
                .arg(
                    Arg::new("limit")
                        .long("limit")
                        .default_value("20")
                        .num_args(1),
                ),
        )
}

struct App {
    backend: Arc<HttpBackend>,
    store: TaskStore,
    tracker: Tracker,
    msgs: &'static Messages,
}

async fn build_app(m: &ArgMatches) -> anyhow::Result<App> {
    let base_url = m.get_one::<String>("base_url").unwrap();
    let locale = Locale::from_str(m.get_one::<String>("locale").unwrap());
    let db: PathBuf = m.get_one::<String>("db").unwrap().into();
    let poll_ms: u64 = m.get_one::<String>("poll_ms").unwrap().parse()?;
    let timeout_secs: u64 = m.get_one::<String>("timeout_secs").unwrap().parse()?;
    let retries: u32 = m.get_one::<String>("retries").unwrap().parse()?;
    let no_events = m.get_flag("no_events");

    let backend = Arc::new(HttpBackend::new(
        base_url,
        "vidtrack/0.1",
        Duration::from_secs(timeout_secs.max(1)),
    )?);
    let store = TaskStore::open(&db).await?;

    let config = TrackerConfig {
        poll_interval: Duration::from_millis(poll_ms.max(100)),
        retries,
        retry_backoff_ms: 400,
        event_stream_enabled: !no_events,
    };
    let tracker = Tracker::new(
        backend.clone() as Arc<dyn StatusBackend>,
        TransportRegistry::with_defaults(),
        store.clone(),
        config,
    );

    Ok(App {
        backend,
        store,
        tracker,
        msgs: get_messages(locale),
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let matches = build_cli().get_matches();
    let (name, m) = matches.subcommand().context("a subcommand is required")?;
    let app = build_app(m).await?;

    match name {
        "formats" => {
            let url = m.get_one::<String>("url").unwrap();
            let info = app.backend.video_formats(url).await?;
            println!("{} ({})", info.title, info.url);
            if let Some(preview) = &info.preview_url {
                println!("preview: {}", preview);
            }
            for f in &info.formats {
                let size = f.filesize.map(fmt_bytes).unwrap_or_else(|| "?".to_string());
                let audio = f
                    .audio_format_id
                    .as_deref()
                    .map(|a| format!(" audio={}", a))
                    .unwrap_or_default();
                println!("- {:>10} {:>10} video={}{}", f.quality, size, f.video_format_id, audio);
            }
        }
        "start" => {
            let url = m.get_one::<String>("url").unwrap().clone();
            let req = DownloadRequest {
                url: url.clone(),
                video_format_id: m.get_one::<String>("format").unwrap().clone(),
                audio_format_id: m.get_one::<String>("audio_format").cloned(),
            };
            let task_id = app.backend.start_download(&req).await?;
            println!("Task started: {}", task_id);
            app.store.record_started(&task_id, Some(&url), None).await?;
            track_and_render(&app, &task_id).await?;
        }
        "track" => {
            let task_id = m.get_one::<String>("task_id").unwrap();
            track_and_render(&app, task_id).await?;
        }
        "resume" => {
            let unfinished = app.store.unfinished().await?;
            match unfinished.first() {
                Some(rec) => {
                    let task_id = rec.task_id.clone();
                    track_and_render(&app, &task_id).await?;
                }
                None => println!("{}", app.msgs.nothing_to_resume),
            }
        }
        "cancel" => {
            let task_id = m.get_one::<String>("task_id").unwrap();
            app.tracker.cancel(task_id).await?;
            println!("{}: {}", app.msgs.cancel_sent, task_id);
        }
        "fetch" => {
            let task_id = m.get_one::<String>("task_id").unwrap();
            let out_dir: PathBuf = m.get_one::<String>("out_dir").unwrap().into();
            let title = app
                .store
                .get(task_id)
                .await?
                .and_then(|r| r.title)
                .unwrap_or_else(|| task_id.clone());
            let dest = out_dir.join(sanitize_filename::sanitize(format!("{}.mp4", title)));
            let written = app.backend.fetch_video(task_id, &dest).await?;
            println!(
                "{} {} ({})",
                app.msgs.saved_to,
                dest.display(),
                fmt_bytes(written as f64)
            );
        }
        "history" => {
            let limit: i64 = m.get_one::<String>("limit").unwrap().parse()?;
            print_history(&app, limit).await?;
        }
        _ => {}
    }

    Ok(())
}

async fn print_history(app: &App, limit: i64) -> anyhow::Result<()> {
    let recent = app.store.recent(limit).await?;
    println!("{}:", app.msgs.history_header);
    if recent.is_empty() {
        println!("{}", app.msgs.history_empty);
        return Ok(());
    }
    for r in recent {
        let label = r.title.or(r.url).or(r.description).unwrap_or_default();
        println!(
            "- {} {:>11} {:>4.0}% {} ({})",
            r.task_id,
            r.state.as_str(),
            r.percent,
            label,
            r.updated_at
        );
    }
    Ok(())
}

/// Subscribes before tracking starts so no event is missed, then renders the
/// session until a terminal event.
async fn track_and_render(app: &App, task_id: &str) -> anyhow::Result<()> {
    let msgs = app.msgs;
    let mut rx = app.tracker.subscribe();
    app.tracker.start_tracking(task_id).await?;

    let pb = ProgressBar::new(100);
    let style = ProgressStyle::with_template(
        "{spinner:.green} [{bar:40.cyan/blue}] {pos:>3}% {wide_msg}",
    )
    .unwrap()
    .tick_chars("|/-\\ ")
    .progress_chars("#>-");
    pb.set_style(style);
    pb.enable_steady_tick(Duration::from_millis(120));

    loop {
        let event = match rx.recv().await {
            Ok(e) => e,
            Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => break,
        };

        match event {
            TrackerEvent::TrackingStarted { task_id, transport } => {
                pb.println(format!(
                    "[{}] {} ({}) {}",
                    msgs.info_prefix,
                    msgs.tracking_started,
                    transport.as_str(),
                    task_id
                ));
            }
            TrackerEvent::Status { status } => {
                pb.set_position(status.clamped_percent().round() as u64);
                pb.set_message(status.display_message(msgs).to_string());
            }
            TrackerEvent::TransportChanged { .. } => {
                pb.println(format!("[{}] {}", msgs.info_prefix, msgs.transport_fallback));
            }
            TrackerEvent::Completed { .. } => {
                pb.finish_with_message(msgs.status_completed.to_string());
                println!("{}", msgs.ready_hint);
                print_history(app, 5).await?;
                break;
            }
            TrackerEvent::Failed { message, .. } => {
                let message = if message.is_empty() {
                    msgs.status_error.to_string()
                } else {
                    message
                };
                pb.abandon_with_message(message.clone());
                eprintln!("[{}] {}", msgs.error_prefix, message);
                break;
            }
            TrackerEvent::Canceled { .. } => {
                pb.abandon_with_message(msgs.canceled_notice.to_string());
                break;
            }
            TrackerEvent::RequestFailed { message, .. } => {
                pb.abandon_with_message(msgs.request_failed.to_string());
                eprintln!("[{}] {}: {}", msgs.error_prefix, msgs.request_failed, message);
                break;
            }
        }
    }

    Ok(())
}

fn fmt_bytes(n: f64) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = 1024.0 * 1024.0;
    const GB: f64 = 1024.0 * 1024.0 * 1024.0;
    if n >= GB {
        format!("{:.2}GiB", n / GB)
    } else if n >= MB {
        format!("{:.2}MiB", n / MB)
    } else if n >= KB {
        format!("{:.2}KiB", n / KB)
    } else {
        format!("{}B", n as u64)
    }
}
