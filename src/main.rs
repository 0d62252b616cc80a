use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{Local, NaiveDateTime};
use clap::{Parser, Subcommand};
use colored::Colorize;
use console::Emoji;
use indicatif::{ProgressBar, ProgressStyle};
use tracing_subscriber::EnvFilter;

use shelfsync::{
    DeviceInfo, EventManager, JsonStore, LocalStore, ReqwestApiClient, is_within_auto_window,
    parse_time_of_day, remove_orphaned_progress, replay_offline_sessions,
};

// Emoji with fallback for terminals without Unicode support
static BOOKS: Emoji<'_, '_> = Emoji("📚 ", "");
static CLOCK: Emoji<'_, '_> = Emoji("⏰ ", "[t] ");
static UPLOAD: Emoji<'_, '_> = Emoji("📤 ", "[^] ");
static SUCCESS: Emoji<'_, '_> = Emoji("✅ ", "[+] ");
static FAILURE: Emoji<'_, '_> = Emoji("❌ ", "[!] ");
static BROOM: Emoji<'_, '_> = Emoji("🧹 ", "[-] ");
static CROSS: Emoji<'_, '_> = Emoji("✗ ", "x ");

/// Inspect and maintain a local playback progress store
#[derive(Parser, Debug)]
#[command(name = "shelfsync")]
#[command(about = "Inspect and maintain a local playback progress store")]
#[command(version)]
struct Args {
    /// Directory of the progress store
    #[arg(short, long, default_value = ".shelfsync")]
    store: PathBuf,

    /// Log progress of the library (overridden by RUST_LOG)
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List saved local progress records
    Progress,

    /// List cached sessions that have not reached the server yet
    Sessions,

    /// Show the event history of a media item
    History {
        /// Media item id (library item id, with "-<episode id>" for episodes)
        id: String,
    },

    /// Show the device settings
    Settings,

    /// Check whether a time lies in the auto sleep timer window
    AutoWindow {
        /// Time of day to check, "HH:MM" (default: now)
        #[arg(long)]
        at: Option<String>,
    },

    /// Remove progress of local items that no longer exist
    Cleanup {
        /// Local item ids that still exist
        #[arg(long = "keep", value_name = "ID")]
        keep: Vec<String>,
    },

    /// Upload cached sessions to the server
    Replay {
        /// Server address, e.g. https://abs.example.com
        #[arg(long)]
        server: String,

        /// API token
        #[arg(long, env = "SHELFSYNC_TOKEN", hide_env_values = true)]
        token: String,

        /// Id of the server connection the cached sessions belong to
        #[arg(long)]
        server_config_id: String,

        /// Device id reported to the server
        #[arg(long, default_value = "shelfsync-cli")]
        device_id: String,
    },
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "info" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn format_position(seconds: f64) -> String {
    let total = seconds.max(0.0) as u64;
    format!("{}:{:02}:{:02}", total / 3600, (total / 60) % 60, total % 60)
}

fn show_progress(store: &JsonStore) -> Result<()> {
    let mut records = store
        .all_local_media_progress()
        .context("Failed to read progress records")?;
    records.sort_by(|a, b| b.last_update.cmp(&a.last_update));

    if records.is_empty() {
        println!("{}", "No local progress saved".dimmed());
        return Ok(());
    }

    for progress in &records {
        let percent = format!("{:>3}%", progress.progress_percent());
        println!(
            "{} {} {} {}{}",
            if progress.is_finished {
                percent.green().bold()
            } else {
                percent.yellow()
            },
            progress.id.cyan(),
            format_position(progress.current_time),
            progress
                .last_update
                .with_timezone(&Local)
                .format("%Y-%m-%d %H:%M")
                .to_string()
                .dimmed(),
            if progress.is_server_linked() {
                format!(" -> {}", progress.media_item_id()).dimmed().to_string()
            } else {
                String::new()
            }
        );
    }
    Ok(())
}

fn show_sessions(store: &JsonStore) -> Result<()> {
    let sessions = store
        .playback_sessions()
        .context("Failed to read cached sessions")?;

    if sessions.is_empty() {
        println!("{SUCCESS}{}", "No cached sessions".green());
        return Ok(());
    }

    println!(
        "{UPLOAD}{} cached sessions waiting for the server",
        sessions.len().to_string().yellow().bold()
    );
    for session in &sessions {
        println!(
            "  {} {} {} ({}s listened)",
            session.id.cyan(),
            session.display_title_or_unset().bold(),
            format_position(session.current_time),
            session.time_listening
        );
    }
    Ok(())
}

fn show_history(store: &JsonStore, id: &str) -> Result<()> {
    let history = store
        .media_item_history(id)
        .with_context(|| format!("Failed to read history of {id}"))?
        .with_context(|| format!("No history for {id}"))?;

    println!(
        "{BOOKS}{} {}",
        history.media_display_title.bold().green(),
        format!("({} events)", history.events.len()).dimmed()
    );
    for event in &history.events {
        let sync = match (event.server_sync_attempted, event.server_sync_success) {
            (true, Some(true)) => "synced".green(),
            (true, _) => "sync failed".red(),
            (false, _) => "local".dimmed(),
        };
        println!(
            "  {} {:<9} {} {}",
            event
                .timestamp
                .with_timezone(&Local)
                .format("%Y-%m-%d %H:%M:%S")
                .to_string()
                .dimmed(),
            event.name,
            format_position(event.current_time),
            sync
        );
    }
    Ok(())
}

fn check_auto_window(store: &JsonStore, at: Option<&str>) -> Result<()> {
    let settings = store
        .device_settings()
        .context("Failed to read device settings")?;
    let start = settings.auto_sleep_timer_start()?;
    let end = settings.auto_sleep_timer_end()?;

    let now = Local::now().naive_local();
    let when = match at {
        Some(value) => NaiveDateTime::new(now.date(), parse_time_of_day(value)?),
        None => now,
    };
    let inside = is_within_auto_window(start, end, when);

    println!(
        "{CLOCK}Window {} - {}, {} is {}",
        start.format("%H:%M").to_string().cyan(),
        end.format("%H:%M").to_string().cyan(),
        when.format("%H:%M").to_string().bold(),
        if inside {
            "inside".green().bold()
        } else {
            "outside".yellow()
        }
    );
    if !settings.auto_sleep_timer {
        println!("  {}", "Auto sleep timer is disabled".dimmed());
    } else if settings.auto_sleep_timer_suppressed {
        println!("  {}", "Suppressed until the window ends".dimmed());
    }
    Ok(())
}

async fn replay(
    store: JsonStore,
    server: &str,
    token: &str,
    server_config_id: &str,
    device_id: &str,
) -> Result<bool> {
    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(60))
        .build()
        .context("Failed to create HTTP client")?;
    let api = ReqwestApiClient::with_client(http, server, token)
        .context("Invalid server address")?
        .with_device_info(DeviceInfo::new(device_id));

    let store = std::sync::Arc::new(store);
    let events = EventManager::new(store.clone());

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::default_spinner().template("{spinner:.green} {wide_msg}")?);
    spinner.enable_steady_tick(Duration::from_millis(100));
    spinner.set_message(format!("{UPLOAD}Uploading to {}", api.base_url().as_str().cyan()));

    let result = replay_offline_sessions(&api, store.as_ref(), &events, server_config_id).await;
    spinner.finish_and_clear();
    let summary = result.context("Failed to replay cached sessions")?;

    println!(
        "{SUCCESS}{} {} uploaded, {} accepted, {} moved server progress",
        "Replay complete:".bold().green(),
        summary.uploaded.to_string().cyan(),
        summary.accepted.to_string().green().bold(),
        summary.progress_synced.to_string().yellow()
    );
    if !summary.rejected.is_empty() {
        println!("\n{FAILURE}{}", "Rejected sessions:".red().bold());
        for (id, error) in &summary.rejected {
            println!("  {}{} - {}", CROSS, id.yellow(), error.dimmed());
        }
    }

    Ok(summary.rejected.is_empty() || summary.accepted > 0)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let store = JsonStore::open(&args.store)
        .with_context(|| format!("Failed to open store {}", args.store.display()))?;
    if store.partial_files_cleaned() > 0 {
        println!(
            "{BROOM}{}",
            format!(
                "Removed {} interrupted writes",
                store.partial_files_cleaned()
            )
            .dimmed()
        );
    }

    match args.command {
        Command::Progress => show_progress(&store)?,
        Command::Sessions => show_sessions(&store)?,
        Command::History { id } => show_history(&store, &id)?,
        Command::Settings => {
            let settings = store
                .device_settings()
                .context("Failed to read device settings")?;
            println!("{}", serde_json::to_string_pretty(&settings)?);
        }
        Command::AutoWindow { at } => check_auto_window(&store, at.as_deref())?,
        Command::Cleanup { keep } => {
            let existing: HashSet<String> = keep.into_iter().collect();
            let removed = remove_orphaned_progress(&store, &existing)
                .context("Failed to remove orphaned progress")?;
            println!(
                "{BROOM}Removed {} orphaned progress records",
                removed.to_string().bold()
            );
        }
        Command::Replay {
            server,
            token,
            server_config_id,
            device_id,
        } => {
            if !replay(store, &server, &token, &server_config_id, &device_id).await? {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}
