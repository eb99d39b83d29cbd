//! GramaFix - report local infrastructure problems
//!
//! Reports are delivered straight to the GramaFix backend when it is reachable
//! and kept in a local queue otherwise. Queued reports are sent automatically
//! the next time the client finds the backend online.

use anyhow::Result;
use clap::{Parser, Subcommand};
use colored::*;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use gramafix::api::ApiClient;
use gramafix::attachment::ImageAttachment;
use gramafix::config::{get_config_path, Config};
use gramafix::connectivity::{probe_loop, run_auto_sync, Connectivity};
use gramafix::queue::{OfflineQueue, SubmitOutcome, SyncReport};
use gramafix::report::{Location, ReportDraft, ReportForm};
use gramafix::storage::FileQueueStore;
use gramafix::voice::{self, AudioClip};

type Queue = OfflineQueue<FileQueueStore, ApiClient>;

/// GramaFix - civic issue reporting
#[derive(Parser)]
#[command(name = "gramafix")]
#[command(version)]
#[command(about = "Report local infrastructure problems, even without connectivity")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Report an issue (queued locally if the backend is unreachable)
    Submit {
        /// Issue category (e.g., "Roads", "Water", "Electricity")
        #[arg(short, long)]
        category: String,

        /// What is wrong (replaced by the transcript when --audio is given)
        #[arg(short, long, default_value = "")]
        description: String,

        /// Your name
        #[arg(long)]
        name: String,

        /// Your phone number
        #[arg(long)]
        phone: String,

        /// Gram panchayat the issue belongs to
        #[arg(short, long)]
        gram_panchayat: String,

        /// Address or landmark (optional)
        #[arg(short, long)]
        address: Option<String>,

        /// Latitude of the issue
        #[arg(long, allow_hyphen_values = true)]
        lat: f64,

        /// Longitude of the issue
        #[arg(long, allow_hyphen_values = true)]
        lon: f64,

        /// Photo to attach (repeatable)
        #[arg(short, long = "image")]
        images: Vec<PathBuf>,

        /// Voice recording to transcribe into the description
        #[arg(long)]
        audio: Option<PathBuf>,

        /// Skip the connectivity check and queue the report locally
        #[arg(long, default_value_t = false)]
        offline: bool,
    },

    /// Send queued reports now
    Sync,

    /// Watch connectivity and send queued reports whenever the backend comes back
    Watch,

    /// List reports waiting to be sent
    Queue,

    /// List issue categories
    Categories,

    /// Transcribe a voice recording
    Transcribe {
        /// Audio file (webm, mp4, ogg or wav)
        audio: PathBuf,
    },

    /// Show config file path
    Config,
}

fn main() -> Result<()> {
    init_logging();

    let cli = Cli::parse();
    let config = Config::init().unwrap_or_else(|err| {
        tracing::warn!(error = %err, "Could not load config; using defaults");
        Config::default()
    });
    let rt = tokio::runtime::Runtime::new()?;

    match cli.command {
        Commands::Submit {
            category,
            description,
            name,
            phone,
            gram_panchayat,
            address,
            lat,
            lon,
            images,
            audio,
            offline,
        } => {
            let form = ReportForm {
                category,
                description,
                reporter_name: name,
                reporter_phone: phone,
                gram_panchayat,
                address: address.filter(|a| !a.trim().is_empty()),
            };
            let mut draft = ReportDraft::new(form, Some(Location::new(lat, lon)));
            rt.block_on(run_submit(&config, &mut draft, images, audio, offline))?;
        }
        Commands::Sync => rt.block_on(run_sync(&config))?,
        Commands::Watch => rt.block_on(run_watch(&config))?,
        Commands::Queue => show_queue(&config)?,
        Commands::Categories => {
            let api = ApiClient::from_config(&config.api);
            let categories = rt.block_on(api.fetch_categories())?;
            println!("\n{}", "Issue categories:".bright_cyan().bold());
            for category in categories {
                println!(
                    "  {} {}  {}",
                    category.icon,
                    category.name.bright_white().bold(),
                    category.description.bright_black()
                );
            }
        }
        Commands::Transcribe { audio } => {
            let api = ApiClient::from_config(&config.api);
            let clip = rt.block_on(AudioClip::from_path(&audio))?;
            let transcript = rt.block_on(voice::transcribe(&api, &clip))?;
            println!("{}", transcript);
        }
        Commands::Config => {
            println!("{}", get_config_path()?);
        }
    }

    Ok(())
}

/// Used when `RUST_LOG` is unset
const DEFAULT_LOG_FILTER: &str = "gramafix=info";

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()),
        )
        .with_target(false)
        .init();
}

fn open_queue(config: &Config, connectivity: Connectivity) -> Result<Queue> {
    let store = FileQueueStore::new(config.queue.data_dir.clone())?;
    Ok(
        OfflineQueue::new(store, ApiClient::from_config(&config.api), connectivity)
            .with_policy(config.queue.sync_policy),
    )
}

async fn probe_online(api: &ApiClient) -> bool {
    match api.health_check().await {
        Ok(healthy) => healthy,
        Err(err) => {
            tracing::debug!(error = %err, "Backend unreachable");
            false
        }
    }
}

async fn run_submit(
    config: &Config,
    draft: &mut ReportDraft,
    images: Vec<PathBuf>,
    audio: Option<PathBuf>,
    offline: bool,
) -> Result<()> {
    let api = ApiClient::from_config(&config.api);
    let online = !offline && probe_online(&api).await;

    for path in &images {
        draft.images.push(ImageAttachment::from_path(path).await?);
    }

    if let Some(path) = audio {
        if online {
            let clip = AudioClip::from_path(&path).await?;
            println!("{}", "Transcribing voice description...".bright_black());
            match voice::transcribe(&api, &clip).await {
                Ok(transcript) => draft.apply_transcript(&transcript),
                Err(err) => println!(
                    "{} {}",
                    "⚠ Transcription failed:".bright_yellow(),
                    err.to_string().bright_red()
                ),
            }
        } else {
            println!(
                "{}",
                "⚠ Offline: voice description can't be transcribed, using the typed description."
                    .bright_yellow()
            );
        }
    }

    if let Err(errors) = draft.validate() {
        println!("\n{}", "✗ Report is incomplete:".bright_red().bold());
        for error in &errors {
            println!("  - {}", error);
        }
        anyhow::bail!("Report validation failed");
    }

    println!("\n{}", "Reporting issue:".bright_cyan().bold());
    print!("{}", draft.display());

    let queue = open_queue(config, Connectivity::new(online))?;
    if online {
        sync_with_lock(&queue).await;
    }

    match queue.submit(draft).await? {
        SubmitOutcome::Delivered(response) => {
            println!("\n{}", "✓ Issue reported successfully!".bright_green().bold());
            if let Some(id) = response.effective_id() {
                println!("{} {}", "Issue ID:".bright_white(), id.bright_cyan());
            }
        }
        SubmitOutcome::Queued { id, reason } => {
            println!(
                "\n{}",
                "You are offline. Report saved and will sync when back online."
                    .bright_yellow()
                    .bold()
            );
            println!("{} {}", "Queue ID:".bright_white(), id.bright_black());
            tracing::debug!(%reason, "Report queued");
        }
    }

    Ok(())
}

async fn run_sync(config: &Config) -> Result<()> {
    let api = ApiClient::from_config(&config.api);
    if !probe_online(&api).await {
        println!(
            "{}",
            "Backend unreachable; queued reports will be sent later.".bright_yellow()
        );
        return Ok(());
    }

    let queue = open_queue(config, Connectivity::new(true))?;
    if let Some(report) = sync_with_lock(&queue).await {
        print_sync_report(&report);
    }
    Ok(())
}

async fn run_watch(config: &Config) -> Result<()> {
    let api = ApiClient::from_config(&config.api);
    let connectivity = Connectivity::new(probe_online(&api).await);
    let queue = open_queue(config, connectivity.clone())?;

    let Some(_lock) = queue.store().try_acquire_sync_lock()? else {
        println!(
            "{}",
            "Another gramafix instance is already syncing; exiting.".bright_black()
        );
        return Ok(());
    };

    println!(
        "{} {}",
        "Watching connectivity to".bright_cyan(),
        api.base_url().bright_white()
    );
    println!("{}", "Press Ctrl+C to stop.".bright_black());

    let interval = Duration::from_secs(config.queue.probe_interval_secs);
    let queue = Arc::new(queue);

    tokio::select! {
        _ = run_auto_sync(queue.clone()) => {}
        _ = probe_loop(&api, &connectivity, interval) => {}
        _ = tokio::signal::ctrl_c() => {
            println!("\n{}", "Stopped.".bright_black());
        }
    }

    Ok(())
}

async fn sync_with_lock(queue: &Queue) -> Option<SyncReport> {
    let _lock = match queue.store().try_acquire_sync_lock() {
        Ok(Some(lock)) => lock,
        Ok(None) => {
            println!(
                "{}",
                "Another gramafix instance is already syncing queued reports; skipping."
                    .bright_black()
            );
            return None;
        }
        Err(err) => {
            println!(
                "{} {}",
                "⚠ Could not acquire sync lock:".bright_yellow(),
                err.to_string().bright_red()
            );
            return None;
        }
    };

    match queue.sync().await {
        Ok(report) => Some(report),
        Err(err) => {
            println!(
                "{} {}",
                "⚠ Could not sync queued reports:".bright_yellow(),
                err.to_string().bright_red()
            );
            None
        }
    }
}

fn print_sync_report(report: &SyncReport) {
    if report.attempted == 0 {
        println!("{}", "No queued reports.".bright_black());
        return;
    }

    if report.delivered > 0 {
        println!(
            "{} {}",
            "Sent queued reports:".bright_green(),
            report.delivered.to_string().bright_white()
        );
    }
    if report.remaining > 0 {
        println!(
            "{} {}",
            "Still queued (will retry later):".bright_yellow(),
            report.remaining.to_string().bright_white()
        );
    }
}

fn show_queue(config: &Config) -> Result<()> {
    let queue = open_queue(config, Connectivity::new(false))?;
    let pending = queue.pending()?;

    if pending.is_empty() {
        println!("{}", "No queued reports.".bright_black());
        return Ok(());
    }

    println!(
        "\n{} {}",
        "Queued reports:".bright_cyan().bold(),
        pending.len().to_string().bright_white()
    );
    for entry in pending {
        let created = chrono::DateTime::from_timestamp_millis(entry.created_at)
            .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "unknown time".to_string());
        println!(
            "  {} {} - {} ({} photo{})  {}",
            created.bright_black(),
            entry.form.category.bright_white().bold(),
            entry.form.gram_panchayat,
            entry.images.len(),
            if entry.images.len() == 1 { "" } else { "s" },
            entry.id.bright_black()
        );
    }

    Ok(())
}
