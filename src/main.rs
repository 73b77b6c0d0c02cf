mod config;
mod delivery;
mod executor;
mod history;
mod i18n;
mod messaging;
mod orchestrator;
mod scanner;
mod server;
mod storage;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use config::Config;
use delivery::{ArtifactDelivery, DeliveryError};
use history::{HistoryFilter, HistoryStore};
use i18n::I18n;
use messaging::{ConfigPermissions, ConsoleMessenger};
use orchestrator::Orchestrator;
use storage::{ConversationKind, DeliveryTarget, HistoryRecord, Requester};

#[derive(Parser)]
#[command(name = "coderun")]
#[command(about = "Run code snippets on behalf of chat users and deliver what they produce")]
struct Cli {
    /// Config file to use instead of ~/.coderun/config.toml
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a snippet, record it and deliver its files
    Run {
        /// Snippet source; `-` reads it from stdin
        code: Option<String>,
        /// Read the snippet from a file
        #[arg(long, short = 'f', conflicts_with = "code")]
        file: Option<PathBuf>,
        /// Short description stored with the record
        #[arg(long, short = 'd')]
        description: Option<String>,
        #[arg(long, default_value = "local")]
        requester_id: String,
        #[arg(long, default_value = "local user")]
        requester_name: String,
        /// Conversation to deliver to [default: the requester id]
        #[arg(long)]
        session: Option<String>,
        /// Deliver to a group conversation instead of a private one
        #[arg(long)]
        group: bool,
    },
    /// Serve artifact links and the history API over HTTP
    Serve,
    /// List execution history, newest first
    History {
        #[arg(long)]
        requester: Option<String>,
        #[arg(long, conflicts_with = "succeeded")]
        failed: bool,
        #[arg(long)]
        succeeded: bool,
        /// Case-insensitive text to look for in code, names, descriptions and errors
        #[arg(long)]
        search: Option<String>,
        #[arg(long, default_value_t = 1)]
        page: usize,
        #[arg(long, default_value_t = 20)]
        page_size: usize,
    },
    /// Show one record in full
    Show { id: u64 },
    /// Aggregate counts over the whole history
    Stats,
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("coderun=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging();

    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::new()?,
    };
    let i18n = I18n::new(&config.get_effective_language());
    let history = Arc::new(HistoryStore::open(&config.storage.effective_data_dir())?);

    match cli.command {
        Commands::Run {
            code,
            file,
            description,
            requester_id,
            requester_name,
            session,
            group,
        } => {
            let code = read_snippet(code, file)?;
            let target = DeliveryTarget {
                session_id: session.unwrap_or_else(|| requester_id.clone()),
                kind: if group { ConversationKind::Group } else { ConversationKind::Private },
            };

            let orchestrator = Orchestrator::from_config(
                &config,
                history,
                Arc::new(ConsoleMessenger),
                Arc::new(ConfigPermissions::new(&config.access.authorized_requesters)),
            )?;
            let request = orchestrator.request(code, description, Requester::new(requester_id, requester_name));

            let summary = orchestrator.handle(&request, &target).await?;

            for delivery in &summary.deliveries {
                print_delivery(delivery, &i18n);
            }
            match summary.record_id {
                Some(id) => println!("{}", i18n.t_format("record_saved", &[&id.to_string()]).green()),
                None => println!("{}", i18n.t("record_not_saved").red()),
            }
            if !summary.success {
                std::process::exit(1);
            }
        }
        Commands::Serve => {
            println!(
                "{}",
                i18n.t_format("server_listening", &[&format!("0.0.0.0:{}", config.delivery.served_port)])
                    .green()
                    .bold()
            );
            server::serve(&config, history).await?;
        }
        Commands::History {
            requester,
            failed,
            succeeded,
            search,
            page,
            page_size,
        } => {
            let filter = HistoryFilter {
                requester_id: requester,
                success: match (failed, succeeded) {
                    (true, _) => Some(false),
                    (_, true) => Some(true),
                    _ => None,
                },
                search,
            };
            let result = history.query(&filter, page, page_size.clamp(1, 100))?;
            if result.records.is_empty() {
                println!("{}", i18n.t("no_records").yellow());
                return Ok(());
            }
            for record in &result.records {
                print_record_line(record);
            }
            println!(
                "{}",
                i18n.t_format(
                    "history_page",
                    &[
                        &result.page.to_string(),
                        &result.total_pages.to_string(),
                        &result.total_count.to_string()
                    ]
                )
                .dimmed()
            );
        }
        Commands::Show { id } => {
            let record = history.get(id)?;
            print_record(&record);
        }
        Commands::Stats => {
            let stats = history.stats()?;
            let rows = [
                ("stats_total", stats.total.to_string()),
                ("stats_success", stats.success_count.to_string()),
                ("stats_failure", stats.failure_count.to_string()),
                ("stats_rate", format!("{:.2}%", stats.success_rate)),
                ("stats_avg", format!("{:.0}ms", stats.avg_duration_ms)),
                ("stats_users", stats.unique_requesters.to_string()),
                ("stats_recent", stats.recent_count.to_string()),
            ];
            for (key, value) in rows {
                println!("{:<20} {}", i18n.t(key).yellow(), value.green());
            }
        }
    }

    Ok(())
}

fn read_snippet(code: Option<String>, file: Option<PathBuf>) -> Result<String> {
    let from_stdin = || -> Result<String> {
        let mut buf = String::new();
        io::stdin().read_to_string(&mut buf).context("failed to read snippet from stdin")?;
        Ok(buf)
    };

    let code = match (code, file) {
        (_, Some(path)) if path.as_os_str() == "-" => from_stdin()?,
        (_, Some(path)) => std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read snippet {}", path.display()))?,
        (Some(code), None) if code == "-" => from_stdin()?,
        (Some(code), None) => code,
        (None, None) => bail!("no snippet given; pass CODE, `-` or --file"),
    };
    if code.trim().is_empty() {
        bail!("snippet is empty");
    }
    Ok(code)
}

/// Relative to the working directory when that is shorter to read.
fn display_path(path: &Path) -> String {
    std::env::current_dir()
        .ok()
        .and_then(|cwd| pathdiff::diff_paths(path, cwd))
        .filter(|rel| !rel.starts_with(".."))
        .unwrap_or_else(|| path.to_path_buf())
        .display()
        .to_string()
}

fn print_delivery(delivery: &ArtifactDelivery, i18n: &I18n) {
    let shown = display_path(&delivery.path);
    let line = match (&delivery.delivered_via, &delivery.error) {
        (Some(channel), _) => i18n.t_format("delivered_via", &[&shown, &channel.to_string()]).green(),
        (None, Some(DeliveryError::MissingArtifact)) => i18n.t_format("artifact_missing", &[&shown]).yellow(),
        (None, error) => {
            let reason = error.as_ref().map(|e| e.to_string()).unwrap_or_default();
            i18n.t_format("delivery_failed", &[&shown, &reason]).red()
        }
    };
    println!("{}", line);
}

fn print_record_line(record: &HistoryRecord) {
    let mark = if record.success { "✔".green() } else { "✘".red() };
    let label = record
        .description
        .clone()
        .or_else(|| record.code.lines().find(|l| !l.trim().is_empty()).map(|l| l.trim().to_string()))
        .unwrap_or_default();
    let label: String = label.chars().take(60).collect();
    println!(
        "{} {:>5}  {}  {:<16} {:>7}ms  {}",
        mark,
        format!("#{}", record.id).yellow(),
        record.created_at.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M:%S"),
        record.requester_name,
        record.duration_ms,
        label
    );
}

fn print_record(record: &HistoryRecord) {
    let status = if record.success { "success".green().bold() } else { "failed".red().bold() };
    println!("{} {}", format!("#{}", record.id).yellow().bold(), status);
    println!("{} {} ({})", "requester:".cyan(), record.requester_name, record.requester_id);
    println!(
        "{} {}",
        "time:".cyan(),
        record.created_at.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M:%S")
    );
    println!("{} {}ms", "duration:".cyan(), record.duration_ms);
    println!("{} {}", "hash:".cyan(), &record.code_hash[..12.min(record.code_hash.len())]);
    if let Some(description) = &record.description {
        println!("{} {}", "description:".cyan(), description);
    }

    println!("{}", "code:".cyan().bold());
    println!("{}", record.code.trim_end());
    if !record.output.is_empty() {
        println!("{}", "output:".cyan().bold());
        println!("{}", record.output.trim_end());
    }
    if let Some(error) = &record.error_msg {
        println!("{}", "error:".red().bold());
        println!("{}", error.red());
    }
    if !record.artifacts.is_empty() {
        println!("{}", "artifacts:".cyan().bold());
        for artifact in &record.artifacts {
            println!("  {}", display_path(artifact));
        }
    }
}
