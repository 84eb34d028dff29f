mod ai;
mod config;
mod discovery;
mod error;
mod linkedin;
mod models;
mod orchestrator;
mod session;
mod store;
mod submit;
mod tailor;

use anyhow::{Result, anyhow};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use config::Config;
use linkedin::LinkedInSession;
use models::{ApplicationStatus, RunSummary};
use orchestrator::Orchestrator;
use store::TrackingStore;
use tailor::TailoringAdapter;

#[derive(Parser)]
#[command(name = "autoapply")]
#[command(about = "Unattended job-application automation - search, tailor, apply, track")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the tracking database
    Init,

    /// Execute one application run: discover postings, tailor the resume,
    /// submit up to the daily cap, record every outcome
    Run {
        /// Emit the run summary as JSON (for the invoking scheduler)
        #[arg(long)]
        json: bool,
    },

    /// List application records
    History {
        /// Filter by status (applied, skipped_error)
        #[arg(short, long)]
        status: Option<String>,
    },

    /// Clear a stale run-in-progress marker left behind by a crashed run
    Unlock,
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "autoapply=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let db = TrackingStore::open()?;

    match cli.command {
        Commands::Init => {
            db.init()?;
            println!("Database initialized at {}", db.path().display());
        }

        Commands::Run { json } => {
            db.ensure_initialized()?;
            let config = Config::from_env()?;
            let summary = execute_run(&config, &db)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                print_summary(&summary);
            }
            if summary.fatal.is_some() {
                std::process::exit(1);
            }
        }

        Commands::History { status } => {
            db.ensure_initialized()?;
            let status = match status.as_deref() {
                Some(raw) => Some(ApplicationStatus::parse(raw).ok_or_else(|| {
                    anyhow!("unknown status '{raw}' (expected applied or skipped_error)")
                })?),
                None => None,
            };
            let records = db.all(status)?;
            if records.is_empty() {
                println!("No application records found.");
            } else {
                println!(
                    "{:<12} {:<14} {:<22} {:<28} {:<20} {:<20}",
                    "POSTING", "STATUS", "REASON", "TITLE", "COMPANY", "APPLIED AT"
                );
                println!("{}", "-".repeat(118));
                for rec in records {
                    println!(
                        "{:<12} {:<14} {:<22} {:<28} {:<20} {:<20}",
                        truncate(&rec.posting_id, 10),
                        rec.status.as_str(),
                        truncate(rec.reason.as_deref().unwrap_or("-"), 20),
                        truncate(&rec.title, 26),
                        truncate(rec.company.as_deref().unwrap_or("-"), 18),
                        truncate(&rec.applied_at, 19),
                    );
                }
            }
        }

        Commands::Unlock => {
            db.ensure_initialized()?;
            if db.force_unlock()? {
                println!("Cleared stale run marker.");
            } else {
                println!("No run marker present.");
            }
        }
    }

    Ok(())
}

fn execute_run(config: &Config, db: &TrackingStore) -> Result<RunSummary> {
    let tailor_provider = ai::resolve_provider(&config.ai_provider, &config.ai_api_key)?;
    let tailor = TailoringAdapter::new(tailor_provider, config.max_tailored_chars);

    // The session holds its own provider for screening-form answers.
    let answer_provider = ai::resolve_provider(&config.ai_provider, &config.ai_api_key)?;
    let session = Box::new(LinkedInSession::connect(config, answer_provider)?);

    let orchestrator = Orchestrator::new(config, db, session, tailor);
    Ok(orchestrator.run()?)
}

fn print_summary(summary: &RunSummary) {
    println!("\nRun summary:");
    println!("  Discovered:       {}", summary.discovered);
    println!("  Applied:          {}", summary.applied);
    println!("  Skipped (dup):    {}", summary.skipped_duplicate);
    println!("  Skipped (error):  {}", summary.skipped_error);
    println!("  Left for later:   {}", summary.remaining_unprocessed);
    println!("  Stopped because:  {}", summary.stop_reason.describe());
    if !summary.errors.is_empty() {
        println!("  Errors:");
        for err in &summary.errors {
            println!("    - {err}");
        }
    }
    if let Some(fatal) = &summary.fatal {
        println!("  FATAL: {fatal}");
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        format!("{}...", &s[..max.saturating_sub(3)])
    }
}
