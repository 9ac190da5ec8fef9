//! # pin-transfer
//!
//! Command-line front end for the workcell. Hardware is driven by the
//! simulated actuator; journals and run snapshots live in the configured run
//! log directory.
//!
//! ```bash
//! pin-transfer import journals/screen-42.json
//! pin-transfer run screen-42
//! pin-transfer resume            # most recent unfinished job
//! pin-transfer status screen-42
//! ```
//!
//! Ctrl-C stops every runner; the job can be resumed afterwards.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use pin_transfer::actuation::SimulatedActuator;
use pin_transfer::config::{Settings, DEFAULT_CONFIG_PATH};
use pin_transfer::journal::{FileRunLog, Instrument, Journal, RunLog, SnapshotStore};
use pin_transfer::runner::{JobController, JobReport};
use pin_transfer::{telemetry, AppResult};

#[derive(Parser, Debug)]
#[command(name = "pin-transfer")]
#[command(about = "Run pin-transfer journals on the workcell", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Store a journal from a JSON file in the run log
    Import {
        /// Path to the journal JSON
        path: PathBuf,
    },

    /// Run a journal from the beginning
    Run {
        journal_id: String,
    },

    /// Resume a journal from its last snapshot (default: most recent unfinished)
    Resume {
        journal_id: Option<String>,
    },

    /// Show the last snapshot of a journal
    Status {
        journal_id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = Settings::load_from(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    telemetry::init(&settings.application.log_level);

    let run_log = Arc::new(
        FileRunLog::open(&settings.run_log.directory)
            .await
            .context("opening run log")?,
    );

    match cli.command {
        Commands::Import { path } => {
            let text = tokio::fs::read_to_string(&path)
                .await
                .with_context(|| format!("reading {}", path.display()))?;
            let journal: Journal = serde_json::from_str(&text).context("parsing journal")?;
            run_log.create_journal(&journal).await?;
            println!(
                "Imported journal '{}' ({} liquid handler, {} transport commands)",
                journal.id,
                journal.len(Instrument::LiquidHandler),
                journal.len(Instrument::PlateTransport)
            );
        }
        Commands::Run { journal_id } => {
            let controller = controller(settings, run_log);
            let cancel = stop_on_ctrl_c();
            report(controller.start(&journal_id, &cancel).await)?;
        }
        Commands::Resume { journal_id } => {
            let controller = controller(settings, run_log.clone());
            let cancel = stop_on_ctrl_c();
            match journal_id {
                Some(id) => {
                    let snapshot = run_log.load_current(&id).await?;
                    report(controller.resume(snapshot, &cancel).await)?;
                }
                None => match controller.resume_unfinished(&cancel).await {
                    Ok(None) => println!("No unfinished job"),
                    Ok(Some(job)) => report(Ok(job))?,
                    Err(err) => report(Err(err))?,
                },
            }
        }
        Commands::Status { journal_id } => {
            let snapshot = run_log.load_current(&journal_id).await?;
            println!("Journal:   {}", snapshot.journal_id);
            println!("Completed: {}", snapshot.completed);
            println!("Updated:   {}", snapshot.updated_at.to_rfc3339());
            for instrument in Instrument::ALL {
                println!("  {:<16} next ordinal {}", instrument, snapshot.cursor(instrument));
            }
            println!(
                "Carousel at stacker {}, {} plates tracked",
                snapshot.current_layout.current_position,
                snapshot.current_layout.plates.len()
            );
            for (scope, values) in &snapshot.named_state {
                let set: Vec<String> = values
                    .iter()
                    .map(|(key, value)| format!("{key}={value}"))
                    .collect();
                println!("  {scope}: {}", set.join(", "));
            }
        }
    }
    Ok(())
}

fn controller(settings: Settings, run_log: Arc<FileRunLog>) -> JobController<FileRunLog> {
    let actuator = Arc::new(SimulatedActuator::new(settings.actuation.simulated.clone()));
    JobController::new(settings, run_log, actuator)
}

/// Cancellation token that fires on the first Ctrl-C.
fn stop_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("stop requested, halting all runners");
            trigger.cancel();
        }
    });
    cancel
}

fn report(outcome: AppResult<JobReport>) -> Result<()> {
    match outcome {
        Ok(job) => {
            info!(journal = %job.journal_id, "job complete");
            println!("Journal '{}' completed", job.journal_id);
            Ok(())
        }
        Err(err) if err.is_cancelled() => {
            println!("Stopped. Run `pin-transfer resume` to continue.");
            Ok(())
        }
        Err(err) => Err(err.into()),
    }
}
