mod commands;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use gavel_common::Config;
use gavel_pipeline::metrics;
use tokio::signal;
use tokio::sync::watch;
use tracing::warn;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "gavel-cli")]
#[command(about = "Gavel CLI - Evaluate submissions through the external judge", long_about = None)]
struct Cli {
    /// Print Prometheus metrics after the command finishes
    #[arg(long, global = true)]
    print_metrics: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List enabled languages and their judge environment ids
    Languages,

    /// Run code against a problem's visible test cases (nothing is stored)
    Run {
        /// Problem definition (JSON)
        #[arg(short, long)]
        problem: PathBuf,

        /// Language name (e.g., python, c++, js)
        #[arg(short, long)]
        language: String,

        /// Source file
        #[arg(short, long)]
        code: PathBuf,
    },

    /// Grade code against a published problem's hidden test cases
    Submit {
        /// User id
        #[arg(short, long)]
        user: String,

        /// Published problem id
        #[arg(long)]
        problem_id: String,

        /// Language name
        #[arg(short, long)]
        language: String,

        /// Source file
        #[arg(short, long)]
        code: PathBuf,
    },

    /// Check every reference solution of a problem against its visible test cases
    Validate {
        /// Problem definition (JSON)
        #[arg(short, long)]
        problem: PathBuf,

        /// Publish the problem when validation passes
        #[arg(long, default_value = "false")]
        publish: bool,
    },

    /// Show a submission record
    Show {
        /// Submission id
        id: Uuid,
    },

    /// List a user's submissions for a problem, newest first
    History {
        #[arg(short, long)]
        user: String,

        #[arg(long)]
        problem_id: String,

        #[arg(long, default_value = "20")]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_line_number(true)
        .init();

    let cli = Cli::parse();
    let config = Config::from_env();
    metrics::init_metrics();

    // Ctrl-C cancels the evaluation in flight; the record is still finalized
    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            warn!("Received interrupt, cancelling evaluation...");
            let _ = cancel_tx.send(true);
        }
    });

    match cli.command {
        Commands::Languages => {
            commands::list_languages(&config)?;
        }
        Commands::Run {
            problem,
            language,
            code,
        } => {
            commands::run_problem(&config, &problem, &language, &code, cancel_rx).await?;
        }
        Commands::Submit {
            user,
            problem_id,
            language,
            code,
        } => {
            commands::submit(&config, &user, &problem_id, &language, &code, cancel_rx).await?;
        }
        Commands::Validate { problem, publish } => {
            commands::validate_problem(&config, &problem, publish, cancel_rx).await?;
        }
        Commands::Show { id } => {
            commands::show_submission(&config, id).await?;
        }
        Commands::History {
            user,
            problem_id,
            limit,
        } => {
            commands::show_history(&config, &user, &problem_id, limit).await?;
        }
    }

    if cli.print_metrics {
        print!("{}", metrics::render_metrics());
    }

    Ok(())
}
