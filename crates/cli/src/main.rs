//! threadsage CLI — the main entry point.
//!
//! Commands:
//! - `onboard`        — Write a default config
//! - `ask`            — Ask a question (or follow up) from the terminal
//! - `serve`          — Admin gateway plus the maintenance scheduler
//! - `sweep`          — Delete expired threads now
//! - `reset-monthly`  — Zero monthly points now
//! - `reset-tokens`   — Clear daily token counters now
//! - `stats`          — Points and rank for a user
//! - `ranking`        — Monthly leaderboard
//! - `clear`          — Delete a thread (owner or admin)
//! - `check`          — Store row counts and size

use clap::{Parser, Subcommand};
use threadsage_workflow::MaintenanceJob;

mod commands;

#[derive(Parser)]
#[command(
    name = "threadsage",
    about = "threadsage — threaded AI answers for group chats",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default config file
    Onboard,

    /// Ask a question, or follow up in an existing thread
    Ask {
        /// The question text
        text: String,

        /// Follow up in this thread instead of opening a new one
        #[arg(short, long)]
        thread: Option<String>,

        /// Reset the thread given by --thread and start over
        #[arg(long, requires = "thread")]
        renew: bool,

        /// Answer language code (e.g. en, vi, ja)
        #[arg(short, long)]
        language: Option<String>,

        /// Seconds to wait for the style choice
        #[arg(long)]
        wait: Option<u64>,

        /// Acting user id
        #[arg(long, env = "THREADSAGE_USER", default_value = "local")]
        user: String,
    },

    /// Start the admin gateway and the maintenance scheduler
    Serve {
        /// Override the port
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Delete expired threads and their messages
    Sweep,

    /// Zero every user's monthly points
    ResetMonthly,

    /// Clear all daily token counters
    ResetTokens,

    /// Show points and rank for a user
    Stats {
        user_id: String,
    },

    /// Show the monthly leaderboard
    Ranking {
        #[arg(short, long, default_value_t = 10)]
        limit: usize,
    },

    /// Delete a thread and its messages
    Clear {
        thread_id: String,

        /// Who is asking; must own the thread or be the admin
        #[arg(long, env = "THREADSAGE_USER", default_value = "local")]
        requestor: String,
    },

    /// Show store row counts and size
    Check,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    match cli.command {
        Commands::Onboard => commands::onboard::run().await?,
        Commands::Ask {
            text,
            thread,
            renew,
            language,
            wait,
            user,
        } => {
            commands::ask::run(commands::ask::AskArgs {
                text,
                thread,
                renew,
                language,
                wait,
                user,
            })
            .await?
        }
        Commands::Serve { port } => commands::serve::run(port).await?,
        Commands::Sweep => commands::maintenance::run(MaintenanceJob::SweepExpired).await?,
        Commands::ResetMonthly => commands::maintenance::run(MaintenanceJob::ResetMonthly).await?,
        Commands::ResetTokens => {
            commands::maintenance::run(MaintenanceJob::ResetDailyTokens).await?
        }
        Commands::Stats { user_id } => commands::stats::run(&user_id).await?,
        Commands::Ranking { limit } => commands::stats::ranking(limit).await?,
        Commands::Clear {
            thread_id,
            requestor,
        } => commands::clear::run(&thread_id, &requestor).await?,
        Commands::Check => commands::check::run().await?,
    }

    Ok(())
}
