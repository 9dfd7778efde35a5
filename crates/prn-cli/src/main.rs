//! prn CLI
//!
//! Remote process-runner client: starts, inspects, stops, and tails
//! processes on a prn daemon over mTLS.

mod commands;
mod connection;
mod print;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "prn", version, about = "Process Runner CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a new process
    Start {
        /// Command to execute; use -- to separate it from CLI flags
        #[arg(required = true, trailing_var_arg = true)]
        command: Vec<String>,
    },
    /// Get status of a process
    Status {
        process_id: String,
    },
    /// Stop a process
    Stop {
        process_id: String,
    },
    /// Stream logs (stdout/stderr) from the beginning
    Logs {
        process_id: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Start { command } => commands::start(&command).await,
        Commands::Status { process_id } => commands::status(&process_id).await,
        Commands::Stop { process_id } => commands::stop(&process_id).await,
        Commands::Logs { process_id } => commands::logs(&process_id).await,
    }
}
