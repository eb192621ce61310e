mod client;
mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use client::EngineClient;
use commands::{exercises::ExercisesCommand, platform::PlatformCommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "rangebox")]
#[command(author, version, about = "Control the Rangebox fleet daemon", long_about = None)]
struct Cli {
    /// Engine socket path (default: $RANGEBOX_SOCKET or the runtime dir).
    #[arg(long, global = true)]
    socket: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Manage the pooled exercise fleet.
    #[command(subcommand)]
    Exercises(ExercisesCommand),
    /// Manage the fixed platform pair.
    #[command(subcommand)]
    Platform(PlatformCommand),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let client = EngineClient::new(client::resolve_socket(cli.socket));

    match cli.command {
        Command::Exercises(command) => commands::exercises::run(&client, command).await,
        Command::Platform(command) => commands::platform::run(&client, command).await,
    }
}
