//! Platform pair commands.

use super::render;
use crate::client::EngineClient;
use anyhow::Result;
use clap::Subcommand;
use rangebox_constants::wire;
use serde_json::Value;

#[derive(Debug, Subcommand)]
pub enum PlatformCommand {
    /// Tear down and recreate the platform pair.
    Start,
    /// Stop and remove both platform containers.
    Stop,
    /// Show the status of both platform containers.
    Status,
    /// Show the current configuration.
    Config,
    /// Merge a JSON patch into the configuration and restart the controller.
    SetConfig {
        /// Partial configuration as a JSON object.
        #[arg(long)]
        json: String,
    },
    /// Rebuild the controller from the persisted configuration.
    Restart,
}

pub async fn run(client: &EngineClient, command: PlatformCommand) -> Result<()> {
    let (name, args) = match command {
        PlatformCommand::Start => ("START", Value::Null),
        PlatformCommand::Stop => ("STOP", Value::Null),
        PlatformCommand::Status => ("STATUS", Value::Null),
        PlatformCommand::Config => ("CONFIG", Value::Null),
        PlatformCommand::SetConfig { json } => ("SET_CONFIG", serde_json::from_str(&json)?),
        PlatformCommand::Restart => ("RESTART", Value::Null),
    };

    let reply = client.call(wire::PROG_PLATFORM, name, args).await?;
    render(&reply)
}
