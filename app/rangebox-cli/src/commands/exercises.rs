//! Exercise pool commands.

use super::render;
use crate::client::EngineClient;
use anyhow::{bail, Result};
use clap::Subcommand;
use rangebox_constants::wire;
use serde_json::{json, Value};

#[derive(Debug, Subcommand)]
pub enum ExercisesCommand {
    /// Start one instance on the first free port.
    Start,
    /// Stop and remove every instance in the pool range.
    Stop,
    /// Stop and remove one instance.
    StopOne {
        /// Slot port of the instance.
        #[arg(long, conflicts_with = "container")]
        port: Option<u16>,
        /// Container name of the instance.
        #[arg(long)]
        container: Option<String>,
    },
    /// Show the status of every pool slot.
    Status,
    /// Show the status of one instance.
    StatusOne {
        /// Slot port of the instance.
        #[arg(long, conflicts_with = "container")]
        port: Option<u16>,
        /// Container name of the instance.
        #[arg(long)]
        container: Option<String>,
    },
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
    /// Show the configured port range.
    Ports,
    /// Run the missions export.
    Export,
}

pub async fn run(client: &EngineClient, command: ExercisesCommand) -> Result<()> {
    let (name, args) = match command {
        ExercisesCommand::Start => ("START", Value::Null),
        ExercisesCommand::Stop => ("STOP", Value::Null),
        ExercisesCommand::StopOne { port, container } => {
            ("STOP_ONE", instance_args(port, container)?)
        }
        ExercisesCommand::Status => ("STATUS", Value::Null),
        ExercisesCommand::StatusOne { port, container } => {
            ("STATUS_ONE", instance_args(port, container)?)
        }
        ExercisesCommand::Config => ("CONFIG", Value::Null),
        ExercisesCommand::SetConfig { json } => ("SET_CONFIG", serde_json::from_str(&json)?),
        ExercisesCommand::Restart => ("RESTART", Value::Null),
        ExercisesCommand::Ports => ("PORTS_RANGE", Value::Null),
        ExercisesCommand::Export => ("GENERATE_MISSIONS", Value::Null),
    };

    let reply = client.call(wire::PROG_EXERCISES, name, args).await?;
    render(&reply)
}

fn instance_args(port: Option<u16>, container: Option<String>) -> Result<Value> {
    match (port, container) {
        (Some(port), _) => Ok(json!({ "port": port })),
        (None, Some(container)) => Ok(json!({ "container": container })),
        (None, None) => bail!("either --port or --container is required"),
    }
}
