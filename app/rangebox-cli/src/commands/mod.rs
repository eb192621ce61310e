//! CLI subcommands, one module per engine program.

pub mod exercises;
pub mod platform;

use crate::client::Reply;
use anyhow::Result;

/// Prints a reply and converts engine errors into a process failure.
pub fn render(reply: &Reply) -> Result<()> {
    println!("{}", reply.message);
    if let Some(object) = reply.data.as_object() {
        if !object.is_empty() {
            println!("{}", serde_json::to_string_pretty(&reply.data)?);
        }
    }
    if reply.is_ok() {
        Ok(())
    } else {
        std::process::exit(1);
    }
}
