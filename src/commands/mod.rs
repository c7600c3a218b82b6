pub mod discover;
pub mod job;
pub mod policy;
pub mod retrieve;
pub mod run;
pub mod scan;

pub use discover::DiscoverCommand;
pub use job::JobCommand;
pub use policy::PolicyCommand;
pub use retrieve::RetrieveCommand;
pub use run::RunCommand;
pub use scan::ScanCommand;

use anyhow::{Context, Result};
use std::io::BufRead;

/// Message bodies from the command line, or one per stdin line when none are
/// given so stages can be piped together. Only lines holding a JSON object
/// are kept.
pub fn collect_messages(messages: Vec<String>) -> Result<Vec<String>> {
    if !messages.is_empty() {
        return Ok(messages);
    }

    let stdin = std::io::stdin();
    read_message_lines(stdin.lock())
}

fn read_message_lines(reader: impl BufRead) -> Result<Vec<String>> {
    let mut bodies = Vec::new();
    for line in reader.lines() {
        let line = line.context("Failed to read messages from stdin")?;
        let line = line.trim();
        if line.starts_with('{') {
            bodies.push(line.to_string());
        }
    }
    Ok(bodies)
}
