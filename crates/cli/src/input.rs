//! Newline-delimited JSON observation input.

use std::io::BufRead;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::warn;

use tgarchive_core::Observation;

/// A line that could not be parsed as an observation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RejectedLine {
    pub line: usize,
    pub error: String,
}

#[derive(Debug, Default)]
pub struct ParsedInput {
    pub observations: Vec<Observation>,
    pub rejected: Vec<RejectedLine>,
}

/// Parse one observation per non-blank line.
///
/// Unparseable lines are logged and reported without stopping the run; only
/// a failure to read the input is fatal.
pub fn read_observations(reader: impl BufRead) -> Result<ParsedInput> {
    let mut parsed = ParsedInput::default();
    for (index, line) in reader.lines().enumerate() {
        let number = index + 1;
        let line = line.with_context(|| format!("failed to read line {number}"))?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str(&line) {
            Ok(observation) => parsed.observations.push(observation),
            Err(e) => {
                warn!(line = number, error = %e, "skipping malformed observation");
                parsed.rejected.push(RejectedLine {
                    line: number,
                    error: e.to_string(),
                });
            }
        }
    }
    Ok(parsed)
}
