//! `tgarchive`: record polling runs into a snapshot archive and query it.

use std::fs::File;
use std::io::{self, BufReader, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;

use tgarchive_core::{PeerKind, StreamKey, Timestamp, normalize};
use tgarchive_infra::{ArchiveConfig, RunReport, SnapshotStore, TimeRange};
use tgarchive_observability::LogFormat;

use crate::input::RejectedLine;

mod input;

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// JSON config file; environment variables override its values.
    #[clap(long, global = true)]
    config: Option<PathBuf>,

    /// Log output format (json or pretty).
    #[clap(long, global = true, default_value = "json")]
    log_format: LogFormat,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Record newline-delimited JSON observations from a file or `-` (stdin).
    Ingest {
        input: String,

        /// Raw user id of the exporting account; the archive refuses other owners.
        #[clap(long)]
        owner: Option<i64>,
    },
    /// Print the newest snapshot of a peer.
    Latest { kind: PeerKind, id: i64 },
    /// Print a peer's snapshots, oldest first.
    History {
        kind: PeerKind,
        id: i64,
        #[clap(flatten)]
        range: RangeArgs,
    },
    /// Print a message's snapshots, oldest first.
    MessageHistory {
        context_kind: PeerKind,
        context_id: i64,
        message_id: i64,
        #[clap(flatten)]
        range: RangeArgs,
    },
}

#[derive(clap::Args, Debug)]
struct RangeArgs {
    /// Earliest observation time (unix seconds, inclusive).
    #[clap(long)]
    from: Option<i64>,

    /// Latest observation time (unix seconds, inclusive).
    #[clap(long)]
    to: Option<i64>,
}

impl RangeArgs {
    fn to_range(&self) -> TimeRange {
        TimeRange::new(
            self.from.map_or(Timestamp::MIN, Timestamp::from_secs),
            self.to.map_or(Timestamp::MAX, Timestamp::from_secs),
        )
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    tgarchive_observability::init(args.log_format);

    let config =
        ArchiveConfig::load(args.config.as_deref()).context("failed to load configuration")?;
    tracing::debug!(?config, "configuration loaded");

    match args.command {
        Command::Ingest { input, owner } => ingest(&config, &input, owner).await,
        Command::Latest { kind, id } => {
            let recorder = config.recorder().await.context("failed to open archive")?;
            let key = StreamKey::peer(kind, id)?;
            print_json(&recorder.latest(&key).await?)
        }
        Command::History { kind, id, range } => {
            let key = StreamKey::peer(kind, id)?;
            history(&config, key, range.to_range()).await
        }
        Command::MessageHistory {
            context_kind,
            context_id,
            message_id,
            range,
        } => {
            let key = StreamKey::message(context_kind, context_id, message_id)?;
            history(&config, key, range.to_range()).await
        }
    }
}

/// Batch outcome plus the input lines that never reached the recorder.
#[derive(Debug, Serialize)]
struct IngestReport {
    #[serde(flatten)]
    run: RunReport,
    rejected_lines: Vec<RejectedLine>,
}

async fn ingest(config: &ArchiveConfig, source: &str, owner: Option<i64>) -> Result<()> {
    let parsed = if source == "-" {
        input::read_observations(io::stdin().lock())?
    } else {
        let file = File::open(source).with_context(|| format!("failed to open {source}"))?;
        input::read_observations(BufReader::new(file))?
    };

    let recorder = Arc::new(config.recorder().await.context("failed to open archive")?);
    if let Some(raw) = owner {
        let identity = normalize(PeerKind::User, raw)?;
        recorder
            .store()
            .claim_owner(identity)
            .await
            .context("archive owner check failed")?;
    }

    let run = recorder.record_batch(parsed.observations).await;
    print_json(&IngestReport {
        run,
        rejected_lines: parsed.rejected,
    })
}

async fn history(config: &ArchiveConfig, key: StreamKey, range: TimeRange) -> Result<()> {
    let store = config.open_store().await.context("failed to open archive")?;
    print_json(&store.history(&key, range).await?)
}

fn print_json(value: &impl Serialize) -> Result<()> {
    let mut stdout = io::stdout().lock();
    serde_json::to_writer_pretty(&mut stdout, value).context("failed to write output")?;
    writeln!(stdout).context("failed to write output")?;
    Ok(())
}
