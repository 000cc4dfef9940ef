//! mimir-journal - journal replay and inspection
//!
//! Lists streams and dumps entries from a simulator journal directory,
//! with sequence/time range filters and optional hex payloads.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use mimir_bins::common;
use mimir_core::core::Direction;
use mimir_core::journal::Journal;
use mimir_core::time::format_fix_timestamp;

#[derive(Parser, Debug)]
#[command(author, version, about = "Journal viewer for the exchange simulator")]
struct Args {
    /// Journal directory
    #[arg(short, long, default_value = "journal")]
    journal_dir: PathBuf,

    /// Log level when RUST_LOG is unset
    #[arg(short, long, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List streams with entry counts and latest activity
    List,
    /// Dump a stream's entries in write order
    Dump {
        stream: String,

        /// Only one direction: "in" or "out"
        #[arg(short, long)]
        direction: Option<String>,

        #[arg(long, default_value_t = 0)]
        from_seq: u32,

        #[arg(long, default_value_t = u32::MAX)]
        to_seq: u32,

        /// Epoch-millisecond time window instead of sequence range
        #[arg(long)]
        from_ts: Option<u64>,

        #[arg(long)]
        to_ts: Option<u64>,

        /// Show full payload hex instead of the printable preview
        #[arg(long)]
        hex: bool,

        /// Stop after this many entries
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();
    common::init_logging(&args.log_level, false)?;

    let journal = Journal::open(&args.journal_dir)?;

    match args.command {
        Command::List => {
            let names = journal.stream_names();
            if names.is_empty() {
                println!("no streams in {}", args.journal_dir.display());
                return Ok(());
            }
            println!("{:<40} {:>8}  latest", "stream", "entries");
            for name in names {
                let count = journal.entry_count(Some(&name));
                let latest = [Direction::Inbound, Direction::Outbound]
                    .iter()
                    .filter_map(|d| journal.latest(&name, *d))
                    .map(|e| e.timestamp_ms)
                    .max();
                let latest = latest
                    .map(format_fix_timestamp)
                    .unwrap_or_else(|| "-".to_string());
                println!("{name:<40} {count:>8}  {latest}");
            }
        }
        Command::Dump {
            stream,
            direction,
            from_seq,
            to_seq,
            from_ts,
            to_ts,
            hex,
            limit,
        } => {
            let direction = match direction.as_deref() {
                None => None,
                Some("in") => Some(Direction::Inbound),
                Some("out") => Some(Direction::Outbound),
                Some(other) => anyhow::bail!("direction must be 'in' or 'out', got {other}"),
            };

            let mut shown = 0usize;
            let mut print_entry = |view: mimir_core::journal::EntryView<'_>| -> bool {
                println!(
                    "{} {:>3} seq={:<8} {:>5}B  {}",
                    format_fix_timestamp(view.timestamp_ms),
                    view.direction,
                    view.seq_num,
                    view.raw.len(),
                    render(view.raw, hex),
                );
                shown += 1;
                limit.map_or(true, |n| shown < n)
            };

            let delivered = match (from_ts, to_ts) {
                (None, None) => {
                    journal.replay(&stream, direction, from_seq, to_seq, &mut print_entry)?
                }
                (from, to) => journal.replay_by_time(
                    &stream,
                    direction,
                    from.unwrap_or(0),
                    to.unwrap_or(u64::MAX),
                    &mut print_entry,
                )?,
            };
            eprintln!("{delivered} entries");
        }
    }
    Ok(())
}

/// One-line payload preview: printable ASCII with SOH rendered as '|'
/// (FIX reads naturally), everything else hex-escaped; or full hex.
fn render(raw: &[u8], hex: bool) -> String {
    if hex {
        return raw.iter().map(|b| format!("{b:02x}")).collect();
    }
    let mut out = String::with_capacity(raw.len());
    for &b in raw.iter().take(120) {
        match b {
            0x01 => out.push('|'),
            0x20..=0x7e => out.push(b as char),
            _ => out.push_str(&format!("\\x{b:02x}")),
        }
    }
    if raw.len() > 120 {
        out.push_str("...");
    }
    out
}
