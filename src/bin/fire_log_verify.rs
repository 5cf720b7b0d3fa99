//! fire_log_verify - External verifier for the fire audit log
//!
//! Every fire decision the detector makes, fired or rejected, is appended to
//! a SHA-256 hash-chained JSON-lines log. This tool re-walks the chain and
//! fails on any edited, reordered or dropped entry, without trusting the
//! daemon that wrote it.

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use skywatch::targeting::verify_chain;

#[derive(Parser, Debug)]
#[command(
    name = "fire_log_verify",
    about = "Verify fire audit log integrity (hash chain)"
)]
struct Args {
    /// Path to the fire log (JSON lines)
    #[arg(value_name = "PATH")]
    path: PathBuf,

    /// Also print one line per recorded fire decision
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();
    println!("fire_log_verify: checking {}", args.path.display());

    let summary = verify_chain(&args.path)?;
    let outcomes = tally_outcomes(&args.path, args.verbose)?;

    println!("  entries: {}", summary.entries);
    for (outcome, count) in &outcomes {
        println!("  {outcome}: {count}");
    }
    println!("  head: {}", hex::encode(summary.head));
    println!("OK: hash chain verified");
    Ok(())
}

/// Count decisions by result. Only called on a log that already verified.
fn tally_outcomes(path: &Path, verbose: bool) -> Result<BTreeMap<String, u64>> {
    let file = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let mut counts = BTreeMap::new();
    for line in BufReader::new(file).lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let record: Value = serde_json::from_str(&line)?;
        let event = &record["event"];
        let result = event["outcome"]["result"]
            .as_str()
            .unwrap_or("unknown")
            .to_string();
        if verbose {
            let detail = event["outcome"]["reason"]
                .as_str()
                .or_else(|| event["outcome"]["error"].as_str())
                .unwrap_or("");
            println!(
                "  #{} ts={} track={} {result} {detail}",
                record["seq"], event["timestamp_ms"], event["track_id"]
            );
        }
        *counts.entry(result).or_insert(0) += 1;
    }
    Ok(counts)
}
