// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! DLS node — local storage tools.
//!
//! Usage:
//!   dls put    --config dls.toml --channel events "payload"
//!   dls get    --config dls.toml --channel events --from "2016-05-02T14:00:00" --to "2016-05-02T15:00:00"
//!   dls status --config dls.toml
//!   dls remove --config dls.toml --channel events
//!
//! The network listeners live in the connection layer; these subcommands
//! operate on the data directory directly.

use std::path::PathBuf;

use anyhow::Context;
use chrono::NaiveDateTime;
use clap::{Parser, Subcommand};
use tokio_stream::StreamExt;
use tracing::error;
use tracing_subscriber::EnvFilter;

use dls::config::Config;
use dls::node::DlsNode;

const TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

#[derive(Parser)]
#[command(name = "dls", about = "DLS storage node", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Append one record to a channel.
    Put {
        #[arg(short, long, default_value = "dls.toml")]
        config: PathBuf,
        /// Channel name.
        #[arg(long)]
        channel: String,
        /// Record key as hex (0x...) or decimal. Defaults to the current
        /// time in the top 32 bits.
        #[arg(long)]
        key: Option<String>,
        /// Value bytes.
        value: String,
    },
    /// Stream records of a channel, optionally time-bounded and filtered.
    Get {
        #[arg(short, long, default_value = "dls.toml")]
        config: PathBuf,
        #[arg(long)]
        channel: String,
        /// Range start (local), e.g. "2016-05-02T14:00:00"
        #[arg(long)]
        from: Option<String>,
        /// Range end (local), inclusive.
        #[arg(long)]
        to: Option<String>,
        /// Regular expression applied to record values.
        #[arg(long)]
        filter: Option<String>,
        /// Write raw values to this file instead of printing records.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Print channel sizes and exit.
    Status {
        #[arg(short, long, default_value = "dls.toml")]
        config: PathBuf,
    },
    /// Delete a channel and its data.
    Remove {
        #[arg(short, long, default_value = "dls.toml")]
        config: PathBuf,
        #[arg(long)]
        channel: String,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Command::Put { config, channel, key, value } => run_put(config, &channel, key, &value),
        Command::Get { config, channel, from, to, filter, output } => {
            run_get(config, &channel, from, to, filter, output).await
        }
        Command::Status { config } => run_status(config),
        Command::Remove { config, channel } => run_remove(config, &channel),
    };

    if let Err(e) = result {
        error!(error = %e, "Command failed");
        std::process::exit(1);
    }
}

fn open_node(config_path: &PathBuf) -> anyhow::Result<DlsNode> {
    let cfg = Config::from_file(config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;
    DlsNode::open(&cfg).context("opening storage node")
}

fn run_put(
    config: PathBuf,
    channel: &str,
    key: Option<String>,
    value: &str,
) -> anyhow::Result<()> {
    let node = open_node(&config)?;
    let key = match key {
        Some(k) => parse_key(&k)?,
        None => (chrono::Utc::now().timestamp() as u64) << 32,
    };
    node.put(channel, key, value.as_bytes())?;
    node.shutdown();
    println!("Stored key {key:#018x} in channel '{channel}'");
    Ok(())
}

async fn run_get(
    config: PathBuf,
    channel: &str,
    from: Option<String>,
    to: Option<String>,
    filter: Option<String>,
    output: Option<PathBuf>,
) -> anyhow::Result<()> {
    let node = open_node(&config)?;
    let t_lo = from.map(|s| parse_time(&s)).transpose()?.unwrap_or(0);
    let t_hi = to.map(|s| parse_time(&s)).transpose()?.unwrap_or(u32::MAX as u64);

    let iter = match &filter {
        Some(pattern) => node.get_range_filter(channel, t_lo, t_hi, pattern)?,
        None => node.get_range(channel, t_lo, t_hi)?,
    };
    let Some(iter) = iter else {
        println!("No such channel '{channel}'");
        return Ok(());
    };

    let mut out = match &output {
        Some(path) => Some(
            std::fs::File::create(path)
                .with_context(|| format!("creating {}", path.display()))?,
        ),
        None => None,
    };

    let stream = iter.into_stream();
    tokio::pin!(stream);
    let mut count = 0u64;
    while let Some(record) = stream.next().await {
        let record = record?;
        match &mut out {
            Some(file) => {
                use std::io::Write;
                file.write_all(&record.value)?;
            }
            None => {
                println!(
                    "{:016x}\t{}",
                    record.key,
                    String::from_utf8_lossy(&record.value)
                );
            }
        }
        count += 1;
    }
    if let Some(path) = &output {
        println!("Wrote {count} records to {}", path.display());
    }
    Ok(())
}

fn run_status(config: PathBuf) -> anyhow::Result<()> {
    let node = open_node(&config)?;
    let names = node.channel_names()?;
    println!("=== DLS node {} ===", DlsNode::get_version());
    if names.is_empty() {
        println!("No channels");
        return Ok(());
    }
    println!("{:<32} {:>12} {:>16}", "Channel", "Records", "Bytes");
    for name in &names {
        let (records, bytes) = node.get_channel_size(name)?;
        println!("{name:<32} {records:>12} {bytes:>16}");
    }
    Ok(())
}

fn run_remove(config: PathBuf, channel: &str) -> anyhow::Result<()> {
    let node = open_node(&config)?;
    if node.remove_channel(channel)? {
        println!("Removed channel '{channel}'");
    } else {
        println!("No such channel '{channel}'");
    }
    Ok(())
}

fn parse_key(text: &str) -> anyhow::Result<u64> {
    let key = if let Some(hex) = text.strip_prefix("0x") {
        u64::from_str_radix(hex, 16)
    } else {
        text.parse()
    };
    key.with_context(|| format!("invalid key '{text}'"))
}

fn parse_time(text: &str) -> anyhow::Result<u64> {
    let naive = NaiveDateTime::parse_from_str(text, TIME_FORMAT)
        .with_context(|| format!("invalid timestamp '{text}', expected {TIME_FORMAT}"))?;
    Ok(naive.and_utc().timestamp().max(0) as u64)
}
