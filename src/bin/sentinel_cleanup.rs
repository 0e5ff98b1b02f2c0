//! sentinel_cleanup - one retention pass over the events directory.
//!
//! Uses the storage section of the system configuration unless an events
//! directory is given explicitly; individual limits can be overridden.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;

use cctv_sentinel::config::SentinelConfig;
use cctv_sentinel::{EventStore, RetentionPolicy};

#[derive(Parser, Debug)]
#[command(author, version, about = "Delete expired or excess detection events")]
struct Args {
    /// Configuration file to take the storage settings from.
    #[arg(long, env = "SENTINEL_CONFIG", conflicts_with = "events_dir")]
    config: Option<PathBuf>,

    /// Events directory (skips loading the configuration).
    #[arg(long)]
    events_dir: Option<PathBuf>,

    /// Delete events older than this many days.
    #[arg(long)]
    max_age_days: Option<u32>,

    /// Keep at most this many events.
    #[arg(long)]
    max_files: Option<usize>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let (events_dir, mut policy, quality) = match args.events_dir {
        Some(dir) => (dir, RetentionPolicy::default(), 85),
        None => {
            let cfg = SentinelConfig::load(args.config.as_deref())?;
            (
                cfg.storage.events_dir.clone(),
                RetentionPolicy::from_settings(&cfg.storage),
                cfg.storage.jpeg_quality,
            )
        }
    };
    if let Some(days) = args.max_age_days {
        policy = RetentionPolicy::new(days, policy.max_files);
    }
    if let Some(files) = args.max_files {
        policy.max_files = files;
    }

    let store = EventStore::open(&events_dir, quality)?;
    let report = store.cleanup(&policy)?;
    println!(
        "{}: scanned {}, deleted {}, failed {}, remaining {}",
        store.dir().display(),
        report.scanned,
        report.deleted,
        report.failed,
        report.remaining()
    );
    Ok(())
}
