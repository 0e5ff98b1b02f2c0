//! list_events - show persisted detection events, newest first.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;

use cctv_sentinel::config::SentinelConfig;
use cctv_sentinel::{DetectionType, EventQuery, EventStore};

#[derive(Parser, Debug)]
#[command(author, version, about = "List recent detection events")]
struct Args {
    /// Configuration file to take the events directory from.
    #[arg(long, env = "SENTINEL_CONFIG", conflicts_with = "events_dir")]
    config: Option<PathBuf>,

    /// Events directory (skips loading the configuration).
    #[arg(long)]
    events_dir: Option<PathBuf>,

    /// Only events from this camera.
    #[arg(long)]
    camera: Option<String>,

    /// Only events of this type (person, vehicle, animal).
    #[arg(long = "type")]
    detection_type: Option<DetectionType>,

    #[arg(long, default_value_t = 10)]
    limit: usize,

    #[arg(long, default_value_t = 0)]
    offset: usize,

    /// Print the records as a JSON array.
    #[arg(long)]
    json: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();

    let (events_dir, quality) = match args.events_dir {
        Some(dir) => (dir, 85),
        None => {
            let cfg = SentinelConfig::load(args.config.as_deref())?;
            (cfg.storage.events_dir, cfg.storage.jpeg_quality)
        }
    };
    let store = EventStore::open(&events_dir, quality)?;
    let records = store.recent(&EventQuery {
        camera: args.camera,
        detection_type: args.detection_type,
        limit: args.limit,
        offset: args.offset,
    })?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }
    if records.is_empty() {
        println!("no events in {}", store.dir().display());
        return Ok(());
    }
    for record in &records {
        let classes: Vec<String> = record
            .objects
            .iter()
            .map(|o| format!("{} {:.2}", o.class, o.confidence))
            .collect();
        println!(
            "{}  {:<16} {:<8} {}  [{}]",
            record.timestamp,
            record.camera,
            record.detection_type,
            record.image_path,
            classes.join(", ")
        );
    }
    Ok(())
}
