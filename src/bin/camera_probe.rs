//! camera_probe - check that a camera URL can be opened and streamed.
//!
//! Connects, reports the frame size, then reads frames for `--duration`
//! seconds printing the running FPS every 10 frames. With `--output-dir`
//! a JPEG snapshot is written every 30 frames.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use cctv_sentinel::config::redact_url;
use cctv_sentinel::frame::Frame;
use cctv_sentinel::ingest::RtspConfig;
use cctv_sentinel::store::annotate::encode_jpeg;
use cctv_sentinel::{FrameSource, RtspSource};

const FPS_REPORT_EVERY: u64 = 10;
const SNAPSHOT_EVERY: u64 = 30;

#[derive(Parser, Debug)]
#[command(author, version, about = "Test connectivity to a camera stream")]
struct Args {
    /// Stream URL (rtsp://..., or stub://name for a synthetic camera).
    #[arg(long)]
    url: String,

    /// Write a snapshot every 30 frames into this directory.
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// How long to read frames, in seconds.
    #[arg(long, default_value_t = 10)]
    duration: u64,

    /// Seconds to wait for one frame before giving up.
    #[arg(long, default_value_t = 10)]
    read_timeout: u64,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let shown_url = redact_url(&args.url);

    if let Some(dir) = &args.output_dir {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create {}", dir.display()))?;
    }

    let mut source = RtspSource::new(RtspConfig {
        url: args.url.clone(),
        read_timeout: Duration::from_secs(args.read_timeout),
        ..RtspConfig::default()
    })?;
    println!("connecting to {}", shown_url);
    source
        .connect()
        .with_context(|| format!("failed to connect to {}", shown_url))?;

    let first = source.next_frame().context("connected but no frame arrived")?;
    println!("connected: {}x{}", first.width, first.height);

    let started = Instant::now();
    let deadline = Duration::from_secs(args.duration);
    let mut frames = 1u64;
    let mut snapshots = 0u64;
    save_snapshot(args.output_dir.as_deref(), &first, &mut snapshots)?;

    let result = loop {
        if started.elapsed() >= deadline {
            break Ok(());
        }
        let frame = match source.next_frame() {
            Ok(frame) => frame,
            Err(err) => break Err(err.context("stream stopped")),
        };
        frames += 1;
        if frames % FPS_REPORT_EVERY == 0 {
            let fps = frames as f64 / started.elapsed().as_secs_f64().max(f64::EPSILON);
            println!("frames: {}, fps: {:.1}", frames, fps);
        }
        if frames % SNAPSHOT_EVERY == 0 {
            save_snapshot(args.output_dir.as_deref(), &frame, &mut snapshots)?;
        }
    };
    source.disconnect();

    let elapsed = started.elapsed().as_secs_f64();
    println!(
        "read {} frames in {:.1}s ({:.1} fps), {} snapshots",
        frames,
        elapsed,
        frames as f64 / elapsed.max(f64::EPSILON),
        snapshots
    );
    result
}

fn save_snapshot(dir: Option<&Path>, frame: &Frame, count: &mut u64) -> Result<()> {
    let Some(dir) = dir else {
        return Ok(());
    };
    let path = dir.join(format!("snapshot_{:06}.jpg", frame.sequence));
    let jpeg = encode_jpeg(&frame.to_rgb_image()?, 90)?;
    std::fs::write(&path, jpeg).with_context(|| format!("write {}", path.display()))?;
    *count += 1;
    log::info!("saved snapshot {}", path.display());
    Ok(())
}
