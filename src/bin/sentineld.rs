//! sentineld - multi-camera detection daemon
//!
//! 1. Loads the system configuration (file + environment)
//! 2. Builds the configured detector backend
//! 3. Opens the event store and starts the notification thread
//! 4. Starts one worker per enabled camera plus the retention janitor
//! 5. Runs until Ctrl-C, then stops workers with a bounded wait

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::mpsc;
use std::sync::Arc;

use cctv_sentinel::config::SentinelConfig;
use cctv_sentinel::notify::build_notifiers;
use cctv_sentinel::{
    CooldownTracker, DetectorRegistry, EventStore, NotificationDispatcher, RetentionPolicy,
    RtspConnector, Supervisor, SupervisorDeps, WorkerTiming,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Multi-camera detection daemon")]
struct Args {
    /// Configuration file (JSON, or TOML with a .toml extension).
    #[arg(long, env = "SENTINEL_CONFIG")]
    config: Option<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let cfg = SentinelConfig::load(args.config.as_deref())?;
    let cameras = cfg.enabled_cameras();
    if cameras.is_empty() {
        log::warn!("no enabled cameras configured");
    }

    let registry = DetectorRegistry::from_settings(&cfg.detector)?;
    let detector = registry.ready_backend()?;
    log::info!("detector backend: {}", detector.name());

    let notifiers = build_notifiers(&cfg.notifications);
    let dispatcher = Arc::new(NotificationDispatcher::spawn(notifiers));
    log::info!(
        "notifiers enabled: [{}]",
        dispatcher.notifier_names().join(", ")
    );

    let store = EventStore::open(&cfg.storage.events_dir, cfg.storage.jpeg_quality)?
        .with_dispatcher(Arc::clone(&dispatcher));
    log::info!("writing events to {}", store.dir().display());

    let deps = SupervisorDeps {
        detector,
        connector: Arc::new(RtspConnector::new(&cfg.pipeline)),
        cooldown: Arc::new(CooldownTracker::new(cfg.pipeline.cooldown)),
        store: Arc::new(store),
        timing: WorkerTiming::from_settings(&cfg.pipeline),
        stop_timeout: cfg.pipeline.stop_timeout,
    };
    let mut supervisor = Supervisor::new(deps).with_retention(
        RetentionPolicy::from_settings(&cfg.storage),
        cfg.storage.cleanup_interval,
    );

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .expect("error setting Ctrl-C handler");

    let started = supervisor.start(&cameras);
    log::info!(
        "sentineld running with {} of {} cameras (Ctrl-C to stop)",
        started,
        cfg.cameras.len()
    );

    let _ = rx.recv();
    log::info!("shutdown signal received, stopping cameras...");
    for snapshot in supervisor.statuses() {
        log::info!(
            "camera '{}': {} frames read, {} events, {} reconnects",
            snapshot.camera,
            snapshot.frames_read,
            snapshot.events_emitted,
            snapshot.reconnects
        );
    }
    let report = supervisor.stop();
    if !report.abandoned.is_empty() {
        log::warn!("abandoned workers: {}", report.abandoned.join(", "));
    }

    if !dispatcher.shutdown(cfg.pipeline.stop_timeout) {
        log::warn!("pending notifications were not delivered before shutdown");
    }
    let stats = dispatcher.stats();
    log::info!(
        "notifications delivered: {}, failed: {}",
        stats.delivered,
        stats.failed
    );
    Ok(())
}
