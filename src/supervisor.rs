//! Starts and stops one worker thread per enabled camera.

use std::collections::HashSet;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime};

use crate::config::CameraConfig;
use crate::cooldown::CooldownTracker;
use crate::detect::Detector;
use crate::ingest::SourceConnector;
use crate::store::{EventStore, RetentionPolicy};
use crate::worker::{
    CameraWorker, CancelToken, FrameProcessor, WorkerSnapshot, WorkerStatus, WorkerTiming,
};

pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Shared collaborators handed to every worker.
#[derive(Clone)]
pub struct SupervisorDeps {
    pub detector: Arc<dyn Detector>,
    pub connector: Arc<dyn SourceConnector>,
    pub cooldown: Arc<CooldownTracker>,
    pub store: Arc<EventStore>,
    pub timing: WorkerTiming,
    /// Per-worker wait in [`Supervisor::stop`].
    pub stop_timeout: Duration,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StopReport {
    pub stopped: Vec<String>,
    /// Still running at the deadline; left detached. The supervisor will not
    /// start these cameras again until their threads have exited.
    pub abandoned: Vec<String>,
}

struct Tracked {
    name: String,
    done: Receiver<()>,
    handle: JoinHandle<()>,
}

impl Tracked {
    fn spawn<F>(thread_name: String, name: String, body: F) -> std::io::Result<Self>
    where
        F: FnOnce() + Send + 'static,
    {
        let (done_tx, done) = mpsc::channel();
        let handle = thread::Builder::new().name(thread_name).spawn(move || {
            body();
            let _ = done_tx.send(());
        })?;
        Ok(Self { name, done, handle })
    }

    /// Join the thread if it finishes within `timeout`; otherwise hand it back.
    fn wait(self, timeout: Duration) -> Result<(), Self> {
        match self.done.recv_timeout(timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if self.handle.join().is_err() {
                    log::error!("thread for '{}' panicked", self.name);
                }
                Ok(())
            }
            Err(RecvTimeoutError::Timeout) => Err(self),
        }
    }

    fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

struct Running {
    cancel: CancelToken,
    workers: Vec<(Tracked, Arc<WorkerStatus>)>,
    janitor: Option<Tracked>,
}

pub struct Supervisor {
    deps: SupervisorDeps,
    retention: Option<(RetentionPolicy, Duration)>,
    running: Option<Running>,
    /// Workers left behind by `stop`, possibly still inside a blocking read.
    abandoned: Vec<Tracked>,
}

impl Supervisor {
    pub fn new(deps: SupervisorDeps) -> Self {
        Self {
            deps,
            retention: None,
            running: None,
            abandoned: Vec::new(),
        }
    }

    /// Also run retention cleanup and cooldown pruning every `interval`
    /// while the workers run.
    pub fn with_retention(mut self, policy: RetentionPolicy, interval: Duration) -> Self {
        self.retention = Some((policy, interval));
        self
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Spawn one worker per enabled camera. Returns the number started.
    ///
    /// Calling `start` while already running does nothing.
    pub fn start(&mut self, cameras: &[CameraConfig]) -> usize {
        if self.running.is_some() {
            log::warn!("camera supervisor is already running");
            return 0;
        }

        self.abandoned.retain(|tracked| !tracked.is_finished());
        let cancel = CancelToken::new();
        let mut seen = HashSet::new();
        let mut workers = Vec::new();
        for camera in cameras {
            if !camera.enabled {
                log::info!("camera '{}' is disabled; skipping", camera.name);
                continue;
            }
            if !seen.insert(camera.name.clone()) {
                log::warn!("duplicate camera '{}'; only the first is started", camera.name);
                continue;
            }
            if self.abandoned.iter().any(|t| t.name == camera.name) {
                log::warn!(
                    "previous worker for '{}' has not exited yet; not starting it",
                    camera.name
                );
                continue;
            }
            match self.spawn_worker(camera.clone(), cancel.clone()) {
                Ok(worker) => workers.push(worker),
                Err(err) => log::error!("failed to start worker for '{}': {}", camera.name, err),
            }
        }

        let janitor = self.retention.and_then(|(policy, interval)| {
            let store = Arc::clone(&self.deps.store);
            let cooldown = Arc::clone(&self.deps.cooldown);
            let cancel = cancel.clone();
            Tracked::spawn("retention".to_string(), "retention".to_string(), move || {
                run_janitor(&store, &cooldown, &policy, interval, &cancel)
            })
            .map_err(|err| log::error!("failed to start retention thread: {}", err))
            .ok()
        });

        let started = workers.len();
        log::info!("started processing {} cameras", started);
        self.running = Some(Running {
            cancel,
            workers,
            janitor,
        });
        started
    }

    /// Cancel every worker and wait up to the stop timeout for each.
    pub fn stop(&mut self) -> StopReport {
        let Some(running) = self.running.take() else {
            log::warn!("camera supervisor is not running");
            return StopReport::default();
        };
        log::info!("stopping camera supervisor...");
        running.cancel.cancel();

        let timeout = self.deps.stop_timeout;
        let mut report = StopReport::default();
        for (tracked, _) in running.workers {
            let name = tracked.name.clone();
            match tracked.wait(timeout) {
                Ok(()) => report.stopped.push(name),
                Err(tracked) => {
                    log::warn!(
                        "worker for '{}' did not stop within {:?}; abandoning it",
                        name,
                        timeout
                    );
                    report.abandoned.push(name);
                    self.abandoned.push(tracked);
                }
            }
        }
        if let Some(janitor) = running.janitor {
            if janitor.wait(timeout).is_err() {
                log::warn!("retention thread did not stop within {:?}", timeout);
            }
        }
        log::info!(
            "camera supervisor stopped ({} stopped, {} abandoned)",
            report.stopped.len(),
            report.abandoned.len()
        );
        report
    }

    /// Current counters for every started worker.
    pub fn statuses(&self) -> Vec<WorkerSnapshot> {
        self.running
            .as_ref()
            .map(|r| r.workers.iter().map(|(_, s)| s.snapshot()).collect())
            .unwrap_or_default()
    }

    fn spawn_worker(
        &self,
        camera: CameraConfig,
        cancel: CancelToken,
    ) -> std::io::Result<(Tracked, Arc<WorkerStatus>)> {
        let name = camera.name.clone();
        let processor = FrameProcessor::new(
            camera,
            Arc::clone(&self.deps.detector),
            Arc::clone(&self.deps.cooldown),
            Arc::clone(&self.deps.store),
        );
        let worker = CameraWorker::new(processor, Arc::clone(&self.deps.connector), self.deps.timing);
        let status = worker.status();
        let tracked = Tracked::spawn(format!("camera-{}", name), name, move || {
            if let Err(err) = worker.run(&cancel) {
                log::error!("worker exited: {}", err);
            }
        })?;
        Ok((tracked, status))
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        if self.running.is_some() {
            self.stop();
        }
    }
}

fn run_janitor(
    store: &EventStore,
    cooldown: &CooldownTracker,
    policy: &RetentionPolicy,
    interval: Duration,
    cancel: &CancelToken,
) {
    loop {
        if let Err(err) = store.cleanup(policy) {
            log::error!("{}", err);
        }
        let pruned = cooldown.prune(SystemTime::now());
        if pruned > 0 {
            log::debug!("pruned {} expired cooldown entries", pruned);
        }
        if cancel.sleep(interval) {
            break;
        }
    }
}
