//! Per-camera worker.
//!
//! A `CameraWorker` owns one camera's stream and runs a small state machine:
//!
//! ```text
//! Disconnected -> Connecting -> Streaming -> Reconnecting -> Connecting -> ...
//!                                                      any -> Stopped
//! ```
//!
//! Connect failures retry after `connect_retry_delay`; read failures release
//! the stream and reconnect after `reconnect_delay`, indefinitely. Only
//! cancellation reaches `Stopped`. Every wait is a [`CancelToken::sleep`], so
//! shutdown latency is bounded by the idle tick plus one blocking read.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime};

use crate::config::{CameraConfig, PipelineSettings};
use crate::cooldown::CooldownTracker;
use crate::detect::Detector;
use crate::error::SentinelError;
use crate::frame::Frame;
use crate::ingest::{FrameSource, SourceConnector};
use crate::store::{ArtifactRef, DetectionEvent, EventStore, EventTimestamp};
use crate::taxonomy::{group_detections, wants_detection, DetectionType};

const IDLE_TICK: Duration = Duration::from_millis(10);
const HEALTH_LOG_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkerState {
    Disconnected,
    Connecting,
    Streaming,
    Reconnecting,
    Stopped,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkerEvent {
    Start,
    Connected,
    ConnectFailed,
    ReadFailed,
    RetryElapsed,
    Cancelled,
}

/// Worker state machine. `Stopped` is terminal.
pub fn next_state(state: WorkerState, event: WorkerEvent) -> WorkerState {
    use WorkerEvent as E;
    use WorkerState as S;

    match (state, event) {
        (S::Stopped, _) => S::Stopped,
        (_, E::Cancelled) => S::Stopped,
        (S::Disconnected, E::Start) => S::Connecting,
        (S::Connecting, E::Connected) => S::Streaming,
        (S::Connecting, E::ConnectFailed) => S::Connecting,
        (S::Streaming, E::ReadFailed) => S::Reconnecting,
        (S::Reconnecting, E::RetryElapsed) => S::Connecting,
        (state, _) => state,
    }
}

/// Cooperative cancellation shared between the supervisor and its workers.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Sleep for `duration` in ticks of at most 10 ms.
    ///
    /// Returns true if cancelled before or during the wait.
    pub fn sleep(&self, duration: Duration) -> bool {
        let Some(deadline) = Instant::now().checked_add(duration) else {
            while !self.is_cancelled() {
                std::thread::sleep(IDLE_TICK);
            }
            return true;
        };
        loop {
            if self.is_cancelled() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            std::thread::sleep(IDLE_TICK.min(deadline - now));
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WorkerTiming {
    pub connect_retry_delay: Duration,
    pub reconnect_delay: Duration,
    pub idle_tick: Duration,
}

impl Default for WorkerTiming {
    fn default() -> Self {
        Self {
            connect_retry_delay: Duration::from_secs(5),
            reconnect_delay: Duration::from_secs(5),
            idle_tick: IDLE_TICK,
        }
    }
}

impl WorkerTiming {
    pub fn from_settings(settings: &PipelineSettings) -> Self {
        Self {
            connect_retry_delay: settings.reconnect_delay,
            reconnect_delay: settings.reconnect_delay,
            idle_tick: IDLE_TICK,
        }
    }
}

/// Point-in-time view of a worker's counters.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkerSnapshot {
    pub camera: String,
    pub state: WorkerState,
    pub frames_read: u64,
    pub frames_processed: u64,
    pub events_emitted: u64,
    pub reconnects: u64,
    pub detect_failures: u64,
    pub persist_failures: u64,
}

/// Live counters for one worker, readable from other threads.
#[derive(Debug)]
pub struct WorkerStatus {
    camera: String,
    state: Mutex<WorkerState>,
    frames_read: AtomicU64,
    frames_processed: AtomicU64,
    events_emitted: AtomicU64,
    reconnects: AtomicU64,
    detect_failures: AtomicU64,
    persist_failures: AtomicU64,
}

impl WorkerStatus {
    pub fn new(camera: impl Into<String>) -> Self {
        Self {
            camera: camera.into(),
            state: Mutex::new(WorkerState::Disconnected),
            frames_read: AtomicU64::new(0),
            frames_processed: AtomicU64::new(0),
            events_emitted: AtomicU64::new(0),
            reconnects: AtomicU64::new(0),
            detect_failures: AtomicU64::new(0),
            persist_failures: AtomicU64::new(0),
        }
    }

    pub fn state(&self) -> WorkerState {
        *self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn set_state(&self, next: WorkerState) {
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if *state != next {
            log::info!("camera '{}': {:?} -> {:?}", self.camera, *state, next);
            *state = next;
        }
    }

    fn record(&self, outcome: &ProcessOutcome) {
        if outcome.detector_invoked {
            self.frames_processed.fetch_add(1, Ordering::Relaxed);
        }
        self.events_emitted
            .fetch_add(outcome.emitted.len() as u64, Ordering::Relaxed);
        for failure in &outcome.failures {
            let counter = match failure {
                SentinelError::Detect { .. } => &self.detect_failures,
                _ => &self.persist_failures,
            };
            counter.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> WorkerSnapshot {
        WorkerSnapshot {
            camera: self.camera.clone(),
            state: self.state(),
            frames_read: self.frames_read.load(Ordering::Relaxed),
            frames_processed: self.frames_processed.load(Ordering::Relaxed),
            events_emitted: self.events_emitted.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
            detect_failures: self.detect_failures.load(Ordering::Relaxed),
            persist_failures: self.persist_failures.load(Ordering::Relaxed),
        }
    }
}

/// What happened to one frame.
#[derive(Debug, Default)]
pub struct ProcessOutcome {
    /// False when no enabled type needs the detector.
    pub detector_invoked: bool,
    pub emitted: Vec<(DetectionType, ArtifactRef)>,
    /// Types that matched but were inside their cooldown window.
    pub suppressed: Vec<DetectionType>,
    /// Detect or persist failures, already logged.
    pub failures: Vec<SentinelError>,
}

/// Detect -> filter -> cooldown -> persist for one camera's frames.
pub struct FrameProcessor {
    camera: CameraConfig,
    detector: Arc<dyn Detector>,
    cooldown: Arc<CooldownTracker>,
    store: Arc<EventStore>,
}

impl FrameProcessor {
    pub fn new(
        camera: CameraConfig,
        detector: Arc<dyn Detector>,
        cooldown: Arc<CooldownTracker>,
        store: Arc<EventStore>,
    ) -> Self {
        Self {
            camera,
            detector,
            cooldown,
            store,
        }
    }

    pub fn camera(&self) -> &CameraConfig {
        &self.camera
    }

    pub fn process(&self, frame: &Frame, now: SystemTime) -> ProcessOutcome {
        let mut outcome = ProcessOutcome::default();
        if !wants_detection(&self.camera.detection_types) {
            return outcome;
        }
        outcome.detector_invoked = true;

        let objects = match self.detector.detect(frame) {
            Ok(objects) => objects,
            Err(source) => {
                let err = SentinelError::Detect {
                    camera: self.camera.name.clone(),
                    source,
                };
                log::warn!("{} (frame {})", err, frame.sequence);
                outcome.failures.push(err);
                return outcome;
            }
        };

        let groups = group_detections(
            objects,
            &self.camera.detection_types,
            self.camera.confidence_threshold,
        );
        for (detection_type, objects) in groups {
            if !self
                .cooldown
                .should_emit(&self.camera.name, detection_type, now)
            {
                log::debug!(
                    "camera '{}': {} suppressed by cooldown",
                    self.camera.name,
                    detection_type
                );
                outcome.suppressed.push(detection_type);
                continue;
            }
            log::info!(
                "{} detected on {} ({} objects)",
                detection_type.display_name(),
                self.camera.name,
                objects.len()
            );
            match self.persist(detection_type, objects, frame, now) {
                Ok(artifact) => outcome.emitted.push((detection_type, artifact)),
                Err(err) => {
                    log::error!("{}", err);
                    outcome.failures.push(err);
                }
            }
        }
        outcome
    }

    fn persist(
        &self,
        detection_type: DetectionType,
        objects: Vec<crate::detect::DetectedObject>,
        frame: &Frame,
        now: SystemTime,
    ) -> Result<ArtifactRef, SentinelError> {
        let persist_err = |source| SentinelError::Persist {
            camera: self.camera.name.clone(),
            detection_type,
            source,
        };
        let event = DetectionEvent::new(
            self.camera.name.clone(),
            detection_type,
            EventTimestamp::from_system_time(now),
            objects,
        )
        .map_err(persist_err)?;
        self.store.save(&event, frame).map_err(persist_err)
    }
}

/// Runs one camera until cancelled.
pub struct CameraWorker {
    processor: FrameProcessor,
    connector: Arc<dyn SourceConnector>,
    timing: WorkerTiming,
    status: Arc<WorkerStatus>,
}

impl CameraWorker {
    pub fn new(
        processor: FrameProcessor,
        connector: Arc<dyn SourceConnector>,
        timing: WorkerTiming,
    ) -> Self {
        let status = Arc::new(WorkerStatus::new(processor.camera.name.clone()));
        Self {
            processor,
            connector,
            timing,
            status,
        }
    }

    pub fn status(&self) -> Arc<WorkerStatus> {
        Arc::clone(&self.status)
    }

    /// Block until `cancel` fires. Transient failures never return early;
    /// an unsupported source URL returns `Err` immediately.
    pub fn run(&self, cancel: &CancelToken) -> Result<(), SentinelError> {
        let camera = self.processor.camera.clone();
        let mut source = match self.connector.open(&camera) {
            Ok(source) => source,
            Err(err) => {
                log::error!("{}", err);
                self.status.set_state(WorkerState::Stopped);
                return Err(err);
            }
        };
        log::info!(
            "starting processing for camera: {} ({})",
            camera.name,
            camera.redacted_url()
        );

        let interval = camera.frame_interval();
        let mut state = next_state(WorkerState::Disconnected, WorkerEvent::Start);
        let mut last_read: Option<Instant> = None;
        let mut last_health = Instant::now();
        self.status.set_state(state);

        while state != WorkerState::Stopped {
            if cancel.is_cancelled() {
                state = next_state(state, WorkerEvent::Cancelled);
                break;
            }
            let event = match state {
                WorkerState::Connecting => self.connect(source.as_mut(), cancel),
                WorkerState::Streaming => {
                    if let Some(last) = last_read {
                        let elapsed = last.elapsed();
                        if elapsed < interval {
                            let idle = self.timing.idle_tick.min(interval - elapsed);
                            if cancel.sleep(idle) {
                                state = next_state(state, WorkerEvent::Cancelled);
                            }
                            continue;
                        }
                    }
                    last_read = Some(Instant::now());
                    let event = self.read_and_process(source.as_mut());
                    if last_health.elapsed() >= HEALTH_LOG_INTERVAL {
                        self.log_health();
                        last_health = Instant::now();
                    }
                    event
                }
                WorkerState::Reconnecting => {
                    if cancel.sleep(self.timing.reconnect_delay) {
                        WorkerEvent::Cancelled
                    } else {
                        WorkerEvent::RetryElapsed
                    }
                }
                WorkerState::Disconnected | WorkerState::Stopped => WorkerEvent::Cancelled,
            };
            state = next_state(state, event);
            self.status.set_state(state);
        }

        source.disconnect();
        self.status.set_state(state);
        log::info!("camera '{}' stopped", camera.name);
        Ok(())
    }

    fn connect(&self, source: &mut dyn FrameSource, cancel: &CancelToken) -> WorkerEvent {
        match source.connect() {
            Ok(()) => WorkerEvent::Connected,
            Err(source_err) => {
                source.disconnect();
                let err = SentinelError::Connect {
                    camera: self.processor.camera.name.clone(),
                    source: source_err,
                };
                log::warn!(
                    "{}; retrying in {:?}",
                    err,
                    self.timing.connect_retry_delay
                );
                if cancel.sleep(self.timing.connect_retry_delay) {
                    WorkerEvent::Cancelled
                } else {
                    WorkerEvent::ConnectFailed
                }
            }
        }
    }

    fn read_and_process(&self, source: &mut dyn FrameSource) -> WorkerEvent {
        match source.next_frame() {
            Ok(frame) => {
                self.status.frames_read.fetch_add(1, Ordering::Relaxed);
                let outcome = self.processor.process(&frame, frame.captured_at);
                self.status.record(&outcome);
                WorkerEvent::Connected
            }
            Err(source_err) => {
                let err = SentinelError::Read {
                    camera: self.processor.camera.name.clone(),
                    source: source_err,
                };
                log::warn!("{}; reconnecting in {:?}", err, self.timing.reconnect_delay);
                source.disconnect();
                self.status.reconnects.fetch_add(1, Ordering::Relaxed);
                WorkerEvent::ReadFailed
            }
        }
    }

    fn log_health(&self) {
        let snapshot = self.status.snapshot();
        log::debug!(
            "camera '{}': read={} processed={} events={} reconnects={}",
            snapshot.camera,
            snapshot.frames_read,
            snapshot.frames_processed,
            snapshot.events_emitted,
            snapshot.reconnects
        );
    }
}
