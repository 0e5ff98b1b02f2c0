//! CCTV Sentinel
//!
//! Multi-camera ingestion and detection-event pipeline: one worker thread per
//! network camera samples frames, runs an object detector, deduplicates
//! detections with a per-(camera, type) cooldown, and persists annotated
//! event artifacts that are then handed to operator notifiers.
//!
//! # Pipeline
//!
//! ```text
//! Supervisor -> CameraWorker (per camera)
//!   read frame -> Detector -> taxonomy filter -> CooldownTracker
//!     -> EventStore::save -> NotificationDispatcher
//! ```
//!
//! # Module Structure
//!
//! - `config`: file + environment configuration and validation
//! - `error`: failure taxonomy (fatal / retry / ignore)
//! - `frame`, `ingest`: decoded frames and camera sources
//! - `detect`: detector trait, backends, registry
//! - `taxonomy`: detection types and result filtering
//! - `cooldown`: event deduplication
//! - `store`: event artifacts, queries, retention
//! - `notify`: console, email and MQTT notifiers
//! - `worker`, `supervisor`: per-camera lifecycle and orchestration

pub mod config;
pub mod cooldown;
pub mod detect;
pub mod error;
pub mod frame;
pub mod ingest;
pub mod notify;
pub mod store;
pub mod supervisor;
pub mod taxonomy;
pub mod worker;

pub use config::{CameraConfig, SentinelConfig};
pub use cooldown::{CooldownKey, CooldownTracker};
pub use detect::{BoundingBox, DetectedObject, Detector, DetectorRegistry, StubBackend};
pub use error::{ErrorClass, SentinelError};
pub use frame::Frame;
pub use ingest::{FrameSource, RtspConnector, RtspSource, SourceConnector, SourceStats};
pub use notify::{ConsoleNotifier, NotificationDispatcher, Notifier};
pub use store::{
    ArtifactRef, CleanupReport, DetectionEvent, EventQuery, EventRecord, EventStore,
    EventTimestamp, RetentionPolicy,
};
pub use supervisor::{StopReport, Supervisor, SupervisorDeps};
pub use taxonomy::DetectionType;
pub use worker::{
    next_state, CameraWorker, CancelToken, FrameProcessor, ProcessOutcome, WorkerEvent,
    WorkerSnapshot, WorkerState, WorkerStatus, WorkerTiming,
};
