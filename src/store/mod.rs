//! Event persistence.
//!
//! Each committed event is two files in the events directory:
//!
//! - `{camera}_{type}_{YYYYmmdd_HHMMSS}.jpg`: the frame with boxes drawn.
//! - `{camera}_{type}_{YYYYmmdd_HHMMSS}.json`: the [`EventRecord`] sidecar.
//!
//! Both are written to a `.tmp` name first and renamed, image first. An
//! event is committed once its sidecar is renamed into place; only then is
//! the notification dispatcher handed the record.

pub mod annotate;
pub mod retention;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Local, NaiveDateTime, Timelike};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::time::SystemTime;

use crate::detect::DetectedObject;
use crate::error::SentinelError;
use crate::frame::Frame;
use crate::notify::NotificationDispatcher;
use crate::taxonomy::DetectionType;

pub use retention::{CleanupReport, RetentionPolicy};

const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";
const MAX_NAME_SUFFIX: u32 = 1000;

/// Wall-clock event time in local time, second precision.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EventTimestamp(NaiveDateTime);

impl EventTimestamp {
    pub fn from_system_time(time: SystemTime) -> Self {
        let local: DateTime<Local> = time.into();
        let naive = local.naive_local();
        Self(naive.with_nanosecond(0).unwrap_or(naive))
    }

    pub fn parse(raw: &str) -> Result<Self> {
        NaiveDateTime::parse_from_str(raw, TIMESTAMP_FORMAT)
            .map(Self)
            .map_err(|e| anyhow!("invalid event timestamp '{}': {}", raw, e))
    }
}

impl fmt::Display for EventTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format(TIMESTAMP_FORMAT))
    }
}

/// One detection event. Immutable once built.
#[derive(Clone, Debug, PartialEq)]
pub struct DetectionEvent {
    camera: String,
    detection_type: DetectionType,
    timestamp: EventTimestamp,
    objects: Vec<DetectedObject>,
}

impl DetectionEvent {
    /// Fails when `objects` is empty.
    pub fn new(
        camera: impl Into<String>,
        detection_type: DetectionType,
        timestamp: EventTimestamp,
        objects: Vec<DetectedObject>,
    ) -> Result<Self> {
        if objects.is_empty() {
            return Err(anyhow!("a detection event needs at least one object"));
        }
        Ok(Self {
            camera: camera.into(),
            detection_type,
            timestamp,
            objects,
        })
    }

    pub fn camera(&self) -> &str {
        &self.camera
    }

    pub fn detection_type(&self) -> DetectionType {
        self.detection_type
    }

    pub fn timestamp(&self) -> EventTimestamp {
        self.timestamp
    }

    pub fn objects(&self) -> &[DetectedObject] {
        &self.objects
    }
}

/// JSON sidecar written next to each event image.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub camera: String,
    #[serde(rename = "type")]
    pub detection_type: DetectionType,
    pub timestamp: String,
    pub image_path: String,
    pub objects: Vec<DetectedObject>,
}

impl EventRecord {
    fn new(event: &DetectionEvent, image_path: &Path) -> Self {
        Self {
            camera: event.camera.clone(),
            detection_type: event.detection_type,
            timestamp: event.timestamp.to_string(),
            image_path: image_path.to_string_lossy().into_owned(),
            objects: event.objects.clone(),
        }
    }

    /// Rebuild the event this record was written from.
    pub fn to_event(&self) -> Result<DetectionEvent> {
        DetectionEvent::new(
            self.camera.clone(),
            self.detection_type,
            EventTimestamp::parse(&self.timestamp)?,
            self.objects.clone(),
        )
    }
}

/// Paths of a committed event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArtifactRef {
    pub image_path: PathBuf,
    pub metadata_path: PathBuf,
}

/// Filter for [`EventStore::recent`]. Results are newest first.
#[derive(Clone, Debug)]
pub struct EventQuery {
    pub camera: Option<String>,
    pub detection_type: Option<DetectionType>,
    pub limit: usize,
    pub offset: usize,
}

impl Default for EventQuery {
    fn default() -> Self {
        Self {
            camera: None,
            detection_type: None,
            limit: 10,
            offset: 0,
        }
    }
}

impl EventQuery {
    fn matches(&self, record: &EventRecord) -> bool {
        self.camera.as_deref().map_or(true, |c| c == record.camera)
            && self
                .detection_type
                .map_or(true, |t| t == record.detection_type)
    }
}

pub struct EventStore {
    dir: PathBuf,
    jpeg_quality: u8,
    dispatcher: Option<Arc<NotificationDispatcher>>,
}

impl EventStore {
    /// Open (creating if needed) an events directory.
    pub fn open(dir: impl Into<PathBuf>, jpeg_quality: u8) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create events directory {}", dir.display()))?;
        Ok(Self {
            dir,
            jpeg_quality: jpeg_quality.clamp(1, 100),
            dispatcher: None,
        })
    }

    /// Hand every committed event to `dispatcher`.
    pub fn with_dispatcher(mut self, dispatcher: Arc<NotificationDispatcher>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Persist `event` with an annotated copy of `frame`.
    ///
    /// Returns once both files are in place. Notification happens after that
    /// and can never undo the commit.
    pub fn save(&self, event: &DetectionEvent, frame: &Frame) -> Result<ArtifactRef> {
        let image = annotate::annotate(frame, &event.objects)?;
        let jpeg = annotate::encode_jpeg(&image, self.jpeg_quality)?;

        let stem = artifact_stem(event);
        let (artifact, image_tmp) = self.reserve(&stem)?;
        if let Err(err) = write_and_commit(&image_tmp, &artifact.image_path, &jpeg) {
            let _ = fs::remove_file(&image_tmp);
            return Err(err);
        }

        let record = EventRecord::new(event, &artifact.image_path);
        let json = serde_json::to_vec_pretty(&record).context("serialize event record")?;
        let json_tmp = tmp_path(&artifact.metadata_path);
        let committed = create_new(&json_tmp)
            .and_then(|_| write_and_commit(&json_tmp, &artifact.metadata_path, &json));
        if let Err(err) = committed {
            let _ = fs::remove_file(&json_tmp);
            let _ = fs::remove_file(&artifact.image_path);
            return Err(err);
        }

        log::info!(
            "saved detection event: {} - {} - {}",
            event.camera,
            event.detection_type,
            event.timestamp
        );
        if let Some(dispatcher) = &self.dispatcher {
            dispatcher.dispatch(record);
        }
        Ok(artifact)
    }

    /// Read one sidecar.
    pub fn load(&self, metadata_path: &Path) -> Result<EventRecord> {
        let raw = fs::read(metadata_path)
            .with_context(|| format!("failed to read {}", metadata_path.display()))?;
        serde_json::from_slice(&raw)
            .with_context(|| format!("invalid event record {}", metadata_path.display()))
    }

    /// Stored events matching `query`, newest first.
    ///
    /// Unreadable sidecars are logged and skipped.
    pub fn recent(&self, query: &EventQuery) -> Result<Vec<EventRecord>> {
        if query.limit == 0 {
            return Ok(Vec::new());
        }
        let mut sidecars = Vec::new();
        let entries = fs::read_dir(&self.dir)
            .with_context(|| format!("failed to list {}", self.dir.display()))?;
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Ok(modified) = entry.metadata().and_then(|m| m.modified()) else {
                continue;
            };
            sidecars.push((path, modified));
        }
        sidecars.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| b.0.cmp(&a.0)));

        let mut records = Vec::new();
        let mut skipped = 0;
        for (path, _) in sidecars {
            let record = match self.load(&path) {
                Ok(record) => record,
                Err(err) => {
                    log::error!("error loading event file {}: {:#}", path.display(), err);
                    continue;
                }
            };
            if !query.matches(&record) {
                continue;
            }
            if skipped < query.offset {
                skipped += 1;
                continue;
            }
            records.push(record);
            if records.len() >= query.limit {
                break;
            }
        }
        Ok(records)
    }

    /// Run one retention pass over the events directory.
    pub fn cleanup(&self, policy: &RetentionPolicy) -> Result<CleanupReport, SentinelError> {
        retention::cleanup(&self.dir, policy).map_err(|source| SentinelError::Cleanup { source })
    }

    pub fn cleanup_at(
        &self,
        policy: &RetentionPolicy,
        now: SystemTime,
    ) -> Result<CleanupReport, SentinelError> {
        retention::cleanup_at(&self.dir, policy, now)
            .map_err(|source| SentinelError::Cleanup { source })
    }

    /// Pick the first free `{stem}`, `{stem}-1`, ... and claim its image
    /// temp file so concurrent writers cannot pick the same name.
    fn reserve(&self, stem: &str) -> Result<(ArtifactRef, PathBuf)> {
        for suffix in 0..MAX_NAME_SUFFIX {
            let name = if suffix == 0 {
                stem.to_string()
            } else {
                format!("{}-{}", stem, suffix)
            };
            let artifact = ArtifactRef {
                image_path: self.dir.join(format!("{}.jpg", name)),
                metadata_path: self.dir.join(format!("{}.json", name)),
            };
            if artifact.image_path.exists() || artifact.metadata_path.exists() {
                continue;
            }
            let tmp = tmp_path(&artifact.image_path);
            match create_new(&tmp) {
                Ok(()) => return Ok((artifact, tmp)),
                Err(_) if tmp.exists() => continue,
                Err(err) => return Err(err),
            }
        }
        Err(anyhow!("no free artifact name for {}", stem))
    }
}

fn artifact_stem(event: &DetectionEvent) -> String {
    format!(
        "{}_{}_{}",
        sanitize_camera_name(&event.camera),
        event.detection_type,
        event.timestamp
    )
}

/// Replace characters that are unsafe in file names with `_`.
pub fn sanitize_camera_name(name: &str) -> String {
    static UNSAFE_RE: OnceLock<Regex> = OnceLock::new();
    let re = UNSAFE_RE.get_or_init(|| Regex::new(r"[^A-Za-z0-9_-]").unwrap());
    re.replace_all(name, "_").into_owned()
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

fn create_new(path: &Path) -> Result<()> {
    OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .map(|_| ())
        .with_context(|| format!("failed to create {}", path.display()))
}

fn write_and_commit(tmp: &Path, dest: &Path, bytes: &[u8]) -> Result<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .truncate(true)
        .open(tmp)
        .with_context(|| format!("failed to open {}", tmp.display()))?;
    file.write_all(bytes)
        .with_context(|| format!("failed to write {}", tmp.display()))?;
    file.sync_all()
        .with_context(|| format!("failed to sync {}", tmp.display()))?;
    fs::rename(tmp, dest)
        .with_context(|| format!("failed to move {} into place", dest.display()))
}
