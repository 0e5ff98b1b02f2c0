//! Error taxonomy for the detection pipeline.
//!
//! Leaf modules return `anyhow::Result`; component boundaries wrap those
//! failures in [`SentinelError`] so callers can decide between aborting,
//! retrying, or logging and moving on.

use thiserror::Error;

use crate::taxonomy::DetectionType;

/// How a failure is handled by the pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorClass {
    /// Aborts process start.
    Fatal,
    /// Logged; the owning loop continues (reconnect, skip frame).
    Retry,
    /// Logged; nothing to retry.
    Ignore,
}

#[derive(Debug, Error)]
pub enum SentinelError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("detector initialization failed: {0}")]
    DetectorInit(String),

    #[error("camera '{camera}': unsupported source: {reason}")]
    UnsupportedSource { camera: String, reason: String },

    #[error("camera '{camera}': connect failed: {source}")]
    Connect {
        camera: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("camera '{camera}': frame read failed: {source}")]
    Read {
        camera: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("camera '{camera}': detection failed: {source}")]
    Detect {
        camera: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("camera '{camera}': failed to persist {detection_type} event: {source}")]
    Persist {
        camera: String,
        detection_type: DetectionType,
        #[source]
        source: anyhow::Error,
    },

    #[error("notifier '{channel}' failed for camera '{camera}': {source}")]
    Notify {
        channel: String,
        camera: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("retention cleanup failed: {source}")]
    Cleanup {
        #[source]
        source: anyhow::Error,
    },
}

impl SentinelError {
    pub fn class(&self) -> ErrorClass {
        match self {
            SentinelError::Config(_)
            | SentinelError::DetectorInit(_)
            | SentinelError::UnsupportedSource { .. } => ErrorClass::Fatal,
            SentinelError::Connect { .. }
            | SentinelError::Read { .. }
            | SentinelError::Detect { .. }
            | SentinelError::Persist { .. } => ErrorClass::Retry,
            SentinelError::Notify { .. } | SentinelError::Cleanup { .. } => ErrorClass::Ignore,
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.class() == ErrorClass::Fatal
    }

    /// Camera the failure is attributed to, if any.
    pub fn camera(&self) -> Option<&str> {
        match self {
            SentinelError::UnsupportedSource { camera, .. }
            | SentinelError::Connect { camera, .. }
            | SentinelError::Read { camera, .. }
            | SentinelError::Detect { camera, .. }
            | SentinelError::Persist { camera, .. }
            | SentinelError::Notify { camera, .. } => Some(camera),
            SentinelError::Config(_)
            | SentinelError::DetectorInit(_)
            | SentinelError::Cleanup { .. } => None,
        }
    }
}
