//! Frame ingestion sources.
//!
//! - `FrameSource`: one camera stream (connect, read, release).
//! - `SourceConnector`: opens a `FrameSource` for a camera configuration.
//! - `RtspSource` / `RtspConnector`: network cameras via GStreamer, plus a
//!   synthetic `stub://` source for tests and dry runs.
//!
//! Sources never retain frames; each decoded frame is handed to the caller
//! and dropped once processed.

pub mod rtsp;

use anyhow::Result;

use crate::config::CameraConfig;
use crate::error::SentinelError;
use crate::frame::Frame;

pub use rtsp::{RtspConfig, RtspConnector, RtspSource};

/// Counters exposed by every source.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SourceStats {
    pub frames_captured: u64,
    /// Source URL with credentials redacted.
    pub url: String,
}

/// A single camera stream.
///
/// `next_frame` blocks until a frame is decoded or the source's read timeout
/// elapses; either failure means the stream must be reconnected.
pub trait FrameSource: Send {
    fn connect(&mut self) -> Result<()>;

    fn next_frame(&mut self) -> Result<Frame>;

    /// Release the stream handle. Safe to call when not connected.
    fn disconnect(&mut self);

    fn stats(&self) -> SourceStats;
}

/// Opens frame sources for camera configurations.
pub trait SourceConnector: Send + Sync {
    /// Build (but do not connect) the source for `camera`.
    ///
    /// Returns `SentinelError::UnsupportedSource` when the URL cannot be
    /// handled by this build.
    fn open(&self, camera: &CameraConfig) -> Result<Box<dyn FrameSource>, SentinelError>;
}
