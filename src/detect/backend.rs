use anyhow::Result;

use crate::detect::result::DetectedObject;
use crate::frame::Frame;

/// Object detector.
///
/// Detectors map one frame to zero or more raw-class detections. They are
/// shared by every camera worker, so `detect` takes `&self` and must be safe
/// to call concurrently. A failed call only skips the current frame.
pub trait Detector: Send + Sync {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run detection on a frame.
    ///
    /// Bounding boxes are returned in the frame's pixel coordinates.
    fn detect(&self, frame: &Frame) -> Result<Vec<DetectedObject>>;

    /// Optional warm-up hook, run once before workers start.
    fn warm_up(&self) -> Result<()> {
        Ok(())
    }
}
