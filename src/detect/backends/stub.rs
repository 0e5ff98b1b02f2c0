use anyhow::Result;

use crate::detect::backend::Detector;
use crate::detect::result::DetectedObject;
use crate::frame::Frame;

/// Stub backend. Returns the same detections for every frame (none by default).
///
/// Used with `stub://` camera sources for dry runs and in tests.
#[derive(Clone, Debug, Default)]
pub struct StubBackend {
    detections: Vec<DetectedObject>,
}

impl StubBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_detections(detections: Vec<DetectedObject>) -> Self {
        Self { detections }
    }
}

impl Detector for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn detect(&self, frame: &Frame) -> Result<Vec<DetectedObject>> {
        let width = frame.width as i32;
        let height = frame.height as i32;
        Ok(self
            .detections
            .iter()
            .filter(|d| d.bbox.x1 < width && d.bbox.y1 < height)
            .cloned()
            .collect())
    }
}
