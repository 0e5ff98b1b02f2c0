mod backend;
mod backends;
mod registry;
mod result;

pub use backend::Detector;
pub use backends::StubBackend;
#[cfg(feature = "backend-tract")]
pub use backends::TractBackend;
pub use registry::DetectorRegistry;
pub use result::{BoundingBox, DetectedObject};
