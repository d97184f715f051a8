mod adapter;
mod backend;
mod backends;
mod registry;
mod result;

pub use adapter::{DetectorAdapter, DetectorSettings};
pub use backend::{DetectionCapability, DetectorBackend};
#[cfg(feature = "backend-tract")]
pub use backends::TractBackend;
pub use backends::CpuBackend;
#[cfg(any(test, feature = "test-fixtures"))]
pub use backends::StubBackend;
pub use registry::BackendRegistry;
pub use result::{BoundingBox, Detection, FrameDetections, ObjectClass};
