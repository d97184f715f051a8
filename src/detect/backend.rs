use anyhow::Result;

use crate::frame::InferenceView;

use super::result::Detection;

/// What a backend can find in a frame.
#[non_exhaustive]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DetectionCapability {
    Ball,
    Mitt,
}

/// Detector backend trait.
///
/// Backends are shared read-only between concurrent analyses, so `detect`
/// takes `&self` and implementations must be `Send + Sync`. Any per-call
/// scratch state lives on the stack of `detect`.
///
/// A backend reports every candidate it sees; confidence filtering and
/// deduplication happen downstream.
pub trait DetectorBackend: Send + Sync {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Returns true when the backend supports a capability.
    fn supports(&self, capability: DetectionCapability) -> bool;

    /// Run detection on a frame. An empty frame is `Ok(vec![])`, never an error.
    fn detect(&self, view: &InferenceView<'_>) -> Result<Vec<Detection>>;

    /// Optional warm-up hook.
    fn warm_up(&self) -> Result<()> {
        Ok(())
    }
}
