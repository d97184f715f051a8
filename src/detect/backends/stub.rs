use std::collections::{BTreeMap, BTreeSet};

use anyhow::{anyhow, Result};

use crate::detect::backend::{DetectionCapability, DetectorBackend};
use crate::detect::result::Detection;
use crate::frame::InferenceView;

/// Stub backend for testing. Replays scripted detections keyed by frame index.
///
/// Frames without a script entry yield no detections. Frames marked with
/// `failing_on` return an error, standing in for a broken inference runtime.
#[derive(Clone, Debug, Default)]
pub struct StubBackend {
    script: BTreeMap<u64, Vec<Detection>>,
    failures: BTreeSet<u64>,
}

impl StubBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the detections returned for `index`.
    pub fn with_frame(mut self, index: u64, detections: Vec<Detection>) -> Self {
        self.script.insert(index, detections);
        self
    }

    /// Make `detect` fail on `index`.
    pub fn failing_on(mut self, index: u64) -> Self {
        self.failures.insert(index);
        self
    }
}

impl DetectorBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn supports(&self, capability: DetectionCapability) -> bool {
        matches!(
            capability,
            DetectionCapability::Ball | DetectionCapability::Mitt
        )
    }

    fn detect(&self, view: &InferenceView<'_>) -> Result<Vec<Detection>> {
        if self.failures.contains(&view.index()) {
            return Err(anyhow!("scripted failure on frame {}", view.index()));
        }
        Ok(self.script.get(&view.index()).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::result::BoundingBox;
    use crate::frame::Frame;

    #[test]
    fn replays_script_by_index() {
        let backend = StubBackend::new().with_frame(
            1,
            vec![Detection::ball(BoundingBox::new(1.0, 2.0, 8.0, 8.0), 0.7)],
        );

        let f0 = Frame::new(vec![0u8; 3], 1, 1, 0).unwrap();
        let f1 = Frame::new(vec![0u8; 3], 1, 1, 1).unwrap();

        assert!(backend.detect(&f0.inference_view()).unwrap().is_empty());
        let hits = backend.detect(&f1.inference_view()).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].confidence, 0.7);
    }
}
