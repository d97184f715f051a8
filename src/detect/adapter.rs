use std::sync::Arc;

use serde::Deserialize;

use crate::error::AnalysisError;
use crate::frame::Frame;

use super::backend::DetectorBackend;
use super::result::{Detection, ObjectClass};

/// Detector settings (`[detector]` in the config file).
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct DetectorSettings {
    /// Registered backend name: `cpu`, `stub` or `tract`.
    pub backend: String,
    /// ONNX model path for the `tract` backend.
    pub model_path: Option<String>,
    /// Model input size for the `tract` backend.
    pub input_width: u32,
    pub input_height: u32,
    /// Class ids in the model's label space.
    pub ball_class_ids: Vec<usize>,
    pub mitt_class_ids: Vec<usize>,
    /// Detections below these scores are dropped by the adapter.
    pub ball_confidence: f32,
    pub mitt_confidence: f32,
    /// Detection worker threads per analysis.
    pub workers: usize,
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            backend: "cpu".to_string(),
            model_path: None,
            input_width: 640,
            input_height: 640,
            // COCO: 32 = sports ball, 35 = baseball glove
            ball_class_ids: vec![32],
            mitt_class_ids: vec![35],
            ball_confidence: 0.01,
            mitt_confidence: 0.2,
            workers: 2,
        }
    }
}

/// Wraps the injected backend and applies per-class confidence thresholds.
#[derive(Clone)]
pub struct DetectorAdapter {
    backend: Arc<dyn DetectorBackend>,
    ball_confidence: f32,
    mitt_confidence: f32,
}

impl DetectorAdapter {
    pub fn new(backend: Arc<dyn DetectorBackend>, settings: &DetectorSettings) -> Self {
        Self {
            backend,
            ball_confidence: settings.ball_confidence,
            mitt_confidence: settings.mitt_confidence,
        }
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Detect balls and mitts on one frame.
    ///
    /// Multiple detections per class are passed through untouched; only scores
    /// under the class threshold are dropped.
    pub fn detect(&self, frame: &Frame) -> Result<Vec<Detection>, AnalysisError> {
        let view = frame.inference_view();
        let detections = self
            .backend
            .detect(&view)
            .map_err(|err| AnalysisError::Inference {
                frame: frame.index,
                reason: format!("{:#}", err),
            })?;

        Ok(detections
            .into_iter()
            .filter(|d| d.confidence >= self.threshold(d.class))
            .collect())
    }

    fn threshold(&self, class: ObjectClass) -> f32 {
        match class {
            ObjectClass::Ball => self.ball_confidence,
            ObjectClass::Mitt => self.mitt_confidence,
        }
    }
}
