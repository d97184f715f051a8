#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use tract_onnx::prelude::*;

use crate::detect::adapter::DetectorSettings;
use crate::detect::backend::{DetectionCapability, DetectorBackend};
use crate::detect::result::{BoundingBox, Detection, ObjectClass};
use crate::frame::InferenceView;

/// Tract-based backend for YOLOv8-style ONNX detectors.
///
/// The model takes `1x3xHxW` RGB in `0..1` and emits `1x(4+C)xN`: box center,
/// size (input pixels) and per-class scores for each of N anchors. Frames are
/// resized to the model input with nearest-neighbor sampling and boxes are
/// mapped back to frame pixels.
pub struct TractBackend {
    model: SimplePlan<TypedFact, Box<dyn TypedOp>>,
    width: u32,
    height: u32,
    ball_class_ids: Vec<usize>,
    mitt_class_ids: Vec<usize>,
    score_floor: f32,
}

impl TractBackend {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(model_path: P, settings: &DetectorSettings) -> Result<Self> {
        let model_path = model_path.as_ref();
        let (width, height) = (settings.input_width, settings.input_height);
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(
                    f32::datum_type(),
                    tvec!(1, 3, height as usize, width as usize),
                ),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self {
            model,
            width,
            height,
            ball_class_ids: settings.ball_class_ids.clone(),
            mitt_class_ids: settings.mitt_class_ids.clone(),
            score_floor: settings.ball_confidence.min(settings.mitt_confidence),
        })
    }

    fn build_input(&self, view: &InferenceView<'_>) -> Result<Tensor> {
        let (src_w, src_h) = (view.width() as usize, view.height() as usize);
        if src_w == 0 || src_h == 0 {
            return Err(anyhow!("frame has zero size"));
        }
        let pixels = view.pixels();
        let (dst_w, dst_h) = (self.width as usize, self.height as usize);

        let input = tract_ndarray::Array4::from_shape_fn(
            (1, 3, dst_h, dst_w),
            |(_, channel, y, x)| {
                let sx = (x * src_w / dst_w).min(src_w - 1);
                let sy = (y * src_h / dst_h).min(src_h - 1);
                pixels[(sy * src_w + sx) * 3 + channel] as f32 / 255.0
            },
        );

        Ok(input.into_tensor())
    }

    fn decode(&self, outputs: TVec<TValue>, view: &InferenceView<'_>) -> Result<Vec<Detection>> {
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let preds = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?
            .into_dimensionality::<tract_ndarray::Ix3>()
            .context("model output is not 1x(4+C)xN")?;

        let rows = preds.shape()[1];
        let anchors = preds.shape()[2];
        let sx = view.width() as f32 / self.width as f32;
        let sy = view.height() as f32 / self.height as f32;

        let mut detections = Vec::new();
        for i in 0..anchors {
            let candidates = self
                .ball_class_ids
                .iter()
                .map(|id| (ObjectClass::Ball, *id))
                .chain(self.mitt_class_ids.iter().map(|id| (ObjectClass::Mitt, *id)));
            for (class, class_id) in candidates {
                let row = 4 + class_id;
                if row >= rows {
                    continue;
                }
                let score = preds[[0, row, i]];
                if !score.is_finite() || score < self.score_floor {
                    continue;
                }
                let (cx, cy) = (preds[[0, 0, i]], preds[[0, 1, i]]);
                let (w, h) = (preds[[0, 2, i]], preds[[0, 3, i]]);
                detections.push(Detection {
                    class,
                    bbox: BoundingBox::from_corners(
                        (cx - w / 2.0) * sx,
                        (cy - h / 2.0) * sy,
                        (cx + w / 2.0) * sx,
                        (cy + h / 2.0) * sy,
                    ),
                    confidence: score.min(1.0),
                });
            }
        }
        Ok(detections)
    }
}

impl DetectorBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn supports(&self, capability: DetectionCapability) -> bool {
        match capability {
            DetectionCapability::Ball => !self.ball_class_ids.is_empty(),
            DetectionCapability::Mitt => !self.mitt_class_ids.is_empty(),
        }
    }

    fn detect(&self, view: &InferenceView<'_>) -> Result<Vec<Detection>> {
        let input = self.build_input(view)?;
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        self.decode(outputs, view)
    }
}
