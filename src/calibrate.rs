//! Meters-per-pixel from the catcher's mitt.
//!
//! The calibrator watches mitt detections over the trailing catch window of
//! the throw-ordered sequence and turns the median apparent mitt height into
//! a scale. When the mitt is missing or the result is implausible a
//! configured fallback is used and the result carries a warning.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::detect::{Detection, FrameDetections, ObjectClass};
use crate::error::AnalysisError;

/// Resolution fallback assumes this much scene is visible across a portrait frame.
const PORTRAIT_SCENE_M: f64 = 11.0;
/// Landscape fallback: scene width, spread over this share of the frame width.
const LANDSCAPE_SCENE_M: f64 = 18.0;
const LANDSCAPE_USABLE_WIDTH: f64 = 0.7;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalibrationMethod {
    MittAuto,
    DefaultFallback,
}

/// Scale used when the mitt cannot calibrate the clip.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum FallbackScale {
    /// A fixed meters-per-pixel value.
    Fixed { scale_factor: f64 },
    /// Rough field-of-view estimate from the frame dimensions.
    Resolution,
    /// No fallback; an uncalibrated clip is an error.
    Disabled,
}

/// Calibration settings (`[calibration]` in the config file).
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct CalibrationSettings {
    /// Physical height of the mitt in meters.
    pub mitt_size_m: f64,
    /// Trailing frames of the throw in which the mitt is measured.
    pub window_frames: u64,
    pub min_samples: usize,
    pub min_height_px: f32,
    /// Height must exceed width times this.
    pub min_aspect: f32,
    /// Bounds on height / frame height.
    pub min_frame_ratio: f64,
    pub max_frame_ratio: f64,
    /// Accepted meters-per-pixel range for a mitt calibration.
    pub min_scale: f64,
    pub max_scale: f64,
    pub fallback: FallbackScale,
}

impl Default for CalibrationSettings {
    fn default() -> Self {
        Self {
            mitt_size_m: 0.32,
            window_frames: 60,
            min_samples: 4,
            min_height_px: 50.0,
            min_aspect: 0.7,
            min_frame_ratio: 0.05,
            max_frame_ratio: 0.3,
            min_scale: 0.001,
            max_scale: 0.1,
            fallback: FallbackScale::Resolution,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Calibration {
    /// Meters per pixel.
    pub scale_factor: f64,
    pub method: CalibrationMethod,
    pub mitt_detected: bool,
    /// Qualifying mitt detections in the catch window.
    pub mitt_samples: usize,
    pub median_mitt_px: Option<f64>,
    /// Set whenever the fallback was used.
    pub warning: Option<String>,
}

#[derive(Clone, Copy, Debug)]
struct MittSample {
    frame: u64,
    height_px: f64,
}

/// Accumulates mitt samples frame by frame.
pub struct Calibrator {
    settings: CalibrationSettings,
    window: VecDeque<MittSample>,
    frame_size: Option<(u32, u32)>,
}

impl Calibrator {
    pub fn new(settings: CalibrationSettings) -> Self {
        Self {
            settings,
            window: VecDeque::new(),
            frame_size: None,
        }
    }

    /// Feed one throw-ordered frame.
    pub fn observe(&mut self, frame: &FrameDetections) {
        self.frame_size = Some((frame.frame_width, frame.frame_height));

        let window = self.settings.window_frames;
        while self
            .window
            .front()
            .is_some_and(|s| s.frame + window <= frame.index)
        {
            self.window.pop_front();
        }

        // one sample per frame: the most confident qualifying mitt
        let best = frame
            .of_class(ObjectClass::Mitt)
            .filter(|d| self.qualifies(d, frame.frame_height))
            .reduce(|best, d| if d.confidence > best.confidence { d } else { best });
        if let Some(mitt) = best {
            log::debug!(
                "calibrate: frame {} mitt {:.0}x{:.0}px",
                frame.index,
                mitt.bbox.width,
                mitt.bbox.height
            );
            self.window.push_back(MittSample {
                frame: frame.index,
                height_px: f64::from(mitt.bbox.height),
            });
        }
    }

    fn qualifies(&self, mitt: &Detection, frame_height: u32) -> bool {
        let s = &self.settings;
        let (width, height) = (mitt.bbox.width, mitt.bbox.height);
        if height <= s.min_height_px || height <= width * s.min_aspect {
            return false;
        }
        if frame_height == 0 {
            return false;
        }
        let ratio = f64::from(height) / f64::from(frame_height);
        ratio > s.min_frame_ratio && ratio < s.max_frame_ratio
    }

    pub fn finish(self) -> Result<Calibration, AnalysisError> {
        let samples = self.window.len();
        let median = median(self.window.iter().map(|s| s.height_px).collect());

        let rejected = match median {
            Some(median_px) if samples >= self.settings.min_samples => {
                let scale = self.settings.mitt_size_m / median_px;
                if scale >= self.settings.min_scale && scale <= self.settings.max_scale {
                    log::info!(
                        "calibrate: mitt median {:.1}px over {} samples -> {:.6} m/px",
                        median_px,
                        samples,
                        scale
                    );
                    return Ok(Calibration {
                        scale_factor: scale,
                        method: CalibrationMethod::MittAuto,
                        mitt_detected: true,
                        mitt_samples: samples,
                        median_mitt_px: Some(median_px),
                        warning: None,
                    });
                }
                format!(
                    "Mitt calibration gave an implausible scale ({:.5} m/px)",
                    scale
                )
            }
            _ => format!(
                "Mitt not detected (found {} of {} needed samples)",
                samples, self.settings.min_samples
            ),
        };

        let scale_factor = self.fallback_scale()?;
        log::warn!(
            "calibrate: {}; falling back to {:.6} m/px",
            rejected,
            scale_factor
        );
        Ok(Calibration {
            scale_factor,
            method: CalibrationMethod::DefaultFallback,
            mitt_detected: false,
            mitt_samples: samples,
            median_mitt_px: median,
            warning: Some(format!(
                "{}; speed uses an estimated scale. Keep the catcher's mitt in frame for an accurate measurement.",
                rejected
            )),
        })
    }

    fn fallback_scale(&self) -> Result<f64, AnalysisError> {
        match &self.settings.fallback {
            FallbackScale::Fixed { scale_factor } => Ok(*scale_factor),
            FallbackScale::Resolution => {
                let (width, height) = self.frame_size.ok_or_else(|| {
                    AnalysisError::Config("resolution fallback needs at least one frame".into())
                })?;
                Ok(resolution_scale(width, height))
            }
            FallbackScale::Disabled => Err(AnalysisError::Config(
                "mitt calibration failed and no fallback scale is configured".into(),
            )),
        }
    }
}

/// Field-of-view estimate for a typical pitching clip.
pub fn resolution_scale(width: u32, height: u32) -> f64 {
    let w = f64::from(width.max(1));
    if height > width {
        PORTRAIT_SCENE_M / w
    } else {
        LANDSCAPE_SCENE_M / (w * LANDSCAPE_USABLE_WIDTH)
    }
}

fn median(mut values: Vec<f64>) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(f64::total_cmp);
    let mid = values.len() / 2;
    Some(if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    })
}
