//! The JSON document returned for every analysis.

use serde::{Deserialize, Serialize};

use crate::calibrate::CalibrationMethod;
use crate::error::AnalysisError;
use crate::pipeline::Measurement;

/// Outcome of one request. On failure only `success` and `message` are set.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed_kmh: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed_mph: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detected_frames: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fps: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_frames: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tracking_duration_ms: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mitt_detected: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub calibration_method: Option<CalibrationMethod>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale_factor: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slowmo_factor: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl AnalysisResult {
    pub fn success(measurement: &Measurement) -> Self {
        let warnings: Vec<&str> = [
            measurement.calibration.warning.as_deref(),
            measurement.speed.warning.as_deref(),
        ]
        .into_iter()
        .flatten()
        .collect();

        Self {
            success: true,
            speed_kmh: Some(measurement.speed.speed_kmh),
            speed_mph: Some(measurement.speed.speed_mph),
            detected_frames: Some(measurement.detected_frames),
            fps: Some(measurement.time.fps),
            total_frames: Some(measurement.total_frames),
            tracking_duration_ms: Some(measurement.speed.tracking_duration_ms),
            mitt_detected: Some(measurement.calibration.mitt_detected),
            calibration_method: Some(measurement.calibration.method),
            scale_factor: Some(measurement.calibration.scale_factor),
            slowmo_factor: Some(measurement.time.slowmo_factor),
            warning: (!warnings.is_empty()).then(|| warnings.join(" ")),
            message: None,
        }
    }

    pub fn failure(err: &AnalysisError) -> Self {
        Self {
            success: false,
            speed_kmh: None,
            speed_mph: None,
            detected_frames: None,
            fps: None,
            total_frames: None,
            tracking_duration_ms: None,
            mitt_detected: None,
            calibration_method: None,
            scale_factor: None,
            slowmo_factor: None,
            warning: None,
            message: Some(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_carries_only_message() {
        let result = AnalysisResult::failure(&AnalysisError::EmptyVideo);
        let json = serde_json::to_value(&result).unwrap();
        let object = json.as_object().unwrap();
        assert_eq!(object.len(), 2);
        assert_eq!(json["success"], false);
        assert_eq!(json["message"], "the video contains no frames");
    }

    #[test]
    fn calibration_method_is_snake_case() {
        let json = serde_json::to_string(&CalibrationMethod::DefaultFallback).unwrap();
        assert_eq!(json, "\"default_fallback\"");
    }
}
