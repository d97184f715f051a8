//! Failure taxonomy for a single analysis.
//!
//! Every pipeline stage returns either its value or an `AnalysisError`. The
//! orchestrator turns the error into the `message` of a failed
//! `AnalysisResult`; nothing below it is allowed to escape as a panic.

use thiserror::Error;

/// Hint appended to insufficient-detection failures.
pub const CAPTURE_HINT: &str =
    "film in good light against a plain background and keep the whole throw and the catch in frame";

#[derive(Debug, Error)]
pub enum AnalysisError {
    /// The container or codec could not be decoded.
    #[error("could not read the video: {0}")]
    UnreadableVideo(String),

    /// Decoding succeeded but produced no frames.
    #[error("the video contains no frames")]
    EmptyVideo,

    #[error("unsupported frame rate {0} (must be a positive number)")]
    UnsupportedFrameRate(f64),

    /// The detection backend failed on a frame. Fatal for the whole analysis.
    #[error("ball detection failed on frame {frame}: {reason}")]
    Inference { frame: u64, reason: String },

    #[error("could not track the ball ({detail}); {hint}", hint = CAPTURE_HINT)]
    InsufficientDetection {
        detected_frames: usize,
        detail: String,
    },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("analysis cancelled")]
    Cancelled,
}

impl AnalysisError {
    pub fn insufficient(detected_frames: usize, detail: impl Into<String>) -> Self {
        Self::InsufficientDetection {
            detected_frames,
            detail: detail.into(),
        }
    }

    /// Taxonomy name, stable across message wording changes.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::UnreadableVideo(_) => "UnreadableVideoError",
            Self::EmptyVideo => "EmptyVideoError",
            Self::UnsupportedFrameRate(_) => "UnsupportedFrameRateError",
            Self::Inference { .. } => "InferenceError",
            Self::InsufficientDetection { .. } => "InsufficientDetectionError",
            Self::Config(_) => "ConfigurationError",
            Self::Cancelled => "Cancelled",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insufficient_detection_message_is_actionable() {
        let err = AnalysisError::insufficient(1, "longest track has 1 frame");
        let message = err.to_string();
        assert!(message.contains("longest track has 1 frame"));
        assert!(message.contains("catch in frame"));
        assert_eq!(err.kind(), "InsufficientDetectionError");
    }

    #[test]
    fn kinds_follow_taxonomy() {
        assert_eq!(
            AnalysisError::UnreadableVideo("bad".into()).kind(),
            "UnreadableVideoError"
        );
        assert_eq!(AnalysisError::EmptyVideo.kind(), "EmptyVideoError");
        assert_eq!(
            AnalysisError::UnsupportedFrameRate(0.0).kind(),
            "UnsupportedFrameRateError"
        );
        assert_eq!(
            AnalysisError::Inference {
                frame: 3,
                reason: "boom".into()
            }
            .kind(),
            "InferenceError"
        );
    }
}
