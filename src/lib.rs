//! Ball speed analyzer.
//!
//! Estimates the speed of a thrown ball from a smartphone slow-motion clip,
//! calibrating real-world scale from the catcher's mitt.
//!
//! # Module Structure
//!
//! - `ingest`: video bytes to lazy RGB frames plus container metadata
//! - `frame`: owned frames and the `InferenceView` detectors see
//! - `detect`: `DetectorBackend` trait, registry, adapter and built-in backends
//! - `sequence`: throw-first ordering and the slow-motion time base
//! - `tracker`: single-ball track state machine
//! - `calibrate`: meters-per-pixel from the mitt, with fallback
//! - `speed`: per-pair speeds reduced to one estimate
//! - `pipeline`: the `Analyzer` that runs all stages on a worker pool
//! - `result`: the JSON `AnalysisResult`
//! - `api`: blocking HTTP upload server
//! - `config`: TOML file and `BALLSPEED_*` environment configuration

pub mod api;
pub mod calibrate;
pub mod config;
pub mod detect;
pub mod error;
pub mod frame;
pub mod ingest;
pub mod pipeline;
pub mod result;
pub mod sequence;
pub mod speed;
pub mod tracker;

use std::sync::Arc;

use anyhow::{anyhow, Result};

pub use calibrate::{Calibration, CalibrationMethod, CalibrationSettings, FallbackScale};
pub use config::{AnalyzerConfig, ServerSettings};
pub use detect::{
    BackendRegistry, BoundingBox, CpuBackend, Detection, DetectorBackend, DetectorSettings,
    FrameDetections, ObjectClass,
};
#[cfg(any(test, feature = "test-fixtures"))]
pub use detect::StubBackend;
pub use error::AnalysisError;
pub use frame::{Frame, InferenceView};
pub use ingest::VideoMeta;
#[cfg(any(test, feature = "test-fixtures"))]
pub use ingest::{BallPath, MittPatch, SyntheticClip};
pub use pipeline::{Analyzer, CancelFlag, Measurement};
pub use result::AnalysisResult;
pub use sequence::{SequenceOrder, SequenceSettings, TimeBase};
pub use speed::{Aggregation, SpeedSettings};
pub use tracker::{Track, TrackPoint, TrackerSettings};

/// Registry holding every backend this build can construct from `settings`.
///
/// The backend named by `settings.backend` becomes the default.
pub fn backend_registry(settings: &DetectorSettings) -> Result<BackendRegistry> {
    let mut registry = BackendRegistry::new();
    registry.register(CpuBackend::new());
    #[cfg(any(test, feature = "test-fixtures"))]
    registry.register(StubBackend::new());

    #[cfg(feature = "backend-tract")]
    {
        if let Some(path) = &settings.model_path {
            registry.register(detect::TractBackend::new(path, settings)?);
        }
    }

    if registry.get(&settings.backend).is_none() {
        return Err(anyhow!(
            "detector backend '{}' is not available (built: {})",
            settings.backend,
            registry.list().join(", ")
        ));
    }
    registry.set_default(&settings.backend)?;
    Ok(registry)
}

/// Build an analyzer for `config`, selecting its configured backend.
pub fn analyzer_from_config(config: &AnalyzerConfig) -> Result<Analyzer> {
    let registry = backend_registry(&config.detector)?;
    let backend: Arc<dyn DetectorBackend> = registry.backend_for_pipeline()?;
    backend.warm_up()?;
    log::info!(
        "detector backend '{}' ({} workers)",
        backend.name(),
        config.detector.workers
    );
    Ok(Analyzer::new(backend, config))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_selects_configured_backend() {
        let registry = backend_registry(&DetectorSettings::default()).unwrap();
        let backend = registry.backend_for_pipeline().unwrap();
        assert_eq!(backend.name(), "cpu");

        let settings = DetectorSettings {
            backend: "missing".to_string(),
            ..DetectorSettings::default()
        };
        let err = backend_registry(&settings).err().unwrap();
        assert!(err.to_string().contains("not available"));
    }
}
