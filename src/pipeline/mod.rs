//! Analysis orchestration.
//!
//! `Analyzer` owns the detector and the per-stage settings and is shared
//! read-only between requests. Each call to `analyze` builds fresh
//! accumulators, so requests never see each other's state.

mod pool;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::calibrate::{Calibration, CalibrationSettings, Calibrator};
use crate::config::AnalyzerConfig;
use crate::detect::{DetectorAdapter, DetectorBackend, DetectorSettings, FrameDetections};
use crate::error::AnalysisError;
use crate::ingest;
use crate::result::AnalysisResult;
use crate::sequence::{SequenceNormalizer, SequenceSettings, TimeBase};
use crate::speed::{self, SpeedEstimate, SpeedSettings};
use crate::tracker::{Track, Tracker, TrackerSettings};

pub use pool::{detect_in_order, DetectedFrame, PoolStats, ReorderBuffer};

/// Cooperative cancellation shared by every thread of one analysis.
#[derive(Clone, Debug, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn check(&self) -> Result<(), AnalysisError> {
        if self.is_cancelled() {
            Err(AnalysisError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Everything a successful analysis measured.
#[derive(Clone, Debug)]
pub struct Measurement {
    pub time: TimeBase,
    pub calibration: Calibration,
    pub track: Track,
    pub speed: SpeedEstimate,
    /// Points in the chosen track.
    pub detected_frames: usize,
    /// Frames actually decoded.
    pub total_frames: u64,
}

/// Observer for pipeline stages, used by the CLI for progress output.
pub trait StageObserver {
    fn stage_started(&self, _stage: Stage) {}
    fn stage_finished(&self, _stage: Stage) {}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    Decode,
    Detect,
    Track,
    Calibrate,
    Speed,
}

impl Stage {
    pub fn label(&self) -> &'static str {
        match self {
            Stage::Decode => "open video",
            Stage::Detect => "detect and track",
            Stage::Track => "select ball track",
            Stage::Calibrate => "calibrate scale",
            Stage::Speed => "estimate speed",
        }
    }
}

struct Silent;

impl StageObserver for Silent {}

#[derive(Clone)]
pub struct Analyzer {
    adapter: DetectorAdapter,
    workers: usize,
    sequence: SequenceSettings,
    tracker: TrackerSettings,
    calibration: CalibrationSettings,
    speed: SpeedSettings,
}

impl Analyzer {
    pub fn new(backend: Arc<dyn DetectorBackend>, config: &AnalyzerConfig) -> Self {
        Self::with_settings(
            backend,
            &config.detector,
            config.sequence.clone(),
            config.tracker.clone(),
            config.calibration.clone(),
            config.speed.clone(),
        )
    }

    pub fn with_settings(
        backend: Arc<dyn DetectorBackend>,
        detector: &DetectorSettings,
        sequence: SequenceSettings,
        tracker: TrackerSettings,
        calibration: CalibrationSettings,
        speed: SpeedSettings,
    ) -> Self {
        Self {
            adapter: DetectorAdapter::new(backend, detector),
            workers: detector.workers.max(1),
            sequence,
            tracker,
            calibration,
            speed,
        }
    }

    pub fn backend_name(&self) -> &'static str {
        self.adapter.backend_name()
    }

    /// Run the full pipeline. Never fails: errors become `success: false`.
    pub fn analyze(&self, bytes: &[u8], cancel: &CancelFlag) -> AnalysisResult {
        self.analyze_observed(bytes, cancel, &Silent)
    }

    pub fn analyze_observed(
        &self,
        bytes: &[u8],
        cancel: &CancelFlag,
        observer: &dyn StageObserver,
    ) -> AnalysisResult {
        match self.measure_observed(bytes, cancel, observer) {
            Ok(measurement) => AnalysisResult::success(&measurement),
            Err(err) => {
                log::warn!("analysis failed ({}): {}", err.kind(), err);
                AnalysisResult::failure(&err)
            }
        }
    }

    pub fn measure(&self, bytes: &[u8], cancel: &CancelFlag) -> Result<Measurement, AnalysisError> {
        self.measure_observed(bytes, cancel, &Silent)
    }

    pub fn measure_observed(
        &self,
        bytes: &[u8],
        cancel: &CancelFlag,
        observer: &dyn StageObserver,
    ) -> Result<Measurement, AnalysisError> {
        cancel.check()?;

        observer.stage_started(Stage::Decode);
        let source = ingest::decode(bytes)?;
        let time = TimeBase::resolve(source.meta(), &self.sequence)?;
        observer.stage_finished(Stage::Decode);

        observer.stage_started(Stage::Detect);
        let mut normalizer = SequenceNormalizer::new(self.sequence.order, time);
        let mut tracker = Tracker::new(self.tracker.clone());
        let mut calibrator = Calibrator::new(self.calibration.clone());
        let mut feed = |frame: FrameDetections| {
            tracker.observe(&frame);
            calibrator.observe(&frame);
        };

        let stats = detect_in_order(source, &self.adapter, self.workers, cancel, |detected| {
            normalizer.push(
                detected.index,
                detected.width,
                detected.height,
                detected.detections,
                &mut feed,
            );
        })?;
        normalizer.finish(&mut feed);
        cancel.check()?;
        observer.stage_finished(Stage::Detect);

        if stats.frames_decoded == 0 {
            return Err(AnalysisError::EmptyVideo);
        }

        observer.stage_started(Stage::Track);
        let summary = tracker.finish();
        let track = summary.best_track(&self.tracker)?;
        observer.stage_finished(Stage::Track);

        observer.stage_started(Stage::Calibrate);
        let calibration = calibrator.finish()?;
        observer.stage_finished(Stage::Calibrate);

        observer.stage_started(Stage::Speed);
        let speed = speed::estimate(&track, calibration.scale_factor, &time, &self.speed)?;
        observer.stage_finished(Stage::Speed);

        log::info!(
            "analysis done: {:.1} km/h, {} of {} frames tracked, {:?} calibration",
            speed.speed_kmh,
            track.len(),
            stats.frames_decoded,
            calibration.method
        );

        Ok(Measurement {
            time,
            detected_frames: track.len(),
            total_frames: stats.frames_decoded,
            calibration,
            track,
            speed,
        })
    }
}
