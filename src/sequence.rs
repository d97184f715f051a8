//! Throw-first ordering and real elapsed time.
//!
//! The rest of the pipeline works in one convention: frame index 0 is the
//! earliest moment of the throw, and `timestamp_s = index * seconds_per_frame`
//! is real time. This module resolves the slow-motion factor and reorders
//! per-frame detection records when the upload was stored catch-first.

use serde::Deserialize;

use crate::detect::{Detection, FrameDetections};
use crate::error::AnalysisError;
use crate::ingest::VideoMeta;

/// Real throw duration assumed by the duration heuristic.
const ASSUMED_THROW_SECS: f64 = 0.5;
/// Clips above this playback rate are assumed to be real time.
const SLOWMO_MAX_PLAYBACK_FPS: f64 = 60.0;
/// Clips shorter than this are assumed to be real time.
const SLOWMO_MIN_DURATION_SECS: f64 = 2.0;

/// Storage order of the uploaded clip.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SequenceOrder {
    /// Frames are stored throw→catch.
    #[default]
    ThrowFirst,
    /// Frames are stored catch→throw (reverse playback export).
    CatchFirst,
}

impl std::str::FromStr for SequenceOrder {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "throw_first" => Ok(Self::ThrowFirst),
            "catch_first" => Ok(Self::CatchFirst),
            other => Err(format!(
                "unknown sequence order '{}' (expected throw_first or catch_first)",
                other
            )),
        }
    }
}

/// Sequence settings (`[sequence]` in the config file).
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct SequenceSettings {
    pub order: SequenceOrder,
    /// Fixed slow-motion factor. `None` infers it from the video.
    pub slowmo_factor: Option<f64>,
}

/// Where the slow-motion factor came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SlowmoSource {
    Configured,
    CaptureMetadata,
    DurationHeuristic,
    RealTime,
}

/// Mapping from frame index to real seconds.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TimeBase {
    pub fps: f64,
    pub slowmo_factor: f64,
    pub source: SlowmoSource,
    /// `slowmo_factor / fps`.
    pub seconds_per_frame: f64,
}

impl TimeBase {
    pub fn new(fps: f64, slowmo_factor: f64, source: SlowmoSource) -> Result<Self, AnalysisError> {
        if !fps.is_finite() || fps <= 0.0 {
            return Err(AnalysisError::UnsupportedFrameRate(fps));
        }
        if !slowmo_factor.is_finite() || slowmo_factor <= 0.0 {
            return Err(AnalysisError::Config(format!(
                "slow-motion factor must be positive, got {}",
                slowmo_factor
            )));
        }
        Ok(Self {
            fps,
            slowmo_factor,
            source,
            seconds_per_frame: slowmo_factor / fps,
        })
    }

    /// Resolve the slow-motion factor for a clip.
    ///
    /// Order: configured factor, capture-fps metadata, duration heuristic, real time.
    pub fn resolve(meta: &VideoMeta, settings: &SequenceSettings) -> Result<Self, AnalysisError> {
        let fps = meta.fps;
        if !fps.is_finite() || fps <= 0.0 {
            return Err(AnalysisError::UnsupportedFrameRate(fps));
        }

        let (factor, source) = if let Some(factor) = settings.slowmo_factor {
            (factor, SlowmoSource::Configured)
        } else if let Some(capture_fps) = meta.capture_fps {
            (snap_slowmo(capture_fps / fps), SlowmoSource::CaptureMetadata)
        } else if fps <= SLOWMO_MAX_PLAYBACK_FPS && meta.duration_s > SLOWMO_MIN_DURATION_SECS {
            (
                snap_slowmo(meta.duration_s / ASSUMED_THROW_SECS),
                SlowmoSource::DurationHeuristic,
            )
        } else {
            (1.0, SlowmoSource::RealTime)
        };

        let time = Self::new(fps, factor, source)?;
        log::info!(
            "slow-motion factor {:.1}x ({:?}), fps={:.3}, {:.6}s real per frame",
            time.slowmo_factor,
            time.source,
            time.fps,
            time.seconds_per_frame
        );
        Ok(time)
    }

    pub fn timestamp(&self, index: u64) -> f64 {
        index as f64 * self.seconds_per_frame
    }

    /// Real seconds between two frame indices.
    pub fn elapsed(&self, from: u64, to: u64) -> f64 {
        (to as f64 - from as f64) * self.seconds_per_frame
    }
}

/// Snap a measured multiplier to the common camera factors 1, 2, 4, 8, 16.
pub fn snap_slowmo(multiplier: f64) -> f64 {
    if multiplier > 12.0 {
        16.0
    } else if multiplier > 6.0 {
        8.0
    } else if multiplier > 3.0 {
        4.0
    } else if multiplier > 1.5 {
        2.0
    } else {
        1.0
    }
}

/// Re-stamps per-frame detections into throw-first order.
///
/// Throw-first input passes straight through. Catch-first input is held
/// (detections only, never pixels) until the stream ends, then replayed
/// reversed with fresh indices.
pub struct SequenceNormalizer {
    order: SequenceOrder,
    time: TimeBase,
    held: Vec<HeldFrame>,
}

struct HeldFrame {
    width: u32,
    height: u32,
    detections: Vec<Detection>,
}

impl SequenceNormalizer {
    pub fn new(order: SequenceOrder, time: TimeBase) -> Self {
        Self {
            order,
            time,
            held: Vec::new(),
        }
    }

    pub fn time_base(&self) -> TimeBase {
        self.time
    }

    /// Accept the detections of the frame at `storage_index`.
    ///
    /// Calls must arrive in strictly increasing storage order.
    pub fn push<F>(
        &mut self,
        storage_index: u64,
        width: u32,
        height: u32,
        detections: Vec<Detection>,
        sink: &mut F,
    ) where
        F: FnMut(FrameDetections),
    {
        match self.order {
            SequenceOrder::ThrowFirst => sink(FrameDetections {
                index: storage_index,
                timestamp_s: self.time.timestamp(storage_index),
                frame_width: width,
                frame_height: height,
                detections,
            }),
            SequenceOrder::CatchFirst => self.held.push(HeldFrame {
                width,
                height,
                detections,
            }),
        }
    }

    /// End of stream. Replays held frames for catch-first clips.
    pub fn finish<F>(self, sink: &mut F)
    where
        F: FnMut(FrameDetections),
    {
        let time = self.time;
        for (index, frame) in self.held.into_iter().rev().enumerate() {
            let index = index as u64;
            sink(FrameDetections {
                index,
                timestamp_s: time.timestamp(index),
                frame_width: frame.width,
                frame_height: frame.height,
                detections: frame.detections,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::BoundingBox;

    fn meta(fps: f64, duration_s: f64, capture_fps: Option<f64>) -> VideoMeta {
        VideoMeta {
            fps,
            total_frames: (fps * duration_s) as u64,
            width: 1080,
            height: 1920,
            duration_s,
            capture_fps,
        }
    }

    #[test]
    fn seconds_per_frame_scales_with_slowmo() {
        let time = TimeBase::new(240.0, 8.0, SlowmoSource::Configured).unwrap();
        assert!((time.elapsed(0, 3) - 0.1).abs() < 1e-12);
        assert!((time.timestamp(3) - 0.1).abs() < 1e-12);
    }

    #[test]
    fn rejects_non_positive_fps() {
        let settings = SequenceSettings::default();
        assert!(matches!(
            TimeBase::resolve(&meta(0.0, 1.0, None), &settings),
            Err(AnalysisError::UnsupportedFrameRate(_))
        ));
        assert!(matches!(
            TimeBase::new(-30.0, 1.0, SlowmoSource::RealTime),
            Err(AnalysisError::UnsupportedFrameRate(_))
        ));
    }

    #[test]
    fn configured_factor_wins() {
        let settings = SequenceSettings {
            slowmo_factor: Some(8.0),
            ..SequenceSettings::default()
        };
        let time = TimeBase::resolve(&meta(30.0, 0.5, Some(120.0)), &settings).unwrap();
        assert_eq!(time.slowmo_factor, 8.0);
        assert_eq!(time.source, SlowmoSource::Configured);
    }

    #[test]
    fn capture_metadata_is_snapped() {
        let time =
            TimeBase::resolve(&meta(30.0, 1.0, Some(240.0)), &SequenceSettings::default()).unwrap();
        assert_eq!(time.slowmo_factor, 8.0);
        assert_eq!(time.source, SlowmoSource::CaptureMetadata);
    }

    #[test]
    fn long_low_fps_clip_uses_duration_heuristic() {
        // 4.8 s of playback for a ~0.5 s throw -> 9.6x -> 8x
        let time = TimeBase::resolve(&meta(30.0, 4.8, None), &SequenceSettings::default()).unwrap();
        assert_eq!(time.slowmo_factor, 8.0);
        assert_eq!(time.source, SlowmoSource::DurationHeuristic);

        let time = TimeBase::resolve(&meta(240.0, 4.8, None), &SequenceSettings::default()).unwrap();
        assert_eq!(time.slowmo_factor, 1.0);
        assert_eq!(time.source, SlowmoSource::RealTime);
    }

    #[test]
    fn snapping_thresholds() {
        assert_eq!(snap_slowmo(1.2), 1.0);
        assert_eq!(snap_slowmo(2.0), 2.0);
        assert_eq!(snap_slowmo(4.5), 4.0);
        assert_eq!(snap_slowmo(9.6), 8.0);
        assert_eq!(snap_slowmo(40.0), 16.0);
    }

    #[test]
    fn catch_first_frames_are_replayed_reversed() {
        let time = TimeBase::new(100.0, 1.0, SlowmoSource::RealTime).unwrap();
        let mut normalizer = SequenceNormalizer::new(SequenceOrder::CatchFirst, time);
        let mut seen = Vec::new();
        let mut sink = |fd: FrameDetections| seen.push(fd);

        for storage in 0..3u64 {
            let marker = Detection::ball(BoundingBox::new(storage as f32, 0.0, 8.0, 8.0), 0.9);
            normalizer.push(storage, 10, 10, vec![marker], &mut sink);
        }
        normalizer.finish(&mut sink);

        let order: Vec<(u64, f32)> = seen
            .iter()
            .map(|fd| (fd.index, fd.detections[0].bbox.x))
            .collect();
        assert_eq!(order, vec![(0, 2.0), (1, 1.0), (2, 0.0)]);
        assert!((seen[2].timestamp_s - 0.02).abs() < 1e-12);
    }

    #[test]
    fn throw_first_passes_through() {
        let time = TimeBase::new(100.0, 1.0, SlowmoSource::RealTime).unwrap();
        let mut normalizer = SequenceNormalizer::new(SequenceOrder::ThrowFirst, time);
        let mut seen = Vec::new();
        let mut sink = |fd: FrameDetections| seen.push(fd.index);
        normalizer.push(0, 10, 10, vec![], &mut sink);
        normalizer.push(1, 10, 10, vec![], &mut sink);
        normalizer.finish(&mut sink);
        assert_eq!(seen, vec![0, 1]);
    }
}
