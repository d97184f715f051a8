//! Single-ball tracker.
//!
//! Each candidate track moves through `NoTrack → Tentative → Confirmed → Closed`.
//! A frame is first reduced to a `FrameEvent` (hit, restart or miss) by gating
//! the frame's ball candidates against the predicted position; `transition`
//! then applies the event to the current state.
//!
//! Track points are appended to an owned `TrackArena`. Only one track is open
//! at a time, so every track is a contiguous span of the arena and discarding
//! a tentative track is a truncation.

use serde::Deserialize;

use crate::detect::{Detection, FrameDetections, ObjectClass};
use crate::error::AnalysisError;

/// Tracker settings (`[tracker]` in the config file).
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct TrackerSettings {
    /// Consecutive gated hits needed to confirm a track, including the first.
    pub confirm_hits: usize,
    /// Missed frames a confirmed track survives by extrapolation.
    pub max_missed: u32,
    /// Max distance in pixels between a detection and the predicted position.
    pub gate_px: f64,
    /// Ball boxes must be strictly between these sizes on both axes.
    pub min_ball_px: f32,
    pub max_ball_px: f32,
    /// Tracks that move less than this between first and last point are static objects.
    pub min_displacement_px: f64,
    /// Tracks longer than this are static objects. `None` disables the check.
    pub max_track_frames: Option<usize>,
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self {
            confirm_hits: 2,
            max_missed: 3,
            gate_px: 150.0,
            min_ball_px: 5.0,
            max_ball_px: 200.0,
            min_displacement_px: 10.0,
            max_track_frames: Some(150),
        }
    }
}

/// One observed ball position.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TrackPoint {
    /// Throw-ordered frame index.
    pub frame: u64,
    pub x: f64,
    pub y: f64,
    pub confidence: f32,
}

impl TrackPoint {
    fn from_detection(frame: u64, detection: &Detection) -> Self {
        let (x, y) = detection.bbox.center();
        Self {
            frame,
            x,
            y,
            confidence: detection.confidence,
        }
    }

    pub fn distance_to(&self, other: &TrackPoint) -> f64 {
        (other.x - self.x).hypot(other.y - self.y)
    }
}

/// Owned point buffer shared by every track of one analysis.
#[derive(Clone, Debug, Default)]
pub struct TrackArena {
    points: Vec<TrackPoint>,
}

impl TrackArena {
    fn push(&mut self, point: TrackPoint) -> usize {
        self.points.push(point);
        self.points.len() - 1
    }

    fn truncate(&mut self, len: usize) {
        self.points.truncate(len);
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn span(&self, span: TrackSpan) -> &[TrackPoint] {
        &self.points[span.start..span.end]
    }

    fn tail(&self, start: usize) -> &[TrackPoint] {
        &self.points[start..]
    }
}

/// A closed track: `arena[start..end]`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TrackSpan {
    pub start: usize,
    pub end: usize,
}

impl TrackSpan {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.end == self.start
    }
}

/// Lifecycle of the current candidate track.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TrackState {
    NoTrack,
    /// Collecting gated hits; points live at `arena[start..]`.
    Tentative { start: usize, hits: usize },
    /// Accepted; `missed` consecutive frames bridged so far.
    Confirmed { start: usize, missed: u32 },
    /// The last track closed; behaves like `NoTrack` for the next frame.
    Closed,
}

/// What one frame means for the current track.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum FrameEvent {
    /// A candidate within the gate (or any candidate when no track is open).
    Hit(TrackPoint),
    /// Tentative track only: every candidate was outside the gate; start over here.
    Restart(TrackPoint),
    Miss,
}

/// The accepted trajectory.
#[derive(Clone, Debug, PartialEq)]
pub struct Track {
    pub points: Vec<TrackPoint>,
}

impl Track {
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Straight-line distance from first to last point.
    pub fn displacement_px(&self) -> f64 {
        match (self.points.first(), self.points.last()) {
            (Some(first), Some(last)) => first.distance_to(last),
            _ => 0.0,
        }
    }
}

pub struct Tracker {
    settings: TrackerSettings,
    state: TrackState,
    arena: TrackArena,
    closed: Vec<TrackSpan>,
    last_frame: Option<u64>,
    ball_detections: usize,
}

impl Tracker {
    pub fn new(settings: TrackerSettings) -> Self {
        Self {
            settings,
            state: TrackState::NoTrack,
            arena: TrackArena::default(),
            closed: Vec::new(),
            last_frame: None,
            ball_detections: 0,
        }
    }

    pub fn state(&self) -> TrackState {
        self.state
    }

    /// Feed one frame. Frames must arrive in strictly increasing index order.
    pub fn observe(&mut self, frame: &FrameDetections) {
        if self.last_frame.is_some_and(|last| frame.index <= last) {
            log::warn!(
                "tracker: ignoring out-of-order frame {} (last {:?})",
                frame.index,
                self.last_frame
            );
            return;
        }
        self.last_frame = Some(frame.index);

        let candidates: Vec<TrackPoint> = frame
            .of_class(ObjectClass::Ball)
            .filter(|d| self.plausible_ball(d))
            .map(|d| TrackPoint::from_detection(frame.index, d))
            .collect();
        self.ball_detections += candidates.len();

        let event = self.match_frame(frame.index, &candidates);
        self.state = self.transition(self.state, event);
    }

    /// End of sequence: close a confirmed track, drop a tentative one.
    pub fn finish(mut self) -> TrackSummary {
        match self.state {
            TrackState::Confirmed { start, .. } => self.close(start),
            TrackState::Tentative { start, .. } => self.arena.truncate(start),
            TrackState::NoTrack | TrackState::Closed => {}
        }
        self.state = TrackState::Closed;

        log::info!(
            "tracker: {} ball detections, {} confirmed tracks {:?}",
            self.ball_detections,
            self.closed.len(),
            self.closed.iter().map(TrackSpan::len).collect::<Vec<_>>()
        );

        TrackSummary {
            arena: self.arena,
            tracks: self.closed,
            ball_detections: self.ball_detections,
        }
    }

    fn plausible_ball(&self, detection: &Detection) -> bool {
        let (min, max) = (self.settings.min_ball_px, self.settings.max_ball_px);
        let bbox = detection.bbox;
        bbox.width > min && bbox.width < max && bbox.height > min && bbox.height < max
    }

    fn match_frame(&self, frame: u64, candidates: &[TrackPoint]) -> FrameEvent {
        let open = match self.state {
            TrackState::Tentative { start, .. } | TrackState::Confirmed { start, .. } => start,
            TrackState::NoTrack | TrackState::Closed => {
                return strongest(candidates).map_or(FrameEvent::Miss, FrameEvent::Hit);
            }
        };

        let Some(predicted) = predict(self.arena.tail(open), frame) else {
            return FrameEvent::Miss;
        };
        let closest = candidates
            .iter()
            .map(|c| (c, c.distance_to(&predicted)))
            .min_by(|a, b| a.1.total_cmp(&b.1));

        match closest {
            Some((point, distance)) if distance <= self.settings.gate_px => FrameEvent::Hit(*point),
            Some((point, _)) if matches!(self.state, TrackState::Tentative { .. }) => {
                FrameEvent::Restart(*point)
            }
            _ => FrameEvent::Miss,
        }
    }

    /// Apply `event` to `state`, updating the arena.
    fn transition(&mut self, state: TrackState, event: FrameEvent) -> TrackState {
        let confirm_hits = self.settings.confirm_hits.max(1);
        match (state, event) {
            (TrackState::NoTrack | TrackState::Closed, FrameEvent::Hit(point))
            | (TrackState::NoTrack | TrackState::Closed, FrameEvent::Restart(point)) => {
                let start = self.arena.push(point);
                self.after_hit(start, 1, confirm_hits)
            }
            (TrackState::NoTrack | TrackState::Closed, FrameEvent::Miss) => TrackState::NoTrack,

            (TrackState::Tentative { start, hits }, FrameEvent::Hit(point)) => {
                self.arena.push(point);
                self.after_hit(start, hits + 1, confirm_hits)
            }
            (TrackState::Tentative { start, .. }, FrameEvent::Restart(point)) => {
                self.arena.truncate(start);
                let start = self.arena.push(point);
                self.after_hit(start, 1, confirm_hits)
            }
            (TrackState::Tentative { start, .. }, FrameEvent::Miss) => {
                self.arena.truncate(start);
                TrackState::NoTrack
            }

            (TrackState::Confirmed { start, .. }, FrameEvent::Hit(point)) => {
                self.arena.push(point);
                TrackState::Confirmed { start, missed: 0 }
            }
            (TrackState::Confirmed { start, missed }, FrameEvent::Miss)
            | (TrackState::Confirmed { start, missed }, FrameEvent::Restart(_)) => {
                if missed + 1 > self.settings.max_missed {
                    self.close(start);
                    TrackState::Closed
                } else {
                    TrackState::Confirmed {
                        start,
                        missed: missed + 1,
                    }
                }
            }
        }
    }

    fn after_hit(&self, start: usize, hits: usize, confirm_hits: usize) -> TrackState {
        if hits >= confirm_hits {
            TrackState::Confirmed { start, missed: 0 }
        } else {
            TrackState::Tentative { start, hits }
        }
    }

    fn close(&mut self, start: usize) {
        let span = TrackSpan {
            start,
            end: self.arena.len(),
        };
        if !span.is_empty() {
            log::debug!("tracker: closed track of {} points", span.len());
            self.closed.push(span);
        }
    }
}

/// Highest-confidence candidate; the earliest wins ties.
fn strongest(candidates: &[TrackPoint]) -> Option<TrackPoint> {
    candidates
        .iter()
        .copied()
        .reduce(|best, c| if c.confidence > best.confidence { c } else { best })
}

/// Constant-velocity prediction at `frame` from the last two points of `points`.
fn predict(points: &[TrackPoint], frame: u64) -> Option<TrackPoint> {
    let last = *points.last()?;
    let Some(prev) = points.len().checked_sub(2).map(|i| points[i]) else {
        return Some(TrackPoint { frame, ..last });
    };
    let span = (last.frame - prev.frame) as f64;
    let ahead = frame.saturating_sub(last.frame) as f64;
    Some(TrackPoint {
        frame,
        x: last.x + (last.x - prev.x) / span * ahead,
        y: last.y + (last.y - prev.y) / span * ahead,
        confidence: last.confidence,
    })
}

/// Everything the tracker produced for one analysis.
#[derive(Clone, Debug)]
pub struct TrackSummary {
    pub arena: TrackArena,
    /// Confirmed tracks in closing order.
    pub tracks: Vec<TrackSpan>,
    /// Plausible ball detections seen across all frames.
    pub ball_detections: usize,
}

impl TrackSummary {
    /// The longest confirmed track that moved and is not implausibly long.
    pub fn best_track(&self, settings: &TrackerSettings) -> Result<Track, AnalysisError> {
        let longest = self.tracks.iter().map(TrackSpan::len).max().unwrap_or(0);

        let mut best: Option<&[TrackPoint]> = None;
        for span in &self.tracks {
            let points = self.arena.span(*span);
            let moved = match (points.first(), points.last()) {
                (Some(first), Some(last)) => first.distance_to(last) >= settings.min_displacement_px,
                _ => false,
            };
            let bounded = settings
                .max_track_frames
                .map_or(true, |max| points.len() <= max);
            if moved && bounded && best.map_or(true, |b| points.len() > b.len()) {
                best = Some(points);
            }
        }

        match best {
            Some(points) => Ok(Track {
                points: points.to_vec(),
            }),
            None => Err(AnalysisError::insufficient(
                longest,
                format!(
                    "{} ball detections, longest confirmed track {} frames",
                    self.ball_detections, longest
                ),
            )),
        }
    }
}
