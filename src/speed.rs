//! Physical speed from a track, a scale and a time base.

use serde::Deserialize;

use crate::error::AnalysisError;
use crate::sequence::TimeBase;
use crate::tracker::{Track, TrackPoint};

pub const KMH_PER_MPS: f64 = 3.6;
pub const MPH_PER_KMH: f64 = 0.621371;

/// How per-pair speeds are reduced to one number.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Aggregation {
    /// Mean after dropping `trim_fraction` of pairs from each end.
    #[default]
    TrimmedMean,
    /// Mean of the fastest half of the top 75% of pairs.
    PeakMean,
}

/// Speed settings (`[speed]` in the config file).
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct SpeedSettings {
    pub aggregation: Aggregation,
    pub trim_fraction: f64,
    /// Results outside this km/h range carry a calibration warning.
    pub plausible_min_kmh: f64,
    pub plausible_max_kmh: f64,
}

impl Default for SpeedSettings {
    fn default() -> Self {
        Self {
            aggregation: Aggregation::TrimmedMean,
            trim_fraction: 0.2,
            plausible_min_kmh: 10.0,
            plausible_max_kmh: 200.0,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct SpeedEstimate {
    pub speed_kmh: f64,
    pub speed_mph: f64,
    /// Pairs that contributed to the aggregate.
    pub pairs_used: usize,
    pub tracking_duration_ms: f64,
    pub warning: Option<String>,
}

/// Speed in m/s between two track points.
pub fn pair_speed_mps(
    a: &TrackPoint,
    b: &TrackPoint,
    scale_factor: f64,
    time: &TimeBase,
) -> Option<f64> {
    let elapsed = time.elapsed(a.frame, b.frame);
    if elapsed <= 0.0 {
        return None;
    }
    let speed = a.distance_to(b) * scale_factor / elapsed;
    speed.is_finite().then_some(speed)
}

pub fn estimate(
    track: &Track,
    scale_factor: f64,
    time: &TimeBase,
    settings: &SpeedSettings,
) -> Result<SpeedEstimate, AnalysisError> {
    let speeds: Vec<f64> = track
        .points
        .windows(2)
        .filter_map(|pair| pair_speed_mps(&pair[0], &pair[1], scale_factor, time))
        .collect();

    let (kept, needed) = match settings.aggregation {
        Aggregation::TrimmedMean => (trimmed(speeds.clone(), settings.trim_fraction), 2),
        Aggregation::PeakMean => (peak(speeds.clone()), 1),
    };
    if speeds.len() < 2 || kept.len() < needed {
        return Err(AnalysisError::insufficient(
            track.len(),
            format!(
                "only {} usable speed samples from a {}-point track",
                kept.len(),
                track.len()
            ),
        ));
    }

    let mean_mps = kept.iter().sum::<f64>() / kept.len() as f64;
    let speed_kmh = mean_mps * KMH_PER_MPS;
    let speed_mph = speed_kmh * MPH_PER_KMH;

    let tracking_duration_ms = match (track.points.first(), track.points.last()) {
        (Some(first), Some(last)) => time.elapsed(first.frame, last.frame) * 1000.0,
        _ => 0.0,
    };

    log::info!(
        "speed: {:.1} km/h from {} of {} pairs ({:?}), tracked {:.0} ms",
        speed_kmh,
        kept.len(),
        speeds.len(),
        settings.aggregation,
        tracking_duration_ms
    );

    let warning = (speed_kmh < settings.plausible_min_kmh
        || speed_kmh > settings.plausible_max_kmh)
        .then(|| {
            format!(
                "Measured {:.1} km/h is outside the usual {:.0}-{:.0} km/h range; the scale or slow-motion factor may be wrong.",
                speed_kmh, settings.plausible_min_kmh, settings.plausible_max_kmh
            )
        });

    Ok(SpeedEstimate {
        speed_kmh,
        speed_mph,
        pairs_used: kept.len(),
        tracking_duration_ms,
        warning,
    })
}

fn trimmed(mut speeds: Vec<f64>, fraction: f64) -> Vec<f64> {
    speeds.sort_by(f64::total_cmp);
    let cut = (speeds.len() as f64 * fraction).floor() as usize;
    if cut * 2 >= speeds.len() {
        return Vec::new();
    }
    speeds[cut..speeds.len() - cut].to_vec()
}

fn peak(mut speeds: Vec<f64>) -> Vec<f64> {
    if speeds.len() < 2 {
        return speeds;
    }
    speeds.sort_by(|a, b| b.total_cmp(a));
    let top = ((speeds.len() as f64 * 0.75) as usize).max(1);
    let threshold = speeds[top - 1];
    let fast: Vec<f64> = speeds.into_iter().filter(|s| *s >= threshold).collect();
    let half = (fast.len() / 2).max(1);
    fast[..half].to_vec()
}
