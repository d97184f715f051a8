use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::path::Path;

use crate::calibrate::{CalibrationSettings, FallbackScale};
use crate::detect::DetectorSettings;
use crate::sequence::{SequenceOrder, SequenceSettings};
use crate::speed::SpeedSettings;
use crate::tracker::TrackerSettings;

const DEFAULT_ADDR: &str = "127.0.0.1:8000";
const DEFAULT_ALLOWED_ORIGIN: &str = "http://localhost:3000";
const DEFAULT_MAX_UPLOAD_BYTES: usize = 512 * 1024 * 1024;

/// HTTP server settings (`[server]` in the config file).
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerSettings {
    pub addr: String,
    /// Origins echoed in `Access-Control-Allow-Origin`. `*` allows any.
    pub allowed_origins: Vec<String>,
    pub max_upload_bytes: usize,
    /// Seconds to wait for request headers and body chunks.
    pub read_timeout_secs: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            addr: DEFAULT_ADDR.to_string(),
            allowed_origins: vec![DEFAULT_ALLOWED_ORIGIN.to_string()],
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            read_timeout_secs: 30,
        }
    }
}

/// Complete analyzer configuration.
///
/// Sources, in increasing priority: built-in defaults, the TOML file named by
/// `BALLSPEED_CONFIG`, `BALLSPEED_*` environment variables.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct AnalyzerConfig {
    pub server: ServerSettings,
    pub detector: DetectorSettings,
    pub sequence: SequenceSettings,
    pub tracker: TrackerSettings,
    pub calibration: CalibrationSettings,
    pub speed: SpeedSettings,
}

impl AnalyzerConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("BALLSPEED_CONFIG").ok();
        let mut cfg = match config_path.as_deref() {
            Some(path) if !path.trim().is_empty() => Self::from_file(Path::new(path))?,
            _ => Self::default(),
        };
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        Self::from_toml(&raw).with_context(|| format!("invalid config file {}", path.display()))
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    pub fn apply_env(&mut self) -> Result<()> {
        if let Some(addr) = env_value("BALLSPEED_ADDR") {
            self.server.addr = addr;
        }
        if let Some(origins) = env_value("BALLSPEED_ALLOWED_ORIGINS") {
            let parsed = split_csv(&origins);
            if !parsed.is_empty() {
                self.server.allowed_origins = parsed;
            }
        }
        if let Some(factor) = env_value("BALLSPEED_SLOWMO_FACTOR") {
            let factor: f64 = factor
                .parse()
                .map_err(|_| anyhow!("BALLSPEED_SLOWMO_FACTOR must be a number"))?;
            self.sequence.slowmo_factor = Some(factor);
        }
        if let Some(order) = env_value("BALLSPEED_SEQUENCE_ORDER") {
            self.sequence.order = order
                .parse::<SequenceOrder>()
                .map_err(|e| anyhow!("BALLSPEED_SEQUENCE_ORDER: {}", e))?;
        }
        if let Some(size) = env_value("BALLSPEED_MITT_SIZE_M") {
            self.calibration.mitt_size_m = size
                .parse()
                .map_err(|_| anyhow!("BALLSPEED_MITT_SIZE_M must be a number of meters"))?;
        }
        if let Some(backend) = env_value("BALLSPEED_BACKEND") {
            self.detector.backend = backend;
        }
        if let Some(path) = env_value("BALLSPEED_MODEL_PATH") {
            self.detector.model_path = Some(path);
        }
        if let Some(workers) = env_value("BALLSPEED_WORKERS") {
            self.detector.workers = workers
                .parse()
                .map_err(|_| anyhow!("BALLSPEED_WORKERS must be a positive integer"))?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let positive = |name: &str, value: f64| {
            if value.is_finite() && value > 0.0 {
                Ok(())
            } else {
                Err(anyhow!("{} must be greater than zero (got {})", name, value))
            }
        };
        let unit = |name: &str, value: f32| {
            if (0.0..=1.0).contains(&value) {
                Ok(())
            } else {
                Err(anyhow!("{} must be within 0..=1 (got {})", name, value))
            }
        };

        if self.server.addr.trim().is_empty() {
            return Err(anyhow!("server.addr must not be empty"));
        }
        if self.server.max_upload_bytes == 0 {
            return Err(anyhow!("server.max_upload_bytes must be greater than zero"));
        }

        unit("detector.ball_confidence", self.detector.ball_confidence)?;
        unit("detector.mitt_confidence", self.detector.mitt_confidence)?;
        if self.detector.workers == 0 {
            return Err(anyhow!("detector.workers must be at least 1"));
        }
        if self.detector.input_width == 0 || self.detector.input_height == 0 {
            return Err(anyhow!("detector input size must be non-zero"));
        }

        if let Some(factor) = self.sequence.slowmo_factor {
            positive("sequence.slowmo_factor", factor)?;
        }

        if self.tracker.confirm_hits == 0 {
            return Err(anyhow!("tracker.confirm_hits must be at least 1"));
        }
        positive("tracker.gate_px", self.tracker.gate_px)?;
        if self.tracker.min_ball_px >= self.tracker.max_ball_px {
            return Err(anyhow!("tracker.min_ball_px must be below tracker.max_ball_px"));
        }

        positive("calibration.mitt_size_m", self.calibration.mitt_size_m)?;
        if self.calibration.window_frames == 0 || self.calibration.min_samples == 0 {
            return Err(anyhow!(
                "calibration.window_frames and calibration.min_samples must be at least 1"
            ));
        }
        if self.calibration.min_scale >= self.calibration.max_scale {
            return Err(anyhow!("calibration.min_scale must be below calibration.max_scale"));
        }
        if let FallbackScale::Fixed { scale_factor } = self.calibration.fallback {
            positive("calibration.fallback.scale_factor", scale_factor)?;
        }

        if !(0.0..0.5).contains(&self.speed.trim_fraction) {
            return Err(anyhow!(
                "speed.trim_fraction must be within [0, 0.5) (got {})",
                self.speed.trim_fraction
            ));
        }
        Ok(())
    }
}

fn env_value(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .filter(|value| !value.trim().is_empty())
}

pub fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|entry| entry.trim())
        .filter(|entry| !entry.is_empty())
        .map(|entry| entry.to_string())
        .collect()
}
