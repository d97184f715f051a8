//! Synthetic clips for tests and demos.
//!
//! A clip is the magic line `BSYN1` followed by a JSON `SyntheticClip`. Frames
//! are rendered on demand: dark background, a leather-brown mitt rectangle and
//! a white ball disc moving at a constant per-frame step.

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

use super::file::VideoMeta;
use crate::frame::Frame;

pub const SYNTHETIC_MAGIC: &[u8] = b"BSYN1\n";

const BACKGROUND_RGB: [u8; 3] = [30, 30, 30];
const MITT_RGB: [u8; 3] = [140, 70, 20];
const BALL_RGB: [u8; 3] = [245, 245, 245];

const MAX_PIXELS: u64 = 4096 * 4096;
const MAX_FRAMES: u64 = 100_000;
const MAX_COORD: i64 = 1_000_000;
const MAX_RADIUS: u32 = 1_000;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SyntheticClip {
    pub fps: f64,
    pub width: u32,
    pub height: u32,
    pub frames: u64,
    #[serde(default)]
    pub capture_fps: Option<f64>,
    #[serde(default)]
    pub ball: Option<BallPath>,
    #[serde(default)]
    pub mitt: Option<MittPatch>,
}

/// Ball drawn at `start + step * (frame - first_frame)` for frames in
/// `first_frame..=last_frame`, except those listed in `hidden`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct BallPath {
    pub start: [i64; 2],
    pub step: [i64; 2],
    pub radius: u32,
    pub first_frame: u64,
    pub last_frame: u64,
    #[serde(default)]
    pub hidden: Vec<u64>,
}

/// Static mitt rectangle, visible in every frame.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct MittPatch {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl SyntheticClip {
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut bytes = SYNTHETIC_MAGIC.to_vec();
        serde_json::to_writer(&mut bytes, self).context("encode synthetic clip")?;
        Ok(bytes)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let body = bytes
            .strip_prefix(SYNTHETIC_MAGIC)
            .ok_or_else(|| anyhow!("missing synthetic clip header"))?;
        let clip: Self = serde_json::from_slice(body).context("invalid synthetic clip")?;
        clip.validate()?;
        Ok(clip)
    }

    /// Reject clips whose geometry cannot be rendered in bounded memory.
    pub fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(anyhow!("synthetic clip has zero size"));
        }
        let pixels = u64::from(self.width) * u64::from(self.height);
        if pixels > MAX_PIXELS {
            return Err(anyhow!(
                "synthetic clip {}x{} exceeds {} pixels",
                self.width,
                self.height,
                MAX_PIXELS
            ));
        }
        if self.frames > MAX_FRAMES {
            return Err(anyhow!(
                "synthetic clip has {} frames (max {})",
                self.frames,
                MAX_FRAMES
            ));
        }
        if let Some(mitt) = &self.mitt {
            let right = u64::from(mitt.x) + u64::from(mitt.width);
            let bottom = u64::from(mitt.y) + u64::from(mitt.height);
            if right > u64::from(self.width) || bottom > u64::from(self.height) {
                return Err(anyhow!("synthetic mitt lies outside the frame"));
            }
        }
        if let Some(ball) = &self.ball {
            let in_range = |v: i64| (-MAX_COORD..=MAX_COORD).contains(&v);
            if !ball.start.iter().chain(ball.step.iter()).all(|v| in_range(*v)) {
                return Err(anyhow!("synthetic ball path coordinates out of range"));
            }
            if ball.radius > MAX_RADIUS {
                return Err(anyhow!("synthetic ball radius {} too large", ball.radius));
            }
        }
        Ok(())
    }

    /// Ball center in frame `index`, if drawn.
    pub fn ball_center(&self, index: u64) -> Option<(i64, i64)> {
        let ball = self.ball.as_ref()?;
        if index < ball.first_frame || index > ball.last_frame || ball.hidden.contains(&index) {
            return None;
        }
        let t = i64::try_from(index - ball.first_frame).ok()?;
        let x = ball.step[0].checked_mul(t)?.checked_add(ball.start[0])?;
        let y = ball.step[1].checked_mul(t)?.checked_add(ball.start[1])?;
        Some((x, y))
    }

    fn render(&self, index: u64) -> Vec<u8> {
        let (w, h) = (i64::from(self.width), i64::from(self.height));
        let mut data = BACKGROUND_RGB.repeat(self.width as usize * self.height as usize);

        let mut put = |x: i64, y: i64, rgb: [u8; 3]| {
            if (0..w).contains(&x) && (0..h).contains(&y) {
                let o = ((y * w + x) * 3) as usize;
                data[o..o + 3].copy_from_slice(&rgb);
            }
        };

        if let Some(mitt) = &self.mitt {
            let bottom = mitt.y.saturating_add(mitt.height).min(self.height);
            let right = mitt.x.saturating_add(mitt.width).min(self.width);
            for y in mitt.y..bottom {
                for x in mitt.x..right {
                    put(i64::from(x), i64::from(y), MITT_RGB);
                }
            }
        }

        if let (Some((cx, cy)), Some(ball)) = (self.ball_center(index), &self.ball) {
            let r = i64::from(ball.radius);
            for y in cy - r..=cy + r {
                for x in cx - r..=cx + r {
                    if (x - cx).pow(2) + (y - cy).pow(2) <= r * r {
                        put(x, y, BALL_RGB);
                    }
                }
            }
        }

        data
    }
}

pub(crate) struct SyntheticSource {
    clip: SyntheticClip,
}

impl SyntheticSource {
    pub(crate) fn new(clip: SyntheticClip) -> Self {
        Self { clip }
    }

    pub(crate) fn meta(&self) -> VideoMeta {
        let duration_s = if self.clip.fps > 0.0 {
            self.clip.frames as f64 / self.clip.fps
        } else {
            0.0
        };
        VideoMeta {
            fps: self.clip.fps,
            total_frames: self.clip.frames,
            width: self.clip.width,
            height: self.clip.height,
            duration_s,
            capture_fps: self.clip.capture_fps,
        }
    }

    pub(crate) fn next_frame(&mut self, index: u64) -> Result<Option<Frame>> {
        if index >= self.clip.frames {
            return Ok(None);
        }
        let pixels = self.clip.render(index);
        Frame::new(pixels, self.clip.width, self.clip.height, index).map(Some)
    }
}
