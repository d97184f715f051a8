/// Object classes the pipeline cares about.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ObjectClass {
    Ball,
    Mitt,
}

/// Axis-aligned box in pixel space. `(x, y)` is the top-left corner.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Build from corner coordinates (`x1, y1, x2, y2`).
    pub fn from_corners(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self {
            x: x1.min(x2),
            y: y1.min(y2),
            width: (x2 - x1).abs(),
            height: (y2 - y1).abs(),
        }
    }

    pub fn center(&self) -> (f64, f64) {
        (
            self.x as f64 + self.width as f64 / 2.0,
            self.y as f64 + self.height as f64 / 2.0,
        )
    }
}

/// One candidate object in one frame.
#[derive(Clone, Debug, PartialEq)]
pub struct Detection {
    pub class: ObjectClass,
    pub bbox: BoundingBox,
    /// Backend score in `0..=1`.
    pub confidence: f32,
}

impl Detection {
    pub fn ball(bbox: BoundingBox, confidence: f32) -> Self {
        Self {
            class: ObjectClass::Ball,
            bbox,
            confidence,
        }
    }

    pub fn mitt(bbox: BoundingBox, confidence: f32) -> Self {
        Self {
            class: ObjectClass::Mitt,
            bbox,
            confidence,
        }
    }
}

/// Detections for one frame, stamped with its position in throw order.
#[derive(Clone, Debug, PartialEq)]
pub struct FrameDetections {
    /// 0-based index in throw-first order.
    pub index: u64,
    /// Real elapsed seconds since frame 0.
    pub timestamp_s: f64,
    pub frame_width: u32,
    pub frame_height: u32,
    pub detections: Vec<Detection>,
}

impl FrameDetections {
    pub fn of_class(&self, class: ObjectClass) -> impl Iterator<Item = &Detection> + '_ {
        self.detections.iter().filter(move |d| d.class == class)
    }
}
