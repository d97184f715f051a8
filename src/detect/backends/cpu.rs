use anyhow::Result;

use crate::detect::backend::{DetectionCapability, DetectorBackend};
use crate::detect::result::{BoundingBox, Detection, ObjectClass};
use crate::frame::InferenceView;

const BALL_MIN_CHANNEL: u8 = 200;
const BALL_MIN_AREA: usize = 9;
const MITT_MIN_AREA: usize = 64;

/// CPU backend: color segmentation into connected blobs.
///
/// Near-white blobs are reported as balls, saturated leather-brown blobs as
/// mitts. Confidence grows with how well the blob fills its bounding box.
/// Good enough for plain backgrounds and the synthetic clips; real footage
/// should use a trained model backend.
#[derive(Clone, Debug, Default)]
pub struct CpuBackend;

impl CpuBackend {
    pub fn new() -> Self {
        Self
    }
}

impl DetectorBackend for CpuBackend {
    fn name(&self) -> &'static str {
        "cpu"
    }

    fn supports(&self, capability: DetectionCapability) -> bool {
        matches!(
            capability,
            DetectionCapability::Ball | DetectionCapability::Mitt
        )
    }

    fn detect(&self, view: &InferenceView<'_>) -> Result<Vec<Detection>> {
        let width = view.width() as usize;
        let height = view.height() as usize;
        let pixels = view.pixels();

        let mut classes = Vec::with_capacity(width * height);
        for px in pixels.chunks_exact(3) {
            classes.push(classify_pixel(px[0], px[1], px[2]));
        }

        let mut visited = vec![false; classes.len()];
        let mut stack = Vec::new();
        let mut detections = Vec::new();

        for start in 0..classes.len() {
            let Some(class) = classes[start] else {
                continue;
            };
            if visited[start] {
                continue;
            }

            let mut blob = Blob::new(start % width, start / width);
            visited[start] = true;
            stack.push(start);
            while let Some(idx) = stack.pop() {
                let (x, y) = (idx % width, idx / width);
                blob.add(x, y);
                for (nx, ny) in neighbors(x, y, width, height) {
                    let n = ny * width + nx;
                    if !visited[n] && classes[n] == Some(class) {
                        visited[n] = true;
                        stack.push(n);
                    }
                }
            }

            let min_area = match class {
                ObjectClass::Ball => BALL_MIN_AREA,
                ObjectClass::Mitt => MITT_MIN_AREA,
            };
            if blob.area >= min_area {
                detections.push(blob.into_detection(class));
            }
        }

        Ok(detections)
    }
}

fn classify_pixel(r: u8, g: u8, b: u8) -> Option<ObjectClass> {
    if r >= BALL_MIN_CHANNEL && g >= BALL_MIN_CHANNEL && b >= BALL_MIN_CHANNEL {
        return Some(ObjectClass::Ball);
    }
    let leather = (90..=200).contains(&r)
        && (30..=120).contains(&g)
        && b <= 70
        && r >= g.saturating_add(40);
    leather.then_some(ObjectClass::Mitt)
}

fn neighbors(
    x: usize,
    y: usize,
    width: usize,
    height: usize,
) -> impl Iterator<Item = (usize, usize)> {
    let left = (x > 0).then(|| (x - 1, y));
    let right = (x + 1 < width).then(|| (x + 1, y));
    let up = (y > 0).then(|| (x, y - 1));
    let down = (y + 1 < height).then(|| (x, y + 1));
    [left, right, up, down].into_iter().flatten()
}

struct Blob {
    min_x: usize,
    min_y: usize,
    max_x: usize,
    max_y: usize,
    area: usize,
}

impl Blob {
    fn new(x: usize, y: usize) -> Self {
        Self {
            min_x: x,
            min_y: y,
            max_x: x,
            max_y: y,
            area: 0,
        }
    }

    fn add(&mut self, x: usize, y: usize) {
        self.min_x = self.min_x.min(x);
        self.min_y = self.min_y.min(y);
        self.max_x = self.max_x.max(x);
        self.max_y = self.max_y.max(y);
        self.area += 1;
    }

    fn into_detection(self, class: ObjectClass) -> Detection {
        // extents are inclusive pixel indices
        let bbox = BoundingBox::from_corners(
            self.min_x as f32,
            self.min_y as f32,
            (self.max_x + 1) as f32,
            (self.max_y + 1) as f32,
        );
        let fill = self.area as f32 / (bbox.width * bbox.height);
        Detection {
            class,
            bbox,
            confidence: (0.4 + 0.6 * fill).min(1.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Frame;

    fn paint(data: &mut [u8], width: usize, x0: usize, y0: usize, w: usize, h: usize, rgb: [u8; 3]) {
        for y in y0..y0 + h {
            for x in x0..x0 + w {
                let o = (y * width + x) * 3;
                data[o..o + 3].copy_from_slice(&rgb);
            }
        }
    }

    #[test]
    fn finds_ball_and_mitt_blobs() {
        let (w, h) = (64usize, 48usize);
        let mut data = vec![30u8; w * h * 3];
        paint(&mut data, w, 5, 6, 4, 4, [250, 250, 250]);
        paint(&mut data, w, 30, 10, 10, 12, [140, 70, 20]);
        let frame = Frame::new(data, w as u32, h as u32, 0).unwrap();

        let mut detections = CpuBackend::new().detect(&frame.inference_view()).unwrap();
        detections.sort_by(|a, b| a.bbox.x.total_cmp(&b.bbox.x));

        assert_eq!(detections.len(), 2);
        assert_eq!(detections[0].class, ObjectClass::Ball);
        assert_eq!(detections[0].bbox, BoundingBox::new(5.0, 6.0, 4.0, 4.0));
        assert_eq!(detections[1].class, ObjectClass::Mitt);
        assert_eq!(detections[1].bbox, BoundingBox::new(30.0, 10.0, 10.0, 12.0));
        assert_eq!(detections[1].confidence, 1.0);
    }

    #[test]
    fn ignores_specks_and_background() {
        let (w, h) = (16usize, 16usize);
        let mut data = vec![30u8; w * h * 3];
        paint(&mut data, w, 2, 2, 2, 2, [255, 255, 255]);
        let frame = Frame::new(data, w as u32, h as u32, 0).unwrap();

        assert!(CpuBackend::new()
            .detect(&frame.inference_view())
            .unwrap()
            .is_empty());
    }
}
