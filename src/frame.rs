//! Decoded frames and the restricted view detectors receive.
//!
//! - `Frame`: owned RGB24 buffer plus dimensions and storage index. Bytes are private.
//! - `InferenceView`: borrowed view handed to a `DetectorBackend` for one `detect` call.
//!
//! A frame lives from decode until its detections are produced, then it is dropped.
//! Nothing downstream of the detector holds pixel data.

use anyhow::{anyhow, Result};

/// Decoded RGB24 frame. There is no `Clone`; a frame is consumed once.
pub struct Frame {
    data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Position in decode (storage) order, starting at 0.
    pub index: u64,
}

impl Frame {
    /// Wrap a tightly packed RGB24 buffer. Called by the ingestion layer.
    pub fn new(data: Vec<u8>, width: u32, height: u32, index: u64) -> Result<Self> {
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|v| v.checked_mul(3))
            .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
        if data.len() != expected {
            return Err(anyhow!(
                "RGB frame length mismatch: expected {}, got {}",
                expected,
                data.len()
            ));
        }
        Ok(Self {
            data,
            width,
            height,
            index,
        })
    }

    pub fn inference_view(&self) -> InferenceView<'_> {
        InferenceView { frame: self }
    }

    pub(crate) fn byte_len(&self) -> usize {
        self.data.len()
    }
}

/// Read-only view of a frame for a single detection call.
pub struct InferenceView<'a> {
    frame: &'a Frame,
}

impl<'a> InferenceView<'a> {
    pub fn width(&self) -> u32 {
        self.frame.width
    }

    pub fn height(&self) -> u32 {
        self.frame.height
    }

    pub fn index(&self) -> u64 {
        self.frame.index
    }

    /// Tightly packed RGB24 rows, `width * height * 3` bytes.
    pub fn pixels(&self) -> &'a [u8] {
        &self.frame.data
    }

    /// RGB triple at `(x, y)`, or `None` outside the frame.
    pub fn rgb(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        if x >= self.frame.width || y >= self.frame.height {
            return None;
        }
        let offset = ((y as usize) * (self.frame.width as usize) + x as usize) * 3;
        let px = self.frame.data.get(offset..offset + 3)?;
        Some([px[0], px[1], px[2]])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_mismatched_buffer() {
        assert!(Frame::new(vec![0u8; 10], 2, 2, 0).is_err());
    }

    #[test]
    fn view_exposes_pixels_by_coordinate() -> Result<()> {
        let mut data = vec![0u8; 2 * 2 * 3];
        data[9..12].copy_from_slice(&[1, 2, 3]);
        let frame = Frame::new(data, 2, 2, 7)?;
        let view = frame.inference_view();

        assert_eq!(view.index(), 7);
        assert_eq!(view.rgb(1, 1), Some([1, 2, 3]));
        assert_eq!(view.rgb(2, 0), None);
        assert_eq!(frame.byte_len(), 12);
        Ok(())
    }
}
