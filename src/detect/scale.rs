use anyhow::{anyhow, Result};
use image::imageops::{self, FilterType};

use crate::detect::result::Detection;
use crate::frame::Frame;

/// Factor `s` in (0, 1] by which frames are shrunk before detection.
///
/// Corners found on the shrunk copy are divided by `s` before compositing,
/// which always works on the full-resolution frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DetectionScale(f64);

impl DetectionScale {
    pub const FULL: Self = Self(1.0);

    pub fn new(factor: f64) -> Result<Self> {
        if !(factor > 0.0 && factor <= 1.0) {
            return Err(anyhow!(
                "detection scale must be in (0, 1], got {}",
                factor
            ));
        }
        Ok(Self(factor))
    }

    pub fn factor(&self) -> f64 {
        self.0
    }

    pub fn is_full(&self) -> bool {
        self.0 == 1.0
    }

    /// Shrunk copy of `frame` for the detector, or `None` at full scale.
    pub fn downscale(&self, frame: &Frame) -> Option<Frame> {
        if self.is_full() {
            return None;
        }
        let width = ((f64::from(frame.width) * self.0).round() as u32).max(1);
        let height = ((f64::from(frame.height) * self.0).round() as u32).max(1);
        let small = imageops::resize(&frame.to_rgb_image(), width, height, FilterType::Triangle);
        Some(frame.derive(small))
    }

    /// Convert detector output back to full-frame coordinates.
    pub fn to_full_resolution(&self, detections: &[Detection]) -> Vec<Detection> {
        detections
            .iter()
            .map(|d| d.to_full_resolution(self.0))
            .collect()
    }
}

impl Default for DetectionScale {
    fn default() -> Self {
        Self::FULL
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{Point, Quad};

    #[test]
    fn rejects_out_of_range_factors() {
        assert!(DetectionScale::new(0.0).is_err());
        assert!(DetectionScale::new(-0.5).is_err());
        assert!(DetectionScale::new(1.5).is_err());
        assert!(DetectionScale::new(f64::NAN).is_err());
        assert!(DetectionScale::new(1.0).unwrap().is_full());
    }

    #[test]
    fn full_scale_makes_no_copy() {
        let frame = Frame::filled(10, 10, [1, 2, 3], 0);
        assert!(DetectionScale::FULL.downscale(&frame).is_none());
    }

    #[test]
    fn downscale_keeps_sequence() {
        let frame = Frame::filled(200, 100, [9, 9, 9], 17);
        let small = DetectionScale::new(0.5).unwrap().downscale(&frame).unwrap();
        assert_eq!((small.width, small.height), (100, 50));
        assert_eq!(small.sequence, 17);
        assert_eq!(small.pixel(10, 10), Some([9, 9, 9]));
    }

    #[test]
    fn corner_on_half_scale_frame_doubles() {
        let scale = DetectionScale::new(0.5).unwrap();
        let found = vec![Detection::new(
            2,
            Quad::from_xy([[20.0, 20.0], [60.0, 20.0], [60.0, 60.0], [20.0, 60.0]]),
        )];
        let full = scale.to_full_resolution(&found);
        assert_eq!(full[0].quad.corners[0], Point::new(40.0, 40.0));
    }
}
