use anyhow::Result;

use crate::detect::backend::MarkerDetector;
use crate::detect::result::Detection;
use crate::frame::Frame;
use crate::geometry::Point;

/// Reports the same markers on every frame.
///
/// Used for bench setups where the marker positions are known ahead of time
/// (calibration rigs, demos, soak tests). Corners are given for a reference
/// frame size and rescaled to whatever frame the pipeline hands in, so the
/// detector behaves like a real one when detection runs on a downscaled copy.
pub struct FixedDetector {
    detections: Vec<Detection>,
    reference: Option<(u32, u32)>,
    calls: u64,
}

impl FixedDetector {
    pub fn new(detections: Vec<Detection>) -> Self {
        Self {
            detections,
            reference: None,
            calls: 0,
        }
    }

    /// Frame size the configured corners refer to.
    pub fn with_reference_size(mut self, width: u32, height: u32) -> Self {
        self.reference = Some((width, height));
        self
    }

    pub fn calls(&self) -> u64 {
        self.calls
    }
}

impl MarkerDetector for FixedDetector {
    fn name(&self) -> &'static str {
        "fixed"
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        self.calls += 1;
        let Some((ref_w, ref_h)) = self.reference else {
            return Ok(self.detections.clone());
        };
        if (ref_w, ref_h) == (frame.width, frame.height) || ref_w == 0 || ref_h == 0 {
            return Ok(self.detections.clone());
        }
        let sx = f64::from(frame.width) / f64::from(ref_w);
        let sy = f64::from(frame.height) / f64::from(ref_h);
        Ok(self
            .detections
            .iter()
            .map(|d| {
                let mut out = d.clone();
                out.quad.corners = d.quad.corners.map(|p| Point::new(p.x * sx, p.y * sy));
                out
            })
            .collect())
    }
}
