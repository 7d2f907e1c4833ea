use crate::geometry::Quad;

/// One detected marker: its dictionary id and corner quad in detector-frame pixels.
#[derive(Clone, Debug, PartialEq)]
pub struct Detection {
    pub marker_id: u32,
    pub quad: Quad,
}

impl Detection {
    pub fn new(marker_id: u32, quad: Quad) -> Self {
        Self { marker_id, quad }
    }

    /// Map corners found on a frame downscaled by `scale` back to full resolution.
    pub fn to_full_resolution(&self, scale: f64) -> Self {
        Self {
            marker_id: self.marker_id,
            quad: self.quad.scaled(1.0 / scale),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Point;

    #[test]
    fn half_scale_corners_double() {
        let d = Detection::new(
            4,
            Quad::from_xy([[20.0, 20.0], [30.0, 20.0], [30.0, 30.0], [20.0, 30.0]]),
        );
        let full = d.to_full_resolution(0.5);
        assert_eq!(full.marker_id, 4);
        assert_eq!(full.quad.corners[0], Point::new(40.0, 40.0));
        assert_eq!(full.quad.corners[2], Point::new(60.0, 60.0));
    }

    #[test]
    fn unit_scale_is_identity() {
        let d = Detection::new(
            1,
            Quad::from_xy([[1.5, 2.0], [9.0, 2.0], [9.0, 7.25], [1.5, 7.25]]),
        );
        assert_eq!(d.to_full_resolution(1.0), d);
    }
}
