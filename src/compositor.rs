//! Overlay compositing.
//!
//! For each detection, in list order, the marker's overlay image is warped
//! onto the marker quad through a homography and pasted in with a hard binary
//! mask covering the quad's convex hull. Each result is the base for the next
//! detection, so where quads overlap the later detection wins.
//!
//! The input frame is never modified; compositing works on a copy.

use image::{GrayImage, Luma, RgbImage};
use std::sync::Arc;

use crate::catalog::OverlayCatalog;
use crate::detect::{Detection, DetectionScale};
use crate::frame::Frame;
use crate::geometry::{warp_pixel, ConvexRegion, Homography, Point, Quad};

pub const MASK_OPAQUE: u8 = 255;
pub const MASK_TRANSPARENT: u8 = 0;

/// Why a detection left the frame unchanged.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SkipReason {
    /// No catalog entry for the marker id.
    NoOverlay,
    /// Quad (or overlay rectangle) has near-zero area or collinear corners.
    DegenerateQuad,
    /// Homography could not be solved or inverted.
    SingularTransform,
    /// Quad lies entirely outside the frame.
    OffFrame,
}

/// Per-frame compositing summary.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CompositeReport {
    pub applied: usize,
    pub skipped: Vec<(u32, SkipReason)>,
}

/// Composited frame plus what happened to each detection.
#[derive(Debug)]
pub struct Composite {
    pub frame: Frame,
    pub report: CompositeReport,
}

// ----------------------------------------------------------------------------
// Mask
// ----------------------------------------------------------------------------

/// Frame-sized single-channel mask: opaque inside a convex region, transparent elsewhere.
pub struct OverlayMask {
    image: GrayImage,
    bounds: Option<(u32, u32, u32, u32)>,
}

impl OverlayMask {
    /// Rasterise `region`. A pixel is opaque when its centre lies inside or on the boundary.
    pub fn from_region(width: u32, height: u32, region: &ConvexRegion) -> Self {
        let mut image = GrayImage::from_pixel(width, height, Luma([MASK_TRANSPARENT]));
        let bounds = region.pixel_bounds(width, height);
        if let Some((x0, y0, x1, y1)) = bounds {
            for y in y0..=y1 {
                for x in x0..=x1 {
                    if region.contains(Point::new(f64::from(x), f64::from(y))) {
                        image.put_pixel(x, y, Luma([MASK_OPAQUE]));
                    }
                }
            }
        }
        Self { image, bounds }
    }

    pub fn is_opaque(&self, x: u32, y: u32) -> bool {
        self.image
            .get_pixel_checked(x, y)
            .is_some_and(|p| p.0[0] == MASK_OPAQUE)
    }

    /// Inclusive pixel rectangle that can contain opaque pixels.
    pub fn bounds(&self) -> Option<(u32, u32, u32, u32)> {
        self.bounds
    }

    pub fn opaque_count(&self) -> usize {
        self.image.pixels().filter(|p| p.0[0] == MASK_OPAQUE).count()
    }

    pub fn as_image(&self) -> &GrayImage {
        &self.image
    }
}

// ----------------------------------------------------------------------------
// Compositor
// ----------------------------------------------------------------------------

/// Warps catalog overlays onto detected markers.
#[derive(Clone)]
pub struct OverlayCompositor {
    catalog: Arc<OverlayCatalog>,
    scale: DetectionScale,
}

impl OverlayCompositor {
    pub fn new(catalog: Arc<OverlayCatalog>) -> Self {
        Self {
            catalog,
            scale: DetectionScale::FULL,
        }
    }

    /// Scale at which detections were computed. Their corners are divided by it.
    pub fn with_detection_scale(mut self, scale: DetectionScale) -> Self {
        self.scale = scale;
        self
    }

    pub fn catalog(&self) -> &OverlayCatalog {
        &self.catalog
    }

    /// Blend every detection's overlay into a copy of `base`.
    pub fn composite(&self, base: &Frame, detections: &[Detection]) -> Composite {
        let mut canvas = base.to_rgb_image();
        let mut report = CompositeReport::default();
        for detection in &self.scale.to_full_resolution(detections) {
            match self.paint(&mut canvas, detection) {
                Ok(()) => report.applied += 1,
                Err(reason) => {
                    log::debug!(
                        "frame #{}: marker {} skipped ({:?})",
                        base.sequence,
                        detection.marker_id,
                        reason
                    );
                    report.skipped.push((detection.marker_id, reason));
                }
            }
        }
        Composite {
            frame: base.derive(canvas),
            report,
        }
    }

    // `detection` is already in full-frame coordinates.
    fn paint(&self, canvas: &mut RgbImage, detection: &Detection) -> Result<(), SkipReason> {
        let overlay = self
            .catalog
            .get(detection.marker_id)
            .ok_or(SkipReason::NoOverlay)?;

        let source = Quad::image_rect(overlay.width(), overlay.height());
        let target = detection.quad;
        if source.is_degenerate() || target.is_degenerate() {
            return Err(SkipReason::DegenerateQuad);
        }

        let forward = Homography::from_quads(&source, &target).ok_or(SkipReason::SingularTransform)?;
        let inverse = forward.inverse().ok_or(SkipReason::SingularTransform)?;

        let (width, height) = canvas.dimensions();
        let mask = OverlayMask::from_region(width, height, &target.hull());
        let (x0, y0, x1, y1) = mask.bounds().ok_or(SkipReason::OffFrame)?;

        // Only opaque pixels take the warped overlay, so the warp is evaluated there alone.
        for y in y0..=y1 {
            for x in x0..=x1 {
                if !mask.is_opaque(x, y) {
                    continue;
                }
                canvas.get_pixel_mut(x, y).0 = warp_pixel(overlay, &inverse, x, y);
            }
        }
        Ok(())
    }
}
