//! Planar geometry for marker overlays: quads, convex regions, homographies
//! and per-pixel perspective warping.

use image::RgbImage;
use nalgebra::{Matrix3, Point2, SMatrix, SVector, Vector3};

/// Image-plane point in frame-pixel coordinates.
pub type Point = Point2<f64>;

/// Quads whose area is below this (in square pixels) are treated as degenerate.
pub const MIN_QUAD_AREA: f64 = 1.0;

/// Sine of the smallest corner angle still accepted as non-collinear.
const COLLINEAR_SINE: f64 = 1e-9;

/// Inclusion tolerance (pixels) for points lying on a region edge.
const EDGE_TOLERANCE: f64 = 1e-6;

/// Projective denominators smaller than this are treated as points at infinity.
const MIN_W: f64 = 1e-12;

// ----------------------------------------------------------------------------
// Quad
// ----------------------------------------------------------------------------

/// Four corners with a fixed winding: top-left, top-right, bottom-right, bottom-left.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Quad {
    pub corners: [Point; 4],
}

impl Quad {
    pub fn new(corners: [Point; 4]) -> Self {
        Self { corners }
    }

    pub fn from_xy(points: [[f64; 2]; 4]) -> Self {
        Self {
            corners: points.map(|[x, y]| Point::new(x, y)),
        }
    }

    /// Corner set of a `width` x `height` image, in quad winding order.
    pub fn image_rect(width: u32, height: u32) -> Self {
        let w = f64::from(width.saturating_sub(1));
        let h = f64::from(height.saturating_sub(1));
        Self::from_xy([[0.0, 0.0], [w, 0.0], [w, h], [0.0, h]])
    }

    /// Multiply every coordinate by `factor`.
    pub fn scaled(&self, factor: f64) -> Self {
        Self {
            corners: self.corners.map(|p| Point::new(p.x * factor, p.y * factor)),
        }
    }

    /// Shoelace area (absolute).
    pub fn area(&self) -> f64 {
        let c = &self.corners;
        let twice: f64 = (0..4)
            .map(|i| {
                let a = c[i];
                let b = c[(i + 1) % 4];
                a.x * b.y - b.x * a.y
            })
            .sum();
        twice.abs() / 2.0
    }

    /// True when the quad cannot carry an overlay: too small, or any three corners collinear.
    pub fn is_degenerate(&self) -> bool {
        if !self.corners.iter().all(|p| p.x.is_finite() && p.y.is_finite()) {
            return true;
        }
        if self.area() < MIN_QUAD_AREA {
            return true;
        }
        const TRIPLES: [[usize; 3]; 4] = [[0, 1, 2], [1, 2, 3], [2, 3, 0], [3, 0, 1]];
        TRIPLES.iter().any(|&[a, b, c]| {
            let (a, b, c) = (self.corners[a], self.corners[b], self.corners[c]);
            let ab = b - a;
            let ac = c - a;
            let cross = ab.x * ac.y - ab.y * ac.x;
            cross.abs() <= COLLINEAR_SINE * ab.norm() * ac.norm()
        })
    }

    /// Convex hull of the four corners.
    pub fn hull(&self) -> ConvexRegion {
        ConvexRegion::hull_of(&self.corners)
    }
}

// ----------------------------------------------------------------------------
// ConvexRegion
// ----------------------------------------------------------------------------

/// Convex polygon, counter-clockwise in (x, y) with the cross product sign convention.
#[derive(Clone, Debug, PartialEq)]
pub struct ConvexRegion {
    vertices: Vec<Point>,
}

impl ConvexRegion {
    /// Andrew's monotone chain.
    pub fn hull_of(points: &[Point]) -> Self {
        let mut pts: Vec<Point> = points.to_vec();
        pts.sort_by(|a, b| a.x.total_cmp(&b.x).then(a.y.total_cmp(&b.y)));
        pts.dedup();
        if pts.len() < 3 {
            return Self { vertices: pts };
        }

        let mut hull = half_hull(pts.iter());
        hull.extend(half_hull(pts.iter().rev()));
        Self { vertices: hull }
    }

    pub fn vertices(&self) -> &[Point] {
        &self.vertices
    }

    /// Inclusive containment: points on an edge count as inside.
    pub fn contains(&self, p: Point) -> bool {
        let n = self.vertices.len();
        if n < 3 {
            return false;
        }
        (0..n).all(|i| {
            let a = self.vertices[i];
            let b = self.vertices[(i + 1) % n];
            let len = (b - a).norm();
            cross(a, b, p) >= -EDGE_TOLERANCE * len
        })
    }

    /// Integer pixel bounds `(x0, y0, x1, y1)` (inclusive) clipped to a `width` x `height` frame.
    pub fn pixel_bounds(&self, width: u32, height: u32) -> Option<(u32, u32, u32, u32)> {
        if self.vertices.is_empty() || width == 0 || height == 0 {
            return None;
        }
        let (mut min_x, mut min_y) = (f64::INFINITY, f64::INFINITY);
        let (mut max_x, mut max_y) = (f64::NEG_INFINITY, f64::NEG_INFINITY);
        for p in &self.vertices {
            min_x = min_x.min(p.x);
            min_y = min_y.min(p.y);
            max_x = max_x.max(p.x);
            max_y = max_y.max(p.y);
        }
        let x0 = min_x.floor().max(0.0);
        let y0 = min_y.floor().max(0.0);
        let x1 = max_x.ceil().min(f64::from(width - 1));
        let y1 = max_y.ceil().min(f64::from(height - 1));
        if x0 > x1 || y0 > y1 {
            return None;
        }
        Some((x0 as u32, y0 as u32, x1 as u32, y1 as u32))
    }
}

// One side of the hull; the last point is dropped since it starts the other side.
fn half_hull<'a>(points: impl Iterator<Item = &'a Point>) -> Vec<Point> {
    let mut chain: Vec<Point> = Vec::new();
    for &p in points {
        while chain.len() >= 2 && cross(chain[chain.len() - 2], chain[chain.len() - 1], p) <= 0.0 {
            chain.pop();
        }
        chain.push(p);
    }
    chain.pop();
    chain
}

fn cross(a: Point, b: Point, p: Point) -> f64 {
    let ab = b - a;
    let ap = p - a;
    ab.x * ap.y - ab.y * ap.x
}

// ----------------------------------------------------------------------------
// Homography
// ----------------------------------------------------------------------------

/// 3x3 projective transform with `h33 = 1`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Homography(Matrix3<f64>);

impl Homography {
    /// Solve the transform taking each `src` corner onto the matching `dst` corner.
    ///
    /// Returns `None` when the 8x8 system is singular (degenerate correspondences).
    pub fn from_quads(src: &Quad, dst: &Quad) -> Option<Self> {
        let mut a = SMatrix::<f64, 8, 8>::zeros();
        let mut b = SVector::<f64, 8>::zeros();
        for (i, (s, d)) in src.corners.iter().zip(dst.corners.iter()).enumerate() {
            let (x, y, u, v) = (s.x, s.y, d.x, d.y);
            let r = 2 * i;
            let rows = [
                [x, y, 1.0, 0.0, 0.0, 0.0, -x * u, -y * u],
                [0.0, 0.0, 0.0, x, y, 1.0, -x * v, -y * v],
            ];
            for (dr, row) in rows.iter().enumerate() {
                for (c, value) in row.iter().enumerate() {
                    a[(r + dr, c)] = *value;
                }
            }
            b[r] = u;
            b[r + 1] = v;
        }
        let h = a.lu().solve(&b)?;
        if !h.iter().all(|v| v.is_finite()) {
            return None;
        }
        Some(Self(Matrix3::new(
            h[0], h[1], h[2], h[3], h[4], h[5], h[6], h[7], 1.0,
        )))
    }

    pub fn matrix(&self) -> &Matrix3<f64> {
        &self.0
    }

    /// Map a point. `None` when it lands at infinity.
    pub fn apply(&self, p: Point) -> Option<Point> {
        let v = self.0 * Vector3::new(p.x, p.y, 1.0);
        if v.z.abs() < MIN_W {
            return None;
        }
        Some(Point::new(v.x / v.z, v.y / v.z))
    }

    pub fn inverse(&self) -> Option<Self> {
        self.0.try_inverse().map(Self)
    }
}

// ----------------------------------------------------------------------------
// Warp
// ----------------------------------------------------------------------------

/// Bilinear sample of `src` at (u, v). Neighbours outside the image contribute black,
/// so anything more than one pixel outside the source rectangle is blank.
pub fn sample_bilinear(src: &RgbImage, u: f64, v: f64) -> [u8; 3] {
    let (w, h) = src.dimensions();
    if !(u > -1.0 && v > -1.0 && u < f64::from(w) && v < f64::from(h)) {
        return [0; 3];
    }
    let x0 = u.floor();
    let y0 = v.floor();
    let fx = u - x0;
    let fy = v - y0;
    let (x0, y0) = (x0 as i64, y0 as i64);

    let mut acc = [0.0f64; 3];
    for (dx, dy, weight) in [
        (0, 0, (1.0 - fx) * (1.0 - fy)),
        (1, 0, fx * (1.0 - fy)),
        (0, 1, (1.0 - fx) * fy),
        (1, 1, fx * fy),
    ] {
        let (x, y) = (x0 + dx, y0 + dy);
        if weight == 0.0 || x < 0 || y < 0 || x >= i64::from(w) || y >= i64::from(h) {
            continue;
        }
        let px = src.get_pixel(x as u32, y as u32).0;
        for c in 0..3 {
            acc[c] += weight * f64::from(px[c]);
        }
    }
    acc.map(|c| c.round().clamp(0.0, 255.0) as u8)
}

/// Destination pixel `(x, y)` of a perspective warp given its `inverse`
/// (destination -> source) transform.
///
/// The pixel is pulled back into `src` and sampled bilinearly; pixels that map
/// to infinity or outside the source are black.
pub fn warp_pixel(src: &RgbImage, inverse: &Homography, x: u32, y: u32) -> [u8; 3] {
    inverse
        .apply(Point::new(f64::from(x), f64::from(y)))
        .map_or([0; 3], |s| sample_bilinear(src, s.x, s.y))
}
