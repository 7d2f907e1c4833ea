use std::sync::Arc;

use image::{Rgb, RgbImage};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use marker_overlay::{
    Detection, DetectionScale, Frame, Homography, OverlayCatalog, OverlayCompositor, Point, Quad,
    SkipReason,
};

const RED: [u8; 3] = [255, 0, 0];
const GREEN: [u8; 3] = [0, 255, 0];
const BLUE: [u8; 3] = [0, 0, 255];
const WHITE: [u8; 3] = [255, 255, 255];
const GRAY: [u8; 3] = [40, 40, 40];

/// Overlay whose four quadrants have distinct colours.
fn quadrant_overlay(size: u32) -> RgbImage {
    let half = size / 2;
    RgbImage::from_fn(size, size, |x, y| match (x < half, y < half) {
        (true, true) => Rgb(RED),
        (false, true) => Rgb(GREEN),
        (false, false) => Rgb(BLUE),
        (true, false) => Rgb(WHITE),
    })
}

/// Rectangle with each corner jittered inward, which keeps it convex.
fn random_quad(rng: &mut StdRng, width: f64, height: f64) -> Quad {
    let x0 = rng.gen_range(10.0..width / 3.0);
    let y0 = rng.gen_range(10.0..height / 3.0);
    let x1 = rng.gen_range(2.0 * width / 3.0..width - 10.0);
    let y1 = rng.gen_range(2.0 * height / 3.0..height - 10.0);
    let mut jitter = || rng.gen_range(0.0..8.0);
    Quad::from_xy([
        [x0 + jitter(), y0 + jitter()],
        [x1 - jitter(), y0 + jitter()],
        [x1 - jitter(), y1 - jitter()],
        [x0 + jitter(), y1 - jitter()],
    ])
}

#[test]
fn homography_maps_overlay_corners_onto_random_quads() {
    let mut rng = StdRng::seed_from_u64(0x5eed);
    let source = Quad::image_rect(64, 48);
    for _ in 0..200 {
        let target = random_quad(&mut rng, 640.0, 480.0);
        let h = Homography::from_quads(&source, &target).expect("non-singular");
        for (src, dst) in source.corners.iter().zip(target.corners.iter()) {
            let mapped = h.apply(*src).expect("finite");
            assert!((mapped.x - dst.x).abs() < 1e-6, "{:?} -> {:?}", mapped, dst);
            assert!((mapped.y - dst.y).abs() < 1e-6, "{:?} -> {:?}", mapped, dst);
        }
    }
}

#[test]
fn overlay_keeps_orientation_on_a_tilted_marker() {
    let catalog = Arc::new(OverlayCatalog::from_images([(5, quadrant_overlay(40))]));
    let compositor = OverlayCompositor::new(catalog);
    let base = Frame::filled(200, 200, GRAY, 1);
    // Marker rotated 90 degrees clockwise: overlay top-left lands top-right.
    let marker = Detection::new(
        5,
        Quad::from_xy([[160.0, 40.0], [160.0, 160.0], [40.0, 160.0], [40.0, 40.0]]),
    );

    let out = compositor.composite(&base, &[marker]);

    assert_eq!(out.report.applied, 1);
    assert_eq!(out.frame.pixel(150, 50), Some(RED));
    assert_eq!(out.frame.pixel(150, 150), Some(GREEN));
    assert_eq!(out.frame.pixel(50, 150), Some(BLUE));
    assert_eq!(out.frame.pixel(50, 50), Some(WHITE));
    assert_eq!(out.frame.pixel(20, 20), Some(GRAY));
    assert_eq!(out.frame.pixel(180, 180), Some(GRAY));
}

#[test]
fn random_markers_only_touch_pixels_inside_their_hull() {
    let mut rng = StdRng::seed_from_u64(7);
    let catalog = Arc::new(OverlayCatalog::from_images([(1, RgbImage::from_pixel(16, 16, Rgb(RED)))]));
    let compositor = OverlayCompositor::new(catalog);
    let base = Frame::filled(160, 120, GRAY, 1);

    for _ in 0..20 {
        let quad = random_quad(&mut rng, 160.0, 120.0);
        let hull = quad.hull();
        let out = compositor.composite(&base, &[Detection::new(1, quad)]);
        assert_eq!(out.report.applied, 1);
        for y in 0..120 {
            for x in 0..160 {
                let inside = hull.contains(Point::new(f64::from(x), f64::from(y)));
                let pixel = out.frame.pixel(x, y);
                if !inside {
                    assert_eq!(pixel, Some(GRAY), "outside pixel ({}, {}) changed", x, y);
                }
            }
        }
    }
}

#[test]
fn later_detection_wins_where_markers_overlap() {
    let catalog = Arc::new(OverlayCatalog::from_images([
        (1, RgbImage::from_pixel(10, 10, Rgb(RED))),
        (2, RgbImage::from_pixel(10, 10, Rgb(GREEN))),
    ]));
    let compositor = OverlayCompositor::new(catalog);
    let base = Frame::filled(100, 100, GRAY, 1);
    let first = Detection::new(1, Quad::from_xy([[10.0, 10.0], [60.0, 10.0], [60.0, 60.0], [10.0, 60.0]]));
    let second = Detection::new(2, Quad::from_xy([[40.0, 40.0], [90.0, 40.0], [90.0, 90.0], [40.0, 90.0]]));

    let out = compositor.composite(&base, &[first.clone(), second.clone()]);
    assert_eq!(out.frame.pixel(50, 50), Some(GREEN));
    assert_eq!(out.frame.pixel(20, 20), Some(RED));

    let out = compositor.composite(&base, &[second, first]);
    assert_eq!(out.frame.pixel(50, 50), Some(RED));
    assert_eq!(out.frame.pixel(80, 80), Some(GREEN));
}

#[test]
fn unusable_detections_are_skipped_and_the_rest_applied() {
    let catalog = Arc::new(OverlayCatalog::from_images([(1, RgbImage::from_pixel(10, 10, Rgb(RED)))]));
    let compositor = OverlayCompositor::new(catalog);
    let base = Frame::filled(50, 50, GRAY, 1);
    let detections = [
        Detection::new(9, Quad::from_xy([[5.0, 5.0], [20.0, 5.0], [20.0, 20.0], [5.0, 20.0]])),
        Detection::new(1, Quad::from_xy([[5.0, 5.0], [10.0, 10.0], [15.0, 15.0], [20.0, 20.0]])),
        Detection::new(1, Quad::from_xy([[25.0, 25.0], [45.0, 25.0], [45.0, 45.0], [25.0, 45.0]])),
    ];

    let out = compositor.composite(&base, &detections);

    assert_eq!(out.report.applied, 1);
    assert_eq!(
        out.report.skipped,
        vec![(9, SkipReason::NoOverlay), (1, SkipReason::DegenerateQuad)]
    );
    assert_eq!(out.frame.pixel(10, 10), Some(GRAY));
    assert_eq!(out.frame.pixel(35, 35), Some(RED));
}

#[test]
fn downscaled_detections_land_at_full_resolution() {
    let catalog = Arc::new(OverlayCatalog::from_images([(3, RgbImage::from_pixel(8, 8, Rgb(BLUE)))]));
    let compositor =
        OverlayCompositor::new(catalog).with_detection_scale(DetectionScale::new(0.5).unwrap());
    let base = Frame::filled(120, 120, GRAY, 1);
    let half_res = Detection::new(3, Quad::from_xy([[20.0, 20.0], [40.0, 20.0], [40.0, 40.0], [20.0, 40.0]]));

    let out = compositor.composite(&base, &[half_res]);

    assert_eq!(out.frame.pixel(60, 60), Some(BLUE));
    assert_eq!(out.frame.pixel(79, 79), Some(BLUE));
    assert_eq!(out.frame.pixel(30, 30), Some(GRAY));
    assert_eq!(out.frame.pixel(90, 90), Some(GRAY));
}
