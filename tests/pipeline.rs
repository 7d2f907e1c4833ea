use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::Result;
use image::{Rgb, RgbImage};

use marker_overlay::ingest::{SyntheticConfig, SyntheticFrameSource};
use marker_overlay::{
    open_source, CollectingSink, Detection, DetectionScale, DisplaySink, FixedDetector, Frame,
    IngestOutcome, OverlayCatalog, Pipeline, PipelineConfig, Quad, SnapshotSink, SourceSpec,
    StopSignal,
};

/// Records frame sequences and takes a while per frame, like a real display.
struct SlowSink {
    delay: Duration,
    sequences: Vec<u64>,
    limit: usize,
}

impl DisplaySink for SlowSink {
    fn show(&mut self, frame: &Frame) -> Result<()> {
        thread::sleep(self.delay);
        self.sequences.push(frame.sequence);
        Ok(())
    }

    fn should_stop(&self) -> bool {
        self.sequences.len() >= self.limit
    }
}

fn red_catalog(id: u32) -> Arc<OverlayCatalog> {
    Arc::new(OverlayCatalog::from_images([(
        id,
        RgbImage::from_pixel(16, 16, Rgb([255, 0, 0])),
    )]))
}

fn config(scale: f64) -> PipelineConfig {
    PipelineConfig {
        take_timeout: Duration::from_millis(20),
        detection_scale: DetectionScale::new(scale).unwrap(),
        ..PipelineConfig::default()
    }
}

#[test]
fn slow_consumer_sees_only_fresh_frames() {
    let mut source = SyntheticFrameSource::new(SyntheticConfig {
        name: "fast".to_string(),
        width: 64,
        height: 48,
        target_fps: 0,
        frame_limit: None,
    });
    let sink = SlowSink {
        delay: Duration::from_millis(15),
        sequences: Vec::new(),
        limit: 5,
    };
    let mut pipeline = Pipeline::new(
        Arc::new(OverlayCatalog::new()),
        marker_overlay::NullDetector::new(),
        sink,
        config(1.0),
        StopSignal::new(),
    );

    let report = pipeline.run(&mut source).unwrap();
    let (_, sink) = pipeline.into_parts();

    assert_eq!(sink.sequences.len(), 5);
    assert!(sink.sequences.windows(2).all(|w| w[0] < w[1]));
    assert!(report.buffer.dropped > 0, "fast producer should overwrite frames");
    let pending = report.buffer.puts - report.buffer.takes - report.buffer.dropped;
    assert!(pending <= 1);
    assert_eq!(report.ingest, Some(IngestOutcome::Stopped));
    // Age is taken once the sink is done with the frame.
    assert!(report.max_frame_age >= Duration::from_millis(15));
    assert_eq!(report.source.source, "stub://fast");
    assert_eq!(report.source.frames_captured, report.buffer.puts);
}

#[test]
fn detection_on_downscaled_frames_paints_full_resolution() {
    let mut source = SyntheticFrameSource::new(SyntheticConfig {
        name: "scaled".to_string(),
        width: 200,
        height: 100,
        target_fps: 100,
        frame_limit: None,
    });
    // Corners given for the full frame; the detector rescales them to the half-size copy.
    let detector = FixedDetector::new(vec![Detection::new(
        4,
        Quad::from_xy([[100.0, 20.0], [160.0, 20.0], [160.0, 80.0], [100.0, 80.0]]),
    )])
    .with_reference_size(200, 100);
    let mut pipeline = Pipeline::new(
        red_catalog(4),
        detector,
        CollectingSink::stop_after(3),
        config(0.5),
        StopSignal::new(),
    );

    let report = pipeline.run(&mut source).unwrap();
    let (detector, sink) = pipeline.into_parts();

    assert_eq!(report.overlays_applied, 3);
    assert_eq!(detector.calls(), 3);
    for frame in sink.frames() {
        assert_eq!((frame.width, frame.height), (200, 100));
        assert_eq!(frame.pixel(130, 50), Some([255, 0, 0]));
        assert_eq!(frame.pixel(159, 79), Some([255, 0, 0]));
        assert_ne!(frame.pixel(50, 50), Some([255, 0, 0]));
    }
}

#[test]
fn image_directory_to_snapshot_end_to_end() {
    let frames_dir = tempfile::tempdir().unwrap();
    for (i, shade) in [10u8, 20, 30].iter().enumerate() {
        RgbImage::from_pixel(40, 30, Rgb([*shade, *shade, *shade]))
            .save(frames_dir.path().join(format!("frame_{:02}.png", i)))
            .unwrap();
    }
    let out_dir = tempfile::tempdir().unwrap();
    let snapshot = out_dir.path().join("preview.png");

    let spec = SourceSpec {
        url: format!("dir://{}", frames_dir.path().display()),
        camera_id: 1,
        topic_template: String::new(),
        client_id: "test".to_string(),
        width: 0,
        height: 0,
        target_fps: 0,
    };
    let mut source = open_source(&spec).unwrap();
    let stop = StopSignal::new();
    let sink = SnapshotSink::new(&snapshot, 2, stop.clone()).unwrap();
    let detector = FixedDetector::new(vec![Detection::new(
        1,
        Quad::from_xy([[5.0, 5.0], [25.0, 5.0], [25.0, 20.0], [5.0, 20.0]]),
    )]);
    let mut pipeline = Pipeline::new(red_catalog(1), detector, sink, config(1.0), stop.clone());

    let raiser = thread::spawn(move || {
        thread::sleep(Duration::from_millis(300));
        stop.raise();
    });
    let report = pipeline.run(&mut source).unwrap();
    raiser.join().unwrap();

    assert!(matches!(report.ingest, Some(IngestOutcome::Exhausted(_))));
    assert!(report.frames_processed >= 1);
    assert_eq!(report.overlays_applied, report.frames_processed);

    let written = image::open(&snapshot).unwrap().to_rgb8();
    assert_eq!(written.dimensions(), (80, 60));
    assert_eq!(written.get_pixel(30, 24).0, [255, 0, 0]);
    assert_eq!(written.get_pixel(70, 55).0, [30, 30, 30]);
}

#[test]
fn external_stop_ends_an_idle_pipeline() {
    let stop = StopSignal::new();
    let mut pipeline = Pipeline::new(
        Arc::new(OverlayCatalog::new()),
        marker_overlay::NullDetector::new(),
        CollectingSink::new(),
        config(1.0),
        stop.clone(),
    );
    let mut source = SyntheticFrameSource::new(SyntheticConfig {
        target_fps: 5,
        frame_limit: Some(1),
        ..SyntheticConfig::default()
    });

    stop.raise();
    let report = pipeline.run(&mut source).unwrap();

    assert_eq!(report.frames_processed, 0);
    assert!(report.ingest.is_some());
}
