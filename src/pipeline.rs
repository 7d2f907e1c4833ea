//! Two-stage overlay pipeline.
//!
//! ```text
//! ingest thread:  FrameSource::next_frame ──put──▶ LatestFrameBuffer
//! processing:     take(timeout) ─▶ detect (maybe downscaled) ─▶ composite ─▶ DisplaySink::show
//! ```
//!
//! The stages share only the buffer, the read-only catalog and a `StopSignal`.
//! Ingestion never waits on processing. Processing waits at most
//! `take_timeout` per iteration, then re-checks the stop conditions, so it stays
//! responsive when the source stalls or runs dry. Stopping is cooperative: both
//! loops check the signal at the top of each iteration.

use anyhow::{Context, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::catalog::OverlayCatalog;
use crate::compositor::OverlayCompositor;
use crate::detect::{Detection, DetectionScale, MarkerDetector};
use crate::display::DisplaySink;
use crate::frame::{BufferStats, Frame, LatestFrameBuffer};
use crate::ingest::{FrameSource, SourceStats};

pub const DEFAULT_TAKE_TIMEOUT: Duration = Duration::from_millis(100);
pub const DEFAULT_HEALTH_INTERVAL: Duration = Duration::from_secs(5);

/// Shared cooperative stop flag.
#[derive(Clone, Debug, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Clone, Debug)]
pub struct PipelineConfig {
    /// Longest wait for a frame before re-checking the stop conditions.
    pub take_timeout: Duration,
    pub detection_scale: DetectionScale,
    /// Period of the health log lines (processing and source).
    pub health_interval: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            take_timeout: DEFAULT_TAKE_TIMEOUT,
            detection_scale: DetectionScale::FULL,
            health_interval: DEFAULT_HEALTH_INTERVAL,
        }
    }
}

/// How the ingestion stage ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IngestOutcome {
    /// Stop signal observed.
    Stopped,
    /// Source could not be opened.
    ConnectFailed(String),
    /// Source stopped yielding frames for good.
    Exhausted(String),
    /// Ingestion thread panicked.
    Panicked,
}

#[derive(Clone, Debug, Default)]
pub struct PipelineReport {
    pub frames_processed: u64,
    pub overlays_applied: u64,
    pub overlays_skipped: u64,
    pub detection_failures: u64,
    pub display_failures: u64,
    /// `take` calls that timed out.
    pub idle_polls: u64,
    /// Oldest frame age (capture to display done) seen by the sink.
    pub max_frame_age: Duration,
    pub buffer: BufferStats,
    /// Source counters at shutdown.
    pub source: SourceStats,
    /// Periodic source health checks that found the source unhealthy.
    pub source_unhealthy_checks: u64,
    pub ingest: Option<IngestOutcome>,
}

/// Processing side of the pipeline plus the ingestion thread it spawns.
pub struct Pipeline<D, K> {
    detector: D,
    sink: K,
    compositor: OverlayCompositor,
    buffer: Arc<LatestFrameBuffer>,
    config: PipelineConfig,
    stop: StopSignal,
}

impl<D: MarkerDetector, K: DisplaySink> Pipeline<D, K> {
    pub fn new(
        catalog: Arc<OverlayCatalog>,
        detector: D,
        sink: K,
        config: PipelineConfig,
        stop: StopSignal,
    ) -> Self {
        let compositor =
            OverlayCompositor::new(catalog).with_detection_scale(config.detection_scale);
        Self {
            detector,
            sink,
            compositor,
            buffer: Arc::new(LatestFrameBuffer::new()),
            config,
            stop,
        }
    }

    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    /// Run until the stop signal is raised or the sink asks to stop.
    ///
    /// Source exhaustion ends only the ingestion thread; processing keeps polling
    /// until an external stop. Returns once both stages have finished.
    pub fn run<S: FrameSource>(&mut self, source: &mut S) -> Result<PipelineReport> {
        self.detector
            .warm_up()
            .with_context(|| format!("warm up detector '{}'", self.detector.name()))?;
        log::info!(
            "pipeline: detector={} overlays={} scale={} timeout={:?}",
            self.detector.name(),
            self.compositor.catalog().len(),
            self.config.detection_scale.factor(),
            self.config.take_timeout
        );

        let mut report = PipelineReport::default();
        let stop = self.stop.clone();
        let buffer = Arc::clone(&self.buffer);
        let health_interval = self.config.health_interval;
        let ingest_source = &mut *source;

        let (ingest, unhealthy_checks) = thread::scope(|scope| -> Result<(IngestOutcome, u64)> {
            let handle = thread::Builder::new()
                .name("ingest".to_string())
                .spawn_scoped(scope, move || {
                    ingest_loop(ingest_source, &buffer, &stop, health_interval)
                })
                .context("spawn ingestion thread")?;

            self.processing_loop(&mut report);
            // Processing is done; make sure ingestion winds down too.
            self.stop.raise();
            Ok(handle.join().unwrap_or((IngestOutcome::Panicked, 0)))
        })?;

        report.buffer = self.buffer.stats();
        report.source = source.stats();
        report.source_unhealthy_checks = unhealthy_checks;
        report.ingest = Some(ingest);
        log::info!(
            "pipeline stopped: processed={} overlays={} dropped={} rejected={} ingest={:?}",
            report.frames_processed,
            report.overlays_applied,
            report.buffer.dropped,
            report.source.frames_rejected,
            report.ingest
        );
        Ok(report)
    }

    pub fn into_parts(self) -> (D, K) {
        (self.detector, self.sink)
    }

    fn processing_loop(&mut self, report: &mut PipelineReport) {
        let mut last_health = Instant::now();
        loop {
            if self.stop.is_raised() || self.sink.should_stop() {
                break;
            }
            match self.buffer.take(self.config.take_timeout) {
                Some(frame) => self.process(&frame, report),
                None => report.idle_polls += 1,
            }
            if last_health.elapsed() >= self.config.health_interval {
                let stats = self.buffer.stats();
                log::info!(
                    "pipeline health: ingested={} processed={} dropped={} overlays={} idle={} max_age={:?}",
                    stats.puts,
                    report.frames_processed,
                    stats.dropped,
                    report.overlays_applied,
                    report.idle_polls,
                    report.max_frame_age
                );
                last_health = Instant::now();
            }
        }
    }

    fn process(&mut self, frame: &Frame, report: &mut PipelineReport) {
        let detections = match self.detect(frame) {
            Ok(detections) => detections,
            Err(e) => {
                report.detection_failures += 1;
                log::warn!("frame #{}: detection failed: {:#}", frame.sequence, e);
                Vec::new()
            }
        };

        let composite = self.compositor.composite(frame, &detections);
        report.overlays_applied += composite.report.applied as u64;
        report.overlays_skipped += composite.report.skipped.len() as u64;

        if let Err(e) = self.sink.show(&composite.frame) {
            report.display_failures += 1;
            log::warn!("frame #{}: display failed: {:#}", frame.sequence, e);
        }
        report.max_frame_age = report.max_frame_age.max(composite.frame.age());
        report.frames_processed += 1;
    }

    // Corners stay in detector-frame coordinates; the compositor rescales them.
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        match self.config.detection_scale.downscale(frame) {
            Some(small) => self.detector.detect(&small),
            None => self.detector.detect(frame),
        }
    }
}

/// Returns how ingestion ended and how many health checks found the source unhealthy.
fn ingest_loop<S: FrameSource>(
    source: &mut S,
    buffer: &LatestFrameBuffer,
    stop: &StopSignal,
    health_interval: Duration,
) -> (IngestOutcome, u64) {
    if let Err(e) = source.connect() {
        log::error!("frame source failed to connect: {:#}", e);
        return (IngestOutcome::ConnectFailed(format!("{:#}", e)), 0);
    }
    let mut unhealthy_checks = 0;
    let mut last_health = Instant::now();
    loop {
        if stop.is_raised() {
            return (IngestOutcome::Stopped, unhealthy_checks);
        }
        if last_health.elapsed() >= health_interval {
            let healthy = source.is_healthy();
            let stats = source.stats();
            if healthy {
                log::info!(
                    "source health=true frames={} rejected={} source={}",
                    stats.frames_captured,
                    stats.frames_rejected,
                    stats.source
                );
            } else {
                unhealthy_checks += 1;
                log::warn!(
                    "source health=false frames={} rejected={} source={}",
                    stats.frames_captured,
                    stats.frames_rejected,
                    stats.source
                );
            }
            last_health = Instant::now();
        }
        match source.next_frame() {
            Ok(Some(frame)) => buffer.put(frame),
            Ok(None) => {}
            Err(e) => {
                let stats = source.stats();
                log::error!(
                    "frame source {} ended after {} frames: {:#}",
                    stats.source,
                    stats.frames_captured,
                    e
                );
                return (IngestOutcome::Exhausted(format!("{:#}", e)), unhealthy_checks);
            }
        }
    }
}
