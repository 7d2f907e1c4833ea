//! overlayd - marker overlay daemon
//!
//! This daemon:
//! 1. Loads the overlay catalog (`mapa_{id}.png` by default)
//! 2. Ingests frames from the configured source (broker, image dir, stub)
//! 3. Detects markers on the freshest frame and composites overlays onto them
//! 4. Shows the result as a snapshot file or republishes it on the broker
//! 5. Stops on Ctrl-C or when the sink asks to

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;

use marker_overlay::config::{DetectorBackendKind, OverlayConfig, SinkKind};
use marker_overlay::{
    open_source, DetectionScale, DisplaySink, FixedDetector, IngestOutcome, MarkerDetector,
    MqttFrameSink, NullDetector, OverlayCatalog, Pipeline, PipelineConfig, SnapshotSink,
    StopSignal,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Paint overlay images onto fiducial markers in a live stream")]
struct Args {
    /// JSON or TOML config file.
    #[arg(long, env = "OVERLAY_CONFIG")]
    config: Option<PathBuf>,

    /// Frame source URL (mqtt://, tcp://, mqtts://, ssl://, dir://, stub://).
    #[arg(long)]
    source: Option<String>,

    /// Camera id substituted into the frame topic.
    #[arg(long)]
    camera: Option<u32>,

    /// Directory holding the overlay images.
    #[arg(long)]
    image_dir: Option<PathBuf>,

    /// Detection scale in (0, 1].
    #[arg(long)]
    scale: Option<f64>,

    /// Detector backend: none | fixed.
    #[arg(long, value_name = "BACKEND")]
    detector: Option<String>,

    /// Display sink: snapshot | mqtt.
    #[arg(long, value_name = "SINK")]
    sink: Option<String>,

    /// Snapshot output path (snapshot sink).
    #[arg(long)]
    snapshot: Option<PathBuf>,

    /// Output topic (mqtt sink).
    #[arg(long)]
    output_topic: Option<String>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = apply_args(OverlayConfig::load_from(args.config.as_deref())?, &args)?;
    let detection_scale = config.detection_scale()?;

    let catalog = Arc::new(OverlayCatalog::load_dir(
        &config.overlays.dir,
        &config.overlays.pattern,
        config.overlays.first_id..=config.overlays.last_id,
    )?);
    if catalog.is_empty() {
        log::warn!(
            "no overlay images loaded from {}; frames will pass through unchanged",
            config.overlays.dir.display()
        );
    } else {
        log::info!(
            "loaded {} overlay images from {}",
            catalog.len(),
            config.overlays.dir.display()
        );
    }

    let stop = StopSignal::new();
    let handler_stop = stop.clone();
    ctrlc::set_handler(move || {
        log::info!("shutdown signal received, stopping pipeline...");
        handler_stop.raise();
    })
    .context("install Ctrl-C handler")?;

    let mut source = open_source(&config.source_spec())?;
    let detector = build_detector(&config);
    let sink = build_sink(&config, stop.clone())?;

    let pipeline_config = PipelineConfig {
        take_timeout: config.pipeline.take_timeout,
        detection_scale,
        ..PipelineConfig::default()
    };
    let mut pipeline = Pipeline::new(catalog, detector, sink, pipeline_config, stop);

    log::info!(
        "overlayd {} running. source={} camera={}",
        env!("CARGO_PKG_VERSION"),
        config.source.url,
        config.source.camera_id
    );
    let report = pipeline.run(&mut source)?;

    log::info!(
        "frames: processed={} ingested={} dropped={} idle_polls={} max_age={:?}",
        report.frames_processed,
        report.buffer.puts,
        report.buffer.dropped,
        report.idle_polls,
        report.max_frame_age
    );
    log::info!(
        "source: {} captured={} rejected={} unhealthy_checks={}",
        report.source.source,
        report.source.frames_captured,
        report.source.frames_rejected,
        report.source_unhealthy_checks
    );
    log::info!(
        "overlays: applied={} skipped={} detection_failures={} display_failures={}",
        report.overlays_applied,
        report.overlays_skipped,
        report.detection_failures,
        report.display_failures
    );

    match report.ingest {
        Some(IngestOutcome::ConnectFailed(reason)) => {
            Err(anyhow!("frame source failed to connect: {}", reason))
        }
        Some(IngestOutcome::Panicked) => Err(anyhow!("ingestion thread panicked")),
        _ => Ok(()),
    }
}

fn apply_args(mut config: OverlayConfig, args: &Args) -> Result<OverlayConfig> {
    if let Some(source) = &args.source {
        config.source.url = source.clone();
    }
    if let Some(camera) = args.camera {
        config.source.camera_id = camera;
    }
    if let Some(dir) = &args.image_dir {
        config.overlays.dir = dir.clone();
    }
    if let Some(scale) = args.scale {
        DetectionScale::new(scale)?;
        config.pipeline.detection_scale = scale;
    }
    if let Some(detector) = &args.detector {
        config.detector.backend = match detector.trim().to_ascii_lowercase().as_str() {
            "none" => DetectorBackendKind::None,
            "fixed" if config.detector.markers.is_empty() => {
                return Err(anyhow!("fixed detector needs markers in the config file"))
            }
            "fixed" => DetectorBackendKind::Fixed,
            other => return Err(anyhow!("unknown detector backend '{}'", other)),
        };
    }
    if let Some(sink) = &args.sink {
        config.display.sink = match sink.trim().to_ascii_lowercase().as_str() {
            "snapshot" => SinkKind::Snapshot,
            "mqtt" => SinkKind::Mqtt,
            other => return Err(anyhow!("unknown display sink '{}'", other)),
        };
    }
    if let Some(path) = &args.snapshot {
        config.display.snapshot_path = path.clone();
    }
    if let Some(topic) = &args.output_topic {
        config.display.topic_template = topic.clone();
    }
    Ok(config)
}

fn build_detector(config: &OverlayConfig) -> Box<dyn MarkerDetector> {
    match config.detector.backend {
        DetectorBackendKind::None => {
            log::warn!("detector backend 'none': no markers will be found");
            Box::new(NullDetector::new())
        }
        DetectorBackendKind::Fixed => {
            let mut detector = FixedDetector::new(config.detector.markers.clone());
            if let Some((width, height)) = config.detector.reference_size {
                detector = detector.with_reference_size(width, height);
            }
            Box::new(detector)
        }
    }
}

fn build_sink(config: &OverlayConfig, stop: StopSignal) -> Result<Box<dyn DisplaySink>> {
    match config.display.sink {
        SinkKind::Snapshot => {
            log::info!(
                "writing preview to {} (x{})",
                config.display.snapshot_path.display(),
                config.display.scale
            );
            let sink = SnapshotSink::new(&config.display.snapshot_path, config.display.scale, stop)?
                .with_min_interval(config.display.snapshot_interval);
            Ok(Box::new(sink))
        }
        SinkKind::Mqtt => {
            let client_id = format!("{}-display", config.source.client_id);
            let sink = MqttFrameSink::connect(
                &config.source.url,
                &config.display_topic(),
                &client_id,
                config.display.scale,
                stop,
            )?;
            Ok(Box::new(sink))
        }
    }
}
