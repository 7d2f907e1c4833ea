use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::catalog::{DEFAULT_PATTERN, ID_PLACEHOLDER};
use crate::detect::{Detection, DetectionScale};
use crate::geometry::Quad;
use crate::ingest::mqtt::DEFAULT_TOPIC_TEMPLATE;
use crate::ingest::SourceSpec;

const DEFAULT_SOURCE_URL: &str = "mqtt://localhost:1883";
const DEFAULT_CAMERA_ID: u32 = 1;
const DEFAULT_CLIENT_ID: &str = "overlayd";
const DEFAULT_STUB_WIDTH: u32 = 640;
const DEFAULT_STUB_HEIGHT: u32 = 480;
const DEFAULT_TARGET_FPS: u32 = 0;
const DEFAULT_OVERLAY_DIR: &str = "overlays";
const DEFAULT_FIRST_ID: u32 = 1;
const DEFAULT_LAST_ID: u32 = 15;
const DEFAULT_DETECTION_SCALE: f64 = 1.0;
const DEFAULT_TAKE_TIMEOUT_MS: u64 = 100;
const DEFAULT_SNAPSHOT_PATH: &str = "overlay_preview.jpg";
const DEFAULT_DISPLAY_SCALE: u32 = 3;
const DEFAULT_SNAPSHOT_INTERVAL_MS: u64 = 0;
const DEFAULT_DISPLAY_TOPIC: &str = "Overlay.{camera}.Frame";

#[derive(Debug, Deserialize, Default)]
struct OverlayConfigFile {
    source: Option<SourceConfigFile>,
    overlays: Option<OverlaysConfigFile>,
    pipeline: Option<PipelineConfigFile>,
    detector: Option<DetectorConfigFile>,
    display: Option<DisplayConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct SourceConfigFile {
    url: Option<String>,
    camera_id: Option<u32>,
    topic: Option<String>,
    client_id: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    target_fps: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct OverlaysConfigFile {
    dir: Option<PathBuf>,
    pattern: Option<String>,
    first_id: Option<u32>,
    last_id: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct PipelineConfigFile {
    detection_scale: Option<f64>,
    take_timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectorConfigFile {
    backend: Option<String>,
    reference_width: Option<u32>,
    reference_height: Option<u32>,
    markers: Option<Vec<FixedMarkerFile>>,
}

#[derive(Debug, Deserialize, Clone)]
struct FixedMarkerFile {
    id: u32,
    corners: [[f64; 2]; 4],
}

#[derive(Debug, Deserialize, Default)]
struct DisplayConfigFile {
    sink: Option<String>,
    snapshot_path: Option<PathBuf>,
    snapshot_interval_ms: Option<u64>,
    scale: Option<u32>,
    topic: Option<String>,
}

#[derive(Debug, Clone)]
pub struct OverlayConfig {
    pub source: SourceSettings,
    pub overlays: OverlaySettings,
    pub pipeline: PipelineSettings,
    pub detector: DetectorSettings,
    pub display: DisplaySettings,
}

#[derive(Debug, Clone)]
pub struct SourceSettings {
    pub url: String,
    pub camera_id: u32,
    pub topic_template: String,
    pub client_id: String,
    /// Synthetic frame size (`stub://` only).
    pub width: u32,
    pub height: u32,
    pub target_fps: u32,
}

#[derive(Debug, Clone)]
pub struct OverlaySettings {
    pub dir: PathBuf,
    pub pattern: String,
    pub first_id: u32,
    pub last_id: u32,
}

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub detection_scale: f64,
    pub take_timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DetectorBackendKind {
    None,
    Fixed,
}

#[derive(Debug, Clone)]
pub struct DetectorSettings {
    pub backend: DetectorBackendKind,
    pub reference_size: Option<(u32, u32)>,
    pub markers: Vec<Detection>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkKind {
    Snapshot,
    Mqtt,
}

#[derive(Debug, Clone)]
pub struct DisplaySettings {
    pub sink: SinkKind,
    pub snapshot_path: PathBuf,
    pub snapshot_interval: Duration,
    pub scale: u32,
    pub topic_template: String,
}

impl OverlayConfig {
    /// File (`OVERLAY_CONFIG`), then environment overrides, then validation.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("OVERLAY_CONFIG").ok();
        Self::load_from(config_path.as_deref().map(Path::new))
    }

    /// Same as `load`, with an explicit config file path.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: OverlayConfigFile) -> Result<Self> {
        let src = file.source.unwrap_or_default();
        let source = SourceSettings {
            url: src.url.unwrap_or_else(|| DEFAULT_SOURCE_URL.to_string()),
            camera_id: src.camera_id.unwrap_or(DEFAULT_CAMERA_ID),
            topic_template: src
                .topic
                .unwrap_or_else(|| DEFAULT_TOPIC_TEMPLATE.to_string()),
            client_id: src
                .client_id
                .unwrap_or_else(|| DEFAULT_CLIENT_ID.to_string()),
            width: src.width.unwrap_or(DEFAULT_STUB_WIDTH),
            height: src.height.unwrap_or(DEFAULT_STUB_HEIGHT),
            target_fps: src.target_fps.unwrap_or(DEFAULT_TARGET_FPS),
        };

        let ov = file.overlays.unwrap_or_default();
        let overlays = OverlaySettings {
            dir: ov.dir.unwrap_or_else(|| PathBuf::from(DEFAULT_OVERLAY_DIR)),
            pattern: ov.pattern.unwrap_or_else(|| DEFAULT_PATTERN.to_string()),
            first_id: ov.first_id.unwrap_or(DEFAULT_FIRST_ID),
            last_id: ov.last_id.unwrap_or(DEFAULT_LAST_ID),
        };

        let pl = file.pipeline.unwrap_or_default();
        let pipeline = PipelineSettings {
            detection_scale: pl.detection_scale.unwrap_or(DEFAULT_DETECTION_SCALE),
            take_timeout: Duration::from_millis(
                pl.take_timeout_ms.unwrap_or(DEFAULT_TAKE_TIMEOUT_MS),
            ),
        };

        let det = file.detector.unwrap_or_default();
        let markers: Vec<Detection> = det
            .markers
            .unwrap_or_default()
            .into_iter()
            .map(|m| Detection::new(m.id, Quad::from_xy(m.corners)))
            .collect();
        let backend = match det.backend.as_deref() {
            Some(name) => parse_backend(name)?,
            None if !markers.is_empty() => DetectorBackendKind::Fixed,
            None => DetectorBackendKind::None,
        };
        let reference_size = match (det.reference_width, det.reference_height) {
            (Some(w), Some(h)) => Some((w, h)),
            (None, None) => None,
            _ => {
                return Err(anyhow!(
                    "detector reference_width and reference_height must be set together"
                ))
            }
        };
        let detector = DetectorSettings {
            backend,
            reference_size,
            markers,
        };

        let dp = file.display.unwrap_or_default();
        let display = DisplaySettings {
            sink: match dp.sink.as_deref() {
                Some(name) => parse_sink(name)?,
                None => SinkKind::Snapshot,
            },
            snapshot_path: dp
                .snapshot_path
                .unwrap_or_else(|| PathBuf::from(DEFAULT_SNAPSHOT_PATH)),
            snapshot_interval: Duration::from_millis(
                dp.snapshot_interval_ms
                    .unwrap_or(DEFAULT_SNAPSHOT_INTERVAL_MS),
            ),
            scale: dp.scale.unwrap_or(DEFAULT_DISPLAY_SCALE),
            topic_template: dp
                .topic
                .unwrap_or_else(|| DEFAULT_DISPLAY_TOPIC.to_string()),
        };

        Ok(Self {
            source,
            overlays,
            pipeline,
            detector,
            display,
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(url) = std::env::var("OVERLAY_SOURCE_URL") {
            if !url.trim().is_empty() {
                self.source.url = url;
            }
        }
        if let Ok(camera) = std::env::var("OVERLAY_CAMERA_ID") {
            self.source.camera_id = camera
                .trim()
                .parse()
                .map_err(|_| anyhow!("OVERLAY_CAMERA_ID must be a non-negative integer"))?;
        }
        if let Ok(dir) = std::env::var("OVERLAY_IMAGE_DIR") {
            if !dir.trim().is_empty() {
                self.overlays.dir = PathBuf::from(dir);
            }
        }
        if let Ok(scale) = std::env::var("OVERLAY_DETECTION_SCALE") {
            self.pipeline.detection_scale = scale
                .trim()
                .parse()
                .map_err(|_| anyhow!("OVERLAY_DETECTION_SCALE must be a number in (0, 1]"))?;
        }
        if let Ok(timeout) = std::env::var("OVERLAY_TAKE_TIMEOUT_MS") {
            let millis: u64 = timeout.trim().parse().map_err(|_| {
                anyhow!("OVERLAY_TAKE_TIMEOUT_MS must be an integer number of milliseconds")
            })?;
            self.pipeline.take_timeout = Duration::from_millis(millis);
        }
        if let Ok(path) = std::env::var("OVERLAY_SNAPSHOT_PATH") {
            if !path.trim().is_empty() {
                self.display.snapshot_path = PathBuf::from(path);
            }
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        DetectionScale::new(self.pipeline.detection_scale)?;
        if self.pipeline.take_timeout.is_zero() {
            return Err(anyhow!("take timeout must be greater than zero"));
        }
        if self.overlays.first_id > self.overlays.last_id {
            return Err(anyhow!(
                "overlay id range is empty ({}..={})",
                self.overlays.first_id,
                self.overlays.last_id
            ));
        }
        if !self.overlays.pattern.contains(ID_PLACEHOLDER) {
            return Err(anyhow!(
                "overlay pattern '{}' must contain {}",
                self.overlays.pattern,
                ID_PLACEHOLDER
            ));
        }
        if self.display.scale == 0 {
            return Err(anyhow!("display scale must be at least 1"));
        }
        if self.source.width == 0 || self.source.height == 0 {
            return Err(anyhow!("source width and height must be non-zero"));
        }
        if self.detector.backend == DetectorBackendKind::Fixed && self.detector.markers.is_empty() {
            return Err(anyhow!("fixed detector needs at least one marker"));
        }
        Ok(())
    }

    pub fn detection_scale(&self) -> Result<DetectionScale> {
        DetectionScale::new(self.pipeline.detection_scale)
    }

    pub fn source_spec(&self) -> SourceSpec {
        SourceSpec {
            url: self.source.url.clone(),
            camera_id: self.source.camera_id,
            topic_template: self.source.topic_template.clone(),
            client_id: self.source.client_id.clone(),
            width: self.source.width,
            height: self.source.height,
            target_fps: self.source.target_fps,
        }
    }

    pub fn display_topic(&self) -> String {
        self.display
            .topic_template
            .replace("{camera}", &self.source.camera_id.to_string())
    }
}

fn parse_backend(name: &str) -> Result<DetectorBackendKind> {
    match name.trim().to_ascii_lowercase().as_str() {
        "none" => Ok(DetectorBackendKind::None),
        "fixed" => Ok(DetectorBackendKind::Fixed),
        other => Err(anyhow!("unknown detector backend '{}'", other)),
    }
}

fn parse_sink(name: &str) -> Result<SinkKind> {
    match name.trim().to_ascii_lowercase().as_str() {
        "snapshot" => Ok(SinkKind::Snapshot),
        "mqtt" => Ok(SinkKind::Mqtt),
        other => Err(anyhow!("unknown display sink '{}'", other)),
    }
}

fn read_config_file(path: &Path) -> Result<OverlayConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}
