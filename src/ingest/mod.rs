//! Frame ingestion sources.
//!
//! Sources produce decoded `Frame`s for the ingestion stage, which hands them to
//! the `LatestFrameBuffer`. The source is chosen by URL scheme:
//! - `mqtt://host:port` / `tcp://host:port`: encoded frames published on a broker topic
//!   (`mqtts://` / `ssl://` for TLS)
//! - `dir:///path`: still images replayed from a directory, once
//! - `stub://name`: synthetic frames (testing)
//!
//! `next_frame` returning `Ok(None)` means "nothing yet, poll again". An `Err`
//! means the source is exhausted or broken for good; the ingestion stage stops.

pub mod image_dir;
pub mod mqtt;
pub mod synthetic;

use anyhow::{anyhow, Result};

use crate::frame::Frame;

pub use image_dir::{ImageDirConfig, ImageDirSource};
pub use mqtt::{MqttConfig, MqttFrameSource};
pub use synthetic::{SyntheticConfig, SyntheticFrameSource};

/// Statistics for a frame source.
#[derive(Clone, Debug, Default)]
pub struct SourceStats {
    pub frames_captured: u64,
    /// Payloads received but not decodable as a frame.
    pub frames_rejected: u64,
    pub source: String,
}

/// Producer side of the pipeline.
pub trait FrameSource: Send {
    /// Connect / open the source. Called once before the first `next_frame`.
    fn connect(&mut self) -> Result<()> {
        Ok(())
    }

    /// Poll for the next frame.
    fn next_frame(&mut self) -> Result<Option<Frame>>;

    /// Check if the source is healthy.
    fn is_healthy(&self) -> bool {
        true
    }

    fn stats(&self) -> SourceStats;
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn connect(&mut self) -> Result<()> {
        (**self).connect()
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        (**self).next_frame()
    }

    fn is_healthy(&self) -> bool {
        (**self).is_healthy()
    }

    fn stats(&self) -> SourceStats {
        (**self).stats()
    }
}

/// Source selection settings (see `config::SourceSettings` for defaults).
#[derive(Clone, Debug)]
pub struct SourceSpec {
    pub url: String,
    pub camera_id: u32,
    pub topic_template: String,
    pub client_id: String,
    pub width: u32,
    pub height: u32,
    pub target_fps: u32,
}

/// Build a source from its URL scheme.
pub fn open_source(spec: &SourceSpec) -> Result<Box<dyn FrameSource>> {
    let (scheme, rest) = spec
        .url
        .split_once("://")
        .ok_or_else(|| anyhow!("source url '{}' has no scheme", spec.url))?;
    match scheme {
        "mqtt" | "tcp" | "mqtts" | "ssl" => Ok(Box::new(MqttFrameSource::new(MqttConfig {
            broker_url: spec.url.clone(),
            topic: mqtt::frame_topic(&spec.topic_template, spec.camera_id),
            client_id: spec.client_id.clone(),
            ..MqttConfig::default()
        })?)),
        "dir" => Ok(Box::new(ImageDirSource::new(ImageDirConfig {
            path: rest.into(),
            target_fps: spec.target_fps,
        })?)),
        "stub" => Ok(Box::new(SyntheticFrameSource::new(SyntheticConfig {
            name: rest.to_string(),
            width: spec.width,
            height: spec.height,
            target_fps: spec.target_fps,
            frame_limit: None,
        }))),
        other => Err(anyhow!(
            "unsupported source scheme '{}'; expected mqtt, tcp, mqtts, ssl, dir or stub",
            other
        )),
    }
}

/// Sleep interval between frames for a target rate; zero fps means unpaced.
pub(crate) fn frame_interval(target_fps: u32) -> Option<std::time::Duration> {
    (target_fps > 0).then(|| std::time::Duration::from_secs_f64(1.0 / f64::from(target_fps)))
}
