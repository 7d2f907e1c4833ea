//! Display sinks.
//!
//! The processing stage hands every composited frame to a `DisplaySink` and
//! polls `should_stop` once per iteration. Sinks are owned by the pipeline;
//! there is no global window state.

use anyhow::{anyhow, Context, Result};
use image::imageops::{self, FilterType};
use image::{ImageFormat, RgbImage};
use rumqttc::{Client, Connection, QoS, RecvTimeoutError};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::frame::Frame;
use crate::ingest::mqtt::broker_endpoint;
use crate::pipeline::StopSignal;

/// Longest single wait of the display connection thread.
const CONNECTION_POLL: Duration = Duration::from_millis(100);

/// Consumer side of the pipeline.
pub trait DisplaySink: Send {
    /// Render one composited frame.
    fn show(&mut self, frame: &Frame) -> Result<()>;

    /// True once the sink wants the pipeline to stop.
    fn should_stop(&self) -> bool {
        false
    }
}

impl<S: DisplaySink + ?Sized> DisplaySink for Box<S> {
    fn show(&mut self, frame: &Frame) -> Result<()> {
        (**self).show(frame)
    }

    fn should_stop(&self) -> bool {
        (**self).should_stop()
    }
}

/// Enlarge a frame by an integer factor for viewing. Factor 1 returns a plain copy.
pub fn upscale(frame: &Frame, factor: u32) -> RgbImage {
    let image = frame.to_rgb_image();
    if factor <= 1 {
        return image;
    }
    imageops::resize(
        &image,
        frame.width.saturating_mul(factor),
        frame.height.saturating_mul(factor),
        FilterType::Triangle,
    )
}

// ----------------------------------------------------------------------------
// SnapshotSink: latest frame as an image file
// ----------------------------------------------------------------------------

/// Writes the most recent frame to an image file (format from the extension).
///
/// The file is replaced atomically (write to a temp sibling, then rename) so a
/// viewer polling it never reads a partial image. Writes are rate limited by
/// `min_interval`; frames arriving in between are counted but not written.
pub struct SnapshotSink {
    path: PathBuf,
    display_scale: u32,
    min_interval: Duration,
    last_write: Option<Instant>,
    written: u64,
    shown: u64,
    stop: StopSignal,
}

impl SnapshotSink {
    pub fn new(path: impl Into<PathBuf>, display_scale: u32, stop: StopSignal) -> Result<Self> {
        let path = path.into();
        ImageFormat::from_path(&path)
            .with_context(|| format!("snapshot path {} has no image extension", path.display()))?;
        Ok(Self {
            path,
            display_scale: display_scale.max(1),
            min_interval: Duration::ZERO,
            last_write: None,
            written: 0,
            shown: 0,
            stop,
        })
    }

    pub fn with_min_interval(mut self, interval: Duration) -> Self {
        self.min_interval = interval;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    pub fn shown(&self) -> u64 {
        self.shown
    }
}

impl DisplaySink for SnapshotSink {
    fn show(&mut self, frame: &Frame) -> Result<()> {
        self.shown += 1;
        if self
            .last_write
            .is_some_and(|last| last.elapsed() < self.min_interval)
        {
            return Ok(());
        }
        let image = upscale(frame, self.display_scale);
        let file_name = self
            .path
            .file_name()
            .ok_or_else(|| anyhow!("snapshot path {} has no file name", self.path.display()))?;
        let tmp = self
            .path
            .with_file_name(format!(".{}.tmp", file_name.to_string_lossy()));
        let format = ImageFormat::from_path(&self.path)?;
        image
            .save_with_format(&tmp, format)
            .with_context(|| format!("write snapshot {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("replace snapshot {}", self.path.display()))?;
        self.last_write = Some(Instant::now());
        self.written += 1;
        Ok(())
    }

    fn should_stop(&self) -> bool {
        self.stop.is_raised()
    }
}

// ----------------------------------------------------------------------------
// MqttFrameSink: publish composited frames
// ----------------------------------------------------------------------------

/// Publishes each composited frame as JPEG on a broker topic.
///
/// The broker connection is driven by a background thread that polls in short
/// slices, so dropping the sink returns within one slice even when the broker
/// never answers.
pub struct MqttFrameSink {
    client: Option<Client>,
    topic: String,
    display_scale: u32,
    closing: Arc<AtomicBool>,
    connection_handle: Option<JoinHandle<()>>,
    stop: StopSignal,
}

impl MqttFrameSink {
    pub fn connect(
        broker_url: &str,
        topic: &str,
        client_id: &str,
        display_scale: u32,
        stop: StopSignal,
    ) -> Result<Self> {
        let endpoint = broker_endpoint(broker_url)?;
        let mut options = endpoint.options(client_id);
        options.set_keep_alive(Duration::from_secs(30));
        options.set_max_packet_size(32 * 1024 * 1024, 32 * 1024 * 1024);
        let (client, connection) = Client::new(options, 4);

        let closing = Arc::new(AtomicBool::new(false));
        let handle = std::thread::Builder::new()
            .name("display-mqtt".to_string())
            .spawn({
                let closing = Arc::clone(&closing);
                let stop = stop.clone();
                move || drive_connection(connection, &closing, &stop)
            })
            .context("spawn display connection thread")?;
        log::info!("MqttFrameSink: publishing to {} on {}", topic, broker_url);

        Ok(Self {
            client: Some(client),
            topic: topic.to_string(),
            display_scale: display_scale.max(1),
            closing,
            connection_handle: Some(handle),
            stop,
        })
    }
}

fn drive_connection(mut connection: Connection, closing: &AtomicBool, stop: &StopSignal) {
    while !closing.load(Ordering::SeqCst) {
        match connection.recv_timeout(CONNECTION_POLL) {
            Ok(Ok(_)) | Err(RecvTimeoutError::Timeout) => {}
            Ok(Err(e)) => {
                if !closing.load(Ordering::SeqCst) {
                    log::warn!("MqttFrameSink: connection error: {}", e);
                    stop.raise();
                }
                break;
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
}

impl DisplaySink for MqttFrameSink {
    fn show(&mut self, frame: &Frame) -> Result<()> {
        let client = self
            .client
            .as_ref()
            .ok_or_else(|| anyhow!("MqttFrameSink: client already closed"))?;
        let image = upscale(frame, self.display_scale);
        let mut jpeg = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut jpeg), ImageFormat::Jpeg)
            .context("encode frame as JPEG")?;
        // Frames are disposable; a full request queue drops this one.
        if let Err(e) = client.try_publish(&self.topic, QoS::AtMostOnce, false, jpeg) {
            log::debug!("MqttFrameSink: frame #{} not published: {}", frame.sequence, e);
        }
        Ok(())
    }

    fn should_stop(&self) -> bool {
        self.stop.is_raised()
    }
}

impl Drop for MqttFrameSink {
    fn drop(&mut self) {
        self.closing.store(true, Ordering::SeqCst);
        if let Some(client) = self.client.take() {
            let _ = client.try_disconnect();
        }
        if let Some(handle) = self.connection_handle.take() {
            let _ = handle.join();
        }
    }
}

// ----------------------------------------------------------------------------
// CollectingSink: in-memory (tests, offline runs)
// ----------------------------------------------------------------------------

/// Keeps every shown frame. Asks to stop once `stop_after` frames were shown.
#[derive(Default)]
pub struct CollectingSink {
    frames: Vec<Frame>,
    stop_after: Option<usize>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop_after(frames: usize) -> Self {
        Self {
            frames: Vec::new(),
            stop_after: Some(frames),
        }
    }

    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    pub fn into_frames(self) -> Vec<Frame> {
        self.frames
    }
}

impl DisplaySink for CollectingSink {
    fn show(&mut self, frame: &Frame) -> Result<()> {
        self.frames.push(frame.clone());
        Ok(())
    }

    fn should_stop(&self) -> bool {
        self.stop_after.is_some_and(|n| self.frames.len() >= n)
    }
}
