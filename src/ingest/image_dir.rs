//! Still-image directory source (`dir://`).
//!
//! Replays the PNG/JPEG files of a local directory in file-name order, one frame
//! per poll, then reports exhaustion. Useful for offline runs against recorded
//! camera stills.
//!
//! Only local paths are accepted; the directory is read once at construction.

use anyhow::{anyhow, Context, Result};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::time::Instant;

use super::{frame_interval, FrameSource, SourceStats};
use crate::frame::Frame;

const IMAGE_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];

/// Configuration for a directory source.
#[derive(Clone, Debug)]
pub struct ImageDirConfig {
    pub path: PathBuf,
    /// Target frame rate; 0 replays as fast as polled.
    pub target_fps: u32,
}

pub struct ImageDirSource {
    config: ImageDirConfig,
    pending: VecDeque<PathBuf>,
    frame_count: u64,
    rejected: u64,
    last_frame_at: Option<Instant>,
}

impl ImageDirSource {
    pub fn new(config: ImageDirConfig) -> Result<Self> {
        let pending = list_images(&config.path)?;
        Ok(Self {
            config,
            pending,
            frame_count: 0,
            rejected: 0,
            last_frame_at: None,
        })
    }

    pub fn remaining(&self) -> usize {
        self.pending.len()
    }
}

impl FrameSource for ImageDirSource {
    fn connect(&mut self) -> Result<()> {
        log::info!(
            "ImageDirSource: {} images queued from {}",
            self.pending.len(),
            self.config.path.display()
        );
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        let Some(path) = self.pending.pop_front() else {
            return Err(anyhow!(
                "dir://{} exhausted after {} frames",
                self.config.path.display(),
                self.frame_count
            ));
        };
        if let (Some(interval), Some(last)) = (frame_interval(self.config.target_fps), self.last_frame_at) {
            let elapsed = last.elapsed();
            if elapsed < interval {
                std::thread::sleep(interval - elapsed);
            }
        }
        self.last_frame_at = Some(Instant::now());

        match image::open(&path) {
            Ok(decoded) => {
                self.frame_count += 1;
                Ok(Some(Frame::from_rgb_image(decoded.to_rgb8(), self.frame_count)))
            }
            Err(e) => {
                self.rejected += 1;
                log::warn!("ImageDirSource: skipping {}: {}", path.display(), e);
                Ok(None)
            }
        }
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            frames_rejected: self.rejected,
            source: format!("dir://{}", self.config.path.display()),
        }
    }
}

fn list_images(dir: &Path) -> Result<VecDeque<PathBuf>> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
        .with_context(|| format!("read image directory {}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        })
        .collect();
    files.sort();
    Ok(files.into())
}
