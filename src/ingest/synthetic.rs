//! Synthetic frame source (`stub://`).
//!
//! Generates a moving gradient so consecutive frames differ. With a
//! `frame_limit` the source runs dry after that many frames, which is how tests
//! exercise source exhaustion.

use anyhow::{anyhow, Result};
use std::time::Instant;

use super::{frame_interval, FrameSource, SourceStats};
use crate::frame::{Frame, CHANNELS};

/// Configuration for a synthetic source.
#[derive(Clone, Debug)]
pub struct SyntheticConfig {
    pub name: String,
    pub width: u32,
    pub height: u32,
    /// Target frame rate; 0 produces frames as fast as they are polled.
    pub target_fps: u32,
    /// Stop after this many frames.
    pub frame_limit: Option<u64>,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            name: "synthetic".to_string(),
            width: 640,
            height: 480,
            target_fps: 30,
            frame_limit: None,
        }
    }
}

pub struct SyntheticFrameSource {
    config: SyntheticConfig,
    frame_count: u64,
    last_frame_at: Option<Instant>,
}

impl SyntheticFrameSource {
    pub fn new(config: SyntheticConfig) -> Self {
        Self {
            config,
            frame_count: 0,
            last_frame_at: None,
        }
    }

    fn generate_pixels(&self) -> Vec<u8> {
        let pixel_count = self.config.width as usize * self.config.height as usize * CHANNELS;
        let mut pixels = vec![0u8; pixel_count];
        for (i, pixel) in pixels.iter_mut().enumerate() {
            *pixel = ((i as u64 / CHANNELS as u64 + self.frame_count) % 256) as u8;
        }
        pixels
    }
}

impl FrameSource for SyntheticFrameSource {
    fn connect(&mut self) -> Result<()> {
        log::info!("SyntheticFrameSource: connected to stub://{}", self.config.name);
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if let Some(limit) = self.config.frame_limit {
            if self.frame_count >= limit {
                return Err(anyhow!(
                    "stub://{} exhausted after {} frames",
                    self.config.name,
                    limit
                ));
            }
        }
        if let (Some(interval), Some(last)) = (frame_interval(self.config.target_fps), self.last_frame_at) {
            let elapsed = last.elapsed();
            if elapsed < interval {
                std::thread::sleep(interval - elapsed);
            }
        }

        self.frame_count += 1;
        self.last_frame_at = Some(Instant::now());
        let frame = Frame::new(
            self.generate_pixels(),
            self.config.width,
            self.config.height,
            self.frame_count,
        )?;
        Ok(Some(frame))
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            frames_rejected: 0,
            source: format!("stub://{}", self.config.name),
        }
    }
}
