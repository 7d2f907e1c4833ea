//! Frames and the freshest-frame hand-off.
//!
//! - `Frame`: owned RGB8 pixel buffer produced by a `FrameSource`.
//! - `LatestFrameBuffer`: capacity-1 slot between the ingestion and processing
//!   stages. A new `put` always replaces an unread frame ("drop older, keep newest").
//!
//! Frames are moved across the buffer boundary, so the processing stage never
//! observes a frame that the ingestion stage is still writing.

use anyhow::{anyhow, Result};
use image::RgbImage;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Bytes per pixel. Frames are always RGB8.
pub const CHANNELS: usize = 3;

// ----------------------------------------------------------------------------
// Frame
// ----------------------------------------------------------------------------

/// Decoded video frame, RGB8, row-major.
#[derive(Clone)]
pub struct Frame {
    data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Monotonic sequence number assigned by the source.
    pub sequence: u64,
    captured_at: Instant,
}

impl Frame {
    /// Wrap raw RGB8 bytes. Fails when the buffer length does not match the dimensions.
    pub fn new(data: Vec<u8>, width: u32, height: u32, sequence: u64) -> Result<Self> {
        let expected = width as usize * height as usize * CHANNELS;
        if data.len() != expected {
            return Err(anyhow!(
                "frame buffer is {} bytes, expected {} for {}x{} RGB",
                data.len(),
                expected,
                width,
                height
            ));
        }
        Ok(Self {
            data,
            width,
            height,
            sequence,
            captured_at: Instant::now(),
        })
    }

    /// Solid-colour frame.
    pub fn filled(width: u32, height: u32, rgb: [u8; 3], sequence: u64) -> Self {
        let data = rgb
            .iter()
            .copied()
            .cycle()
            .take(width as usize * height as usize * CHANNELS)
            .collect();
        Self {
            data,
            width,
            height,
            sequence,
            captured_at: Instant::now(),
        }
    }

    pub fn from_rgb_image(image: RgbImage, sequence: u64) -> Self {
        let (width, height) = image.dimensions();
        Self {
            data: image.into_raw(),
            width,
            height,
            sequence,
            captured_at: Instant::now(),
        }
    }

    /// Copy of the pixels as an `image` buffer. The frame itself is left untouched.
    pub fn to_rgb_image(&self) -> RgbImage {
        // Length is checked at construction, so from_raw cannot fail here.
        RgbImage::from_raw(self.width, self.height, self.data.clone())
            .unwrap_or_else(|| RgbImage::new(self.width, self.height))
    }

    pub fn pixels(&self) -> &[u8] {
        &self.data
    }

    /// Pixel at (x, y), or `None` outside the frame.
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let idx = (y as usize * self.width as usize + x as usize) * CHANNELS;
        Some([self.data[idx], self.data[idx + 1], self.data[idx + 2]])
    }

    pub fn age(&self) -> Duration {
        self.captured_at.elapsed()
    }

    /// Carry the sequence number and capture instant over to a derived frame.
    pub(crate) fn derive(&self, image: RgbImage) -> Self {
        let (width, height) = image.dimensions();
        Self {
            data: image.into_raw(),
            width,
            height,
            sequence: self.sequence,
            captured_at: self.captured_at,
        }
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("sequence", &self.sequence)
            .finish_non_exhaustive()
    }
}

// ----------------------------------------------------------------------------
// LatestFrameBuffer: single-slot hand-off
// ----------------------------------------------------------------------------

/// Counters for the hand-off slot.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BufferStats {
    pub puts: u64,
    pub takes: u64,
    /// Frames overwritten before the consumer took them.
    pub dropped: u64,
}

struct Slot {
    frame: Option<Frame>,
    stats: BufferStats,
}

/// Capacity-1, overwrite-on-full frame buffer.
///
/// - `put` never waits for the consumer and always leaves the slot holding the new frame.
/// - `take` waits up to a timeout and returns only the most recently inserted frame.
///
/// The slot is swapped as a whole value under the mutex, so a racing `take`
/// sees either the old frame or the new one, never a mix.
pub struct LatestFrameBuffer {
    slot: Mutex<Slot>,
    ready: Condvar,
}

impl LatestFrameBuffer {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(Slot {
                frame: None,
                stats: BufferStats::default(),
            }),
            ready: Condvar::new(),
        }
    }

    /// Store `frame`, discarding any unread frame.
    pub fn put(&self, frame: Frame) {
        let displaced = {
            let mut slot = self.lock();
            slot.stats.puts += 1;
            let displaced = slot.frame.replace(frame);
            if displaced.is_some() {
                slot.stats.dropped += 1;
            }
            displaced
        };
        self.ready.notify_one();
        if let Some(old) = displaced {
            log::trace!("dropped unread frame #{}", old.sequence);
        }
    }

    /// Wait up to `timeout` for a frame. `None` means nothing arrived in time.
    pub fn take(&self, timeout: Duration) -> Option<Frame> {
        let guard = self.lock();
        let (mut slot, _) = self
            .ready
            .wait_timeout_while(guard, timeout, |slot| slot.frame.is_none())
            .unwrap_or_else(PoisonError::into_inner);
        let frame = slot.frame.take()?;
        slot.stats.takes += 1;
        Some(frame)
    }

    /// Non-blocking variant of `take`.
    pub fn try_take(&self) -> Option<Frame> {
        let mut slot = self.lock();
        let frame = slot.frame.take()?;
        slot.stats.takes += 1;
        Some(frame)
    }

    /// True when an unread frame is waiting.
    pub fn has_fresh(&self) -> bool {
        self.lock().frame.is_some()
    }

    pub fn stats(&self) -> BufferStats {
        self.lock().stats
    }

    // A panic while holding the lock cannot leave a half-written frame behind,
    // so a poisoned slot is still consistent.
    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for LatestFrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn frame(sequence: u64) -> Frame {
        Frame::filled(4, 4, [sequence as u8, 0, 0], sequence)
    }

    #[test]
    fn frame_rejects_mismatched_buffer() {
        assert!(Frame::new(vec![0; 10], 2, 2, 0).is_err());
        assert!(Frame::new(vec![0; 12], 2, 2, 0).is_ok());
    }

    #[test]
    fn frame_pixel_lookup() {
        let f = Frame::filled(3, 2, [1, 2, 3], 0);
        assert_eq!(f.pixel(2, 1), Some([1, 2, 3]));
        assert_eq!(f.pixel(3, 0), None);
        assert_eq!(f.to_rgb_image().dimensions(), (3, 2));
    }

    #[test]
    fn take_returns_newest_of_rapid_puts() {
        let buffer = LatestFrameBuffer::new();
        for seq in 1..=10 {
            buffer.put(frame(seq));
        }

        let taken = buffer.take(Duration::from_millis(10)).expect("frame");
        assert_eq!(taken.sequence, 10);
        assert!(buffer.try_take().is_none());

        let stats = buffer.stats();
        assert_eq!(stats.puts, 10);
        assert_eq!(stats.takes, 1);
        assert_eq!(stats.dropped, 9);
    }

    #[test]
    fn take_times_out_when_empty() {
        let buffer = LatestFrameBuffer::new();
        let start = Instant::now();
        assert!(buffer.take(Duration::from_millis(20)).is_none());
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn take_clears_fresh_flag() {
        let buffer = LatestFrameBuffer::new();
        buffer.put(frame(1));
        assert!(buffer.has_fresh());
        assert!(buffer.take(Duration::ZERO).is_some());
        assert!(!buffer.has_fresh());
        assert!(buffer.take(Duration::from_millis(5)).is_none());
    }

    #[test]
    fn put_does_not_wait_for_consumer() {
        let buffer = LatestFrameBuffer::new();
        let start = Instant::now();
        for seq in 0..1_000 {
            buffer.put(frame(seq));
        }
        assert!(start.elapsed() < Duration::from_secs(1));
        assert_eq!(buffer.stats().dropped, 999);
    }

    #[test]
    fn blocked_take_wakes_on_put() {
        let buffer = Arc::new(LatestFrameBuffer::new());
        let producer = {
            let buffer = Arc::clone(&buffer);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                buffer.put(frame(42));
            })
        };

        let taken = buffer.take(Duration::from_secs(5)).expect("frame");
        assert_eq!(taken.sequence, 42);
        producer.join().unwrap();
    }

    #[test]
    fn concurrent_puts_never_yield_stale_frame() {
        let buffer = Arc::new(LatestFrameBuffer::new());
        let producers: Vec<_> = (0..4u64)
            .map(|p| {
                let buffer = Arc::clone(&buffer);
                thread::spawn(move || {
                    for i in 0..250u64 {
                        buffer.put(Frame::filled(8, 8, [p as u8; 3], p * 1_000 + i));
                    }
                })
            })
            .collect();

        let mut last_per_producer = [None::<u64>; 4];
        while producers.iter().any(|h| !h.is_finished()) {
            if let Some(f) = buffer.take(Duration::from_millis(1)) {
                let p = (f.sequence / 1_000) as usize;
                // Whole-frame swap: pixel content always matches its producer.
                assert!(f.pixels().iter().all(|&b| b == p as u8));
                if let Some(prev) = last_per_producer[p] {
                    assert!(f.sequence > prev);
                }
                last_per_producer[p] = Some(f.sequence);
            }
        }
        for handle in producers {
            handle.join().unwrap();
        }
        let stats = buffer.stats();
        assert_eq!(stats.puts, 1_000);
    }

    #[test]
    fn buffer_survives_poisoned_slot() {
        let buffer = LatestFrameBuffer::new();
        buffer.put(frame(1));

        let panicked = thread::scope(|scope| {
            scope
                .spawn(|| {
                    let _slot = buffer.slot.lock().unwrap();
                    panic!("producer died holding the slot");
                })
                .join()
                .is_err()
        });
        assert!(panicked);
        assert!(buffer.slot.is_poisoned());

        assert_eq!(buffer.take(Duration::ZERO).map(|f| f.sequence), Some(1));
        buffer.put(frame(2));
        buffer.put(frame(3));
        assert_eq!(buffer.take(Duration::from_millis(10)).map(|f| f.sequence), Some(3));
        assert_eq!(buffer.stats().dropped, 1);
    }

    #[test]
    fn derived_frame_keeps_capture_time() {
        let original = frame(7);
        thread::sleep(Duration::from_millis(5));
        let derived = original.derive(original.to_rgb_image());
        assert_eq!(derived.sequence, 7);
        assert!(derived.age() >= Duration::from_millis(5));
    }
}
