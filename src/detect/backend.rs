use anyhow::Result;

use crate::detect::result::Detection;
use crate::frame::Frame;

/// Marker detector capability.
///
/// Implementations return every marker found in `frame`, with corners in the
/// pixel coordinates of the frame they were given. An empty list is a normal
/// result. Errors are per-frame: the pipeline shows the frame without overlays
/// and keeps going.
pub trait MarkerDetector: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Detect markers in a frame.
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}

impl<D: MarkerDetector + ?Sized> MarkerDetector for Box<D> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        (**self).detect(frame)
    }

    fn warm_up(&mut self) -> Result<()> {
        (**self).warm_up()
    }
}
