use anyhow::Result;

use crate::detect::backend::MarkerDetector;
use crate::detect::result::Detection;
use crate::frame::Frame;

/// Detector that never finds anything. Frames pass through untouched.
#[derive(Default)]
pub struct NullDetector;

impl NullDetector {
    pub fn new() -> Self {
        Self
    }
}

impl MarkerDetector for NullDetector {
    fn name(&self) -> &'static str {
        "none"
    }

    fn detect(&mut self, _frame: &Frame) -> Result<Vec<Detection>> {
        Ok(Vec::new())
    }
}
