pub mod fixed;
pub mod none;

pub use fixed::FixedDetector;
pub use none::NullDetector;
