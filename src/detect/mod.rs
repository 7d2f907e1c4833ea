mod backend;
mod backends;
mod result;
mod scale;

pub use backend::MarkerDetector;
pub use backends::{FixedDetector, NullDetector};
pub use result::Detection;
pub use scale::DetectionScale;
