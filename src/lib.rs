//! Marker overlay pipeline
//!
//! Takes a live camera stream, finds square fiducial markers in each frame and
//! paints a per-marker overlay image onto the marker's quadrilateral, perspective
//! correct, before handing the frame to a display.
//!
//! # Architecture
//!
//! Two stages run concurrently and meet at a capacity-1 buffer:
//!
//! 1. **Ingestion** pulls decoded frames from a `FrameSource` and overwrites the
//!    buffer slot. It never waits on processing.
//! 2. **Processing** takes the freshest frame, runs the `MarkerDetector`
//!    (optionally on a downscaled copy), composites overlays and shows the
//!    result on a `DisplaySink`.
//!
//! Frames produced while processing is busy are dropped, so the display always
//! shows the most recent frame the pipeline could keep up with.
//!
//! # Module Structure
//!
//! - `frame`: `Frame` and the `LatestFrameBuffer` hand-off
//! - `geometry`: quads, convex hulls, homographies, bilinear warping
//! - `catalog`: overlay images keyed by marker id
//! - `compositor`: warp + mask + blend of overlays onto a frame
//! - `detect`: detector trait, detection results, detection scale
//! - `ingest`: frame sources (broker, image directory, synthetic)
//! - `display`: display sinks (snapshot file, broker, in-memory)
//! - `pipeline`: the two stages, stop signal and run report
//! - `config`: file + environment configuration for `overlayd`

pub mod catalog;
pub mod compositor;
pub mod config;
pub mod detect;
pub mod display;
pub mod frame;
pub mod geometry;
pub mod ingest;
pub mod pipeline;

pub use catalog::OverlayCatalog;
pub use compositor::{Composite, CompositeReport, OverlayCompositor, OverlayMask, SkipReason};
pub use config::OverlayConfig;
pub use detect::{Detection, DetectionScale, FixedDetector, MarkerDetector, NullDetector};
pub use display::{CollectingSink, DisplaySink, MqttFrameSink, SnapshotSink};
pub use frame::{BufferStats, Frame, LatestFrameBuffer};
pub use geometry::{ConvexRegion, Homography, Point, Quad};
pub use ingest::{
    open_source, FrameSource, ImageDirSource, MqttFrameSource, SourceSpec, SourceStats,
    SyntheticFrameSource,
};
pub use pipeline::{IngestOutcome, Pipeline, PipelineConfig, PipelineReport, StopSignal};
