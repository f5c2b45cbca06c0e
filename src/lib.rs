//! # Arc Overhang
//!
//! A post-processor that rewrites slicer-emitted G-code so that regions
//! marked as bridge infill are printed as families of concentric circular
//! arcs, enabling unsupported overhangs up to 90°. Filament deposited in a
//! tight arc wraps around previously extruded material and anchors itself
//! in free space; each subsequent arc rests on the prior one.
//!
//! The pipeline:
//! - Parse the motion program into layers and typed segments
//! - Extract bridge regions and the anchor boundary they rest on
//! - Plan an ordered set of concentric arcs filling each region
//! - Emit the arcs as motion commands and splice them back in place
//! - Apply cooling overrides to the layers printed above each arc patch
//!
//! ## Example
//!
//! ```rust,ignore
//! use arc_overhang::{ArcConfig, MotionProgram, Pipeline};
//!
//! let mut program = MotionProgram::parse(&std::fs::read_to_string("model.gcode")?)?;
//! let config = ArcConfig::from_program(&program)?;
//! let report = Pipeline::new(config).process(&mut program)?;
//! println!("{} arcs emitted", report.arcs_emitted);
//! ```

pub mod bridge;
pub mod clipper;
pub mod config;
pub mod cooling;
pub mod gcode;
pub mod geometry;
pub mod pipeline;
pub mod planner;

// Re-export commonly used types
pub use bridge::{BridgeRegion, RegionExtractor};
pub use config::{ArcConfig, PrintSettings};
pub use cooling::{FollowupRewriter, PatchFootprint};
pub use gcode::{Command, Layer, MotionProgram, Segment, SegmentKind, SlicerSettings};
pub use pipeline::{CancelToken, Pipeline, ProcessReport, RegionOutcome};
pub use planner::{plan_region, Arc, ArcPlan, KinematicProfile};

/// Floating-point coordinate type, millimetres.
pub type CoordF = f64;

/// Numerical tolerance for "touching" queries (mm).
pub const EPSILON: CoordF = 1e-6;

/// Coarser tolerance used when matching buffered boundaries against each
/// other. Clipper round joins displace vertices by up to the arc tolerance,
/// so shared-boundary detection needs slack well above `EPSILON`.
pub const SHARED_BOUNDARY_TOL: CoordF = 1e-2;

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for post-processing operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Emit error: {0}")]
    Emit(String),

    #[error("Cancelled")]
    Cancelled,
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
