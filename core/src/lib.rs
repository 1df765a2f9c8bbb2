//! Detector-physics signal extraction core for NIR ramp-cube reduction.
//!
//! The modules take a multi-integration, multi-group ramp exposure through
//! saturation column propagation, saturation-truncated rate (CDS) estimation,
//! reference-pixel background correction, temporal outlier flagging and
//! masked temporal binning, as a sequence of well-defined processing stages.

pub mod cube;
pub mod math;
pub mod prelude;
pub mod processing;
pub mod reference;
pub mod telemetry;

pub use prelude::{PipelineConfig, PipelineStage, StageError, StageResult};
