use serde::{Deserialize, Serialize};

use crate::processing::{BackgroundConfig, BinningConfig, OutlierConfig, SaturationConfig};

pub use crate::cube::{ExposureMeta, RampCube, RateCube};
pub use crate::reference::{CalibrationMaps, CalibrationSource};

/// Aggregated per-stage parameters for one reduction run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub saturation: SaturationConfig,
    pub refcorr: BackgroundConfig,
    pub flagging: OutlierConfig,
    pub timeaverage: BinningConfig,
}

/// Common error type for stage execution.
#[derive(thiserror::Error, Debug)]
pub enum StageError {
    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("reference data unavailable: {0}")]
    ReferenceData(String),
    #[error("internal failure: {0}")]
    Internal(String),
}

pub type StageResult<T> = Result<T, StageError>;

/// Trait describing the synchronous cube-to-cube processing stages.
///
/// A stage consumes its input by value: cubes are handed off stage to stage
/// and the previous cube is dropped once the next one exists, bounding peak
/// memory for large exposures. A failed stage yields no partial output.
pub trait PipelineStage {
    type Input;
    type Output;

    fn name(&self) -> &'static str;
    fn execute(&self, input: Self::Input) -> StageResult<Self::Output>;
}
