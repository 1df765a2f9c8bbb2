use ndarray::{Array2, Array4};
use serde::{Deserialize, Serialize};

use crate::prelude::{StageError, StageResult};

/// Per-exposure metadata carried alongside the pixel arrays.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExposureMeta {
    /// Detector identity, the key for calibration-map lookup.
    pub detector: String,
    /// Number of frames averaged into each group.
    pub nframes: usize,
    /// Scalar gain correction sourced from the reference metadata, when present.
    pub gain_factor: Option<f32>,
    /// Unit of the signal array.
    pub bunit_data: String,
    /// Unit of the error array.
    pub bunit_err: String,
}

impl ExposureMeta {
    pub fn new(detector: impl Into<String>, nframes: usize) -> Self {
        Self {
            detector: detector.into(),
            nframes,
            gain_factor: None,
            bunit_data: "DN".to_string(),
            bunit_err: "DN".to_string(),
        }
    }
}

/// Raw multi-integration ramp exposure, indexed [integration, group, row,
/// column], with a group-level and a pixel-level data-quality mask.
///
/// Produced once by the upstream calibration chain and consumed by the rate
/// estimation stage.
#[derive(Debug, Clone)]
pub struct RampCube {
    pub data: Array4<f32>,
    pub groupdq: Array4<u32>,
    pub pixeldq: Array2<u32>,
    pub meta: ExposureMeta,
}

impl RampCube {
    pub fn new(
        data: Array4<f32>,
        groupdq: Array4<u32>,
        pixeldq: Array2<u32>,
        meta: ExposureMeta,
    ) -> StageResult<Self> {
        let cube = Self {
            data,
            groupdq,
            pixeldq,
            meta,
        };
        cube.validate()?;
        Ok(cube)
    }

    /// (integrations, groups, rows, columns)
    pub fn dims(&self) -> (usize, usize, usize, usize) {
        self.data.dim()
    }

    /// Checks internal shape consistency; malformed shape is fatal.
    pub fn validate(&self) -> StageResult<()> {
        if self.groupdq.dim() != self.data.dim() {
            return Err(StageError::ShapeMismatch(format!(
                "group dq shape {:?} does not match data shape {:?}",
                self.groupdq.shape(),
                self.data.shape()
            )));
        }
        let (_, _, rows, cols) = self.data.dim();
        if self.pixeldq.dim() != (rows, cols) {
            return Err(StageError::ShapeMismatch(format!(
                "pixel dq shape {:?} does not match detector footprint ({rows}, {cols})",
                self.pixeldq.shape()
            )));
        }
        Ok(())
    }
}
