use ndarray::{concatenate, s, Axis};
use serde::{Deserialize, Serialize};

use crate::cube::RateCube;
use crate::math::Masked;
use crate::prelude::{PipelineStage, StageError, StageResult};
use crate::telemetry::LogManager;

/// Parameters for the reference-pixel background correction.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackgroundConfig {
    /// Rows taken from each of the top and bottom detector edges.
    pub ref_rows: usize,
}

impl Default for BackgroundConfig {
    fn default() -> Self {
        Self { ref_rows: 6 }
    }
}

/// Column-wise background / 1-over-f correction.
///
/// The background per column is the masked median over a band of reference
/// rows at the top and bottom detector edges, subtracted from every row of
/// the column independently per integration. The read-noise variance picks
/// up the factor `1 + 1/sample_count` for the subtraction of a
/// finite-sample median.
///
/// The sample count in the inflation factor is the full band size; masked
/// reference pixels still count towards it even though they are excluded
/// from the median itself.
pub struct BackgroundCorrector {
    config: BackgroundConfig,
    logger: LogManager,
}

impl BackgroundCorrector {
    pub fn new(config: BackgroundConfig) -> Self {
        Self {
            config,
            logger: LogManager::new(),
        }
    }
}

impl PipelineStage for BackgroundCorrector {
    type Input = RateCube;
    type Output = RateCube;

    fn name(&self) -> &'static str {
        "reference_correction"
    }

    fn execute(&self, mut input: RateCube) -> StageResult<RateCube> {
        input.validate()?;
        let band = self.config.ref_rows;
        if band == 0 {
            return Err(StageError::InvalidConfig(
                "ref_rows must be positive".to_string(),
            ));
        }
        let (n_int, n_rows, n_cols) = input.dims();
        if n_rows < 2 * band {
            return Err(StageError::ShapeMismatch(format!(
                "reference band needs {} rows, detector has {n_rows}",
                2 * band
            )));
        }

        let band_data = concatenate(
            Axis(1),
            &[
                input.data.slice(s![.., ..band, ..]),
                input.data.slice(s![.., n_rows - band.., ..]),
            ],
        )
        .map_err(|e| StageError::Internal(e.to_string()))?;
        let band_dq = concatenate(
            Axis(1),
            &[
                input.dq.slice(s![.., ..band, ..]),
                input.dq.slice(s![.., n_rows - band.., ..]),
            ],
        )
        .map_err(|e| StageError::Internal(e.to_string()))?;

        let reference = Masked::new(band_data, band_dq.mapv(|f| f != 0))?;
        let background = reference.median_axis(Axis(1));

        for i in 0..n_int {
            for c in 0..n_cols {
                // a column with no valid reference samples stays uncorrected
                if background.mask()[[i, c]] {
                    continue;
                }
                let level = background.data()[[i, c]];
                for r in 0..n_rows {
                    input.data[[i, r, c]] -= level;
                }
            }
        }

        let sample_count = 2 * band;
        let factor = 1.0 + 1.0 / sample_count as f32;
        input.var_rnoise.mapv_inplace(|v| v * factor);
        input.refresh_err();
        input.background = Some(background.filled(0.0));

        self.logger.record(&format!(
            "subtracted column background from a {sample_count}-row reference band"
        ));
        Ok(input)
    }
}
