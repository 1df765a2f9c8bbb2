use serde::{Deserialize, Serialize};

use crate::cube::{flags, RampCube};
use crate::prelude::{PipelineStage, StageResult};
use crate::telemetry::LogManager;

/// Parameters for the saturation column propagation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SaturationConfig {
    /// Neighborhood radius: columns this far to either side of a saturated
    /// column are flagged as well.
    pub ncols: usize,
}

impl Default for SaturationConfig {
    fn default() -> Self {
        Self { ncols: 1 }
    }
}

/// Expands per-pixel saturation flags to whole detector columns.
///
/// Saturation bleeds along the readout direction, so a column holding at
/// least one saturated pixel is unusable over `[column - ncols,
/// column + ncols]` (clipped at the detector edge) for that group and
/// integration. Only the group-level mask changes; signal values are
/// untouched.
pub struct SaturationColumnPropagator {
    config: SaturationConfig,
    logger: LogManager,
}

impl SaturationColumnPropagator {
    pub fn new(config: SaturationConfig) -> Self {
        Self {
            config,
            logger: LogManager::new(),
        }
    }
}

impl PipelineStage for SaturationColumnPropagator {
    type Input = RampCube;
    type Output = RampCube;

    fn name(&self) -> &'static str {
        "saturation_columns"
    }

    fn execute(&self, mut input: RampCube) -> StageResult<RampCube> {
        input.validate()?;
        let (n_int, n_grp, n_rows, n_cols) = input.dims();
        let ncols = self.config.ncols;

        // Collect hits before flagging: writing while scanning would let a
        // freshly propagated flag seed further propagation.
        let mut hits: Vec<(usize, usize, usize)> = Vec::new();
        for i in 0..n_int {
            for g in 0..n_grp {
                for c in 0..n_cols {
                    let saturated = (0..n_rows)
                        .any(|r| input.groupdq[[i, g, r, c]] & flags::SATURATED != 0);
                    if saturated {
                        hits.push((i, g, c));
                    }
                }
            }
        }

        for &(i, g, c) in &hits {
            let lo = c.saturating_sub(ncols);
            let hi = (c + ncols).min(n_cols - 1);
            for r in 0..n_rows {
                for cc in lo..=hi {
                    input.groupdq[[i, g, r, cc]] |= flags::SATURATED | flags::DO_NOT_USE;
                }
            }
        }
        self.logger.record(&format!(
            "propagated saturation from {} column hits (radius {})",
            hits.len(),
            ncols
        ));
        Ok(input)
    }
}
