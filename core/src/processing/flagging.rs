use ndarray::Zip;
use serde::{Deserialize, Serialize};

use crate::cube::{flags, RateCube};
use crate::math::stats;
use crate::prelude::{PipelineStage, StageError, StageResult};
use crate::telemetry::LogManager;

/// Parameters for temporal outlier flagging.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutlierConfig {
    /// Clip threshold in standard deviations.
    pub sigma: f32,
    /// Upper bound on clip iterations per pixel.
    pub max_iters: usize,
}

impl Default for OutlierConfig {
    fn default() -> Self {
        Self {
            sigma: 5.0,
            max_iters: 5,
        }
    }
}

/// Temporal outlier flagging by iterative sigma clipping.
///
/// Clipping runs per pixel along the integration axis. New outliers are the
/// positions where the clipped state differs from the pre-existing mask
/// state (XOR); exactly those positions pick up
/// `JUMP_DETECTED | DO_NOT_USE`. Existing flags are never cleared. Signal
/// values are retained; the updated mask carries the clip state downstream.
///
/// Known limitation, kept on purpose: a real time-varying source (e.g. a
/// transit) inflates the per-pixel standard deviation and can suppress
/// true-outlier detection.
pub struct OutlierFlagger {
    config: OutlierConfig,
    logger: LogManager,
}

impl OutlierFlagger {
    pub fn new(config: OutlierConfig) -> Self {
        Self {
            config,
            logger: LogManager::new(),
        }
    }
}

impl PipelineStage for OutlierFlagger {
    type Input = RateCube;
    type Output = RateCube;

    fn name(&self) -> &'static str {
        "outlier_flagging"
    }

    fn execute(&self, mut input: RateCube) -> StageResult<RateCube> {
        input.validate()?;
        if !(self.config.sigma > 0.0) {
            return Err(StageError::InvalidConfig(format!(
                "clip threshold must be positive, got {}",
                self.config.sigma
            )));
        }

        let clipped =
            stats::sigma_clip_axis0(&input.data.view(), self.config.sigma, self.config.max_iters);

        let mut new_outliers = 0_usize;
        Zip::from(&mut input.dq).and(&clipped).for_each(|dq, &clip| {
            let previously_bad = *dq != 0;
            if previously_bad != clip {
                *dq |= flags::JUMP_DETECTED | flags::DO_NOT_USE;
                new_outliers += 1;
            }
        });

        self.logger
            .record(&format!("flagged {new_outliers} new temporal outliers"));
        Ok(input)
    }
}
