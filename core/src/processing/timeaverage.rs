use ndarray::{s, Array3, Array4, ArrayView3, Axis, Zip};
use serde::{Deserialize, Serialize};

use crate::cube::{flags, RateCube};
use crate::math::Masked;
use crate::prelude::{PipelineStage, StageError, StageResult};
use crate::telemetry::LogManager;

/// Parameters for the temporal binning stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BinningConfig {
    /// Integrations averaged into one output integration.
    pub num_ave: usize,
}

impl Default for BinningConfig {
    fn default() -> Self {
        Self { num_ave: 25 }
    }
}

/// Masked temporal binning of the integration axis.
///
/// The integration axis is truncated to the largest multiple of the bin size
/// (trailing remainder integrations are dropped), then each contiguous bin
/// collapses to the masked mean of its valid samples. Variances become the
/// masked mean divided by the valid-sample count, the bin-mean variance. A
/// bin with zero valid samples for a pixel yields signal/variance/error 0.0
/// with DO_NOT_USE set: zero is a sentinel, not a measurement. The output
/// mask is not a union of input flags.
///
/// The effective-group counts are summed across the bin (the NaN sentinel
/// propagates); the background array, when present, is averaged.
pub struct TemporalBinner {
    config: BinningConfig,
    logger: LogManager,
}

impl TemporalBinner {
    pub fn new(config: BinningConfig) -> Self {
        Self {
            config,
            logger: LogManager::new(),
        }
    }

    fn binned(
        &self,
        a: ArrayView3<f32>,
        n_bins: usize,
        width: usize,
    ) -> StageResult<Array4<f32>> {
        let (_, rows, cols) = a.dim();
        a.to_owned()
            .into_shape((n_bins, width, rows, cols))
            .map_err(|e| StageError::Internal(e.to_string()))
    }
}

impl PipelineStage for TemporalBinner {
    type Input = RateCube;
    type Output = RateCube;

    fn name(&self) -> &'static str {
        "time_average"
    }

    fn execute(&self, input: RateCube) -> StageResult<RateCube> {
        input.validate()?;
        let width = self.config.num_ave;
        if width == 0 {
            return Err(StageError::InvalidConfig(
                "bin size must be positive".to_string(),
            ));
        }
        let (n_int, n_rows, n_cols) = input.dims();
        let kept = n_int - n_int % width;
        let n_bins = kept / width;
        if kept < n_int {
            self.logger.detail(&format!(
                "dropping {} trailing integrations past the last full bin",
                n_int - kept
            ));
        }

        let bin_mask = input
            .dq
            .slice(s![..kept, .., ..])
            .mapv(|f| f != 0)
            .into_shape((n_bins, width, n_rows, n_cols))
            .map_err(|e| StageError::Internal(e.to_string()))?;

        let data = Masked::new(
            self.binned(input.data.slice(s![..kept, .., ..]), n_bins, width)?,
            bin_mask.clone(),
        )?;
        let var_p = Masked::new(
            self.binned(input.var_poisson.slice(s![..kept, .., ..]), n_bins, width)?,
            bin_mask.clone(),
        )?;
        let var_r = Masked::new(
            self.binned(input.var_rnoise.slice(s![..kept, .., ..]), n_bins, width)?,
            bin_mask,
        )?;

        let count = data.count_axis(Axis(1));
        let mean = data.mean_axis(Axis(1));

        // bin-mean variance: masked mean over the valid-sample count
        let mut var_poisson = var_p.mean_axis(Axis(1)).filled(0.0);
        let mut var_rnoise = var_r.mean_axis(Axis(1)).filled(0.0);
        Zip::from(&mut var_poisson).and(&count).for_each(|v, &n| {
            if n > 0.0 {
                *v /= n;
            }
        });
        Zip::from(&mut var_rnoise).and(&count).for_each(|v, &n| {
            if n > 0.0 {
                *v /= n;
            }
        });

        let dq = mean.mask().mapv(|m| if m { flags::DO_NOT_USE } else { 0 });

        let ngroup = self
            .binned(input.ngroup.slice(s![..kept, .., ..]), n_bins, width)?
            .sum_axis(Axis(1));

        let background = match &input.background {
            Some(bg) => {
                let bg = bg
                    .slice(s![..kept, ..])
                    .to_owned()
                    .into_shape((n_bins, width, n_cols))
                    .map_err(|e| StageError::Internal(e.to_string()))?;
                Some(bg.mean_axis(Axis(1)).ok_or_else(|| {
                    StageError::Internal("empty background bin".to_string())
                })?)
            }
            None => None,
        };

        self.logger.record(&format!(
            "averaged {kept} integrations into {n_bins} bins of {width}"
        ));

        let mut out = RateCube {
            data: mean.filled(0.0),
            dq,
            var_poisson,
            var_rnoise,
            err: Array3::zeros((n_bins, n_rows, n_cols)),
            ngroup,
            background,
            meta: input.meta,
        };
        out.refresh_err();
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cube::ExposureMeta;
    use approx::assert_abs_diff_eq;
    use ndarray::{Array2, Array3};

    fn counting_cube(n_int: usize) -> RateCube {
        // data value = integration index + 1, one value per pixel
        let data = Array3::from_shape_fn((n_int, 2, 2), |(i, _, _)| (i + 1) as f32);
        RateCube {
            data,
            dq: Array3::zeros((n_int, 2, 2)),
            var_poisson: Array3::from_elem((n_int, 2, 2), 0.4),
            var_rnoise: Array3::from_elem((n_int, 2, 2), 0.2),
            err: Array3::from_elem((n_int, 2, 2), (0.6_f32).sqrt()),
            ngroup: Array3::from_elem((n_int, 2, 2), 9.0),
            background: None,
            meta: ExposureMeta::new("NRS1", 1),
        }
    }

    #[test]
    fn zero_bin_size_is_a_configuration_error() {
        let stage = TemporalBinner::new(BinningConfig { num_ave: 0 });
        assert!(matches!(
            stage.execute(counting_cube(4)),
            Err(StageError::InvalidConfig(_))
        ));
    }

    #[test]
    fn trailing_remainder_integrations_are_dropped() {
        let stage = TemporalBinner::new(BinningConfig { num_ave: 2 });
        let out = stage.execute(counting_cube(5)).unwrap();
        assert_eq!(out.dims(), (2, 2, 2));
        // bins average (1, 2) and (3, 4); integration 5 is dropped
        assert_abs_diff_eq!(out.data[[0, 0, 0]], 1.5, epsilon = 1e-6);
        assert_abs_diff_eq!(out.data[[1, 1, 1]], 3.5, epsilon = 1e-6);
    }

    #[test]
    fn variances_shrink_with_the_valid_sample_count() {
        let stage = TemporalBinner::new(BinningConfig { num_ave: 2 });
        let out = stage.execute(counting_cube(4)).unwrap();
        assert_abs_diff_eq!(out.var_poisson[[0, 0, 0]], 0.2, epsilon = 1e-6);
        assert_abs_diff_eq!(out.var_rnoise[[0, 0, 0]], 0.1, epsilon = 1e-6);
        assert_abs_diff_eq!(
            out.err[[0, 0, 0]],
            (0.3_f32).sqrt(),
            epsilon = 1e-6
        );
    }

    #[test]
    fn masked_samples_are_left_out_of_the_bin_mean() {
        let mut cube = counting_cube(4);
        cube.dq[[0, 0, 0]] = flags::JUMP_DETECTED | flags::DO_NOT_USE;
        let stage = TemporalBinner::new(BinningConfig { num_ave: 2 });
        let out = stage.execute(cube).unwrap();
        // only integration 1 (value 2.0) survives in bin 0 for that pixel
        assert_abs_diff_eq!(out.data[[0, 0, 0]], 2.0, epsilon = 1e-6);
        assert_eq!(out.dq[[0, 0, 0]], 0);
        // single-sample bin keeps the sample variance
        assert_abs_diff_eq!(out.var_poisson[[0, 0, 0]], 0.4, epsilon = 1e-6);
    }

    #[test]
    fn a_fully_masked_bin_yields_the_zero_sentinel() {
        let mut cube = counting_cube(4);
        cube.dq[[0, 1, 1]] = flags::DO_NOT_USE;
        cube.dq[[1, 1, 1]] = flags::DO_NOT_USE;
        let stage = TemporalBinner::new(BinningConfig { num_ave: 2 });
        let out = stage.execute(cube).unwrap();
        assert_eq!(out.dq[[0, 1, 1]], flags::DO_NOT_USE);
        assert_eq!(out.data[[0, 1, 1]], 0.0);
        assert_eq!(out.var_poisson[[0, 1, 1]], 0.0);
        assert_eq!(out.err[[0, 1, 1]], 0.0);
        // the second bin for that pixel is untouched
        assert_eq!(out.dq[[1, 1, 1]], 0);
    }

    #[test]
    fn valid_sample_counts_are_conserved_across_bins() {
        let mut cube = counting_cube(9);
        cube.dq[[0, 0, 0]] = flags::DO_NOT_USE;
        cube.dq[[5, 1, 0]] = flags::DO_NOT_USE;
        cube.dq[[8, 0, 1]] = flags::DO_NOT_USE; // beyond the truncation point
        let kept_invalid = 2;
        let stage = TemporalBinner::new(BinningConfig { num_ave: 4 });

        let trimmed_mask = cube.dq.slice(s![..8, .., ..]).mapv(|f| f != 0);
        let valid_inputs = trimmed_mask.iter().filter(|&&m| !m).count();
        assert_eq!(valid_inputs, 8 * 4 - kept_invalid);

        let out = stage.execute(cube).unwrap();
        // recover per-bin counts from the Poisson variance ratio 0.4 / n
        let mut recovered = 0.0_f32;
        for ((_, &v), &dq) in out.var_poisson.indexed_iter().zip(out.dq.iter()) {
            assert_eq!(dq, 0);
            recovered += 0.4 / v;
        }
        assert_abs_diff_eq!(recovered, valid_inputs as f32, epsilon = 1e-3);
    }

    #[test]
    fn ngroup_is_summed_and_the_nan_sentinel_propagates() {
        let mut cube = counting_cube(4);
        cube.ngroup[[2, 0, 0]] = f32::NAN;
        let stage = TemporalBinner::new(BinningConfig { num_ave: 2 });
        let out = stage.execute(cube).unwrap();
        assert_abs_diff_eq!(out.ngroup[[0, 0, 0]], 18.0, epsilon = 1e-6);
        assert!(out.ngroup[[1, 0, 0]].is_nan());
    }

    #[test]
    fn background_is_averaged_across_the_bin() {
        let mut cube = counting_cube(4);
        cube.background = Some(Array2::from_shape_fn((4, 2), |(i, _)| i as f32));
        let stage = TemporalBinner::new(BinningConfig { num_ave: 2 });
        let out = stage.execute(cube).unwrap();
        let background = out.background.as_ref().unwrap();
        assert_eq!(background.dim(), (2, 2));
        assert_abs_diff_eq!(background[[0, 0]], 0.5, epsilon = 1e-6);
        assert_abs_diff_eq!(background[[1, 1]], 2.5, epsilon = 1e-6);
    }
}
