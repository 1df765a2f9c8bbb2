use ndarray::Array3;

use crate::cube::{flags, RampCube, RateCube};
use crate::prelude::{PipelineStage, StageError, StageResult};
use crate::reference::CalibrationSource;
use crate::telemetry::LogManager;

/// Saturation-truncated rate (CDS) estimation.
///
/// The default rate per integration is the last-minus-first group difference
/// normalised to the group count, converted from DN to count units with the
/// gain map. Columns that saturate mid-ramp are rebuilt from the groups
/// before the saturation transition; columns already saturated by the second
/// group cannot be estimated and are flagged DO_NOT_USE with a NaN
/// effective-group count, so they can never contribute to a downstream
/// average silently.
///
/// Noise model per pixel: `var_poisson = rate / ngroup`,
/// `var_rnoise = 2 (readnoise · gain)² / ngroup²`,
/// `err = sqrt(var_poisson + var_rnoise)`. The NaN produced by the ngroup
/// sentinel is contained by the mask, not by exception handling.
pub struct RateEstimator<'a> {
    reference: &'a dyn CalibrationSource,
    logger: LogManager,
}

impl<'a> RateEstimator<'a> {
    pub fn new(reference: &'a dyn CalibrationSource) -> Self {
        Self {
            reference,
            logger: LogManager::new(),
        }
    }
}

impl PipelineStage for RateEstimator<'_> {
    type Input = RampCube;
    type Output = RateCube;

    fn name(&self) -> &'static str {
        "cds_rate"
    }

    fn execute(&self, input: RampCube) -> StageResult<RateCube> {
        input.validate()?;
        let (n_int, n_grp, n_rows, n_cols) = input.dims();
        if n_grp < 2 {
            return Err(StageError::ShapeMismatch(format!(
                "rate estimation needs at least two groups, got {n_grp}"
            )));
        }

        let RampCube {
            data,
            groupdq,
            pixeldq,
            mut meta,
        } = input;

        let calib = self.reference.acquire(&meta.detector)?;
        if calib.gain.dim() != (n_rows, n_cols) || calib.readnoise.dim() != (n_rows, n_cols) {
            return Err(StageError::ShapeMismatch(format!(
                "calibration maps {:?}/{:?} do not match detector footprint ({n_rows}, {n_cols})",
                calib.gain.shape(),
                calib.readnoise.shape()
            )));
        }
        if let Some(factor) = calib.gain_factor {
            meta.gain_factor = Some(factor);
        }
        self.logger
            .record(&format!("acquired calibration maps for {}", meta.detector));

        // Defaults: full-ramp CDS over ngroups - 1.
        let norm_full = (n_grp - 1) as f32;
        let mut rate = Array3::<f32>::zeros((n_int, n_rows, n_cols));
        let mut dq = Array3::<u32>::zeros((n_int, n_rows, n_cols));
        let mut ngroup = Array3::<f32>::from_elem((n_int, n_rows, n_cols), norm_full);
        for i in 0..n_int {
            for r in 0..n_rows {
                for c in 0..n_cols {
                    rate[[i, r, c]] =
                        (data[[i, n_grp - 1, r, c]] - data[[i, 0, r, c]]) / norm_full;
                    dq[[i, r, c]] =
                        groupdq[[i, n_grp - 1, r, c]] | groupdq[[i, 0, r, c]] | pixeldq[[r, c]];
                }
            }
        }

        // Saturation transitions, read off the mid-row of each column. A
        // transition at group difference g means saturation first appears in
        // group g + 1; the whole column is rebuilt from groups [0, g].
        // Applied in ascending g, so a later transition wins.
        let mid = n_rows / 2;
        let mut truncated_columns = 0_usize;
        for i in 0..n_int {
            for c in 0..n_cols {
                for g in 0..n_grp - 1 {
                    let before = groupdq[[i, g, mid, c]] & flags::SATURATED;
                    let after = groupdq[[i, g + 1, mid, c]] & flags::SATURATED;
                    if before != 0 || after == 0 {
                        continue;
                    }
                    // g == 0: saturated from the second group on, no slope
                    let norm = if g == 0 { 1.0 } else { g as f32 };
                    let extra = if g == 0 { flags::DO_NOT_USE } else { 0 };
                    for r in 0..n_rows {
                        rate[[i, r, c]] = (data[[i, g, r, c]] - data[[i, 0, r, c]]) / norm;
                        dq[[i, r, c]] = groupdq[[i, g, r, c]]
                            | groupdq[[i, 0, r, c]]
                            | pixeldq[[r, c]]
                            | extra;
                        ngroup[[i, r, c]] = if g == 0 { f32::NAN } else { g as f32 };
                    }
                    truncated_columns += 1;
                }
            }
        }
        if truncated_columns > 0 {
            self.logger.record(&format!(
                "rebuilt {truncated_columns} column ramps at saturation transitions"
            ));
        }

        // DN -> CT conversion, then the per-pixel noise model.
        let mut var_poisson = Array3::<f32>::zeros((n_int, n_rows, n_cols));
        let mut var_rnoise = Array3::<f32>::zeros((n_int, n_rows, n_cols));
        for i in 0..n_int {
            for r in 0..n_rows {
                for c in 0..n_cols {
                    let gain = calib.gain[[r, c]];
                    let counts = rate[[i, r, c]] * gain;
                    rate[[i, r, c]] = counts;
                    let ng = ngroup[[i, r, c]];
                    var_poisson[[i, r, c]] = counts / ng;
                    let rn = calib.readnoise[[r, c]] * gain;
                    var_rnoise[[i, r, c]] = 2.0 * rn * rn / (ng * ng);
                }
            }
        }

        meta.bunit_data = "CT/s".to_string();
        meta.bunit_err = "CT/s".to_string();

        let mut cube = RateCube {
            data: rate,
            dq,
            var_poisson,
            var_rnoise,
            err: Array3::zeros((n_int, n_rows, n_cols)),
            ngroup,
            background: None,
            meta,
        };
        cube.refresh_err();
        Ok(cube)
    }
}
