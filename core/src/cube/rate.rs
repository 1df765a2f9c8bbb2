use ndarray::{Array2, Array3, Ix3, Zip};

use crate::cube::ExposureMeta;
use crate::math::Masked;
use crate::prelude::{StageError, StageResult};

/// Per-integration rate image stack with its noise model, indexed
/// [integration, row, column].
///
/// Created by the rate estimation stage, mutated by the background and
/// outlier stages, consumed by the temporal binner.
#[derive(Debug, Clone)]
pub struct RateCube {
    /// Signal in rate units.
    pub data: Array3<f32>,
    /// Bitwise union of every flag raised so far.
    pub dq: Array3<u32>,
    /// Shot-noise variance component.
    pub var_poisson: Array3<f32>,
    /// Read-noise variance component.
    pub var_rnoise: Array3<f32>,
    /// Combined error, `sqrt(var_poisson + var_rnoise)` wherever unmasked.
    pub err: Array3<f32>,
    /// Effective group count used as the variance denominator; NaN where no
    /// valid rate could be formed.
    pub ngroup: Array3<f32>,
    /// Column-wise background removed per integration, present once the
    /// background correction has run.
    pub background: Option<Array2<f32>>,
    pub meta: ExposureMeta,
}

impl RateCube {
    /// (integrations, rows, columns)
    pub fn dims(&self) -> (usize, usize, usize) {
        self.data.dim()
    }

    /// Checks internal shape consistency; malformed shape is fatal.
    pub fn validate(&self) -> StageResult<()> {
        let dim = self.data.dim();
        for (name, shape) in [
            ("dq", self.dq.dim()),
            ("var_poisson", self.var_poisson.dim()),
            ("var_rnoise", self.var_rnoise.dim()),
            ("err", self.err.dim()),
            ("ngroup", self.ngroup.dim()),
        ] {
            if shape != dim {
                return Err(StageError::ShapeMismatch(format!(
                    "{name} shape {shape:?} does not match data shape {dim:?}"
                )));
            }
        }
        if let Some(background) = &self.background {
            let (n_int, _, n_cols) = dim;
            if background.dim() != (n_int, n_cols) {
                return Err(StageError::ShapeMismatch(format!(
                    "background shape {:?} does not match ({n_int}, {n_cols})",
                    background.shape()
                )));
            }
        }
        Ok(())
    }

    /// Validity mask in the masked-arithmetic sense: any set bit excludes
    /// the sample from downstream reductions.
    pub fn invalid_mask(&self) -> Array3<bool> {
        self.dq.mapv(|f| f != 0)
    }

    /// Signal with the data-quality mask applied.
    pub fn masked_data(&self) -> Masked<Ix3> {
        // dims always agree, so the shape check cannot fire
        Masked::new(self.data.clone(), self.invalid_mask())
            .expect("data and dq share one shape")
    }

    /// Rederives the combined error from the two variance components.
    pub fn refresh_err(&mut self) {
        Zip::from(&mut self.err)
            .and(&self.var_poisson)
            .and(&self.var_rnoise)
            .for_each(|e, &p, &r| *e = (p + r).sqrt());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::Array3;

    fn small_cube() -> RateCube {
        RateCube {
            data: Array3::zeros((2, 2, 2)),
            dq: Array3::zeros((2, 2, 2)),
            var_poisson: Array3::from_elem((2, 2, 2), 0.5),
            var_rnoise: Array3::from_elem((2, 2, 2), 0.25),
            err: Array3::zeros((2, 2, 2)),
            ngroup: Array3::from_elem((2, 2, 2), 9.0),
            background: None,
            meta: ExposureMeta::new("NRS1", 1),
        }
    }

    #[test]
    fn refresh_err_combines_variances() {
        let mut cube = small_cube();
        cube.refresh_err();
        assert_abs_diff_eq!(cube.err[[0, 0, 0]], 0.75_f32.sqrt(), epsilon = 1e-6);
    }

    #[test]
    fn validate_rejects_background_footprint_mismatch() {
        let mut cube = small_cube();
        cube.background = Some(Array2::zeros((2, 3)));
        assert!(matches!(
            cube.validate(),
            Err(StageError::ShapeMismatch(_))
        ));
    }

    #[test]
    fn invalid_mask_tracks_any_set_bit() {
        let mut cube = small_cube();
        cube.dq[[1, 0, 1]] = 4;
        let mask = cube.invalid_mask();
        assert!(mask[[1, 0, 1]]);
        assert!(!mask[[0, 0, 0]]);
    }
}
