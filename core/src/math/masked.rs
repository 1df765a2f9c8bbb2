use ndarray::{Array, Axis, Dimension, RemoveAxis, Zip};

use crate::math::stats;
use crate::prelude::{StageError, StageResult};

/// Value-plus-validity pair over an `ndarray` array.
///
/// A mask entry of `true` means the sample is invalid. Axis reductions skip
/// masked entries and produce a masked result wherever every input along the
/// lane is masked, so invalid samples can never leak into a mean or median.
#[derive(Debug, Clone)]
pub struct Masked<D: Dimension> {
    data: Array<f32, D>,
    mask: Array<bool, D>,
}

impl<D: Dimension> Masked<D> {
    pub fn new(data: Array<f32, D>, mask: Array<bool, D>) -> StageResult<Self> {
        if data.raw_dim() != mask.raw_dim() {
            return Err(StageError::ShapeMismatch(format!(
                "masked data shape {:?} does not match mask shape {:?}",
                data.shape(),
                mask.shape()
            )));
        }
        Ok(Self { data, mask })
    }

    /// Mask derived from a data-quality array: any set bit invalidates.
    pub fn from_dq(data: Array<f32, D>, dq: &Array<u32, D>) -> StageResult<Self> {
        let mask = dq.mapv(|f| f != 0);
        Self::new(data, mask)
    }

    pub fn data(&self) -> &Array<f32, D> {
        &self.data
    }

    pub fn mask(&self) -> &Array<bool, D> {
        &self.mask
    }

    /// Data with masked entries replaced by `fill`.
    pub fn filled(&self, fill: f32) -> Array<f32, D> {
        let mut out = self.data.clone();
        Zip::from(&mut out).and(&self.mask).for_each(|v, &m| {
            if m {
                *v = fill;
            }
        });
        out
    }

    /// Number of valid samples along `axis`.
    pub fn count_axis(&self, axis: Axis) -> Array<f32, D::Smaller>
    where
        D: RemoveAxis,
    {
        let mut out = Array::zeros(self.mask.raw_dim().remove_axis(axis));
        Zip::from(self.mask.lanes(axis))
            .and(&mut out)
            .for_each(|lane, o| {
                *o = lane.iter().filter(|&&m| !m).count() as f32;
            });
        out
    }

    /// Mean of the valid samples along `axis`; lanes with no valid samples
    /// come back masked.
    pub fn mean_axis(&self, axis: Axis) -> Masked<D::Smaller>
    where
        D: RemoveAxis,
    {
        let dim = self.data.raw_dim().remove_axis(axis);
        let mut out = Array::zeros(dim.clone());
        let mut out_mask = Array::from_elem(dim, true);
        Zip::from(self.data.lanes(axis))
            .and(self.mask.lanes(axis))
            .and(&mut out)
            .and(&mut out_mask)
            .for_each(|values, lane_mask, o, om| {
                let mut sum = 0.0_f64;
                let mut n = 0_usize;
                for (v, m) in values.iter().zip(lane_mask.iter()) {
                    if !*m {
                        sum += f64::from(*v);
                        n += 1;
                    }
                }
                if n > 0 {
                    *o = (sum / n as f64) as f32;
                    *om = false;
                }
            });
        Masked {
            data: out,
            mask: out_mask,
        }
    }

    /// Median of the valid samples along `axis` (mean of the middle pair for
    /// even counts); lanes with no valid samples come back masked.
    pub fn median_axis(&self, axis: Axis) -> Masked<D::Smaller>
    where
        D: RemoveAxis,
    {
        let dim = self.data.raw_dim().remove_axis(axis);
        let mut out = Array::zeros(dim.clone());
        let mut out_mask = Array::from_elem(dim, true);
        let mut scratch: Vec<f32> = Vec::with_capacity(self.data.len_of(axis));
        Zip::from(self.data.lanes(axis))
            .and(self.mask.lanes(axis))
            .and(&mut out)
            .and(&mut out_mask)
            .for_each(|values, lane_mask, o, om| {
                scratch.clear();
                for (v, m) in values.iter().zip(lane_mask.iter()) {
                    if !*m {
                        scratch.push(*v);
                    }
                }
                if let Some(median) = stats::median(&mut scratch) {
                    *o = median;
                    *om = false;
                }
            });
        Masked {
            data: out,
            mask: out_mask,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{arr2, Array2};

    fn masked_pair() -> Masked<ndarray::Ix2> {
        let data = arr2(&[[1.0_f32, 2.0, 30.0], [3.0, 4.0, 5.0]]);
        let mask = arr2(&[[false, false, true], [false, true, false]]);
        Masked::new(data, mask).unwrap()
    }

    #[test]
    fn new_rejects_shape_mismatch() {
        let result = Masked::new(
            Array2::<f32>::zeros((2, 2)),
            ndarray::Array2::from_elem((2, 3), false),
        );
        assert!(matches!(result, Err(StageError::ShapeMismatch(_))));
    }

    #[test]
    fn mean_skips_masked_entries() {
        let m = masked_pair();
        let mean = m.mean_axis(Axis(0));
        assert_abs_diff_eq!(mean.data()[[0]], 2.0, epsilon = 1e-6);
        assert_abs_diff_eq!(mean.data()[[1]], 2.0, epsilon = 1e-6);
        // column 2 has a single valid sample
        assert_abs_diff_eq!(mean.data()[[2]], 5.0, epsilon = 1e-6);
        assert!(!mean.mask()[[2]]);
    }

    #[test]
    fn all_masked_lane_comes_back_masked() {
        let data = arr2(&[[1.0_f32, 2.0], [3.0, 4.0]]);
        let mask = arr2(&[[true, false], [true, false]]);
        let m = Masked::new(data, mask).unwrap();
        let mean = m.mean_axis(Axis(0));
        assert!(mean.mask()[[0]]);
        assert!(!mean.mask()[[1]]);
        assert_abs_diff_eq!(mean.filled(0.0)[[0]], 0.0);
    }

    #[test]
    fn count_axis_counts_valid_samples() {
        let m = masked_pair();
        let count = m.count_axis(Axis(0));
        assert_eq!(count[[0]], 2.0);
        assert_eq!(count[[1]], 1.0);
        assert_eq!(count[[2]], 1.0);
    }

    #[test]
    fn median_averages_middle_pair_for_even_counts() {
        let data = arr2(&[[1.0_f32], [2.0], [5.0], [100.0]]);
        let mask = arr2(&[[false], [false], [false], [false]]);
        let m = Masked::new(data, mask).unwrap();
        let median = m.median_axis(Axis(0));
        assert_abs_diff_eq!(median.data()[[0]], 3.5, epsilon = 1e-6);
    }

    #[test]
    fn median_ignores_masked_outlier() {
        let data = arr2(&[[1.0_f32], [2.0], [3.0], [1.0e6]]);
        let mask = arr2(&[[false], [false], [false], [true]]);
        let m = Masked::new(data, mask).unwrap();
        let median = m.median_axis(Axis(0));
        assert_abs_diff_eq!(median.data()[[0]], 2.0, epsilon = 1e-6);
    }

    #[test]
    fn filled_replaces_only_masked_entries() {
        let m = masked_pair();
        let filled = m.filled(-1.0);
        assert_eq!(filled[[0, 2]], -1.0);
        assert_eq!(filled[[0, 0]], 1.0);
    }
}
