//! Robust statistics helpers used by the masked reductions and the temporal
//! outlier flagger.

use ndarray::{Array3, ArrayView3, Axis, Zip};

/// Median of a scratch buffer, mean of the middle pair for even lengths.
/// The buffer is reordered in place.
pub fn median(values: &mut [f32]) -> Option<f32> {
    if values.is_empty() {
        return None;
    }
    values.sort_unstable_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = values.len() / 2;
    if values.len() % 2 == 1 {
        Some(values[mid])
    } else {
        Some(0.5 * (values[mid - 1] + values[mid]))
    }
}

/// Iterative sigma clipping along the integration axis (axis 0).
///
/// Each pixel lane is clipped against `median ± sigma · std`, where the
/// standard deviation is the population std of the surviving samples, until
/// the clip converges or `max_iters` passes have run. Non-finite samples
/// start out clipped. Returns the boolean outlier mask.
pub fn sigma_clip_axis0(data: &ArrayView3<f32>, sigma: f32, max_iters: usize) -> Array3<bool> {
    let n_int = data.len_of(Axis(0));
    let mut mask = data.mapv(|v| !v.is_finite());
    let mut scratch: Vec<f32> = Vec::with_capacity(n_int);
    Zip::from(data.lanes(Axis(0)))
        .and(mask.lanes_mut(Axis(0)))
        .for_each(|lane, mut lane_mask| {
            for _ in 0..max_iters.max(1) {
                scratch.clear();
                for (v, m) in lane.iter().zip(lane_mask.iter()) {
                    if !*m {
                        scratch.push(*v);
                    }
                }
                if scratch.len() < 2 {
                    break;
                }
                let n = scratch.len() as f32;
                let mean = scratch.iter().sum::<f32>() / n;
                let var = scratch.iter().map(|v| (v - mean) * (v - mean)).sum::<f32>() / n;
                let std = var.sqrt();
                let center = match median(&mut scratch) {
                    Some(c) => c,
                    None => break,
                };
                if std <= 0.0 {
                    break;
                }
                let lo = center - sigma * std;
                let hi = center + sigma * std;
                let mut changed = false;
                for (v, m) in lane.iter().zip(lane_mask.iter_mut()) {
                    if !*m && (*v < lo || *v > hi) {
                        *m = true;
                        changed = true;
                    }
                }
                if !changed {
                    break;
                }
            }
        });
    mask
}
