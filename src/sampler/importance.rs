//! Inverse transform sampling from the coarse weights.

pub use super::*;

use crate::{
    error::Error,
    function::tensor_extensions::{from_f64s, TensorFloatExtension},
};
use rayon::prelude::*;

/// The weight added to every bin before normalization.
pub const PDF_EPSILON: f64 = 1e-5;

/// The guard of the interpolation denominator.
pub const CDF_EPSILON: f64 = 1e-8;

impl DepthSamplerConfig {
    /// Samples `N_f` depths per ray in proportion to the coarse weights.
    ///
    /// ## Details
    ///
    /// The weights are treated as constants.
    /// Rays are processed in parallel on the host.
    ///
    /// ## Shapes
    ///
    /// * `weights` - `[B, R, N]`
    /// * `bins` - `[B, R, N + 1]`
    /// * `output` - `[B, R, N_f]`
    pub fn sample_importance<B: Backend>(
        &self,
        weights: Tensor<B, 3>,
        bins: Tensor<B, 3>,
    ) -> Result<Tensor<B, 3>, Error> {
        let [batch_count, ray_count, count] = weights.dims();
        let count_fine = self.sample_count_fine;
        let device = weights.device();
        if bins.dims() != [batch_count, ray_count, count + 1] {
            return Err(Error::Validation(
                "The shape of bins".into(),
                format!("[{batch_count}, {ray_count}, {}]", count + 1),
            ));
        }

        let weights = weights.detach().into_f64s()?;
        let bins = bins.detach().into_f64s()?;
        let mut samples = vec![0.0; batch_count * ray_count * count_fine];

        if count > 0 && count_fine > 0 {
            weights
                .par_chunks_exact(count)
                .zip(bins.par_chunks_exact(count + 1))
                .zip(samples.par_chunks_exact_mut(count_fine))
                .for_each(|((weights, bins), samples)| {
                    sample_pdf(weights, bins, samples)
                });
        }

        Ok(from_f64s(
            samples,
            [batch_count, ray_count, count_fine],
            &device,
        ))
    }

    /// The union of coarse and importance samples, sorted ascending.
    ///
    /// ## Shapes
    ///
    /// * `coarse` - `[B, R, N]`
    /// * `fine` - `[B, R, N_f]`
    /// * `output` - `[B, R, N + N_f]`
    pub fn merge_samples<B: Backend>(
        coarse: Tensor<B, 3>,
        fine: Tensor<B, 3>,
    ) -> Tensor<B, 3> {
        Tensor::cat(vec![coarse, fine], 2).sort(2)
    }
}

/// Inverse transform sampling of one ray.
///
/// ## Details
///
/// The quantiles are `(j + 0.5) / N_f` for `j` in `0..N_f`.
/// Each quantile is located in the CDF by binary search,
/// and interpolated linearly between the edges of its bin.
///
/// ## Shapes
///
/// * `weights` - `[N]`
/// * `bins` - `[N + 1]`
/// * `samples` - `[N_f]`
pub fn sample_pdf(
    weights: &[f64],
    bins: &[f64],
    samples: &mut [f64],
) {
    let count = weights.len();
    let count_fine = samples.len();
    let total = weights.iter().map(|weight| weight + PDF_EPSILON).sum::<f64>();

    // [N + 1]
    let cdf = std::iter::once(0.0)
        .chain(weights.iter().scan(0.0, |sum, weight| {
            *sum += (weight + PDF_EPSILON) / total;
            Some(*sum)
        }))
        .collect::<Vec<_>>();

    samples.iter_mut().enumerate().for_each(|(index, sample)| {
        let quantile = (index as f64 + 0.5) / count_fine as f64;
        let index = cdf.partition_point(|&value| value <= quantile);
        let low = index.saturating_sub(1).min(count);
        let high = index.min(count);
        let ratio = (quantile - cdf[low]) / (cdf[high] - cdf[low] + CDF_EPSILON);
        *sample = bins[low] + ratio * (bins[high] - bins[low]);
    });
}
