pub use super::*;

use crate::function::tensor_extensions::from_f64s;
use burn::tensor::Distribution;

/// The offset keeping inverse depths finite.
pub const INVERSE_DEPTH_EPSILON: f64 = 1e-8;

impl DepthSamplerConfig {
    /// Samples `N` depths per ray, one in each of `N` equal bins.
    ///
    /// ## Details
    ///
    /// `d_i = (u_i + i) / N * (far - near) + near`,
    /// where `u_i ~ U[0, 1)` if stratified, or `0.5` otherwise.
    ///
    /// The bin edges are `i / N * (far - near) + near` for `i` in `0..=N`.
    pub fn sample_stratified<B: Backend>(
        &self,
        bounds: &DepthBounds<B>,
        batch_count: usize,
        ray_count: usize,
        device: &B::Device,
    ) -> DepthSamples<B> {
        let count = self.sample_count;

        // [B, R, 1]
        let (near, far) = bounds.near_far(batch_count, ray_count, device);
        let span = far - near.to_owned();

        // [B, R, N]
        let offsets = match self.is_stratified {
            true => Tensor::random(
                [batch_count, ray_count, count],
                Distribution::Uniform(0.0, 1.0),
                device,
            ),
            false => Tensor::full([batch_count, ray_count, count], 0.5, device),
        };
        let steps = from_f64s::<B, 3>(
            (0..count).map(|index| index as f64).collect(),
            [1, 1, count],
            device,
        );
        let values = (offsets + steps).div_scalar(count as f64) * span.to_owned()
            + near.to_owned();

        // [B, R, N + 1]
        let edges = from_f64s::<B, 3>(
            (0..=count).map(|index| index as f64 / count as f64).collect(),
            [1, 1, count + 1],
            device,
        );
        let bins = edges * span + near;

        match self.parameterization {
            DepthParameterization::Metric => DepthSamples { values, bins },
            DepthParameterization::Inverse => DepthSamples {
                values: invert_depths(values),
                bins: invert_depths(bins),
            },
        }
    }
}

fn invert_depths<B: Backend>(depths: Tensor<B, 3>) -> Tensor<B, 3> {
    depths.add_scalar(INVERSE_DEPTH_EPSILON).recip().sort(2)
}
