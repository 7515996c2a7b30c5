//! Alpha compositing along rays.

pub use super::*;

use crate::function::tensor_extensions::TensorFloatExtension;

/// The length of the last interval of every ray.
pub const INTERVAL_SENTINEL: f64 = 1e10;

/// The composited values of every ray.
#[derive(Clone, Debug)]
pub struct Composite<B: Backend> {
    /// `[B, R, 3]`
    pub colors_rgb: Tensor<B, 3>,
    /// `[B, R, 1]`
    pub depths: Tensor<B, 3>,
    /// `[B, R, 1]`
    pub opacities: Tensor<B, 3>,
    /// `[B, R, N]`
    pub weights: Tensor<B, 3>,
}

/// Composites the samples along every ray.
///
/// ## Details
///
/// * `δ_i = (d_{i+1} - d_i) * |ray|`, and the last interval is infinite.
/// * `α_i = 1 - exp(-σ_i * δ_i)`
/// * `T_i = exp(-Σ_{j<i} σ_j * δ_j)`
/// * `w_i = T_i * α_i`
///
/// The color is `Σ w_i * c_i`, plus `background * (1 - Σ w_i)` if given.
///
/// ## Shapes
///
/// * `ray` - `[B, R, 3]`
/// * `colors_rgb` - `[B, R, N, 3]`
/// * `densities` - `[B, R, N]`
/// * `depths` - `[B, R, N]`
///
/// ## Panics
///
/// If there is no sample.
pub fn composite<B: Backend>(
    ray: Tensor<B, 3>,
    colors_rgb: Tensor<B, 4>,
    densities: Tensor<B, 3>,
    depths: Tensor<B, 3>,
    background: Option<[f32; 3]>,
) -> Composite<B> {
    let [batch_count, ray_count, count] = depths.dims();
    assert!(count > 0, "There should be at least 1 sample per ray");
    let device = depths.device();

    // [B, R, N]
    let sentinel =
        Tensor::full([batch_count, ray_count, 1], INTERVAL_SENTINEL, &device);
    let intervals = match count {
        1 => sentinel,
        _ => Tensor::cat(
            vec![
                depths.to_owned().narrow(2, 1, count - 1)
                    - depths.to_owned().narrow(2, 0, count - 1),
                sentinel,
            ],
            2,
        ),
    };
    let distances = intervals * ray.norm_last();
    let optical_depths = densities * distances;

    let alphas = optical_depths.to_owned().neg().exp().neg().add_scalar(1.0);
    let transmittances = optical_depths.sum_cumulative_exclusive().neg().exp();
    let weights = transmittances * alphas;

    // [B, R, 1]
    let opacities = weights.to_owned().sum_dim(2);
    let depths = (weights.to_owned() * depths).sum_dim(2);
    // [B, R, 3]
    let mut colors_rgb = (weights.to_owned().unsqueeze_dim::<4>(3) * colors_rgb)
        .sum_dim(2)
        .reshape([batch_count, ray_count, 3]);

    if let Some(background) = background {
        let background =
            Tensor::<B, 1>::from_floats(background, &device).reshape([1, 1, 3]);
        colors_rgb =
            colors_rgb + opacities.to_owned().neg().add_scalar(1.0) * background;
    }

    Composite {
        colors_rgb,
        depths,
        opacities,
        weights,
    }
}

impl<B: Backend> Composite<B> {
    /// Concatenates the rays of all parts in order.
    pub fn cat(parts: Vec<Self>) -> Self {
        let count = parts.len();
        let (colors_rgb, depths, opacities, weights) = parts.into_iter().fold(
            (
                Vec::with_capacity(count),
                Vec::with_capacity(count),
                Vec::with_capacity(count),
                Vec::with_capacity(count),
            ),
            |(mut colors_rgb, mut depths, mut opacities, mut weights), part| {
                colors_rgb.push(part.colors_rgb);
                depths.push(part.depths);
                opacities.push(part.opacities);
                weights.push(part.weights);
                (colors_rgb, depths, opacities, weights)
            },
        );

        Self {
            colors_rgb: Tensor::cat(colors_rgb, 1),
            depths: Tensor::cat(depths, 1),
            opacities: Tensor::cat(opacities, 1),
            weights: Tensor::cat(weights, 1),
        }
    }
}
