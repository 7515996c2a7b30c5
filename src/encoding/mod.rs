//! Sinusoidal positional encoding with a coarse-to-fine band mask.

pub use crate::state::TrainingProgress;
pub use burn::{
    config::Config,
    tensor::{backend::Backend, Tensor},
};

use crate::function::tensor_extensions::from_f64s;
use std::f64::consts::PI;

/// An interval of [`TrainingProgress`].
#[derive(Config, Copy, Debug, PartialEq)]
pub struct ProgressRange {
    pub start: f64,
    pub end: f64,
}

/// The configuration for [`PositionalEncodingConfig::encode`].
#[derive(Config, Copy, Debug, PartialEq)]
pub struct PositionalEncodingConfig {
    /// The number of frequency bands, `L`.
    #[config(default = 10)]
    pub levels: usize,
    /// Opens the frequency bands progressively within the range.
    pub coarse_to_fine: Option<ProgressRange>,
}

impl PositionalEncodingConfig {
    /// The encoded channel count of `channel_count` input channels.
    #[inline]
    pub const fn dim_output(
        &self,
        channel_count: usize,
    ) -> usize {
        2 * channel_count * self.levels
    }

    /// The weight of every frequency band.
    ///
    /// ## Details
    ///
    /// `w_k = (1 - cos(clamp(α - k, 0, 1) * π)) / 2`,
    /// where `α = (progress - start) / (end - start) * L`.
    ///
    /// All the weights are 0 until `start` and 1 after `end`.
    /// Without [`coarse_to_fine`](Self::coarse_to_fine), all the weights are 1.
    pub fn band_weights(
        &self,
        progress: TrainingProgress,
    ) -> Vec<f64> {
        let levels = self.levels;
        let range = match self.coarse_to_fine {
            Some(range) => range,
            None => return vec![1.0; levels],
        };

        let span = (range.end - range.start).max(f64::EPSILON);
        let alpha = (progress.value() - range.start) / span * levels as f64;
        (0..levels)
            .map(|band| {
                let ratio = (alpha - band as f64).clamp(0.0, 1.0);
                (1.0 - (ratio * PI).cos()) / 2.0
            })
            .collect()
    }

    /// Encodes the last dimension of `input` with masked sinusoids.
    ///
    /// ## Details
    ///
    /// Every input channel `x` becomes
    /// `[sin(2^0 π x), ..., sin(2^(L-1) π x), cos(2^0 π x), ..., cos(2^(L-1) π x)]`,
    /// and the band `k` is scaled by its [weight](Self::band_weights).
    /// The raw input is not included.
    ///
    /// ## Shapes
    ///
    /// * `input` - `[..., C]`
    /// * `output` - `[..., 2 * C * L]`
    pub fn encode<B: Backend, const D: usize>(
        &self,
        input: Tensor<B, D>,
        progress: TrainingProgress,
    ) -> Tensor<B, D> {
        let mut dims = input.dims();
        let channel_count = dims[D - 1];
        let levels = self.levels;
        let device = input.device();

        // [1, 1, L]
        let frequencies = from_f64s::<B, 3>(
            (0..levels).map(|band| 2.0_f64.powi(band as i32) * PI).collect(),
            [1, 1, levels],
            &device,
        );

        // [M, C, L]
        let spectrum = input
            .reshape([-1, channel_count as i32])
            .unsqueeze_dim::<3>(2)
            * frequencies;

        // [M, C, 2, L]
        let mut encoding =
            Tensor::stack::<4>(vec![spectrum.to_owned().sin(), spectrum.cos()], 2);

        if self.coarse_to_fine.is_some() {
            let weights = from_f64s::<B, 4>(
                self.band_weights(progress),
                [1, 1, 1, levels],
                &device,
            );
            encoding = encoding * weights;
        }

        dims[D - 1] = self.dim_output(channel_count);
        encoding.reshape(dims)
    }
}

impl Default for PositionalEncodingConfig {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}
