//! Depth sampling along camera rays.

pub mod importance;
pub mod prior;
pub mod stratified;

pub use burn::{
    config::Config,
    tensor::{backend::Backend, Int, Tensor},
};
pub use importance::*;
pub use prior::*;
pub use stratified::*;

use serde::{Deserialize, Serialize};

/// The configuration of depth sampling.
#[derive(Config, Debug, PartialEq)]
pub struct DepthSamplerConfig {
    /// The global near bound.
    #[config(default = 2.0)]
    pub depth_near: f64,
    /// The global far bound.
    #[config(default = 6.0)]
    pub depth_far: f64,
    /// The number of coarse samples per ray, `N`.
    #[config(default = 128)]
    pub sample_count: usize,
    /// The number of importance samples per ray, `N_f`.
    #[config(default = 128)]
    pub sample_count_fine: usize,
    /// Jitters every sample within its bin.
    #[config(default = true)]
    pub is_stratified: bool,
    #[config(default = "DepthParameterization::Metric")]
    pub parameterization: DepthParameterization,
    /// Per-pixel depth windows from sensor depth.
    pub prior: Option<DepthPriorPolicy>,
}

/// How sampled values are mapped to depths.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub enum DepthParameterization {
    /// `d`
    #[default]
    Metric,
    /// `1 / (d + 1e-8)`, sorted ascending afterwards.
    Inverse,
}

/// The sampling interval of every ray.
#[derive(Clone, Debug)]
pub enum DepthBounds<B: Backend> {
    /// One interval shared by all rays.
    Global { near: f64, far: f64 },
    /// One interval per ray.
    PerRay {
        /// `[B, R]`
        near: Tensor<B, 2>,
        /// `[B, R]`
        far: Tensor<B, 2>,
    },
}

/// Sorted depths along rays.
#[derive(Clone, Debug)]
pub struct DepthSamples<B: Backend> {
    /// `[B, R, N]`
    pub values: Tensor<B, 3>,
    /// `[B, R, N + 1]`
    pub bins: Tensor<B, 3>,
}

impl DepthSamplerConfig {
    /// The global bounds.
    #[inline]
    pub fn bounds<B: Backend>(&self) -> DepthBounds<B> {
        DepthBounds::Global {
            near: self.depth_near,
            far: self.depth_far,
        }
    }

    /// Enables the default depth prior, with the low tier reaching `depth_far`.
    pub fn with_default_prior(mut self) -> Self {
        let mut prior = DepthPriorPolicy::new();
        prior.low.far_min = Some(self.depth_far);
        self.prior = Some(prior);
        self
    }
}

impl<B: Backend> DepthBounds<B> {
    /// Selects the per-ray bounds of some images.
    pub fn select_images(
        &self,
        indices: Tensor<B, 1, Int>,
    ) -> Self {
        match self {
            Self::Global { .. } => self.to_owned(),
            Self::PerRay { near, far } => Self::PerRay {
                near: near.to_owned().select(0, indices.to_owned()),
                far: far.to_owned().select(0, indices),
            },
        }
    }

    /// Selects the per-ray bounds of some rays.
    pub fn select_rays(
        &self,
        indices: Tensor<B, 1, Int>,
    ) -> Self {
        match self {
            Self::Global { .. } => self.to_owned(),
            Self::PerRay { near, far } => Self::PerRay {
                near: near.to_owned().select(1, indices.to_owned()),
                far: far.to_owned().select(1, indices),
            },
        }
    }

    /// The near and far bounds broadcast to every ray.
    ///
    /// ## Shapes
    ///
    /// * `output.0` - `[B, R, 1]`
    /// * `output.1` - `[B, R, 1]`
    ///
    /// ## Panics
    ///
    /// If per-ray bounds are not of shape `[B, R]`.
    pub fn near_far(
        &self,
        batch_count: usize,
        ray_count: usize,
        device: &B::Device,
    ) -> (Tensor<B, 3>, Tensor<B, 3>) {
        match self {
            Self::Global { near, far } => {
                let zeros = Tensor::zeros([batch_count, ray_count, 1], device);
                (zeros.to_owned().add_scalar(*near), zeros.add_scalar(*far))
            },
            Self::PerRay { near, far } => {
                let dims = near.dims();
                assert_eq!(
                    dims,
                    [batch_count, ray_count],
                    "The per-ray bounds should have the shape [B, R]",
                );
                (
                    near.to_owned().unsqueeze_dim(2),
                    far.to_owned().unsqueeze_dim(2),
                )
            },
        }
    }
}

impl Default for DepthSamplerConfig {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}
