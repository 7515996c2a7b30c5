//! Radiance fields mapping points and view directions to density and color.

pub mod nerf;

pub use crate::state::{RenderContext, RenderMode, TrainingProgress};
pub use burn::{
    config::Config,
    module::Module,
    tensor::{backend::Backend, Tensor},
};
pub use nerf::*;

use burn::tensor::activation;
use serde::{Deserialize, Serialize};

/// A function from 3D points and view directions to density and color.
pub trait RadianceField<B: Backend> {
    /// Evaluates the field at the sample points.
    ///
    /// ## Shapes
    ///
    /// * `points` - `[B, R, S, 3]`
    /// * `directions` - Unit view directions `[B, R, S, 3]`
    fn evaluate(
        &self,
        points: Tensor<B, 4>,
        directions: Tensor<B, 4>,
        context: &RenderContext,
    ) -> FieldOutput<B>;
}

/// The output of [`RadianceField::evaluate`].
#[derive(Clone, Debug)]
pub struct FieldOutput<B: Backend> {
    /// Non-negative densities `[B, R, S]`
    pub densities: Tensor<B, 3>,
    /// Colors in `[0, 1]` `[B, R, S, 3]`
    pub colors_rgb: Tensor<B, 4>,
}

/// The activation making raw densities non-negative.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub enum DensityActivation {
    Abs,
    Exp,
    Relu,
    #[default]
    Softplus,
}

impl DensityActivation {
    pub fn forward<B: Backend, const D: usize>(
        &self,
        input: Tensor<B, D>,
    ) -> Tensor<B, D> {
        match self {
            Self::Abs => input.abs(),
            Self::Exp => input.exp(),
            Self::Relu => activation::relu(input),
            Self::Softplus => activation::softplus(input, 1.0),
        }
    }
}
