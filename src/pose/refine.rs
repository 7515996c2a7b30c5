//! Learnable corrections of camera poses.

pub use super::*;

use crate::{camera::se3_to_pose, function::tensor_extensions::from_f64s};
use rand::{rngs::StdRng, Rng, SeedableRng};
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The configuration for [`PoseRefinement`].
#[derive(Config, Copy, Debug, PartialEq)]
pub struct PoseRefinementConfig {
    /// The number of poses, `N`.
    pub count: usize,
}

/// One learnable `se(3)` correction per pose.
///
/// ## Details
///
/// A refined pose is `compose([exp(se3), base])`,
/// so the correction is applied before the base pose.
/// The corrections start at zero, i.e., at the base poses.
#[derive(Module)]
pub struct PoseRefinement<B: Backend> {
    /// `[N, 6]`
    pub se3: Param<Tensor<B, 2>>,
}

/// Where the base poses come from.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub enum PoseInitialization {
    /// The poses given by the dataset.
    #[default]
    Dataset,
    /// Every camera at the origin.
    Identity,
}

impl PoseRefinementConfig {
    /// Initialize from the configuration.
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> PoseRefinement<B> {
        let count = self.count;
        let se3 = Param::uninitialized(
            Default::default(),
            move |device, is_require_grad| {
                Tensor::zeros([count, 6], device).set_require_grad(is_require_grad)
            },
            device.to_owned(),
            true,
        );

        PoseRefinement { se3 }
    }
}

impl<B: Backend> PoseRefinement<B> {
    /// Refines the base poses at `indices`, or all of them.
    ///
    /// ## Shapes
    ///
    /// * `base` - `[B, 3, 4]`, or `[1, 3, 4]`
    /// * `indices` - `[B]`
    pub fn refine(
        &self,
        base: &Pose<B>,
        indices: Option<Tensor<B, 1, Int>>,
    ) -> Pose<B> {
        let tangents = match indices {
            Some(indices) => self.se3.val().select(0, indices),
            None => self.se3.val(),
        };

        Pose::compose(&[se3_to_pose(tangents), base.to_owned()], &base.device())
    }

    /// `N`
    #[inline]
    pub fn count(&self) -> usize {
        self.se3.dims()[0]
    }

    /// `[N, 6]`
    #[inline]
    pub fn get_tangents(&self) -> Tensor<B, 2> {
        self.se3.val()
    }

    /// Setting values for [`PoseRefinement::get_tangents`]
    pub fn set_tangents(
        &mut self,
        tangents: Tensor<B, 2>,
    ) -> &mut Self {
        self.se3 = Param::initialized(self.se3.id.to_owned(), tangents.require_grad());
        self
    }
}

impl PoseInitialization {
    /// The base poses of `reference`.
    pub fn init<B: Backend>(
        &self,
        reference: &[PoseMatrix],
        device: &B::Device,
    ) -> Pose<B> {
        match self {
            Self::Dataset => Pose::from_matrices(reference, device),
            Self::Identity => Pose::identity(reference.len(), device),
        }
    }
}

/// Perturbs every pose by `exp(noise * ε)` with `ε ~ N(0, I)`.
///
/// The perturbation is seeded and applied before the pose.
pub fn perturb_poses<B: Backend>(
    poses: &Pose<B>,
    noise: f64,
    seed: u64,
) -> Pose<B> {
    let count = poses.count();
    let mut rng = StdRng::seed_from_u64(seed);
    let tangents = (0..count * 6)
        .map(|_| rng.sample::<f64, _>(StandardNormal) * noise)
        .collect();
    let tangents = from_f64s(tangents, [count, 6], &poses.device());

    Pose::compose(&[se3_to_pose(tangents), poses.to_owned()], &poses.device())
}

impl<B: Backend> fmt::Debug for PoseRefinement<B> {
    fn fmt(
        &self,
        f: &mut fmt::Formatter,
    ) -> fmt::Result {
        f.debug_struct("PoseRefinement")
            .field("devices", &self.devices())
            .field("se3.dims()", &self.se3.dims())
            .finish()
    }
}
