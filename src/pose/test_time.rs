//! Photometric optimization of held-out camera poses.

pub use super::*;

use crate::{
    camera::Intrinsics,
    error::Error,
    field::RadianceField,
    function::tensor_extensions::from_indices,
    render::Graph,
    sampler::DepthBounds,
    state::{RenderContext, RenderMode, TrainingProgress},
};
use burn::{
    nn::loss::{MseLoss, Reduction},
    optim::{AdamConfig, GradientsParams, Optimizer},
    tensor::backend::AutodiffBackend,
};
use rand::{rngs::StdRng, SeedableRng};

/// The configuration of test-time pose optimization.
#[derive(Config, Debug, PartialEq)]
pub struct TestTimeConfig {
    #[config(default = 100)]
    pub iteration_count: usize,
    #[config(default = 1e-3)]
    pub learning_rate: f64,
    /// The number of rays sampled per iteration.
    #[config(default = 1024)]
    pub ray_count: usize,
    #[config(default = 0x7E57)]
    pub seed: u64,
}

impl TestTimeConfig {
    /// Refines one held-out pose by fitting its image with the fields frozen.
    ///
    /// ## Arguments
    ///
    /// * `graph` - Its fields are frozen and its pose refinement is unused.
    /// * `pose` - The initial pose `[1, 3, 4]` in the learned frame.
    /// * `image` - The target colors `[1, H * W, 3]`.
    /// * `bounds` - The depth bounds of the image.
    ///
    /// ## Returns
    ///
    /// The refined pose.
    pub fn optimize<AB: AutodiffBackend, F: RadianceField<AB> + Module<AB>>(
        &self,
        graph: &Graph<AB, F>,
        pose: &Pose<AB>,
        intrinsics: &Intrinsics,
        image: Tensor<AB, 3>,
        bounds: &DepthBounds<AB>,
    ) -> Result<PoseMatrix, Error> {
        let device = pose.device();
        let pixel_count = intrinsics.pixel_count();
        let ray_count = self.ray_count.clamp(1, pixel_count.max(1));
        let context =
            RenderContext::new(RenderMode::TestOptimize, TrainingProgress::complete());

        let graph = Graph {
            field: graph.field.to_owned().no_grad(),
            field_fine: graph.field_fine.to_owned().map(|field| field.no_grad()),
            poses: None,
            sampler: graph.sampler.to_owned(),
            renderer: graph.renderer.to_owned(),
            is_ndc: graph.is_ndc,
        };
        let mut refinement = PoseRefinementConfig::new(1).init::<AB>(&device);
        let mut optimizer = AdamConfig::new().init::<AB, PoseRefinement<AB>>();
        let mut rng = StdRng::seed_from_u64(self.seed);

        for _ in 0..self.iteration_count {
            let rays =
                rand::seq::index::sample(&mut rng, pixel_count, ray_count).into_vec();
            let rays = from_indices::<AB>(&rays, &device);
            let target = image.to_owned().select(1, rays.to_owned());

            let output = graph.render(
                &refinement.refine(pose, None),
                &[*intrinsics],
                Some(rays),
                bounds,
                &context,
            )?;
            let loss = MseLoss::new().forward(
                output.finest().colors_rgb.to_owned(),
                target,
                Reduction::Mean,
            );

            let grads = GradientsParams::from_grads(loss.backward(), &refinement);
            refinement = optimizer.step(self.learning_rate, refinement, grads);
        }

        #[cfg(all(debug_assertions, not(test)))]
        log::debug!(
            target: "barf::pose::test_time",
            "optimize > {} iterations on {ray_count} rays",
            self.iteration_count,
        );

        refinement
            .refine(pose, None)
            .to_matrices()?
            .into_iter()
            .next()
            .ok_or_else(|| Error::Validation("The pose count".into(), "1".into()))
    }
}

impl Default for TestTimeConfig {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        field::FieldOutput,
        render::VolumeRendererConfig,
        sampler::DepthSamplerConfig,
    };
    use burn::{
        backend::{Autodiff, NdArray},
        tensor::activation,
    };

    type AB = Autodiff<NdArray<f32>>;

    /// A field without parameters whose color changes along `x`.
    #[derive(Clone, Debug, Module)]
    struct Ramp;

    impl RadianceField<AB> for Ramp {
        fn evaluate(
            &self,
            points: Tensor<AB, 4>,
            _directions: Tensor<AB, 4>,
            _context: &RenderContext,
        ) -> FieldOutput<AB> {
            let [batch_count, ray_count, count, _] = points.dims();
            let x = points.to_owned().narrow(3, 0, 1);
            let colors_rgb = Tensor::cat(
                vec![
                    activation::sigmoid(x.to_owned().mul_scalar(2.0)),
                    x.zeros_like().add_scalar(0.5),
                    activation::sigmoid(x.mul_scalar(-2.0)),
                ],
                3,
            );
            FieldOutput {
                densities: Tensor::full(
                    [batch_count, ray_count, count],
                    0.5,
                    &points.device(),
                ),
                colors_rgb,
            }
        }
    }

    #[test]
    fn optimize_reduces_photometric_error() {
        let device = Default::default();
        let intrinsics = Intrinsics::from_field_of_view(0.8, 8, 8);
        let graph = Graph::<AB, Ramp> {
            field: Ramp,
            field_fine: None,
            poses: None,
            sampler: DepthSamplerConfig::new()
                .with_depth_near(1.0)
                .with_depth_far(3.0)
                .with_sample_count(8)
                .with_is_stratified(false),
            renderer: VolumeRendererConfig::new(),
            is_ndc: false,
        };
        let bounds = graph.sampler.bounds();
        let context =
            RenderContext::new(RenderMode::Evaluate, TrainingProgress::complete());

        let image = graph
            .render(&Pose::identity(1, &device), &[intrinsics], None, &bounds, &context)
            .unwrap()
            .coarse
            .colors_rgb;

        let mut start = PoseMatrix::IDENTITY;
        start[0][3] = 0.3;
        let start_pose = Pose::<AB>::from_matrices(&[start], &device);

        let output = TestTimeConfig::new()
            .with_iteration_count(60)
            .with_learning_rate(1e-2)
            .with_ray_count(64)
            .optimize(&graph, &start_pose, &intrinsics, image.to_owned(), &bounds)
            .unwrap();

        let error = |pose: &PoseMatrix| {
            let colors_rgb = graph
                .render(
                    &Pose::from_matrices(&[*pose], &device),
                    &[intrinsics],
                    None,
                    &bounds,
                    &context,
                )
                .unwrap()
                .coarse
                .colors_rgb;
            (colors_rgb - image.to_owned())
                .powf_scalar(2.0)
                .mean()
                .into_scalar()
        };
        let error_start = error(&start);
        let error_end = error(&output);
        assert!(error_end < error_start * 0.5, "{error_end} >= {error_start} / 2");
    }
}
