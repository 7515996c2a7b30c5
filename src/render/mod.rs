//! Volume rendering of radiance fields.

pub mod composite;

pub use crate::{
    camera::{Intrinsics, Pose},
    field::RadianceField,
    pose::PoseRefinement,
    sampler::{DepthBounds, DepthSamplerConfig},
    state::RenderContext,
};
pub use burn::{
    config::Config,
    tensor::{backend::Backend, Int, Tensor},
};
pub use composite::*;

use crate::{
    camera::{center_and_ray, convert_ndc, points_from_depth},
    error::Error,
    function::tensor_extensions::{range_indices, TensorFloatExtension},
};

/// The configuration of [`Graph::render`].
#[derive(Config, Debug, PartialEq)]
pub struct VolumeRendererConfig {
    /// The color behind the scene.
    pub background: Option<[f32; 3]>,
    /// The number of rays rendered at once by [`Graph::render_by_slices`].
    #[config(default = 1024)]
    pub slice_ray_count: usize,
    /// The near plane of normalized device coordinates.
    #[config(default = 1.0)]
    pub ndc_near: f64,
}

/// The output of [`Graph::render`].
#[derive(Clone, Debug)]
pub struct RenderOutput<B: Backend> {
    pub coarse: Composite<B>,
    /// Present if the graph has a fine field.
    pub fine: Option<Composite<B>>,
    /// The coarse depths `[B, R, N]`
    pub depth_samples: Tensor<B, 3>,
}

/// Renders images from radiance fields with optionally refined poses.
///
/// ## Details
///
/// The coarse field is evaluated on stratified depths.
/// If there is a fine field, it is evaluated on the union of
/// stratified depths and depths resampled from the coarse weights.
#[derive(Clone, Debug)]
pub struct Graph<B: Backend, F> {
    pub field: F,
    pub field_fine: Option<F>,
    /// Present if the poses are refined.
    pub poses: Option<PoseRefinement<B>>,
    pub sampler: DepthSamplerConfig,
    pub renderer: VolumeRendererConfig,
    /// Whether to render in normalized device coordinates.
    pub is_ndc: bool,
}

impl<B: Backend, F: RadianceField<B>> Graph<B, F> {
    /// The base poses at `indices` refined by [`Self::poses`], if any.
    pub fn refined_poses(
        &self,
        base: &Pose<B>,
        indices: Option<Tensor<B, 1, Int>>,
    ) -> Pose<B> {
        match &self.poses {
            Some(refinement) => refinement.refine(base, indices),
            None => base.to_owned(),
        }
    }

    /// Renders the rays of images.
    ///
    /// ## Arguments
    ///
    /// * `poses` - `[B, 3, 4]`
    /// * `intrinsics` - One per pose, or one shared by all poses.
    /// * `rays` - The indices of the rendered pixels `[R]`, or all `H * W` pixels.
    /// * `bounds` - The depth bounds of all pixels.
    pub fn render(
        &self,
        poses: &Pose<B>,
        intrinsics: &[Intrinsics],
        rays: Option<Tensor<B, 1, Int>>,
        bounds: &DepthBounds<B>,
        context: &RenderContext,
    ) -> Result<RenderOutput<B>, Error> {
        let (mut center, mut ray) = center_and_ray(poses, intrinsics)?;
        let mut bounds = bounds.to_owned();
        if let Some(rays) = rays {
            center = center.select(1, rays.to_owned());
            ray = ray.select(1, rays.to_owned());
            bounds = bounds.select_rays(rays);
        }
        if self.is_ndc {
            (center, ray) =
                convert_ndc(center, ray, intrinsics, self.renderer.ndc_near)?;
        }

        let [batch_count, ray_count, _] = ray.dims();
        let samples = self.sampler.sample_stratified(
            &bounds,
            batch_count,
            ray_count,
            &ray.device(),
        );

        let coarse = self.render_samples(
            &self.field,
            center.to_owned(),
            ray.to_owned(),
            samples.values.to_owned(),
            context,
        );

        let fine = match &self.field_fine {
            Some(field_fine) => {
                let depths_fine = self
                    .sampler
                    .sample_importance(coarse.weights.to_owned(), samples.bins)?;
                let depths = DepthSamplerConfig::merge_samples(
                    samples.values.to_owned(),
                    depths_fine,
                );
                Some(self.render_samples(field_fine, center, ray, depths, context))
            },
            None => None,
        };

        Ok(RenderOutput {
            coarse,
            fine,
            depth_samples: samples.values,
        })
    }

    /// Renders all pixels in fixed-size slices of rays, one slice at a time.
    pub fn render_by_slices(
        &self,
        poses: &Pose<B>,
        intrinsics: &[Intrinsics],
        bounds: &DepthBounds<B>,
        context: &RenderContext,
    ) -> Result<RenderOutput<B>, Error> {
        let pixel_count = intrinsics
            .first()
            .map(|intrinsics| intrinsics.pixel_count())
            .ok_or_else(|| {
                Error::Validation("intrinsics.len()".into(), "at least 1".into())
            })?;
        let slice_ray_count = self.renderer.slice_ray_count.max(1);
        let device = poses.device();

        let outputs = (0..pixel_count)
            .step_by(slice_ray_count)
            .map(|start| {
                let end = (start + slice_ray_count).min(pixel_count);

                #[cfg(all(debug_assertions, not(test)))]
                log::debug!(
                    target: "barf::render",
                    "render_by_slices > rays {start}..{end} of {pixel_count}",
                );

                let rays = range_indices(start, end, &device);
                self.render(poses, intrinsics, Some(rays), bounds, context)
            })
            .collect::<Result<Vec<_>, _>>()?;

        RenderOutput::cat(outputs).ok_or_else(|| {
            Error::Validation("The pixel count".into(), "positive".into())
        })
    }

    fn render_samples(
        &self,
        field: &F,
        center: Tensor<B, 3>,
        ray: Tensor<B, 3>,
        depths: Tensor<B, 3>,
        context: &RenderContext,
    ) -> Composite<B> {
        // [B, R, N, 3]
        let points = points_from_depth(center, ray.to_owned(), depths.to_owned());
        let directions = ray.to_owned().normalize_last().unsqueeze_dim::<4>(2)
            + points.zeros_like();

        let output = field.evaluate(points, directions, context);
        composite(
            ray,
            output.colors_rgb,
            output.densities,
            depths,
            self.renderer.background,
        )
    }
}

impl<B: Backend> RenderOutput<B> {
    /// The finest composite.
    #[inline]
    pub fn finest(&self) -> &Composite<B> {
        self.fine.as_ref().unwrap_or(&self.coarse)
    }

    /// Concatenates the rays of all outputs in order.
    ///
    /// It returns `None` if there is no output.
    pub fn cat(outputs: Vec<Self>) -> Option<Self> {
        if outputs.is_empty() {
            return None;
        }
        let is_fine = outputs.iter().all(|output| output.fine.is_some());

        let count = outputs.len();
        let mut coarse = Vec::with_capacity(count);
        let mut fine = Vec::with_capacity(count);
        let mut depth_samples = Vec::with_capacity(count);
        for output in outputs {
            coarse.push(output.coarse);
            fine.extend(output.fine);
            depth_samples.push(output.depth_samples);
        }

        Some(Self {
            coarse: Composite::cat(coarse),
            fine: is_fine.then(|| Composite::cat(fine)),
            depth_samples: Tensor::cat(depth_samples, 1),
        })
    }
}

impl Default for VolumeRendererConfig {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}
