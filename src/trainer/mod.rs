//! Joint optimization of radiance fields and camera poses.

pub mod config;
pub mod evaluate;

pub use crate::{
    camera::{Intrinsics, Pose, PoseMatrix},
    checkpoint::{CheckpointState, Checkpointer},
    dataset::{Dataset, ReferenceSource},
    field::{NerfField, NerfFieldConfig, RadianceField},
    metric::MetricSink,
    pose::{PoseInitialization, PoseRefinement, PoseRefinementConfig, Sim3},
    render::{Graph, VolumeRendererConfig},
    sampler::{DepthBounds, DepthSamplerConfig},
    state::{RenderContext, RenderMode, TrainingProgress},
};
pub use burn::{
    config::Config,
    module::AutodiffModule,
    tensor::{backend::AutodiffBackend, backend::Backend, Tensor},
};
pub use config::*;
pub use evaluate::*;

use crate::{
    backend::WgpuAutodiff,
    error::Error,
    function::tensor_extensions::from_indices,
    pose::perturb_poses,
};
use burn::{
    nn::loss::{MseLoss, Reduction},
    optim::{AdamConfig, GradientsParams, Optimizer},
    tensor::{ElementConversion, TensorData},
};
use rand::{rngs::StdRng, SeedableRng};
use std::fmt;

/// Trains a [`Graph`] on a dataset.
///
/// ## Details
///
/// The graph refines the poses if [`CameraConfig::is_refined`],
/// otherwise the base poses are fixed.
pub struct Trainer<AB: AutodiffBackend, F> {
    pub config: BarfConfig,
    pub graph: Graph<AB, F>,
    /// The number of finished iterations.
    pub iteration: u64,
    /// The alignment of the learned poses found by [`Trainer::evaluate_poses`]
    /// or [`Trainer::resume`].
    pub sim3: Sim3,
    pub checkpointer: Option<Checkpointer>,

    /// `[N, H * W, 3]`
    images: Tensor<AB, 3>,
    intrinsics: Vec<Intrinsics>,
    /// `[N, 3, 4]`
    poses_base: Pose<AB>,
    poses_ground_truth: Option<Vec<PoseMatrix>>,
    poses_motion_capture: Option<Vec<PoseMatrix>>,
    bounds: DepthBounds<AB>,
    depth_supervision: Option<DepthSupervision<AB>>,
    rng: StdRng,
}

/// A trainer of [`NerfField`] on the GPU.
pub type WgpuTrainer = Trainer<WgpuAutodiff, NerfField<WgpuAutodiff>>;

/// The losses of one iteration.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct TrainingLosses {
    pub render: f64,
    pub render_fine: Option<f64>,
    pub depth: Option<f64>,
    /// The weighted sum.
    pub total: f64,
}

/// Sensor depths and the mask of supervised pixels.
#[derive(Clone, Debug)]
struct DepthSupervision<B: Backend> {
    /// `[N, H * W]`
    depths: Tensor<B, 2>,
    /// `[N, H * W]`, `1` where supervised.
    mask: Tensor<B, 2>,
}

impl<AB, F> Trainer<AB, F>
where
    AB: AutodiffBackend,
    F: RadianceField<AB> + AutodiffModule<AB>,
{
    /// Sets up the training on every image of `dataset`.
    ///
    /// ## Errors
    ///
    /// If the images differ in size, if the fine field is missing with fine sampling,
    /// or if sensor depth is required but missing.
    pub fn new(
        config: BarfConfig,
        dataset: &impl Dataset,
        field: F,
        field_fine: Option<F>,
        device: &AB::Device,
    ) -> Result<Self, Error> {
        AB::seed(config.seed);
        let rng = StdRng::seed_from_u64(config.seed);

        let count = dataset.len();
        if count == 0 {
            return Err(Error::Validation(
                "The image count of the dataset".into(),
                "positive".into(),
            ));
        }
        if config.is_fine_sampling != field_fine.is_some() {
            return Err(Error::Validation(
                "The presence of the fine field".into(),
                format!("{} to fine sampling", config.is_fine_sampling),
            ));
        }

        let cameras = (0..count)
            .map(|index| dataset.camera(index))
            .collect::<Result<Vec<_>, _>>()?;
        let intrinsics = cameras
            .iter()
            .map(|camera| camera.intrinsics)
            .collect::<Vec<_>>();
        let pixel_count = intrinsics[0].pixel_count();

        // [N, H * W, 3]
        let images = (0..count)
            .map(|index| {
                let image = dataset.image(index)?;
                if image.pixel_count() != pixel_count {
                    return Err(Error::Validation(
                        format!("The pixel count of image {index}"),
                        format!("{pixel_count}"),
                    ));
                }
                Ok(image.to_tensor::<AB>(device))
            })
            .collect::<Result<Vec<_>, Error>>()?;
        let images = Tensor::stack::<3>(images, 0);

        // Base poses
        let poses_dataset =
            cameras.iter().map(|camera| camera.pose).collect::<Vec<_>>();
        let mut poses_base = config.camera.initialization.init(&poses_dataset, device);
        if config.camera.noise > 0.0 {
            poses_base = perturb_poses(&poses_base, config.camera.noise, config.seed);
        }

        // Depth bounds and supervision
        let is_depth_supervised = config.loss.depth > 0.0;
        let depth_maps = match config.sampler.prior.is_some() || is_depth_supervised {
            true => (0..count)
                .map(|index| {
                    dataset.depth(index)?.ok_or_else(|| {
                        Error::Validation(
                            format!("The sensor depth of image {index}"),
                            "present".into(),
                        )
                    })
                })
                .collect::<Result<Vec<_>, _>>()?,
            false => vec![],
        };
        let bounds = match &config.sampler.prior {
            Some(policy) => DepthBounds::from_prior(
                policy,
                &depth_maps.iter().collect::<Vec<_>>(),
                device,
            )?,
            None => config.sampler.bounds(),
        };
        let depth_supervision = match is_depth_supervised {
            true => Some(DepthSupervision::new(
                &depth_maps,
                config.loss.depth_confidence_min,
                pixel_count,
                device,
            )?),
            false => None,
        };

        let graph = Graph {
            field,
            field_fine,
            poses: config
                .camera
                .is_refined
                .then(|| PoseRefinementConfig::new(count).init(device)),
            sampler: config.sampler.to_owned(),
            renderer: config.renderer.to_owned(),
            is_ndc: config.camera.is_ndc,
        };

        log::info!(
            target: "barf::trainer",
            "new > {count} images of {pixel_count} pixels, refined: {}",
            config.camera.is_refined,
        );

        Ok(Self {
            config,
            graph,
            iteration: 0,
            sim3: Sim3::identity(),
            checkpointer: None,
            images,
            intrinsics,
            poses_base,
            poses_ground_truth: dataset.reference_poses(ReferenceSource::GroundTruth),
            poses_motion_capture: dataset
                .reference_poses(ReferenceSource::MotionCapture),
            bounds,
            depth_supervision,
            rng,
        })
    }

    /// Saves a checkpoint every [`BarfConfig::checkpoint_interval`] iterations.
    pub fn with_checkpointer(
        mut self,
        checkpointer: Checkpointer,
    ) -> Self {
        self.checkpointer = Some(checkpointer);
        self
    }

    /// Trains until [`BarfConfig::iteration_max`].
    pub fn train<S: MetricSink>(
        &mut self,
        sink: &mut S,
    ) -> Result<(), Error> {
        let mut optimizer = AdamConfig::new().init::<AB, F>();
        let mut optimizer_fine = AdamConfig::new().init::<AB, F>();
        let mut optimizer_pose = AdamConfig::new().init::<AB, PoseRefinement<AB>>();

        log::info!(
            target: "barf::trainer",
            "train > from iteration {} to {}",
            self.iteration,
            self.config.iteration_max,
        );

        while self.iteration < self.config.iteration_max {
            let losses = self.train_iteration(
                &mut optimizer,
                &mut optimizer_fine,
                &mut optimizer_pose,
            )?;
            let iteration = self.iteration;

            if self.config.log_interval > 0 && iteration % self.config.log_interval == 0 {
                self.log_losses(sink, &losses)?;
            }
            if self.config.checkpoint_interval > 0
                && iteration % self.config.checkpoint_interval == 0
            {
                self.save_checkpoint()?;
            }
        }

        Ok(())
    }

    /// Runs one iteration of optimization on random rays of all images.
    pub fn train_iteration<O, OP>(
        &mut self,
        optimizer: &mut O,
        optimizer_fine: &mut O,
        optimizer_pose: &mut OP,
    ) -> Result<TrainingLosses, Error>
    where
        O: Optimizer<F, AB>,
        OP: Optimizer<PoseRefinement<AB>, AB>,
    {
        let iteration = self.iteration;
        let iteration_max = self.config.iteration_max;
        let context =
            RenderContext::new(RenderMode::Train, self.config.progress(iteration));
        let device = self.poses_base.device();

        // The same random rays of every image
        let [image_count, pixel_count, _] = self.images.dims();
        let ray_count = (self.config.ray_count / image_count).clamp(1, pixel_count);
        let rays =
            rand::seq::index::sample(&mut self.rng, pixel_count, ray_count).into_vec();
        let rays = from_indices::<AB>(&rays, &device);

        let poses = self.graph.refined_poses(&self.poses_base, None);
        let output = self.graph.render(
            &poses,
            &self.intrinsics,
            Some(rays.to_owned()),
            &self.bounds,
            &context,
        )?;

        // [N, R, 3]
        let target = self.images.to_owned().select(1, rays.to_owned());
        let weights = &self.config.loss;

        let loss_render = MseLoss::new().forward(
            output.coarse.colors_rgb.to_owned(),
            target.to_owned(),
            Reduction::Mean,
        );
        let mut losses = TrainingLosses {
            render: scalar(&loss_render),
            ..Default::default()
        };
        let mut loss = loss_render.mul_scalar(weights.render);

        if let Some(fine) = &output.fine {
            let loss_render_fine = MseLoss::new().forward(
                fine.colors_rgb.to_owned(),
                target,
                Reduction::Mean,
            );
            losses.render_fine = Some(scalar(&loss_render_fine));
            loss = loss + loss_render_fine.mul_scalar(weights.render_fine);
        }

        if let Some(supervision) = &self.depth_supervision {
            let loss_depth = supervision.loss(output.coarse.depths.to_owned(), rays);
            losses.depth = Some(scalar(&loss_depth));
            loss = loss + loss_depth.mul_scalar(weights.depth);
        }
        losses.total = scalar(&loss);

        #[cfg(all(debug_assertions, not(test)))]
        log::debug!(
            target: "barf::trainer",
            "train_iteration > iteration {iteration}: loss {}",
            losses.total,
        );

        // Every module steps on its own gradients
        let mut grads = loss.backward();
        let optimizers = &self.config.optimizer;
        let learning_rate = optimizers.learning_rate_at(iteration, iteration_max);

        let grads_field = GradientsParams::from_module(&mut grads, &self.graph.field);
        self.graph.field =
            optimizer.step(learning_rate, self.graph.field.to_owned(), grads_field);

        if let Some(field_fine) = self.graph.field_fine.take() {
            let grads_field_fine = GradientsParams::from_module(&mut grads, &field_fine);
            self.graph.field_fine =
                Some(optimizer_fine.step(learning_rate, field_fine, grads_field_fine));
        }

        if let Some(poses) = self.graph.poses.take() {
            let learning_rate_pose =
                optimizers.learning_rate_pose_at(iteration, iteration_max);
            let grads_pose = GradientsParams::from_module(&mut grads, &poses);
            self.graph.poses =
                Some(optimizer_pose.step(learning_rate_pose, poses, grads_pose));
        }

        self.iteration += 1;
        Ok(losses)
    }

    /// Resumes from the checkpoint at `iteration`, or the latest one.
    ///
    /// ## Details
    ///
    /// The Adam moments are not checkpointed, so the optimizers restart
    /// from zero moments on the next [`Trainer::train`].
    /// The alignment [`Trainer::sim3`] is recomputed from the loaded poses.
    ///
    /// ## Errors
    ///
    /// [`Error::MissingCheckpoint`] if there is no such checkpoint.
    pub fn resume(
        &mut self,
        checkpointer: &Checkpointer,
        iteration: Option<u64>,
    ) -> Result<(), Error> {
        let iteration = match iteration {
            Some(iteration) => iteration,
            None => checkpointer
                .latest()?
                .ok_or_else(|| Error::MissingCheckpoint(checkpointer.directory.to_owned()))?,
        };
        let device = self.poses_base.device();

        let (graph, state) =
            checkpointer.load(iteration, self.graph.to_owned(), &device)?;
        self.graph = graph;
        self.iteration = state.iteration;
        self.sim3 = self.alignment()?;

        log::info!(
            target: "barf::trainer",
            "resume > iteration {} at progress {}",
            state.iteration,
            state.progress,
        );

        Ok(())
    }

    /// The refined poses of all training images.
    pub fn poses_learned(&self) -> Result<Vec<PoseMatrix>, Error> {
        self.graph.refined_poses(&self.poses_base, None).to_matrices()
    }

    fn save_checkpoint(&self) -> Result<(), Error> {
        if let Some(checkpointer) = &self.checkpointer {
            let state = CheckpointState::new(
                self.iteration,
                self.config.progress(self.iteration).value(),
            );
            checkpointer.save(&self.graph, &state)?;
        }
        Ok(())
    }

    fn log_losses<S: MetricSink>(
        &mut self,
        sink: &mut S,
        losses: &TrainingLosses,
    ) -> Result<(), Error> {
        let step = self.iteration;
        sink.scalar("train", "loss", step, losses.total);
        sink.scalar("train", "loss_render", step, losses.render);
        sink.scalar("train", "psnr", step, -10.0 * losses.render.log10());
        if let Some(loss) = losses.render_fine {
            sink.scalar("train", "loss_render_fine", step, loss);
            sink.scalar("train", "psnr_fine", step, -10.0 * loss.log10());
        }
        if let Some(loss) = losses.depth {
            sink.scalar("train", "loss_depth", step, loss);
        }
        sink.scalar(
            "train",
            "learning_rate",
            step,
            self.config
                .optimizer
                .learning_rate_at(step, self.config.iteration_max),
        );

        log::info!(
            target: "barf::trainer",
            "train > iteration {step}/{}: loss {:.6}, psnr {:.2}",
            self.config.iteration_max,
            losses.total,
            -10.0 * losses.render.log10(),
        );

        if self.graph.poses.is_some() {
            if let Some(errors) =
                self.evaluate_poses_if_available(self.config.evaluation.reference)?
            {
                sink.scalar("train", "error_rotation", step, errors.rotation_mean_degrees());
                sink.scalar("train", "error_translation", step, errors.translation_mean());
            }
            sink.scalar(
                "train",
                "learning_rate_pose",
                step,
                self.config
                    .optimizer
                    .learning_rate_pose_at(step, self.config.iteration_max),
            );
        }

        Ok(())
    }
}

impl<B: Backend> DepthSupervision<B> {
    fn new(
        depth_maps: &[crate::dataset::DepthMap],
        confidence_min: u8,
        pixel_count: usize,
        device: &B::Device,
    ) -> Result<Self, Error> {
        let count = depth_maps.len();
        if depth_maps.iter().any(|map| {
            map.depths.len() != pixel_count || map.confidences.len() != pixel_count
        }) {
            return Err(Error::Validation(
                "The pixel count of depth maps".into(),
                format!("{pixel_count}"),
            ));
        }

        let depths = depth_maps
            .iter()
            .flat_map(|map| map.depths.iter().copied())
            .collect::<Vec<_>>();
        let mask = depth_maps
            .iter()
            .flat_map(|map| map.confidences.iter())
            .map(|&confidence| (confidence >= confidence_min) as u8 as f32)
            .collect::<Vec<_>>();
        let to_tensor = |values: Vec<f32>| {
            Tensor::from_data(
                TensorData::new(values, [count, pixel_count]).convert::<B::FloatElem>(),
                device,
            )
        };

        Ok(Self {
            depths: to_tensor(depths),
            mask: to_tensor(mask),
        })
    }

    /// The mean absolute error on supervised rays.
    ///
    /// ## Shapes
    ///
    /// * `depths` - `[N, R, 1]`
    /// * `rays` - `[R]`
    fn loss(
        &self,
        depths: Tensor<B, 3>,
        rays: Tensor<B, 1, burn::tensor::Int>,
    ) -> Tensor<B, 1> {
        let [count, ray_count, _] = depths.dims();
        let depths = depths.reshape([count, ray_count]);
        let target = self.depths.to_owned().select(1, rays.to_owned());
        let mask = self.mask.to_owned().select(1, rays);

        let error = ((depths - target).abs() * mask.to_owned()).sum();
        error / mask.sum().clamp_min(1.0)
    }
}

impl<AB: AutodiffBackend, F: fmt::Debug> fmt::Debug for Trainer<AB, F> {
    fn fmt(
        &self,
        f: &mut fmt::Formatter,
    ) -> fmt::Result {
        f.debug_struct("Trainer")
            .field("iteration", &self.iteration)
            .field("graph", &self.graph)
            .field("images.dims()", &self.images.dims())
            .field("sim3", &self.sim3)
            .finish()
    }
}

fn scalar<B: Backend>(tensor: &Tensor<B, 1>) -> f64 {
    tensor.to_owned().into_scalar().elem::<f64>()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        camera::PoseMatrixExtension,
        dataset::{Camera, DepthMap, Image, MemoryDataset},
        encoding::PositionalEncodingConfig,
        export::FrameWriter,
        metric::{ImageQuality, LogSink},
    };
    use burn::backend::{Autodiff, NdArray};
    use nalgebra::{Matrix3, Vector3};
    use std::path::PathBuf;

    type AB = Autodiff<NdArray<f32>>;

    const SIZE: u32 = 4;

    fn dataset() -> MemoryDataset {
        let intrinsics = Intrinsics::from_field_of_view(0.8, SIZE, SIZE);
        let translations = [[1.0, 0.0, 4.0], [-1.0, 0.0, 4.0], [0.0, -1.0, 4.0]];
        let cameras = translations
            .iter()
            .map(|&[x, y, z]| Camera {
                intrinsics,
                pose: PoseMatrix::from_parts(&Matrix3::identity(), &Vector3::new(x, y, z)),
            })
            .collect::<Vec<_>>();
        let images = (0..cameras.len())
            .map(|index| {
                let value = 0.2 + 0.3 * index as f32;
                Image::new(SIZE, SIZE, vec![value; (SIZE * SIZE * 3) as usize])
                    .unwrap()
            })
            .collect();

        MemoryDataset::new(images, cameras).unwrap()
    }

    fn config() -> BarfConfig {
        BarfConfig::new()
            .with_field(
                NerfFieldConfig::new()
                    .with_feature_widths(vec![8, 8])
                    .with_skip_layers(vec![])
                    .with_rgb_widths(vec![])
                    .with_encoding_position(PositionalEncodingConfig::new().with_levels(2))
                    .with_encoding_direction(
                        PositionalEncodingConfig::new().with_levels(1),
                    ),
            )
            .with_sampler(
                DepthSamplerConfig::new()
                    .with_sample_count(4)
                    .with_sample_count_fine(4),
            )
            .with_renderer(VolumeRendererConfig::new().with_slice_ray_count(5))
            .with_optimizer(OptimizerConfig::new().with_test_iteration_count(2))
            .with_iteration_max(4)
            .with_ray_count(12)
            .with_log_interval(2)
            .with_checkpoint_interval(2)
    }

    fn trainer(config: BarfConfig) -> Trainer<AB, NerfField<AB>> {
        let device = Default::default();
        let (field, field_fine) = config.init_fields::<AB>(&device);
        Trainer::new(config, &dataset(), field, field_fine, &device).unwrap()
    }

    fn directory(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("barf-trainer-{}-{name}", std::process::id()))
    }

    #[test]
    fn train_refines_poses() {
        let mut trainer = trainer(config());
        trainer.train(&mut LogSink).unwrap();
        assert_eq!(trainer.iteration, 4);

        let tangents = trainer.graph.poses.as_ref().unwrap().get_tangents();
        assert_eq!(tangents.dims(), [3, 6]);
        assert!(tangents.abs().sum().into_scalar() > 0.0);

        let errors = trainer.evaluate_poses(ReferenceSource::GroundTruth).unwrap();
        assert_eq!(errors.len(), 3);
        assert!(errors.rotation_mean_degrees() < 5.0);

        let result = trainer.evaluate_poses(ReferenceSource::MotionCapture);
        assert!(matches!(result, Err(Error::Validation(..))));
    }

    #[test]
    fn train_without_refinement_keeps_poses() {
        let config = config()
            .with_is_fine_sampling(false)
            .with_camera(CameraConfig::new().with_is_refined(false));
        let mut trainer = trainer(config);
        trainer.train(&mut LogSink).unwrap();

        assert!(trainer.graph.poses.is_none());
        assert!(trainer.graph.field_fine.is_none());
        let poses = trainer.poses_learned().unwrap();
        let reference = dataset().reference_poses(ReferenceSource::GroundTruth);
        assert_eq!(Some(poses), reference);
    }

    #[test]
    fn new_rejects_mismatched_fields() {
        let device = Default::default();
        let config = config();
        let (field, _) = config.init_fields::<AB>(&device);

        let result = Trainer::new(config, &dataset(), field, None, &device);
        assert!(matches!(result, Err(Error::Validation(..))));
    }

    #[test]
    fn new_requires_sensor_depth_for_prior() {
        let device = Default::default();
        let config = config()
            .with_sampler(DepthSamplerConfig::new().with_default_prior());
        let (field, field_fine) = config.init_fields::<AB>(&device);

        let result = Trainer::new(config, &dataset(), field, field_fine, &device);
        assert!(matches!(result, Err(Error::Validation(..))));
    }

    #[test]
    fn train_with_depth_prior_and_loss() {
        let device = Default::default();
        let pixel_count = (SIZE * SIZE) as usize;
        let depth_maps = (0..3)
            .map(|_| DepthMap {
                depths: vec![4.0; pixel_count],
                confidences: (0..pixel_count).map(|index| (index % 3) as u8).collect(),
            })
            .collect();
        let dataset = dataset().with_depths(depth_maps).unwrap();
        let config = config()
            .with_sampler(
                DepthSamplerConfig::new()
                    .with_sample_count(4)
                    .with_sample_count_fine(4)
                    .with_default_prior(),
            )
            .with_loss(LossConfig::new().with_depth(0.1));
        let (field, field_fine) = config.init_fields::<AB>(&device);

        let mut trainer =
            Trainer::new(config, &dataset, field, field_fine, &device).unwrap();
        let mut optimizer = AdamConfig::new().init::<AB, NerfField<AB>>();
        let mut optimizer_fine = AdamConfig::new().init::<AB, NerfField<AB>>();
        let mut optimizer_pose = AdamConfig::new().init::<AB, PoseRefinement<AB>>();
        let losses = trainer
            .train_iteration(&mut optimizer, &mut optimizer_fine, &mut optimizer_pose)
            .unwrap();

        let depth = losses.depth.unwrap();
        assert!(depth.is_finite() && depth >= 0.0, "{depth}");
        assert!(losses.render_fine.is_some());
        assert!(losses.total >= losses.render);
    }

    #[test]
    fn depth_supervision_loss_is_masked() {
        type B = NdArray<f32>;

        let device = Default::default();
        let depth_maps = [DepthMap {
            depths: vec![1.0, 2.0, 3.0],
            confidences: vec![2, 0, 1],
        }];
        let supervision =
            DepthSupervision::<B>::new(&depth_maps, 1, 3, &device).unwrap();

        let depths = Tensor::<B, 3>::from_floats([[[1.5], [9.0], [2.0]]], &device);
        let rays = from_indices::<B>(&[0, 1, 2], &device);
        let loss = supervision.loss(depths, rays).into_scalar();
        // (0.5 + 1.0) / 2
        assert!((loss - 0.75).abs() < 1e-6, "{loss}");
    }

    #[test]
    fn resume_from_checkpoint() {
        let directory = directory("resume");
        let checkpointer = Checkpointer::new(&directory);
        let mut trained = trainer(config()).with_checkpointer(checkpointer.to_owned());
        trained.train(&mut LogSink).unwrap();
        assert_eq!(checkpointer.latest().unwrap(), Some(4));

        let mut resumed = trainer(config());
        resumed.resume(&checkpointer, None).unwrap();
        assert_eq!(resumed.iteration, 4);
        resumed
            .graph
            .poses
            .as_ref()
            .unwrap()
            .get_tangents()
            .into_data()
            .assert_approx_eq(
                &trained.graph.poses.as_ref().unwrap().get_tangents().into_data(),
                6,
            );

        resumed.resume(&checkpointer, Some(2)).unwrap();
        assert_eq!(resumed.iteration, 2);

        // Training continues from the loaded fields with fresh optimizers
        resumed.train(&mut LogSink).unwrap();
        assert_eq!(resumed.iteration, 4);

        let result = resumed.resume(&checkpointer, Some(3));
        assert!(matches!(result, Err(Error::MissingCheckpoint(_))));

        std::fs::remove_dir_all(directory).unwrap();
    }

    #[test]
    fn evaluate_images_after_resume_uses_loaded_alignment() {
        let directory = directory("resume_evaluate");
        let checkpointer = Checkpointer::new(&directory);
        let config = config()
            .with_camera(CameraConfig::new().with_noise(0.2))
            .with_sampler(
                DepthSamplerConfig::new()
                    .with_sample_count(4)
                    .with_sample_count_fine(4)
                    .with_is_stratified(false),
            )
            .with_optimizer(
                OptimizerConfig::new()
                    .with_is_test_photometric(false)
                    .with_test_iteration_count(2),
            )
            .with_log_interval(3);
        let mut trained =
            trainer(config.to_owned()).with_checkpointer(checkpointer.to_owned());
        trained.train(&mut LogSink).unwrap();

        let mut resumed = trainer(config.to_owned());
        assert_eq!(resumed.sim3, Sim3::identity());
        resumed.resume(&checkpointer, None).unwrap();
        let sim3 = resumed.alignment().unwrap();
        assert_ne!(sim3, Sim3::identity());
        assert_eq!(resumed.sim3, sim3);

        let dataset = dataset();
        let qualities = resumed
            .evaluate_images(&dataset, None, &mut LogSink, None)
            .unwrap();
        assert_eq!(qualities.len(), 3);
        for (index, quality) in qualities.iter().enumerate() {
            let camera = dataset.camera(index).unwrap();
            let target = dataset.image(index).unwrap();
            let view = resumed
                .render_view(
                    &sim3.unalign_pose(&camera.pose),
                    &camera.intrinsics,
                    &config.sampler.bounds(),
                )
                .unwrap();
            let expected = ImageQuality::evaluate::<AB>(
                &view.colors_rgb,
                &target,
                None,
                &Default::default(),
            )
            .unwrap();
            assert!((quality.psnr - expected.psnr).abs() < 1e-6, "{index}");
            assert!((quality.ssim - expected.ssim).abs() < 1e-6, "{index}");
        }

        std::fs::remove_dir_all(directory).unwrap();
    }

    #[test]
    fn evaluate_checkpoints_writes_summaries() {
        let directory = directory("evaluate_checkpoints");
        let checkpointer = Checkpointer::new(directory.join("checkpoints"));
        let mut trainer = trainer(config()).with_checkpointer(checkpointer.to_owned());
        trainer.train(&mut LogSink).unwrap();
        let sim3 = trainer.sim3;

        let evaluations = trainer
            .evaluate_checkpoints(
                &checkpointer,
                &dataset(),
                None,
                &mut LogSink,
                directory.join("evaluation"),
            )
            .unwrap();
        assert_eq!(
            evaluations.iter().map(|evaluation| evaluation.iteration).collect::<Vec<_>>(),
            vec![2, 4],
        );
        assert!(evaluations.iter().all(|evaluation| {
            evaluation.error_rotation.is_some()
                && evaluation.error_translation.is_some()
                && evaluation.quality.psnr.is_finite()
        }));
        assert_eq!(trainer.iteration, 4);
        assert_eq!(trainer.sim3, sim3);

        let read = |name: &str| {
            std::fs::read_to_string(directory.join("evaluation").join(name)).unwrap()
        };
        let pose_errors = read(CHECKPOINT_POSE_ERRORS_FILE_NAME);
        let lines = pose_errors.lines().collect::<Vec<_>>();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("2 ") && lines[1].starts_with("4 "));
        assert!(lines.iter().all(|line| line.split(' ').count() == 3));

        let qualities = read(CHECKPOINT_QUALITIES_FILE_NAME);
        let lines = qualities.lines().collect::<Vec<_>>();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("2 ") && lines[1].starts_with("4 "));
        assert!(lines.iter().all(|line| line.ends_with(" NaN")));

        assert!(directory.join("evaluation/00000002/rgb_0.png").is_file());
        assert!(directory.join("evaluation/00000004/depth_2.png").is_file());

        std::fs::remove_dir_all(directory).unwrap();
    }

    #[test]
    fn evaluate_images_and_novel_views() {
        struct ConstantScorer;

        impl PerceptualScorer for ConstantScorer {
            fn score(
                &self,
                _: &Image,
                _: &Image,
            ) -> Result<f64, Error> {
                Ok(0.25)
            }
        }

        let directory = directory("evaluate");
        let mut trainer = trainer(config());
        trainer.train(&mut LogSink).unwrap();
        trainer.evaluate_poses(ReferenceSource::GroundTruth).unwrap();

        let mut writer = FrameWriter::new(directory.join("test_view")).unwrap();
        let qualities = trainer
            .evaluate_images(
                &dataset(),
                Some(&ConstantScorer),
                &mut LogSink,
                Some(&mut writer),
            )
            .unwrap();
        assert_eq!(qualities.len(), 3);
        assert!(qualities.iter().all(|quality| quality.lpips == Some(0.25)));
        assert!(qualities.iter().all(|quality| quality.psnr.is_finite()));
        assert!(directory.join("test_view/rgb_2.png").is_file());
        assert!(directory.join("test_view/depth_2.png").is_file());

        let mut writer = FrameWriter::new(directory.join("novel_view")).unwrap();
        let views = trainer.render_novel_views(2, &mut writer).unwrap();
        assert_eq!(views.len(), 2);
        assert_eq!(views[0].depths_inverse.len(), (SIZE * SIZE) as usize);
        assert!(directory.join("novel_view/rgb_1.png").is_file());

        std::fs::remove_dir_all(directory).unwrap();
    }

    #[test]
    fn export_novel_videos_writes_frames() {
        let directory = directory("video");
        let config = config().with_evaluation(
            EvaluationConfig::new()
                .with_novel_view_count(3)
                .with_frame_rate(10),
        );
        let trainer = trainer(config);

        // Muxing depends on an installed encoder
        match trainer.export_novel_videos(&directory) {
            Ok(paths) => assert!(paths.iter().all(|path| path.is_file())),
            Err(error) => assert!(matches!(error, Error::Encoder(_)), "{error}"),
        }
        for index in 0..3 {
            assert!(directory.join(format!("novel_view/rgb_{index}.png")).is_file());
            assert!(directory.join(format!("novel_view/depth_{index}.png")).is_file());
        }

        std::fs::remove_dir_all(directory).unwrap();
    }
}
