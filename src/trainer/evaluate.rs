//! Evaluation of learned poses and rendered views.

pub use super::*;

use crate::{
    camera::{anchor_index, novel_view_poses},
    dataset::Image,
    export::{mux_video, FrameWriter},
    function::tensor_extensions::TensorFloatExtension,
    metric::ImageQuality,
    pose::{prealign, PoseErrors, TestTimeConfig},
    render::RenderOutput,
};
use std::{
    fs::{self, File},
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

/// A perceptual similarity model scoring images outside of the crate.
pub trait PerceptualScorer {
    /// The perceptual distance, lower is more similar.
    fn score(
        &self,
        output: &Image,
        target: &Image,
    ) -> Result<f64, Error>;
}

/// A rendered image with its normalized inverse depth.
#[derive(Clone, Debug, PartialEq)]
pub struct RenderedView {
    pub colors_rgb: Image,
    /// `[H * W]` in `[0, 1]`
    pub depths_inverse: Vec<f32>,
}

/// The evaluation of one saved checkpoint.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CheckpointEvaluation {
    pub iteration: u64,
    /// The mean rotation error in degrees, if the poses are refined.
    pub error_rotation: Option<f64>,
    /// The mean translation error, if the poses are refined.
    pub error_translation: Option<f64>,
    /// The mean quality of the test images.
    pub quality: ImageQuality,
}

/// Keeps `1 / depth` finite for transparent pixels.
pub const DEPTH_INVERSE_EPSILON: f64 = 1e-10;

/// The file of [`CheckpointEvaluation::encode_pose_errors`].
pub const CHECKPOINT_POSE_ERRORS_FILE_NAME: &str = "ckpt_quant_pose.txt";

/// The file of [`CheckpointEvaluation::encode_qualities`].
pub const CHECKPOINT_QUALITIES_FILE_NAME: &str = "ckpt_quant.txt";

impl<AB, F> Trainer<AB, F>
where
    AB: AutodiffBackend,
    F: RadianceField<AB> + AutodiffModule<AB>,
{
    /// Aligns the learned poses to the reference poses and measures their errors.
    ///
    /// The alignment is kept in [`Trainer::sim3`] for later evaluation.
    ///
    /// ## Errors
    ///
    /// If the reference poses are not available.
    pub fn evaluate_poses(
        &mut self,
        source: ReferenceSource,
    ) -> Result<PoseErrors, Error> {
        self.evaluate_poses_if_available(source)?.ok_or_else(|| {
            Error::Validation(
                format!("The reference poses of {source:?}"),
                "available".into(),
            )
        })
    }

    pub(super) fn evaluate_poses_if_available(
        &mut self,
        source: ReferenceSource,
    ) -> Result<Option<PoseErrors>, Error> {
        let reference = match self.reference_poses(source) {
            Some(reference) => reference.to_owned(),
            None => return Ok(None),
        };

        let predicted = self.poses_learned()?;
        self.sim3 = prealign(&predicted, &reference);
        let aligned = predicted
            .iter()
            .map(|pose| self.sim3.align_pose(pose))
            .collect::<Vec<_>>();
        let errors = PoseErrors::evaluate(&aligned, &reference)?;

        log::info!(
            target: "barf::trainer::evaluate",
            "evaluate_poses > rotation {:.3} deg, translation {:.5}",
            errors.rotation_mean_degrees(),
            errors.translation_mean(),
        );

        Ok(Some(errors))
    }

    /// The alignment of the current learned poses to the reference poses of
    /// [`EvaluationConfig::reference`].
    ///
    /// It is the identity without pose refinement or reference poses.
    pub fn alignment(&self) -> Result<Sim3, Error> {
        if self.graph.poses.is_none() {
            return Ok(Sim3::identity());
        }
        match self.reference_poses(self.config.evaluation.reference) {
            Some(reference) => Ok(prealign(&self.poses_learned()?, reference)),
            None => Ok(Sim3::identity()),
        }
    }

    fn reference_poses(
        &self,
        source: ReferenceSource,
    ) -> Option<&Vec<PoseMatrix>> {
        match source {
            ReferenceSource::GroundTruth => self.poses_ground_truth.as_ref(),
            ReferenceSource::MotionCapture => self.poses_motion_capture.as_ref(),
        }
    }

    /// Renders and scores every image of `dataset`.
    ///
    /// ## Details
    ///
    /// With pose refinement, the test poses are mapped into the learned frame
    /// by the current [`alignment`](Trainer::alignment)
    /// and optionally optimized photometrically.
    pub fn evaluate_images<S: MetricSink>(
        &self,
        dataset: &impl Dataset,
        scorer: Option<&dyn PerceptualScorer>,
        sink: &mut S,
        mut writer: Option<&mut FrameWriter>,
    ) -> Result<Vec<ImageQuality>, Error> {
        let device = self.poses_base.device();
        let optimizer = &self.config.optimizer;
        let sim3 = self.alignment()?;
        let mut qualities = Vec::with_capacity(dataset.len());

        for index in 0..dataset.len() {
            let camera = dataset.camera(index)?;
            let target = dataset.image(index)?;
            let bounds = match (&self.config.sampler.prior, dataset.depth(index)?) {
                (Some(policy), Some(depth_map)) => {
                    DepthBounds::from_prior(policy, &[&depth_map], &device)?
                },
                _ => self.config.sampler.bounds(),
            };

            let mut pose = camera.pose;
            if self.graph.poses.is_some() {
                pose = sim3.unalign_pose(&pose);
                if optimizer.is_test_photometric {
                    pose = TestTimeConfig::new()
                        .with_iteration_count(optimizer.test_iteration_count)
                        .with_learning_rate(optimizer.learning_rate_pose)
                        .with_ray_count(self.config.ray_count)
                        .with_seed(self.config.seed.wrapping_add(index as u64))
                        .optimize(
                            &self.graph,
                            &Pose::from_matrices(&[pose], &device),
                            &camera.intrinsics,
                            target.to_tensor::<AB>(&device).unsqueeze(),
                            &bounds,
                        )?;
                }
            }

            let view = self.render_view(&pose, &camera.intrinsics, &bounds)?;
            let lpips = scorer
                .map(|scorer| scorer.score(&view.colors_rgb, &target))
                .transpose()?;
            let quality =
                ImageQuality::evaluate::<AB>(&view.colors_rgb, &target, lpips, &device)?;

            let step = index as u64;
            sink.scalar("test", "psnr", step, quality.psnr);
            sink.scalar("test", "ssim", step, quality.ssim);
            if let Some(lpips) = quality.lpips {
                sink.scalar("test", "lpips", step, lpips);
            }
            sink.image("test", "rgb", step, &view.colors_rgb);
            if let Some(writer) = writer.as_deref_mut() {
                writer.write(index, &view.colors_rgb, Some(&view.depths_inverse))?;
            }

            qualities.push(quality);
        }

        let mean = ImageQuality::mean(&qualities);
        log::info!(
            target: "barf::trainer::evaluate",
            "evaluate_images > psnr {:.2}, ssim {:.3}, lpips {:.3}",
            mean.psnr,
            mean.ssim,
            mean.lpips.unwrap_or(f64::NAN),
        );

        Ok(qualities)
    }

    /// Renders `count` views orbiting around the anchor training pose.
    ///
    /// ## Details
    ///
    /// The anchor is the learned pose closest to the mean camera position.
    /// With pose refinement, the orbit is scaled by [`Sim3::scale_ratio`].
    pub fn render_novel_views(
        &self,
        count: usize,
        writer: &mut FrameWriter,
    ) -> Result<Vec<RenderedView>, Error> {
        let poses = self.poses_learned()?;
        let anchor = anchor_index(&poses).ok_or_else(|| {
            Error::Validation("The pose count".into(), "positive".into())
        })?;
        let scale = self.alignment()?.scale_ratio();
        let intrinsics = self.intrinsics[0];
        let bounds = self.config.sampler.bounds();

        novel_view_poses(&poses[anchor], count, scale)
            .iter()
            .enumerate()
            .map(|(index, pose)| {
                let view = self.render_view(pose, &intrinsics, &bounds)?;
                writer.write(index, &view.colors_rgb, Some(&view.depths_inverse))?;
                Ok(view)
            })
            .collect()
    }

    /// Evaluates the poses and the test images at every saved checkpoint.
    ///
    /// ## Details
    ///
    /// The frames of each checkpoint are written under `directory`
    /// in a subdirectory named by its zero-padded iteration.
    /// The pose errors and the mean image qualities are written to
    /// [`CHECKPOINT_POSE_ERRORS_FILE_NAME`] and [`CHECKPOINT_QUALITIES_FILE_NAME`].
    ///
    /// The fields, the poses and the alignment are restored afterwards.
    pub fn evaluate_checkpoints<S: MetricSink>(
        &mut self,
        checkpointer: &Checkpointer,
        dataset: &impl Dataset,
        scorer: Option<&dyn PerceptualScorer>,
        sink: &mut S,
        directory: impl AsRef<Path>,
    ) -> Result<Vec<CheckpointEvaluation>, Error> {
        let directory = directory.as_ref();
        fs::create_dir_all(directory)?;

        let graph = self.graph.to_owned();
        let sim3 = self.sim3;
        let evaluations =
            self.evaluate_checkpoints_in_order(checkpointer, dataset, scorer, sink, directory);
        self.graph = graph;
        self.sim3 = sim3;
        let evaluations = evaluations?;

        let mut file =
            BufWriter::new(File::create(directory.join(CHECKPOINT_POSE_ERRORS_FILE_NAME))?);
        CheckpointEvaluation::encode_pose_errors(&evaluations, &mut file)?;
        file.flush()?;

        let mut file =
            BufWriter::new(File::create(directory.join(CHECKPOINT_QUALITIES_FILE_NAME))?);
        CheckpointEvaluation::encode_qualities(&evaluations, &mut file)?;
        file.flush()?;

        Ok(evaluations)
    }

    fn evaluate_checkpoints_in_order<S: MetricSink>(
        &mut self,
        checkpointer: &Checkpointer,
        dataset: &impl Dataset,
        scorer: Option<&dyn PerceptualScorer>,
        sink: &mut S,
        directory: &Path,
    ) -> Result<Vec<CheckpointEvaluation>, Error> {
        let device = self.poses_base.device();
        let iterations = checkpointer.iterations()?;
        let mut evaluations = Vec::with_capacity(iterations.len());

        for iteration in iterations {
            let (graph, _) = checkpointer.load(iteration, self.graph.to_owned(), &device)?;
            self.graph = graph;

            let errors = match self.graph.poses.is_some() {
                true => self.evaluate_poses_if_available(self.config.evaluation.reference)?,
                false => None,
            };
            let mut writer = FrameWriter::new(directory.join(format!("{iteration:08}")))?;
            let qualities = self.evaluate_images(dataset, scorer, sink, Some(&mut writer))?;
            let evaluation = CheckpointEvaluation {
                iteration,
                error_rotation: errors.as_ref().map(PoseErrors::rotation_mean_degrees),
                error_translation: errors.as_ref().map(PoseErrors::translation_mean),
                quality: ImageQuality::mean(&qualities),
            };

            sink.scalar("checkpoint", "psnr", iteration, evaluation.quality.psnr);
            sink.scalar("checkpoint", "ssim", iteration, evaluation.quality.ssim);
            if let Some(error) = evaluation.error_rotation {
                sink.scalar("checkpoint", "error_rotation", iteration, error);
            }

            evaluations.push(evaluation);
        }

        Ok(evaluations)
    }

    /// Renders [`EvaluationConfig::novel_view_count`] novel views under `directory`
    /// and muxes them into color and depth videos.
    ///
    /// ## Returns
    ///
    /// The paths of the color video and the depth video.
    pub fn export_novel_videos(
        &self,
        directory: impl AsRef<Path>,
    ) -> Result<[PathBuf; 2], Error> {
        let directory = directory.as_ref();
        let evaluation = &self.config.evaluation;
        let mut writer = FrameWriter::new(directory.join("novel_view"))?;
        self.render_novel_views(evaluation.novel_view_count, &mut writer)?;

        let paths = [
            directory.join("novel_view_rgb.mp4"),
            directory.join("novel_view_depth.mp4"),
        ];
        mux_video(&writer.directory, "rgb", evaluation.frame_rate, &paths[0])?;
        mux_video(&writer.directory, "depth", evaluation.frame_rate, &paths[1])?;

        Ok(paths)
    }

    /// Renders a full image at `pose` with frozen fields.
    pub fn render_view(
        &self,
        pose: &PoseMatrix,
        intrinsics: &Intrinsics,
        bounds: &DepthBounds<AB>,
    ) -> Result<RenderedView, Error> {
        let device = self.poses_base.device();
        let context =
            RenderContext::new(RenderMode::Evaluate, TrainingProgress::complete());
        let graph = Graph {
            field: self.graph.field.to_owned().no_grad(),
            field_fine: self
                .graph
                .field_fine
                .to_owned()
                .map(|field| field.no_grad()),
            poses: None,
            sampler: self.graph.sampler.to_owned(),
            renderer: self.graph.renderer.to_owned(),
            is_ndc: self.graph.is_ndc,
        };

        let output = graph.render_by_slices(
            &Pose::from_matrices(&[*pose], &device),
            &[*intrinsics],
            bounds,
            &context,
        )?;

        let pixel_count = intrinsics.pixel_count();
        let colors_rgb = Image::from_tensor(
            output.finest().colors_rgb.to_owned().reshape([pixel_count, 3]),
            intrinsics.image_height,
            intrinsics.image_width,
        )?;
        let depths_inverse = depths_inverse(&output, self.graph.is_ndc)?;

        Ok(RenderedView {
            colors_rgb,
            depths_inverse,
        })
    }
}

impl CheckpointEvaluation {
    /// Writes `"<iteration> <rotation_degrees> <translation>"` lines
    /// of the evaluations with pose errors.
    pub fn encode_pose_errors<W: Write>(
        evaluations: &[Self],
        writer: &mut W,
    ) -> Result<(), Error> {
        for evaluation in evaluations {
            if let (Some(rotation), Some(translation)) =
                (evaluation.error_rotation, evaluation.error_translation)
            {
                writeln!(writer, "{} {rotation} {translation}", evaluation.iteration)?;
            }
        }
        Ok(())
    }

    /// Writes `"<iteration> <psnr> <ssim> <lpips>"` lines.
    ///
    /// A missing LPIPS is written as `NaN`.
    pub fn encode_qualities<W: Write>(
        evaluations: &[Self],
        writer: &mut W,
    ) -> Result<(), Error> {
        for evaluation in evaluations {
            let quality = &evaluation.quality;
            writeln!(
                writer,
                "{} {} {} {}",
                evaluation.iteration,
                quality.psnr,
                quality.ssim,
                quality.lpips.unwrap_or(f64::NAN),
            )?;
        }
        Ok(())
    }
}

/// The inverse depths of the finest composite.
///
/// ## Details
///
/// It is `(1 - depth) / opacity` in normalized device coordinates,
/// otherwise `1 / (depth / opacity + ε)`.
fn depths_inverse<B: Backend>(
    output: &RenderOutput<B>,
    is_ndc: bool,
) -> Result<Vec<f32>, Error> {
    let composite = output.finest();
    let depths = composite.depths.to_owned().into_f64s()?;
    let opacities = composite.opacities.to_owned().into_f64s()?;

    Ok(depths
        .iter()
        .zip(&opacities)
        .map(|(&depth, &opacity)| {
            let value = match is_ndc {
                true => (1.0 - depth) / opacity.max(DEPTH_INVERSE_EPSILON),
                false => {
                    1.0 / (depth / opacity.max(DEPTH_INVERSE_EPSILON)
                        + DEPTH_INVERSE_EPSILON)
                },
            };
            value.clamp(0.0, 1.0) as f32
        })
        .collect())
}
