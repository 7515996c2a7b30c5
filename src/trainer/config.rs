//! Configurations of training and evaluation.

pub use super::*;

use std::path::Path;

/// The root configuration of [`Trainer`].
#[derive(Config, Debug, PartialEq)]
pub struct BarfConfig {
    #[config(default = "NerfFieldConfig::new()")]
    pub field: NerfFieldConfig,
    /// Whether to resample depths for a fine field.
    #[config(default = true)]
    pub is_fine_sampling: bool,
    #[config(default = "DepthSamplerConfig::new()")]
    pub sampler: DepthSamplerConfig,
    #[config(default = "VolumeRendererConfig::new()")]
    pub renderer: VolumeRendererConfig,
    #[config(default = "CameraConfig::new()")]
    pub camera: CameraConfig,
    #[config(default = "OptimizerConfig::new()")]
    pub optimizer: OptimizerConfig,
    #[config(default = "LossConfig::new()")]
    pub loss: LossConfig,
    #[config(default = "EvaluationConfig::new()")]
    pub evaluation: EvaluationConfig,
    #[config(default = 200_000)]
    pub iteration_max: u64,
    /// The number of rays sampled per iteration over all images.
    #[config(default = 1024)]
    pub ray_count: usize,
    #[config(default = 100)]
    pub log_interval: u64,
    #[config(default = 10_000)]
    pub checkpoint_interval: u64,
    #[config(default = 0)]
    pub seed: u64,
}

/// How the cameras are set up.
#[derive(Config, Debug, PartialEq)]
pub struct CameraConfig {
    /// Whether to render in normalized device coordinates.
    #[config(default = false)]
    pub is_ndc: bool,
    #[config(default = "PoseInitialization::Dataset")]
    pub initialization: PoseInitialization,
    /// The scale of synthetic perturbations on the initial poses.
    #[config(default = 0.0)]
    pub noise: f64,
    /// Whether the poses are refined along the fields.
    #[config(default = true)]
    pub is_refined: bool,
}

/// The learning rates and their schedules.
#[derive(Config, Debug, PartialEq)]
pub struct OptimizerConfig {
    #[config(default = 5e-4)]
    pub learning_rate: f64,
    /// Decays the learning rate exponentially to this value.
    pub learning_rate_end: Option<f64>,
    #[config(default = 1e-3)]
    pub learning_rate_pose: f64,
    /// Decays the pose learning rate exponentially to this value.
    pub learning_rate_pose_end: Option<f64>,
    /// Ramps the pose learning rate up linearly over these iterations.
    pub warmup_pose: Option<u64>,
    /// The iterations of test-time pose optimization.
    #[config(default = 100)]
    pub test_iteration_count: usize,
    /// Whether to optimize the test poses photometrically before evaluation.
    #[config(default = true)]
    pub is_test_photometric: bool,
}

/// The weights of the losses.
#[derive(Config, Debug, PartialEq)]
pub struct LossConfig {
    /// The weight of the coarse color loss.
    #[config(default = 1.0)]
    pub render: f64,
    /// The weight of the fine color loss.
    #[config(default = 1.0)]
    pub render_fine: f64,
    /// The weight of the depth loss against sensor depth.
    #[config(default = 0.0)]
    pub depth: f64,
    /// The lowest confidence tier supervised by the depth loss.
    #[config(default = 1)]
    pub depth_confidence_min: u8,
}

/// The settings of evaluation.
#[derive(Config, Debug, PartialEq)]
pub struct EvaluationConfig {
    /// The trajectory the learned poses are evaluated against.
    #[config(default = "ReferenceSource::GroundTruth")]
    pub reference: ReferenceSource,
    #[config(default = 60)]
    pub novel_view_count: usize,
    #[config(default = 30)]
    pub frame_rate: u32,
}

impl BarfConfig {
    /// Loads the configuration from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, Error> {
        Self::load(path).map_err(|error| Error::Config(format!("{error:?}")))
    }

    /// Initializes the coarse field and, with fine sampling, the fine field.
    pub fn init_fields<B: Backend>(
        &self,
        device: &B::Device,
    ) -> (NerfField<B>, Option<NerfField<B>>) {
        let field = self.field.init(device);
        let field_fine = self.is_fine_sampling.then(|| self.field.init(device));
        (field, field_fine)
    }

    /// The progress at `iteration`.
    #[inline]
    pub fn progress(
        &self,
        iteration: u64,
    ) -> TrainingProgress {
        TrainingProgress::from_iteration(iteration, self.iteration_max)
    }
}

impl OptimizerConfig {
    /// The learning rate of the fields at `iteration`.
    pub fn learning_rate_at(
        &self,
        iteration: u64,
        iteration_max: u64,
    ) -> f64 {
        decay_exponential(
            self.learning_rate,
            self.learning_rate_end,
            iteration,
            iteration_max,
        )
    }

    /// The learning rate of the poses at `iteration` with the warm-up.
    ///
    /// `lr * min(1, iteration / warmup)`
    pub fn learning_rate_pose_at(
        &self,
        iteration: u64,
        iteration_max: u64,
    ) -> f64 {
        let learning_rate = decay_exponential(
            self.learning_rate_pose,
            self.learning_rate_pose_end,
            iteration,
            iteration_max,
        );
        match self.warmup_pose {
            Some(warmup) if warmup > 0 => {
                learning_rate * (iteration as f64 / warmup as f64).min(1.0)
            },
            _ => learning_rate,
        }
    }
}

/// `start * (end / start)^(iteration / iteration_max)`
fn decay_exponential(
    start: f64,
    end: Option<f64>,
    iteration: u64,
    iteration_max: u64,
) -> f64 {
    match end {
        Some(end) if iteration_max > 0 && start > 0.0 => {
            let ratio = (iteration as f64 / iteration_max as f64).min(1.0);
            start * (end / start).powf(ratio)
        },
        _ => start,
    }
}

impl Default for BarfConfig {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn learning_rate_decays_exponentially() {
        let config = OptimizerConfig::new()
            .with_learning_rate(1e-3)
            .with_learning_rate_end(Some(1e-5));

        assert!((config.learning_rate_at(0, 100) - 1e-3).abs() < 1e-15);
        assert!((config.learning_rate_at(50, 100) - 1e-4).abs() < 1e-12);
        assert!((config.learning_rate_at(100, 100) - 1e-5).abs() < 1e-15);

        let config = config.with_learning_rate_end(None);
        assert_eq!(config.learning_rate_at(70, 100), 1e-3);
    }

    #[test]
    fn learning_rate_pose_warms_up() {
        let config = OptimizerConfig::new()
            .with_learning_rate_pose(1e-3)
            .with_warmup_pose(Some(10));

        assert_eq!(config.learning_rate_pose_at(0, 100), 0.0);
        assert!((config.learning_rate_pose_at(5, 100) - 5e-4).abs() < 1e-15);
        assert_eq!(config.learning_rate_pose_at(10, 100), 1e-3);
        assert_eq!(config.learning_rate_pose_at(90, 100), 1e-3);
    }

    #[test]
    fn save_and_load() {
        let path = std::env::temp_dir()
            .join(format!("barf-config-{}.json", std::process::id()));
        let config = BarfConfig::new()
            .with_iteration_max(2000)
            .with_camera(CameraConfig::new().with_noise(0.15))
            .with_sampler(DepthSamplerConfig::new().with_default_prior());

        config.save(&path).unwrap();
        let loaded = BarfConfig::from_file(&path).unwrap();
        assert_eq!(loaded, config);

        std::fs::remove_file(path).unwrap();

        let result = BarfConfig::from_file("/nonexistent/barf.json");
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn init_fields_with_fine_sampling() {
        use burn::backend::NdArray;

        let device = Default::default();
        let config = BarfConfig::new().with_field(
            NerfFieldConfig::new()
                .with_feature_widths(vec![4])
                .with_skip_layers(vec![])
                .with_rgb_widths(vec![]),
        );

        let (_, field_fine) = config.init_fields::<NdArray<f32>>(&device);
        assert!(field_fine.is_some());

        let (_, field_fine) = config
            .with_is_fine_sampling(false)
            .init_fields::<NdArray<f32>>(&device);
        assert!(field_fine.is_none());
    }
}
