//! Coordinate network of a neural radiance field.

pub use super::*;
pub use burn::nn::{Linear, Relu};

use crate::encoding::PositionalEncodingConfig;
use burn::{
    module::Ignored,
    nn::{Initializer, LinearConfig},
    tensor::{activation, Distribution},
};
use humansize::{format_size, BINARY};
use std::fmt;

/// The configuration for [`NerfField`].
#[derive(Config, Debug, PartialEq)]
pub struct NerfFieldConfig {
    /// The output width of every feature layer.
    #[config(default = "vec![256; 8]")]
    pub feature_widths: Vec<usize>,
    /// The feature layers taking the encoded points again as input.
    #[config(default = "vec![4]")]
    pub skip_layers: Vec<usize>,
    /// The output width of every hidden color layer.
    #[config(default = "vec![128]")]
    pub rgb_widths: Vec<usize>,
    /// Positional encoding of points.
    #[config(default = "PositionalEncodingConfig::new()")]
    pub encoding_position: PositionalEncodingConfig,
    /// Positional encoding of view directions.
    #[config(default = "PositionalEncodingConfig::new().with_levels(4)")]
    pub encoding_direction: PositionalEncodingConfig,
    /// Whether to encode the inputs.
    #[config(default = true)]
    pub is_encoded: bool,
    /// Whether the color depends on the view direction.
    #[config(default = true)]
    pub is_view_dependent: bool,
    #[config(default = "DensityActivation::Softplus")]
    pub density_activation: DensityActivation,
    /// The standard deviation of the noise added to raw densities in training.
    pub density_noise: Option<f64>,
}

/// The coordinate network of a neural radiance field.
///
/// ## Details
///
/// The feature layers map the encoded points to a feature and a raw density.
/// The color layers map the feature and the encoded view direction to a color.
/// Some feature layers take the encoded points again as a skip connection.
#[derive(Module)]
pub struct NerfField<B: Backend> {
    pub layers_feature: Vec<Linear<B>>,
    pub layers_rgb: Vec<Linear<B>>,
    pub activation: Relu,
    pub config: Ignored<NerfFieldConfig>,
}

impl NerfFieldConfig {
    /// Opens the frequency bands of both encodings within `range`.
    pub fn with_coarse_to_fine(
        mut self,
        range: Option<crate::encoding::ProgressRange>,
    ) -> Self {
        self.encoding_position.coarse_to_fine = range;
        self.encoding_direction.coarse_to_fine = range;
        self
    }

    /// The channel count of encoded points, including the raw points.
    pub fn dim_position(&self) -> usize {
        3 + if self.is_encoded {
            self.encoding_position.dim_output(3)
        } else {
            0
        }
    }

    /// The channel count of encoded directions, including the raw directions.
    pub fn dim_direction(&self) -> usize {
        match (self.is_view_dependent, self.is_encoded) {
            (false, _) => 0,
            (true, false) => 3,
            (true, true) => 3 + self.encoding_direction.dim_output(3),
        }
    }

    /// Initialize from the configuration.
    ///
    /// ## Panics
    ///
    /// If there is no feature layer.
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> NerfField<B> {
        assert!(
            !self.feature_widths.is_empty(),
            "feature_widths should not be empty",
        );

        let gain_relu = 2.0_f64.sqrt();
        let dim_position = self.dim_position();
        let index_last = self.feature_widths.len() - 1;

        let layers_feature = self
            .feature_widths
            .iter()
            .enumerate()
            .map(|(index, &width)| {
                let mut dim_input = match index {
                    0 => dim_position,
                    _ => self.feature_widths[index - 1],
                };
                if self.skip_layers.contains(&index) {
                    dim_input += dim_position;
                }
                let (dim_output, gain) = match index == index_last {
                    true => (width + 1, 1.0),
                    false => (width, gain_relu),
                };
                LinearConfig::new(dim_input, dim_output)
                    .with_initializer(Initializer::XavierUniform { gain })
                    .init(device)
            })
            .collect::<Vec<_>>();

        let dims_rgb = [
            vec![self.feature_widths[index_last] + self.dim_direction()],
            self.rgb_widths.to_owned(),
            vec![3],
        ]
        .concat();
        let layers_rgb = dims_rgb
            .windows(2)
            .enumerate()
            .map(|(index, dims)| {
                let gain = match index + 2 == dims_rgb.len() {
                    true => 1.0,
                    false => gain_relu,
                };
                LinearConfig::new(dims[0], dims[1])
                    .with_initializer(Initializer::XavierUniform { gain })
                    .init(device)
            })
            .collect();

        NerfField {
            layers_feature,
            layers_rgb,
            activation: Relu::new(),
            config: Ignored(self.to_owned()),
        }
    }
}

impl<B: Backend> NerfField<B> {
    /// Applies the network on encoded inputs.
    ///
    /// ## Shapes
    ///
    /// * `points` - [`[B, R, S, dim_position]`](NerfFieldConfig::dim_position)
    /// * `directions` - [`[B, R, S, dim_direction]`](NerfFieldConfig::dim_direction)
    pub fn forward_encoded(
        &self,
        points: Tensor<B, 4>,
        directions: Option<Tensor<B, 4>>,
        mode: RenderMode,
    ) -> FieldOutput<B> {
        let config = &self.config.0;
        let index_last = self.layers_feature.len() - 1;

        let mut feature = points.to_owned();
        for (index, layer) in self.layers_feature.iter().enumerate() {
            if config.skip_layers.contains(&index) {
                feature = Tensor::cat(vec![feature, points.to_owned()], 3);
            }
            feature = layer.forward(feature);
            if index < index_last {
                feature = self.activation.forward(feature);
            }
        }

        // [B, R, S, 1 + W]
        let width = feature.dims()[3] - 1;
        let mut densities = feature.to_owned().narrow(3, 0, 1);
        let mut feature = self.activation.forward(feature.narrow(3, 1, width));

        if let (RenderMode::Train, Some(std)) = (mode, config.density_noise) {
            densities = densities.to_owned()
                + Tensor::random(
                    densities.shape(),
                    Distribution::Normal(0.0, std),
                    &densities.device(),
                );
        }
        let densities = config.density_activation.forward(densities).squeeze(3);

        if let Some(directions) = directions {
            feature = Tensor::cat(vec![feature, directions], 3);
        }
        let index_last = self.layers_rgb.len() - 1;
        for (index, layer) in self.layers_rgb.iter().enumerate() {
            feature = layer.forward(feature);
            if index < index_last {
                feature = self.activation.forward(feature);
            }
        }
        let colors_rgb = activation::sigmoid(feature);

        FieldOutput {
            densities,
            colors_rgb,
        }
    }

    /// The readable size of the parameters.
    pub fn size_readable(&self) -> String {
        format_size(
            self.num_params() * size_of::<B::FloatElem>(),
            BINARY.decimal_places(1),
        )
    }
}

impl<B: Backend> RadianceField<B> for NerfField<B> {
    fn evaluate(
        &self,
        points: Tensor<B, 4>,
        directions: Tensor<B, 4>,
        context: &RenderContext,
    ) -> FieldOutput<B> {
        let config = &self.config.0;
        let progress = context.progress;

        let points = match config.is_encoded {
            true => {
                let encoding = config
                    .encoding_position
                    .encode(points.to_owned(), progress);
                Tensor::cat(vec![points, encoding], 3)
            },
            false => points,
        };
        let directions = match (config.is_view_dependent, config.is_encoded) {
            (false, _) => None,
            (true, false) => Some(directions),
            (true, true) => {
                let encoding = config
                    .encoding_direction
                    .encode(directions.to_owned(), progress);
                Some(Tensor::cat(vec![directions, encoding], 3))
            },
        };

        self.forward_encoded(points, directions, context.mode)
    }
}

impl<B: Backend> fmt::Debug for NerfField<B> {
    fn fmt(
        &self,
        f: &mut fmt::Formatter,
    ) -> fmt::Result {
        f.debug_struct("NerfField")
            .field("devices", &self.devices())
            .field("layers_feature.len()", &self.layers_feature.len())
            .field("layers_rgb.len()", &self.layers_rgb.len())
            .field("size_readable()", &self.size_readable())
            .field("config", &self.config.0)
            .finish()
    }
}

impl Default for NerfFieldConfig {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::ProgressRange;
    use burn::backend::NdArray;

    fn config() -> NerfFieldConfig {
        NerfFieldConfig::new()
            .with_feature_widths(vec![16, 16, 16])
            .with_skip_layers(vec![1])
            .with_rgb_widths(vec![8])
            .with_encoding_position(PositionalEncodingConfig::new().with_levels(3))
            .with_encoding_direction(PositionalEncodingConfig::new().with_levels(2))
    }

    fn inputs(
        device: &<NdArray<f32> as Backend>::Device
    ) -> (Tensor<NdArray<f32>, 4>, Tensor<NdArray<f32>, 4>) {
        let points = Tensor::random(
            [2, 5, 4, 3],
            Distribution::Uniform(-1.0, 1.0),
            device,
        );
        let directions = Tensor::from_floats([[[[0.0, 0.0, 1.0]]]], device)
            + Tensor::<NdArray<f32>, 4>::zeros([2, 5, 4, 3], device);
        (points, directions)
    }

    #[test]
    fn dims() {
        let config = config();
        assert_eq!(config.dim_position(), 3 + 18);
        assert_eq!(config.dim_direction(), 3 + 12);
        assert_eq!(config.to_owned().with_is_view_dependent(false).dim_direction(), 0);
        assert_eq!(config.with_is_encoded(false).dim_position(), 3);
    }

    #[test]
    fn evaluate_shapes_and_ranges() {
        let device = Default::default();
        let field = config().init::<NdArray<f32>>(&device);
        let (points, directions) = inputs(&device);

        let output = field.evaluate(points, directions, &RenderContext::default());
        assert_eq!(output.densities.dims(), [2, 5, 4]);
        assert_eq!(output.colors_rgb.dims(), [2, 5, 4, 3]);
        assert!(output.densities.min().into_scalar() >= 0.0);
        assert!(output.colors_rgb.to_owned().min().into_scalar() >= 0.0);
        assert!(output.colors_rgb.max().into_scalar() <= 1.0);
    }

    #[test]
    fn evaluate_without_encoding_or_view() {
        let device = Default::default();
        let field = config()
            .with_is_encoded(false)
            .with_is_view_dependent(false)
            .with_density_activation(DensityActivation::Relu)
            .init::<NdArray<f32>>(&device);
        let (points, directions) = inputs(&device);

        let output = field.evaluate(points, directions, &RenderContext::default());
        assert_eq!(output.densities.dims(), [2, 5, 4]);
        assert!(output.densities.min().into_scalar() >= 0.0);
    }

    #[test]
    fn density_noise_only_in_training() {
        let device = Default::default();
        let field = config()
            .with_density_noise(Some(1.0))
            .with_density_activation(DensityActivation::Exp)
            .init::<NdArray<f32>>(&device);
        let (points, directions) = inputs(&device);
        let context = RenderContext::new(RenderMode::Evaluate, TrainingProgress::complete());

        let a = field.evaluate(points.to_owned(), directions.to_owned(), &context);
        let b = field.evaluate(points.to_owned(), directions.to_owned(), &context);
        a.densities
            .into_data()
            .assert_approx_eq(&b.densities.into_data(), 6);

        let context = RenderContext::new(RenderMode::Train, TrainingProgress::complete());
        let a = field.evaluate(points.to_owned(), directions.to_owned(), &context);
        let b = field.evaluate(points, directions, &context);
        let difference = (a.densities - b.densities).abs().sum().into_scalar();
        assert!(difference > 0.0);
    }

    #[test]
    fn coarse_to_fine_changes_output() {
        let device = Default::default();
        let field = config()
            .with_coarse_to_fine(Some(ProgressRange::new(0.1, 0.5)))
            .init::<NdArray<f32>>(&device);
        let (points, directions) = inputs(&device);

        let start = RenderContext::new(RenderMode::Evaluate, TrainingProgress::new(0.0));
        let end = RenderContext::new(RenderMode::Evaluate, TrainingProgress::new(1.0));
        let a = field.evaluate(points.to_owned(), directions.to_owned(), &start);
        let b = field.evaluate(points, directions, &end);
        let difference = (a.colors_rgb - b.colors_rgb).abs().sum().into_scalar();
        assert!(difference > 0.0);
    }

    #[test]
    fn debug_shows_size() {
        let device = Default::default();
        let field = config().init::<NdArray<f32>>(&device);
        let text = format!("{field:?}");
        assert!(text.contains("size_readable()"), "{text}");
        assert!(field.num_params() > 0);
    }
}
