//! Image quality metrics and the sink of training metrics.

pub use crate::dataset::Image;
pub use burn::tensor::{backend::Backend, Tensor, TensorData};

use crate::{error::Error, function::tensor_extensions::from_f64s};
use burn::{
    nn::loss::{MseLoss, Reduction},
    tensor::{
        module::conv2d,
        ops::ConvOptions,
        ElementConversion,
    },
};
use std::io::Write;

/// The side length of the SSIM window.
pub const SSIM_WINDOW_SIZE: usize = 11;

/// The standard deviation of the SSIM window.
pub const SSIM_WINDOW_SIGMA: f64 = 1.5;

/// `(0.01 * L)^2` with `L = 1`
pub const SSIM_C1: f64 = 0.01 * 0.01;

/// `(0.03 * L)^2` with `L = 1`
pub const SSIM_C2: f64 = 0.03 * 0.03;

/// The quality of one rendered image.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ImageQuality {
    pub psnr: f64,
    pub ssim: f64,
    /// Scored by an external perceptual model, if any.
    pub lpips: Option<f64>,
}

/// A receiver of scalar and image metrics.
pub trait MetricSink {
    fn scalar(
        &mut self,
        split: &str,
        name: &str,
        step: u64,
        value: f64,
    );

    fn image(
        &mut self,
        split: &str,
        name: &str,
        step: u64,
        image: &Image,
    );
}

/// A [`MetricSink`] writing to the `log` facade.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogSink;

/// The peak signal-to-noise ratio of colors in `[0, 1]`.
///
/// `-10 * log10(mse)`
pub fn psnr<B: Backend, const D: usize>(
    output: Tensor<B, D>,
    target: Tensor<B, D>,
) -> f64 {
    let mse = MseLoss::new()
        .forward(output, target, Reduction::Mean)
        .into_scalar()
        .elem::<f64>();
    -10.0 * mse.log10()
}

/// The mean structural similarity of colors in `[0, 1]`.
///
/// ## Details
///
/// The local statistics are weighted by a normalized Gaussian window
/// of size `11` and standard deviation `1.5` without padding.
/// The window shrinks to fit smaller images.
///
/// ## Shapes
///
/// * `output` - `[N, C, H, W]`
/// * `target` - `[N, C, H, W]`
pub fn ssim<B: Backend>(
    output: Tensor<B, 4>,
    target: Tensor<B, 4>,
) -> f64 {
    let [_, channel_count, height, width] = output.dims();
    let size = SSIM_WINDOW_SIZE.min(height).min(width).max(1);
    let device = output.device();

    // [C, 1, K, K]
    let window = gaussian_window(size, SSIM_WINDOW_SIGMA);
    let window = from_f64s::<B, 4>(
        window.repeat(channel_count),
        [channel_count, 1, size, size],
        &device,
    );
    let filter = |input: Tensor<B, 4>| {
        conv2d(
            input,
            window.to_owned(),
            None,
            ConvOptions::new([1, 1], [0, 0], [1, 1], channel_count),
        )
    };

    let mean_x = filter(output.to_owned());
    let mean_y = filter(target.to_owned());
    let mean_xx = mean_x.to_owned() * mean_x.to_owned();
    let mean_yy = mean_y.to_owned() * mean_y.to_owned();
    let mean_xy = mean_x * mean_y;
    let variance_x = filter(output.to_owned() * output.to_owned()) - mean_xx.to_owned();
    let variance_y = filter(target.to_owned() * target.to_owned()) - mean_yy.to_owned();
    let covariance = filter(output * target) - mean_xy.to_owned();

    let numerator = (mean_xy.mul_scalar(2.0).add_scalar(SSIM_C1))
        * (covariance.mul_scalar(2.0).add_scalar(SSIM_C2));
    let denominator = ((mean_xx + mean_yy).add_scalar(SSIM_C1))
        * ((variance_x + variance_y).add_scalar(SSIM_C2));

    (numerator / denominator).mean().into_scalar().elem::<f64>()
}

/// The normalized 2D Gaussian window flattened in row-major order.
fn gaussian_window(
    size: usize,
    sigma: f64,
) -> Vec<f64> {
    let center = (size as f64 - 1.0) / 2.0;
    let weights = (0..size)
        .map(|index| {
            let offset = index as f64 - center;
            (-offset * offset / (2.0 * sigma * sigma)).exp()
        })
        .collect::<Vec<_>>();
    let total = weights.iter().sum::<f64>();
    let weights = weights.iter().map(|weight| weight / total).collect::<Vec<_>>();

    weights
        .iter()
        .flat_map(|row| weights.iter().map(move |col| row * col))
        .collect()
}

impl ImageQuality {
    /// Compares a rendered image to its target.
    ///
    /// ## Errors
    ///
    /// If the image sizes differ.
    pub fn evaluate<B: Backend>(
        output: &Image,
        target: &Image,
        lpips: Option<f64>,
        device: &B::Device,
    ) -> Result<Self, Error> {
        if output.height != target.height || output.width != target.width {
            return Err(Error::Validation(
                "The size of the rendered image".into(),
                format!("{}x{}", target.width, target.height),
            ));
        }

        let to_nchw = |image: &Image| {
            image
                .to_tensor::<B>(device)
                .reshape([1, image.height as usize, image.width as usize, 3])
                .permute([0, 3, 1, 2])
        };
        let output = to_nchw(output);
        let target = to_nchw(target);

        Ok(Self {
            psnr: psnr(output.to_owned(), target.to_owned()),
            ssim: ssim(output, target),
            lpips,
        })
    }

    /// Writes `"<index> <psnr> <ssim> <lpips>"` lines.
    ///
    /// A missing LPIPS is written as `NaN`.
    pub fn encode<W: Write>(
        qualities: &[Self],
        writer: &mut W,
    ) -> Result<(), Error> {
        for (index, quality) in qualities.iter().enumerate() {
            writeln!(
                writer,
                "{index} {} {} {}",
                quality.psnr,
                quality.ssim,
                quality.lpips.unwrap_or(f64::NAN),
            )?;
        }
        Ok(())
    }

    /// The means of all qualities.
    pub fn mean(qualities: &[Self]) -> Self {
        let count = qualities.len() as f64;
        let lpips = qualities
            .iter()
            .map(|quality| quality.lpips)
            .sum::<Option<f64>>();
        Self {
            psnr: qualities.iter().map(|quality| quality.psnr).sum::<f64>() / count,
            ssim: qualities.iter().map(|quality| quality.ssim).sum::<f64>() / count,
            lpips: lpips.map(|lpips| lpips / count),
        }
    }
}

impl MetricSink for LogSink {
    fn scalar(
        &mut self,
        split: &str,
        name: &str,
        step: u64,
        value: f64,
    ) {
        log::info!(target: "barf::metric", "{split}/{name} @ {step}: {value}");
    }

    fn image(
        &mut self,
        split: &str,
        name: &str,
        step: u64,
        image: &Image,
    ) {
        log::info!(
            target: "barf::metric",
            "{split}/{name} @ {step}: image {}x{}",
            image.width,
            image.height,
        );
    }
}
