use crate::error::Error;
use burn::tensor::{backend, Float, Tensor, TensorData};

pub trait TensorFloatExtension {
    /// Euclidean norm over the last dimension, which is kept.
    fn norm_last(self) -> Self;

    /// Divides by the Euclidean norm over the last dimension.
    fn normalize_last(self) -> Self;

    /// Exclusive cumulative sum over the last dimension.
    ///
    /// `output[..., i] = sum(input[..., 0..i])`
    fn sum_cumulative_exclusive(self) -> Self;

    /// Copies the values to the host.
    fn into_f64s(self) -> Result<Vec<f64>, Error>;
}

impl<B: backend::Backend, const D: usize> TensorFloatExtension
    for Tensor<B, D, Float>
{
    fn norm_last(self) -> Self {
        (self.to_owned() * self).sum_dim(D - 1).sqrt()
    }

    fn normalize_last(self) -> Self {
        let norm = self.to_owned().norm_last().clamp_min(1e-12);
        self / norm
    }

    fn sum_cumulative_exclusive(self) -> Self {
        let count = self.dims()[D - 1];

        // Inclusive scan of the input shifted by one, in log2(N) steps
        let mut sum = shift_last(self, 1);
        let mut offset = 1;
        while offset < count {
            sum = sum.to_owned() + shift_last(sum, offset);
            offset *= 2;
        }
        sum
    }

    fn into_f64s(self) -> Result<Vec<f64>, Error> {
        self.into_data()
            .convert::<f64>()
            .to_vec::<f64>()
            .map_err(|error| Error::TensorData(format!("{error:?}")))
    }
}

/// Shifts the last dimension towards the end by `offset`, filling with zeros.
fn shift_last<B: backend::Backend, const D: usize>(
    input: Tensor<B, D>,
    offset: usize,
) -> Tensor<B, D> {
    let mut dims = input.dims();
    let count = dims[D - 1];
    if offset >= count {
        return input.zeros_like();
    }

    dims[D - 1] = offset;
    let zeros = Tensor::zeros(dims, &input.device());
    Tensor::cat(vec![zeros, input.narrow(D - 1, 0, count - offset)], D - 1)
}

/// Creates a float tensor from host values.
pub fn from_f64s<B: backend::Backend, const D: usize>(
    values: Vec<f64>,
    shape: [usize; D],
    device: &B::Device,
) -> Tensor<B, D> {
    Tensor::from_data(
        TensorData::new(values, shape).convert::<B::FloatElem>(),
        device,
    )
}
