use burn::tensor::{backend, Int, Tensor, TensorData};

/// Creates a 1D index tensor from host indices.
pub fn from_indices<B: backend::Backend>(
    indices: &[usize],
    device: &B::Device,
) -> Tensor<B, 1, Int> {
    let indices = indices.iter().map(|&index| index as i64).collect::<Vec<_>>();
    let count = indices.len();
    Tensor::from_data(
        TensorData::new(indices, [count]).convert::<B::IntElem>(),
        device,
    )
}

/// `[start, end)` as a 1D index tensor.
pub fn range_indices<B: backend::Backend>(
    start: usize,
    end: usize,
    device: &B::Device,
) -> Tensor<B, 1, Int> {
    Tensor::arange(start as i64..end as i64, device)
}

#[cfg(test)]
mod tests {
    #[test]
    fn from_indices() {
        use super::*;
        use burn::backend::NdArray;

        let device = Default::default();
        let output = from_indices::<NdArray<f32>>(&[3, 0, 7], &device);
        output
            .into_data()
            .assert_eq(&TensorData::from([3, 0, 7]).convert::<i64>(), false);

        let output = range_indices::<NdArray<f32>>(2, 5, &device);
        assert_eq!(output.dims(), [3]);
    }
}
