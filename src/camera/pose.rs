//! Rigid poses from world space to camera space.

pub use super::*;

use crate::{
    error::Error,
    function::tensor_extensions::{from_f64s, TensorFloatExtension},
};
use nalgebra::{Matrix3, Vector3};
use std::fmt;

/// A rigid transformation `[R | t]` stored on the host.
///
/// It is in **row-major order**, i.e., `M[row][col]`.
pub type PoseMatrix = [[f64; 4]; 3];

/// A batch of rigid transformations from world space to camera space.
///
/// ## Details
///
/// The camera space is `[right, down, forward]`, so cameras look along `+z`.
/// A world point `x` maps to `R * x + t`, and the camera center is `-R^T * t`.
///
/// Poses are values, every operation returns a new pose.
#[derive(Clone)]
pub struct Pose<B: Backend> {
    /// `[N, 3, 4]`
    matrix: Tensor<B, 3>,
}

impl<B: Backend> Pose<B> {
    /// ## Panics
    ///
    /// If `matrix` is not of shape `[N, 3, 4]`.
    pub fn new(matrix: Tensor<B, 3>) -> Self {
        let dims = matrix.dims();
        assert!(
            dims[1] == 3 && dims[2] == 4,
            "The pose matrix should have the shape [N, 3, 4], but got {dims:?}",
        );
        Self { matrix }
    }

    /// ## Shapes
    ///
    /// * `rotation` - `[N, 3, 3]`
    /// * `translation` - `[N, 3]`
    pub fn from_parts(
        rotation: Tensor<B, 3>,
        translation: Tensor<B, 2>,
    ) -> Self {
        Self::new(Tensor::cat(
            vec![rotation, translation.unsqueeze_dim::<3>(2)],
            2,
        ))
    }

    pub fn from_matrices(
        matrices: &[PoseMatrix],
        device: &B::Device,
    ) -> Self {
        let values = matrices
            .iter()
            .flat_map(|matrix| matrix.iter().flatten().copied())
            .collect();
        Self::new(from_f64s(values, [matrices.len(), 3, 4], device))
    }

    pub fn identity(
        count: usize,
        device: &B::Device,
    ) -> Self {
        Self::from_matrices(&vec![PoseMatrix::IDENTITY; count], device)
    }

    pub fn to_matrices(&self) -> Result<Vec<PoseMatrix>, Error> {
        Ok(self
            .matrix
            .to_owned()
            .into_f64s()?
            .chunks_exact(12)
            .map(|values| {
                let mut matrix = PoseMatrix::IDENTITY;
                matrix.iter_mut().flatten().zip(values).for_each(
                    |(target, value)| {
                        *target = *value;
                    },
                );
                matrix
            })
            .collect())
    }
}

impl<B: Backend> Pose<B> {
    /// `N`
    #[inline]
    pub fn count(&self) -> usize {
        self.matrix.dims()[0]
    }

    #[inline]
    pub fn device(&self) -> B::Device {
        self.matrix.device()
    }

    /// `[N, 3, 4]`
    #[inline]
    pub fn matrix(&self) -> Tensor<B, 3> {
        self.matrix.to_owned()
    }

    /// `[N, 3, 3]`
    #[inline]
    pub fn rotation(&self) -> Tensor<B, 3> {
        let count = self.count();
        self.matrix.to_owned().slice([0..count, 0..3, 0..3])
    }

    /// `[N, 3]`
    #[inline]
    pub fn translation(&self) -> Tensor<B, 2> {
        let count = self.count();
        self.matrix
            .to_owned()
            .slice([0..count, 0..3, 3..4])
            .reshape([count, 3])
    }

    /// Camera centers in world space.
    ///
    /// `[N, 3]`
    #[inline]
    pub fn center(&self) -> Tensor<B, 2> {
        self.invert().translation()
    }

    /// Selects the poses at `indices`.
    pub fn select(
        &self,
        indices: Tensor<B, 1, Int>,
    ) -> Self {
        Self::new(self.matrix.to_owned().select(0, indices))
    }
}

/// Group operations
impl<B: Backend> Pose<B> {
    /// Composes the poses so that the first one is applied first.
    ///
    /// `compose([P_1, P_2, ..., P_n]) = P_n ∘ ... ∘ P_2 ∘ P_1`
    ///
    /// ## Details
    ///
    /// An empty list yields a single identity, which broadcasts over any batch.
    pub fn compose(
        poses: &[Self],
        device: &B::Device,
    ) -> Self {
        match poses.split_first() {
            None => Self::identity(1, device),
            Some((first, rest)) => rest
                .iter()
                .fold(first.to_owned(), |pose, next| pose.then(next)),
        }
    }

    /// Applies `self` first, then `next`.
    ///
    /// `R = R_next * R_self`, `t = R_next * t_self + t_next`
    ///
    /// ## Panics
    ///
    /// If the batch sizes differ and neither of them is one.
    pub fn then(
        &self,
        next: &Self,
    ) -> Self {
        let count = self.count().max(next.count());
        let first = self.broadcast(count);
        let next = next.broadcast(count);

        let rotation_next = next.rotation();
        let rotation = rotation_next.to_owned().matmul(first.rotation());
        let translation = rotation_next
            .matmul(first.translation().unsqueeze_dim(2))
            .reshape([count, 3])
            + next.translation();

        Self::from_parts(rotation, translation)
    }

    /// `(R^T, -R^T * t)`
    pub fn invert(&self) -> Self {
        let count = self.count();
        let rotation = self.rotation().swap_dims(1, 2);
        let translation = rotation
            .to_owned()
            .matmul(self.translation().unsqueeze_dim(2))
            .reshape([count, 3])
            .neg();

        Self::from_parts(rotation, translation)
    }

    /// Transforms the points by each pose.
    ///
    /// ## Shapes
    ///
    /// * `points` - `[N, M, 3]`
    /// * `output` - `[N, M, 3]`
    pub fn apply(
        &self,
        points: Tensor<B, 3>,
    ) -> Tensor<B, 3> {
        let count = points.dims()[0];
        let pose = self.broadcast(count);
        points.matmul(pose.rotation().swap_dims(1, 2))
            + pose.translation().unsqueeze_dim(1)
    }

    fn broadcast(
        &self,
        count: usize,
    ) -> Self {
        let count_self = self.count();
        if count_self == count {
            return self.to_owned();
        }
        assert_eq!(
            count_self, 1,
            "The pose batch should have 1 or {count} poses, but got {count_self}",
        );
        Self::new(Tensor::cat(vec![self.matrix.to_owned(); count], 0))
    }
}

impl<B: Backend> fmt::Debug for Pose<B> {
    fn fmt(
        &self,
        f: &mut fmt::Formatter,
    ) -> fmt::Result {
        f.debug_struct("Pose")
            .field("device", &self.device())
            .field("matrix.dims()", &self.matrix.dims())
            .finish()
    }
}

/// Host-side operations on [`PoseMatrix`].
pub trait PoseMatrixExtension: Sized {
    const IDENTITY: Self;

    fn from_parts(
        rotation: &Matrix3<f64>,
        translation: &Vector3<f64>,
    ) -> Self;

    fn rotation(&self) -> Matrix3<f64>;

    fn translation(&self) -> Vector3<f64>;

    /// Camera center in world space.
    fn center(&self) -> Vector3<f64> {
        -(self.rotation().transpose() * self.translation())
    }

    /// Applies `self` first, then `next`.
    fn then(
        &self,
        next: &Self,
    ) -> Self {
        let rotation_next = next.rotation();
        Self::from_parts(
            &(rotation_next * self.rotation()),
            &(rotation_next * self.translation() + next.translation()),
        )
    }

    fn inverse(&self) -> Self {
        let rotation = self.rotation().transpose();
        Self::from_parts(&rotation, &-(rotation * self.translation()))
    }
}

impl PoseMatrixExtension for PoseMatrix {
    const IDENTITY: Self = [
        [1.0, 0.0, 0.0, 0.0],
        [0.0, 1.0, 0.0, 0.0],
        [0.0, 0.0, 1.0, 0.0],
    ];

    fn from_parts(
        r: &Matrix3<f64>,
        t: &Vector3<f64>,
    ) -> Self {
        [
            [r[(0, 0)], r[(0, 1)], r[(0, 2)], t[0]],
            [r[(1, 0)], r[(1, 1)], r[(1, 2)], t[1]],
            [r[(2, 0)], r[(2, 1)], r[(2, 2)], t[2]],
        ]
    }

    fn rotation(&self) -> Matrix3<f64> {
        Matrix3::from_fn(|row, col| self[row][col])
    }

    fn translation(&self) -> Vector3<f64> {
        Vector3::new(self[0][3], self[1][3], self[2][3])
    }
}
