//! Exponential maps of the Lie algebras `so(3)` and `se(3)`.

pub use super::*;

/// The number of terms in the Taylor expansions.
pub const TAYLOR_TERM_COUNT: usize = 10;

/// Maps the 6D tangent vectors `(w, u)` to rigid poses.
///
/// ## Details
///
/// `R = I + A * [w] + B * [w]^2`, `V = I + B * [w] + C * [w]^2` and `t = V * u`,
/// where `A = sin(θ) / θ`, `B = (1 - cos(θ)) / θ^2` and `C = (θ - sin(θ)) / θ^3`.
///
/// The coefficients are expanded as polynomials in `θ^2`,
/// so the map is exact and differentiable at `θ = 0`.
///
/// ## Shapes
///
/// * `tangents` - `[N, 6]`
pub fn se3_to_pose<B: Backend>(tangents: Tensor<B, 2>) -> Pose<B> {
    let count = tangents.dims()[0];
    let rotation_tangents = tangents.to_owned().narrow(1, 0, 3);
    let translation_tangents = tangents.narrow(1, 3, 3);

    let rotation = so3_to_rotation(rotation_tangents.to_owned());

    let skew = skew_symmetric(rotation_tangents.to_owned());
    let skew_squared = skew.to_owned().matmul(skew.to_owned());
    let theta_squared = theta_squared(rotation_tangents);
    let identity = identity_3x3(&skew.device());

    let b = taylor_expand(theta_squared.to_owned(), 2);
    let c = taylor_expand(theta_squared, 3);
    let v = identity + skew * b + skew_squared * c;
    let translation = v
        .matmul(translation_tangents.unsqueeze_dim(2))
        .reshape([count, 3]);

    Pose::from_parts(rotation, translation)
}

/// Maps the 3D tangent vectors `w` to rotation matrices.
///
/// ## Shapes
///
/// * `tangents` - `[N, 3]`
/// * `output` - `[N, 3, 3]`
pub fn so3_to_rotation<B: Backend>(tangents: Tensor<B, 2>) -> Tensor<B, 3> {
    let skew = skew_symmetric(tangents.to_owned());
    let skew_squared = skew.to_owned().matmul(skew.to_owned());
    let theta_squared = theta_squared(tangents);
    let identity = identity_3x3(&skew.device());

    let a = taylor_expand(theta_squared.to_owned(), 1);
    let b = taylor_expand(theta_squared, 2);

    identity + skew * a + skew_squared * b
}

/// The cross-product matrices `[w]`.
///
/// ## Shapes
///
/// * `vectors` - `[N, 3]`
/// * `output` - `[N, 3, 3]`
pub fn skew_symmetric<B: Backend>(vectors: Tensor<B, 2>) -> Tensor<B, 3> {
    let count = vectors.dims()[0];
    let x = vectors.to_owned().narrow(1, 0, 1);
    let y = vectors.to_owned().narrow(1, 1, 1);
    let z = vectors.narrow(1, 2, 1);
    let o = x.zeros_like();

    Tensor::cat(
        vec![
            o.to_owned(),
            z.to_owned().neg(),
            y.to_owned(),
            z,
            o.to_owned(),
            x.to_owned().neg(),
            y.neg(),
            x,
            o,
        ],
        1,
    )
    .reshape([count, 3, 3])
}

/// `[N, 3]` -> `[N, 1, 1]`
fn theta_squared<B: Backend>(tangents: Tensor<B, 2>) -> Tensor<B, 3> {
    let count = tangents.dims()[0];
    (tangents.to_owned() * tangents)
        .sum_dim(1)
        .reshape([count, 1, 1])
}

/// `[1, 3, 3]`
fn identity_3x3<B: Backend>(device: &B::Device) -> Tensor<B, 3> {
    Tensor::<B, 2>::from_floats(
        [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
        device,
    )
    .unsqueeze::<3>()
}

/// `sum_i((-1)^i * x^i / (2i + offset)!)` evaluated by Horner's rule.
fn taylor_expand<B: Backend, const D: usize>(
    x: Tensor<B, D>,
    offset: usize,
) -> Tensor<B, D> {
    (0..TAYLOR_TERM_COUNT)
        .rev()
        .fold(x.zeros_like(), |sum, index| {
            let sign = if index % 2 == 0 { 1.0 } else { -1.0 };
            let factorial =
                (1..=2 * index + offset).map(|k| k as f64).product::<f64>();
            (sum * x.to_owned()).add_scalar(sign / factorial)
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    #[test]
    fn se3_zero_is_identity() {
        let device = Default::default();
        let tangents = Tensor::<NdArray<f32>, 2>::zeros([3, 6], &device);

        let output = se3_to_pose(tangents).to_matrices().unwrap();
        assert_eq!(output, vec![PoseMatrix::IDENTITY; 3]);
    }

    #[test]
    fn so3_about_z() {
        let device = Default::default();
        let angle = 0.7_f32;
        let tangents =
            Tensor::<NdArray<f32>, 2>::from_floats([[0.0, 0.0, angle]], &device);

        let output = so3_to_rotation(tangents);
        let (sin, cos) = angle.sin_cos();
        let target = TensorData::from([[
            [cos, -sin, 0.0],
            [sin, cos, 0.0],
            [0.0, 0.0, 1.0],
        ]]);
        output.into_data().assert_approx_eq(&target, 5);
    }

    #[test]
    fn se3_translation_only() {
        let device = Default::default();
        let tangents = Tensor::<NdArray<f32>, 2>::from_floats(
            [[0.0, 0.0, 0.0, 0.3, -0.4, 1.2]],
            &device,
        );

        let output = se3_to_pose(tangents).translation();
        output
            .into_data()
            .assert_approx_eq(&TensorData::from([[0.3, -0.4, 1.2]]), 6);
    }

    #[test]
    fn se3_rotation_is_orthonormal() {
        use rand::{rngs::StdRng, Rng, SeedableRng};

        let device = Default::default();
        let mut rng = StdRng::seed_from_u64(0x5E3);
        let values = (0..8 * 6)
            .map(|_| rng.gen_range(-1.5..1.5))
            .collect::<Vec<f32>>();
        let tangents = Tensor::<NdArray<f32>, 2>::from_data(
            TensorData::new(values, [8, 6]),
            &device,
        );

        let rotation = se3_to_pose(tangents).rotation();
        let output = rotation.to_owned().swap_dims(1, 2).matmul(rotation);
        let target = Pose::<NdArray<f32>>::identity(8, &device)
            .rotation()
            .into_data();
        output.into_data().assert_approx_eq(&target, 4);
    }

    #[test]
    fn se3_matches_closed_form() {
        let device = Default::default();
        let tangents = Tensor::<NdArray<f32>, 2>::from_floats(
            [[0.0, 1.2, 0.0, 1.0, 0.0, 0.0]],
            &device,
        );

        // A rotation about y moves x towards -z.
        let theta = 1.2_f32;
        let (sin, cos) = theta.sin_cos();
        let target_rotation =
            TensorData::from([[[cos, 0.0, sin], [0.0, 1.0, 0.0], [-sin, 0.0, cos]]]);
        // V * (1, 0, 0)
        let target_translation = TensorData::from([[
            sin / theta,
            0.0,
            -(1.0 - cos) / theta,
        ]]);

        let pose = se3_to_pose(tangents);
        pose.rotation()
            .into_data()
            .assert_approx_eq(&target_rotation, 5);
        pose.translation()
            .into_data()
            .assert_approx_eq(&target_translation, 5);
    }

    #[test]
    fn se3_gradient_is_finite_at_zero() {
        use burn::backend::Autodiff;

        type B = Autodiff<NdArray<f32>>;

        let device = Default::default();
        let tangents = Tensor::<B, 2>::zeros([2, 6], &device).require_grad();
        let weights = Tensor::<B, 3>::from_floats(
            [
                [[0.1, 0.2, 0.3, 0.4], [0.5, 0.6, 0.7, 0.8], [0.9, 1.0, 1.1, 1.2]],
                [[1.2, 1.1, 1.0, 0.9], [0.8, 0.7, 0.6, 0.5], [0.4, 0.3, 0.2, 0.1]],
            ],
            &device,
        );

        let loss = (se3_to_pose(tangents.to_owned()).matrix() * weights).sum();
        let grads = loss.backward();
        let grad = tangents.grad(&grads).expect("The gradient should exist");

        assert!(!grad.to_owned().is_nan().any().into_scalar());
        assert!(grad.abs().sum().into_scalar() > 0.0);
    }
}
