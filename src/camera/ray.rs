//! Camera rays and points along them.

pub use super::*;

use crate::{error::Error, function::tensor_extensions::from_f64s};
use burn::tensor::ElementConversion;

/// The number of attempts to compute finite rays before giving up.
pub const RAY_ATTEMPT_COUNT: usize = 2;

/// Computes the camera center and the ray direction for every pixel.
///
/// ## Details
///
/// The pixel centers `(x + 0.5, y + 0.5, 1)` are mapped to camera space by `K^-1`
/// and rotated to world space by `R^T`. The directions are not normalized.
///
/// Non-finite directions are recomputed once before failing.
///
/// ## Arguments
///
/// * `intrinsics` - One per pose, or one shared by all poses.
///
/// ## Shapes
///
/// * `output.0` - Centers `[N, H * W, 3]`
/// * `output.1` - Rays `[N, H * W, 3]`
pub fn center_and_ray<B: Backend>(
    pose: &Pose<B>,
    intrinsics: &[Intrinsics],
) -> Result<(Tensor<B, 3>, Tensor<B, 3>), Error> {
    let intrinsics = broadcast_intrinsics(intrinsics, pose.count())?;

    for attempt in 1..=RAY_ATTEMPT_COUNT {
        let (center, ray) = compute_center_and_ray(pose, &intrinsics);
        let nan_count = ray
            .to_owned()
            .is_nan()
            .int()
            .sum()
            .into_scalar()
            .elem::<i64>();
        if nan_count == 0 {
            return Ok((center, ray));
        }

        log::warn!(
            target: "barf::camera::ray",
            "center_and_ray > attempt {attempt} has {nan_count} NaN components",
        );
    }

    Err(Error::NonFiniteRays(RAY_ATTEMPT_COUNT))
}

fn compute_center_and_ray<B: Backend>(
    pose: &Pose<B>,
    intrinsics: &[Intrinsics],
) -> (Tensor<B, 3>, Tensor<B, 3>) {
    let device = pose.device();
    let count = intrinsics.len();
    let height = intrinsics[0].image_height as usize;
    let width = intrinsics[0].image_width as usize;

    // [1, H * W, 3]
    let grid = (0..height)
        .flat_map(|y| {
            (0..width).flat_map(move |x| [x as f64 + 0.5, y as f64 + 0.5, 1.0])
        })
        .collect();
    let grid = from_f64s::<B, 3>(grid, [1, height * width, 3], &device);

    // [N, 1, 3], the diagonal and the last column of K^-1
    let (scales, offsets) = intrinsics.iter().fold(
        (Vec::with_capacity(count * 3), Vec::with_capacity(count * 3)),
        |(mut scales, mut offsets), intrinsics| {
            let inverse = intrinsics.matrix_inverse();
            scales.extend([inverse[0][0], inverse[1][1], 1.0]);
            offsets.extend([inverse[0][2], inverse[1][2], 0.0]);
            (scales, offsets)
        },
    );
    let scales = from_f64s::<B, 3>(scales, [count, 1, 3], &device);
    let offsets = from_f64s::<B, 3>(offsets, [count, 1, 3], &device);

    // [N, H * W, 3]
    let ray = (grid * scales + offsets).matmul(pose.rotation());
    let center = ray.zeros_like() + pose.center().unsqueeze_dim(1);

    (center, ray)
}

/// Reparameterizes the rays in normalized device coordinates.
///
/// ## Details
///
/// The centers are first moved onto the plane `z = near`.
/// Depths in `[0, 1]` then span from the near plane to infinity.
///
/// ## Shapes
///
/// * `center` - `[N, R, 3]`
/// * `ray` - `[N, R, 3]`
pub fn convert_ndc<B: Backend>(
    center: Tensor<B, 3>,
    ray: Tensor<B, 3>,
    intrinsics: &[Intrinsics],
    near: f64,
) -> Result<(Tensor<B, 3>, Tensor<B, 3>), Error> {
    let count = center.dims()[0];
    let intrinsics = broadcast_intrinsics(intrinsics, count)?;
    let device = center.device();

    // [N, 1, 1]
    let (scales_x, scales_y): (Vec<_>, Vec<_>) = intrinsics
        .iter()
        .map(|intrinsics| {
            (
                intrinsics.focal_length_x / intrinsics.principal_x,
                intrinsics.focal_length_y / intrinsics.principal_y,
            )
        })
        .unzip();
    let scales_x = from_f64s::<B, 3>(scales_x, [count, 1, 1], &device);
    let scales_y = from_f64s::<B, 3>(scales_y, [count, 1, 1], &device);

    let ray_z = ray.to_owned().narrow(2, 2, 1);
    let shift = center
        .to_owned()
        .narrow(2, 2, 1)
        .neg()
        .add_scalar(near)
        .div(ray_z.to_owned());
    let center = center + ray.to_owned() * shift;

    let center_x = center.to_owned().narrow(2, 0, 1);
    let center_y = center.to_owned().narrow(2, 1, 1);
    let center_z = center.narrow(2, 2, 1);
    let ray_x = ray.to_owned().narrow(2, 0, 1);
    let ray_y = ray.narrow(2, 1, 1);

    let center_x_z = center_x / center_z.to_owned();
    let center_y_z = center_y / center_z.to_owned();
    let center_ndc = Tensor::cat(
        vec![
            center_x_z.to_owned() * scales_x.to_owned(),
            center_y_z.to_owned() * scales_y.to_owned(),
            center_z.to_owned().recip().mul_scalar(-2.0 * near).add_scalar(1.0),
        ],
        2,
    );
    let ray_ndc = Tensor::cat(
        vec![
            (ray_x / ray_z.to_owned() - center_x_z) * scales_x,
            (ray_y / ray_z - center_y_z) * scales_y,
            center_z.recip().mul_scalar(2.0 * near),
        ],
        2,
    );

    Ok((center_ndc, ray_ndc))
}

/// `point = center + depth * ray`
///
/// ## Shapes
///
/// * `center` - `[N, R, 3]`
/// * `ray` - `[N, R, 3]`
/// * `depths` - `[N, R, S]`
/// * `output` - `[N, R, S, 3]`
pub fn points_from_depth<B: Backend>(
    center: Tensor<B, 3>,
    ray: Tensor<B, 3>,
    depths: Tensor<B, 3>,
) -> Tensor<B, 4> {
    center.unsqueeze_dim::<4>(2)
        + ray.unsqueeze_dim::<4>(2) * depths.unsqueeze_dim::<4>(3)
}

fn broadcast_intrinsics(
    intrinsics: &[Intrinsics],
    count: usize,
) -> Result<Vec<Intrinsics>, Error> {
    let first = intrinsics.first().ok_or_else(|| {
        Error::Validation("intrinsics.len()".into(), "at least 1".into())
    })?;
    if intrinsics.len() != 1 && intrinsics.len() != count {
        return Err(Error::Validation(
            "intrinsics.len()".into(),
            format!("1 or {count}"),
        ));
    }
    if intrinsics.iter().any(|other| {
        other.image_height != first.image_height
            || other.image_width != first.image_width
    }) {
        return Err(Error::Validation(
            "The image sizes of intrinsics".into(),
            "equal".into(),
        ));
    }

    Ok(if intrinsics.len() == count {
        intrinsics.to_vec()
    } else {
        vec![*first; count]
    })
}
