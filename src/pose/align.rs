//! Similarity alignment between a learned and a reference trajectory.

pub use super::*;

use crate::error::Error;
use nalgebra::{Matrix3, Vector3};

/// The smallest RMS spread of camera centers that can be aligned.
pub const SCALE_EPSILON: f64 = 1e-12;

/// A similarity transformation from the predicted frame to the reference frame.
///
/// `aligned = s_0 * R * (p - t_1) / s_1 + t_0`
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Sim3 {
    pub rotation: Matrix3<f64>,
    /// `s_0`
    pub scale_reference: f64,
    /// `s_1`
    pub scale_predicted: f64,
    /// `t_0`
    pub translation_reference: Vector3<f64>,
    /// `t_1`
    pub translation_predicted: Vector3<f64>,
}

impl Sim3 {
    pub fn identity() -> Self {
        Self {
            rotation: Matrix3::identity(),
            scale_reference: 1.0,
            scale_predicted: 1.0,
            translation_reference: Vector3::zeros(),
            translation_predicted: Vector3::zeros(),
        }
    }

    /// Solves the similarity mapping `predicted` points onto `reference` points.
    ///
    /// ## Details
    ///
    /// Both point sets are centered and normalized by their RMS norms.
    /// The rotation is `U * diag(1, 1, det(U * V^T)) * V^T`,
    /// where `U * S * V^T` is the SVD of `X_0^T * X_1`.
    ///
    /// ## Errors
    ///
    /// [`Error::Alignment`] if the point sets are mismatched, degenerate,
    /// or the SVD does not converge.
    pub fn procrustes(
        reference: &[Vector3<f64>],
        predicted: &[Vector3<f64>],
    ) -> Result<Self, Error> {
        let count = reference.len();
        if count != predicted.len() || count < 3 {
            return Err(Error::Alignment(format!(
                "There should be at least 3 point pairs, but got {count} and {}",
                predicted.len(),
            )));
        }

        let (translation_reference, scale_reference, reference) =
            normalize_points(reference)?;
        let (translation_predicted, scale_predicted, predicted) =
            normalize_points(predicted)?;

        let covariance = reference
            .iter()
            .zip(&predicted)
            .map(|(x0, x1)| x0 * x1.transpose())
            .sum::<Matrix3<f64>>();
        let svd = covariance
            .try_svd(true, true, f64::EPSILON, 0)
            .ok_or_else(|| Error::Alignment("The SVD does not converge".into()))?;
        let (u, v_t) = svd.u.zip(svd.v_t).ok_or_else(|| {
            Error::Alignment("The SVD has no singular vectors".into())
        })?;

        let sign = (u * v_t).determinant().signum();
        let rotation = u * Matrix3::from_diagonal(&Vector3::new(1.0, 1.0, sign)) * v_t;

        Ok(Self {
            rotation,
            scale_reference,
            scale_predicted,
            translation_reference,
            translation_predicted,
        })
    }

    /// Maps a point from the predicted frame to the reference frame.
    #[inline]
    pub fn align_point(
        &self,
        point: &Vector3<f64>,
    ) -> Vector3<f64> {
        self.rotation * (point - self.translation_predicted) / self.scale_predicted
            * self.scale_reference
            + self.translation_reference
    }

    /// Maps a point from the reference frame to the predicted frame.
    #[inline]
    pub fn unalign_point(
        &self,
        point: &Vector3<f64>,
    ) -> Vector3<f64> {
        self.rotation.transpose() * (point - self.translation_reference)
            / self.scale_reference
            * self.scale_predicted
            + self.translation_predicted
    }

    /// Maps a predicted pose into the reference frame.
    pub fn align_pose(
        &self,
        pose: &PoseMatrix,
    ) -> PoseMatrix {
        let center = self.align_point(&pose.center());
        let rotation = pose.rotation() * self.rotation.transpose();
        PoseMatrix::from_parts(&rotation, &(-rotation * center))
    }

    /// Maps a reference pose into the predicted frame.
    pub fn unalign_pose(
        &self,
        pose: &PoseMatrix,
    ) -> PoseMatrix {
        let center = self.unalign_point(&pose.center());
        let rotation = pose.rotation() * self.rotation;
        PoseMatrix::from_parts(&rotation, &(-rotation * center))
    }

    /// `s_1 / s_0`
    #[inline]
    pub fn scale_ratio(&self) -> f64 {
        self.scale_predicted / self.scale_reference
    }
}

impl Default for Sim3 {
    #[inline]
    fn default() -> Self {
        Self::identity()
    }
}

/// Aligns the predicted camera centers to the reference ones.
///
/// It falls back to [`Sim3::identity`] if the alignment fails.
pub fn prealign(
    predicted: &[PoseMatrix],
    reference: &[PoseMatrix],
) -> Sim3 {
    let centers_predicted =
        predicted.iter().map(|pose| pose.center()).collect::<Vec<_>>();
    let centers_reference =
        reference.iter().map(|pose| pose.center()).collect::<Vec<_>>();

    Sim3::procrustes(&centers_reference, &centers_predicted).unwrap_or_else(
        |error| {
            log::warn!(
                target: "barf::pose::align",
                "prealign > fall back to identity: {error}",
            );
            Sim3::identity()
        },
    )
}

/// `(mean, RMS norm, normalized points)`
fn normalize_points(
    points: &[Vector3<f64>]
) -> Result<(Vector3<f64>, f64, Vec<Vector3<f64>>), Error> {
    let count = points.len() as f64;
    let mean = points.iter().sum::<Vector3<f64>>() / count;
    let centered = points.iter().map(|point| point - mean).collect::<Vec<_>>();
    let scale = (centered
        .iter()
        .map(|point| point.norm_squared())
        .sum::<f64>()
        / count)
        .sqrt();
    if !scale.is_finite() || scale < SCALE_EPSILON {
        return Err(Error::Alignment(format!(
            "The points are degenerate with the scale {scale}"
        )));
    }

    let normalized = centered.into_iter().map(|point| point / scale).collect();
    Ok((mean, scale, normalized))
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Rotation3;

    fn points() -> Vec<Vector3<f64>> {
        vec![
            Vector3::new(0.0, 0.0, 0.0),
            Vector3::new(1.0, 0.2, -0.3),
            Vector3::new(-0.5, 1.5, 0.4),
            Vector3::new(0.3, -0.7, 2.0),
            Vector3::new(2.2, 0.9, 1.1),
        ]
    }

    fn transform() -> (Matrix3<f64>, f64, Vector3<f64>) {
        let rotation =
            Rotation3::from_euler_angles(0.3, -1.1, 2.0).into_inner();
        (rotation, 2.5, Vector3::new(1.0, -2.0, 0.5))
    }

    #[test]
    fn procrustes_is_exact_on_similar_points() {
        let (rotation, scale, translation) = transform();
        let predicted = points();
        let reference = predicted
            .iter()
            .map(|point| rotation * point * scale + translation)
            .collect::<Vec<_>>();

        let sim3 = Sim3::procrustes(&reference, &predicted).unwrap();
        assert!((sim3.rotation - rotation).norm() < 1e-9);
        assert!((sim3.scale_ratio() - 1.0 / scale).abs() < 1e-9);
        for (point, target) in predicted.iter().zip(&reference) {
            assert!((sim3.align_point(point) - target).norm() < 1e-9);
            assert!((sim3.unalign_point(target) - point).norm() < 1e-9);
        }
    }

    #[test]
    fn procrustes_rejects_degenerate_points() {
        let points = vec![Vector3::new(1.0, 2.0, 3.0); 4];
        let result = Sim3::procrustes(&points, &points);
        assert!(matches!(result, Err(Error::Alignment(..))));

        let result = Sim3::procrustes(&points[..2], &points[..2]);
        assert!(matches!(result, Err(Error::Alignment(..))));
    }

    #[test]
    fn align_pose_recovers_reference() {
        let (rotation, scale, translation) = transform();
        let reference = points()
            .iter()
            .enumerate()
            .map(|(index, center)| {
                let rotation_pose =
                    Rotation3::from_euler_angles(0.1 * index as f64, 0.2, -0.3)
                        .into_inner();
                PoseMatrix::from_parts(&rotation_pose, &(-rotation_pose * center))
            })
            .collect::<Vec<_>>();
        // The predicted frame is the reference frame under an unknown similarity
        let inverse = Sim3 {
            rotation,
            scale_reference: scale,
            scale_predicted: 1.0,
            translation_reference: translation,
            translation_predicted: Vector3::zeros(),
        };
        let predicted = reference
            .iter()
            .map(|pose| inverse.align_pose(pose))
            .collect::<Vec<_>>();

        let sim3 = prealign(&predicted, &reference);
        for (pose, target) in predicted.iter().zip(&reference) {
            let aligned = sim3.align_pose(pose);
            let error = (aligned.rotation() - target.rotation()).norm()
                + (aligned.translation() - target.translation()).norm();
            assert!(error < 1e-9, "{error}");

            let unaligned = sim3.unalign_pose(target);
            let error = (unaligned.rotation() - pose.rotation()).norm()
                + (unaligned.center() - pose.center()).norm();
            assert!(error < 1e-9, "{error}");
        }
    }

    #[test]
    fn prealign_falls_back_to_identity() {
        let poses = vec![PoseMatrix::IDENTITY; 3];
        assert_eq!(prealign(&poses, &poses), Sim3::identity());
    }
}
