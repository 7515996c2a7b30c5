//! Novel views orbiting around an anchor view.

pub use super::*;

use nalgebra::{Matrix3, Rotation3, Vector3};
use std::f64::consts::TAU;

/// The amplitude of the orbit in radians of tilt.
pub const NOVEL_VIEW_TILT: f64 = 0.05;

/// Generates `count` poses orbiting around `anchor`.
///
/// ## Details
///
/// Each pose moves the scene back by `4 * scale`, tilts it by
/// `asin(0.05 * cos(θ))` about `y` and `asin(0.05 * sin(θ))` about `x`,
/// moves it forward by `3.8 * scale`, and finally applies `anchor`.
pub fn novel_view_poses(
    anchor: &PoseMatrix,
    count: usize,
    scale: f64,
) -> Vec<PoseMatrix> {
    let shift = PoseMatrix::from_parts(
        &Matrix3::identity(),
        &Vector3::new(0.0, 0.0, -4.0 * scale),
    );
    let shift_back = PoseMatrix::from_parts(
        &Matrix3::identity(),
        &Vector3::new(0.0, 0.0, 3.8 * scale),
    );

    (0..count)
        .map(|index| {
            let theta = index as f64 / count as f64 * TAU;
            let rotation_x = Rotation3::from_axis_angle(
                &Vector3::x_axis(),
                (theta.sin() * NOVEL_VIEW_TILT).asin(),
            );
            let rotation_y = Rotation3::from_axis_angle(
                &Vector3::y_axis(),
                (theta.cos() * NOVEL_VIEW_TILT).asin(),
            );
            let tilt = PoseMatrix::from_parts(
                (rotation_y * rotation_x).matrix(),
                &Vector3::zeros(),
            );

            shift.then(&tilt).then(&shift_back).then(anchor)
        })
        .collect()
}

/// The index of the pose whose translation is the closest to the mean one.
pub fn anchor_index(poses: &[PoseMatrix]) -> Option<usize> {
    if poses.is_empty() {
        return None;
    }

    let mean = poses
        .iter()
        .map(|pose| pose.translation())
        .sum::<Vector3<f64>>()
        / poses.len() as f64;

    poses
        .iter()
        .map(|pose| (pose.translation() - mean).norm())
        .enumerate()
        .min_by(|(_, a), (_, b)| a.total_cmp(b))
        .map(|(index, _)| index)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn novel_view_poses_orbit() {
        let anchor = PoseMatrix::IDENTITY;
        let poses = novel_view_poses(&anchor, 8, 1.0);
        assert_eq!(poses.len(), 8);

        for pose in &poses {
            let rotation = pose.rotation();
            let error = (rotation.transpose() * rotation - Matrix3::identity()).norm();
            assert!(error < 1e-12, "{error}");

            // The tilt is small and the orbit stays close to the anchor
            let distance = pose.center().norm();
            assert!(distance < 0.5, "{distance}");
        }

        // Deterministic
        assert_eq!(poses, novel_view_poses(&anchor, 8, 1.0));
        // Not all the same
        assert_ne!(poses[0], poses[2]);
    }

    #[test]
    fn novel_view_poses_first_tilts_about_y() {
        let poses = novel_view_poses(&PoseMatrix::IDENTITY, 4, 2.0);
        let rotation = poses[0].rotation();
        let angle = NOVEL_VIEW_TILT.asin();

        assert!((rotation[(0, 2)] - angle.sin()).abs() < 1e-12);
        assert!((rotation[(1, 1)] - 1.0).abs() < 1e-12);
        // t = R * (0, 0, -8) + (0, 0, 7.6)
        let translation = poses[0].translation();
        assert!((translation[0] + 8.0 * angle.sin()).abs() < 1e-12);
        assert!((translation[2] - (7.6 - 8.0 * angle.cos())).abs() < 1e-12);
    }

    #[test]
    fn anchor_index_is_closest_to_mean() {
        let mut poses = vec![PoseMatrix::IDENTITY; 3];
        poses[0][0][3] = -2.0;
        poses[1][0][3] = 0.2;
        poses[2][0][3] = 2.5;

        assert_eq!(anchor_index(&poses), Some(1));
        assert_eq!(anchor_index(&[]), None);
    }
}
