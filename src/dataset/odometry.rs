//! Text formats of StrayScanner captures.

pub use super::*;

use crate::camera::PoseMatrixExtension;
use nalgebra::{Matrix3, Quaternion, UnitQuaternion, Vector3};

/// One line of `odometry.csv`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct OdometryEntry {
    pub timestamp: f64,
    /// The frame number, which also names the depth files.
    pub frame: u64,
    /// World to camera.
    pub pose: PoseMatrix,
}

/// Parses the lines `timestamp, frame, x, y, z, qx, qy, qz, qw`.
///
/// ## Details
///
/// Each line is a camera-to-world pose in `[right, up, back]`.
/// It is flipped by `diag(1, -1, -1)` to `[right, down, forward]`
/// and inverted to a world-to-camera pose.
///
/// Empty lines and header lines are skipped.
pub fn parse_odometry(text: &str) -> Result<Vec<OdometryEntry>, Error> {
    let flip = Matrix3::from_diagonal(&Vector3::new(1.0, -1.0, -1.0));

    text.lines()
        .enumerate()
        .filter(|(_, line)| {
            let line = line.trim();
            !line.is_empty() && !line.starts_with(|c: char| c.is_alphabetic())
        })
        .map(|(index, line)| {
            let values = parse_values::<9>(line, index + 1)?;
            let position = Vector3::new(values[2], values[3], values[4]);
            let rotation = UnitQuaternion::from_quaternion(Quaternion::new(
                values[8], values[5], values[6], values[7],
            ))
            .to_rotation_matrix()
            .into_inner();

            let pose_camera_to_world =
                PoseMatrix::from_parts(&(rotation * flip), &position);

            Ok(OdometryEntry {
                timestamp: values[0],
                frame: values[1].round().max(0.0) as u64,
                pose: pose_camera_to_world.inverse(),
            })
        })
        .collect()
}

/// Parses a `3 x 3` comma-separated intrinsic matrix.
pub fn parse_camera_matrix(
    text: &str,
    image_height: u32,
    image_width: u32,
) -> Result<Intrinsics, Error> {
    let rows = text
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(index, line)| parse_values::<3>(line, index + 1))
        .collect::<Result<Vec<_>, _>>()?;
    let matrix: [[f64; 3]; 3] = rows.try_into().map_err(|rows: Vec<_>| {
        Error::Parse(format!("Expected 3 rows, but got {}", rows.len()), 0)
    })?;

    Ok(Intrinsics::from_matrix(&matrix, image_height, image_width))
}

fn parse_values<const N: usize>(
    line: &str,
    line_number: usize,
) -> Result<[f64; N], Error> {
    let values = line
        .split(',')
        .map(|field| {
            field.trim().parse::<f64>().map_err(|error| {
                Error::Parse(format!("{error}: {:?}", field.trim()), line_number)
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    values.try_into().map_err(|values: Vec<_>| {
        Error::Parse(
            format!("Expected {N} values, but got {}", values.len()),
            line_number,
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_odometry_identity_rotation() {
        let text = "timestamp, frame, x, y, z, qx, qy, qz, qw\n\
                    0.5, 3, 1.0, 2.0, 3.0, 0.0, 0.0, 0.0, 1.0\n\
                    \n";

        let entries = parse_odometry(text).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].timestamp, 0.5);
        assert_eq!(entries[0].frame, 3);

        let pose = entries[0].pose;
        // The camera looks along -z of the world
        let rotation = Matrix3::from_diagonal(&Vector3::new(1.0, -1.0, -1.0));
        assert!((pose.rotation() - rotation).norm() < 1e-12);
        assert!((pose.center() - Vector3::new(1.0, 2.0, 3.0)).norm() < 1e-12);
    }

    #[test]
    fn parse_odometry_rotation() {
        // Quarter turn about the world z axis
        let half = std::f64::consts::FRAC_PI_4;
        let text = format!("0, 0, 0, 0, 0, 0, 0, {}, {}", half.sin(), half.cos());

        let pose = parse_odometry(&text).unwrap()[0].pose;
        // The camera right axis maps to the world y axis
        let right = pose.rotation().transpose() * Vector3::x();
        assert!((right - Vector3::y()).norm() < 1e-12);
        // The camera forward axis maps to the world -z axis
        let forward = pose.rotation().transpose() * Vector3::z();
        assert!((forward + Vector3::z()).norm() < 1e-12);
    }

    #[test]
    fn parse_odometry_errors() {
        let result = parse_odometry("0, 1, 2\n");
        assert!(matches!(result, Err(Error::Parse(_, 1))));

        let result = parse_odometry("0, 1, 2, 3, 4, 5, 6, 7, 8\n0, 1, 2, 3, 4, 5, 6, 7, ?\n");
        assert!(matches!(result, Err(Error::Parse(_, 2))));
    }

    #[test]
    fn parse_camera_matrix_values() {
        let text = "500.0, 0.0, 320.0\n0.0, 510.0, 240.0\n0.0, 0.0, 1.0\n";

        let intrinsics = parse_camera_matrix(text, 480, 640).unwrap();
        assert_eq!(intrinsics.focal_length_x, 500.0);
        assert_eq!(intrinsics.focal_length_y, 510.0);
        assert_eq!(intrinsics.principal_x, 320.0);
        assert_eq!(intrinsics.principal_y, 240.0);

        assert!(parse_camera_matrix("1, 0, 0\n0, 1, 0\n", 1, 1).is_err());
    }
}
