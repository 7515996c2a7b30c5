//! Errors between aligned and reference poses.

pub use super::*;

use crate::error::Error;
use nalgebra::Matrix3;
use std::io::Write;

/// The geodesic distance between rotations in radians.
///
/// `acos(clamp((tr(R_1 * R_2^T) - 1) / 2, -1, 1))`
pub fn rotation_distance(
    rotation_1: &Matrix3<f64>,
    rotation_2: &Matrix3<f64>,
) -> f64 {
    let cosine = ((rotation_1 * rotation_2.transpose()).trace() - 1.0) / 2.0;
    cosine.clamp(-1.0, 1.0).acos()
}

/// Per-pose errors.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PoseErrors {
    /// In radians.
    pub rotation: Vec<f64>,
    /// Euclidean distances between translations.
    pub translation: Vec<f64>,
}

impl PoseErrors {
    /// Compares the aligned poses with the reference poses one by one.
    pub fn evaluate(
        aligned: &[PoseMatrix],
        reference: &[PoseMatrix],
    ) -> Result<Self, Error> {
        if aligned.len() != reference.len() {
            return Err(Error::Validation(
                "The count of aligned poses".into(),
                format!("{}", reference.len()),
            ));
        }

        Ok(aligned.iter().zip(reference).fold(
            Self::default(),
            |mut errors, (pose, target)| {
                errors
                    .rotation
                    .push(rotation_distance(&pose.rotation(), &target.rotation()));
                errors
                    .translation
                    .push((pose.translation() - target.translation()).norm());
                errors
            },
        ))
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.rotation.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.rotation.is_empty()
    }

    /// The mean rotation error in degrees.
    pub fn rotation_mean_degrees(&self) -> f64 {
        mean(&self.rotation).to_degrees()
    }

    pub fn translation_mean(&self) -> f64 {
        mean(&self.translation)
    }

    /// Writes one line `"<index> <rotation_degrees> <translation>"` per pose.
    pub fn encode<W: Write>(
        &self,
        writer: &mut W,
    ) -> Result<(), Error> {
        for (index, (rotation, translation)) in
            self.rotation.iter().zip(&self.translation).enumerate()
        {
            writeln!(writer, "{index} {} {translation}", rotation.to_degrees())?;
        }
        Ok(())
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    values.iter().sum::<f64>() / values.len() as f64
}
