//! Per-pixel depth windows from sensor depth and its confidence.

pub use super::*;

use crate::{
    dataset::DepthMap, error::Error, function::tensor_extensions::from_f64s,
};

/// The minimum width of a depth window.
pub const DEPTH_WINDOW_MIN: f64 = 1e-3;

/// The window around a sensor depth of one confidence tier.
#[derive(Config, Copy, Debug, PartialEq)]
pub struct DepthPriorTier {
    /// The window is `[d - half_width, d + half_width]`.
    pub half_width: f64,
    /// The near bound is at most this value.
    pub near_max: Option<f64>,
    /// The far bound is at least this value.
    pub far_min: Option<f64>,
}

/// The depth windows indexed by confidence.
///
/// ## Details
///
/// | Confidence | Tier     | Default window            |
/// | ---------- | -------- | ------------------------- |
/// | `2`        | `high`   | `d ± 0.3`                 |
/// | `1`        | `medium` | `d ± 0.6`                 |
/// | `0`        | `low`    | `[min(d - 0.3, 4), max(d + 0.3, far)]` |
#[derive(Config, Copy, Debug, PartialEq)]
pub struct DepthPriorPolicy {
    #[config(default = "DepthPriorTier::new(0.3)")]
    pub high: DepthPriorTier,
    #[config(default = "DepthPriorTier::new(0.6)")]
    pub medium: DepthPriorTier,
    #[config(default = "DepthPriorTier::new(0.3).with_near_max(Some(4.0)).with_far_min(Some(6.0))")]
    pub low: DepthPriorTier,
}

impl DepthPriorPolicy {
    /// Confidences above `2` count as high.
    #[inline]
    pub const fn tier(
        &self,
        confidence: u8,
    ) -> &DepthPriorTier {
        match confidence {
            0 => &self.low,
            1 => &self.medium,
            _ => &self.high,
        }
    }

    /// The depth window of one pixel.
    ///
    /// The window is clamped so that `0 <= near < far`.
    pub fn window(
        &self,
        depth: f64,
        confidence: u8,
    ) -> (f64, f64) {
        let tier = self.tier(confidence);
        let mut near = depth - tier.half_width;
        let mut far = depth + tier.half_width;
        if let Some(near_max) = tier.near_max {
            near = near.min(near_max);
        }
        if let Some(far_min) = tier.far_min {
            far = far.max(far_min);
        }

        let near = near.max(0.0);
        let far = far.max(near + DEPTH_WINDOW_MIN);
        (near, far)
    }
}

impl<B: Backend> DepthBounds<B> {
    /// Per-ray bounds `[N, H * W]` from `N` depth maps of equal size.
    pub fn from_prior(
        policy: &DepthPriorPolicy,
        depth_maps: &[&DepthMap],
        device: &B::Device,
    ) -> Result<Self, Error> {
        let count = depth_maps.len();
        let pixel_count = depth_maps.first().map_or(0, |map| map.depths.len());
        if depth_maps.iter().any(|map| {
            map.depths.len() != pixel_count || map.confidences.len() != pixel_count
        }) {
            return Err(Error::Validation(
                "The sizes of depth maps".into(),
                "equal".into(),
            ));
        }

        let (near, far) = depth_maps
            .iter()
            .flat_map(|map| map.depths.iter().zip(&map.confidences))
            .map(|(&depth, &confidence)| policy.window(depth as f64, confidence))
            .unzip();

        #[cfg(all(debug_assertions, not(test)))]
        log::debug!(
            target: "barf::sampler::prior",
            "from_prior > {count} maps of {pixel_count} pixels",
        );

        Ok(Self::PerRay {
            near: from_f64s(near, [count, pixel_count], device),
            far: from_f64s(far, [count, pixel_count], device),
        })
    }
}

impl Default for DepthPriorPolicy {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}
