//! Explicit training state passed into rendering.

/// The fraction of training done, in `[0, 1]`.
#[derive(Clone, Copy, Debug, Default, PartialEq, PartialOrd)]
pub struct TrainingProgress(f64);

impl TrainingProgress {
    /// Clamped to `[0, 1]`.
    pub fn new(value: f64) -> Self {
        Self(value.clamp(0.0, 1.0))
    }

    /// `iteration / iteration_max`
    pub fn from_iteration(
        iteration: u64,
        iteration_max: u64,
    ) -> Self {
        if iteration_max == 0 {
            return Self::complete();
        }
        Self::new(iteration as f64 / iteration_max as f64)
    }

    /// Training is done, every encoding band is open.
    pub const fn complete() -> Self {
        Self(1.0)
    }

    #[inline]
    pub const fn value(&self) -> f64 {
        self.0
    }
}

/// What the renderer is invoked for.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub enum RenderMode {
    #[default]
    Train,
    Evaluate,
    /// Test-time photometric pose optimization.
    TestOptimize,
}

/// The state every field evaluation is conditioned on.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct RenderContext {
    pub mode: RenderMode,
    pub progress: TrainingProgress,
}

impl RenderContext {
    pub const fn new(
        mode: RenderMode,
        progress: TrainingProgress,
    ) -> Self {
        Self { mode, progress }
    }
}

#[cfg(test)]
mod tests {
    #[test]
    fn progress_from_iteration() {
        use super::*;

        assert_eq!(TrainingProgress::from_iteration(0, 200).value(), 0.0);
        assert_eq!(TrainingProgress::from_iteration(50, 200).value(), 0.25);
        assert_eq!(TrainingProgress::from_iteration(300, 200).value(), 1.0);
        assert_eq!(TrainingProgress::from_iteration(3, 0).value(), 1.0);
        assert_eq!(TrainingProgress::new(-0.5).value(), 0.0);
    }
}
