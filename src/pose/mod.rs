//! Pose refinement, trajectory alignment and pose errors.

pub mod align;
pub mod metric;
pub mod refine;
pub mod test_time;

pub use crate::camera::{Pose, PoseMatrix, PoseMatrixExtension};
pub use align::*;
pub use burn::{
    config::Config,
    module::{Module, Param},
    tensor::{backend::Backend, Int, Tensor},
};
pub use metric::*;
pub use refine::*;
pub use test_time::*;
