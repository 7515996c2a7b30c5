pub mod intrinsics;
pub mod lie;
pub mod novel;
pub mod pose;
pub mod ray;

pub use burn::tensor::{backend::Backend, Int, Tensor, TensorData};
pub use intrinsics::*;
pub use lie::*;
pub use novel::*;
pub use pose::*;
pub use ray::*;
