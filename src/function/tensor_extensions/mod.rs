pub mod float;
pub mod int;

pub use float::*;
pub use int::*;
