#![allow(clippy::excessive_precision)]
#![allow(missing_docs)]

pub mod backend;
pub mod camera;
pub mod checkpoint;
pub mod dataset;
pub mod encoding;
pub mod error;
pub mod export;
pub mod field;
pub mod function;
pub mod metric;
pub mod pose;
pub mod render;
pub mod sampler;
pub mod state;
pub mod trainer;
