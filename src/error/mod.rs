use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Alignment Error: {0}")]
    Alignment(String),

    #[error("Config Error: {0}")]
    Config(String),

    #[error("Encoder Error: {0}")]
    Encoder(String),

    #[error("Frame Error: frame {0} should be written after frame {1}")]
    FrameOrder(usize, usize),

    #[error("Image Error: {0}")]
    Image(#[from] image::ImageError),

    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Checkpoint Error: no checkpoint at {0:?}")]
    MissingCheckpoint(PathBuf),

    #[error("Numerical Error: ray directions are not finite after {0} attempts")]
    NonFiniteRays(usize),

    #[error("Parse Error: {0} at line {1}")]
    Parse(String, usize),

    #[error("Recorder Error: {0}")]
    Recorder(String),

    #[error("Tensor Data Error: {0}")]
    TensorData(String),

    #[error("Validation Error: {0} should be {1}")]
    Validation(String, String),
}
