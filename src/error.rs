use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config parse error: {0}")]
    Config(#[from] serde_json::Error),

    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Frame size changed from {prev:?} to {curr:?}")]
    FrameSizeMismatch { prev: (u32, u32), curr: (u32, u32) },

    #[error("Face detector error: {0}")]
    Detector(String),

    #[error("Landmark index {index} out of bounds for {len} source landmarks")]
    IndexMismatch { index: usize, len: usize },

    #[error("Tracked point count mismatch: expected {expected}, got {actual}")]
    CardinalityMismatch { expected: usize, actual: usize },
}

pub type Result<T> = std::result::Result<T, Error>;
