use thiserror::Error;

pub mod activation;
pub mod feedforward;

pub use activation::GeluKind;
pub use feedforward::{FeedForward, FeedForwardConfig, LinearWeights};

// internal width of the feedforward layer
pub const DEFAULT_MIDDLE_DIM: usize = 2048;
// probability of zeroing an activation during training
pub const DEFAULT_DROPOUT: f64 = 0.1;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum FeedForwardError {
    #[error("invalid feedforward configuration: {0}")]
    Configuration(String),
    #[error("expected trailing dimension {expected}, found {actual}")]
    ShapeMismatch { expected: usize, actual: usize },
}

pub type Result<T> = std::result::Result<T, FeedForwardError>;
