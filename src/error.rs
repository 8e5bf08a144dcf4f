//! Error type for the scoring pipeline.
//!
//! Every failure is a precondition violation raised before any output is
//! produced. None of them are transient, so callers should not retry.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PressError {
    #[error("Cache metadata is required to score a compression event")]
    MissingMetadata,

    #[error("Per-head cache lengths differ ({head_lens:?}): cache was already compressed once")]
    UnsupportedRecompression { head_lens: Vec<usize> },

    #[error("Sequence length {seq_len} must be greater than the window size {window_size}")]
    InvalidWindowSize { seq_len: usize, window_size: usize },

    #[error("Attention module {module} exposes neither a query nor a fused qkv projection")]
    UnsupportedLayout { module: String },

    #[error("Invalid press configuration: {0}")]
    InvalidConfig(String),

    #[error("Shape mismatch for {what}: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        what: &'static str,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },
}

pub type Result<T> = std::result::Result<T, PressError>;
