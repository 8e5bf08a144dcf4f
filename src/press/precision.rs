//! Working precisions for scores and cached tensors.

use half::{bf16, f16};

/// An element type the press can read keys from and emit scores in.
///
/// `MAX` is the sentinel written to every slot that must survive eviction.
pub trait ScoreElement: Copy + Send + Sync + PartialEq + std::fmt::Debug + 'static {
    /// Largest finite value of the type.
    const MAX: Self;

    fn from_f32(value: f32) -> Self;

    fn to_f32(self) -> f32;

    /// Whether this value is the retention sentinel.
    fn is_sentinel(self) -> bool {
        self == Self::MAX
    }
}

impl ScoreElement for f32 {
    const MAX: Self = f32::MAX;

    fn from_f32(value: f32) -> Self {
        value
    }

    fn to_f32(self) -> f32 {
        self
    }
}

impl ScoreElement for f16 {
    const MAX: Self = f16::MAX;

    fn from_f32(value: f32) -> Self {
        f16::from_f32(value)
    }

    fn to_f32(self) -> f32 {
        f16::to_f32(self)
    }
}

impl ScoreElement for bf16 {
    const MAX: Self = bf16::MAX;

    fn from_f32(value: f32) -> Self {
        bf16::from_f32(value)
    }

    fn to_f32(self) -> f32 {
        bf16::to_f32(self)
    }
}
