//! A concrete attention layer exposing the capabilities the scorer consumes.

use serde::{Deserialize, Serialize};

use crate::attention::projection::{Linear, QueryProjection};
use crate::attention::rotary::{RotaryProvider, RotaryTable};
use crate::attention::AttentionModule;
use crate::error::{PressError, Result};

/// Query weights of a layer.
#[derive(Debug, Clone)]
pub enum ProjectionWeights {
    /// Separate `q_proj`.
    Query(Linear),
    /// Fused `qkv_proj` with output `[q | k | v]`.
    FusedQkv(Linear),
}

/// Which calling convention the layer's rotary provider answers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RotaryConvention {
    PositionIds,
    TotalLength,
}

#[derive(Debug, Clone)]
pub struct AttentionLayer {
    name: String,
    projection: ProjectionWeights,
    rotary: RotaryTable,
    convention: RotaryConvention,
    num_heads: usize,
    num_key_value_heads: usize,
    head_dim: usize,
}

impl AttentionLayer {
    pub fn new(
        name: impl Into<String>,
        projection: ProjectionWeights,
        rotary: RotaryTable,
        convention: RotaryConvention,
        num_heads: usize,
        num_key_value_heads: usize,
    ) -> Result<Self> {
        let head_dim = rotary.head_dim();
        if num_key_value_heads == 0 || num_heads % num_key_value_heads != 0 {
            return Err(PressError::InvalidConfig(format!(
                "num_heads ({num_heads}) must be a multiple of num_key_value_heads ({num_key_value_heads})"
            )));
        }
        if head_dim % 2 != 0 {
            return Err(PressError::InvalidConfig(format!(
                "rotary head_dim must be even, got {head_dim}"
            )));
        }

        let query_width = num_heads * head_dim;
        let (linear, min_width) = match &projection {
            ProjectionWeights::Query(l) => (l, query_width),
            ProjectionWeights::FusedQkv(l) => (l, query_width + 2 * num_key_value_heads * head_dim),
        };
        if linear.out_features() != min_width {
            return Err(PressError::ShapeMismatch {
                what: "projection weights",
                expected: vec![linear.in_features(), min_width],
                actual: vec![linear.in_features(), linear.out_features()],
            });
        }

        Ok(Self {
            name: name.into(),
            projection,
            rotary,
            convention,
            num_heads,
            num_key_value_heads,
            head_dim,
        })
    }
}

impl AttentionModule for AttentionLayer {
    fn name(&self) -> &str {
        &self.name
    }

    fn num_heads(&self) -> usize {
        self.num_heads
    }

    fn head_dim(&self) -> usize {
        self.head_dim
    }

    fn num_key_value_groups(&self) -> usize {
        self.num_heads / self.num_key_value_heads
    }

    fn query_projection(&self) -> QueryProjection<'_> {
        match &self.projection {
            ProjectionWeights::Query(l) => QueryProjection::Direct(l),
            ProjectionWeights::FusedQkv(l) => QueryProjection::FusedQkv(l),
        }
    }

    fn rotary(&self) -> RotaryProvider<'_> {
        match self.convention {
            RotaryConvention::PositionIds => RotaryProvider::PositionIds(&self.rotary),
            RotaryConvention::TotalLength => RotaryProvider::TotalLength(&self.rotary),
        }
    }
}
