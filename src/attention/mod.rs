//! The host attention module, as far as the scorer needs to see it.
//!
//! - [`projection`]: query projections (direct or fused qkv)
//! - [`rotary`]: rotary providers and their two calling conventions
//! - [`layer`]: a concrete attention layer implementing [`AttentionModule`]
//! - [`ops`]: repeat_kv, causal masking and widened softmax

pub mod layer;
pub mod ops;
pub mod projection;
pub mod rotary;

pub use layer::{AttentionLayer, ProjectionWeights, RotaryConvention};
pub use projection::{Linear, QueryProjection};
pub use rotary::{LengthRotary, PositionRotary, RotaryProvider, RotaryTable};

/// Capabilities the window estimator consumes from a host attention module.
pub trait AttentionModule: Sync {
    /// Human-readable module name, used in error messages.
    fn name(&self) -> &str;

    /// Number of query heads.
    fn num_heads(&self) -> usize;

    fn head_dim(&self) -> usize;

    /// Query heads sharing one key/value head.
    fn num_key_value_groups(&self) -> usize;

    fn query_projection(&self) -> QueryProjection<'_>;

    fn rotary(&self) -> RotaryProvider<'_>;
}
