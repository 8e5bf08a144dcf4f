//! Adaptive SnapKV scoring.
//!
//! - [`window`]: attention of the observation window onto the cached keys
//! - [`aggregate`]: window mean, smoothing and grouped-query averaging
//! - [`budget`]: per-head floor safeguard and sentinel marking
//! - [`precision`]: element types scores can be produced in
//!
//! ```text
//! hidden states + keys ─► window attention ─► per-key scores ─► floor + sentinels
//! ```

pub mod aggregate;
pub mod budget;
pub mod precision;
pub mod window;

use ndarray::{s, Array3, ArrayView3, ArrayView4};
use tracing::{debug, warn};

use crate::attention::AttentionModule;
use crate::cache::metadata::CacheMetadata;
use crate::config::PressConfig;
use crate::error::{PressError, Result};

use aggregate::ScoreAggregator;
use budget::BudgetAllocator;
use precision::ScoreElement;
use window::WindowAttentionEstimator;

/// Where the window's attention weights come from.
///
/// Both variants yield the same weights for the same query/key pair, up to
/// the rounding of the working precision.
#[derive(Clone, Copy)]
pub enum AttentionSource<'a, T> {
    /// Full attention weights `[batch, num_heads, q_len, seq_len]` already
    /// produced by the forward pass; the trailing `window_size` query rows
    /// are used.
    Precomputed(ArrayView4<'a, T>),
    /// Recompute the window from the layer's query projection.
    /// `hidden_states` is `[batch, seq_len, hidden]`.
    Recompute {
        module: &'a dyn AttentionModule,
        hidden_states: ArrayView3<'a, T>,
    },
}

/// Scores a layer's cache once, right after prefill.
#[derive(Debug, Clone)]
pub struct AdaSnapKvPress {
    config: PressConfig,
    estimator: WindowAttentionEstimator,
    aggregator: ScoreAggregator,
    allocator: BudgetAllocator,
}

impl AdaSnapKvPress {
    pub fn new(config: PressConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            estimator: WindowAttentionEstimator::new(config.window_size),
            aggregator: ScoreAggregator::new(config.kernel_size),
            allocator: BudgetAllocator::new(config.window_size),
        })
    }

    pub fn config(&self) -> &PressConfig {
        &self.config
    }

    /// Importance of every cached position, `[batch, num_kv_heads, seq_len]`.
    ///
    /// `keys` is the cache manager's `[batch * num_kv_heads, seq_len, head_dim]`
    /// tensor. The last `window_size` positions of every head, plus each head's
    /// `floor_count` best other positions, hold `T::MAX`.
    pub fn score<T: ScoreElement>(
        &self,
        source: AttentionSource<'_, T>,
        keys: ArrayView3<'_, T>,
        metadata: Option<&CacheMetadata>,
    ) -> Result<Array3<T>> {
        let metadata = metadata.ok_or(PressError::MissingMetadata)?;
        // Fails on a cache an earlier compression already pruned.
        let keys = metadata.view_4d(keys)?;
        let (bsz, num_kv_heads, seq_len, _) = keys.dim();
        let window = self.config.window_size;

        if seq_len <= window {
            return Err(PressError::InvalidWindowSize {
                seq_len,
                window_size: window,
            });
        }

        let attn_weights = match source {
            AttentionSource::Precomputed(attentions) => {
                debug!("Using precomputed attention weights");
                window_slice(attentions, bsz, seq_len, window)?
            }
            AttentionSource::Recompute {
                module,
                hidden_states,
            } => {
                debug!(module = module.name(), "Recomputing window attention");
                self.estimator.estimate(module, hidden_states, keys.view())?
            }
        };

        let scores = self.aggregator.aggregate(attn_weights.view(), num_kv_heads)?;

        let floor_count = self.config.floor_count(seq_len);
        let history = seq_len - window;
        if floor_count > history {
            warn!(floor_count, history, "Floor exceeds scorable positions, clamping");
        }
        debug!(
            bsz,
            num_kv_heads,
            seq_len,
            window,
            floor_count = floor_count.min(history),
            "Scored cache for compression"
        );

        Ok(self.allocator.allocate(scores, floor_count))
    }
}

/// `[.., -window:, :-window]` of a full attention matrix.
fn window_slice<T: ScoreElement>(
    attentions: ArrayView4<'_, T>,
    bsz: usize,
    seq_len: usize,
    window: usize,
) -> Result<ndarray::Array4<T>> {
    let (a_bsz, heads, q_len, k_len) = attentions.dim();
    if a_bsz != bsz || k_len != seq_len || q_len < window {
        return Err(PressError::ShapeMismatch {
            what: "precomputed attentions",
            expected: vec![bsz, heads, seq_len, seq_len],
            actual: vec![a_bsz, heads, q_len, k_len],
        });
    }
    Ok(attentions
        .slice(s![.., .., q_len - window.., ..seq_len - window])
        .to_owned())
}
