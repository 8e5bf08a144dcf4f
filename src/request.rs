//! JSON request/response types for scoring a captured cache offline.
//!
//! A request carries the flattened keys and the layer's precomputed
//! attention weights; host modules are not serialisable, so recomputation is
//! only available through the library API.

use ndarray::{Array3, Array4};
use serde::{Deserialize, Serialize};

use crate::cache::evictor::{GlobalEvictor, RetentionPlan};
use crate::cache::metadata::CacheMetadata;
use crate::error::{PressError, Result};
use crate::press::{AdaSnapKvPress, AttentionSource};

/// A dense f32 tensor in row-major order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TensorPayload {
    pub shape: Vec<usize>,
    pub data: Vec<f32>,
}

impl TensorPayload {
    fn mismatch(&self, what: &'static str) -> PressError {
        PressError::ShapeMismatch {
            what,
            expected: self.shape.clone(),
            actual: vec![self.data.len()],
        }
    }

    fn to_array3(&self, what: &'static str) -> Result<Array3<f32>> {
        match self.shape[..] {
            [a, b, c] => Array3::from_shape_vec((a, b, c), self.data.clone())
                .map_err(|_| self.mismatch(what)),
            _ => Err(self.mismatch(what)),
        }
    }

    fn to_array4(&self, what: &'static str) -> Result<Array4<f32>> {
        match self.shape[..] {
            [a, b, c, d] => Array4::from_shape_vec((a, b, c, d), self.data.clone())
                .map_err(|_| self.mismatch(what)),
            _ => Err(self.mismatch(what)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreRequest {
    /// Required; absent metadata is reported as `MissingMetadata`.
    #[serde(default)]
    pub metadata: Option<CacheMetadata>,

    /// `[batch * num_kv_heads, seq_len, head_dim]`.
    pub keys: TensorPayload,

    /// `[batch, num_heads, q_len, seq_len]`.
    pub attentions: TensorPayload,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreResponse {
    /// `[batch, num_kv_heads, seq_len]`.
    pub shape: Vec<usize>,

    /// Row-major scores; `f32::MAX` marks slots that must be retained.
    pub scores: Vec<f32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan: Option<RetentionPlan>,
}

impl ScoreRequest {
    /// Score the request and optionally plan global retention.
    pub fn run(&self, press: &AdaSnapKvPress, with_plan: bool) -> Result<ScoreResponse> {
        let keys = self.keys.to_array3("request keys")?;
        let attentions = self.attentions.to_array4("request attentions")?;

        let scores = press.score(
            AttentionSource::Precomputed(attentions.view()),
            keys.view(),
            self.metadata.as_ref(),
        )?;

        let plan = with_plan
            .then(|| GlobalEvictor::new(press.config().compression_ratio).plan(scores.view()));

        Ok(ScoreResponse {
            shape: scores.shape().to_vec(),
            scores: scores.iter().copied().collect(),
            plan,
        })
    }
}
