//! Query projections exposed by a host attention module.

use ndarray::{s, Array1, Array2, Array3, ArrayView3};

use crate::error::{PressError, Result};
use crate::press::precision::ScoreElement;

/// A dense projection with weights stored as `[in_features, out_features]`.
#[derive(Debug, Clone)]
pub struct Linear {
    pub weight: Array2<f32>,
    pub bias: Option<Array1<f32>>,
}

impl Linear {
    pub fn new(weight: Array2<f32>, bias: Option<Array1<f32>>) -> Result<Self> {
        if let Some(b) = &bias {
            if b.len() != weight.ncols() {
                return Err(PressError::ShapeMismatch {
                    what: "projection bias",
                    expected: vec![weight.ncols()],
                    actual: vec![b.len()],
                });
            }
        }
        Ok(Self { weight, bias })
    }

    pub fn in_features(&self) -> usize {
        self.weight.nrows()
    }

    pub fn out_features(&self) -> usize {
        self.weight.ncols()
    }

    /// `[batch, seq, in] -> [batch, seq, out]`, accumulated in f32.
    pub fn forward<T: ScoreElement>(&self, x: ArrayView3<'_, T>) -> Result<Array3<f32>> {
        let (batch, seq, hidden) = x.dim();
        if hidden != self.in_features() {
            return Err(PressError::ShapeMismatch {
                what: "projection input",
                expected: vec![batch, seq, self.in_features()],
                actual: vec![batch, seq, hidden],
            });
        }

        let flat = Array2::from_shape_fn((batch * seq, hidden), |(row, col)| {
            x[[row / seq, row % seq, col]].to_f32()
        });
        let mut out = flat.dot(&self.weight);
        if let Some(bias) = &self.bias {
            out += bias;
        }

        let out_features = self.out_features();
        Ok(Array3::from_shape_fn((batch, seq, out_features), |(b, t, o)| {
            out[[b * seq + t, o]]
        }))
    }
}

/// How a host module produces its queries.
///
/// Resolved once per module instance; the estimator matches on it instead of
/// probing the module for attributes.
#[derive(Debug, Clone, Copy)]
pub enum QueryProjection<'a> {
    /// A dedicated query projection.
    Direct(&'a Linear),
    /// A fused projection whose output is laid out as `[q | k | v]`; the query
    /// occupies the first `num_heads * head_dim` columns.
    FusedQkv(&'a Linear),
    /// Anything else. Scoring such a module fails with `UnsupportedLayout`.
    Unsupported,
}

impl QueryProjection<'_> {
    /// Project `hidden` and keep only the query columns.
    pub fn queries<T: ScoreElement>(
        &self,
        hidden: ArrayView3<'_, T>,
        query_width: usize,
        module: &str,
    ) -> Result<Array3<f32>> {
        let (linear, fused) = match self {
            QueryProjection::Direct(linear) => (*linear, false),
            QueryProjection::FusedQkv(linear) => (*linear, true),
            QueryProjection::Unsupported => {
                return Err(PressError::UnsupportedLayout {
                    module: module.to_string(),
                })
            }
        };

        let projected = linear.forward(hidden)?;
        let (batch, seq, width) = projected.dim();
        if width < query_width || (!fused && width != query_width) {
            return Err(PressError::ShapeMismatch {
                what: "query projection output",
                expected: vec![batch, seq, query_width],
                actual: vec![batch, seq, width],
            });
        }

        if fused {
            Ok(projected.slice(s![.., .., ..query_width]).to_owned())
        } else {
            Ok(projected)
        }
    }
}
