//! Rotary position embeddings as seen by the window estimator.
//!
//! Hosts expose their rotary provider under one of two calling conventions:
//! explicit position ids, or a total sequence length whose factors the caller
//! slices down to the positions it needs.

use ndarray::{s, Array1, Array2, ArrayView2, ArrayViewMut4, Axis};

use crate::error::{PressError, Result};

/// Rotation factors for an explicit list of positions.
pub trait PositionRotary: Send + Sync {
    /// Returns `(cos, sin)`, each `[position_ids.len(), head_dim]`.
    fn cos_sin(&self, position_ids: &[usize]) -> (Array2<f32>, Array2<f32>);
}

/// Rotation factors for every position of a sequence of `seq_len`.
pub trait LengthRotary: Send + Sync {
    /// Returns `(cos, sin)`, each `[seq_len, head_dim]`.
    fn cos_sin(&self, seq_len: usize) -> (Array2<f32>, Array2<f32>);
}

/// The calling convention a host's rotary provider uses.
#[derive(Clone, Copy)]
pub enum RotaryProvider<'a> {
    PositionIds(&'a dyn PositionRotary),
    TotalLength(&'a dyn LengthRotary),
}

impl RotaryProvider<'_> {
    /// Factors for the trailing `window` positions of a `seq_len` sequence.
    ///
    /// Host providers are not trusted to return the requested number of rows.
    pub fn window_factors(
        &self,
        seq_len: usize,
        window: usize,
    ) -> Result<(Array2<f32>, Array2<f32>)> {
        let start = seq_len.saturating_sub(window);
        match self {
            RotaryProvider::PositionIds(provider) => {
                let ids: Vec<usize> = (start..seq_len).collect();
                let (cos, sin) = provider.cos_sin(&ids);
                check_rows(&cos, &sin, ids.len())?;
                Ok((cos, sin))
            }
            RotaryProvider::TotalLength(provider) => {
                let (cos, sin) = provider.cos_sin(seq_len);
                check_rows(&cos, &sin, seq_len)?;
                Ok((
                    cos.slice(s![start.., ..]).to_owned(),
                    sin.slice(s![start.., ..]).to_owned(),
                ))
            }
        }
    }
}

fn check_rows(cos: &Array2<f32>, sin: &Array2<f32>, rows: usize) -> Result<()> {
    if cos.nrows() != rows || sin.dim() != cos.dim() {
        return Err(PressError::ShapeMismatch {
            what: "rotary factors",
            expected: vec![rows, cos.ncols()],
            actual: cos.shape().to_vec(),
        });
    }
    Ok(())
}

/// Non-interleaved ("rotate half") RoPE frequencies.
#[derive(Debug, Clone)]
pub struct RotaryTable {
    inv_freq: Array1<f32>,
    head_dim: usize,
}

impl RotaryTable {
    pub fn new(head_dim: usize, theta: f32) -> Self {
        let inv_freq = Array1::from_iter((0..head_dim / 2).map(|i| {
            let exponent = (2 * i) as f32 / head_dim as f32;
            1.0 / theta.powf(exponent)
        }));
        Self { inv_freq, head_dim }
    }

    pub fn head_dim(&self) -> usize {
        self.head_dim
    }

    fn factors(&self, positions: impl ExactSizeIterator<Item = usize>) -> (Array2<f32>, Array2<f32>) {
        let half_dim = self.inv_freq.len();
        let rows = positions.len();
        let mut cos = Array2::<f32>::zeros((rows, self.head_dim));
        let mut sin = Array2::<f32>::zeros((rows, self.head_dim));

        for (row, pos) in positions.enumerate() {
            for i in 0..half_dim {
                let angle = pos as f32 * self.inv_freq[i];
                let (s, c) = angle.sin_cos();
                // Both halves share a frequency.
                cos[[row, i]] = c;
                cos[[row, i + half_dim]] = c;
                sin[[row, i]] = s;
                sin[[row, i + half_dim]] = s;
            }
        }
        (cos, sin)
    }
}

impl PositionRotary for RotaryTable {
    fn cos_sin(&self, position_ids: &[usize]) -> (Array2<f32>, Array2<f32>) {
        self.factors(position_ids.iter().copied())
    }
}

impl LengthRotary for RotaryTable {
    fn cos_sin(&self, seq_len: usize) -> (Array2<f32>, Array2<f32>) {
        self.factors(0..seq_len)
    }
}

/// Rotate `x` (`[batch, heads, seq, head_dim]`) in place:
/// `x * cos + rotate_half(x) * sin`.
pub fn apply_rotary(
    x: &mut ArrayViewMut4<'_, f32>,
    cos: ArrayView2<'_, f32>,
    sin: ArrayView2<'_, f32>,
) -> Result<()> {
    let (_, _, seq, head_dim) = x.dim();
    if cos.dim() != (seq, head_dim) || sin.dim() != (seq, head_dim) {
        return Err(PressError::ShapeMismatch {
            what: "rotary factors",
            expected: vec![seq, head_dim],
            actual: cos.shape().to_vec(),
        });
    }
    let half_dim = head_dim / 2;

    for mut per_batch in x.axis_iter_mut(Axis(0)) {
        for mut per_head in per_batch.axis_iter_mut(Axis(0)) {
            for t in 0..seq {
                for i in 0..half_dim {
                    // Read both halves before writing either.
                    let x0 = per_head[[t, i]];
                    let x1 = per_head[[t, i + half_dim]];
                    per_head[[t, i]] = x0 * cos[[t, i]] - x1 * sin[[t, i]];
                    per_head[[t, i + half_dim]] = x1 * cos[[t, i + half_dim]] + x0 * sin[[t, i + half_dim]];
                }
            }
        }
    }
    Ok(())
}
