//! Tensor kernels shared by the window estimator.

use ndarray::{s, Array4, ArrayView4, Axis, Zip};

use crate::press::precision::ScoreElement;

/// Repeat KV heads for grouped-query attention.
///
/// `[batch, num_kv_heads, seq, head_dim] -> [batch, num_kv_heads * groups, seq, head_dim]`,
/// query head `h` reads KV head `h / groups`.
pub fn repeat_kv(kv: ArrayView4<'_, f32>, num_groups: usize) -> Array4<f32> {
    let (batch, num_kv_heads, seq_len, head_dim) = kv.dim();
    if num_groups == 1 {
        return kv.to_owned();
    }

    let mut repeated = Array4::zeros((batch, num_kv_heads * num_groups, seq_len, head_dim));
    for kv_head in 0..num_kv_heads {
        for g in 0..num_groups {
            let q_head = kv_head * num_groups + g;
            repeated
                .slice_mut(s![.., q_head, .., ..])
                .assign(&kv.slice(s![.., kv_head, .., ..]));
        }
    }
    repeated
}

/// `scores[b, h, i, j] = q[b, h, i, :] . k[b, h, j, :] * scale`.
pub fn scaled_scores(q: ArrayView4<'_, f32>, k: ArrayView4<'_, f32>, scale: f32) -> Array4<f32> {
    let (batch, heads, q_len, _) = q.dim();
    let k_len = k.dim().2;
    let mut scores = Array4::<f32>::zeros((batch, heads, q_len, k_len));

    Zip::from(scores.outer_iter_mut())
        .and(q.outer_iter())
        .and(k.outer_iter())
        .par_for_each(|mut out_b, q_b, k_b| {
            Zip::from(out_b.outer_iter_mut())
                .and(q_b.outer_iter())
                .and(k_b.outer_iter())
                .for_each(|mut out_h, q_h, k_h| {
                    out_h.assign(&q_h.dot(&k_h.t()));
                    out_h *= scale;
                });
        });
    scores
}

/// Mask future keys for the trailing `q_len` queries of a `k_len` sequence.
///
/// Query row `i` sits at absolute position `k_len - q_len + i` and may only see
/// keys at or before it; later keys get `-inf`.
pub fn apply_causal_mask(scores: &mut Array4<f32>) {
    let (_, _, q_len, k_len) = scores.dim();
    let offset = k_len - q_len;
    for i in 0..q_len {
        let first_masked = offset + i + 1;
        if first_masked < k_len {
            scores
                .slice_mut(s![.., .., i, first_masked..])
                .fill(f32::NEG_INFINITY);
        }
    }
}

/// Softmax over the last axis, accumulated in f64 and rounded once to `T`.
pub fn softmax_widened<T: ScoreElement>(scores: &Array4<f32>) -> Array4<T> {
    let mut out = Array4::from_elem(scores.dim(), T::from_f32(0.0));

    Zip::from(out.lanes_mut(Axis(3)))
        .and(scores.lanes(Axis(3)))
        .par_for_each(|mut out_row, row| {
            let max = row.iter().fold(f64::NEG_INFINITY, |a, &b| a.max(b as f64));
            if max == f64::NEG_INFINITY {
                // Fully masked row: leave zeros.
                return;
            }
            let exps: Vec<f64> = row.iter().map(|&v| (v as f64 - max).exp()).collect();
            let sum: f64 = exps.iter().sum();
            for (o, e) in out_row.iter_mut().zip(exps) {
                *o = T::from_f32((e / sum) as f32);
            }
        });
    out
}
